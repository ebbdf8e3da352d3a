// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::libc::{
    c_int,
    ECANCELED,
    EINVAL,
    EIO,
};
use ::std::{
    error,
    fmt,
    io,
};

//==============================================================================
// Structures
//==============================================================================

/// Failure
#[derive(Clone, Eq, PartialEq)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: i32, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }

    /// Creates a failure for an argument the scheduler cannot honor, such as a job slot the hardware lacks or an
    /// option out of range.
    pub fn invalid(cause: &str) -> Self {
        Self::new(EINVAL, cause)
    }

    /// Creates a failure for a request refused because the scheduler is halted or the context is dying.
    pub fn cancelled(cause: &str) -> Self {
        Self::new(ECANCELED, cause)
    }

    pub fn is_cancelled(&self) -> bool {
        self.errno == ECANCELED
    }

    /// Symbolic name of the error code, when it is one the scheduler produces.
    fn errno_name(&self) -> Option<&'static str> {
        match self.errno {
            EINVAL => Some("EINVAL"),
            ECANCELED => Some("ECANCELED"),
            EIO => Some("EIO"),
            _ => None,
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno_name() {
            Some(name) => write!(f, "Error {} ({}): {:?}", self.errno, name, self.cause),
            None => write!(f, "Error {:?}: {:?}", self.errno, self.cause),
        }
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Self {
            errno: e.raw_os_error().unwrap_or(EIO),
            cause: format!("I/O error: {}", e),
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
