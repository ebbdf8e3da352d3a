// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::limits::{
    MAX_ADDRESS_SPACES,
    MAX_JOB_SLOTS,
};
use ::std::fmt;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Index of a hardware job slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SlotNr(u8);

/// Index of a hardware address space. A context bound to an address space is resident in the run pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AsNr(u8);

/// Handle of a context registered with the scheduler: its offset in the scheduler's context arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContextId(usize);

/// Handle of an atom within its owning context: its offset in the context's atom arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AtomId(usize);

/// Fully-qualified reference to an atom. This is what job slots and hardware hold; it never owns the atom.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AtomRef {
    pub ctx: ContextId,
    pub atom: AtomId,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SlotNr {
    /// Builds a slot index, rejecting values beyond the hardware limit.
    pub fn new(nr: usize) -> Option<Self> {
        if nr < MAX_JOB_SLOTS {
            Some(Self(nr as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl AsNr {
    /// Builds an address-space index, rejecting values beyond the hardware limit.
    pub fn new(nr: usize) -> Option<Self> {
        if nr < MAX_ADDRESS_SPACES {
            Some(Self(nr as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit of this address space in the submission-allowed bitmap.
    pub fn bit(self) -> u16 {
        1u16 << self.0
    }
}

impl AtomRef {
    pub fn new(ctx: ContextId, atom: AtomId) -> Self {
        Self { ctx, atom }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for ContextId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<ContextId> for usize {
    fn from(value: ContextId) -> Self {
        value.0
    }
}

impl From<usize> for AtomId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<AtomId> for usize {
    fn from(value: AtomId) -> Self {
        value.0
    }
}

impl fmt::Display for SlotNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "js{}", self.0)
    }
}

impl fmt::Display for AsNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as{}", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

impl fmt::Display for AtomRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}/atom{}", self.ctx.0, self.atom.0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
