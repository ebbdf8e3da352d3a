// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::std::sync::{
    Once,
    OnceLock,
};

//==============================================================================
// Constants
//==============================================================================

/// Log specification used when `RUST_LOG` is not set.
const DEFAULT_LOG_SPEC: &str = "info";

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Keeps the logger alive for the lifetime of the process.
static LOGGER: OnceLock<LoggerHandle> = OnceLock::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        let logger: Logger = match Logger::try_with_env_or_str(DEFAULT_LOG_SPEC) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("initialize(): invalid log specification ({:?})", e);
                return;
            },
        };
        match logger.start() {
            Ok(handle) => {
                let _ = LOGGER.set(handle);
            },
            Err(e) => eprintln!("initialize(): failed to start logger ({:?})", e),
        }
    });
}
