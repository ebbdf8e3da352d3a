// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! GPU job scheduler.
//!
//! Decides which client context's atoms run on the hardware job slots, when a context may occupy a hardware address
//! space, and how completion, quota, and fairness events feed back into the next scheduling decision. The entry point
//! is [scheduler::JobScheduler].

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod runtime;
pub mod scheduler;
pub mod test_helpers;

pub use self::{
    config::Config,
    runtime::fail::Fail,
    scheduler::{
        AddJobResult,
        AsNr,
        AtomId,
        AtomRef,
        AtomState,
        ContextGuard,
        ContextId,
        JobAtom,
        JobClass,
        JobScheduler,
        PolicyKind,
        ReleaseOutcome,
        SchedContext,
        SchedulerConfig,
        SlotNr,
        SlotTimeout,
        SubmitOutcome,
        Tick,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equivalent, returning an [anyhow::Error] from the enclosing function otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(r#"ensure failed: `(left == right)`
  left: `{:?}`,
 right: `{:?}`"#, &*left_val, &*right_val)
                }
            }
        }
    });
    ($left:expr, $right:expr, $($arg:tt)+) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(r#"ensure failed: `(left == right)`
  left: `{:?}`,
 right: `{:?}`: {}"#, &*left_val, &*right_val, format_args!($($arg)+))
                }
            }
        }
    });
}

/// Ensures that two expressions are not equivalent, returning an [anyhow::Error] from the enclosing function otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(r#"ensure failed: `(left != right)`
  left: `{:?}`,
 right: `{:?}`"#, &*left_val, &*right_val)
                }
            }
        }
    });
    ($left:expr, $right:expr, $($arg:tt)+) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(r#"ensure failed: `(left != right)`
  left: `{:?}`,
 right: `{:?}`: {}"#, &*left_val, &*right_val, format_args!($($arg)+))
                }
            }
        }
    });
}
