// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Orderings for the queue of contexts waiting for an address space.

mod fifo;
mod priority;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::fail::Fail,
    scheduler::{
        context::SchedContext,
        types::ContextId,
    },
};
use ::std::{
    fmt,
    str::FromStr,
};

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    fifo::FifoPolicy,
    priority::PriorityPolicy,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Ordering used by the policy queue.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PolicyKind {
    /// Arrival order.
    #[default]
    Fifo,
    /// Highest priority first, arrival order among equals.
    Priority,
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// Ordered collection of contexts that are not in the run pool. Only ever used with the queue lock held.
pub trait Policy: Send {
    fn name(&self) -> &'static str;

    /// Appends a context behind every context of the same rank.
    fn enqueue_ctx(&mut self, ctx: SchedContext);

    /// Puts back a context that was dequeued but could not be admitted, ahead of every context of the same rank.
    fn requeue_head_ctx(&mut self, ctx: SchedContext);

    fn dequeue_head_ctx(&mut self) -> Option<SchedContext>;

    fn remove_ctx(&mut self, id: ContextId) -> Option<SchedContext>;

    fn contains(&self, id: ContextId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PolicyKind {
    /// Instantiates the queue for this ordering.
    pub fn build(self) -> Box<dyn Policy> {
        match self {
            PolicyKind::Fifo => Box::new(FifoPolicy::default()),
            PolicyKind::Priority => Box::new(PriorityPolicy::default()),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for PolicyKind {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(PolicyKind::Fifo),
            "priority" => Ok(PolicyKind::Priority),
            _ => {
                let cause: String = format!("unknown queue policy \"{}\"", s);
                error!("from_str(): {}", cause);
                Err(Fail::invalid(&cause))
            },
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Fifo => write!(f, "fifo"),
            PolicyKind::Priority => write!(f, "priority"),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
