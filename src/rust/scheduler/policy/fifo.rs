// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduler::{
    context::SchedContext,
    policy::Policy,
    types::ContextId,
};
use ::std::collections::VecDeque;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Arrival-order policy queue. Priorities are ignored.
#[derive(Default)]
pub struct FifoPolicy {
    queue: VecDeque<SchedContext>,
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Policy for FifoPolicy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn enqueue_ctx(&mut self, ctx: SchedContext) {
        debug_assert!(!self.contains(ctx.id()), "{} queued twice", ctx.id());
        self.queue.push_back(ctx);
    }

    fn requeue_head_ctx(&mut self, ctx: SchedContext) {
        debug_assert!(!self.contains(ctx.id()), "{} queued twice", ctx.id());
        self.queue.push_front(ctx);
    }

    fn dequeue_head_ctx(&mut self) -> Option<SchedContext> {
        self.queue.pop_front()
    }

    fn remove_ctx(&mut self, id: ContextId) -> Option<SchedContext> {
        let position: usize = self.queue.iter().position(|ctx| ctx.id() == id)?;
        self.queue.remove(position)
    }

    fn contains(&self, id: ContextId) -> bool {
        self.queue.iter().any(|ctx| ctx.id() == id)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
