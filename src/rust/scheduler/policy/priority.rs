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
use ::std::{
    cmp::Reverse,
    collections::{
        BTreeMap,
        HashMap,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Position of a context in the queue: higher priority first, then lower sequence number.
type QueueKey = (Reverse<i32>, i64);

/// Priority-ordered policy queue, FIFO among contexts of equal priority.
#[derive(Default)]
pub struct PriorityPolicy {
    queue: BTreeMap<QueueKey, SchedContext>,
    keys: HashMap<ContextId, QueueKey>,
    /// Next sequence number for the back of a priority level.
    tail_seq: i64,
    /// Next sequence number for the front of a priority level. Counts down from -1.
    head_seq: i64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PriorityPolicy {
    fn insert(&mut self, ctx: SchedContext, seq: i64) {
        let key: QueueKey = (Reverse(ctx.priority()), seq);
        let previous: Option<QueueKey> = self.keys.insert(ctx.id(), key);
        debug_assert!(previous.is_none(), "{} queued twice", ctx.id());
        self.queue.insert(key, ctx);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Policy for PriorityPolicy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn enqueue_ctx(&mut self, ctx: SchedContext) {
        let seq: i64 = self.tail_seq;
        self.tail_seq += 1;
        self.insert(ctx, seq);
    }

    fn requeue_head_ctx(&mut self, ctx: SchedContext) {
        self.head_seq -= 1;
        let seq: i64 = self.head_seq;
        self.insert(ctx, seq);
    }

    fn dequeue_head_ctx(&mut self) -> Option<SchedContext> {
        let (_, ctx): (QueueKey, SchedContext) = self.queue.pop_first()?;
        self.keys.remove(&ctx.id());
        Some(ctx)
    }

    fn remove_ctx(&mut self, id: ContextId) -> Option<SchedContext> {
        let key: QueueKey = self.keys.remove(&id)?;
        self.queue.remove(&key)
    }

    fn contains(&self, id: ContextId) -> bool {
        self.keys.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
