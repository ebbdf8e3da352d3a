// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduler::types::ContextId;
use ::parking_lot::{
    Mutex,
    MutexGuard,
};
use ::std::{
    fmt,
    ops::{
        Deref,
        DerefMut,
    },
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// State of a context that is only touched with the context lock held.
#[derive(Debug, Default)]
pub struct CtxJobState {
    /// Atoms registered with the scheduler, whatever their state.
    pub(crate) nr_jobs: usize,
    /// The context is being killed: nothing more is admitted or drawn from it.
    pub(crate) is_dying: bool,
    /// The context was unregistered. A handle still sitting in a queue must then be dropped.
    pub(crate) is_terminated: bool,
}

struct ContextInner {
    id: ContextId,
    /// Larger values are promoted first by the priority policy.
    priority: i32,
    /// Context lock: outermost lock of the scheduler.
    jsctx: Mutex<CtxJobState>,
}

/// Shared handle on a context registered with a [crate::JobScheduler].
#[derive(Clone)]
pub struct SchedContext(Arc<ContextInner>);

/// Proof that the context lock is held.
pub struct ContextGuard<'a> {
    id: ContextId,
    state: MutexGuard<'a, CtxJobState>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SchedContext {
    pub(crate) fn new(id: ContextId, priority: i32) -> Self {
        Self(Arc::new(ContextInner {
            id,
            priority,
            jsctx: Mutex::new(CtxJobState::default()),
        }))
    }

    pub fn id(&self) -> ContextId {
        self.0.id
    }

    pub fn priority(&self) -> i32 {
        self.0.priority
    }

    /// Takes the context lock.
    pub fn lock(&self) -> ContextGuard<'_> {
        ContextGuard {
            id: self.0.id,
            state: self.0.jsctx.lock(),
        }
    }
}

impl<'a> ContextGuard<'a> {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn nr_jobs(&self) -> usize {
        self.state.nr_jobs
    }

    pub fn is_dying(&self) -> bool {
        self.state.is_dying
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<'a> Deref for ContextGuard<'a> {
    type Target = CtxJobState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<'a> DerefMut for ContextGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

impl fmt::Debug for SchedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedContext")
            .field("id", &self.0.id)
            .field("priority", &self.0.priority)
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
