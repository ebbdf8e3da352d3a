// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::limits::MAX_ADDRESS_SPACES,
    scheduler::AddressSpaceManager,
    AsNr,
    ContextId,
};
use ::parking_lot::Mutex;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MmuEvent {
    Bind(AsNr, ContextId),
    Unbind(AsNr, ContextId),
}

/// Address-space manager that records what it is asked to do and checks it makes sense.
pub struct RecordingMmu {
    events: Mutex<Vec<MmuEvent>>,
    bound: Mutex<[Option<ContextId>; MAX_ADDRESS_SPACES]>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl RecordingMmu {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            bound: Mutex::new([None; MAX_ADDRESS_SPACES]),
        }
    }

    pub fn events(&self) -> Vec<MmuEvent> {
        self.events.lock().clone()
    }

    /// Context whose page tables are active in `as_nr`.
    pub fn bound(&self, as_nr: AsNr) -> Option<ContextId> {
        self.bound.lock()[as_nr.index()]
    }

    pub fn nr_bound(&self) -> usize {
        self.bound.lock().iter().filter(|ctx| ctx.is_some()).count()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for RecordingMmu {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpaceManager for RecordingMmu {
    fn bind(&self, as_nr: AsNr, ctx: ContextId) {
        let mut bound = self.bound.lock();
        if let Some(other) = bound[as_nr.index()] {
            panic!("binding {} to {} which still holds {}", ctx, as_nr, other);
        }
        if let Some(elsewhere) = bound.iter().position(|c| *c == Some(ctx)) {
            panic!("binding {} to {} while it is bound to as{}", ctx, as_nr, elsewhere);
        }
        bound[as_nr.index()] = Some(ctx);
        self.events.lock().push(MmuEvent::Bind(as_nr, ctx));
    }

    fn unbind(&self, as_nr: AsNr, ctx: ContextId) {
        let mut bound = self.bound.lock();
        if bound[as_nr.index()] != Some(ctx) {
            panic!("unbinding {} from {} which holds {:?}", ctx, as_nr, bound[as_nr.index()]);
        }
        bound[as_nr.index()] = None;
        self.events.lock().push(MmuEvent::Unbind(as_nr, ctx));
    }
}
