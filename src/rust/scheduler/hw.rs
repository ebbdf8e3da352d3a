// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Collaborators the scheduler drives but does not implement.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduler::{
    tick::Tick,
    types::{
        AsNr,
        AtomRef,
        ContextId,
        SlotNr,
    },
};
use ::std::sync::Arc;

//======================================================================================================================
// Traits
//======================================================================================================================

/// Job-slot registers of the GPU.
///
/// Both methods are called with interrupt-safe spinlocks held, possibly from the interrupt handler itself. They must
/// not block, and must not call back into the scheduler.
pub trait JobHardware: Send + Sync {
    /// Writes the job chain at `jc` to the NEXT registers of `slot` and starts it.
    fn submit(&self, slot: SlotNr, atom: AtomRef, jc: u64);

    /// Current scheduling tick.
    fn now(&self) -> Tick;
}

/// Address-space manager of the GPU MMU.
///
/// Both methods are called with the run-pool mutex and the address-space transaction lock held, never from interrupt
/// context. They may block.
pub trait AddressSpaceManager: Send + Sync {
    /// Makes the page tables of `ctx` active in `as_nr`.
    fn bind(&self, as_nr: AsNr, ctx: ContextId);

    /// Tears down the mappings of `ctx` from `as_nr`.
    fn unbind(&self, as_nr: AsNr, ctx: ContextId);
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T: JobHardware + ?Sized> JobHardware for Arc<T> {
    fn submit(&self, slot: SlotNr, atom: AtomRef, jc: u64) {
        (**self).submit(slot, atom, jc)
    }

    fn now(&self) -> Tick {
        (**self).now()
    }
}

impl<T: AddressSpaceManager + ?Sized> AddressSpaceManager for Arc<T> {
    fn bind(&self, as_nr: AsNr, ctx: ContextId) {
        (**self).bind(as_nr, ctx)
    }

    fn unbind(&self, as_nr: AsNr, ctx: ContextId) {
        (**self).unbind(as_nr, ctx)
    }
}
