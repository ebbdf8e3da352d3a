// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Run pool bookkeeping.
//!
//! The run pool is the set of contexts bound to a hardware address space. Its state is split in two:
//!
//! - [RunPoolState] sits behind the coarse run-pool mutex and tracks which address spaces are free. It changes only
//!   when a context is admitted or evicted, both of which may block.
//! - [RunPoolIrq] sits behind the interrupt-safe spinlock. It holds everything the interrupt handler reads or writes:
//!   the per-address-space busy refcounts, the submission-allowed bitmap, and the scheduling record of every
//!   registered context, including its atoms.
//!
//! Contexts and address spaces refer to each other by index only.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::limits::MAX_ADDRESS_SPACES,
    scheduler::{
        atom::{
            AtomRecord,
            AtomState,
        },
        context::SchedContext,
        types::{
            AsNr,
            AtomId,
            AtomRef,
            ContextId,
            SlotNr,
        },
    },
};
use ::arrayvec::ArrayVec;
use ::bit_iter::BitIter;
use ::slab::Slab;
use ::std::collections::VecDeque;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Occupant of one address space.
#[derive(Clone, Copy, Debug, Default)]
pub struct PerAsData {
    pub ctx: Option<ContextId>,
    /// Holds that pin the occupant in the run pool.
    pub busy_refcount: u32,
}

/// Scheduling record of a registered context.
pub struct CtxRunState {
    pub handle: SchedContext,
    /// Address space the context is bound to. Some iff the context is scheduled.
    pub as_nr: Option<AsNr>,
    pub atoms: Slab<AtomRecord>,
    /// Queued atoms of each job slot, in submission order.
    pub ready: Vec<VecDeque<AtomId>>,
    /// Atoms registered but not yet admitted to a slot.
    pub nr_pending: usize,
    /// Atoms currently referenced by a slot.
    pub nr_running: usize,
    /// Registered not-soft-stoppable atoms. While non-zero, every atom of the context counts as not-soft-stoppable.
    pub nr_nss: usize,
    /// GPU time consumed over the context's lifetime (us).
    pub runtime_us: u64,
    /// GPU time consumed since the context was last admitted (us).
    pub slice_used_us: u64,
}

/// Run-pool state guarded by the interrupt-safe lock.
pub struct RunPoolIrq {
    per_as: ArrayVec<PerAsData, MAX_ADDRESS_SPACES>,
    /// Bit n is set iff the occupant of address space n may have more atoms drawn from it.
    submit_allowed: u16,
    contexts: Slab<CtxRunState>,
    /// Registered not-soft-stoppable atoms across every resident context.
    nr_nss_resident: usize,
}

/// Run-pool state guarded by the coarse run-pool mutex.
#[derive(Debug)]
pub struct RunPoolState {
    /// Bit n is set iff address space n is free.
    free_as: u16,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CtxRunState {
    pub fn new(handle: SchedContext, nr_job_slots: usize) -> Self {
        Self {
            handle,
            as_nr: None,
            atoms: Slab::new(),
            ready: (0..nr_job_slots).map(|_| VecDeque::new()).collect(),
            nr_pending: 0,
            nr_running: 0,
            nr_nss: 0,
            runtime_us: 0,
            slice_used_us: 0,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.as_nr.is_some()
    }

    pub fn atom(&self, atom: AtomId) -> &AtomRecord {
        match self.atoms.get(usize::from(atom)) {
            Some(record) => record,
            None => panic!("unknown atom {} on {}", usize::from(atom), self.handle.id()),
        }
    }

    pub fn atom_mut(&mut self, atom: AtomId) -> &mut AtomRecord {
        let id: ContextId = self.handle.id();
        match self.atoms.get_mut(usize::from(atom)) {
            Some(record) => record,
            None => panic!("unknown atom {} on {}", usize::from(atom), id),
        }
    }

    /// Fails every queued atom, returning them.
    pub fn fail_pending(&mut self) -> Vec<AtomRef> {
        let ctx: ContextId = self.handle.id();
        let mut failed: Vec<AtomRef> = Vec::with_capacity(self.nr_pending);
        for ready in self.ready.iter_mut() {
            for atom in ready.drain(..) {
                if let Some(record) = self.atoms.get_mut(usize::from(atom)) {
                    record.state = AtomState::Failed;
                }
                failed.push(AtomRef::new(ctx, atom));
            }
        }
        self.nr_pending = 0;
        failed
    }

    /// Whether some queued atom could go on a job slot now, capacity aside. `nss_only` is set while the run pool only
    /// takes not-soft-stoppable work, and bit n of `faulted` while job slot n is out of service.
    pub fn has_runnable_atoms(&self, nss_only: bool, faulted: u16) -> bool {
        if nss_only && self.nr_nss == 0 {
            return false;
        }
        self.ready
            .iter()
            .enumerate()
            .any(|(nr, ready)| !ready.is_empty() && faulted & (1 << nr) == 0)
    }
}

impl RunPoolIrq {
    pub fn new(nr_address_spaces: usize) -> Self {
        Self {
            per_as: (0..nr_address_spaces).map(|_| PerAsData::default()).collect(),
            submit_allowed: 0,
            contexts: Slab::new(),
            nr_nss_resident: 0,
        }
    }

    /// Registers a new context and returns its handle.
    pub fn insert_context(&mut self, priority: i32, nr_job_slots: usize) -> SchedContext {
        let entry = self.contexts.vacant_entry();
        let handle: SchedContext = SchedContext::new(ContextId::from(entry.key()), priority);
        entry.insert(CtxRunState::new(handle.clone(), nr_job_slots));
        handle
    }

    pub fn remove_context(&mut self, id: ContextId) -> CtxRunState {
        match self.contexts.try_remove(usize::from(id)) {
            Some(state) => state,
            None => panic!("unregistering unknown context {}", id),
        }
    }

    pub fn nr_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub fn try_context(&self, id: ContextId) -> Option<&CtxRunState> {
        self.contexts.get(usize::from(id))
    }

    pub fn context(&self, id: ContextId) -> &CtxRunState {
        match self.contexts.get(usize::from(id)) {
            Some(state) => state,
            None => panic!("unknown context {}", id),
        }
    }

    pub fn context_mut(&mut self, id: ContextId) -> &mut CtxRunState {
        match self.contexts.get_mut(usize::from(id)) {
            Some(state) => state,
            None => panic!("unknown context {}", id),
        }
    }

    pub fn per_as(&self, as_nr: AsNr) -> &PerAsData {
        &self.per_as[as_nr.index()]
    }

    /// Whether the run pool only accepts not-soft-stoppable work.
    pub fn is_nss_state(&self) -> bool {
        self.nr_nss_resident > 0
    }

    pub fn nss_added(&mut self, count: usize) {
        self.nr_nss_resident += count;
    }

    /// Accounts for resident NSS atoms going away. Returns true if the run pool left NSS state.
    pub fn nss_removed(&mut self, count: usize) -> bool {
        if count == 0 {
            return false;
        }
        assert!(self.nr_nss_resident >= count, "NSS atom count underflow");
        self.nr_nss_resident -= count;
        self.nr_nss_resident == 0
    }

    fn resident_as(&self, id: ContextId) -> AsNr {
        match self.context(id).as_nr {
            Some(as_nr) if self.per_as[as_nr.index()].ctx == Some(id) => as_nr,
            _ => panic!("{} is not resident in the run pool", id),
        }
    }

    pub fn is_submit_allowed(&self, id: ContextId) -> bool {
        let as_nr: AsNr = self.resident_as(id);
        self.submit_allowed & as_nr.bit() != 0
    }

    pub fn set_submit_allowed(&mut self, id: ContextId) {
        let as_nr: AsNr = self.resident_as(id);
        self.submit_allowed |= as_nr.bit();
    }

    pub fn clear_submit_allowed(&mut self, id: ContextId) {
        let as_nr: AsNr = self.resident_as(id);
        self.submit_allowed &= !as_nr.bit();
    }

    /// Makes `id` the occupant of `as_nr`. The context starts with submission allowed and a fresh time slice.
    pub fn bind(&mut self, as_nr: AsNr, id: ContextId) {
        let per_as: &mut PerAsData = &mut self.per_as[as_nr.index()];
        assert!(per_as.ctx.is_none(), "{} is already occupied", as_nr);
        per_as.ctx = Some(id);
        per_as.busy_refcount = 0;

        let state: &mut CtxRunState = self.context_mut(id);
        assert!(state.as_nr.is_none(), "{} is already resident", id);
        state.as_nr = Some(as_nr);
        state.slice_used_us = 0;
        let nr_nss: usize = state.nr_nss;

        self.nss_added(nr_nss);
        self.set_submit_allowed(id);
    }

    /// Whether `id` has an atom that could be submitted with the run pool as it is. See
    /// [CtxRunState::has_runnable_atoms].
    pub fn is_runnable(&self, id: ContextId, faulted: u16) -> bool {
        self.context(id).has_runnable_atoms(self.is_nss_state(), faulted)
    }

    /// Evicts the occupant of `as_nr`. Returns it, and whether the run pool left NSS state.
    pub fn unbind(&mut self, as_nr: AsNr) -> (ContextId, bool) {
        let per_as: &mut PerAsData = &mut self.per_as[as_nr.index()];
        let id: ContextId = match per_as.ctx.take() {
            Some(id) => id,
            None => panic!("evicting from empty {}", as_nr),
        };
        assert_eq!(per_as.busy_refcount, 0, "evicting busy {}", id);
        self.submit_allowed &= !as_nr.bit();

        let state: &mut CtxRunState = self.context_mut(id);
        state.as_nr = None;
        let nr_nss: usize = state.nr_nss;
        (id, self.nss_removed(nr_nss))
    }

    /// Adds a busy reference on a resident context. Returns false if the context is not in the run pool.
    pub fn retain(&mut self, id: ContextId) -> bool {
        let Some(as_nr) = self.try_context(id).and_then(|state| state.as_nr) else {
            return false;
        };
        let per_as: &mut PerAsData = &mut self.per_as[as_nr.index()];
        debug_assert_eq!(per_as.ctx, Some(id));
        per_as.busy_refcount += 1;
        true
    }

    /// Drops a busy reference. Returns the address space and the remaining count.
    pub fn release(&mut self, id: ContextId) -> (AsNr, u32) {
        let as_nr: AsNr = self.resident_as(id);
        let per_as: &mut PerAsData = &mut self.per_as[as_nr.index()];
        assert!(per_as.busy_refcount > 0, "release of {} without a matching retain", id);
        per_as.busy_refcount -= 1;
        (as_nr, per_as.busy_refcount)
    }

    pub fn lookup(&self, as_nr: AsNr) -> Option<ContextId> {
        self.per_as.get(as_nr.index()).and_then(|per_as| per_as.ctx)
    }

    /// Finds the next atom to put on `slot`. Address spaces are visited round-robin, starting after `after`. Only the
    /// oldest queued atom of each context is a candidate, so submission order is kept per context and slot. In NSS
    /// state only contexts holding not-soft-stoppable atoms are drawn from.
    pub fn pick_next(&self, slot: SlotNr, after: Option<AsNr>) -> Option<(AsNr, AtomRef)> {
        let start: u32 = after.map_or(0, |as_nr| as_nr.index() as u32 + 1);
        let below: u16 = 1u16.checked_shl(start).map_or(u16::MAX, |bit| bit - 1);
        let nss_only: bool = self.is_nss_state();
        let rotation = BitIter::from(self.submit_allowed & !below).chain(BitIter::from(self.submit_allowed & below));
        for as_nr in rotation.filter_map(AsNr::new) {
            let Some(id) = self.per_as[as_nr.index()].ctx else {
                continue;
            };
            let state: &CtxRunState = self.context(id);
            if nss_only && state.nr_nss == 0 {
                continue;
            }
            let Some(&atom) = state.ready[slot.index()].front() else {
                continue;
            };
            return Some((as_nr, AtomRef::new(id, atom)));
        }
        None
    }
}

impl RunPoolState {
    pub fn new(nr_address_spaces: usize) -> Self {
        assert!(nr_address_spaces > 0 && nr_address_spaces <= MAX_ADDRESS_SPACES);
        let free_as: u16 = if nr_address_spaces == MAX_ADDRESS_SPACES {
            u16::MAX
        } else {
            (1u16 << nr_address_spaces) - 1
        };
        Self { free_as }
    }

    pub fn has_free_as(&self) -> bool {
        self.free_as != 0
    }

    pub fn nr_free(&self) -> usize {
        self.free_as.count_ones() as usize
    }

    /// Claims the lowest free address space.
    pub fn alloc_as(&mut self) -> Option<AsNr> {
        let as_nr: AsNr = BitIter::from(self.free_as).next().and_then(AsNr::new)?;
        self.free_as &= !as_nr.bit();
        Some(as_nr)
    }

    pub fn free_as(&mut self, as_nr: AsNr) {
        assert_eq!(self.free_as & as_nr.bit(), 0, "{} freed twice", as_nr);
        self.free_as |= as_nr.bit();
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
