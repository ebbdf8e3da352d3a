// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Software copy of a hardware job slot.
//!
//! A slot holds up to two atoms: the one running in the HEAD registers, and the one queued behind it in the NEXT
//! registers. Hardware always completes HEAD first.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::limits::{
        JOB_SLOT_DEPTH,
        MAX_SUBMIT_PER_SLOT_PER_IRQ,
    },
    scheduler::{
        tick::Tick,
        types::{
            AsNr,
            AtomRef,
        },
    },
};
use ::arrayvec::ArrayVec;

//======================================================================================================================
// Structures
//======================================================================================================================

/// An atom referenced by a job slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotEntry {
    pub atom: AtomRef,
    /// When the atom reached HEAD.
    pub start: Tick,
}

#[derive(Debug, Default)]
pub struct JobSlot {
    /// In-flight atoms, HEAD first.
    submitted: ArrayVec<SlotEntry, JOB_SLOT_DEPTH>,
    /// Submissions made by the interrupt handler currently running.
    submit_count_irq: u8,
    /// Set by the watchdog. A faulted slot accepts nothing until reset.
    faulted: bool,
    /// Address space that last supplied an atom to this slot.
    last_as: Option<AsNr>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl JobSlot {
    pub fn head(&self) -> Option<&SlotEntry> {
        self.submitted.first()
    }

    pub fn is_full(&self) -> bool {
        self.submitted.is_full()
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn atoms(&self) -> impl Iterator<Item = AtomRef> + '_ {
        self.submitted.iter().map(|entry| entry.atom)
    }

    pub fn last_as(&self) -> Option<AsNr> {
        self.last_as
    }

    /// Whether the interrupt handler may still submit on this slot.
    pub fn irq_budget_left(&self) -> bool {
        self.submit_count_irq < MAX_SUBMIT_PER_SLOT_PER_IRQ
    }

    pub fn reset_irq_budget(&mut self) {
        self.submit_count_irq = 0;
    }

    pub fn charge_irq_budget(&mut self) {
        self.submit_count_irq += 1;
    }

    /// Queues an atom behind whatever is in flight. `now` becomes its start time if it lands in HEAD.
    pub fn push(&mut self, atom: AtomRef, as_nr: AsNr, now: Tick) {
        if self.submitted.try_push(SlotEntry { atom, start: now }).is_err() {
            panic!("submission to a full job slot ({})", atom);
        }
        self.last_as = Some(as_nr);
    }

    /// Retires HEAD. The atom in NEXT, if any, moves to HEAD and starts running at `end`.
    pub fn pop_head(&mut self, end: Tick) -> Option<SlotEntry> {
        let head: SlotEntry = self.submitted.pop_at(0)?;
        if let Some(next) = self.submitted.first_mut() {
            next.start = end;
        }
        Some(head)
    }

    pub fn set_faulted(&mut self) {
        self.faulted = true;
    }

    /// Clears the fault state and forgets every in-flight atom, returning them HEAD first.
    pub fn reset(&mut self) -> ArrayVec<SlotEntry, JOB_SLOT_DEPTH> {
        self.faulted = false;
        self.submit_count_irq = 0;
        ::std::mem::take(&mut self.submitted)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
