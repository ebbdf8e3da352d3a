// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Detection of hung job slots.
//!
//! A slot whose HEAD atom has run for longer than the reset timeout is declared hung. The scheduler does not retry
//! anything: it stops submitting to the slot, fails the queued work of every context involved, and reports the slot
//! upwards. Whoever owns the GPU then resets the hardware and calls [JobScheduler::reset_slot].

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::Fail,
        limits::JOB_SLOT_DEPTH,
    },
    scheduler::{
        atom::AtomState,
        hw::{
            AddressSpaceManager,
            JobHardware,
        },
        jobslot::SlotEntry,
        scheduler::{
            JobScheduler,
            JobSlotGuard,
            RunPoolGuard,
            RunPoolIrqGuard,
        },
        tick::{
            ticks_after,
            Tick,
        },
        types::{
            AtomRef,
            SlotNr,
        },
    },
};
use ::arrayvec::ArrayVec;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Report of a hung job slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotTimeout {
    pub slot: SlotNr,
    /// Atoms the slot held, HEAD first. They stay there until [JobScheduler::reset_slot].
    pub in_flight: Vec<AtomRef>,
    /// Queued atoms of the contexts involved, now failed. They never reached a slot and must be removed with
    /// [JobScheduler::remove_job].
    pub failed_pending: Vec<AtomRef>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<H: JobHardware, M: AddressSpaceManager> JobScheduler<H, M> {
    /// Looks for job slots whose HEAD started more than the reset timeout before `now`. Runs in worker context.
    pub fn watchdog_check(&self, now: Tick) -> Vec<SlotTimeout> {
        let timeout_ticks: u32 = self
            .config
            .get_tick_rate()
            .ms_to_ticks(self.config.get_reset_timeout_ms());
        let _runpool: RunPoolGuard = self.lock_runpool();
        let mut reports: Vec<SlotTimeout> = Vec::new();

        for slot_nr in self.slot_numbers() {
            let mut slot: JobSlotGuard = self.lock_slot(slot_nr);
            if slot.state().is_faulted() {
                continue;
            }
            let Some(head) = slot.state().head().copied() else {
                continue;
            };
            let deadline: Tick = head.start.wrapping_add(timeout_ticks);
            if ticks_after(deadline, now) {
                continue;
            }

            slot.state().set_faulted();
            let in_flight: Vec<AtomRef> = slot.state().atoms().collect();
            let mut failed_pending: Vec<AtomRef> = Vec::new();
            let mut irq: RunPoolIrqGuard = self.lock_irq();
            for atom in in_flight.iter() {
                failed_pending.extend(irq.state().context_mut(atom.ctx).fail_pending());
            }
            warn!(
                "watchdog_check(): {} hung (head={}, started={}, now={}, failed_pending={})",
                slot_nr,
                head.atom,
                head.start,
                now,
                failed_pending.len()
            );
            reports.push(SlotTimeout {
                slot: slot_nr,
                in_flight,
                failed_pending,
            });
        }

        reports
    }

    /// Brings a job slot back into service after the hardware was reset. Returns the atoms the slot held, now
    /// failed. Each still pins its context and must be finished with [JobScheduler::complete_job]. Must not be called
    /// with any scheduler lock held.
    pub fn reset_slot(&self, slot: SlotNr) -> Result<Vec<AtomRef>, Fail> {
        self.check_slot("reset_slot", slot)?;
        let runpool: RunPoolGuard = self.lock_runpool();
        let drained: Vec<AtomRef> = {
            let mut slot_guard: JobSlotGuard = self.lock_slot(slot);
            let entries: ArrayVec<SlotEntry, JOB_SLOT_DEPTH> = slot_guard.state().reset();
            let mut irq: RunPoolIrqGuard = self.lock_irq();
            for entry in entries.iter() {
                let state = irq.state().context_mut(entry.atom.ctx);
                state.nr_running -= 1;
                state.atom_mut(entry.atom.atom).state = AtomState::Failed;
            }
            entries.iter().map(|entry| entry.atom).collect()
        };
        info!("reset_slot(): {} back in service, {} atoms failed", slot, drained.len());
        self.try_submit_deferred(&runpool, slot);
        drop(runpool);
        // Queued contexts whose only work was for this slot could not be promoted until now.
        self.try_schedule_head();
        Ok(drained)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
