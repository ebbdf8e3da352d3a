// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::limits::MAX_JOB_SLOTS,
    scheduler::{
        JobHardware,
        SlotNr,
        Tick,
    },
    AtomRef,
};
use ::std::{
    collections::VecDeque,
    sync::atomic::{
        AtomicU32,
        Ordering,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A job chain written to the job-slot registers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Submission {
    pub slot: SlotNr,
    pub atom: AtomRef,
    pub jc: u64,
    pub at: Tick,
}

/// Job-slot registers backed by memory. Jobs run until the test retires them with [SimulatedGpu::complete_head].
pub struct SimulatedGpu {
    clock: AtomicU32,
    submissions: spin::Mutex<Vec<Submission>>,
    in_flight: spin::Mutex<Vec<VecDeque<AtomRef>>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SimulatedGpu {
    pub fn new() -> Self {
        Self {
            clock: AtomicU32::new(0),
            submissions: spin::Mutex::new(Vec::new()),
            in_flight: spin::Mutex::new((0..MAX_JOB_SLOTS).map(|_| VecDeque::new()).collect()),
        }
    }

    pub fn set_now(&self, now: Tick) {
        self.clock.store(now.value(), Ordering::Release);
    }

    /// Moves the clock forward, returning the new tick.
    pub fn advance(&self, ticks: u32) -> Tick {
        let previous: u32 = self.clock.fetch_add(ticks, Ordering::AcqRel);
        Tick::new(previous.wrapping_add(ticks))
    }

    /// Every submission so far, oldest first.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    pub fn nr_submitted(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Atoms running on `slot`, HEAD first.
    pub fn in_flight(&self, slot: SlotNr) -> Vec<AtomRef> {
        self.in_flight.lock()[slot.index()].iter().copied().collect()
    }

    pub fn head(&self, slot: SlotNr) -> Option<AtomRef> {
        self.in_flight.lock()[slot.index()].front().copied()
    }

    /// Retires the HEAD job of `slot`, as the hardware does right before raising its interrupt.
    pub fn complete_head(&self, slot: SlotNr) -> Option<AtomRef> {
        self.in_flight.lock()[slot.index()].pop_front()
    }

    /// Forgets every job on `slot`, as a hard reset of the slot does.
    pub fn hardware_reset(&self, slot: SlotNr) -> Vec<AtomRef> {
        self.in_flight.lock()[slot.index()].drain(..).collect()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for SimulatedGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl JobHardware for SimulatedGpu {
    fn submit(&self, slot: SlotNr, atom: AtomRef, jc: u64) {
        let at: Tick = self.now();
        self.submissions.lock().push(Submission { slot, atom, jc, at });
        self.in_flight.lock()[slot.index()].push_back(atom);
    }

    fn now(&self) -> Tick {
        Tick::new(self.clock.load(Ordering::Acquire))
    }
}
