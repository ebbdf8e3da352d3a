// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduler::types::SlotNr;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Occupancy class of an atom.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobClass {
    /// Ordinary work that may share the GPU with anything else.
    Standard,
    /// Work that cannot be soft-stopped. While any resident context has such atoms, only they are submitted.
    NotSoftStoppable,
}

/// Unit of work as handed to the scheduler by the submission path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JobAtom {
    /// GPU address of the job chain.
    pub jc: u64,
    /// Job slot this atom must run on.
    pub slot: SlotNr,
    pub class: JobClass,
}

/// Lifecycle of an atom while registered with the scheduler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AtomState {
    /// Registered, waiting for room on its job slot.
    Queued,
    /// Referenced by a job slot.
    InSlot,
    /// Hardware signalled completion; awaiting [crate::JobScheduler::complete_job].
    Done,
    /// Cancelled by a hardware timeout or because its context was killed.
    Failed,
}

/// Scheduler-side record of a registered atom.
#[derive(Debug)]
pub struct AtomRecord {
    pub jc: u64,
    pub slot: SlotNr,
    pub class: JobClass,
    pub state: AtomState,
    /// Slot on which the interrupt handler asked for a deferred resubmission attempt.
    pub retry_submit_on_slot: Option<SlotNr>,
    /// Set once the atom reached a job slot. Such an atom pins its context until it is completed.
    pub holds_retain: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl JobAtom {
    pub fn new(jc: u64, slot: SlotNr, class: JobClass) -> Self {
        Self { jc, slot, class }
    }

    /// Builds a standard atom.
    pub fn standard(jc: u64, slot: SlotNr) -> Self {
        Self::new(jc, slot, JobClass::Standard)
    }
}

impl JobClass {
    pub fn is_nss(self) -> bool {
        self == JobClass::NotSoftStoppable
    }
}

impl AtomRecord {
    pub fn new(atom: &JobAtom) -> Self {
        Self {
            jc: atom.jc,
            slot: atom.slot,
            class: atom.class,
            state: AtomState::Queued,
            retry_submit_on_slot: None,
            holds_retain: false,
        }
    }
}
