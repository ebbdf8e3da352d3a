// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Stand-ins for the GPU, used by the tests and the simulator.

pub mod gpu;
pub mod mmu;

pub use self::{
    gpu::{
        SimulatedGpu,
        Submission,
    },
    mmu::{
        MmuEvent,
        RecordingMmu,
    },
};

use crate::{
    scheduler::{
        JobHardware,
        ReleaseOutcome,
        SubmitOutcome,
    },
    AsNr,
    AtomRef,
    JobScheduler,
    SchedulerConfig,
    SlotNr,
};
use ::std::sync::Arc;

//======================================================================================================================
// Structures
//======================================================================================================================

pub type TestScheduler = JobScheduler<Arc<SimulatedGpu>, Arc<RecordingMmu>>;

/// A scheduler wired to a simulated GPU.
pub struct TestBed {
    pub sched: Arc<TestScheduler>,
    pub gpu: Arc<SimulatedGpu>,
    pub mmu: Arc<RecordingMmu>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TestBed {
    pub fn new(config: SchedulerConfig) -> Self {
        let gpu: Arc<SimulatedGpu> = Arc::new(SimulatedGpu::new());
        let mmu: Arc<RecordingMmu> = Arc::new(RecordingMmu::new());
        let sched: Arc<TestScheduler> = Arc::new(JobScheduler::new(config, gpu.clone(), mmu.clone()));
        Self { sched, gpu, mmu }
    }

    /// Has the hardware finish the HEAD job of `slot` now, and runs the interrupt handler for it.
    pub fn retire_head(&self, slot: SlotNr) -> Option<(AtomRef, SubmitOutcome)> {
        let atom: AtomRef = self.gpu.complete_head(slot)?;
        let scope = self.sched.enter_irq();
        let outcome: SubmitOutcome = self.sched.job_done_irq(&scope, slot, atom, self.gpu.now());
        Some((atom, outcome))
    }

    /// Retires the HEAD job of `slot` and completes it the way the worker would.
    pub fn run_head(&self, slot: SlotNr) -> Option<(AtomRef, ReleaseOutcome)> {
        let (atom, _): (AtomRef, SubmitOutcome) = self.retire_head(slot)?;
        Some((atom, self.sched.complete_job(atom)))
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

pub fn slot(nr: usize) -> SlotNr {
    match SlotNr::new(nr) {
        Some(slot) => slot,
        None => panic!("job slot {} is out of range", nr),
    }
}

pub fn address_space(nr: usize) -> AsNr {
    match AsNr::new(nr) {
        Some(as_nr) => as_nr,
        None => panic!("address space {} is out of range", nr),
    }
}
