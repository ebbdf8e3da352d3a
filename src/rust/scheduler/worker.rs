// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Scheduling worker.
//!
//! Everything the interrupt handler and the submission path cannot do themselves is posted to the worker as a
//! [WorkItem]. The worker may block and may loop as long as work keeps coming.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduler::{
    hw::{
        AddressSpaceManager,
        JobHardware,
    },
    scheduler::{
        JobScheduler,
        ReleaseOutcome,
        SubmitOutcome,
    },
    tick::Tick,
    types::{
        AtomRef,
        SlotNr,
    },
    watchdog::SlotTimeout,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::std::sync::Arc;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Request for the scheduling worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkItem {
    /// Promote contexts from the policy queue while address spaces are free.
    ScheduleHead,
    /// Fill a job slot outside interrupt context.
    RetrySlot(SlotNr),
    /// Finish an atom retired by the interrupt handler.
    CompleteJob(AtomRef),
    /// Look for hung job slots as of the given tick.
    Watchdog(Tick),
    Shutdown,
}

/// Work done by a [Worker].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WorkerStats {
    pub promoted: usize,
    pub submitted: usize,
    pub completed: usize,
    pub evicted: usize,
    pub timeouts: usize,
}

pub struct Worker<H: JobHardware, M: AddressSpaceManager> {
    scheduler: Arc<JobScheduler<H, M>>,
    rx: Receiver<WorkItem>,
    /// Where hung slots are reported. They are only logged otherwise.
    timeouts: Option<Sender<SlotTimeout>>,
    stats: WorkerStats,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<H: JobHardware, M: AddressSpaceManager> Worker<H, M> {
    pub fn new(scheduler: Arc<JobScheduler<H, M>>, rx: Receiver<WorkItem>) -> Self {
        Self {
            scheduler,
            rx,
            timeouts: None,
            stats: WorkerStats::default(),
        }
    }

    /// Forwards watchdog reports to `tx`.
    pub fn with_timeout_reports(mut self, tx: Sender<SlotTimeout>) -> Self {
        self.timeouts = Some(tx);
        self
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Serves requests until [WorkItem::Shutdown] arrives or every sender is gone.
    pub fn run(mut self) -> WorkerStats {
        while let Ok(item) = self.rx.recv() {
            if !self.handle(item) {
                break;
            }
        }
        debug!("run(): worker exiting ({:?})", self.stats);
        self.stats
    }

    /// Serves every request already posted, without blocking. Returns false if one of them was a shutdown.
    pub fn drain(&mut self) -> bool {
        while let Ok(item) = self.rx.try_recv() {
            if !self.handle(item) {
                return false;
            }
        }
        true
    }

    /// Serves one request. Returns false on shutdown.
    pub fn handle(&mut self, item: WorkItem) -> bool {
        trace!("handle(): {:?}", item);
        match item {
            WorkItem::ScheduleHead => {
                while self.scheduler.try_schedule_head().is_some() {
                    self.stats.promoted += 1;
                }
            },
            WorkItem::RetrySlot(slot) => {
                if let SubmitOutcome::Submitted(n) = self.scheduler.retry_slot(slot) {
                    self.stats.submitted += n;
                }
            },
            WorkItem::CompleteJob(atom) => {
                self.stats.completed += 1;
                if let ReleaseOutcome::Evicted { .. } = self.scheduler.complete_job(atom) {
                    self.stats.evicted += 1;
                }
            },
            WorkItem::Watchdog(now) => {
                for report in self.scheduler.watchdog_check(now) {
                    self.stats.timeouts += 1;
                    if let Some(tx) = self.timeouts.as_ref() {
                        if let Err(e) = tx.send(report) {
                            warn!("handle(): dropping watchdog report ({:?})", e);
                        }
                    }
                }
            },
            WorkItem::Shutdown => return false,
        }
        true
    }
}
