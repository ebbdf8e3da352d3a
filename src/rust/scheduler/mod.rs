// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod atom;
mod config;
mod context;
pub mod hw;
mod jobslot;
pub mod policy;
mod runpool;
pub mod scheduler;
pub mod tick;
mod types;
mod watchdog;
pub mod worker;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    atom::{
        AtomState,
        JobAtom,
        JobClass,
    },
    config::SchedulerConfig,
    context::{
        ContextGuard,
        SchedContext,
    },
    hw::{
        AddressSpaceManager,
        JobHardware,
    },
    policy::PolicyKind,
    scheduler::{
        AddJobResult,
        ContextStatus,
        IrqScope,
        JobScheduler,
        JobSlotGuard,
        ReleaseOutcome,
        RunPoolGuard,
        RunPoolIrqGuard,
        SlotStatus,
        SubmitOutcome,
    },
    tick::{
        ticks_after,
        GpuClock,
        Tick,
        TickRate,
    },
    types::{
        AsNr,
        AtomId,
        AtomRef,
        ContextId,
        SlotNr,
    },
    watchdog::SlotTimeout,
    worker::{
        WorkItem,
        Worker,
        WorkerStats,
    },
};
