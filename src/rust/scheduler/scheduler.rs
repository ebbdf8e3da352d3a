// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Device-wide job scheduler state.
//!
//! [JobScheduler] owns the policy queue, the run pool, and the job slots, and performs every transition between them.
//! It is driven from three kinds of callers: the interrupt handler ([JobScheduler::job_done_irq]), a scheduling worker
//! ([JobScheduler::try_schedule_head], [JobScheduler::try_submit_deferred], [JobScheduler::complete_job]), and
//! ordinary threads on the submission path ([JobScheduler::add_job], [JobScheduler::remove_job]).
//!
//! Locks are always taken in the following order, outermost first:
//!
//! 1. context lock ([SchedContext::lock]).
//! 2. queue lock.
//! 3. run-pool mutex ([JobScheduler::lock_runpool]).
//! 4. address-space transaction lock.
//! 5. job-slot lock ([JobScheduler::lock_slot]).
//! 6. run-pool interrupt-safe lock ([JobScheduler::lock_irq]).
//!
//! Only the last two are spinlocks, and only they are ever taken by the interrupt handler.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::fail::Fail,
    scheduler::{
        atom::{
            AtomRecord,
            AtomState,
            JobAtom,
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
        jobslot::{
            JobSlot,
            SlotEntry,
        },
        policy::Policy,
        runpool::{
            CtxRunState,
            RunPoolIrq,
            RunPoolState,
        },
        tick::Tick,
        types::{
            AsNr,
            AtomId,
            AtomRef,
            ContextId,
            SlotNr,
        },
    },
};
use ::parking_lot::{
    Mutex,
    MutexGuard,
};
use ::std::sync::atomic::{
    AtomicBool,
    AtomicUsize,
    Ordering,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Result of registering an atom.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddJobResult {
    pub atom: AtomRef,
    /// The context entered the policy queue. The caller should have the worker run
    /// [JobScheduler::try_schedule_head].
    pub policy_queue_changed: bool,
}

/// Result of an attempt to fill a job slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// Nothing was submitted, and nothing needs to happen.
    Idle,
    /// This many atoms were submitted and the slot has no room left or, outside interrupt context, no work is left.
    Submitted(usize),
    /// The slot has room the interrupt handler could not fill. A worker must retry outside interrupt context.
    RetryDeferred,
}

/// Result of dropping a busy reference on a context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReleaseOutcome {
    /// The context stays in the run pool.
    Retained,
    /// The context left the run pool.
    Evicted {
        as_nr: AsNr,
        /// The context went back to the policy queue because it still has queued atoms.
        requeued: bool,
        /// Queued atoms failed because the context is dying. The caller must still remove them.
        discarded: Vec<AtomRef>,
    },
}

/// Snapshot of a context's scheduling record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContextStatus {
    pub nr_jobs: usize,
    pub nr_pending: usize,
    pub nr_running: usize,
    pub as_nr: Option<AsNr>,
    pub busy_refcount: u32,
    pub submit_allowed: bool,
    pub in_policy_queue: bool,
    pub is_dying: bool,
    pub runtime_us: u64,
    pub slice_used_us: u64,
}

/// Snapshot of a job slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotStatus {
    /// In-flight atoms, HEAD first.
    pub atoms: Vec<AtomRef>,
    pub faulted: bool,
}

/// Proof that the run-pool mutex is held.
pub struct RunPoolGuard<'a>(MutexGuard<'a, RunPoolState>);

/// Proof that the run-pool interrupt-safe lock is held.
pub struct RunPoolIrqGuard<'a>(spin::MutexGuard<'a, RunPoolIrq>);

/// Proof that the lock of a job slot is held.
pub struct JobSlotGuard<'a> {
    slot: SlotNr,
    state: spin::MutexGuard<'a, JobSlot>,
}

/// Marks the body of one GPU job interrupt. Obtained from [JobScheduler::enter_irq].
///
/// A scope covers a single interrupt: the per-slot submission budget it starts with is shared by every
/// [JobScheduler::job_done_irq] made under it, and is restored when the scope is dropped. Drop it before the handler
/// returns, with no job-slot lock held.
pub struct IrqScope<'a> {
    slots: &'a [spin::Mutex<JobSlot>],
}

/// Job scheduler.
pub struct JobScheduler<H: JobHardware, M: AddressSpaceManager> {
    pub(super) config: SchedulerConfig,
    pub(super) hw: H,
    mmu: M,
    /// Queue lock.
    queue: Mutex<Box<dyn Policy>>,
    /// Length of the policy queue, readable from interrupt context. Written with the queue lock held.
    nr_queued: AtomicUsize,
    /// Run-pool mutex.
    runpool: Mutex<RunPoolState>,
    /// Address-space transaction locks, one per address space.
    as_txn: Vec<Mutex<()>>,
    /// Job-slot locks, one per slot.
    slots: Vec<spin::Mutex<JobSlot>>,
    /// Run-pool interrupt-safe lock.
    irq: spin::Mutex<RunPoolIrq>,
    halted: AtomicBool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<'a> JobSlotGuard<'a> {
    pub fn slot(&self) -> SlotNr {
        self.slot
    }

    pub(super) fn state(&mut self) -> &mut JobSlot {
        &mut self.state
    }
}

impl<'a> RunPoolIrqGuard<'a> {
    pub(super) fn state(&mut self) -> &mut RunPoolIrq {
        &mut self.0
    }
}

impl Drop for IrqScope<'_> {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            slot.lock().reset_irq_budget();
        }
    }
}

impl ContextStatus {
    pub fn is_scheduled(&self) -> bool {
        self.as_nr.is_some()
    }
}

impl<H: JobHardware, M: AddressSpaceManager> JobScheduler<H, M> {
    /// Brings up the scheduler with every address space free and every job slot empty.
    pub fn new(config: SchedulerConfig, hw: H, mmu: M) -> Self {
        let nr_address_spaces: usize = config.get_nr_address_spaces();
        let nr_job_slots: usize = config.get_nr_job_slots();
        info!(
            "new(): nr_address_spaces={}, nr_job_slots={}, policy={}",
            nr_address_spaces,
            nr_job_slots,
            config.get_policy()
        );
        Self {
            queue: Mutex::new(config.get_policy().build()),
            nr_queued: AtomicUsize::new(0),
            runpool: Mutex::new(RunPoolState::new(nr_address_spaces)),
            as_txn: (0..nr_address_spaces).map(|_| Mutex::new(())).collect(),
            slots: (0..nr_job_slots).map(|_| spin::Mutex::new(JobSlot::default())).collect(),
            irq: spin::Mutex::new(RunPoolIrq::new(nr_address_spaces)),
            halted: AtomicBool::new(false),
            config,
            hw,
            mmu,
        }
    }

    /// Tears the scheduler down. Every context must have been unregistered.
    ///
    /// [JobScheduler::new] cannot fail: configuration errors surface earlier, from [SchedulerConfig]. A failed bring-up
    /// therefore leaves no scheduler behind, and `term` only ever sees a fully built one.
    pub fn term(self) {
        let nr_contexts: usize = self.irq.lock().nr_contexts();
        assert_eq!(nr_contexts, 0, "scheduler terminated with {} contexts registered", nr_contexts);
        info!("term(): scheduler terminated");
    }

    /// Stops admitting contexts into the run pool. Resident contexts keep draining.
    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            info!("halt(): no further contexts will be scheduled");
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    /// Number of contexts waiting in the policy queue.
    pub fn nr_queued(&self) -> usize {
        self.nr_queued.load(Ordering::Acquire)
    }

    /// Number of free address spaces.
    pub fn nr_free_address_spaces(&self) -> usize {
        self.runpool.lock().nr_free()
    }

    /// Job slots of the hardware, in index order.
    pub fn slot_numbers(&self) -> impl Iterator<Item = SlotNr> {
        (0..self.config.get_nr_job_slots()).filter_map(SlotNr::new)
    }

    //==================================================================================================================
    // Locks
    //==================================================================================================================

    pub fn lock_runpool(&self) -> RunPoolGuard<'_> {
        RunPoolGuard(self.runpool.lock())
    }

    pub fn lock_slot(&self, slot: SlotNr) -> JobSlotGuard<'_> {
        match self.slots.get(slot.index()) {
            Some(state) => JobSlotGuard {
                slot,
                state: state.lock(),
            },
            None => panic!("{} does not exist ({} job slots)", slot, self.slots.len()),
        }
    }

    pub fn lock_irq(&self) -> RunPoolIrqGuard<'_> {
        RunPoolIrqGuard(self.irq.lock())
    }

    //==================================================================================================================
    // Contexts
    //==================================================================================================================

    /// Registers a context. Contexts with a larger `priority` are promoted first under the priority policy.
    pub fn context_init(&self, priority: i32) -> Result<SchedContext, Fail> {
        if self.is_halted() {
            let cause: &str = "scheduler is halted";
            error!("context_init(): {}", cause);
            return Err(Fail::cancelled(cause));
        }
        let ctx: SchedContext = self
            .irq
            .lock()
            .insert_context(priority, self.config.get_nr_job_slots());
        debug!("context_init(): {} registered (priority={})", ctx.id(), priority);
        Ok(ctx)
    }

    /// Unregisters a context. It must have no atoms registered and must not be in the run pool.
    pub fn context_term(&self, ctx: SchedContext) {
        let id: ContextId = ctx.id();
        let mut guard: ContextGuard = ctx.lock();
        assert!(!guard.is_terminated, "{} terminated twice", id);
        assert_eq!(guard.nr_jobs, 0, "terminating {} with atoms still registered", id);
        {
            let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
            if queue.remove_ctx(id).is_some() {
                self.nr_queued.fetch_sub(1, Ordering::AcqRel);
            }
        }
        {
            let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
            assert!(
                !irq.context(id).is_scheduled(),
                "terminating {} while it is in the run pool",
                id
            );
            irq.remove_context(id);
        }
        guard.is_terminated = true;
        debug!("context_term(): {} unregistered", id);
    }

    /// Kills a context. Nothing more is admitted or drawn from it, and its queued atoms fail, either now or when it
    /// leaves the run pool. Returns the atoms that failed right away. These remain registered until removed.
    pub fn zap_context(&self, ctx: &SchedContext) -> Vec<AtomRef> {
        let id: ContextId = ctx.id();
        {
            let mut guard: ContextGuard = ctx.lock();
            if guard.is_dying {
                return Vec::new();
            }
            guard.is_dying = true;

            let resident: bool = self.irq.lock().context(id).is_scheduled();
            if !resident {
                let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
                if queue.remove_ctx(id).is_some() {
                    self.nr_queued.fetch_sub(1, Ordering::AcqRel);
                }
                drop(queue);
                let discarded: Vec<AtomRef> = self.irq.lock().context_mut(id).fail_pending();
                debug!("zap_context(): {} killed, {} atoms discarded", id, discarded.len());
                return discarded;
            }

            self.irq.lock().clear_submit_allowed(id);
            debug!("zap_context(): {} killed while resident", id);
        }

        // Pin and unpin the context so that it is evicted right away if nothing else holds it.
        if self.runpool_retain(id) {
            if let ReleaseOutcome::Evicted { discarded, .. } = self.runpool_release(ctx) {
                return discarded;
            }
        }
        Vec::new()
    }

    //==================================================================================================================
    // Atoms
    //==================================================================================================================

    /// Registers an atom. The caller holds the context lock and no other scheduler lock.
    ///
    /// An unscheduled context enters the policy queue with its first atom. For a scheduled context, the atom's slot
    /// is filled right away.
    pub fn add_job(&self, ctx: &mut ContextGuard<'_>, atom: JobAtom) -> Result<AddJobResult, Fail> {
        let id: ContextId = ctx.id();
        assert!(!ctx.is_terminated, "adding an atom to terminated {}", id);
        if atom.slot.index() >= self.config.get_nr_job_slots() {
            let cause: String = format!("{} does not exist", atom.slot);
            error!("add_job(): {}", cause);
            return Err(Fail::invalid(&cause));
        }
        if ctx.is_dying {
            let cause: String = format!("{} is dying", id);
            error!("add_job(): {}", cause);
            return Err(Fail::cancelled(&cause));
        }

        let (atom_ref, handle, resident): (AtomRef, SchedContext, bool) = {
            let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
            let state: &mut CtxRunState = irq.context_mut(id);
            let atom_id: AtomId = AtomId::from(state.atoms.insert(AtomRecord::new(&atom)));
            state.ready[atom.slot.index()].push_back(atom_id);
            state.nr_pending += 1;
            if atom.class.is_nss() {
                state.nr_nss += 1;
            }
            let resident: bool = state.is_scheduled();
            let handle: SchedContext = state.handle.clone();
            if resident && atom.class.is_nss() {
                irq.nss_added(1);
            }
            (AtomRef::new(id, atom_id), handle, resident)
        };
        ctx.nr_jobs += 1;
        trace!("add_job(): {} queued on {}", atom_ref, atom.slot);

        if resident {
            let runpool: RunPoolGuard = self.lock_runpool();
            self.try_submit_deferred(&runpool, atom.slot);
            return Ok(AddJobResult {
                atom: atom_ref,
                policy_queue_changed: false,
            });
        }

        let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
        let policy_queue_changed: bool = !queue.contains(id);
        if policy_queue_changed {
            queue.enqueue_ctx(handle);
            self.nr_queued.fetch_add(1, Ordering::AcqRel);
            debug!("add_job(): {} entered the policy queue", id);
        }
        Ok(AddJobResult {
            atom: atom_ref,
            policy_queue_changed,
        })
    }

    /// Unregisters an atom that no job slot references. The caller holds the context lock and no other scheduler
    /// lock. Returns true if the run pool left not-soft-stoppable state, in which case every slot was retried. Queued
    /// contexts held back by that state may now be promoted: the caller should have the worker run
    /// [JobScheduler::try_schedule_head].
    pub fn remove_job(&self, ctx: &mut ContextGuard<'_>, atom: AtomRef) -> bool {
        let id: ContextId = ctx.id();
        assert_eq!(atom.ctx, id, "removing {} under the lock of {}", atom, id);

        let (left_nss, resident, nr_pending): (bool, bool, usize) = {
            let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
            let state: &mut CtxRunState = irq.context_mut(id);
            let (atom_state, slot): (AtomState, SlotNr) = {
                let record: &AtomRecord = state.atom(atom.atom);
                (record.state, record.slot)
            };
            match atom_state {
                AtomState::InSlot => panic!("removing {} while a job slot still references it", atom),
                AtomState::Queued => {
                    state.ready[slot.index()].retain(|queued| *queued != atom.atom);
                    state.nr_pending -= 1;
                },
                AtomState::Done | AtomState::Failed => {},
            }
            let record: AtomRecord = state.atoms.remove(usize::from(atom.atom));
            let nss: bool = record.class.is_nss();
            if nss {
                state.nr_nss -= 1;
            }
            let resident: bool = state.is_scheduled();
            let nr_pending: usize = state.nr_pending;
            let left_nss: bool = nss && resident && irq.nss_removed(1);
            (left_nss, resident, nr_pending)
        };
        ctx.nr_jobs -= 1;
        trace!("remove_job(): {} removed (resident={})", atom, resident);

        if left_nss {
            debug!("remove_job(): run pool left NSS state, retrying every slot");
            let runpool: RunPoolGuard = self.lock_runpool();
            self.retry_all_slots(&runpool);
        }

        if !resident && nr_pending == 0 {
            let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
            if queue.remove_ctx(id).is_some() {
                self.nr_queued.fetch_sub(1, Ordering::AcqRel);
                debug!("remove_job(): {} left the policy queue", id);
            }
        }

        left_nss
    }

    /// Finishes an atom the interrupt handler retired. Removes it, runs the deferred resubmission it was tagged with,
    /// and drops the busy reference it held on its context. Must not be called with any scheduler lock held.
    pub fn complete_job(&self, atom: AtomRef) -> ReleaseOutcome {
        let handle: SchedContext = self.irq.lock().context(atom.ctx).handle.clone();
        {
            let mut guard: ContextGuard = handle.lock();
            let (retry, holds_retain): (Option<SlotNr>, bool) = {
                let irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
                let record: &AtomRecord = irq.context(atom.ctx).atom(atom.atom);
                (record.retry_submit_on_slot, record.holds_retain)
            };
            assert!(holds_retain, "completing {} which never reached a job slot", atom);
            self.remove_job(&mut guard, atom);
            if let Some(slot) = retry {
                trace!("complete_job(): deferred resubmission on {}", slot);
                self.retry_slot(slot);
            }
        }
        self.runpool_release(&handle)
    }

    /// Current state of an atom, or None once it was removed.
    pub fn atom_status(&self, atom: AtomRef) -> Option<AtomState> {
        let irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
        irq.try_context(atom.ctx)
            .and_then(|state| state.atoms.get(usize::from(atom.atom)))
            .map(|record| record.state)
    }

    pub fn context_status(&self, ctx: &SchedContext) -> ContextStatus {
        let id: ContextId = ctx.id();
        let guard: ContextGuard = ctx.lock();
        let in_policy_queue: bool = self.queue.lock().contains(id);
        let irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
        let state: &CtxRunState = irq.context(id);
        ContextStatus {
            nr_jobs: guard.nr_jobs,
            nr_pending: state.nr_pending,
            nr_running: state.nr_running,
            as_nr: state.as_nr,
            busy_refcount: state.as_nr.map_or(0, |as_nr| irq.per_as(as_nr).busy_refcount),
            submit_allowed: state.is_scheduled() && irq.is_submit_allowed(id),
            in_policy_queue,
            is_dying: guard.is_dying,
            runtime_us: state.runtime_us,
            slice_used_us: state.slice_used_us,
        }
    }

    pub fn slot_status(&self, slot: SlotNr) -> Result<SlotStatus, Fail> {
        self.check_slot("slot_status", slot)?;
        let guard: JobSlotGuard = self.lock_slot(slot);
        Ok(SlotStatus {
            atoms: guard.state.atoms().collect(),
            faulted: guard.state.is_faulted(),
        })
    }

    pub(super) fn check_slot(&self, caller: &str, slot: SlotNr) -> Result<(), Fail> {
        if slot.index() < self.config.get_nr_job_slots() {
            return Ok(());
        }
        let cause: String = format!("{} does not exist", slot);
        error!("{}(): {}", caller, cause);
        Err(Fail::invalid(&cause))
    }

    //==================================================================================================================
    // Run Pool
    //==================================================================================================================

    /// Pins a context in the run pool. Returns false if it is not resident.
    pub fn runpool_retain(&self, id: ContextId) -> bool {
        self.irq.lock().retain(id)
    }

    /// Pins a context in the run pool with the interrupt-safe lock already held. Safe in interrupt context.
    pub fn runpool_retain_nolock(&self, irq: &mut RunPoolIrqGuard<'_>, id: ContextId) -> bool {
        irq.0.retain(id)
    }

    /// Returns the occupant of an address space, pinning it.
    pub fn runpool_lookup(&self, as_nr: AsNr) -> Option<ContextId> {
        let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
        let id: ContextId = irq.lookup(as_nr)?;
        let retained: bool = irq.retain(id);
        debug_assert!(retained);
        Some(id)
    }

    /// Returns the occupant of an address space without pinning it. The caller must already hold a busy reference
    /// on that occupant.
    pub fn runpool_lookup_noretain(&self, as_nr: AsNr) -> Option<ContextId> {
        let irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
        let id: ContextId = irq.lookup(as_nr)?;
        assert!(
            irq.per_as(as_nr).busy_refcount > 0,
            "lookup of {} in {} without a busy reference",
            id,
            as_nr
        );
        Some(id)
    }

    /// Drops a busy reference. At zero, a context that is dying, ran out of quota, or has no queued atom it could
    /// submit leaves the run pool, and the head of the policy queue is promoted in its place. May block: never call
    /// it from interrupt context or with any scheduler lock held.
    pub fn runpool_release(&self, ctx: &SchedContext) -> ReleaseOutcome {
        let id: ContextId = ctx.id();
        let outcome: ReleaseOutcome = {
            let guard: ContextGuard = ctx.lock();
            let runpool: RunPoolGuard = self.lock_runpool();
            let faulted: u16 = self.faulted_slots();
            let as_nr: AsNr = {
                let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
                let (as_nr, remaining): (AsNr, u32) = irq.release(id);
                if remaining > 0 {
                    return ReleaseOutcome::Retained;
                }
                let evict: bool = guard.is_dying || !irq.is_submit_allowed(id) || !irq.is_runnable(id, faulted);
                if !evict {
                    return ReleaseOutcome::Retained;
                }
                as_nr
            };
            self.evict(guard, runpool, ctx, as_nr)
        };
        self.try_schedule_head();
        outcome
    }

    /// Takes an idle context out of its address space and requeues it if work remains.
    fn evict(
        &self,
        guard: ContextGuard<'_>,
        mut runpool: RunPoolGuard<'_>,
        ctx: &SchedContext,
        as_nr: AsNr,
    ) -> ReleaseOutcome {
        let id: ContextId = ctx.id();
        let left_nss: bool = {
            let _txn: MutexGuard<()> = self.as_txn[as_nr.index()].lock();
            let (evicted, left_nss): (ContextId, bool) = self.irq.lock().unbind(as_nr);
            debug_assert_eq!(evicted, id);
            self.mmu.unbind(as_nr, id);
            runpool.0.free_as(as_nr);
            left_nss
        };

        let (discarded, nr_pending): (Vec<AtomRef>, usize) = {
            let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
            let state: &mut CtxRunState = irq.context_mut(id);
            let discarded: Vec<AtomRef> = if guard.is_dying {
                state.fail_pending()
            } else {
                Vec::new()
            };
            (discarded, state.nr_pending)
        };

        if left_nss {
            self.retry_all_slots(&runpool);
        }
        drop(runpool);

        let requeued: bool = !guard.is_dying && nr_pending > 0;
        if requeued {
            let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
            if !queue.contains(id) {
                queue.enqueue_ctx(ctx.clone());
                self.nr_queued.fetch_add(1, Ordering::AcqRel);
            }
        }
        debug!(
            "evict(): {} left {} (requeued={}, discarded={})",
            id,
            as_nr,
            requeued,
            discarded.len()
        );
        drop(guard);

        ReleaseOutcome::Evicted {
            as_nr,
            requeued,
            discarded,
        }
    }

    //==================================================================================================================
    // Policy Queue
    //==================================================================================================================

    /// Promotes the head of the policy queue into a free address space and fills the job slots from it. Returns the
    /// promoted context, or None if the queue is empty, the run pool is full, or the scheduler is halted. Must not be
    /// called with any scheduler lock held.
    ///
    /// Contexts with no atom they could submit, because the run pool is in NSS state or their slots are faulted,
    /// keep their place in the queue and the next one is tried.
    pub fn try_schedule_head(&self) -> Option<ContextId> {
        let mut stalled: Vec<SchedContext> = Vec::new();
        let promoted: Option<ContextId> = self.promote_head(&mut stalled);
        if !stalled.is_empty() {
            let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
            for ctx in stalled.into_iter().rev() {
                if !queue.contains(ctx.id()) {
                    queue.requeue_head_ctx(ctx);
                    self.nr_queued.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
        promoted
    }

    fn promote_head(&self, stalled: &mut Vec<SchedContext>) -> Option<ContextId> {
        loop {
            if self.is_halted() {
                return None;
            }
            let head: SchedContext = {
                let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
                if !self.runpool.lock().has_free_as() {
                    return None;
                }
                let head: SchedContext = queue.dequeue_head_ctx()?;
                self.nr_queued.fetch_sub(1, Ordering::AcqRel);
                head
            };
            let id: ContextId = head.id();

            // The queue lock was dropped to take the context lock, so everything must be checked again.
            let guard: ContextGuard = head.lock();
            if guard.is_terminated || guard.is_dying {
                trace!("try_schedule_head(): skipping {}", id);
                continue;
            }
            let (schedulable, runnable): (bool, bool) = {
                let faulted: u16 = self.faulted_slots();
                let irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
                let state: &CtxRunState = irq.context(id);
                (!state.is_scheduled() && state.nr_pending > 0, irq.is_runnable(id, faulted))
            };
            if !schedulable {
                trace!("try_schedule_head(): {} has nothing to run", id);
                continue;
            }
            if !runnable {
                trace!("try_schedule_head(): {} cannot submit anything yet", id);
                drop(guard);
                stalled.push(head);
                continue;
            }
            {
                let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
                if queue.remove_ctx(id).is_some() {
                    self.nr_queued.fetch_sub(1, Ordering::AcqRel);
                }
            }

            let mut runpool: RunPoolGuard = self.lock_runpool();
            let Some(as_nr) = runpool.0.alloc_as() else {
                drop(runpool);
                let mut queue: MutexGuard<Box<dyn Policy>> = self.queue.lock();
                queue.requeue_head_ctx(head.clone());
                self.nr_queued.fetch_add(1, Ordering::AcqRel);
                return None;
            };
            {
                let _txn: MutexGuard<()> = self.as_txn[as_nr.index()].lock();
                self.mmu.bind(as_nr, id);
                let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
                irq.bind(as_nr, id);
                // Held until the slots are filled, so the context cannot leave before it ran anything.
                let retained: bool = irq.retain(id);
                debug_assert!(retained);
            }
            debug!("try_schedule_head(): {} scheduled in {}", id, as_nr);
            self.retry_all_slots(&runpool);
            drop(runpool);
            drop(guard);

            self.runpool_release(&head);
            return Some(id);
        }
    }

    //==================================================================================================================
    // Job Slots
    //==================================================================================================================

    /// Fills a job slot from the run pool, in interrupt context. Submits at most a fixed number of atoms per slot
    /// per interrupt.
    pub fn try_submit_irq(&self, slot: &mut JobSlotGuard<'_>, irq: &mut RunPoolIrqGuard<'_>) -> SubmitOutcome {
        self.submit_on_slot(slot, &mut irq.0, true)
    }

    /// Fills a job slot from the run pool, outside interrupt context.
    pub fn try_submit_deferred(&self, _runpool: &RunPoolGuard<'_>, slot: SlotNr) -> SubmitOutcome {
        let mut slot: JobSlotGuard = self.lock_slot(slot);
        let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();
        self.submit_on_slot(&mut slot, &mut irq, false)
    }

    /// Takes the run-pool mutex and fills a job slot.
    pub fn retry_slot(&self, slot: SlotNr) -> SubmitOutcome {
        let runpool: RunPoolGuard = self.lock_runpool();
        self.try_submit_deferred(&runpool, slot)
    }

    /// Bitmap of the job slots out of service. Takes every slot lock in turn, so the interrupt-safe lock must not be
    /// held.
    fn faulted_slots(&self) -> u16 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.lock().is_faulted())
            .fold(0, |faulted, (nr, _)| faulted | (1u16 << nr))
    }

    pub(super) fn retry_all_slots(&self, runpool: &RunPoolGuard<'_>) {
        for slot in self.slot_numbers() {
            self.try_submit_deferred(runpool, slot);
        }
    }

    fn submit_on_slot(&self, slot: &mut JobSlotGuard<'_>, irq: &mut RunPoolIrq, in_irq: bool) -> SubmitOutcome {
        let slot_nr: SlotNr = slot.slot;
        let slot: &mut JobSlot = &mut slot.state;
        if slot.is_faulted() || slot.is_full() {
            return SubmitOutcome::Idle;
        }

        let mut submitted: usize = 0;
        loop {
            if slot.is_full() {
                return SubmitOutcome::Submitted(submitted);
            }
            if in_irq && !slot.irq_budget_left() {
                return SubmitOutcome::RetryDeferred;
            }
            let Some((as_nr, atom)) = irq.pick_next(slot_nr, slot.last_as()) else {
                return match (in_irq, submitted) {
                    (true, _) => SubmitOutcome::RetryDeferred,
                    (false, 0) => SubmitOutcome::Idle,
                    (false, n) => SubmitOutcome::Submitted(n),
                };
            };

            let retained: bool = irq.retain(atom.ctx);
            debug_assert!(retained);
            let state: &mut CtxRunState = irq.context_mut(atom.ctx);
            state.ready[slot_nr.index()].pop_front();
            state.nr_pending -= 1;
            state.nr_running += 1;
            let record: &mut AtomRecord = state.atom_mut(atom.atom);
            record.state = AtomState::InSlot;
            record.holds_retain = true;
            record.retry_submit_on_slot = None;
            let jc: u64 = record.jc;

            let now: Tick = self.hw.now();
            slot.push(atom, as_nr, now);
            if in_irq {
                slot.charge_irq_budget();
            }
            self.hw.submit(slot_nr, atom, jc);
            submitted += 1;
            trace!("submit_on_slot(): {} on {} from {}", atom, slot_nr, as_nr);
        }
    }

    //==================================================================================================================
    // Interrupt Handler
    //==================================================================================================================

    /// Starts the body of a GPU job interrupt, resetting the per-interrupt submission budget of every slot.
    pub fn enter_irq(&self) -> IrqScope<'_> {
        for slot in self.slots.iter() {
            slot.lock().reset_irq_budget();
        }
        IrqScope { slots: &self.slots }
    }

    /// Handles the completion of the HEAD atom of `slot` at tick `end`.
    ///
    /// Charges the elapsed time to the owning context, stops drawing from it if it used up its time slice while other
    /// contexts wait, and refills the slot. If the slot could not be refilled here, the atom is tagged so that
    /// [JobScheduler::complete_job] retries outside interrupt context.
    pub fn job_done_irq(&self, _scope: &IrqScope<'_>, slot: SlotNr, atom: AtomRef, end: Tick) -> SubmitOutcome {
        let mut slot_guard: JobSlotGuard = self.lock_slot(slot);
        let mut irq: spin::MutexGuard<RunPoolIrq> = self.irq.lock();

        let entry: SlotEntry = match slot_guard.state.pop_head(end) {
            Some(entry) if entry.atom == atom => entry,
            head => panic!("completion of {} on {} but HEAD is {:?}", atom, slot, head.map(|e| e.atom)),
        };
        let elapsed_us: u64 = if end.is_after(entry.start) {
            self.config.get_tick_rate().ticks_to_us(end.wrapping_since(entry.start))
        } else {
            0
        };

        let others_waiting: bool = self.nr_queued.load(Ordering::Acquire) > 0;
        let timeslice_us: u64 = self.config.get_ctx_timeslice_us();
        let quota_exhausted: bool = {
            let state: &mut CtxRunState = irq.context_mut(atom.ctx);
            assert!(state.is_scheduled(), "{} completed while its context is not resident", atom);
            state.nr_running -= 1;
            state.atom_mut(atom.atom).state = AtomState::Done;
            state.runtime_us += elapsed_us;
            state.slice_used_us += elapsed_us;
            let exhausted: bool = state.slice_used_us >= timeslice_us;
            if exhausted && !others_waiting {
                state.slice_used_us = 0;
            }
            exhausted && others_waiting
        };
        if quota_exhausted && irq.is_submit_allowed(atom.ctx) {
            irq.clear_submit_allowed(atom.ctx);
            trace!("job_done_irq(): {} used up its time slice", atom.ctx);
        }

        let outcome: SubmitOutcome = self.submit_on_slot(&mut slot_guard, &mut irq, true);
        if outcome == SubmitOutcome::RetryDeferred {
            irq.context_mut(atom.ctx).atom_mut(atom.atom).retry_submit_on_slot = Some(slot);
        }
        trace!("job_done_irq(): {} done on {} ({:?})", atom, slot, outcome);
        outcome
    }
}
