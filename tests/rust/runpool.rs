// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    add,
    check_residency,
    drain,
    remove_all,
    setup,
    slot,
    teardown,
};
use ::anyhow::Result;
use ::gpusched::{
    test_helpers::{
        address_space,
        TestBed,
    },
    AtomRef,
    AtomState,
    JobAtom,
    ReleaseOutcome,
    SchedContext,
    SubmitOutcome,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::collections::HashMap;

//======================================================================================================================
// Tests
//======================================================================================================================

/// Only resident contexts can be pinned.
#[test]
fn retain_fails_outside_the_run_pool() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    gpusched::ensure_eq!(bed.sched.runpool_retain(ctx.id()), false);

    let queued: AtomRef = add(&bed, &ctx, slot(0), 0x1)?;
    gpusched::ensure_eq!(bed.sched.runpool_retain(ctx.id()), false);

    remove_all(&bed, &ctx, &[queued]);
    teardown(bed, vec![ctx])
}

/// A busy reference keeps an idle context in its address space until it is dropped.
#[test]
fn retained_context_outlives_its_atoms() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    add(&bed, &ctx, slot(0), 0x1)?;
    bed.sched.try_schedule_head();
    gpusched::ensure_eq!(bed.sched.runpool_retain(ctx.id()), true);

    let (_, outcome): (AtomRef, ReleaseOutcome) = bed.run_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(outcome, ReleaseOutcome::Retained);
    let status = bed.sched.context_status(&ctx);
    gpusched::ensure_eq!(status.as_nr, Some(address_space(0)));
    gpusched::ensure_eq!(status.busy_refcount, 1);
    gpusched::ensure_eq!(status.nr_jobs, 0);

    gpusched::ensure_eq!(
        bed.sched.runpool_release(&ctx),
        ReleaseOutcome::Evicted {
            as_nr: address_space(0),
            requeued: false,
            discarded: Vec::new(),
        }
    );
    check_residency(&bed, &[ctx.clone()])?;
    teardown(bed, vec![ctx])
}

/// Lookups by address space find the occupant, and pin it unless told not to.
#[test]
fn lookup_by_address_space() -> Result<()> {
    let bed: TestBed = setup(2, 1);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    add(&bed, &ctx, slot(0), 0x1)?;
    bed.sched.try_schedule_head();
    gpusched::ensure_eq!(bed.sched.runpool_lookup(address_space(1)), None);

    gpusched::ensure_eq!(bed.sched.runpool_lookup(address_space(0)), Some(ctx.id()));
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).busy_refcount, 2);
    gpusched::ensure_eq!(bed.sched.runpool_lookup_noretain(address_space(0)), Some(ctx.id()));
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).busy_refcount, 2);

    {
        let mut irq = bed.sched.lock_irq();
        gpusched::ensure_eq!(bed.sched.runpool_retain_nolock(&mut irq, ctx.id()), true);
    }
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).busy_refcount, 3);

    gpusched::ensure_eq!(bed.sched.runpool_release(&ctx), ReleaseOutcome::Retained);
    gpusched::ensure_eq!(bed.sched.runpool_release(&ctx), ReleaseOutcome::Retained);
    drain(&bed)?;
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).is_scheduled(), false);
    teardown(bed, vec![ctx])
}

#[test]
#[should_panic(expected = "without a busy reference")]
fn lookup_without_a_busy_reference_panics() {
    let bed: TestBed = setup(2, 1);
    let (Ok(busy), Ok(idle)) = (bed.sched.context_init(0), bed.sched.context_init(0)) else {
        return;
    };
    let _ = add(&bed, &busy, slot(0), 0x1);
    let _ = add(&bed, &busy, slot(0), 0x2);
    bed.sched.try_schedule_head();
    // The slot is full, so the second context is resident with nothing pinning it.
    let _ = add(&bed, &idle, slot(0), 0x3);
    bed.sched.try_schedule_head();
    bed.sched.runpool_lookup_noretain(address_space(1));
}

/// Filling a slot that is full, or that has nothing eligible, changes nothing however often it is tried.
#[test]
fn slot_filling_is_idempotent() -> Result<()> {
    let bed: TestBed = setup(1, 2);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    for jc in 0..3u64 {
        add(&bed, &ctx, slot(0), jc)?;
    }
    bed.sched.try_schedule_head();
    let nr_submitted: usize = bed.gpu.nr_submitted();
    let before = bed.sched.slot_status(slot(0))?;

    for _ in 0..3 {
        let runpool = bed.sched.lock_runpool();
        gpusched::ensure_eq!(bed.sched.try_submit_deferred(&runpool, slot(0)), SubmitOutcome::Idle);
        gpusched::ensure_eq!(bed.sched.try_submit_deferred(&runpool, slot(1)), SubmitOutcome::Idle);
    }
    for _ in 0..3 {
        let mut job_slot = bed.sched.lock_slot(slot(1));
        let mut irq = bed.sched.lock_irq();
        gpusched::ensure_eq!(job_slot.slot(), slot(1));
        gpusched::ensure_eq!(bed.sched.try_submit_irq(&mut job_slot, &mut irq), SubmitOutcome::RetryDeferred);
    }
    gpusched::ensure_eq!(bed.sched.retry_slot(slot(0)), SubmitOutcome::Idle);

    gpusched::ensure_eq!(bed.gpu.nr_submitted(), nr_submitted);
    gpusched::ensure_eq!(bed.sched.slot_status(slot(0))?, before);
    gpusched::ensure_eq!(bed.sched.slot_status(slot(1))?.atoms.len(), 0);
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).nr_pending, 1);

    drain(&bed)?;
    teardown(bed, vec![ctx])
}

/// Killing a context that is not resident fails its atoms at once and takes it out of the queue.
#[test]
fn zap_queued_context() -> Result<()> {
    let bed: TestBed = setup(1, 2);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    let first: AtomRef = add(&bed, &ctx, slot(0), 0x1)?;
    let second: AtomRef = add(&bed, &ctx, slot(1), 0x2)?;

    let mut discarded: Vec<AtomRef> = bed.sched.zap_context(&ctx);
    discarded.sort_by_key(|atom| atom.atom);
    gpusched::ensure_eq!(discarded, vec![first, second]);
    gpusched::ensure_eq!(bed.sched.atom_status(first), Some(AtomState::Failed));
    let status = bed.sched.context_status(&ctx);
    gpusched::ensure_eq!(status.is_dying, true);
    gpusched::ensure_eq!(status.in_policy_queue, false);
    gpusched::ensure_eq!(status.nr_pending, 0);
    gpusched::ensure_eq!(bed.sched.nr_queued(), 0);

    match bed.sched.add_job(&mut ctx.lock(), JobAtom::standard(0x3, slot(0))) {
        Ok(_) => anyhow::bail!("add_job() accepted an atom for a dying context"),
        Err(e) => gpusched::ensure_eq!(e.errno, libc::ECANCELED),
    }
    gpusched::ensure_eq!(bed.sched.zap_context(&ctx).len(), 0);

    remove_all(&bed, &ctx, &discarded);
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).nr_jobs, 0);
    teardown(bed, vec![ctx])
}

/// Killing a busy resident context lets its in-flight atoms finish, draws nothing more from it, and fails the rest
/// when it leaves.
#[test]
fn zap_resident_context() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    add(&bed, &ctx, slot(0), 0x1)?;
    add(&bed, &ctx, slot(0), 0x2)?;
    let third: AtomRef = add(&bed, &ctx, slot(0), 0x3)?;
    bed.sched.try_schedule_head();

    gpusched::ensure_eq!(bed.sched.zap_context(&ctx).len(), 0);
    let status = bed.sched.context_status(&ctx);
    gpusched::ensure_eq!(status.is_scheduled(), true);
    gpusched::ensure_eq!(status.submit_allowed, false);
    gpusched::ensure_eq!(status.is_dying, true);

    let (_, outcome): (AtomRef, ReleaseOutcome) = bed.run_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(outcome, ReleaseOutcome::Retained);
    gpusched::ensure_eq!(bed.sched.atom_status(third), Some(AtomState::Queued));
    gpusched::ensure_eq!(bed.gpu.head(slot(0)).is_some(), true);

    let (_, outcome): (AtomRef, ReleaseOutcome) = bed.run_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(
        outcome,
        ReleaseOutcome::Evicted {
            as_nr: address_space(0),
            requeued: false,
            discarded: vec![third],
        }
    );
    gpusched::ensure_eq!(bed.sched.atom_status(third), Some(AtomState::Failed));
    gpusched::ensure_eq!(bed.gpu.nr_submitted(), 2);

    remove_all(&bed, &ctx, &[third]);
    check_residency(&bed, &[ctx.clone()])?;
    teardown(bed, vec![ctx])
}

/// Killing a resident context that nothing pins evicts it right away.
#[test]
fn zap_idle_resident_context() -> Result<()> {
    let bed: TestBed = setup(2, 1);
    let busy: SchedContext = bed.sched.context_init(0)?;
    add(&bed, &busy, slot(0), 0x1)?;
    add(&bed, &busy, slot(0), 0x2)?;
    bed.sched.try_schedule_head();

    // The slot is full, so the second context gets in but has nothing running.
    let idle: SchedContext = bed.sched.context_init(0)?;
    let stuck: AtomRef = add(&bed, &idle, slot(0), 0x3)?;
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(idle.id()));
    gpusched::ensure_eq!(bed.sched.context_status(&idle).busy_refcount, 0);

    gpusched::ensure_eq!(bed.sched.zap_context(&idle), vec![stuck]);
    gpusched::ensure_eq!(bed.sched.context_status(&idle).is_scheduled(), false);
    gpusched::ensure_eq!(bed.mmu.bound(address_space(1)), None);

    remove_all(&bed, &idle, &[stuck]);
    drain(&bed)?;
    teardown(bed, vec![busy, idle])
}

/// Random traffic from several contexts never breaks the bookkeeping of the run pool.
#[test]
fn random_traffic_keeps_the_run_pool_consistent() -> Result<()> {
    const NR_CONTEXTS: usize = 5;
    const NR_STEPS: usize = 2000;

    let bed: TestBed = setup(2, 3);
    let mut rng: SmallRng = SmallRng::seed_from_u64(0x5eed);
    let contexts: Vec<SchedContext> = (0..NR_CONTEXTS)
        .map(|i| bed.sched.context_init(i as i32))
        .collect::<Result<Vec<SchedContext>, _>>()?;
    let mut registered: HashMap<usize, usize> = HashMap::new();

    for step in 0..NR_STEPS {
        match rng.gen_range(0..4) {
            0 | 1 => {
                let i: usize = rng.gen_range(0..NR_CONTEXTS);
                let target = slot(rng.gen_range(0..3));
                let result = bed
                    .sched
                    .add_job(&mut contexts[i].lock(), JobAtom::standard(step as u64, target))?;
                *registered.entry(i).or_default() += 1;
                if result.policy_queue_changed {
                    bed.sched.try_schedule_head();
                }
            },
            2 => {
                bed.gpu.advance(rng.gen_range(0..20));
                if let Some((atom, _)) = bed.run_head(slot(rng.gen_range(0..3))) {
                    let i: usize = contexts
                        .iter()
                        .position(|ctx| ctx.id() == atom.ctx)
                        .ok_or(anyhow::anyhow!("unknown context"))?;
                    *registered.entry(i).or_default() -= 1;
                }
            },
            _ => {
                bed.sched.try_schedule_head();
            },
        }
        check_residency(&bed, &contexts)?;
        for (i, ctx) in contexts.iter().enumerate() {
            let status = bed.sched.context_status(ctx);
            gpusched::ensure_eq!(status.nr_jobs, registered.get(&i).copied().unwrap_or(0));
            gpusched::ensure_eq!(status.nr_jobs, status.nr_pending + status.nr_running);
        }
    }

    // Drain everything, promoting whatever is still queued.
    loop {
        bed.sched.try_schedule_head();
        if drain(&bed)? == 0 && bed.sched.nr_queued() == 0 {
            break;
        }
    }
    for ctx in contexts.iter() {
        let status = bed.sched.context_status(ctx);
        gpusched::ensure_eq!(status.nr_jobs, 0);
        gpusched::ensure_eq!(status.is_scheduled(), false);
    }
    teardown(bed, contexts)
}
