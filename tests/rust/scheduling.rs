// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    add,
    add_nss,
    check_residency,
    drain,
    remove_all,
    setup,
    setup_with,
    slot,
    teardown,
};
use ::anyhow::Result;
use ::gpusched::{
    scheduler::TickRate,
    test_helpers::{
        address_space,
        MmuEvent,
        TestBed,
    },
    AddJobResult,
    AtomRef,
    AtomState,
    Config,
    JobAtom,
    PolicyKind,
    ReleaseOutcome,
    SchedContext,
    SchedulerConfig,
    SubmitOutcome,
    Tick,
};

//======================================================================================================================
// Tests
//======================================================================================================================

/// The first atom puts the context in the policy queue, and promotion places it on the hardware.
#[test]
fn first_atom_queues_the_context_and_promotion_submits_it() -> Result<()> {
    let bed: TestBed = setup(2, 2);
    let ctx: SchedContext = bed.sched.context_init(0)?;

    let result: AddJobResult = bed.sched.add_job(&mut ctx.lock(), JobAtom::standard(0x1000, slot(0)))?;
    gpusched::ensure_eq!(result.policy_queue_changed, true);
    gpusched::ensure_eq!(bed.sched.nr_queued(), 1);
    gpusched::ensure_eq!(bed.gpu.nr_submitted(), 0);

    // A second atom does not change the queue.
    let second: AtomRef = add(&bed, &ctx, slot(1), 0x2000)?;
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).in_policy_queue, true);
    gpusched::ensure_eq!(bed.sched.nr_queued(), 1);

    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(ctx.id()));
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![result.atom]);
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(1)), vec![second]);
    gpusched::ensure_eq!(bed.sched.atom_status(result.atom), Some(AtomState::InSlot));

    let status = bed.sched.context_status(&ctx);
    gpusched::ensure_eq!(status.as_nr, Some(address_space(0)));
    gpusched::ensure_eq!(status.in_policy_queue, false);
    gpusched::ensure_eq!(status.nr_pending, 0);
    gpusched::ensure_eq!(status.nr_running, 2);
    gpusched::ensure_eq!(status.busy_refcount, 2);
    gpusched::ensure_eq!(bed.mmu.events(), vec![MmuEvent::Bind(address_space(0), ctx.id())]);
    check_residency(&bed, &[ctx.clone()])?;

    let submissions = bed.gpu.submissions();
    gpusched::ensure_eq!(submissions[0].jc, 0x1000);
    gpusched::ensure_eq!(submissions[1].jc, 0x2000);

    // The last completion leaves the context with nothing to run.
    let (_, outcome): (AtomRef, ReleaseOutcome) = bed.run_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(outcome, ReleaseOutcome::Retained);
    let (_, outcome): (AtomRef, ReleaseOutcome) = bed.run_head(slot(1)).ok_or(anyhow::anyhow!("slot 1 is idle"))?;
    gpusched::ensure_eq!(
        outcome,
        ReleaseOutcome::Evicted {
            as_nr: address_space(0),
            requeued: false,
            discarded: Vec::new(),
        }
    );
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).is_scheduled(), false);
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).nr_jobs, 0);
    check_residency(&bed, &[ctx.clone()])?;

    teardown(bed, vec![ctx])
}

/// Atoms of a resident context go straight to the hardware, up to the depth of the slot.
#[test]
fn resident_context_fills_its_slot_directly() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let ctx: SchedContext = bed.sched.context_init(0)?;

    let first: AtomRef = add(&bed, &ctx, slot(0), 0x1)?;
    bed.sched.try_schedule_head();

    let result: AddJobResult = bed.sched.add_job(&mut ctx.lock(), JobAtom::standard(0x2, slot(0)))?;
    gpusched::ensure_eq!(result.policy_queue_changed, false);
    let third: AtomRef = add(&bed, &ctx, slot(0), 0x3)?;
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![first, result.atom]);
    gpusched::ensure_eq!(bed.sched.atom_status(third), Some(AtomState::Queued));
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).nr_pending, 1);

    // Retiring HEAD makes room for the queued atom.
    let (retired, outcome): (AtomRef, SubmitOutcome) =
        bed.retire_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(retired, first);
    gpusched::ensure_eq!(outcome, SubmitOutcome::Submitted(1));
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![result.atom, third]);
    gpusched::ensure_eq!(bed.sched.atom_status(first), Some(AtomState::Done));
    gpusched::ensure_eq!(bed.sched.complete_job(first), ReleaseOutcome::Retained);
    gpusched::ensure_eq!(bed.sched.atom_status(first), None);

    gpusched::ensure_eq!(drain(&bed)?, 2);
    teardown(bed, vec![ctx])
}

/// Atoms of one context reach a slot in the order they were registered.
#[test]
fn submission_order_is_kept_per_slot() -> Result<()> {
    let bed: TestBed = setup(1, 2);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    for jc in 0..6u64 {
        add(&bed, &ctx, slot((jc % 2) as usize), jc)?;
    }
    bed.sched.try_schedule_head();
    gpusched::ensure_eq!(drain(&bed)?, 6);

    let order: Vec<u64> = bed
        .gpu
        .submissions()
        .iter()
        .filter(|submission| submission.slot == slot(0))
        .map(|submission| submission.jc)
        .collect();
    gpusched::ensure_eq!(order, vec![0, 2, 4]);
    teardown(bed, vec![ctx])
}

/// When one address space is left, the context that does not get it keeps its place and its atoms.
#[test]
fn contexts_contend_for_the_last_address_space() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let first: SchedContext = bed.sched.context_init(0)?;
    let second: SchedContext = bed.sched.context_init(0)?;
    add(&bed, &first, slot(0), 0x1)?;
    let waiting: AtomRef = add(&bed, &second, slot(0), 0x2)?;

    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(first.id()));
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), None);

    let status = bed.sched.context_status(&second);
    gpusched::ensure_eq!(status.is_scheduled(), false);
    gpusched::ensure_eq!(status.in_policy_queue, true);
    gpusched::ensure_eq!(status.nr_jobs, 1);
    gpusched::ensure_eq!(status.nr_pending, 1);
    gpusched::ensure_eq!(bed.sched.atom_status(waiting), Some(AtomState::Queued));
    check_residency(&bed, &[first.clone(), second.clone()])?;

    // Evicting the first context promotes the second one.
    let (_, outcome): (AtomRef, ReleaseOutcome) = bed.run_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(matches!(outcome, ReleaseOutcome::Evicted { requeued: false, .. }), true);
    gpusched::ensure_eq!(bed.sched.context_status(&second).as_nr, Some(address_space(0)));
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![waiting]);
    gpusched::ensure_eq!(
        bed.mmu.events(),
        vec![
            MmuEvent::Bind(address_space(0), first.id()),
            MmuEvent::Unbind(address_space(0), first.id()),
            MmuEvent::Bind(address_space(0), second.id()),
        ]
    );

    drain(&bed)?;
    teardown(bed, vec![first, second])
}

/// Jobs from contexts in different address spaces share a slot round-robin.
#[test]
fn resident_contexts_share_a_slot_round_robin() -> Result<()> {
    let bed: TestBed = setup(2, 1);
    let first: SchedContext = bed.sched.context_init(0)?;
    let second: SchedContext = bed.sched.context_init(0)?;
    for jc in 0..3u64 {
        add(&bed, &first, slot(0), 0x100 + jc)?;
    }
    for jc in 0..3u64 {
        add(&bed, &second, slot(0), 0x200 + jc)?;
    }
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(first.id()));
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(second.id()));
    drain(&bed)?;

    let order: Vec<u64> = bed.gpu.submissions().iter().map(|submission| submission.jc).collect();
    gpusched::ensure_eq!(order, vec![0x100, 0x101, 0x200, 0x102, 0x201, 0x202]);
    teardown(bed, vec![first, second])
}

/// A context that used up its time slice while another one waits stops being drawn from, and is swapped out once
/// idle.
#[test]
fn exhausted_quota_swaps_the_context_out() -> Result<()> {
    // One tick is one millisecond, so a job running for two ticks exceeds the slice.
    let config: SchedulerConfig = SchedulerConfig::default()
        .set_nr_address_spaces(1)
        .set_nr_job_slots(1)
        .set_tick_rate(TickRate::new(1000)?)
        .set_ctx_timeslice_us(1000);
    let bed: TestBed = setup_with(config);
    let hog: SchedContext = bed.sched.context_init(0)?;
    let other: SchedContext = bed.sched.context_init(0)?;
    let a1: AtomRef = add(&bed, &hog, slot(0), 0x1)?;
    let a2: AtomRef = add(&bed, &hog, slot(0), 0x2)?;
    let a3: AtomRef = add(&bed, &hog, slot(0), 0x3)?;
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(hog.id()));
    let b1: AtomRef = add(&bed, &other, slot(0), 0x4)?;
    gpusched::ensure_eq!(bed.sched.nr_queued(), 1);

    bed.gpu.advance(2);
    let (retired, outcome): (AtomRef, SubmitOutcome) =
        bed.retire_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(retired, a1);
    gpusched::ensure_eq!(outcome, SubmitOutcome::RetryDeferred);
    let status = bed.sched.context_status(&hog);
    gpusched::ensure_eq!(status.submit_allowed, false);
    gpusched::ensure_eq!(status.runtime_us, 2000);
    gpusched::ensure_eq!(bed.sched.atom_status(a3), Some(AtomState::Queued));

    // Nothing more is drawn from the context, not even on the deferred retry.
    gpusched::ensure_eq!(bed.sched.complete_job(a1), ReleaseOutcome::Retained);
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![a2]);

    let (retired, _): (AtomRef, SubmitOutcome) = bed.retire_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(retired, a2);
    gpusched::ensure_eq!(
        bed.sched.complete_job(a2),
        ReleaseOutcome::Evicted {
            as_nr: address_space(0),
            requeued: true,
            discarded: Vec::new(),
        }
    );

    // The waiting context took the address space, and the swapped-out one is back in the queue.
    gpusched::ensure_eq!(bed.sched.context_status(&other).as_nr, Some(address_space(0)));
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![b1]);
    let status = bed.sched.context_status(&hog);
    gpusched::ensure_eq!(status.in_policy_queue, true);
    gpusched::ensure_eq!(status.nr_pending, 1);
    check_residency(&bed, &[hog.clone(), other.clone()])?;

    // Once the other context is done, the first one comes back with a fresh slice.
    bed.run_head(slot(0));
    let status = bed.sched.context_status(&hog);
    gpusched::ensure_eq!(status.as_nr, Some(address_space(0)));
    gpusched::ensure_eq!(status.slice_used_us, 0);
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![a3]);

    drain(&bed)?;
    teardown(bed, vec![hog, other])
}

/// Without anyone waiting, a context over its slice simply starts a new one.
#[test]
fn quota_restarts_when_nobody_waits() -> Result<()> {
    let config: SchedulerConfig = SchedulerConfig::default()
        .set_nr_address_spaces(1)
        .set_nr_job_slots(1)
        .set_ctx_timeslice_us(1000);
    let bed: TestBed = setup_with(config);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    add(&bed, &ctx, slot(0), 0x1)?;
    let second: AtomRef = add(&bed, &ctx, slot(0), 0x2)?;
    bed.sched.try_schedule_head();

    bed.gpu.advance(5);
    bed.run_head(slot(0));
    let status = bed.sched.context_status(&ctx);
    gpusched::ensure_eq!(status.submit_allowed, true);
    gpusched::ensure_eq!(status.slice_used_us, 0);
    gpusched::ensure_eq!(status.runtime_us, 5000);
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![second]);

    drain(&bed)?;
    teardown(bed, vec![ctx])
}

/// Clearing the submission grant of a context on one slot is not undone by completions on another slot.
#[test]
fn quota_flag_survives_completions_on_other_slots() -> Result<()> {
    let config: SchedulerConfig = SchedulerConfig::default()
        .set_nr_address_spaces(2)
        .set_nr_job_slots(2)
        .set_ctx_timeslice_us(5000);
    let bed: TestBed = setup_with(config);
    let hog: SchedContext = bed.sched.context_init(0)?;
    for jc in 0..3u64 {
        add(&bed, &hog, slot(0), jc)?;
    }
    bed.sched.try_schedule_head();

    bed.gpu.set_now(Tick::new(6));
    let light: SchedContext = bed.sched.context_init(0)?;
    let waiting: SchedContext = bed.sched.context_init(0)?;
    add(&bed, &light, slot(1), 0x10)?;
    add(&bed, &light, slot(1), 0x11)?;
    add(&bed, &waiting, slot(0), 0x20)?;
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(light.id()));
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), None);

    bed.retire_head(slot(0));
    gpusched::ensure_eq!(bed.sched.context_status(&hog).submit_allowed, false);

    bed.retire_head(slot(1));
    gpusched::ensure_eq!(bed.sched.context_status(&hog).submit_allowed, false);
    gpusched::ensure_eq!(bed.sched.context_status(&light).submit_allowed, true);

    // Finish the two retired atoms, then run everything else.
    let retired: Vec<AtomRef> = bed
        .gpu
        .submissions()
        .iter()
        .filter(|submission| submission.jc == 0 || submission.jc == 0x10)
        .map(|submission| submission.atom)
        .collect();
    for atom in retired {
        bed.sched.complete_job(atom);
    }
    drain(&bed)?;
    check_residency(&bed, &[hog.clone(), light.clone(), waiting.clone()])?;
    gpusched::ensure_eq!(bed.sched.nr_queued(), 0);
    teardown(bed, vec![hog, light, waiting])
}

/// Under the priority policy, the context with the largest priority is promoted first.
#[test]
fn priority_policy_promotes_the_largest_priority_first() -> Result<()> {
    let config: SchedulerConfig = SchedulerConfig::default()
        .set_nr_address_spaces(1)
        .set_nr_job_slots(1)
        .set_policy(PolicyKind::Priority);
    let bed: TestBed = setup_with(config);
    let low: SchedContext = bed.sched.context_init(1)?;
    let high: SchedContext = bed.sched.context_init(5)?;
    let mid: SchedContext = bed.sched.context_init(3)?;
    for ctx in [&low, &high, &mid] {
        add(&bed, ctx, slot(0), 0x1)?;
    }
    bed.sched.try_schedule_head();
    drain(&bed)?;

    let promoted: Vec<_> = bed
        .mmu
        .events()
        .into_iter()
        .filter_map(|event| match event {
            MmuEvent::Bind(_, id) => Some(id),
            MmuEvent::Unbind(..) => None,
        })
        .collect();
    gpusched::ensure_eq!(promoted, vec![high.id(), mid.id(), low.id()]);
    teardown(bed, vec![low, high, mid])
}

/// Under the FIFO policy, contexts are promoted in arrival order regardless of priority.
#[test]
fn fifo_policy_promotes_in_arrival_order() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let low: SchedContext = bed.sched.context_init(1)?;
    let high: SchedContext = bed.sched.context_init(5)?;
    for ctx in [&low, &high] {
        add(&bed, ctx, slot(0), 0x1)?;
    }
    bed.sched.try_schedule_head();
    drain(&bed)?;

    let promoted: Vec<_> = bed
        .mmu
        .events()
        .into_iter()
        .filter_map(|event| match event {
            MmuEvent::Bind(_, id) => Some(id),
            MmuEvent::Unbind(..) => None,
        })
        .collect();
    gpusched::ensure_eq!(promoted, vec![low.id(), high.id()]);
    teardown(bed, vec![low, high])
}

/// While a not-soft-stoppable atom is resident, only contexts holding such atoms are drawn from. A context left with
/// nothing it may submit gives up its address space, and comes back once the NSS work is gone.
#[test]
fn nss_atoms_hold_back_other_work_until_removed() -> Result<()> {
    let bed: TestBed = setup(2, 1);
    let standard: SchedContext = bed.sched.context_init(0)?;
    let a1: AtomRef = add(&bed, &standard, slot(0), 0x1)?;
    let a2: AtomRef = add(&bed, &standard, slot(0), 0x2)?;
    let a3: AtomRef = add(&bed, &standard, slot(0), 0x3)?;
    bed.sched.try_schedule_head();

    let nss: SchedContext = bed.sched.context_init(0)?;
    let b1: AtomRef = add_nss(&bed, &nss, slot(0), 0x10)?;
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(nss.id()));

    bed.retire_head(slot(0));
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![a2, b1]);

    let (_, outcome): (AtomRef, SubmitOutcome) = bed.retire_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(outcome, SubmitOutcome::RetryDeferred);
    gpusched::ensure_eq!(bed.sched.atom_status(a3), Some(AtomState::Queued));
    gpusched::ensure_eq!(bed.sched.complete_job(a1), ReleaseOutcome::Retained);
    gpusched::ensure_eq!(
        bed.sched.complete_job(a2),
        ReleaseOutcome::Evicted {
            as_nr: address_space(0),
            requeued: true,
            discarded: Vec::new(),
        }
    );
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![b1]);
    // Promoting it again would only park it in an address space.
    gpusched::ensure_eq!(bed.sched.context_status(&standard).in_policy_queue, true);
    gpusched::ensure_eq!(bed.sched.nr_free_address_spaces(), 1);

    // Retired but still registered: the run pool has not left NSS state yet.
    bed.retire_head(slot(0));
    gpusched::ensure_eq!(bed.sched.atom_status(a3), Some(AtomState::Queued));

    gpusched::ensure_eq!(
        bed.sched.complete_job(b1),
        ReleaseOutcome::Evicted {
            as_nr: address_space(1),
            requeued: false,
            discarded: Vec::new(),
        }
    );
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![a3]);

    drain(&bed)?;
    teardown(bed, vec![standard, nss])
}

/// A context holding not-soft-stoppable work is drawn from as a whole, so a standard atom queued ahead of an NSS atom
/// on the same slot still runs, and the context waiting behind it gets its turn.
#[test]
fn standard_atom_ahead_of_nss_atom_is_submitted() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let mixed: SchedContext = bed.sched.context_init(0)?;
    let waiting: SchedContext = bed.sched.context_init(0)?;
    let standard: AtomRef = add(&bed, &mixed, slot(0), 0x1)?;
    let nss: AtomRef = add_nss(&bed, &mixed, slot(0), 0x2)?;
    let other: AtomRef = add(&bed, &waiting, slot(0), 0x3)?;

    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(mixed.id()));
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![standard, nss]);
    gpusched::ensure_eq!(bed.sched.context_status(&waiting).in_policy_queue, true);

    gpusched::ensure_eq!(drain(&bed)?, 3);
    gpusched::ensure_eq!(bed.sched.atom_status(other), None);
    gpusched::ensure_eq!(
        bed.gpu
            .submissions()
            .iter()
            .map(|submission| submission.atom)
            .collect::<Vec<AtomRef>>(),
        vec![standard, nss, other]
    );
    check_residency(&bed, &[mixed.clone(), waiting.clone()])?;
    teardown(bed, vec![mixed, waiting])
}

/// A queued context whose atoms cannot run under NSS state stays queued, and the next context is promoted instead.
#[test]
fn promotion_skips_contexts_held_back_by_nss_state() -> Result<()> {
    let bed: TestBed = setup(2, 1);
    let nss_owner: SchedContext = bed.sched.context_init(0)?;
    let standard: SchedContext = bed.sched.context_init(0)?;
    let nss_follower: SchedContext = bed.sched.context_init(0)?;
    let n1: AtomRef = add_nss(&bed, &nss_owner, slot(0), 0x1)?;
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(nss_owner.id()));

    let s1: AtomRef = add(&bed, &standard, slot(0), 0x2)?;
    let n2: AtomRef = add_nss(&bed, &nss_follower, slot(0), 0x3)?;
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), Some(nss_follower.id()));
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![n1, n2]);
    gpusched::ensure_eq!(bed.sched.context_status(&standard).in_policy_queue, true);
    gpusched::ensure_eq!(bed.sched.atom_status(s1), Some(AtomState::Queued));

    gpusched::ensure_eq!(drain(&bed)?, 3);
    check_residency(&bed, &[nss_owner.clone(), standard.clone(), nss_follower.clone()])?;
    teardown(bed, vec![nss_owner, standard, nss_follower])
}

/// The submission budget of an interrupt does not carry over to the next one.
#[test]
fn interrupt_budget_ends_with_its_scope() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    let atoms: Vec<AtomRef> = (0..5)
        .map(|n| add(&bed, &ctx, slot(0), n))
        .collect::<Result<Vec<AtomRef>>>()?;
    bed.sched.try_schedule_head();
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![atoms[0], atoms[1]]);

    {
        let scope = bed.sched.enter_irq();
        let mut outcomes: Vec<SubmitOutcome> = Vec::new();
        for _ in 0..3 {
            let atom: AtomRef = bed.gpu.complete_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
            outcomes.push(bed.sched.job_done_irq(&scope, slot(0), atom, Tick::new(0)));
        }
        gpusched::ensure_eq!(
            outcomes,
            vec![
                SubmitOutcome::Submitted(1),
                SubmitOutcome::Submitted(1),
                SubmitOutcome::RetryDeferred
            ]
        );
        gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![atoms[3]]);
    }

    {
        let mut slot_guard = bed.sched.lock_slot(slot(0));
        let mut irq = bed.sched.lock_irq();
        gpusched::ensure_eq!(
            bed.sched.try_submit_irq(&mut slot_guard, &mut irq),
            SubmitOutcome::Submitted(1)
        );
    }
    gpusched::ensure_eq!(bed.gpu.in_flight(slot(0)), vec![atoms[3], atoms[4]]);

    for atom in atoms[..3].iter() {
        bed.sched.complete_job(*atom);
    }
    drain(&bed)?;
    teardown(bed, vec![ctx])
}

/// A configuration error is reported before a scheduler exists, and a scheduler that never ran anything terminates
/// cleanly.
#[test]
fn bring_up_error_leaves_nothing_to_tear_down() -> Result<()> {
    let config: Config = Config::from_yaml_str("gpusched:\n  nr_address_spaces: 0\n")?;
    match SchedulerConfig::new(&config) {
        Ok(_) => anyhow::bail!("zero address spaces should be rejected"),
        Err(e) => gpusched::ensure_eq!(e.errno, libc::EINVAL),
    }

    let bed: TestBed = setup(1, 1);
    gpusched::ensure_eq!(bed.sched.nr_queued(), 0);
    teardown(bed, Vec::new())
}

/// Removing a queued atom of a context that is not resident takes the context out of the queue once it has nothing
/// left.
#[test]
fn removing_the_last_queued_atom_dequeues_the_context() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    let first: AtomRef = add(&bed, &ctx, slot(0), 0x1)?;
    let second: AtomRef = add(&bed, &ctx, slot(0), 0x2)?;

    gpusched::ensure_eq!(bed.sched.remove_job(&mut ctx.lock(), first), false);
    gpusched::ensure_eq!(bed.sched.nr_queued(), 1);
    remove_all(&bed, &ctx, &[second]);
    gpusched::ensure_eq!(bed.sched.nr_queued(), 0);
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).in_policy_queue, false);
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), None);
    gpusched::ensure_eq!(bed.mmu.events().len(), 0);

    teardown(bed, vec![ctx])
}

/// Atoms for slots the hardware does not have are refused.
#[test]
fn add_job_rejects_missing_slots() -> Result<()> {
    let bed: TestBed = setup(1, 2);
    let ctx: SchedContext = bed.sched.context_init(0)?;
    match bed.sched.add_job(&mut ctx.lock(), JobAtom::standard(0x1, slot(5))) {
        Ok(_) => anyhow::bail!("add_job() accepted a missing slot"),
        Err(e) => gpusched::ensure_eq!(e.errno, libc::EINVAL),
    }
    gpusched::ensure_eq!(bed.sched.context_status(&ctx).nr_jobs, 0);
    gpusched::ensure_eq!(bed.sched.nr_queued(), 0);
    teardown(bed, vec![ctx])
}

/// A halted scheduler lets resident contexts drain but promotes nothing.
#[test]
fn halt_stops_promotion() -> Result<()> {
    let bed: TestBed = setup(1, 1);
    let running: SchedContext = bed.sched.context_init(0)?;
    let waiting: SchedContext = bed.sched.context_init(0)?;
    add(&bed, &running, slot(0), 0x1)?;
    let queued: AtomRef = add(&bed, &waiting, slot(0), 0x2)?;
    bed.sched.try_schedule_head();

    bed.sched.halt();
    gpusched::ensure_eq!(bed.sched.is_halted(), true);
    match bed.sched.context_init(0) {
        Ok(_) => anyhow::bail!("context_init() succeeded on a halted scheduler"),
        Err(e) => gpusched::ensure_eq!(e.errno, libc::ECANCELED),
    }

    let (_, outcome): (AtomRef, ReleaseOutcome) = bed.run_head(slot(0)).ok_or(anyhow::anyhow!("slot 0 is idle"))?;
    gpusched::ensure_eq!(matches!(outcome, ReleaseOutcome::Evicted { .. }), true);
    gpusched::ensure_eq!(bed.sched.try_schedule_head(), None);
    gpusched::ensure_eq!(bed.sched.context_status(&waiting).in_policy_queue, true);
    gpusched::ensure_eq!(bed.sched.nr_free_address_spaces(), 1);

    remove_all(&bed, &waiting, &[queued]);
    teardown(bed, vec![running, waiting])
}

#[test]
#[should_panic(expected = "still references")]
fn removing_an_atom_in_a_job_slot_panics() {
    let bed: TestBed = setup(1, 1);
    let Ok(ctx) = bed.sched.context_init(0) else {
        return;
    };
    let Ok(atom) = add(&bed, &ctx, slot(0), 0x1) else {
        return;
    };
    bed.sched.try_schedule_head();
    bed.sched.remove_job(&mut ctx.lock(), atom);
}

#[test]
#[should_panic(expected = "atoms still registered")]
fn terminating_a_busy_context_panics() {
    let bed: TestBed = setup(1, 1);
    let Ok(ctx) = bed.sched.context_init(0) else {
        return;
    };
    let _ = add(&bed, &ctx, slot(0), 0x1);
    bed.sched.context_term(ctx);
}
