// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::gpusched::{
    runtime::logging,
    scheduler::{
        WorkItem,
        Worker,
        WorkerStats,
    },
    test_helpers::{
        RecordingMmu,
        SimulatedGpu,
        TestBed,
    },
    AddJobResult,
    Config,
    JobAtom,
    SchedContext,
    SchedulerConfig,
    SlotNr,
    SlotTimeout,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Program Arguments
//======================================================================================================================

/// Program Arguments
#[derive(Debug)]
pub struct ProgramArguments {
    /// Configuration file. Built-in defaults are used when absent.
    config: Option<String>,
    /// Number of client contexts.
    nr_contexts: usize,
    /// Atoms submitted by each context.
    nr_atoms: usize,
    /// Seed of the simulated workload.
    seed: u64,
}

/// Associate functions for Program Arguments
impl ProgramArguments {
    const DEFAULT_NR_CONTEXTS: usize = 8;
    const DEFAULT_NR_ATOMS: usize = 1000;
    const DEFAULT_SEED: u64 = 0;

    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_author: &'static str, app_about: &'static str) -> Result<Self> {
        let matches: ArgMatches = Command::new(app_name)
            .author(app_author)
            .about(app_about)
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets configuration file"),
            )
            .arg(
                Arg::new("contexts")
                    .long("contexts")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets number of client contexts"),
            )
            .arg(
                Arg::new("atoms")
                    .long("atoms")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets number of atoms per context"),
            )
            .arg(
                Arg::new("seed")
                    .long("seed")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .value_name("SEED")
                    .help("Sets seed of the workload"),
            )
            .get_matches();

        let mut args: ProgramArguments = ProgramArguments {
            config: None,
            nr_contexts: Self::DEFAULT_NR_CONTEXTS,
            nr_atoms: Self::DEFAULT_NR_ATOMS,
            seed: Self::DEFAULT_SEED,
        };

        if let Some(path) = matches.get_one::<String>("config") {
            args.config = Some(path.clone());
        }
        if let Some(nr_contexts) = matches.get_one::<usize>("contexts") {
            if *nr_contexts == 0 {
                anyhow::bail!("at least one context is needed");
            }
            args.nr_contexts = *nr_contexts;
        }
        if let Some(nr_atoms) = matches.get_one::<usize>("atoms") {
            args.nr_atoms = *nr_atoms;
        }
        if let Some(seed) = matches.get_one::<u64>("seed") {
            args.seed = *seed;
        }

        Ok(args)
    }
}

//======================================================================================================================
// Application
//======================================================================================================================

/// Application
struct Application {
    bed: Arc<TestBed>,
    contexts: Vec<SchedContext>,
    nr_atoms: usize,
    seed: u64,
}

/// Associated Functions for the Application
impl Application {
    /// Ticks between two watchdog runs.
    const WATCHDOG_PERIOD: u32 = 100;
    /// Wall-clock time after which the simulation gives up.
    const TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(args: &ProgramArguments) -> Result<Self> {
        let config: SchedulerConfig = match args.config.as_ref() {
            Some(path) => SchedulerConfig::new(&Config::new(path)?)?,
            None => SchedulerConfig::default(),
        };
        println!("Configuration: {:?}", config);

        let bed: Arc<TestBed> = Arc::new(TestBed::new(config));
        let mut contexts: Vec<SchedContext> = Vec::with_capacity(args.nr_contexts);
        for i in 0..args.nr_contexts {
            contexts.push(bed.sched.context_init((i % 4) as i32)?);
        }

        Ok(Self {
            bed,
            contexts,
            nr_atoms: args.nr_atoms,
            seed: args.seed,
        })
    }

    /// Runs the workload until every atom retired.
    pub fn run(self) -> Result<()> {
        let start: Instant = Instant::now();
        let total: usize = self.contexts.len() * self.nr_atoms;
        let (tx, rx): (Sender<WorkItem>, Receiver<WorkItem>) = crossbeam_channel::unbounded();
        let (report_tx, report_rx): (Sender<SlotTimeout>, Receiver<SlotTimeout>) = crossbeam_channel::unbounded();

        let worker: Worker<Arc<SimulatedGpu>, Arc<RecordingMmu>> =
            Worker::new(self.bed.sched.clone(), rx).with_timeout_reports(report_tx);
        let worker_thread: JoinHandle<WorkerStats> = thread::spawn(move || worker.run());

        let irq_thread: JoinHandle<Result<usize>> = {
            let bed: Arc<TestBed> = self.bed.clone();
            let contexts: Vec<SchedContext> = self.contexts.clone();
            let tx: Sender<WorkItem> = tx.clone();
            let seed: u64 = self.seed;
            thread::spawn(move || Self::interrupt_loop(&bed, &contexts, &tx, &report_rx, total, seed))
        };

        let mut clients: Vec<JoinHandle<Result<()>>> = Vec::with_capacity(self.contexts.len());
        for (i, ctx) in self.contexts.iter().enumerate() {
            let bed: Arc<TestBed> = self.bed.clone();
            let ctx: SchedContext = ctx.clone();
            let tx: Sender<WorkItem> = tx.clone();
            let seed: u64 = self.seed.wrapping_add(i as u64 + 1);
            let nr_atoms: usize = self.nr_atoms;
            clients.push(thread::spawn(move || Self::client_loop(&bed, &ctx, &tx, seed, nr_atoms)));
        }

        for client in clients {
            Self::join(client)??;
        }
        let retired: usize = Self::join(irq_thread)??;
        if let Err(e) = tx.send(WorkItem::Shutdown) {
            anyhow::bail!("failed to stop the worker: {:?}", e);
        }
        let stats: WorkerStats = Self::join(worker_thread)?;

        println!(
            "retired={} promoted={} evicted={} timeouts={} elapsed={:?}",
            retired,
            stats.promoted,
            stats.evicted,
            stats.timeouts,
            start.elapsed()
        );
        let mut total_us: u64 = 0;
        for ctx in self.contexts.iter() {
            let status = self.bed.sched.context_status(ctx);
            total_us += status.runtime_us;
            println!("{} priority={} runtime={} us", ctx.id(), ctx.priority(), status.runtime_us);
        }
        for ctx in self.contexts.iter() {
            let runtime_us: u64 = self.bed.sched.context_status(ctx).runtime_us;
            let share: f64 = if total_us == 0 {
                0.0
            } else {
                runtime_us as f64 * 100.0 / total_us as f64
            };
            println!("{} share={:.1}%", ctx.id(), share);
        }

        for ctx in self.contexts {
            self.bed.sched.context_term(ctx);
        }
        match Arc::try_unwrap(self.bed) {
            Ok(bed) => match Arc::try_unwrap(bed.sched) {
                Ok(sched) => sched.term(),
                Err(_) => anyhow::bail!("scheduler is still shared"),
            },
            Err(_) => anyhow::bail!("test bed is still shared"),
        }
        Ok(())
    }

    /// Submission path of one client.
    fn client_loop(bed: &TestBed, ctx: &SchedContext, tx: &Sender<WorkItem>, seed: u64, nr_atoms: usize) -> Result<()> {
        let mut rng: SmallRng = SmallRng::seed_from_u64(seed);
        let nr_job_slots: usize = bed.sched.config().get_nr_job_slots();
        for n in 0..nr_atoms {
            let slot: SlotNr = match SlotNr::new(rng.gen_range(0..nr_job_slots)) {
                Some(slot) => slot,
                None => anyhow::bail!("job slot out of range"),
            };
            let jc: u64 = ((usize::from(ctx.id()) as u64) << 32) | n as u64;
            let result: AddJobResult = bed.sched.add_job(&mut ctx.lock(), JobAtom::standard(jc, slot))?;
            if result.policy_queue_changed {
                tx.send(WorkItem::ScheduleHead)?;
            }
            if rng.gen_bool(0.05) {
                thread::sleep(Duration::from_micros(rng.gen_range(1..200)));
            }
        }
        Ok(())
    }

    /// Stands in for the GPU: jobs run for a random number of ticks, then raise their interrupt. Hung slots reported
    /// by the watchdog are reset, and the atoms they cost are counted as retired.
    fn interrupt_loop(
        bed: &TestBed,
        contexts: &[SchedContext],
        tx: &Sender<WorkItem>,
        reports: &Receiver<SlotTimeout>,
        total: usize,
        seed: u64,
    ) -> Result<usize> {
        let deadline: Instant = Instant::now() + Self::TIMEOUT;
        let slots: Vec<SlotNr> = bed.sched.slot_numbers().collect();
        let mut rng: SmallRng = SmallRng::seed_from_u64(seed);
        let mut retired: usize = 0;
        let mut since_watchdog: u32 = 0;
        while retired < total {
            if Instant::now() > deadline {
                anyhow::bail!("only {} of {} atoms retired", retired, total);
            }
            let ticks: u32 = rng.gen_range(1..8);
            let now = bed.gpu.advance(ticks);
            since_watchdog += ticks;
            if since_watchdog >= Self::WATCHDOG_PERIOD {
                since_watchdog = 0;
                tx.send(WorkItem::Watchdog(now))?;
            }

            for report in reports.try_iter() {
                println!(
                    "WARN: {} hung with {} atoms, {} queued atoms failed",
                    report.slot,
                    report.in_flight.len(),
                    report.failed_pending.len()
                );
                bed.gpu.hardware_reset(report.slot);
                for atom in bed.sched.reset_slot(report.slot)? {
                    tx.send(WorkItem::CompleteJob(atom))?;
                    retired += 1;
                }
                for atom in report.failed_pending {
                    let ctx: &SchedContext = match contexts.iter().find(|ctx| ctx.id() == atom.ctx) {
                        Some(ctx) => ctx,
                        None => anyhow::bail!("{} belongs to an unknown context", atom),
                    };
                    bed.sched.remove_job(&mut ctx.lock(), atom);
                    retired += 1;
                }
            }

            let slot: SlotNr = slots[rng.gen_range(0..slots.len())];
            match bed.retire_head(slot) {
                Some((atom, _)) => {
                    tx.send(WorkItem::CompleteJob(atom))?;
                    retired += 1;
                },
                None => thread::yield_now(),
            }
        }
        Ok(retired)
    }

    fn join<T>(handle: JoinHandle<T>) -> Result<T> {
        match handle.join() {
            Ok(value) => Ok(value),
            Err(_) => anyhow::bail!("thread panicked"),
        }
    }
}

//======================================================================================================================

fn main() -> Result<()> {
    logging::initialize();
    let args: ProgramArguments = ProgramArguments::new(
        "gpusched-sim",
        "Microsoft Corporation",
        "Drives the GPU job scheduler with a simulated workload.",
    )?;
    Application::new(&args)?.run()
}
