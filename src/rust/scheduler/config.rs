// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::Config,
    runtime::{
        fail::Fail,
        limits::{
            MAX_ADDRESS_SPACES,
            MAX_JOB_SLOTS,
        },
    },
    scheduler::{
        policy::PolicyKind,
        tick::{
            GpuClock,
            TickRate,
        },
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

const DEFAULT_NR_ADDRESS_SPACES: usize = 8;
const DEFAULT_NR_JOB_SLOTS: usize = 3;
const DEFAULT_CTX_TIMESLICE_US: u64 = 50_000;
/// Watchdog window used on Exynos 5 boards.
const DEFAULT_RESET_TIMEOUT_MS: u32 = 500;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Job Scheduler Configuration Descriptor
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of hardware address spaces, that is, size of the run pool.
    nr_address_spaces: usize,
    /// Number of hardware job slots.
    nr_job_slots: usize,
    /// Ordering of the policy queue.
    policy: PolicyKind,
    /// Rate of the scheduling tick.
    tick_rate: TickRate,
    /// GPU time a context may use per admission while others wait.
    ctx_timeslice_us: u64,
    /// Time a job may hold HEAD before its slot is declared hung.
    reset_timeout_ms: u32,
    /// GPU clock frequency range.
    gpu_clock: GpuClock,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Job Scheduler Configuration Descriptor
impl SchedulerConfig {
    /// Builds a descriptor from a configuration file, validating every option.
    pub fn new(config: &Config) -> Result<Self, Fail> {
        let nr_address_spaces: usize = config.nr_address_spaces()?;
        if nr_address_spaces == 0 || nr_address_spaces > MAX_ADDRESS_SPACES {
            return Err(Self::out_of_range("nr_address_spaces", nr_address_spaces));
        }
        let nr_job_slots: usize = config.nr_job_slots()?;
        if nr_job_slots == 0 || nr_job_slots > MAX_JOB_SLOTS {
            return Err(Self::out_of_range("nr_job_slots", nr_job_slots));
        }
        let ctx_timeslice_us: u64 = config.ctx_timeslice_us()?;
        if ctx_timeslice_us == 0 {
            return Err(Self::out_of_range("ctx_timeslice_us", ctx_timeslice_us));
        }

        Ok(Self {
            nr_address_spaces,
            nr_job_slots,
            policy: config.policy()?.parse()?,
            tick_rate: TickRate::new(config.ticks_per_second()?)?,
            ctx_timeslice_us,
            reset_timeout_ms: config.reset_timeout_ms()?,
            gpu_clock: GpuClock::new(config.gpu_freq_khz_min()?, config.gpu_freq_khz_max()?)?,
        })
    }

    fn out_of_range<T: ::std::fmt::Display>(option: &str, value: T) -> Fail {
        let cause: String = format!("option \"{}\" is out of range ({})", option, value);
        error!("new(): {}", cause);
        Fail::invalid(&cause)
    }

    /// Gets the number of address spaces in the target [SchedulerConfig].
    pub fn get_nr_address_spaces(&self) -> usize {
        self.nr_address_spaces
    }

    /// Gets the number of job slots in the target [SchedulerConfig].
    pub fn get_nr_job_slots(&self) -> usize {
        self.nr_job_slots
    }

    /// Gets the policy queue ordering in the target [SchedulerConfig].
    pub fn get_policy(&self) -> PolicyKind {
        self.policy
    }

    /// Gets the tick rate in the target [SchedulerConfig].
    pub fn get_tick_rate(&self) -> TickRate {
        self.tick_rate
    }

    /// Gets the context time slice in the target [SchedulerConfig].
    pub fn get_ctx_timeslice_us(&self) -> u64 {
        self.ctx_timeslice_us
    }

    /// Gets the watchdog window in the target [SchedulerConfig].
    pub fn get_reset_timeout_ms(&self) -> u32 {
        self.reset_timeout_ms
    }

    /// Gets the GPU clock range in the target [SchedulerConfig].
    pub fn get_gpu_clock(&self) -> GpuClock {
        self.gpu_clock
    }

    /// Sets the number of address spaces in the target [SchedulerConfig].
    pub fn set_nr_address_spaces(mut self, value: usize) -> Self {
        assert!(value > 0);
        assert!(value <= MAX_ADDRESS_SPACES);
        self.nr_address_spaces = value;
        self
    }

    /// Sets the number of job slots in the target [SchedulerConfig].
    pub fn set_nr_job_slots(mut self, value: usize) -> Self {
        assert!(value > 0);
        assert!(value <= MAX_JOB_SLOTS);
        self.nr_job_slots = value;
        self
    }

    /// Sets the policy queue ordering in the target [SchedulerConfig].
    pub fn set_policy(mut self, value: PolicyKind) -> Self {
        self.policy = value;
        self
    }

    /// Sets the tick rate in the target [SchedulerConfig].
    pub fn set_tick_rate(mut self, value: TickRate) -> Self {
        self.tick_rate = value;
        self
    }

    /// Sets the context time slice in the target [SchedulerConfig].
    pub fn set_ctx_timeslice_us(mut self, value: u64) -> Self {
        assert!(value > 0);
        self.ctx_timeslice_us = value;
        self
    }

    /// Sets the watchdog window in the target [SchedulerConfig].
    pub fn set_reset_timeout_ms(mut self, value: u32) -> Self {
        self.reset_timeout_ms = value;
        self
    }

    /// Sets the GPU clock range in the target [SchedulerConfig].
    pub fn set_gpu_clock(mut self, value: GpuClock) -> Self {
        self.gpu_clock = value;
        self
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for Job Scheduler Configuration Descriptor
impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            nr_address_spaces: DEFAULT_NR_ADDRESS_SPACES,
            nr_job_slots: DEFAULT_NR_JOB_SLOTS,
            policy: PolicyKind::Fifo,
            tick_rate: TickRate::default(),
            ctx_timeslice_us: DEFAULT_CTX_TIMESLICE_US,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
            gpu_clock: GpuClock::default(),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
