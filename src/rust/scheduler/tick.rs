// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// This file defines the scheduling tick and the conversions between ticks, microseconds, and GPU clock cycles.
//
// The tick counter is a free-running unsigned 32-bit value that wraps around. As with TCP sequence numbers, ordering
// between two ticks is only meaningful when they are less than half the counter's range apart, so ticks do not
// implement Ord. `a` is "after" `b` iff `a - b`, computed modulo 2^32, is less than 2^31; equal ticks count as after.
//
// GPU cycle conversions come in two flavours, one per end of the GPU's frequency range. Converting with the minimum
// frequency gives the worst-case (longest) time for a number of cycles; converting with the maximum frequency gives
// the best case.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::fmt;

//======================================================================================================================
// Constants
//======================================================================================================================

const MICROSECONDS_PER_SECOND: u64 = 1_000_000;

const DEFAULT_TICKS_PER_SECOND: u32 = 1000;
const DEFAULT_GPU_FREQ_KHZ_MIN: u32 = 100_000;
const DEFAULT_GPU_FREQ_KHZ_MAX: u32 = 533_000;

/// Half the range of the tick counter. Differences below this value are "forwards".
const TICK_WRAP_VALUE: u32 = 1u32 << (u32::BITS - 1);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Scheduling tick.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tick(u32);

/// Converts between ticks and microseconds for a fixed tick rate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TickRate {
    ticks_per_second: u32,
}

/// Frequency range of the GPU clock, in kHz.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GpuClock {
    freq_khz_min: u32,
    freq_khz_max: u32,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Tick {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Returns the tick `ticks` after this one, wrapping around.
    pub fn wrapping_add(self, ticks: u32) -> Self {
        Self(self.0.wrapping_add(ticks))
    }

    /// Number of ticks elapsed from `earlier` to this tick, wrapping around.
    pub fn wrapping_since(self, earlier: Tick) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Returns true if this tick is at or after `other`.
    pub fn is_after(self, other: Tick) -> bool {
        ticks_after(self, other)
    }
}

impl TickRate {
    pub fn new(ticks_per_second: u32) -> Result<Self, Fail> {
        if ticks_per_second == 0 || u64::from(ticks_per_second) > MICROSECONDS_PER_SECOND {
            let cause: String = format!("invalid tick rate (ticks_per_second={})", ticks_per_second);
            error!("TickRate::new(): {}", cause);
            return Err(Fail::invalid(&cause));
        }
        Ok(Self { ticks_per_second })
    }

    pub fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    /// Converts a number of ticks into microseconds, rounding down.
    pub fn ticks_to_us(&self, ticks: u32) -> u64 {
        u64::from(ticks) * MICROSECONDS_PER_SECOND / u64::from(self.ticks_per_second)
    }

    /// Converts microseconds into a number of ticks, rounding down and saturating at the counter's range.
    pub fn us_to_ticks(&self, us: u64) -> u32 {
        let ticks: u128 = u128::from(us) * u128::from(self.ticks_per_second) / u128::from(MICROSECONDS_PER_SECOND);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }

    /// Converts milliseconds into a number of ticks.
    pub fn ms_to_ticks(&self, ms: u32) -> u32 {
        self.us_to_ticks(u64::from(ms) * 1000)
    }
}

impl GpuClock {
    pub fn new(freq_khz_min: u32, freq_khz_max: u32) -> Result<Self, Fail> {
        if freq_khz_min == 0 || freq_khz_max == 0 || freq_khz_min > freq_khz_max {
            let cause: String = format!(
                "invalid GPU frequency range (min={} kHz, max={} kHz)",
                freq_khz_min, freq_khz_max
            );
            error!("GpuClock::new(): {}", cause);
            return Err(Fail::invalid(&cause));
        }
        Ok(Self {
            freq_khz_min,
            freq_khz_max,
        })
    }

    pub fn freq_khz_min(&self) -> u32 {
        self.freq_khz_min
    }

    pub fn freq_khz_max(&self) -> u32 {
        self.freq_khz_max
    }

    /// Number of cycles the GPU runs in `us` microseconds at its minimum frequency.
    pub fn us_to_gpu_ticks_min_freq(&self, us: u32) -> u64 {
        us_to_cycles(us, self.freq_khz_min)
    }

    /// Number of cycles the GPU runs in `us` microseconds at its maximum frequency.
    pub fn us_to_gpu_ticks_max_freq(&self, us: u32) -> u64 {
        us_to_cycles(us, self.freq_khz_max)
    }

    /// Time `cycles` take at the minimum frequency: the worst-case latency bound.
    pub fn gpu_ticks_to_us_min_freq(&self, cycles: u64) -> u64 {
        cycles_to_us(cycles, self.freq_khz_min)
    }

    /// Time `cycles` take at the maximum frequency: the best-case latency bound.
    pub fn gpu_ticks_to_us_max_freq(&self, cycles: u64) -> u64 {
        cycles_to_us(cycles, self.freq_khz_max)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns true if `a` is at or after `b`, allowing for wraparound.
pub fn ticks_after(a: Tick, b: Tick) -> bool {
    a.0.wrapping_sub(b.0) < TICK_WRAP_VALUE
}

fn us_to_cycles(us: u32, freq_khz: u32) -> u64 {
    u64::from(us) * u64::from(freq_khz) / 1000
}

fn cycles_to_us(cycles: u64, freq_khz: u32) -> u64 {
    let us: u128 = u128::from(cycles) * 1000 / u128::from(freq_khz);
    u64::try_from(us).unwrap_or(u64::MAX)
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u32> for Tick {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Tick> for u32 {
    fn from(value: Tick) -> Self {
        value.0
    }
}

impl Default for TickRate {
    fn default() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
        }
    }
}

impl Default for GpuClock {
    fn default() -> Self {
        Self {
            freq_khz_min: DEFAULT_GPU_FREQ_KHZ_MIN,
            freq_khz_max: DEFAULT_GPU_FREQ_KHZ_MAX,
        }
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
