// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Job scheduler options.
mod sched_config {
    pub const SECTION_NAME: &str = "gpusched";
    // Number of hardware address spaces (size of the run pool).
    pub const NR_ADDRESS_SPACES: &str = "nr_address_spaces";
    // Number of hardware job slots.
    pub const NR_JOB_SLOTS: &str = "nr_job_slots";
    // Ordering policy for the policy queue.
    pub const POLICY: &str = "queue_policy";
    // Rate of the scheduling tick counter.
    pub const TICKS_PER_SECOND: &str = "ticks_per_second";
    // GPU time a context may use per admission before yielding its address space.
    pub const CTX_TIMESLICE_US: &str = "ctx_timeslice_us";
    // Watchdog window for a job slot.
    pub const RESET_TIMEOUT_MS: &str = "reset_timeout_ms";
}

// GPU clock options.
mod gpu_config {
    pub const SECTION_NAME: &str = "gpu";
    pub const FREQ_KHZ_MIN: &str = "gpu_freq_khz_min";
    pub const FREQ_KHZ_MAX: &str = "gpu_freq_khz_max";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Job scheduler configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Common associated functions for the job scheduler configuration object.
impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_yaml_str(&config_s)
    }

    /// Parses a configuration document held in memory.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration: {:?}", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::invalid(&cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::invalid("Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    fn get_sched_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, sched_config::SECTION_NAME)
    }

    fn get_gpu_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, gpu_config::SECTION_NAME)
    }

    /// Scheduler config: Reads the number of address spaces from the environment variable first and then the
    /// underlying configuration file.
    pub fn nr_address_spaces(&self) -> Result<usize, Fail> {
        if let Some(nr) = Self::get_typed_env_option(sched_config::NR_ADDRESS_SPACES)? {
            Ok(nr)
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::NR_ADDRESS_SPACES)
        }
    }

    /// Scheduler config: Reads the number of job slots.
    pub fn nr_job_slots(&self) -> Result<usize, Fail> {
        if let Some(nr) = Self::get_typed_env_option(sched_config::NR_JOB_SLOTS)? {
            Ok(nr)
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::NR_JOB_SLOTS)
        }
    }

    /// Scheduler config: Reads the name of the policy queue ordering.
    pub fn policy(&self) -> Result<String, Fail> {
        if let Some(policy) = Self::get_typed_env_option(sched_config::POLICY)? {
            Ok(policy)
        } else {
            Self::get_typed_str_option(self.get_sched_config()?, sched_config::POLICY, |val: &str| {
                Some(val.to_string())
            })
        }
    }

    /// Scheduler config: Reads the rate of the scheduling tick counter.
    pub fn ticks_per_second(&self) -> Result<u32, Fail> {
        if let Some(rate) = Self::get_typed_env_option(sched_config::TICKS_PER_SECOND)? {
            Ok(rate)
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::TICKS_PER_SECOND)
        }
    }

    /// Scheduler config: Reads the per-admission time slice of a context.
    pub fn ctx_timeslice_us(&self) -> Result<u64, Fail> {
        if let Some(slice) = Self::get_typed_env_option(sched_config::CTX_TIMESLICE_US)? {
            Ok(slice)
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::CTX_TIMESLICE_US)
        }
    }

    /// Scheduler config: Reads the job slot watchdog window.
    pub fn reset_timeout_ms(&self) -> Result<u32, Fail> {
        if let Some(timeout) = Self::get_typed_env_option(sched_config::RESET_TIMEOUT_MS)? {
            Ok(timeout)
        } else {
            Self::get_int_option(self.get_sched_config()?, sched_config::RESET_TIMEOUT_MS)
        }
    }

    /// GPU config: Reads the minimum GPU clock frequency.
    pub fn gpu_freq_khz_min(&self) -> Result<u32, Fail> {
        if let Some(freq) = Self::get_typed_env_option(gpu_config::FREQ_KHZ_MIN)? {
            Ok(freq)
        } else {
            Self::get_int_option(self.get_gpu_config()?, gpu_config::FREQ_KHZ_MIN)
        }
    }

    /// GPU config: Reads the maximum GPU clock frequency.
    pub fn gpu_freq_khz_max(&self) -> Result<u32, Fail> {
        if let Some(freq) = Self::get_typed_env_option(gpu_config::FREQ_KHZ_MAX)? {
            Ok(freq)
        } else {
            Self::get_int_option(self.get_gpu_config()?, gpu_config::FREQ_KHZ_MAX)
        }
    }

    //======================================================================================================================
    // Static Functions
    //======================================================================================================================

    /// Similar to `get_typed_option` using `Yaml::as_hash` receiver. This method returns a `&Yaml` instead of
    /// yaml::Hash, and Yaml is more natural for indexing.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::invalid(message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::invalid(message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::invalid(message.as_str()))
            },
        }
    }

    /// Index `yaml` to find value at `index`, validating it as a string.
    fn get_typed_str_option<T, Fn>(yaml: &Yaml, index: &str, parser: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&str) -> Option<T>,
    {
        let option: &Yaml = Self::get_option(yaml, index)?;
        if let Some(value) = option.as_str() {
            if let Some(value) = parser(value) {
                return Ok(value);
            }
        }
        let message: String = format!("parameter {} has unexpected type", index);
        Err(Fail::invalid(message.as_str()))
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::invalid(message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
