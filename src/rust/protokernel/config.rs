// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
    time::Duration,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Scheduler options.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    // Capacity of the activity pool.
    pub const ACTIVITY_POOL_SIZE: &str = "activity_pool_size";
    // Quantum granted to plain-priority activities, in milliseconds.
    pub const QUANTUM_MILLIS: &str = "quantum_millis";
}

// Log directory options.
mod log_directory_config {
    pub const SECTION_NAME: &str = "log_directory";
    // Capacity of the entry pool.
    pub const NUM_ENTRIES: &str = "num_entries";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Protokernel configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: String) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_str_contents(&config_s)
    }

    /// Parses configuration text into a [Config] object.
    pub fn from_str_contents(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration: {:?}", e);
                error!("from_str_contents(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "wrong number of config objects")),
        };
        Ok(Self(config_obj.clone()))
    }

    /// An empty configuration; every option falls back to its default.
    pub fn default_config() -> Self {
        Self(Yaml::Hash(Default::default()))
    }

    /// Scheduler config: capacity of the activity pool. The environment
    /// variable overrides the file; a missing option falls back to the
    /// default.
    pub fn activity_pool_size(&self) -> Result<usize, Fail> {
        if let Some(size) = Self::get_typed_env_option(scheduler_config::ACTIVITY_POOL_SIZE)? {
            return Ok(size);
        }
        match self.get_scheduler_config() {
            Ok(section) => Self::get_int_option(section, scheduler_config::ACTIVITY_POOL_SIZE)
                .or(Ok(limits::DEFAULT_ACTIVITY_POOL_SIZE)),
            Err(_) => Ok(limits::DEFAULT_ACTIVITY_POOL_SIZE),
        }
    }

    /// Scheduler config: the plain-priority quantum.
    pub fn resched_quantum(&self) -> Result<Duration, Fail> {
        let millis: u64 = if let Some(millis) = Self::get_typed_env_option(scheduler_config::QUANTUM_MILLIS)? {
            millis
        } else {
            match self.get_scheduler_config() {
                Ok(section) => match Self::get_int_option(section, scheduler_config::QUANTUM_MILLIS) {
                    Ok(millis) => millis,
                    Err(_) => return Ok(limits::RESCHED_QUANTUM),
                },
                Err(_) => return Ok(limits::RESCHED_QUANTUM),
            }
        };
        if millis == 0 {
            let cause: String = "quantum must be positive".to_string();
            error!("resched_quantum(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(Duration::from_millis(millis))
    }

    /// Log directory config: capacity of the entry pool.
    pub fn log_dir_entries(&self) -> Result<usize, Fail> {
        if let Some(entries) = Self::get_typed_env_option(log_directory_config::NUM_ENTRIES)? {
            return Ok(entries);
        }
        match self.get_log_directory_config() {
            Ok(section) => {
                Self::get_int_option(section, log_directory_config::NUM_ENTRIES).or(Ok(limits::DEFAULT_LOG_DIR_ENTRIES))
            },
            Err(_) => Ok(limits::DEFAULT_LOG_DIR_ENTRIES),
        }
    }

    //==================================================================================================================
    // Static Functions
    //==================================================================================================================

    fn get_scheduler_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, scheduler_config::SECTION_NAME)
    }

    fn get_log_directory_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, log_directory_config::SECTION_NAME)
    }

    /// Index `yaml` to find the subsection at `index`, validating that it is a hash.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating it as a non-negative integer.
    fn get_int_option<T: TryFrom<u64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let option: &Yaml = Self::get_option(yaml, index)?;
        match option.as_i64() {
            Some(value) if value >= 0 => match T::try_from(value as u64) {
                Ok(value) => Ok(value),
                Err(_) => {
                    let message: String = format!("parameter {} is out of range", index);
                    Err(Fail::new(libc::ERANGE, message.as_str()))
                },
            },
            _ => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Get a value from the environment, overriding the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
