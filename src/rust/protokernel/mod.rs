// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The kernel facade: builds the scheduler and the log directory from a
//! [Config] and hands out the shared handles collaborators hold.

pub mod config;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    logdir::LogDirectory,
    protokernel::config::Config,
    runtime::{
        fail::Fail,
        logging,
        scheduler::{
            Scheduler,
            SharedScheduler,
        },
        timer::SharedWakeTimer,
    },
};
use ::std::time::Instant;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Both subsystems under one roof. They share the clock and nothing else.
pub struct Kernel {
    scheduler: SharedScheduler,
    log_directory: LogDirectory,
    timer: SharedWakeTimer,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Kernel {
    pub fn new(config: &Config) -> Result<Self, Fail> {
        logging::initialize();
        let timer: SharedWakeTimer = SharedWakeTimer::new(Instant::now());
        let scheduler: SharedScheduler = SharedScheduler::new(Scheduler::new(
            config.activity_pool_size()?,
            config.resched_quantum()?,
            timer.clone(),
        ));
        let log_directory: LogDirectory = LogDirectory::new(config.log_dir_entries()?);
        Ok(Self {
            scheduler,
            log_directory,
            timer,
        })
    }

    /// Shared handle to the scheduler for device models and keepers.
    pub fn scheduler(&self) -> SharedScheduler {
        self.scheduler.clone()
    }

    pub fn log_directory(&mut self) -> &mut LogDirectory {
        &mut self.log_directory
    }

    /// Drives time for every timed behavior in the kernel.
    pub fn advance_clock(&mut self, now: Instant) {
        self.scheduler.advance_clock(now);
    }

    pub fn now(&self) -> Instant {
        self.timer.now()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
