// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        activity::ActivityId,
        queue::{
            Priority,
            StallQueueId,
        },
        reserve::ReserveId,
    },
};
use ::slab::Slab;
use ::std::{
    collections::HashMap,
    time::Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies one registered process.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct ProcessId(usize);

/// Rescindable key naming a process. Rescinding a process issues a new key
/// and leaves every outstanding copy of the old one dangling.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct ProcessKey(u64);

/// Scheduling policy a process runs under.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SchedPolicy {
    /// Fixed-priority scheduling at the given level.
    Priority(Priority),
    /// Scheduling under the given CPU reserve.
    Reserve(ReserveId),
}

/// Kind of fault a process can take while being prepared.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum FaultCode {
    /// The process image is not well formed.
    MalformedProcess,
    /// The process names a scheduling resource that no longer exists.
    BadSchedule,
    /// The process holds an invalid capability where a valid one is required.
    InvalidCapability,
}

/// One fault, with fault-specific companion data.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct Fault {
    pub code: FaultCode,
    pub info: u64,
}

/// What the dispatcher should do with an activity after preparing its
/// process.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum Directive {
    /// Dispatch the activity.
    Proceed,
    /// Park the activity on the given stall queue, optionally scheduling a
    /// timed wake.
    Stall {
        queue: StallQueueId,
        wake_at: Option<Instant>,
    },
}

/// A schedulable process. The dispatcher prepares the process before every
/// dispatch and routes any fault to the process keeper.
pub trait Process {
    /// Scheduling policy the process wants its activity to run under.
    fn sched(&self) -> SchedPolicy;

    /// Whether the process is in a state that can execute.
    fn is_runnable(&self) -> bool;

    /// Brings the process to a dispatchable state.
    fn prepare(&mut self) -> Result<Directive, Fault>;

    /// Fault recorded on the process, if any.
    fn recorded_fault(&self) -> Option<Fault>;

    /// Whether faults on this process should be delivered to its keeper.
    fn fault_to_keeper(&self) -> bool;

    /// Delivers a fault to the process keeper and reports how to proceed.
    fn invoke_keeper(&mut self, fault: Fault) -> Directive;
}

/// Registry slot for one process.
pub struct ProcessEntry {
    pub(super) process: Box<dyn Process>,
    /// Back reference to the activity animating this process, if any.
    pub(super) activity: Option<ActivityId>,
    /// Key currently naming this process.
    pub(super) key: ProcessKey,
}

/// Registry of processes with key-based lookup.
pub struct ProcessTable {
    table: Slab<ProcessEntry>,
    keys: HashMap<ProcessKey, ProcessId>,
    next_key: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ProcessEntry {
    pub fn process(&self) -> &dyn Process {
        self.process.as_ref()
    }

    pub fn process_mut(&mut self) -> &mut dyn Process {
        self.process.as_mut()
    }

    pub fn activity(&self) -> Option<ActivityId> {
        self.activity
    }

    pub fn key(&self) -> ProcessKey {
        self.key
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            table: Slab::new(),
            keys: HashMap::new(),
            next_key: 1,
        }
    }

    fn issue_key(&mut self) -> ProcessKey {
        let key: ProcessKey = ProcessKey(self.next_key);
        self.next_key += 1;
        key
    }

    /// Registers a process and issues its first key.
    pub fn insert(&mut self, process: Box<dyn Process>) -> (ProcessId, ProcessKey) {
        let key: ProcessKey = self.issue_key();
        let entry: ProcessEntry = ProcessEntry {
            process,
            activity: None,
            key,
        };
        let pid: ProcessId = ProcessId(self.table.insert(entry));
        self.keys.insert(key, pid);
        (pid, key)
    }

    /// Unregisters a process. Its key stops resolving.
    pub fn remove(&mut self, pid: ProcessId) -> Option<ProcessEntry> {
        let entry: ProcessEntry = self.table.try_remove(pid.0)?;
        self.keys.remove(&entry.key);
        Some(entry)
    }

    /// Rescinds a process: every outstanding copy of the old key stops
    /// resolving and a fresh key is issued.
    pub fn rescind(&mut self, pid: ProcessId) -> Result<ProcessKey, Fail> {
        let new_key: ProcessKey = self.issue_key();
        match self.table.get_mut(pid.0) {
            Some(entry) => {
                self.keys.remove(&entry.key);
                entry.key = new_key;
                self.keys.insert(new_key, pid);
                trace!("rescind(): pid={:?}, key={:?}", pid, new_key);
                Ok(new_key)
            },
            None => {
                let cause: String = format!("no such process: pid={:?}", pid);
                error!("rescind(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    /// Resolves a key to the process it names, if the key is still good.
    pub fn resolve(&self, key: ProcessKey) -> Option<ProcessId> {
        self.keys.get(&key).copied()
    }

    pub fn get(&self, pid: ProcessId) -> Option<&ProcessEntry> {
        self.table.get(pid.0)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut ProcessEntry> {
        self.table.get_mut(pid.0)
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.table.contains(pid.0)
    }

    /// Points a process at the activity animating it.
    pub fn bind_activity(&mut self, pid: ProcessId, id: Option<ActivityId>) {
        if let Some(entry) = self.table.get_mut(pid.0) {
            entry.activity = id;
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for ProcessId {
    fn from(index: usize) -> Self {
        ProcessId(index)
    }
}

impl From<ProcessId> for usize {
    fn from(pid: ProcessId) -> Self {
        pid.0
    }
}

impl From<u64> for ProcessKey {
    fn from(raw: u64) -> Self {
        ProcessKey(raw)
    }
}

impl From<ProcessKey> for u64 {
    fn from(key: ProcessKey) -> Self {
        key.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
