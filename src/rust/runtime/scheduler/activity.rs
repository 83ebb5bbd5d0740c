// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        process::{
            ProcessId,
            ProcessKey,
            SchedPolicy,
        },
        queue::{
            Priority,
            StallQueueId,
        },
        reserve::ReserveId,
    },
};
use ::slab::Slab;
use ::std::time::Instant;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies one activity in the pool.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct ActivityId(usize);

/// Scheduling state of an allocated activity.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ActivityState {
    /// On a ready queue (or a reserve's FIFO), waiting to be dispatched.
    Ready,
    /// The single current activity.
    Running,
    /// Parked on a stall queue.
    Stalled,
}

/// Which queue currently links an activity. Kept in lockstep with the queue
/// structures so unlinking never has to search.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Placement {
    /// On no queue: the running activity, or one mid-transition.
    Unqueued,
    /// On the ready queue of the given level.
    ReadyQueue(Priority),
    /// On the FIFO of the given reserve.
    ReserveQueue(ReserveId),
    /// On the given stall queue.
    StallQueue(StallQueueId),
}

/// One activity: the schedulable entity that animates a process.
pub struct Activity {
    /// Scheduling state.
    pub(super) state: ActivityState,
    /// Policy the activity is scheduled under. Refreshed from the bound
    /// process at dispatch time.
    pub(super) policy: SchedPolicy,
    /// Rescindable key naming the process this activity animates.
    pub(super) key: ProcessKey,
    /// Cached resolution of `key`. Invalidated when the key is rescinded.
    pub(super) bound: Option<ProcessId>,
    /// Pending timed wake. A popped timer entry is honored only if its expiry
    /// matches this field, which makes cancellation a plain store.
    pub(super) wake_at: Option<Instant>,
    /// Where the activity is linked right now.
    pub(super) placement: Placement,
}

/// Fixed-capacity pool of activities.
pub struct ActivityTable {
    table: Slab<Activity>,
    capacity: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Activity {
    pub fn new(key: ProcessKey, policy: SchedPolicy) -> Self {
        Self {
            state: ActivityState::Stalled,
            policy,
            key,
            bound: None,
            wake_at: None,
            placement: Placement::Unqueued,
        }
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn policy(&self) -> SchedPolicy {
        self.policy
    }

    pub fn key(&self) -> ProcessKey {
        self.key
    }

    /// Level this activity competes at. Reserve-backed activities all compete
    /// at the reserve level regardless of the reserve they hold.
    pub fn effective_priority(&self) -> Priority {
        match self.policy {
            SchedPolicy::Priority(priority) => priority,
            SchedPolicy::Reserve(_) => Priority::RESERVE,
        }
    }
}

impl ActivityTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Allocates an activity, failing when the pool is full.
    pub fn insert(&mut self, activity: Activity) -> Result<ActivityId, Fail> {
        if self.table.len() >= self.capacity {
            let cause: String = format!("activity pool exhausted: capacity={}", self.capacity);
            error!("insert(): {}", cause);
            return Err(Fail::new(libc::EAGAIN, &cause));
        }
        let index: usize = self.table.insert(activity);
        Ok(ActivityId(index))
    }

    pub fn remove(&mut self, id: ActivityId) -> Option<Activity> {
        self.table.try_remove(id.0)
    }

    pub fn get(&self, id: ActivityId) -> Option<&Activity> {
        self.table.get(id.0)
    }

    pub fn get_mut(&mut self, id: ActivityId) -> Option<&mut Activity> {
        self.table.get_mut(id.0)
    }

    pub fn contains(&self, id: ActivityId) -> bool {
        self.table.contains(id.0)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActivityId, &Activity)> {
        self.table.iter().map(|(index, activity)| (ActivityId(index), activity))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for ActivityId {
    fn from(index: usize) -> Self {
        ActivityId(index)
    }
}

impl From<ActivityId> for usize {
    fn from(id: ActivityId) -> Self {
        id.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
