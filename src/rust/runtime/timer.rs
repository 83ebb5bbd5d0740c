// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::ActivityId,
    SharedObject,
};
use ::std::{
    cmp::Reverse,
    collections::BinaryHeap,
    ops::{
        Deref,
        DerefMut,
    },
    time::Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// One pending timed wake. Entries are not removed on cancellation: the
/// scheduler clears the activity's recorded wake time instead and discards
/// stale entries when they surface.
#[derive(Debug, Copy, Clone)]
pub struct WakeEntry {
    expiry: Instant,
    activity: ActivityId,
}

/// Timer that holds the clock for all timed wakes. Time only advances when
/// advance_clock is called, which keeps every timed behavior deterministic
/// under test.
pub struct WakeTimer {
    now: Instant,
    heap: BinaryHeap<Reverse<WakeEntry>>,
}

pub struct SharedWakeTimer(SharedObject<WakeTimer>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WakeEntry {
    pub fn expiry(&self) -> Instant {
        self.expiry
    }

    pub fn activity(&self) -> ActivityId {
        self.activity
    }
}

impl WakeTimer {
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            heap: BinaryHeap::new(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Registers a wake for `activity` at the absolute time `expiry`.
    pub fn schedule_wake(&mut self, activity: ActivityId, expiry: Instant) {
        let entry: WakeEntry = WakeEntry { expiry, activity };
        self.heap.push(Reverse(entry));
    }

    /// Moves the clock forward. The clock never runs backwards.
    pub fn advance_clock(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Takes out the next wake entry that is due at the current clock, if any.
    pub fn pop_expired(&mut self) -> Option<WakeEntry> {
        if let Some(Reverse(entry)) = self.heap.peek() {
            if entry.expiry <= self.now {
                return self.heap.pop().map(|Reverse(entry)| entry);
            }
        }
        None
    }

    /// Number of heap entries, stale ones included.
    pub fn num_pending(&self) -> usize {
        self.heap.len()
    }
}

impl SharedWakeTimer {
    pub fn new(now: Instant) -> Self {
        Self(SharedObject::new(WakeTimer::new(now)))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl PartialEq for WakeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.expiry == other.expiry
    }
}

impl Eq for WakeEntry {}

impl PartialOrd for WakeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<::std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WakeEntry {
    fn cmp(&self, other: &Self) -> ::std::cmp::Ordering {
        self.expiry.cmp(&other.expiry)
    }
}

impl Deref for SharedWakeTimer {
    type Target = WakeTimer;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedWakeTimer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

impl Clone for SharedWakeTimer {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
