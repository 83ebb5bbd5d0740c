// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::activity::ActivityId,
};
use ::bit_iter::BitIter;
use ::slab::Slab;
use ::std::collections::VecDeque;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Number of priority levels in the ready-queue set.
pub const NUM_PRIORITY_LEVELS: usize = 16;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Priority level of a ready queue. Level 0 never runs, level 15 is the
/// highest. Level 14 is reserved for CPU-reserve scheduling: its bitmap bit is
/// advisory and the FIFOs for that level live inside the reserves themselves.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone)]
pub struct Priority(u8);

/// Identifies one stall queue.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct StallQueueId(usize);

/// One stall queue: a FIFO of stalled activities waiting for some external
/// condition.
#[derive(Default)]
struct StallQueue {
    waiters: VecDeque<ActivityId>,
}

/// The sixteen priority-indexed ready queues plus the run-queue bitmap that
/// dispatch scans most-significant-bit first.
pub struct ReadyQueueSet {
    queues: [VecDeque<ActivityId>; NUM_PRIORITY_LEVELS],
    /// Bit i is set when level i may have a ready activity. The reserve
    /// level's bit is advisory: it is cleared by dispatch when no active
    /// reserve has waiters.
    map: u32,
}

/// Table of stall queues, allocated by collaborators and by the scheduler
/// itself (timed sleeps, keeperless faults).
pub struct StallQueueTable {
    table: Slab<StallQueue>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Priority {
    /// Activities at this level are never dispatched.
    pub const NEVER: Priority = Priority(0);
    /// Idle activities.
    pub const IDLE: Priority = Priority(1);
    /// Default level for ordinary activities.
    pub const NORMAL: Priority = Priority(8);
    /// Dispatch at this level redirects to the earliest-deadline active reserve.
    pub const RESERVE: Priority = Priority(14);
    /// Highest level.
    pub const HIGH: Priority = Priority(15);

    pub fn level(self) -> usize {
        self.0 as usize
    }
}

impl ReadyQueueSet {
    pub fn new() -> Self {
        Self {
            queues: Default::default(),
            map: 0,
        }
    }

    /// Appends an activity to the tail of a level's FIFO and marks the level.
    pub fn enqueue(&mut self, priority: Priority, id: ActivityId) {
        self.queues[priority.level()].push_back(id);
        self.map |= 1 << priority.level();
    }

    /// Takes the head of a level's FIFO, unmarking the level when it empties.
    pub fn dequeue_head(&mut self, priority: Priority) -> Option<ActivityId> {
        let head: Option<ActivityId> = self.queues[priority.level()].pop_front();
        if self.queues[priority.level()].is_empty() {
            self.map &= !(1 << priority.level());
        }
        head
    }

    /// Unlinks a specific activity from a level's FIFO (delete and migrate
    /// paths reach into the middle of the queue).
    pub fn remove(&mut self, priority: Priority, id: ActivityId) -> bool {
        let queue: &mut VecDeque<ActivityId> = &mut self.queues[priority.level()];
        let found: bool = match queue.iter().position(|waiter: &ActivityId| *waiter == id) {
            Some(index) => {
                queue.remove(index);
                true
            },
            None => false,
        };
        if queue.is_empty() {
            self.map &= !(1 << priority.level());
        }
        found
    }

    /// Highest marked level dispatch may take from. Level 0 is excluded:
    /// activities queued there stay queued until deleted or migrated.
    pub fn highest_marked(&self) -> Option<Priority> {
        let dispatchable: u32 = self.map & !(1 << Priority::NEVER.level());
        if dispatchable == 0 {
            return None;
        }
        Some(Priority((31 - dispatchable.leading_zeros()) as u8))
    }

    pub fn mark(&mut self, priority: Priority) {
        self.map |= 1 << priority.level();
    }

    pub fn unmark(&mut self, priority: Priority) {
        self.map &= !(1 << priority.level());
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.queues[priority.level()].len()
    }

    /// Marked levels, lowest first. Diagnostic use.
    pub fn marked_levels(&self) -> Vec<Priority> {
        BitIter::from(self.map).map(|level: usize| Priority(level as u8)).collect()
    }

    #[cfg(test)]
    pub fn contains(&self, priority: Priority, id: ActivityId) -> bool {
        self.queues[priority.level()].contains(&id)
    }
}

impl StallQueueTable {
    pub fn new() -> Self {
        Self { table: Slab::new() }
    }

    /// Creates an empty stall queue.
    pub fn create(&mut self) -> StallQueueId {
        let index: usize = self.table.insert(StallQueue::default());
        StallQueueId(index)
    }

    /// Destroys an empty stall queue.
    pub fn destroy(&mut self, queue: StallQueueId) -> Result<(), Fail> {
        match self.table.get(queue.0) {
            Some(sq) if !sq.waiters.is_empty() => {
                let cause: String = format!("stall queue has waiters: queue={:?}", queue);
                error!("destroy(): {}", cause);
                Err(Fail::new(libc::EBUSY, &cause))
            },
            Some(_) => {
                self.table.remove(queue.0);
                Ok(())
            },
            None => {
                let cause: String = format!("no such stall queue: queue={:?}", queue);
                error!("destroy(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    pub fn contains(&self, queue: StallQueueId) -> bool {
        self.table.contains(queue.0)
    }

    /// Appends an activity to a stall queue's FIFO.
    pub fn push(&mut self, queue: StallQueueId, id: ActivityId) -> Result<(), Fail> {
        match self.table.get_mut(queue.0) {
            Some(sq) => {
                sq.waiters.push_back(id);
                Ok(())
            },
            None => {
                let cause: String = format!("no such stall queue: queue={:?}", queue);
                error!("push(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    /// Unlinks a specific activity from a stall queue.
    pub fn remove(&mut self, queue: StallQueueId, id: ActivityId) -> bool {
        match self.table.get_mut(queue.0) {
            Some(sq) => match sq.waiters.iter().position(|waiter: &ActivityId| *waiter == id) {
                Some(index) => {
                    sq.waiters.remove(index);
                    true
                },
                None => false,
            },
            None => false,
        }
    }

    /// Takes out every waiter of a stall queue.
    pub fn drain(&mut self, queue: StallQueueId) -> Vec<ActivityId> {
        match self.table.get_mut(queue.0) {
            Some(sq) => sq.waiters.drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn num_waiters(&self, queue: StallQueueId) -> usize {
        self.table.get(queue.0).map_or(0, |sq: &StallQueue| sq.waiters.len())
    }

    #[cfg(test)]
    pub fn has_waiter(&self, queue: StallQueueId, id: ActivityId) -> bool {
        self.table
            .get(queue.0)
            .map_or(false, |sq: &StallQueue| sq.waiters.contains(&id))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u8> for Priority {
    fn from(level: u8) -> Self {
        debug_assert!((level as usize) < NUM_PRIORITY_LEVELS);
        Priority(level)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl From<usize> for StallQueueId {
    fn from(index: usize) -> Self {
        StallQueueId(index)
    }
}

impl From<StallQueueId> for usize {
    fn from(queue: StallQueueId) -> Self {
        queue.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
