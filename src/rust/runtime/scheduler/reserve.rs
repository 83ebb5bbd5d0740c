// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::activity::ActivityId,
};
use ::slab::Slab;
use ::std::{
    cmp::Reverse,
    collections::{
        BinaryHeap,
        VecDeque,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies one CPU reserve.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct ReserveId(usize);

/// One CPU reserve: a periodic budget of processor time with its own FIFO of
/// waiting activities. Dispatch at the reserve level picks the active reserve
/// with the earliest deadline.
pub struct Reserve {
    /// Replenishment period.
    period: Duration,
    /// Budget granted per period.
    duration: Duration,
    /// Time consumed in the current period.
    time_acc: Duration,
    /// Time consumed over the reserve's lifetime.
    total_time_acc: Duration,
    /// Deadline of the current period.
    next_deadline: Instant,
    /// When the reserve's current client was dispatched, if it is running.
    last_sched: Option<Instant>,
    /// When the reserve last gave up the processor.
    last_desched: Option<Instant>,
    /// Whether the reserve may be picked by deadline scan.
    active: bool,
    /// Whether a replenishment is pending for `next_deadline`.
    awaiting_replenish: bool,
    /// Activities waiting to run under this reserve.
    queue: VecDeque<ActivityId>,
}

/// Entry of the replenishment heap. Ordering considers the deadline only.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
struct ReplenishEntry {
    deadline: Instant,
    reserve: ReserveId,
}

/// Fixed-capacity table of CPU reserves plus the min-heap of pending
/// replenishments.
pub struct ReserveTable {
    table: Slab<Reserve>,
    capacity: usize,
    /// Pending replenishments, earliest deadline first. Entries go stale when
    /// a wakeup replenishes a reserve out of turn; stale entries are skipped
    /// when popped.
    replenish: BinaryHeap<Reverse<ReplenishEntry>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Reserve {
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn time_acc(&self) -> Duration {
        self.time_acc
    }

    pub fn total_time_acc(&self) -> Duration {
        self.total_time_acc
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn last_desched(&self) -> Option<Instant> {
        self.last_desched
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Budget left in the current period.
    pub fn remaining_budget(&self) -> Duration {
        self.duration.saturating_sub(self.time_acc)
    }

    fn is_exhausted(&self) -> bool {
        self.time_acc >= self.duration
    }
}

impl ReserveTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Slab::with_capacity(capacity),
            capacity,
            replenish: BinaryHeap::new(),
        }
    }

    /// Creates a reserve with a full budget and a deadline one period out.
    pub fn create(&mut self, period: Duration, duration: Duration, now: Instant) -> Result<ReserveId, Fail> {
        if period.is_zero() || duration.is_zero() || duration > period {
            let cause: String = format!("invalid reserve shape: period={:?}, duration={:?}", period, duration);
            error!("create(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if self.table.len() >= self.capacity {
            let cause: String = format!("reserve table exhausted: capacity={}", self.capacity);
            error!("create(): {}", cause);
            return Err(Fail::new(libc::EAGAIN, &cause));
        }
        let reserve: Reserve = Reserve {
            period,
            duration,
            time_acc: Duration::ZERO,
            total_time_acc: Duration::ZERO,
            next_deadline: now + period,
            last_sched: None,
            last_desched: None,
            active: true,
            awaiting_replenish: false,
            queue: VecDeque::new(),
        };
        let index: usize = self.table.insert(reserve);
        Ok(ReserveId(index))
    }

    /// Destroys a reserve that has no waiting activities. Any pending
    /// replenishment entry becomes stale and is skipped when popped.
    pub fn destroy(&mut self, rid: ReserveId) -> Result<(), Fail> {
        match self.table.get(rid.0) {
            Some(reserve) if !reserve.queue.is_empty() => {
                let cause: String = format!("reserve has waiters: rid={:?}", rid);
                error!("destroy(): {}", cause);
                Err(Fail::new(libc::EBUSY, &cause))
            },
            Some(_) => {
                self.table.remove(rid.0);
                Ok(())
            },
            None => {
                let cause: String = format!("no such reserve: rid={:?}", rid);
                error!("destroy(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    pub fn contains(&self, rid: ReserveId) -> bool {
        self.table.contains(rid.0)
    }

    pub fn get(&self, rid: ReserveId) -> Option<&Reserve> {
        self.table.get(rid.0)
    }

    /// Replenishes a reserve because one of its activities woke up: fresh
    /// budget, deadline one period from now, active again.
    pub fn wakeup_replenish(&mut self, rid: ReserveId, now: Instant) -> Result<(), Fail> {
        match self.table.get_mut(rid.0) {
            Some(reserve) => {
                reserve.time_acc = Duration::ZERO;
                reserve.next_deadline = now + reserve.period;
                reserve.active = true;
                reserve.awaiting_replenish = false;
                trace!(
                    "wakeup_replenish(): rid={:?}, next_deadline={:?}",
                    rid,
                    reserve.next_deadline
                );
                Ok(())
            },
            None => {
                let cause: String = format!("no such reserve: rid={:?}", rid);
                error!("wakeup_replenish(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    /// Records the dispatch of an activity holding this reserve.
    pub fn mark_dispatched(&mut self, rid: ReserveId, now: Instant) {
        if let Some(reserve) = self.table.get_mut(rid.0) {
            reserve.last_sched = Some(now);
        }
    }

    /// Charges elapsed running time to the reserve. Idempotent: the second
    /// charge after one dispatch finds no start timestamp and adds nothing.
    pub fn charge(&mut self, rid: ReserveId, now: Instant) {
        if let Some(reserve) = self.table.get_mut(rid.0) {
            if let Some(started) = reserve.last_sched.take() {
                let elapsed: Duration = now.saturating_duration_since(started);
                reserve.time_acc += elapsed;
                reserve.total_time_acc += elapsed;
                reserve.last_desched = Some(now);
                trace!("charge(): rid={:?}, elapsed={:?}, time_acc={:?}", rid, elapsed, reserve.time_acc);
            }
        }
    }

    /// Deactivates a reserve whose budget for the current period is spent and
    /// queues its replenishment. No-op while budget remains or while a
    /// replenishment is already pending.
    pub fn deplenish_if_exhausted(&mut self, rid: ReserveId) {
        if let Some(reserve) = self.table.get_mut(rid.0) {
            if reserve.is_exhausted() && !reserve.awaiting_replenish {
                reserve.active = false;
                reserve.awaiting_replenish = true;
                let entry: ReplenishEntry = ReplenishEntry {
                    deadline: reserve.next_deadline,
                    reserve: rid,
                };
                self.replenish.push(Reverse(entry));
                trace!("deplenish_if_exhausted(): rid={:?}, deadline={:?}", rid, entry.deadline);
            }
        }
    }

    /// Replenishes every reserve whose deadline has passed: fresh budget,
    /// deadline advanced by one period, active again. Returns the reserves
    /// replenished.
    pub fn replenish_due(&mut self, now: Instant) -> Vec<ReserveId> {
        let mut replenished: Vec<ReserveId> = Vec::new();
        while let Some(Reverse(entry)) = self.replenish.peek() {
            if entry.deadline > now {
                break;
            }
            let entry: ReplenishEntry = match self.replenish.pop() {
                Some(Reverse(entry)) => entry,
                None => break,
            };
            match self.table.get_mut(entry.reserve.0) {
                Some(reserve) if reserve.awaiting_replenish && reserve.next_deadline == entry.deadline => {
                    reserve.time_acc = Duration::ZERO;
                    reserve.next_deadline += reserve.period;
                    reserve.active = true;
                    reserve.awaiting_replenish = false;
                    trace!(
                        "replenish_due(): rid={:?}, next_deadline={:?}",
                        entry.reserve,
                        reserve.next_deadline
                    );
                    replenished.push(entry.reserve);
                },
                // Stale entry: the reserve was destroyed or replenished by a
                // wakeup since the entry was pushed.
                _ => continue,
            }
        }
        replenished
    }

    /// Earliest pending replenishment deadline, dropping stale heap heads.
    pub fn next_replenish_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.replenish.peek() {
            match self.table.get(entry.reserve.0) {
                Some(reserve) if reserve.awaiting_replenish && reserve.next_deadline == entry.deadline => {
                    return Some(entry.deadline);
                },
                _ => {
                    self.replenish.pop();
                },
            }
        }
        None
    }

    /// Active reserve with the earliest deadline among those with waiting
    /// activities. Linear scan: the table is small.
    pub fn earliest_active_with_waiters(&self) -> Option<ReserveId> {
        self.table
            .iter()
            .filter(|(_, reserve): &(usize, &Reserve)| reserve.active && !reserve.queue.is_empty())
            .min_by_key(|(_, reserve): &(usize, &Reserve)| reserve.next_deadline)
            .map(|(index, _): (usize, &Reserve)| ReserveId(index))
    }

    /// Appends an activity to a reserve's FIFO.
    pub fn push_waiter(&mut self, rid: ReserveId, id: ActivityId) -> Result<(), Fail> {
        match self.table.get_mut(rid.0) {
            Some(reserve) => {
                reserve.queue.push_back(id);
                Ok(())
            },
            None => {
                let cause: String = format!("no such reserve: rid={:?}", rid);
                error!("push_waiter(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    /// Takes the head of a reserve's FIFO.
    pub fn pop_waiter(&mut self, rid: ReserveId) -> Option<ActivityId> {
        self.table.get_mut(rid.0).and_then(|reserve: &mut Reserve| reserve.queue.pop_front())
    }

    /// Unlinks a specific activity from a reserve's FIFO.
    pub fn remove_waiter(&mut self, rid: ReserveId, id: ActivityId) -> bool {
        match self.table.get_mut(rid.0) {
            Some(reserve) => match reserve.queue.iter().position(|waiter: &ActivityId| *waiter == id) {
                Some(index) => {
                    reserve.queue.remove(index);
                    true
                },
                None => false,
            },
            None => false,
        }
    }

    pub fn num_waiters(&self, rid: ReserveId) -> usize {
        self.table.get(rid.0).map_or(0, |reserve: &Reserve| reserve.queue.len())
    }

    /// Whether any active reserve has waiting activities.
    pub fn has_dispatchable(&self) -> bool {
        self.table
            .iter()
            .any(|(_, reserve): (usize, &Reserve)| reserve.active && !reserve.queue.is_empty())
    }

    #[cfg(test)]
    pub fn has_waiter(&self, rid: ReserveId, id: ActivityId) -> bool {
        self.table
            .get(rid.0)
            .map_or(false, |reserve: &Reserve| reserve.queue.contains(&id))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for ReserveId {
    fn from(index: usize) -> Self {
        ReserveId(index)
    }
}

impl From<ReserveId> for usize {
    fn from(rid: ReserveId) -> Self {
        rid.0
    }
}

impl PartialOrd for ReplenishEntry {
    fn partial_cmp(&self, other: &Self) -> Option<::std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReplenishEntry {
    fn cmp(&self, other: &Self) -> ::std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
