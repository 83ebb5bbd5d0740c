// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The activity dispatcher. Owns the ready queues, the activity and process
//! tables, the reserve table, and the stall queues, and runs the reschedule
//! state machine: every successful pass through [Scheduler::reschedule] ends
//! with exactly one running, runnable activity bound to a prepared process,
//! or with an empty ready set.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
    scheduler::{
        activity::{
            Activity,
            ActivityId,
            ActivityState,
            ActivityTable,
            Placement,
        },
        process::{
            Directive,
            Fault,
            Process,
            ProcessId,
            ProcessKey,
            ProcessTable,
            SchedPolicy,
        },
        queue::{
            Priority,
            ReadyQueueSet,
            StallQueueId,
            StallQueueTable,
        },
        reserve::{
            ReserveId,
            ReserveTable,
        },
    },
    timer::{
        SharedWakeTimer,
        WakeEntry,
    },
    SharedObject,
};
use ::std::{
    ops::{
        Deref,
        DerefMut,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The activity scheduler for one logical core.
pub struct Scheduler {
    /// Pool of activities.
    activities: ActivityTable,
    /// Registry of processes and their rescindable keys.
    processes: ProcessTable,
    /// The sixteen priority-indexed ready queues.
    ready: ReadyQueueSet,
    /// CPU reserves and their replenishment heap.
    reserves: ReserveTable,
    /// Stall queues, including the two internal ones below.
    stall: StallQueueTable,
    /// Clock and pending timed wakes, shared with the embedding.
    timer: SharedWakeTimer,
    /// Quantum granted to plain-priority activities.
    quantum: Duration,
    /// The single running activity, if any.
    current: Option<ActivityId>,
    /// Deferred-reschedule flag. Never forces an immediate switch; consulted
    /// cooperatively by the embedding.
    resched_requested: bool,
    /// Whether the current activity must be requeued at the tail of its queue
    /// on the next reschedule (quantum expiry or explicit yield).
    requeue_current: bool,
    /// When the running activity should be preempted.
    preempt_at: Option<Instant>,
    /// Internal stall queue for timed sleeps.
    timed_sleep_queue: StallQueueId,
    /// Internal stall queue for activities blocked on an undelivered fault.
    fault_queue: StallQueueId,
}

/// Shared handle to the scheduler. Device models and keepers hold one to wake
/// stalled activities.
pub struct SharedScheduler(SharedObject<Scheduler>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scheduler {
    pub fn new(activity_pool_size: usize, quantum: Duration, timer: SharedWakeTimer) -> Self {
        let mut stall: StallQueueTable = StallQueueTable::new();
        let timed_sleep_queue: StallQueueId = stall.create();
        let fault_queue: StallQueueId = stall.create();
        Self {
            activities: ActivityTable::new(activity_pool_size),
            processes: ProcessTable::new(),
            ready: ReadyQueueSet::new(),
            reserves: ReserveTable::new(limits::MAX_RESERVES),
            stall,
            timer,
            quantum,
            current: None,
            resched_requested: false,
            requeue_current: false,
            preempt_at: None,
            timed_sleep_queue,
            fault_queue,
        }
    }

    //==================================================================================================================
    // Stall-queue management
    //==================================================================================================================

    /// Creates a stall queue for a collaborator to park activities on.
    pub fn create_stall_queue(&mut self) -> StallQueueId {
        self.stall.create()
    }

    /// Destroys an empty stall queue.
    pub fn destroy_stall_queue(&mut self, queue: StallQueueId) -> Result<(), Fail> {
        if queue == self.timed_sleep_queue || queue == self.fault_queue {
            let cause: String = format!("cannot destroy internal stall queue: queue={:?}", queue);
            error!("destroy_stall_queue(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        self.stall.destroy(queue)
    }

    /// Wakes every activity parked on a stall queue.
    pub fn wake_all(&mut self, queue: StallQueueId) -> Result<(), Fail> {
        if !self.stall.contains(queue) {
            let cause: String = format!("no such stall queue: queue={:?}", queue);
            error!("wake_all(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        for id in self.stall.drain(queue) {
            // Drained activities are unqueued before waking so wakeup never
            // sees a stale placement.
            if let Some(activity) = self.activities.get_mut(id) {
                activity.placement = Placement::Unqueued;
            }
            self.wakeup(id)?;
        }
        Ok(())
    }

    //==================================================================================================================
    // Process registry
    //==================================================================================================================

    /// Registers a process and issues its first key.
    pub fn insert_process(&mut self, process: Box<dyn Process>) -> (ProcessId, ProcessKey) {
        self.processes.insert(process)
    }

    /// Unregisters a process, deleting its bound activity.
    pub fn remove_process(&mut self, pid: ProcessId) -> Result<(), Fail> {
        let entry = match self.processes.remove(pid) {
            Some(entry) => entry,
            None => {
                let cause: String = format!("no such process: pid={:?}", pid);
                error!("remove_process(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        if let Some(id) = entry.activity() {
            self.delete_activity(id)?;
        }
        Ok(())
    }

    /// Rescinds a process key: outstanding copies stop resolving and any
    /// activity still holding one takes the invalid-binding path at its next
    /// reschedule.
    pub fn rescind_process(&mut self, pid: ProcessId) -> Result<ProcessKey, Fail> {
        self.processes.rescind(pid)
    }

    //==================================================================================================================
    // Activity lifecycle
    //==================================================================================================================

    /// Allocates an activity holding the given process key. Fresh activities
    /// are stalled and unqueued until first woken.
    pub fn allocate_activity(&mut self, key: ProcessKey) -> Result<ActivityId, Fail> {
        let policy: SchedPolicy = match self.processes.resolve(key) {
            Some(pid) => match self.processes.get(pid) {
                Some(entry) => entry.process().sched(),
                None => SchedPolicy::Priority(Priority::NORMAL),
            },
            None => SchedPolicy::Priority(Priority::NORMAL),
        };
        let id: ActivityId = self.activities.insert(Activity::new(key, policy))?;
        trace!("allocate_activity(): id={:?}, key={:?}", id, key);
        Ok(id)
    }

    /// Allocates an activity, binds it to a registered process, and wakes it.
    pub fn start_activity(&mut self, pid: ProcessId) -> Result<ActivityId, Fail> {
        let key: ProcessKey = match self.processes.get(pid) {
            Some(entry) if entry.activity().is_some() => {
                let cause: String = format!("process already has an activity: pid={:?}", pid);
                error!("start_activity(): {}", cause);
                return Err(Fail::new(libc::EBUSY, &cause));
            },
            Some(entry) => entry.key(),
            None => {
                let cause: String = format!("no such process: pid={:?}", pid);
                error!("start_activity(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let id: ActivityId = self.allocate_activity(key)?;
        if let Some(activity) = self.activities.get_mut(id) {
            activity.bound = Some(pid);
        }
        self.processes.bind_activity(pid, Some(id));
        self.wakeup(id)?;
        Ok(id)
    }

    /// Deletes an activity: unlinks it from wherever it sits, cancels its
    /// pending timed wake, stops reserve accounting, clears the process
    /// backref, and returns the slot to the pool.
    pub fn delete_activity(&mut self, id: ActivityId) -> Result<(), Fail> {
        let (placement, policy, bound): (Placement, SchedPolicy, Option<ProcessId>) = match self.activities.get(id) {
            Some(activity) => (activity.placement, activity.policy, activity.bound),
            None => {
                let cause: String = format!("no such activity: id={:?}", id);
                error!("delete_activity(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match placement {
            Placement::Unqueued => (),
            Placement::ReadyQueue(priority) => {
                self.ready.remove(priority, id);
            },
            Placement::ReserveQueue(rid) => {
                self.reserves.remove_waiter(rid, id);
                if !self.reserves.has_dispatchable() {
                    self.ready.unmark(Priority::RESERVE);
                }
            },
            Placement::StallQueue(queue) => {
                self.stall.remove(queue, id);
            },
        }
        if self.current == Some(id) {
            if let SchedPolicy::Reserve(rid) = policy {
                let now: Instant = self.timer.now();
                self.reserves.charge(rid, now);
            }
            self.current = None;
            self.requeue_current = false;
            self.preempt_at = None;
            self.resched_requested = true;
        }
        if let Some(pid) = bound {
            self.processes.bind_activity(pid, None);
        }
        // Any heap entry for a pending timed wake goes stale with the slot.
        self.activities.remove(id);
        trace!("delete_activity(): id={:?}", id);
        Ok(())
    }

    /// Rebinds an activity to another process; passing None deletes the
    /// activity outright rather than leaving it orphaned.
    pub fn migrate_to(&mut self, id: ActivityId, target: Option<ProcessId>) -> Result<(), Fail> {
        let pid: ProcessId = match target {
            Some(pid) => pid,
            None => return self.delete_activity(id),
        };
        let (key, policy): (ProcessKey, SchedPolicy) = match self.processes.get(pid) {
            Some(entry) if entry.activity().is_some() && entry.activity() != Some(id) => {
                let cause: String = format!("target process already has an activity: pid={:?}", pid);
                error!("migrate_to(): {}", cause);
                return Err(Fail::new(libc::EBUSY, &cause));
            },
            Some(entry) => (entry.key(), entry.process().sched()),
            None => {
                let cause: String = format!("no such process: pid={:?}", pid);
                error!("migrate_to(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let (old_bound, placement, state): (Option<ProcessId>, Placement, ActivityState) =
            match self.activities.get(id) {
                Some(activity) => (activity.bound, activity.placement, activity.state),
                None => {
                    let cause: String = format!("no such activity: id={:?}", id);
                    error!("migrate_to(): {}", cause);
                    return Err(Fail::new(libc::EINVAL, &cause));
                },
            };
        if let Some(old_pid) = old_bound {
            if old_pid != pid {
                self.processes.bind_activity(old_pid, None);
            }
        }
        // A ready activity queued under the old policy moves to the queue the
        // new policy names.
        let requeue: bool = state == ActivityState::Ready;
        match placement {
            Placement::ReadyQueue(priority) if requeue => {
                self.ready.remove(priority, id);
            },
            Placement::ReserveQueue(rid) if requeue => {
                self.reserves.remove_waiter(rid, id);
                if !self.reserves.has_dispatchable() {
                    self.ready.unmark(Priority::RESERVE);
                }
            },
            _ => (),
        }
        if let Some(activity) = self.activities.get_mut(id) {
            activity.key = key;
            activity.bound = Some(pid);
            activity.policy = policy;
            if requeue {
                activity.placement = Placement::Unqueued;
                activity.state = ActivityState::Stalled;
            }
        }
        self.processes.bind_activity(pid, Some(id));
        if requeue {
            self.wakeup(id)?;
        }
        trace!("migrate_to(): id={:?}, pid={:?}", id, pid);
        Ok(())
    }

    //==================================================================================================================
    // Wake and sleep
    //==================================================================================================================

    /// Wakes an activity. Idempotent if the activity is already ready or
    /// running. Sets the deferred-reschedule flag when the woken activity
    /// outranks the current one.
    pub fn wakeup(&mut self, id: ActivityId) -> Result<(), Fail> {
        let (state, policy, placement): (ActivityState, SchedPolicy, Placement) = match self.activities.get(id) {
            Some(activity) => (activity.state, activity.policy, activity.placement),
            None => {
                let cause: String = format!("no such activity: id={:?}", id);
                error!("wakeup(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        if state != ActivityState::Stalled {
            return Ok(());
        }
        if let Placement::StallQueue(queue) = placement {
            self.stall.remove(queue, id);
        }
        let now: Instant = self.timer.now();
        let new_placement: Placement = match policy {
            SchedPolicy::Priority(priority) => {
                self.ready.enqueue(priority, id);
                Placement::ReadyQueue(priority)
            },
            SchedPolicy::Reserve(rid) => {
                // A wakeup grants the reserve a fresh budget and a deadline
                // one period out.
                self.reserves.wakeup_replenish(rid, now)?;
                self.reserves.push_waiter(rid, id)?;
                self.ready.mark(Priority::RESERVE);
                Placement::ReserveQueue(rid)
            },
        };
        let woken_priority: Priority = match self.activities.get_mut(id) {
            Some(activity) => {
                // A pending timed wake is canceled by clearing the recorded
                // wake time; the heap entry goes stale.
                activity.wake_at = None;
                activity.state = ActivityState::Ready;
                activity.placement = new_placement;
                activity.effective_priority()
            },
            None => return Ok(()),
        };
        let current_priority: Option<Priority> = self
            .current
            .and_then(|current: ActivityId| self.activities.get(current))
            .map(Activity::effective_priority);
        match current_priority {
            Some(priority) if woken_priority <= priority => (),
            _ => self.resched_requested = true,
        }
        trace!("wakeup(): id={:?}, placement={:?}", id, new_placement);
        Ok(())
    }

    /// Stalls the current activity on a stall queue. Only the current
    /// activity may sleep; stalling stops reserve time accounting.
    pub fn sleep_current_on(&mut self, queue: StallQueueId) -> Result<(), Fail> {
        let id: ActivityId = match self.current {
            Some(id) => id,
            None => {
                let cause: String = "no current activity".to_string();
                error!("sleep_current_on(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        if !self.stall.contains(queue) {
            let cause: String = format!("no such stall queue: queue={:?}", queue);
            error!("sleep_current_on(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if let Some(SchedPolicy::Reserve(rid)) = self.activities.get(id).map(|activity: &Activity| activity.policy) {
            let now: Instant = self.timer.now();
            self.reserves.charge(rid, now);
            self.reserves.deplenish_if_exhausted(rid);
        }
        self.stall.push(queue, id)?;
        if let Some(activity) = self.activities.get_mut(id) {
            activity.state = ActivityState::Stalled;
            activity.placement = Placement::StallQueue(queue);
        }
        self.current = None;
        self.requeue_current = false;
        self.preempt_at = None;
        self.resched_requested = true;
        trace!("sleep_current_on(): id={:?}, queue={:?}", id, queue);
        Ok(())
    }

    /// Stalls the current activity until an absolute wake time.
    pub fn sleep_current_until(&mut self, wake_at: Instant) -> Result<(), Fail> {
        let id: ActivityId = match self.current {
            Some(id) => id,
            None => {
                let cause: String = "no current activity".to_string();
                error!("sleep_current_until(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let queue: StallQueueId = self.timed_sleep_queue;
        self.sleep_current_on(queue)?;
        if let Some(activity) = self.activities.get_mut(id) {
            activity.wake_at = Some(wake_at);
        }
        self.timer.schedule_wake(id, wake_at);
        Ok(())
    }

    /// Requests that the current activity give up the processor at the next
    /// reschedule, returning to the tail of its queue.
    pub fn yield_current(&mut self) {
        if self.current.is_some() {
            self.requeue_current = true;
            self.resched_requested = true;
        }
    }

    //==================================================================================================================
    // Reserves
    //==================================================================================================================

    /// Creates a CPU reserve.
    pub fn create_reserve(&mut self, period: Duration, duration: Duration) -> Result<ReserveId, Fail> {
        let now: Instant = self.timer.now();
        self.reserves.create(period, duration, now)
    }

    /// Destroys a CPU reserve with no waiting activities.
    pub fn destroy_reserve(&mut self, rid: ReserveId) -> Result<(), Fail> {
        self.reserves.destroy(rid)
    }

    //==================================================================================================================
    // Dispatch
    //==================================================================================================================

    /// Picks the next activity: most-significant-set-bit scan of the
    /// run-queue bitmap, with the reserve level redirecting to the
    /// earliest-deadline active reserve that has waiters.
    fn choose_new_current(&mut self) -> Option<ActivityId> {
        loop {
            let priority: Priority = self.ready.highest_marked()?;
            let chosen: Option<ActivityId> = if priority == Priority::RESERVE {
                match self.reserves.earliest_active_with_waiters() {
                    Some(rid) => {
                        let head: Option<ActivityId> = self.reserves.pop_waiter(rid);
                        if !self.reserves.has_dispatchable() {
                            self.ready.unmark(Priority::RESERVE);
                        }
                        head
                    },
                    None => {
                        // The advisory bit was set but no active reserve has
                        // waiters; clear it and rescan.
                        self.ready.unmark(Priority::RESERVE);
                        continue;
                    },
                }
            } else {
                match self.ready.dequeue_head(priority) {
                    Some(id) => Some(id),
                    None => {
                        self.ready.unmark(priority);
                        continue;
                    },
                }
            };
            let id: ActivityId = match chosen {
                Some(id) => id,
                None => continue,
            };
            if let Some(activity) = self.activities.get_mut(id) {
                activity.state = ActivityState::Running;
                activity.placement = Placement::Unqueued;
            }
            self.current = Some(id);
            return Some(id);
        }
    }

    /// Parks a chosen-but-not-dispatchable candidate on a stall queue and
    /// clears the current pointer so the dispatch loop can choose again.
    fn park_chosen(&mut self, id: ActivityId, queue: StallQueueId, wake_at: Option<Instant>) -> Result<(), Fail> {
        self.current = None;
        let queue: StallQueueId = if self.stall.contains(queue) { queue } else { self.fault_queue };
        self.stall.push(queue, id)?;
        if let Some(activity) = self.activities.get_mut(id) {
            activity.state = ActivityState::Stalled;
            activity.placement = Placement::StallQueue(queue);
            activity.wake_at = wake_at;
        }
        if let Some(expiry) = wake_at {
            self.timer.schedule_wake(id, expiry);
        }
        Ok(())
    }

    /// The reschedule state machine. Requeues the current activity when it
    /// was flagged to give up the processor, then loops: choose a candidate,
    /// resolve its process key, prepare the process, deliver any pending
    /// fault, and dispatch once the process is runnable. Candidates that
    /// stall or fail resolution leave the ready set, so the loop terminates;
    /// the explicit bound backs that argument up. Returns the dispatched
    /// activity, or None when no activity is ready.
    pub fn reschedule(&mut self, now: Instant) -> Result<Option<ActivityId>, Fail> {
        self.timer.advance_clock(now);
        let now: Instant = self.timer.now();
        if self.requeue_current {
            self.requeue_current = false;
            if let Some(id) = self.current.take() {
                self.requeue_expired(id, now)?;
            }
        }
        self.preempt_at = None;
        self.resched_requested = false;
        let bound: usize = self.activities.capacity() + limits::MAX_RESCHED_ROUNDS_SLACK;
        for _ in 0..bound {
            let id: ActivityId = match self.choose_new_current() {
                Some(id) => id,
                None => return Ok(None),
            };
            let key: ProcessKey = match self.activities.get(id) {
                Some(activity) => activity.key,
                None => {
                    self.current = None;
                    continue;
                },
            };
            // Invalid binding: the key no longer resolves. Recoverable (the
            // activity is deleted and the next candidate is tried), never a
            // panic.
            let pid: ProcessId = match self.processes.resolve(key) {
                Some(pid) => pid,
                None => {
                    warn!("reschedule(): rescinded binding, deleting activity: id={:?}, key={:?}", id, key);
                    self.current = None;
                    self.delete_activity(id)?;
                    continue;
                },
            };
            if let Some(activity) = self.activities.get_mut(id) {
                activity.bound = Some(pid);
            }
            self.processes.bind_activity(pid, Some(id));
            // Prepare may itself stall the activity (backing resource fault);
            // loop back and choose again rather than assume success.
            let fault: Option<Fault> = match self.processes.get_mut(pid) {
                Some(entry) => match entry.process_mut().prepare() {
                    Ok(Directive::Proceed) => entry.process().recorded_fault(),
                    Ok(Directive::Stall { queue, wake_at }) => {
                        self.park_chosen(id, queue, wake_at)?;
                        continue;
                    },
                    Err(fault) => Some(fault),
                },
                None => {
                    self.current = None;
                    self.delete_activity(id)?;
                    continue;
                },
            };
            // A pending fault goes to the process keeper before runnability
            // is rechecked; with no keeper the activity parks until someone
            // resolves the fault.
            if let Some(fault) = fault {
                let directive: Option<Directive> = match self.processes.get_mut(pid) {
                    Some(entry) if entry.process().fault_to_keeper() => Some(entry.process_mut().invoke_keeper(fault)),
                    _ => None,
                };
                match directive {
                    Some(Directive::Proceed) => (),
                    Some(Directive::Stall { queue, wake_at }) => {
                        self.park_chosen(id, queue, wake_at)?;
                        continue;
                    },
                    None => {
                        warn!("reschedule(): keeperless fault, parking activity: id={:?}, fault={:?}", id, fault);
                        let queue: StallQueueId = self.fault_queue;
                        self.park_chosen(id, queue, None)?;
                        continue;
                    },
                }
            }
            let (runnable, policy): (bool, SchedPolicy) = match self.processes.get(pid) {
                Some(entry) => (entry.process().is_runnable(), entry.process().sched()),
                None => (false, SchedPolicy::Priority(Priority::NORMAL)),
            };
            if !runnable {
                warn!("reschedule(): process not runnable after prepare, parking activity: id={:?}", id);
                let queue: StallQueueId = self.fault_queue;
                self.park_chosen(id, queue, None)?;
                continue;
            }
            if let SchedPolicy::Reserve(rid) = policy {
                if !self.reserves.contains(rid) {
                    warn!("reschedule(): stale reserve in policy, parking activity: id={:?}, rid={:?}", id, rid);
                    let queue: StallQueueId = self.fault_queue;
                    self.park_chosen(id, queue, None)?;
                    continue;
                }
            }
            if let Some(activity) = self.activities.get_mut(id) {
                activity.policy = policy;
            }
            if let SchedPolicy::Reserve(rid) = policy {
                self.reserves.mark_dispatched(rid, now);
            }
            self.preempt_at = Some(self.next_time_interrupt(now));
            trace!("reschedule(): dispatched id={:?}, pid={:?}, policy={:?}", id, pid, policy);
            return Ok(Some(id));
        }
        let cause: String = format!("reschedule bound exceeded: bound={}", bound);
        error!("reschedule(): {}", cause);
        Err(Fail::new(libc::EDEADLK, &cause))
    }

    /// Returns a quantum-expired (or yielding) activity to the tail of its
    /// queue, charging and possibly deplenishing its reserve.
    fn requeue_expired(&mut self, id: ActivityId, now: Instant) -> Result<(), Fail> {
        let (state, policy): (ActivityState, SchedPolicy) = match self.activities.get(id) {
            Some(activity) => (activity.state, activity.policy),
            None => return Ok(()),
        };
        if state != ActivityState::Running {
            return Ok(());
        }
        let placement: Placement = match policy {
            SchedPolicy::Priority(priority) => {
                self.ready.enqueue(priority, id);
                Placement::ReadyQueue(priority)
            },
            SchedPolicy::Reserve(rid) => {
                self.reserves.charge(rid, now);
                self.reserves.deplenish_if_exhausted(rid);
                self.reserves.push_waiter(rid, id)?;
                self.ready.mark(Priority::RESERVE);
                Placement::ReserveQueue(rid)
            },
        };
        if let Some(activity) = self.activities.get_mut(id) {
            activity.state = ActivityState::Ready;
            activity.placement = placement;
        }
        Ok(())
    }

    //==================================================================================================================
    // Time
    //==================================================================================================================

    /// Drives the clock: charges the running reserve and flags a reschedule
    /// when the preemption stamp expires, fires due timed wakes, and
    /// replenishes reserves whose deadlines have passed.
    pub fn advance_clock(&mut self, now: Instant) {
        self.timer.advance_clock(now);
        let now: Instant = self.timer.now();
        if let Some(preempt_at) = self.preempt_at {
            if now >= preempt_at {
                self.preempt_at = None;
                if let Some(id) = self.current {
                    if let Some(SchedPolicy::Reserve(rid)) =
                        self.activities.get(id).map(|activity: &Activity| activity.policy)
                    {
                        self.reserves.charge(rid, now);
                    }
                    self.requeue_current = true;
                }
                self.resched_requested = true;
            }
        }
        loop {
            let entry: WakeEntry = match self.timer.pop_expired() {
                Some(entry) => entry,
                None => break,
            };
            let id: ActivityId = entry.activity();
            // Entries invalidated by an early wake or a delete are stale and
            // never fire.
            let live: bool = self
                .activities
                .get(id)
                .map_or(false, |activity: &Activity| activity.wake_at == Some(entry.expiry()));
            if live {
                if let Err(e) = self.wakeup(id) {
                    warn!("advance_clock(): timed wake failed: id={:?}, error={:?}", id, e);
                }
            }
        }
        if !self.reserves.replenish_due(now).is_empty() && self.reserves.has_dispatchable() {
            self.ready.mark(Priority::RESERVE);
            self.resched_requested = true;
        }
    }

    /// Earliest instant at which the scheduler wants the clock driven again:
    /// the running reserve's remaining budget or the plain quantum, capped by
    /// the earliest pending replenishment deadline.
    pub fn next_time_interrupt(&mut self, now: Instant) -> Instant {
        let mut next: Instant = match self
            .current
            .and_then(|id: ActivityId| self.activities.get(id))
            .map(|activity: &Activity| activity.policy)
        {
            Some(SchedPolicy::Reserve(rid)) => match self.reserves.get(rid) {
                Some(reserve) => now + reserve.remaining_budget(),
                None => now + self.quantum,
            },
            _ => now + self.quantum,
        };
        if let Some(deadline) = self.reserves.next_replenish_deadline() {
            if deadline < next {
                next = deadline;
            }
        }
        next
    }

    //==================================================================================================================
    // Accessors
    //==================================================================================================================

    pub fn current_activity(&self) -> Option<ActivityId> {
        self.current
    }

    /// Whether a reschedule has been requested since the last one. Consulted
    /// cooperatively; never forces a context switch by itself.
    pub fn preemption_requested(&self) -> bool {
        self.resched_requested
    }

    pub fn activity_state(&self, id: ActivityId) -> Option<ActivityState> {
        self.activities.get(id).map(Activity::state)
    }

    pub fn num_activities(&self) -> usize {
        self.activities.len()
    }

    pub fn num_stalled_on(&self, queue: StallQueueId) -> usize {
        self.stall.num_waiters(queue)
    }

    pub fn now(&self) -> Instant {
        self.timer.now()
    }
}

impl SharedScheduler {
    pub fn new(scheduler: Scheduler) -> Self {
        Self(SharedObject::new(scheduler))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedScheduler {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedScheduler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

impl Clone for SharedScheduler {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
