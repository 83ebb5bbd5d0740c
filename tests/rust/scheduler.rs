// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! End-to-end scheduling scenarios driven through the public API: priority
//! dispatch, quantum round-robin, sleep and wake, reserve scheduling, and
//! the recoverable failure paths of the reschedule loop.

use ::anyhow::Result;
use ::protokernel::{
    ensure_eq,
    ActivityId,
    ActivityState,
    Directive,
    Fault,
    FaultCode,
    Priority,
    Process,
    ProcessId,
    Scheduler,
    SchedPolicy,
    SharedWakeTimer,
    StallQueueId,
};
use ::std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

const POOL_SIZE: usize = 64;
const QUANTUM: Duration = Duration::from_millis(10);

//======================================================================================================================
// Test Process
//======================================================================================================================

/// Scripted process state shared between a test and its [TestProcess].
struct ProcState {
    policy: SchedPolicy,
    runnable: bool,
    /// Directives returned by successive prepare calls; empty means Proceed.
    prepare_script: VecDeque<Directive>,
    /// Fault returned (and recorded) by the next prepare call.
    pending_fault: Option<Fault>,
    recorded_fault: Option<Fault>,
    has_keeper: bool,
    keeper_log: Vec<Fault>,
}

struct TestProcess(Rc<RefCell<ProcState>>);

impl ProcState {
    fn new(policy: SchedPolicy) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            policy,
            runnable: true,
            prepare_script: VecDeque::new(),
            pending_fault: None,
            recorded_fault: None,
            has_keeper: false,
            keeper_log: Vec::new(),
        }))
    }
}

impl Process for TestProcess {
    fn sched(&self) -> SchedPolicy {
        self.0.borrow().policy
    }

    fn is_runnable(&self) -> bool {
        let state = self.0.borrow();
        state.runnable && state.recorded_fault.is_none()
    }

    fn prepare(&mut self) -> Result<Directive, Fault> {
        let mut state = self.0.borrow_mut();
        if let Some(fault) = state.pending_fault.take() {
            state.recorded_fault = Some(fault);
            return Err(fault);
        }
        match state.prepare_script.pop_front() {
            Some(directive) => Ok(directive),
            None => Ok(Directive::Proceed),
        }
    }

    fn recorded_fault(&self) -> Option<Fault> {
        self.0.borrow().recorded_fault
    }

    fn fault_to_keeper(&self) -> bool {
        self.0.borrow().has_keeper
    }

    fn invoke_keeper(&mut self, fault: Fault) -> Directive {
        let mut state = self.0.borrow_mut();
        state.keeper_log.push(fault);
        state.recorded_fault = None;
        Directive::Proceed
    }
}

//======================================================================================================================
// Helpers
//======================================================================================================================

fn scheduler() -> Scheduler {
    let timer: SharedWakeTimer = SharedWakeTimer::new(Instant::now());
    Scheduler::new(POOL_SIZE, QUANTUM, timer)
}

/// Registers a scripted process and starts an activity for it.
fn spawn(scheduler: &mut Scheduler, policy: SchedPolicy) -> Result<(ActivityId, ProcessId, Rc<RefCell<ProcState>>)> {
    let state: Rc<RefCell<ProcState>> = ProcState::new(policy);
    let (pid, _) = scheduler.insert_process(Box::new(TestProcess(state.clone())));
    let id: ActivityId = scheduler.start_activity(pid)?;
    Ok((id, pid, state))
}

//======================================================================================================================
// Tests
//======================================================================================================================

/// Among ready activities, the highest priority level always dispatches
/// first, and activities within one level are serviced in FIFO order.
#[test]
fn priority_order_beats_arrival_order() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();

    let (low, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::IDLE))?;
    let (norm_a, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    let (high, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::HIGH))?;
    let (norm_b, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;

    ensure_eq!(scheduler.reschedule(now)?, Some(high));
    ensure_eq!(scheduler.activity_state(high), Some(ActivityState::Running));
    ensure_eq!(scheduler.activity_state(norm_a), Some(ActivityState::Ready));

    scheduler.delete_activity(high)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(norm_a));
    scheduler.delete_activity(norm_a)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(norm_b));
    scheduler.delete_activity(norm_b)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(low));
    Ok(())
}

/// Activities at the never-run level stay queued and are never dispatched,
/// even when nothing else is ready.
#[test]
fn never_priority_activities_are_not_dispatched() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();

    let (parked, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NEVER))?;
    let (normal, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;

    ensure_eq!(scheduler.reschedule(now)?, Some(normal));
    scheduler.delete_activity(normal)?;
    ensure_eq!(scheduler.reschedule(now)?, None);
    ensure_eq!(scheduler.activity_state(parked), Some(ActivityState::Ready));
    Ok(())
}

/// Quantum expiry sends the running activity to the tail of its level and
/// round-robins through its peers.
#[test]
fn quantum_expiry_round_robins_equal_priorities() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let mut now: Instant = scheduler.now();

    let (a, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    let (b, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;

    ensure_eq!(scheduler.reschedule(now)?, Some(a));
    for expected in [b, a, b, a] {
        now += QUANTUM;
        scheduler.advance_clock(now);
        ensure_eq!(scheduler.preemption_requested(), true);
        ensure_eq!(scheduler.reschedule(now)?, Some(expected));
    }
    Ok(())
}

/// Sleeping parks the current activity on a collaborator's stall queue;
/// waking the queue makes every sleeper ready again in order.
#[test]
fn sleep_then_wake_all_restores_fifo_order() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();
    let queue: StallQueueId = scheduler.create_stall_queue();

    let (a, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    let (b, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;

    ensure_eq!(scheduler.reschedule(now)?, Some(a));
    scheduler.sleep_current_on(queue)?;
    ensure_eq!(scheduler.activity_state(a), Some(ActivityState::Stalled));
    ensure_eq!(scheduler.reschedule(now)?, Some(b));
    scheduler.sleep_current_on(queue)?;
    ensure_eq!(scheduler.num_stalled_on(queue), 2);
    ensure_eq!(scheduler.reschedule(now)?, None);

    scheduler.wake_all(queue)?;
    ensure_eq!(scheduler.num_stalled_on(queue), 0);
    ensure_eq!(scheduler.reschedule(now)?, Some(a));
    Ok(())
}

/// A timed sleep wakes by itself when the clock passes the wake time.
#[test]
fn timed_sleep_wakes_on_schedule() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let t0: Instant = scheduler.now();

    let (a, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    ensure_eq!(scheduler.reschedule(t0)?, Some(a));
    scheduler.sleep_current_until(t0 + Duration::from_millis(50))?;
    ensure_eq!(scheduler.reschedule(t0)?, None);

    scheduler.advance_clock(t0 + Duration::from_millis(49));
    ensure_eq!(scheduler.activity_state(a), Some(ActivityState::Stalled));

    scheduler.advance_clock(t0 + Duration::from_millis(50));
    ensure_eq!(scheduler.activity_state(a), Some(ActivityState::Ready));
    ensure_eq!(scheduler.reschedule(scheduler.now())?, Some(a));
    Ok(())
}

/// An early explicit wake cancels the pending timed wake: the stale timer
/// entry never fires, even after the activity has stalled somewhere else.
#[test]
fn early_wake_cancels_the_pending_timer() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let t0: Instant = scheduler.now();
    let queue: StallQueueId = scheduler.create_stall_queue();

    let (a, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    ensure_eq!(scheduler.reschedule(t0)?, Some(a));
    scheduler.sleep_current_until(t0 + Duration::from_millis(50))?;

    // I/O completes early.
    scheduler.wakeup(a)?;
    ensure_eq!(scheduler.reschedule(t0)?, Some(a));

    // The activity stalls again, with no wake time this time.
    scheduler.sleep_current_on(queue)?;
    scheduler.advance_clock(t0 + Duration::from_millis(60));
    ensure_eq!(scheduler.activity_state(a), Some(ActivityState::Stalled));
    ensure_eq!(scheduler.reschedule(scheduler.now())?, None);
    Ok(())
}

/// At the reserve priority level, the active reserve with the earliest
/// deadline runs first.
#[test]
fn reserve_dispatch_is_earliest_deadline_first() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();

    let slow = scheduler.create_reserve(Duration::from_millis(100), Duration::from_millis(20))?;
    let fast = scheduler.create_reserve(Duration::from_millis(50), Duration::from_millis(10))?;

    let (a, ..) = spawn(&mut scheduler, SchedPolicy::Reserve(slow))?;
    let (b, ..) = spawn(&mut scheduler, SchedPolicy::Reserve(fast))?;

    // Both were woken at the same instant, so deadlines are one period out
    // and the shorter period wins.
    ensure_eq!(scheduler.reschedule(now)?, Some(b));
    scheduler.delete_activity(b)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(a));
    Ok(())
}

/// A reserve priority activity outranks plain levels below the reserve
/// level and loses to plain levels above it.
#[test]
fn reserve_level_sits_between_plain_levels() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();

    let rid = scheduler.create_reserve(Duration::from_millis(100), Duration::from_millis(20))?;
    let (normal, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    let (reserved, ..) = spawn(&mut scheduler, SchedPolicy::Reserve(rid))?;
    let (high, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::HIGH))?;

    ensure_eq!(scheduler.reschedule(now)?, Some(high));
    scheduler.delete_activity(high)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(reserved));
    scheduler.delete_activity(reserved)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(normal));
    Ok(())
}

/// A reserve that exhausts its budget stops running until its deadline
/// replenishes it.
#[test]
fn exhausted_reserve_waits_for_its_deadline() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let t0: Instant = scheduler.now();
    let period: Duration = Duration::from_millis(100);
    let budget: Duration = Duration::from_millis(30);

    let rid = scheduler.create_reserve(period, budget)?;
    let (a, ..) = spawn(&mut scheduler, SchedPolicy::Reserve(rid))?;

    ensure_eq!(scheduler.reschedule(t0)?, Some(a));
    // The preemption stamp lands exactly at budget exhaustion.
    ensure_eq!(scheduler.next_time_interrupt(t0), t0 + budget);

    scheduler.advance_clock(t0 + budget);
    ensure_eq!(scheduler.preemption_requested(), true);

    // Requeued with an empty budget: nothing is dispatchable.
    ensure_eq!(scheduler.reschedule(t0 + budget)?, None);
    ensure_eq!(scheduler.activity_state(a), Some(ActivityState::Ready));

    // The deadline replenishes the budget and the activity runs again.
    scheduler.advance_clock(t0 + period);
    ensure_eq!(scheduler.preemption_requested(), true);
    ensure_eq!(scheduler.reschedule(t0 + period)?, Some(a));
    Ok(())
}

/// A rescinded process key is a recoverable condition: the orphaned activity
/// is deleted and the next candidate runs.
#[test]
fn rescinded_binding_deletes_the_activity_and_moves_on() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();

    let (doomed, doomed_pid, _) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::HIGH))?;
    let (survivor, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;

    scheduler.rescind_process(doomed_pid)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(survivor));
    ensure_eq!(scheduler.activity_state(doomed), None);
    ensure_eq!(scheduler.num_activities(), 1);
    Ok(())
}

/// A prepare that stalls (backing resource fault) parks the candidate and
/// the loop chooses again; once woken, the candidate dispatches normally.
#[test]
fn stalling_prepare_parks_the_candidate_and_retries() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();
    let pager_queue: StallQueueId = scheduler.create_stall_queue();

    let (faulting, _, state) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::HIGH))?;
    let (other, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;

    state.borrow_mut().prepare_script.push_back(Directive::Stall {
        queue: pager_queue,
        wake_at: None,
    });

    // The high-priority candidate stalls during prepare, so the scheduler
    // falls through to the lower one in the same pass.
    ensure_eq!(scheduler.reschedule(now)?, Some(other));
    ensure_eq!(scheduler.activity_state(faulting), Some(ActivityState::Stalled));
    ensure_eq!(scheduler.num_stalled_on(pager_queue), 1);

    // The page arrives; the stalled candidate outranks the runner.
    scheduler.wake_all(pager_queue)?;
    ensure_eq!(scheduler.preemption_requested(), true);
    scheduler.yield_current();
    ensure_eq!(scheduler.reschedule(now)?, Some(faulting));
    Ok(())
}

/// A recorded fault goes to the process keeper before dispatch; the keeper
/// resolves it and the activity runs.
#[test]
fn keeper_resolves_a_recorded_fault() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();

    let (a, _, state) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    let fault: Fault = Fault {
        code: FaultCode::MalformedProcess,
        info: 7,
    };
    {
        let mut state = state.borrow_mut();
        state.has_keeper = true;
        state.pending_fault = Some(fault);
    }

    ensure_eq!(scheduler.reschedule(now)?, Some(a));
    ensure_eq!(state.borrow().keeper_log.as_slice(), &[fault]);
    Ok(())
}

/// With no keeper, a faulted activity parks until something clears the
/// fault; it never spins in the dispatch loop.
#[test]
fn keeperless_fault_parks_the_activity() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();

    let (a, _, state) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    state.borrow_mut().pending_fault = Some(Fault {
        code: FaultCode::MalformedProcess,
        info: 0,
    });

    ensure_eq!(scheduler.reschedule(now)?, None);
    ensure_eq!(scheduler.activity_state(a), Some(ActivityState::Stalled));

    // The keeper shows up later and clears the fault.
    {
        let mut state = state.borrow_mut();
        state.recorded_fault = None;
    }
    scheduler.wakeup(a)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(a));
    Ok(())
}

/// Unregistering a process takes its activity with it.
#[test]
fn removing_a_process_deletes_its_activity() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();

    let (a, pid, _) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    ensure_eq!(scheduler.num_activities(), 1);

    scheduler.remove_process(pid)?;
    ensure_eq!(scheduler.activity_state(a), None);
    ensure_eq!(scheduler.num_activities(), 0);
    Ok(())
}

/// Migration hands an activity to another process; the activity adopts the
/// target's scheduling policy. Migrating to nothing deletes the activity.
#[test]
fn migration_rebinds_and_migration_to_none_deletes() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();

    let (a, _, _) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    let target_state = ProcState::new(SchedPolicy::Priority(Priority::HIGH));
    let (target_pid, _) = scheduler.insert_process(Box::new(TestProcess(target_state)));

    scheduler.migrate_to(a, Some(target_pid))?;
    ensure_eq!(scheduler.reschedule(now)?, Some(a));
    // Starting a second activity on the now-occupied target is refused.
    ensure_eq!(scheduler.start_activity(target_pid).unwrap_err().errno, libc::EBUSY);

    scheduler.migrate_to(a, None)?;
    ensure_eq!(scheduler.activity_state(a), None);
    ensure_eq!(scheduler.current_activity(), None);
    Ok(())
}

/// Exhausting the activity pool is an error, not a panic, and deleting an
/// activity makes room again.
#[test]
fn activity_pool_exhaustion_is_recoverable() -> Result<()> {
    let timer: SharedWakeTimer = SharedWakeTimer::new(Instant::now());
    let mut scheduler: Scheduler = Scheduler::new(2, QUANTUM, timer);

    let (a, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;
    spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;

    let state = ProcState::new(SchedPolicy::Priority(Priority::NORMAL));
    let (pid, _) = scheduler.insert_process(Box::new(TestProcess(state)));
    ensure_eq!(scheduler.start_activity(pid).unwrap_err().errno, libc::EAGAIN);

    scheduler.delete_activity(a)?;
    scheduler.start_activity(pid)?;
    Ok(())
}

/// Every activity is in exactly one place at a time: the running one is no
/// longer on any queue, and stalled ones come back exactly once.
#[test]
fn activities_are_never_duplicated_across_queues() -> Result<()> {
    let mut scheduler: Scheduler = scheduler();
    let now: Instant = scheduler.now();
    let queue: StallQueueId = scheduler.create_stall_queue();

    let (a, ..) = spawn(&mut scheduler, SchedPolicy::Priority(Priority::NORMAL))?;

    // Ready -> Running -> Stalled -> Ready -> Running, with a redundant
    // wakeup thrown in at every step.
    scheduler.wakeup(a)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(a));
    scheduler.wakeup(a)?;
    scheduler.sleep_current_on(queue)?;
    scheduler.wakeup(a)?;
    scheduler.wakeup(a)?;
    ensure_eq!(scheduler.reschedule(now)?, Some(a));

    // If any step had left a duplicate behind, a second dispatch would find
    // it; instead the ready set is empty.
    scheduler.sleep_current_on(queue)?;
    ensure_eq!(scheduler.reschedule(now)?, None);
    Ok(())
}
