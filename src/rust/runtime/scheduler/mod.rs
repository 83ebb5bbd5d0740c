// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod activity;
pub mod process;
pub mod queue;
pub mod reserve;
pub mod scheduler;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    activity::{
        Activity,
        ActivityId,
        ActivityState,
    },
    process::{
        Directive,
        Fault,
        FaultCode,
        Process,
        ProcessId,
        ProcessKey,
        SchedPolicy,
    },
    queue::{
        Priority,
        StallQueueId,
        NUM_PRIORITY_LEVELS,
    },
    reserve::{
        Reserve,
        ReserveId,
    },
    scheduler::{
        Scheduler,
        SharedScheduler,
    },
};
