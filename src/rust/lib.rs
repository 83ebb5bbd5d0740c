// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod logdir;
pub mod protokernel;
pub mod runtime;

pub use self::{
    logdir::{
        descriptor::{
            Generation,
            Lid,
            ObjectDescriptor,
            Oid,
        },
        LogDirectory,
    },
    protokernel::{
        config::Config,
        Kernel,
    },
    runtime::{
        fail::Fail,
        scheduler::{
            ActivityId,
            ActivityState,
            Directive,
            Fault,
            FaultCode,
            Priority,
            Process,
            ProcessId,
            ProcessKey,
            ReserveId,
            SchedPolicy,
            Scheduler,
            SharedScheduler,
            StallQueueId,
        },
        timer::SharedWakeTimer,
    },
};

/// Ensures that two expressions are equal, otherwise bails out of the calling test.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        r#"ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`"#,
                        left_val,
                        right_val
                    );
                }
            },
        }
    };
}

/// Ensures that two expressions are not equal, otherwise bails out of the calling test.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        r#"ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`"#,
                        left_val,
                        right_val
                    );
                }
            },
        }
    };
}
