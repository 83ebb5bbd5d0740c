// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Duration;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Default capacity of the activity pool.
pub const DEFAULT_ACTIVITY_POOL_SIZE: usize = 256;

/// Maximum number of CPU reserves.
pub const MAX_RESERVES: usize = 32;

/// Scheduling quantum granted to plain-priority activities.
pub const RESCHED_QUANTUM: Duration = Duration::from_millis(10);

/// Number of tracked generation deltas in the log directory. Bucket
/// LD_MAX_GENERATIONS is the catch-all for everything older.
pub const LD_MAX_GENERATIONS: usize = 15;

/// Default capacity of the log-directory entry pool.
pub const DEFAULT_LOG_DIR_ENTRIES: usize = 4096;

/// Bound on reschedule retries. The retry loop removes its candidate from the
/// ready set on every failed round, so the live-activity count is a natural
/// ceiling; exceeding this bound indicates a broken queue invariant.
pub const MAX_RESCHED_ROUNDS_SLACK: usize = 2;
