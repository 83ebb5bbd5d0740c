// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! End-to-end log directory scenarios driven through the public API:
//! recording and re-recording object locations, generation turnover,
//! scans, bulk eviction, and pool exhaustion.

use ::anyhow::Result;
use ::protokernel::{
    ensure_eq,
    Lid,
    LogDirectory,
    ObjectDescriptor,
    Oid,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::collections::HashMap;

//======================================================================================================================
// Helpers
//======================================================================================================================

fn od(oid: u64, log_loc: u64) -> ObjectDescriptor {
    ObjectDescriptor::new(Oid::from(oid), Lid::from(log_loc))
}

fn loc(dir: &LogDirectory, oid: u64) -> Option<u64> {
    dir.find_object(Oid::from(oid)).map(|od: ObjectDescriptor| od.log_loc.into())
}

//======================================================================================================================
// Tests
//======================================================================================================================

/// The canonical lifecycle: record an object, re-record it at a new log
/// location, turn the generation over, scan and evict the old generation.
#[test]
fn record_update_turnover_scan_and_evict() -> Result<()> {
    let mut dir: LogDirectory = LogDirectory::new(64);

    dir.record_location(od(5, 17), 1)?;
    ensure_eq!(loc(&dir, 5), Some(17));

    // The object gets rewritten within the same generation.
    dir.record_location(od(5, 99), 1)?;
    ensure_eq!(loc(&dir, 5), Some(99));
    ensure_eq!(dir.len(), 1);

    // A record in generation 2 closes generation 1.
    dir.record_location(od(7, 3), 2)?;
    ensure_eq!(dir.highest_generation(), 2);
    ensure_eq!(dir.num_working_entries(), 1);

    // Generation 1 scans to exactly its own entry.
    ensure_eq!(dir.find_first_object(1).map(|od: ObjectDescriptor| od.oid), Some(Oid::from(5)));
    ensure_eq!(dir.find_next_object(1).is_none(), true);

    dir.clear_generation(1);
    ensure_eq!(loc(&dir, 5), None);
    ensure_eq!(loc(&dir, 7), Some(3));
    ensure_eq!(dir.len(), 1);
    Ok(())
}

/// Re-recording never allocates: the entry count is stable across updates,
/// including an update that pulls an old generation's entry forward into
/// the open one.
#[test]
fn rerecording_reuses_the_existing_entry() -> Result<()> {
    let mut dir: LogDirectory = LogDirectory::new(8);

    dir.record_location(od(1, 10), 1)?;
    dir.record_location(od(2, 20), 2)?;
    ensure_eq!(dir.len(), 2);

    dir.record_location(od(1, 11), 2)?;
    ensure_eq!(dir.len(), 2);
    ensure_eq!(loc(&dir, 1), Some(11));
    ensure_eq!(dir.num_working_entries(), 2);
    Ok(())
}

/// Clearing one generation leaves every other generation untouched.
#[test]
fn eviction_is_isolated_to_one_generation() -> Result<()> {
    let mut dir: LogDirectory = LogDirectory::new(64);

    for oid in 0..5u64 {
        dir.record_location(od(oid, oid), 1)?;
    }
    for oid in 10..13u64 {
        dir.record_location(od(oid, oid), 2)?;
    }
    for oid in 20..24u64 {
        dir.record_location(od(oid, oid), 3)?;
    }
    ensure_eq!(dir.len(), 12);

    dir.clear_generation(2);
    ensure_eq!(dir.len(), 9);
    for oid in 0..5u64 {
        ensure_eq!(loc(&dir, oid), Some(oid));
    }
    for oid in 10..13u64 {
        ensure_eq!(loc(&dir, oid), None);
    }
    for oid in 20..24u64 {
        ensure_eq!(loc(&dir, oid), Some(oid));
    }
    Ok(())
}

/// Scanning a generation enumerates each of its entries exactly once and
/// then reports exhaustion.
#[test]
fn scans_enumerate_each_entry_once() -> Result<()> {
    let mut dir: LogDirectory = LogDirectory::new(64);
    for oid in 0..10u64 {
        dir.record_location(od(oid, 100 + oid), 1)?;
    }
    dir.record_location(od(99, 0), 2)?;

    let mut seen: Vec<u64> = Vec::new();
    let mut next: Option<ObjectDescriptor> = dir.find_first_object(1);
    while let Some(od) = next {
        seen.push(od.oid.into());
        next = dir.find_next_object(1);
    }
    seen.sort_unstable();
    ensure_eq!(seen, (0..10u64).collect::<Vec<u64>>());
    ensure_eq!(dir.find_next_object(1).is_none(), true);
    Ok(())
}

/// A generation jump far past the bucket window merges everything old into
/// the catch-all; old entries stay findable and evict together.
#[test]
fn distant_generation_jump_merges_old_generations() -> Result<()> {
    let mut dir: LogDirectory = LogDirectory::new(64);

    dir.record_location(od(1, 1), 1)?;
    dir.record_location(od(2, 2), 2)?;
    dir.record_location(od(3, 3), 3)?;

    dir.record_location(od(50, 50), 100)?;
    ensure_eq!(dir.highest_generation(), 100);
    for oid in 1..4u64 {
        ensure_eq!(loc(&dir, oid), Some(oid));
    }

    // Generations 1 through 3 now share the oldest bucket.
    dir.clear_generation(1);
    for oid in 1..4u64 {
        ensure_eq!(loc(&dir, oid), None);
    }
    ensure_eq!(loc(&dir, 50), Some(50));
    Ok(())
}

/// Pool exhaustion surfaces as an error; deleting an entry frees a slot.
#[test]
fn pool_exhaustion_is_recoverable() -> Result<()> {
    let mut dir: LogDirectory = LogDirectory::new(4);
    for oid in 0..4u64 {
        dir.record_location(od(oid, oid), 1)?;
    }
    ensure_eq!(dir.record_location(od(4, 4), 1).unwrap_err().errno, libc::EAGAIN);

    // Updating an existing oid still works at full capacity.
    dir.record_location(od(0, 40), 1)?;
    ensure_eq!(loc(&dir, 0), Some(40));

    dir.remove_object_entry(Oid::from(1));
    dir.record_location(od(4, 4), 1)?;
    ensure_eq!(dir.len(), 4);
    Ok(())
}

/// Retirement bookkeeping follows generation turnover.
#[test]
fn retirement_tracks_the_checkpoint_frontier() -> Result<()> {
    let mut dir: LogDirectory = LogDirectory::new(8);
    dir.record_location(od(1, 1), 1)?;
    dir.record_location(od(2, 2), 2)?;

    ensure_eq!(dir.last_retired_generation(), 0);
    dir.clear_generation(1);
    dir.generation_retired(1);
    ensure_eq!(dir.last_retired_generation(), 1);

    // Out-of-order retirement notifications never move the frontier back.
    dir.generation_retired(1);
    ensure_eq!(dir.last_retired_generation(), 1);
    Ok(())
}

/// Randomized soak against a flat model: interleaved records, updates,
/// point deletes, and generation turnovers, cross-checked oid by oid.
#[test]
fn randomized_workload_matches_a_flat_model() -> Result<()> {
    const OID_SPACE: u64 = 200;
    const STEPS: usize = 4096;

    let mut rng: SmallRng = SmallRng::seed_from_u64(0x1090_0D1E);
    let mut dir: LogDirectory = LogDirectory::new(OID_SPACE as usize);
    let mut model: HashMap<u64, u64> = HashMap::new();
    let mut generation: u64 = 1;

    for step in 0..STEPS {
        match rng.gen_range(0..100) {
            // Record or update an object in the open generation.
            0..=69 => {
                let oid: u64 = rng.gen_range(0..OID_SPACE);
                let log_loc: u64 = step as u64;
                dir.record_location(od(oid, log_loc), generation)?;
                model.insert(oid, log_loc);
            },
            // Point delete.
            70..=84 => {
                let oid: u64 = rng.gen_range(0..OID_SPACE);
                dir.remove_object_entry(Oid::from(oid));
                model.remove(&oid);
            },
            // Turn the generation over, sometimes with a gap.
            _ => {
                generation += rng.gen_range(1..4);
            },
        }
    }

    ensure_eq!(dir.len(), model.len());
    for oid in 0..OID_SPACE {
        ensure_eq!(loc(&dir, oid), model.get(&oid).copied());
    }
    Ok(())
}
