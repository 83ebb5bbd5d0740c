// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The log directory: answers, for any object id, where the most recent copy
//! of that object lives in the on-disk log and in which checkpoint
//! generation. Entries of the open generation live in the working tree;
//! everything older lives in the log tree; every entry is also threaded into
//! a per-generation chain so evicting a generation never scans the trees.

mod arena;
pub mod descriptor;
mod gentable;
mod tree;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    logdir::{
        arena::{
            EntryArena,
            EntryId,
        },
        descriptor::{
            Generation,
            Lid,
            ObjectDescriptor,
            Oid,
        },
        gentable::{
            bucket_index,
            GenTable,
        },
        tree::RbTree,
    },
    runtime::fail::Fail,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Directory of object locations, partitioned by generation.
pub struct LogDirectory {
    /// Fixed pool all entries live in.
    arena: EntryArena,
    /// Entries of the open (highest) generation.
    working: RbTree,
    /// Entries of every closed generation.
    log: RbTree,
    /// Generation chains for bulk eviction and scans.
    gens: GenTable,
    /// The open generation; 0 until the first record.
    highest: Generation,
    /// Most recently retired (migrated and checkpointed) generation.
    retired: Generation,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl LogDirectory {
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: EntryArena::new(capacity),
            working: RbTree::new(),
            log: RbTree::new(),
            gens: GenTable::new(),
            highest: Generation::default(),
            retired: Generation::default(),
        }
    }

    /// Records (or re-records) the location of one object in a generation.
    /// A generation above the highest seen opens a new generation first:
    /// every working entry migrates into the log tree and the bucket table
    /// shifts down, merging anything pushed past the window into the
    /// catch-all bucket.
    pub fn record_location(&mut self, od: ObjectDescriptor, generation: Generation) -> Result<(), Fail> {
        if generation == 0 {
            let cause: String = "generation numbers start at 1".to_string();
            error!("record_location(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if generation > self.highest {
            self.open_generation(generation);
        }

        let to_working: bool = generation == self.highest;
        let bucket: usize = bucket_index(self.highest, generation);

        // Upsert in the target tree: no structural change, rechain only if
        // the bucket moved.
        let target: &RbTree = if to_working { &self.working } else { &self.log };
        if let Some(id) = target.find(&self.arena, od.oid) {
            // An older record must not roll back a newer closed-generation
            // entry.
            if generation < self.arena[id].generation {
                trace!(
                    "record_location(): stale record ignored: oid={}, generation={}",
                    od.oid,
                    generation
                );
                return Ok(());
            }
            self.update_in_place(id, od, generation, bucket);
            return Ok(());
        }

        if to_working {
            // The oid may still sit in the log tree from an older generation;
            // the directory holds one entry per oid, so the node moves.
            if let Some(id) = self.log.find(&self.arena, od.oid) {
                self.log.remove(&mut self.arena, id);
                self.update_in_place(id, od, generation, bucket);
                self.working.insert(&mut self.arena, id);
                return Ok(());
            }
        } else if self.working.find(&self.arena, od.oid).is_some() {
            // A record for a closed generation arriving after the open
            // generation already re-recorded this oid is stale.
            trace!(
                "record_location(): stale record ignored: oid={}, generation={}",
                od.oid,
                generation
            );
            return Ok(());
        }

        let id: EntryId = self.arena.alloc(od, generation)?;
        self.gens.chain(&mut self.arena, bucket, id);
        if to_working {
            self.working.insert(&mut self.arena, id);
        } else {
            self.log.insert(&mut self.arena, id);
        }
        trace!(
            "record_location(): new entry: oid={}, generation={}, bucket={}",
            od.oid,
            generation,
            bucket
        );
        Ok(())
    }

    /// Most recent descriptor recorded for an oid, working tree first.
    pub fn find_object(&self, oid: Oid) -> Option<ObjectDescriptor> {
        self.working
            .find(&self.arena, oid)
            .or_else(|| self.log.find(&self.arena, oid))
            .map(|id: EntryId| self.arena[id].od)
    }

    /// Location of an oid for journal recovery. Only an entry recorded after
    /// the last retired generation and before the queried one still needs to
    /// be replayed from the log; anything at or past the query is too new and
    /// anything retired is already checkpointed.
    pub fn find_object_for_journal(&self, oid: Oid, generation: Generation) -> Option<Lid> {
        let id: EntryId = self
            .working
            .find(&self.arena, oid)
            .or_else(|| self.log.find(&self.arena, oid))?;
        let recorded: Generation = self.arena[id].generation;
        if recorded <= self.retired || recorded >= generation {
            return None;
        }
        Some(self.arena[id].od.log_loc)
    }

    /// Starts the scan of a generation's bucket and returns its first
    /// descriptor. One active scan per generation at a time.
    pub fn find_first_object(&mut self, generation: Generation) -> Option<ObjectDescriptor> {
        if generation > self.highest {
            return None;
        }
        let bucket: usize = bucket_index(self.highest, generation);
        self.gens.reset_scan(bucket);
        self.find_next_object(generation)
    }

    /// Returns the next descriptor of an in-progress generation scan.
    pub fn find_next_object(&mut self, generation: Generation) -> Option<ObjectDescriptor> {
        if generation > self.highest {
            return None;
        }
        let bucket: usize = bucket_index(self.highest, generation);
        let id: EntryId = self.gens.scan_next(&self.arena, bucket)?;
        Some(self.arena[id].od)
    }

    /// Evicts every entry in a generation's bucket: full red-black deletion
    /// of the head's successor until the chain collapses, then the final
    /// entry. Cost is proportional to the bucket's size, not the directory's.
    pub fn clear_generation(&mut self, generation: Generation) {
        if generation > self.highest {
            return;
        }
        let bucket: usize = bucket_index(self.highest, generation);
        while let Some(head) = self.gens.head(bucket) {
            let next: EntryId = self.arena[head].next;
            let victim: EntryId = if next == head { head } else { next };
            self.gens.unchain(&mut self.arena, bucket, victim);
            self.remove_from_tree(victim);
            self.arena.free(victim);
        }
        trace!("clear_generation(): generation={}, bucket={}", generation, bucket);
    }

    /// Point delete of one oid, wherever it lives. No-op if absent.
    pub fn remove_object_entry(&mut self, oid: Oid) {
        let id: EntryId = match self
            .working
            .find(&self.arena, oid)
            .or_else(|| self.log.find(&self.arena, oid))
        {
            Some(id) => id,
            None => return,
        };
        let bucket: usize = bucket_index(self.highest, self.arena[id].generation);
        self.gens.unchain(&mut self.arena, bucket, id);
        self.remove_from_tree(id);
        self.arena.free(id);
    }

    /// Records that a generation has been migrated and checkpointed.
    /// Monotonic.
    pub fn generation_retired(&mut self, generation: Generation) {
        if generation > self.retired {
            self.retired = generation;
        }
    }

    pub fn last_retired_generation(&self) -> Generation {
        self.retired
    }

    /// Number of entries in the open generation.
    pub fn num_working_entries(&self) -> usize {
        self.gens.count(0)
    }

    /// Pool slots not taken by entries younger than the given generation.
    pub fn num_available_entries(&self, generation: Generation) -> usize {
        let bucket: usize = bucket_index(self.highest, generation);
        let younger: usize = (0..bucket).map(|b: usize| self.gens.count(b)).sum();
        self.arena.capacity() - younger
    }

    pub fn highest_generation(&self) -> Generation {
        self.highest
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty() && self.log.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Opens a new highest generation: bulk-migrates the working tree into
    /// the log tree and shifts the bucket table. The chains are untouched by
    /// the migration; the shift re-homes them.
    fn open_generation(&mut self, generation: Generation) {
        if self.highest != 0 {
            let migrated: usize = self.working.len();
            for id in self.gens.entries(&self.arena, 0) {
                self.working.remove(&mut self.arena, id);
                self.log.insert(&mut self.arena, id);
            }
            let delta: usize = (generation - self.highest).min((crate::runtime::limits::LD_MAX_GENERATIONS + 1) as u64)
                as usize;
            self.gens.shift(&mut self.arena, delta);
            trace!(
                "open_generation(): generation={}, migrated={}, delta={}",
                generation,
                migrated,
                delta
            );
        }
        self.highest = generation;
    }

    /// Removes an entry from whichever tree holds it.
    fn remove_from_tree(&mut self, id: EntryId) {
        let oid: Oid = self.arena[id].od.oid;
        if self.working.find(&self.arena, oid) == Some(id) {
            self.working.remove(&mut self.arena, id);
        } else {
            self.log.remove(&mut self.arena, id);
        }
    }

    /// In-place update of an entry that stays (or lands) in a tree whose
    /// ordering it already satisfies: no rebalance, rechain only on a bucket
    /// change.
    fn update_in_place(&mut self, id: EntryId, od: ObjectDescriptor, generation: Generation, bucket: usize) {
        let old_bucket: usize = bucket_index(self.highest, self.arena[id].generation);
        self.arena[id].od = od;
        self.arena[id].generation = generation;
        if old_bucket != bucket {
            self.gens.unchain(&mut self.arena, old_bucket, id);
            self.gens.chain(&mut self.arena, bucket, id);
        }
    }

    /// Number of entries in both trees; test support.
    #[cfg(test)]
    pub(crate) fn tree_sizes(&self) -> (usize, usize) {
        (self.working.len(), self.log.len())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
