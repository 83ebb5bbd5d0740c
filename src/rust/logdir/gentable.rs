// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Generation bucket table. Every directory entry is threaded into exactly
//! one bucket's circular chain, keyed by how far its generation sits behind
//! the highest one; the oldest bucket is a catch-all for everything beyond
//! the tracked window. Chains are what make evicting a whole generation cost
//! proportional to that generation's size.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    logdir::{
        arena::{
            EntryArena,
            EntryId,
        },
        descriptor::Generation,
    },
    runtime::limits::LD_MAX_GENERATIONS,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// One generation bucket: circular chain head, single scan cursor, entry
/// count.
#[derive(Default)]
struct GenBucket {
    head: Option<EntryId>,
    /// Next entry a scan will return; None when no scan is in progress or
    /// the scan has wrapped. One active scan per bucket at a time.
    cursor: Option<EntryId>,
    count: usize,
}

/// The bucket table: window of tracked deltas plus the catch-all.
pub struct GenTable {
    buckets: [GenBucket; LD_MAX_GENERATIONS + 1],
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Bucket index for a generation, given the highest (open) generation.
pub fn bucket_index(highest: Generation, generation: Generation) -> usize {
    (highest.saturating_sub(generation)).min(LD_MAX_GENERATIONS as u64) as usize
}

impl GenTable {
    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
        }
    }

    pub fn count(&self, bucket: usize) -> usize {
        self.buckets[bucket].count
    }

    pub fn head(&self, bucket: usize) -> Option<EntryId> {
        self.buckets[bucket].head
    }

    /// Threads an entry into a bucket's chain, at the tail (just before the
    /// head).
    pub fn chain(&mut self, arena: &mut EntryArena, bucket: usize, id: EntryId) {
        debug_assert!(!arena[id].is_chained(id));
        match self.buckets[bucket].head {
            None => {
                // First entry: already self-linked.
                self.buckets[bucket].head = Some(id);
            },
            Some(head) => {
                let tail: EntryId = arena[head].prev;
                arena[tail].next = id;
                arena[id].prev = tail;
                arena[id].next = head;
                arena[head].prev = id;
            },
        }
        self.buckets[bucket].count += 1;
    }

    /// Unthreads an entry from a bucket's chain, leaving it self-linked. The
    /// head and any in-progress scan cursor step past the removed entry; a
    /// cursor that would land back on the head ends its scan instead.
    pub fn unchain(&mut self, arena: &mut EntryArena, bucket: usize, id: EntryId) {
        let next: EntryId = arena[id].next;
        if next == id {
            self.buckets[bucket].head = None;
            self.buckets[bucket].cursor = None;
        } else {
            let prev: EntryId = arena[id].prev;
            arena[prev].next = next;
            arena[next].prev = prev;
            if self.buckets[bucket].head == Some(id) {
                self.buckets[bucket].head = Some(next);
            }
            if self.buckets[bucket].cursor == Some(id) {
                self.buckets[bucket].cursor = if self.buckets[bucket].head == Some(next) {
                    None
                } else {
                    Some(next)
                };
            }
        }
        arena[id].prev = id;
        arena[id].next = id;
        self.buckets[bucket].count -= 1;
    }

    /// Starts (or restarts) the single scan of a bucket.
    pub fn reset_scan(&mut self, bucket: usize) {
        self.buckets[bucket].cursor = self.buckets[bucket].head;
    }

    /// Returns the entry under the scan cursor and advances it; the scan ends
    /// when the chain wraps back to the head.
    pub fn scan_next(&mut self, arena: &EntryArena, bucket: usize) -> Option<EntryId> {
        let id: EntryId = self.buckets[bucket].cursor?;
        let next: EntryId = arena[id].next;
        self.buckets[bucket].cursor = if Some(next) == self.buckets[bucket].head {
            None
        } else {
            Some(next)
        };
        Some(id)
    }

    /// Every entry currently in a bucket, in chain order.
    pub fn entries(&self, arena: &EntryArena, bucket: usize) -> Vec<EntryId> {
        let mut out: Vec<EntryId> = Vec::with_capacity(self.buckets[bucket].count);
        let head: EntryId = match self.buckets[bucket].head {
            Some(head) => head,
            None => return out,
        };
        let mut cursor: EntryId = head;
        loop {
            out.push(cursor);
            cursor = arena[cursor].next;
            if cursor == head {
                break;
            }
        }
        out
    }

    /// Shifts the table down by `delta` slots when new generations open:
    /// bucket i becomes bucket i + delta, and buckets pushed past the window
    /// splice into the catch-all. Splicing two circular chains is O(1);
    /// counts add; an in-progress scan of either merged bucket is abandoned.
    pub fn shift(&mut self, arena: &mut EntryArena, delta: usize) {
        if delta == 0 {
            return;
        }
        let mut old: [GenBucket; LD_MAX_GENERATIONS + 1] = ::std::mem::take(&mut self.buckets);
        for i in (0..=LD_MAX_GENERATIONS).rev() {
            let target: usize = (i + delta).min(LD_MAX_GENERATIONS);
            let bucket: GenBucket = ::std::mem::take(&mut old[i]);
            let into: &mut GenBucket = &mut self.buckets[target];
            if into.head.is_none() {
                *into = bucket;
                continue;
            }
            let a_head: EntryId = match into.head {
                Some(head) => head,
                None => continue,
            };
            let b_head: EntryId = match bucket.head {
                Some(head) => head,
                None => continue,
            };
            let a_tail: EntryId = arena[a_head].prev;
            let b_tail: EntryId = arena[b_head].prev;
            arena[a_tail].next = b_head;
            arena[b_head].prev = a_tail;
            arena[b_tail].next = a_head;
            arena[a_head].prev = b_tail;
            into.count += bucket.count;
            into.cursor = None;
        }
    }

    /// Checks the chain invariants for one bucket: the count matches the
    /// chain length and every link is mutual. Test support.
    #[cfg(test)]
    pub fn validate(&self, arena: &EntryArena, bucket: usize) -> ::anyhow::Result<()> {
        use ::anyhow::ensure;
        let entries: Vec<EntryId> = self.entries(arena, bucket);
        ensure!(
            entries.len() == self.buckets[bucket].count,
            "bucket {} count mismatch: chained {}, recorded {}",
            bucket,
            entries.len(),
            self.buckets[bucket].count
        );
        for &id in &entries {
            ensure!(arena[arena[id].next].prev == id, "broken chain link at {:?}", id);
        }
        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
