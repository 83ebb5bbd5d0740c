// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    logdir::descriptor::{
        Generation,
        ObjectDescriptor,
    },
    runtime::fail::Fail,
};
use ::slab::Slab;
use ::std::ops::{
    Index,
    IndexMut,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies one directory entry in the arena. Ids are stable for the life
/// of the entry: tree surgery relinks nodes instead of moving payloads.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct EntryId(usize);

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Color {
    Red,
    Black,
}

/// One directory entry. Carries two independent linkages: red-black tree
/// links for ordered lookup, and a circular chain threading every entry of
/// the same generation bucket for O(1) bulk eviction.
pub struct DirEntry {
    /// The descriptor this entry indexes.
    pub(super) od: ObjectDescriptor,
    /// Generation the descriptor was most recently recorded in.
    pub(super) generation: Generation,
    // Red-black tree linkage.
    pub(super) parent: Option<EntryId>,
    pub(super) left: Option<EntryId>,
    pub(super) right: Option<EntryId>,
    pub(super) color: Color,
    // Generation chain linkage. Self-linked when unchained.
    pub(super) prev: EntryId,
    pub(super) next: EntryId,
}

/// Fixed-capacity pool of directory entries.
pub struct EntryArena {
    table: Slab<DirEntry>,
    capacity: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl DirEntry {
    /// Whether the entry is threaded into a generation chain.
    pub(super) fn is_chained(&self, id: EntryId) -> bool {
        self.next != id || self.prev != id
    }
}

impl EntryArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Allocates an entry, failing when the pool is full. Fresh entries are
    /// unchained (self-linked) and outside any tree.
    pub fn alloc(&mut self, od: ObjectDescriptor, generation: Generation) -> Result<EntryId, Fail> {
        if self.table.len() >= self.capacity {
            let cause: String = format!("log directory entry pool exhausted: capacity={}", self.capacity);
            error!("alloc(): {}", cause);
            return Err(Fail::new(libc::EAGAIN, &cause));
        }
        let vacant = self.table.vacant_entry();
        let id: EntryId = EntryId(vacant.key());
        vacant.insert(DirEntry {
            od,
            generation,
            parent: None,
            left: None,
            right: None,
            color: Color::Red,
            prev: id,
            next: id,
        });
        Ok(id)
    }

    /// Returns an entry to the pool. The entry must already be unchained and
    /// out of both trees.
    pub fn free(&mut self, id: EntryId) -> Option<DirEntry> {
        debug_assert!(self.table.get(id.0).map_or(true, |entry: &DirEntry| !entry.is_chained(id)));
        self.table.try_remove(id.0)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Entry access by id. Ids held by the trees and chains are valid by
/// construction; indexing a freed id is a bug and panics like any slab.
impl Index<EntryId> for EntryArena {
    type Output = DirEntry;

    fn index(&self, id: EntryId) -> &Self::Output {
        &self.table[id.0]
    }
}

impl IndexMut<EntryId> for EntryArena {
    fn index_mut(&mut self, id: EntryId) -> &mut Self::Output {
        &mut self.table[id.0]
    }
}

impl From<usize> for EntryId {
    fn from(index: usize) -> Self {
        EntryId(index)
    }
}

impl From<EntryId> for usize {
    fn from(id: EntryId) -> Self {
        id.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
