// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::fmt;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Object identifier. The directory's sort key; unique, so ties cannot occur.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone)]
pub struct Oid(u64);

/// Location of an object in the on-disk log. The directory only stores these;
/// writing the log is a collaborator's concern.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct Lid(u64);

/// Checkpoint epoch number. Generations observed by the directory are
/// non-decreasing except within the open (highest) generation.
pub type Generation = u64;

/// Where one object currently lives, with its versioning counters.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct ObjectDescriptor {
    pub oid: Oid,
    pub alloc_count: u32,
    pub call_count: u32,
    pub log_loc: Lid,
    pub alloc_count_used: bool,
    pub call_count_used: bool,
    pub obj_type: u8,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ObjectDescriptor {
    pub fn new(oid: Oid, log_loc: Lid) -> Self {
        Self {
            oid,
            alloc_count: 0,
            call_count: 0,
            log_loc,
            alloc_count_used: false,
            call_count_used: false,
            obj_type: 0,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u64> for Oid {
    fn from(raw: u64) -> Self {
        Oid(raw)
    }
}

impl From<Oid> for u64 {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl From<u64> for Lid {
    fn from(raw: u64) -> Self {
        Lid(raw)
    }
}

impl From<Lid> for u64 {
    fn from(lid: Lid) -> Self {
        lid.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
