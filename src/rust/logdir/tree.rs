// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Red-black tree engine over the entry arena. Both directory trees share
//! these routines. Absence is `Option<EntryId>` rather than a sentinel node,
//! and deletion relinks the successor structurally, so an entry's id (and its
//! generation chain links) survive any amount of tree surgery.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::logdir::{
    arena::{
        Color,
        EntryArena,
        EntryId,
    },
    descriptor::Oid,
};
use ::std::cmp::Ordering;

//======================================================================================================================
// Structures
//======================================================================================================================

/// One red-black tree rooted in the shared arena.
pub struct RbTree {
    root: Option<EntryId>,
    len: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Color of a possibly-absent node. Absent nodes are black.
fn color_of(arena: &EntryArena, node: Option<EntryId>) -> Color {
    node.map_or(Color::Black, |id: EntryId| arena[id].color)
}

impl RbTree {
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Point lookup by oid.
    pub fn find(&self, arena: &EntryArena, oid: Oid) -> Option<EntryId> {
        let mut cursor: Option<EntryId> = self.root;
        while let Some(id) = cursor {
            cursor = match oid.cmp(&arena[id].od.oid) {
                Ordering::Equal => return Some(id),
                Ordering::Less => arena[id].left,
                Ordering::Greater => arena[id].right,
            };
        }
        None
    }

    /// Inserts an entry already allocated in the arena. The caller guarantees
    /// the oid is not present in this tree. Standard BST descent, then the
    /// insertion fixup climbs back toward the root.
    pub fn insert(&mut self, arena: &mut EntryArena, id: EntryId) {
        let oid: Oid = arena[id].od.oid;
        arena[id].left = None;
        arena[id].right = None;
        arena[id].color = Color::Red;

        let mut parent: Option<EntryId> = None;
        let mut cursor: Option<EntryId> = self.root;
        while let Some(c) = cursor {
            parent = Some(c);
            cursor = if oid < arena[c].od.oid { arena[c].left } else { arena[c].right };
        }
        arena[id].parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(p) => {
                if oid < arena[p].od.oid {
                    arena[p].left = Some(id);
                } else {
                    arena[p].right = Some(id);
                }
            },
        }
        self.len += 1;
        self.insert_fixup(arena, id);
    }

    fn insert_fixup(&mut self, arena: &mut EntryArena, mut z: EntryId) {
        loop {
            let p: EntryId = match arena[z].parent {
                Some(p) if arena[p].color == Color::Red => p,
                _ => break,
            };
            // A red parent is never the root, so the grandparent exists.
            let g: EntryId = match arena[p].parent {
                Some(g) => g,
                None => break,
            };
            if arena[g].left == Some(p) {
                let uncle: Option<EntryId> = arena[g].right;
                if color_of(arena, uncle) == Color::Red {
                    arena[p].color = Color::Black;
                    if let Some(u) = uncle {
                        arena[u].color = Color::Black;
                    }
                    arena[g].color = Color::Red;
                    z = g;
                } else {
                    if arena[p].right == Some(z) {
                        z = p;
                        self.rotate_left(arena, z);
                    }
                    let p: EntryId = match arena[z].parent {
                        Some(p) => p,
                        None => break,
                    };
                    let g: EntryId = match arena[p].parent {
                        Some(g) => g,
                        None => break,
                    };
                    arena[p].color = Color::Black;
                    arena[g].color = Color::Red;
                    self.rotate_right(arena, g);
                }
            } else {
                let uncle: Option<EntryId> = arena[g].left;
                if color_of(arena, uncle) == Color::Red {
                    arena[p].color = Color::Black;
                    if let Some(u) = uncle {
                        arena[u].color = Color::Black;
                    }
                    arena[g].color = Color::Red;
                    z = g;
                } else {
                    if arena[p].left == Some(z) {
                        z = p;
                        self.rotate_right(arena, z);
                    }
                    let p: EntryId = match arena[z].parent {
                        Some(p) => p,
                        None => break,
                    };
                    let g: EntryId = match arena[p].parent {
                        Some(g) => g,
                        None => break,
                    };
                    arena[p].color = Color::Black;
                    arena[g].color = Color::Red;
                    self.rotate_left(arena, g);
                }
            }
        }
        if let Some(root) = self.root {
            arena[root].color = Color::Black;
        }
    }

    /// Removes an entry from the tree without freeing it. The entry's chain
    /// links are untouched; its tree links are cleared on the way out.
    pub fn remove(&mut self, arena: &mut EntryArena, z: EntryId) {
        let mut y: EntryId = z;
        let mut y_color: Color = arena[y].color;
        let x: Option<EntryId>;
        let x_parent: Option<EntryId>;

        if arena[z].left.is_none() {
            x = arena[z].right;
            x_parent = arena[z].parent;
            self.transplant(arena, z, x);
        } else if arena[z].right.is_none() {
            x = arena[z].left;
            x_parent = arena[z].parent;
            self.transplant(arena, z, x);
        } else {
            // Two children: the successor (minimum of the right subtree) is
            // relinked in place of z, taking z's children and color.
            let zr: EntryId = match arena[z].right {
                Some(zr) => zr,
                None => return,
            };
            y = Self::minimum(arena, zr);
            y_color = arena[y].color;
            x = arena[y].right;
            if arena[y].parent == Some(z) {
                x_parent = Some(y);
            } else {
                x_parent = arena[y].parent;
                self.transplant(arena, y, x);
                arena[y].right = arena[z].right;
                if let Some(r) = arena[y].right {
                    arena[r].parent = Some(y);
                }
            }
            self.transplant(arena, z, Some(y));
            arena[y].left = arena[z].left;
            if let Some(l) = arena[y].left {
                arena[l].parent = Some(y);
            }
            arena[y].color = arena[z].color;
        }

        if y_color == Color::Black {
            self.remove_fixup(arena, x, x_parent);
        }
        arena[z].parent = None;
        arena[z].left = None;
        arena[z].right = None;
        arena[z].color = Color::Red;
        self.len -= 1;
    }

    /// Replaces subtree `u` with subtree `v` in u's parent.
    fn transplant(&mut self, arena: &mut EntryArena, u: EntryId, v: Option<EntryId>) {
        match arena[u].parent {
            None => self.root = v,
            Some(p) => {
                if arena[p].left == Some(u) {
                    arena[p].left = v;
                } else {
                    arena[p].right = v;
                }
            },
        }
        if let Some(v) = v {
            arena[v].parent = arena[u].parent;
        }
    }

    /// Restores the black-height invariant after deleting a black node. `x`
    /// carries the extra blackness; it may be absent, so its parent rides
    /// along explicitly.
    fn remove_fixup(&mut self, arena: &mut EntryArena, mut x: Option<EntryId>, mut x_parent: Option<EntryId>) {
        while x != self.root && color_of(arena, x) == Color::Black {
            let p: EntryId = match x_parent {
                Some(p) => p,
                None => break,
            };
            if arena[p].left == x {
                let mut w: EntryId = match arena[p].right {
                    Some(w) => w,
                    None => break,
                };
                if arena[w].color == Color::Red {
                    arena[w].color = Color::Black;
                    arena[p].color = Color::Red;
                    self.rotate_left(arena, p);
                    w = match arena[p].right {
                        Some(w) => w,
                        None => break,
                    };
                }
                if color_of(arena, arena[w].left) == Color::Black && color_of(arena, arena[w].right) == Color::Black {
                    arena[w].color = Color::Red;
                    x = Some(p);
                    x_parent = arena[p].parent;
                } else {
                    if color_of(arena, arena[w].right) == Color::Black {
                        if let Some(wl) = arena[w].left {
                            arena[wl].color = Color::Black;
                        }
                        arena[w].color = Color::Red;
                        self.rotate_right(arena, w);
                        w = match arena[p].right {
                            Some(w) => w,
                            None => break,
                        };
                    }
                    arena[w].color = arena[p].color;
                    arena[p].color = Color::Black;
                    if let Some(wr) = arena[w].right {
                        arena[wr].color = Color::Black;
                    }
                    self.rotate_left(arena, p);
                    x = self.root;
                    x_parent = None;
                }
            } else {
                let mut w: EntryId = match arena[p].left {
                    Some(w) => w,
                    None => break,
                };
                if arena[w].color == Color::Red {
                    arena[w].color = Color::Black;
                    arena[p].color = Color::Red;
                    self.rotate_right(arena, p);
                    w = match arena[p].left {
                        Some(w) => w,
                        None => break,
                    };
                }
                if color_of(arena, arena[w].right) == Color::Black && color_of(arena, arena[w].left) == Color::Black {
                    arena[w].color = Color::Red;
                    x = Some(p);
                    x_parent = arena[p].parent;
                } else {
                    if color_of(arena, arena[w].left) == Color::Black {
                        if let Some(wr) = arena[w].right {
                            arena[wr].color = Color::Black;
                        }
                        arena[w].color = Color::Red;
                        self.rotate_left(arena, w);
                        w = match arena[p].left {
                            Some(w) => w,
                            None => break,
                        };
                    }
                    arena[w].color = arena[p].color;
                    arena[p].color = Color::Black;
                    if let Some(wl) = arena[w].left {
                        arena[wl].color = Color::Black;
                    }
                    self.rotate_right(arena, p);
                    x = self.root;
                    x_parent = None;
                }
            }
        }
        if let Some(x) = x {
            arena[x].color = Color::Black;
        }
    }

    fn rotate_left(&mut self, arena: &mut EntryArena, x: EntryId) {
        let y: EntryId = match arena[x].right {
            Some(y) => y,
            None => return,
        };
        arena[x].right = arena[y].left;
        if let Some(yl) = arena[y].left {
            arena[yl].parent = Some(x);
        }
        arena[y].parent = arena[x].parent;
        match arena[x].parent {
            None => self.root = Some(y),
            Some(p) => {
                if arena[p].left == Some(x) {
                    arena[p].left = Some(y);
                } else {
                    arena[p].right = Some(y);
                }
            },
        }
        arena[y].left = Some(x);
        arena[x].parent = Some(y);
    }

    fn rotate_right(&mut self, arena: &mut EntryArena, x: EntryId) {
        let y: EntryId = match arena[x].left {
            Some(y) => y,
            None => return,
        };
        arena[x].left = arena[y].right;
        if let Some(yr) = arena[y].right {
            arena[yr].parent = Some(x);
        }
        arena[y].parent = arena[x].parent;
        match arena[x].parent {
            None => self.root = Some(y),
            Some(p) => {
                if arena[p].right == Some(x) {
                    arena[p].right = Some(y);
                } else {
                    arena[p].left = Some(y);
                }
            },
        }
        arena[y].right = Some(x);
        arena[x].parent = Some(y);
    }

    fn minimum(arena: &EntryArena, mut id: EntryId) -> EntryId {
        while let Some(l) = arena[id].left {
            id = l;
        }
        id
    }

    /// Checks the red-black invariants: black root, no red node with a red
    /// child, equal black height on every root-to-NIL path, strictly
    /// increasing in-order oids. Test support.
    #[cfg(test)]
    pub fn validate(&self, arena: &EntryArena) -> ::anyhow::Result<()> {
        use ::anyhow::ensure;
        ensure!(color_of(arena, self.root) == Color::Black, "root is not black");
        let mut last_oid: Option<Oid> = None;
        let mut count: usize = 0;
        Self::validate_subtree(arena, self.root, &mut last_oid, &mut count)?;
        ensure!(count == self.len, "len mismatch: counted {}, recorded {}", count, self.len);
        Ok(())
    }

    #[cfg(test)]
    fn validate_subtree(
        arena: &EntryArena,
        node: Option<EntryId>,
        last_oid: &mut Option<Oid>,
        count: &mut usize,
    ) -> ::anyhow::Result<usize> {
        use ::anyhow::ensure;
        let id: EntryId = match node {
            Some(id) => id,
            None => return Ok(1),
        };
        if arena[id].color == Color::Red {
            ensure!(
                color_of(arena, arena[id].left) == Color::Black && color_of(arena, arena[id].right) == Color::Black,
                "red node {:?} has a red child",
                id
            );
        }
        let left_height: usize = Self::validate_subtree(arena, arena[id].left, last_oid, count)?;
        let oid: Oid = arena[id].od.oid;
        if let Some(last) = *last_oid {
            ensure!(last < oid, "in-order oids not strictly increasing at {:?}", id);
        }
        *last_oid = Some(oid);
        *count += 1;
        let right_height: usize = Self::validate_subtree(arena, arena[id].right, last_oid, count)?;
        ensure!(
            left_height == right_height,
            "black height mismatch at {:?}: {} vs {}",
            id,
            left_height,
            right_height
        );
        Ok(left_height + if arena[id].color == Color::Black { 1 } else { 0 })
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::RbTree;
    use crate::logdir::{
        arena::{
            EntryArena,
            EntryId,
        },
        descriptor::{
            Lid,
            ObjectDescriptor,
            Oid,
        },
    };
    use ::anyhow::Result;
    use ::rand::{
        rngs::SmallRng,
        seq::SliceRandom,
        SeedableRng,
    };

    fn od(oid: u64) -> ObjectDescriptor {
        ObjectDescriptor::new(Oid::from(oid), Lid::from(oid * 8))
    }

    #[test]
    fn ascending_inserts_stay_balanced() -> Result<()> {
        let mut arena: EntryArena = EntryArena::new(256);
        let mut tree: RbTree = RbTree::new();

        for oid in 0..256u64 {
            let id: EntryId = arena.alloc(od(oid), 1)?;
            tree.insert(&mut arena, id);
            tree.validate(&arena)?;
        }
        for oid in 0..256u64 {
            crate::ensure_eq!(tree.find(&arena, Oid::from(oid)).is_some(), true);
        }
        crate::ensure_eq!(tree.find(&arena, Oid::from(256)).is_none(), true);
        Ok(())
    }

    #[test]
    fn randomized_inserts_and_removes_hold_invariants() -> Result<()> {
        let mut rng: SmallRng = SmallRng::seed_from_u64(0xC0FFEE);
        let mut arena: EntryArena = EntryArena::new(512);
        let mut tree: RbTree = RbTree::new();

        let mut oids: Vec<u64> = (0..512u64).collect();
        oids.shuffle(&mut rng);
        let mut ids: Vec<(u64, EntryId)> = Vec::new();
        for &oid in &oids {
            let id: EntryId = arena.alloc(od(oid), 1)?;
            tree.insert(&mut arena, id);
            ids.push((oid, id));
        }
        tree.validate(&arena)?;

        ids.shuffle(&mut rng);
        while let Some((oid, id)) = ids.pop() {
            crate::ensure_eq!(tree.find(&arena, Oid::from(oid)), Some(id));
            tree.remove(&mut arena, id);
            arena.free(id);
            tree.validate(&arena)?;
            crate::ensure_eq!(tree.find(&arena, Oid::from(oid)), None);
        }
        crate::ensure_eq!(tree.is_empty(), true);
        Ok(())
    }

    #[test]
    fn removing_a_two_child_node_relinks_the_successor() -> Result<()> {
        let mut arena: EntryArena = EntryArena::new(8);
        let mut tree: RbTree = RbTree::new();

        let mut ids: Vec<EntryId> = Vec::new();
        for oid in [50u64, 25, 75, 10, 30, 60, 90] {
            let id: EntryId = arena.alloc(od(oid), 1)?;
            tree.insert(&mut arena, id);
            ids.push(id);
        }
        // Remove the root; its successor (oid 60) takes its place without
        // any payload moving.
        let root: EntryId = ids[0];
        tree.remove(&mut arena, root);
        arena.free(root);
        tree.validate(&arena)?;

        crate::ensure_eq!(tree.find(&arena, Oid::from(50)), None);
        for oid in [25u64, 75, 10, 30, 60, 90] {
            crate::ensure_eq!(tree.find(&arena, Oid::from(oid)).is_some(), true);
        }
        Ok(())
    }
}
