//! # B+Tree
//!
//! The disk-resident index of the store: an ordered map from [`Dni`] to
//! [`RecordId`]. Every node occupies exactly one database page allocated by
//! the [`Pager`], so the tree and the records it points at live in the same
//! file.
//!
//! ## Node layout
//!
//! **Header** (4 bytes, both node kinds):
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 1    | `node_type` (`0` = internal, `1` = leaf)|
//! | 1      | 1    | reserved                                |
//! | 2..4   | 2    | `key_count` (u16 LE)                    |
//!
//! **Leaf**: `next_leaf: u32 LE` at offset 4, then a sorted array of
//! 12-byte entries `[key u32][page u32][slot u16][reserved u16]` from
//! offset 8. Up to [`MAX_LEAF_KEYS`] entries. Leaves form a singly linked
//! list in key order, groundwork for range scans.
//!
//! **Internal**: an array of [`ORDER`] child page ids from offset 4, then a
//! sorted array of up to [`MAX_INTERNAL_KEYS`] separator keys. A node with
//! `k` keys has `k + 1` valid children. Separators route with left-strict
//! semantics: everything in child `i` is `< keys[i]`, everything to the
//! right is `>= keys[i]`.
//!
//! ## Mutation discipline
//!
//! Operations decode a node into an owned value, mutate it, and write it
//! back. No page borrow is ever held across a [`Pager::alloc`]: allocation
//! can grow the file and remap the window, which invalidates every page
//! reference. After a recursive insert returns a split, the parent is
//! re-read from the pager before it is touched.

use crate::error::{Result, StoreError};
use crate::pager::{PageId, Pager, INVALID_PAGE_ID, PAGE_SIZE};
use crate::types::{Dni, RecordId};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Node type marker for internal (routing) nodes.
const NODE_INTERNAL: u8 = 0;

/// Node type marker for leaf nodes.
const NODE_LEAF: u8 = 1;

/// Size of the node header in bytes.
const NODE_HEADER_SIZE: usize = 4;

/// Size of one serialized leaf entry.
const LEAF_ENTRY_SIZE: usize = 12;

/// Leaf entries start after the header and the `next_leaf` pointer.
const LEAF_ENTRIES_OFF: usize = NODE_HEADER_SIZE + 4;

/// Maximum entries per leaf (340 with 4 KiB pages).
pub const MAX_LEAF_KEYS: usize = (PAGE_SIZE - NODE_HEADER_SIZE - 4) / LEAF_ENTRY_SIZE;

/// Child fan-out of an internal node (511 with 4 KiB pages).
pub const ORDER: usize = (PAGE_SIZE - NODE_HEADER_SIZE) / 8;

/// Maximum separator keys per internal node.
pub const MAX_INTERNAL_KEYS: usize = ORDER - 1;

/// Separator keys start after the header and the full child array.
const KEYS_OFF: usize = NODE_HEADER_SIZE + ORDER * 4;

/// Minimum occupancy of a non-root leaf.
const LEAF_MIN_KEYS: usize = MAX_LEAF_KEYS / 2;

/// Minimum occupancy of a non-root internal node.
const INTERNAL_MIN_KEYS: usize = MAX_INTERNAL_KEYS / 2;

// ---------------------------------------------------------------------------
// Byte helpers
// ---------------------------------------------------------------------------

#[inline]
fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline]
fn write_u16(buf: &mut [u8], off: usize, val: u16) {
    buf[off..off + 2].copy_from_slice(&val.to_le_bytes());
}

#[inline]
fn write_u32(buf: &mut [u8], off: usize, val: u32) {
    buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
}

fn node_type(page: &[u8]) -> u8 {
    page[0]
}

fn key_count(page: &[u8]) -> usize {
    read_u16(page, 2) as usize
}

// ---------------------------------------------------------------------------
// Node codec
// ---------------------------------------------------------------------------

/// One sorted leaf entry.
#[derive(Debug, Clone, Copy)]
struct LeafEntry {
    key: Dni,
    rid: RecordId,
}

/// Decoded form of a leaf page.
struct LeafNode {
    next: PageId,
    entries: Vec<LeafEntry>,
}

/// Decoded form of an internal page. `children.len() == keys.len() + 1`.
struct InternalNode {
    keys: Vec<Dni>,
    children: Vec<PageId>,
}

fn read_leaf(page: &[u8]) -> LeafNode {
    let count = key_count(page);
    let next = read_u32(page, NODE_HEADER_SIZE);
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let off = LEAF_ENTRIES_OFF + i * LEAF_ENTRY_SIZE;
        entries.push(LeafEntry {
            key: read_u32(page, off),
            rid: RecordId {
                page: read_u32(page, off + 4),
                slot: read_u16(page, off + 8),
            },
        });
    }
    LeafNode { next, entries }
}

fn write_leaf(page: &mut [u8], node: &LeafNode) {
    debug_assert!(node.entries.len() <= MAX_LEAF_KEYS);
    page[0] = NODE_LEAF;
    page[1] = 0;
    write_u16(page, 2, node.entries.len() as u16);
    write_u32(page, NODE_HEADER_SIZE, node.next);
    for (i, entry) in node.entries.iter().enumerate() {
        let off = LEAF_ENTRIES_OFF + i * LEAF_ENTRY_SIZE;
        write_u32(page, off, entry.key);
        write_u32(page, off + 4, entry.rid.page);
        write_u16(page, off + 8, entry.rid.slot);
        write_u16(page, off + 10, 0);
    }
}

fn read_internal(page: &[u8]) -> InternalNode {
    let count = key_count(page);
    let mut children = Vec::with_capacity(count + 1);
    for i in 0..=count {
        children.push(read_u32(page, NODE_HEADER_SIZE + i * 4));
    }
    let mut keys = Vec::with_capacity(count);
    for i in 0..count {
        keys.push(read_u32(page, KEYS_OFF + i * 4));
    }
    InternalNode { keys, children }
}

fn write_internal(page: &mut [u8], node: &InternalNode) {
    debug_assert!(node.keys.len() <= MAX_INTERNAL_KEYS);
    debug_assert_eq!(node.children.len(), node.keys.len() + 1);
    page[0] = NODE_INTERNAL;
    page[1] = 0;
    write_u16(page, 2, node.keys.len() as u16);
    for (i, &child) in node.children.iter().enumerate() {
        write_u32(page, NODE_HEADER_SIZE + i * 4, child);
    }
    for (i, &key) in node.keys.iter().enumerate() {
        write_u32(page, KEYS_OFF + i * 4, key);
    }
}

// ---------------------------------------------------------------------------
// BPlusTree
// ---------------------------------------------------------------------------

/// The result a recursive insert hands to its caller when a node split:
/// the promoted separator and the new right sibling.
struct Split {
    key: Dni,
    right: PageId,
}

/// Which side of the underflowing node a sibling sits on.
enum SiblingSide {
    Left,
    Right,
}

/// A sibling chosen to repair an underflow, together with the index of the
/// pivot separator in the parent (the key between the left and right of the
/// pair).
struct Sibling {
    id: PageId,
    pivot: usize,
    side: SiblingSide,
}

/// A B+Tree rooted at a specific page. Holds only the root id; every
/// operation borrows the pager.
pub struct BPlusTree {
    root: PageId,
}

impl BPlusTree {
    /// Create a brand-new, empty tree: one page formatted as an empty leaf.
    pub fn create(pager: &mut Pager) -> Result<Self> {
        let root = pager.alloc()?;
        let node = LeafNode {
            next: INVALID_PAGE_ID,
            entries: Vec::new(),
        };
        write_leaf(pager.page_mut(root)?, &node);
        Ok(BPlusTree { root })
    }

    /// Adopt an existing tree whose root page is already known.
    pub fn open(root: PageId) -> Self {
        BPlusTree { root }
    }

    /// The current root page id (changes on root split and root collapse).
    pub fn root(&self) -> PageId {
        self.root
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Look up a single key.
    pub fn search(&self, pager: &mut Pager, key: Dni) -> Result<Option<RecordId>> {
        let leaf_id = self.find_leaf(pager, key)?;
        let leaf = read_leaf(pager.page(leaf_id)?);
        match leaf.entries.binary_search_by_key(&key, |e| e.key) {
            Ok(i) => Ok(Some(leaf.entries[i].rid)),
            Err(_) => Ok(None),
        }
    }

    /// Walk down to the leaf whose key range covers `key`. Children on
    /// separator equality go right.
    fn find_leaf(&self, pager: &mut Pager, key: Dni) -> Result<PageId> {
        let mut current = self.root;
        loop {
            let page = pager.page(current)?;
            match node_type(page) {
                NODE_LEAF => return Ok(current),
                NODE_INTERNAL => {
                    let node = read_internal(page);
                    let idx = node.keys.partition_point(|&k| k <= key);
                    current = node.children[idx];
                }
                other => {
                    return Err(StoreError::Corrupt(format!(
                        "unknown node type {other} on page {current}"
                    )))
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    /// Insert a key/locator pair. The caller guarantees `key` is not
    /// already present; duplicate prevention lives at the database layer.
    ///
    /// # Errors
    ///
    /// Page allocation failure inside a split escapes the operation; the
    /// tree stays consistent up to the last completed level.
    pub fn insert(&mut self, pager: &mut Pager, key: Dni, rid: RecordId) -> Result<()> {
        if let Some(split) = self.insert_into(pager, self.root, key, rid)? {
            // The root itself split: grow the tree by one level.
            let new_root = pager.alloc()?;
            let node = InternalNode {
                keys: vec![split.key],
                children: vec![self.root, split.right],
            };
            write_internal(pager.page_mut(new_root)?, &node);
            self.root = new_root;
        }
        Ok(())
    }

    /// Recursively insert into the subtree rooted at `page_id`, splitting
    /// on overflow.
    fn insert_into(
        &mut self,
        pager: &mut Pager,
        page_id: PageId,
        key: Dni,
        rid: RecordId,
    ) -> Result<Option<Split>> {
        if node_type(pager.page(page_id)?) == NODE_LEAF {
            let mut leaf = read_leaf(pager.page(page_id)?);
            let pos = leaf.entries.partition_point(|e| e.key < key);
            leaf.entries.insert(pos, LeafEntry { key, rid });

            if leaf.entries.len() <= MAX_LEAF_KEYS {
                write_leaf(pager.page_mut(page_id)?, &leaf);
                return Ok(None);
            }

            // Overflow: split around the midpoint. The first key of the
            // new right leaf is promoted (and kept in the leaf -- internal
            // nodes only route).
            let new_id = pager.alloc()?;
            let mid = leaf.entries.len() / 2;
            let right_entries = leaf.entries.split_off(mid);
            let split_key = right_entries[0].key;
            let right = LeafNode {
                next: leaf.next,
                entries: right_entries,
            };
            leaf.next = new_id;
            write_leaf(pager.page_mut(page_id)?, &leaf);
            write_leaf(pager.page_mut(new_id)?, &right);
            return Ok(Some(Split {
                key: split_key,
                right: new_id,
            }));
        }

        let child = {
            let node = read_internal(pager.page(page_id)?);
            node.children[node.keys.partition_point(|&k| k <= key)]
        };

        let Some(split) = self.insert_into(pager, child, key, rid)? else {
            return Ok(None);
        };

        // The subtree grew and may have remapped the window: re-read this
        // node before touching it.
        let mut node = read_internal(pager.page(page_id)?);
        let pos = node.keys.partition_point(|&k| k < split.key);
        node.keys.insert(pos, split.key);
        node.children.insert(pos + 1, split.right);

        if node.keys.len() <= MAX_INTERNAL_KEYS {
            write_internal(pager.page_mut(page_id)?, &node);
            return Ok(None);
        }

        // Overflow: the middle key moves up, it is not duplicated below.
        let new_id = pager.alloc()?;
        let mid = node.keys.len() / 2;
        let promoted = node.keys[mid];
        let right = InternalNode {
            keys: node.keys.split_off(mid + 1),
            children: node.children.split_off(mid + 1),
        };
        node.keys.truncate(mid);
        write_internal(pager.page_mut(page_id)?, &node);
        write_internal(pager.page_mut(new_id)?, &right);
        Ok(Some(Split {
            key: promoted,
            right: new_id,
        }))
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Remove a key from the tree. Returns `false` if the key was absent.
    ///
    /// Underflowing nodes borrow from or merge with a sibling on the way
    /// back up; an internal root left with zero keys collapses into its
    /// sole child. Deletion never allocates pages.
    pub fn remove(&mut self, pager: &mut Pager, key: Dni) -> Result<bool> {
        let found = self.remove_from(pager, self.root, key, None)?;

        let page = pager.page(self.root)?;
        if node_type(page) == NODE_INTERNAL && key_count(page) == 0 {
            let node = read_internal(page);
            let only_child = node.children[0];
            pager.free(self.root);
            self.root = only_child;
        }
        Ok(found)
    }

    /// Recursive removal. `parent` carries the parent page and this node's
    /// child index within it; `None` marks the root, which is exempt from
    /// the minimum-occupancy rule.
    fn remove_from(
        &mut self,
        pager: &mut Pager,
        page_id: PageId,
        key: Dni,
        parent: Option<(PageId, usize)>,
    ) -> Result<bool> {
        if node_type(pager.page(page_id)?) == NODE_LEAF {
            let mut leaf = read_leaf(pager.page(page_id)?);
            match leaf.entries.binary_search_by_key(&key, |e| e.key) {
                Ok(pos) => {
                    leaf.entries.remove(pos);
                    write_leaf(pager.page_mut(page_id)?, &leaf);
                }
                Err(_) => return Ok(false),
            }
        } else {
            let (child, idx) = {
                let node = read_internal(pager.page(page_id)?);
                let idx = node.keys.partition_point(|&k| k <= key);
                (node.children[idx], idx)
            };
            if !self.remove_from(pager, child, key, Some((page_id, idx)))? {
                return Ok(false);
            }
        }

        let Some((parent_id, index_in_parent)) = parent else {
            return Ok(true);
        };

        // Underflow check on a fresh read: repairing a child above may have
        // rewritten this page.
        let page = pager.page(page_id)?;
        let min = if node_type(page) == NODE_LEAF {
            LEAF_MIN_KEYS
        } else {
            INTERNAL_MIN_KEYS
        };
        if key_count(page) >= min {
            return Ok(true);
        }

        self.repair_underflow(pager, page_id, parent_id, index_in_parent)?;
        Ok(true)
    }

    /// Repair a node below minimum occupancy by redistributing from, or
    /// merging with, a sibling.
    fn repair_underflow(
        &mut self,
        pager: &mut Pager,
        page_id: PageId,
        parent_id: PageId,
        index_in_parent: usize,
    ) -> Result<()> {
        let parent = read_internal(pager.page(parent_id)?);
        let Some(sibling) = find_sibling(&parent, index_in_parent) else {
            // No sibling on either side: the tree is too small to repair.
            return Ok(());
        };

        let sibling_page = pager.page(sibling.id)?;
        let is_leaf = node_type(sibling_page) == NODE_LEAF;
        let spare = key_count(sibling_page)
            > if is_leaf {
                LEAF_MIN_KEYS
            } else {
                INTERNAL_MIN_KEYS
            };

        match (is_leaf, spare) {
            (true, true) => self.redistribute_leaves(pager, page_id, &sibling, parent_id),
            (true, false) => self.merge_leaves(pager, page_id, &sibling, parent_id),
            (false, true) => self.redistribute_internals(pager, page_id, &sibling, parent_id),
            (false, false) => self.merge_internals(pager, page_id, &sibling, parent_id),
        }
    }

    /// Move one entry from a sibling leaf into the underflowing leaf and
    /// refresh the pivot separator.
    fn redistribute_leaves(
        &mut self,
        pager: &mut Pager,
        page_id: PageId,
        sibling: &Sibling,
        parent_id: PageId,
    ) -> Result<()> {
        let mut current = read_leaf(pager.page(page_id)?);
        let mut donor = read_leaf(pager.page(sibling.id)?);
        let mut parent = read_internal(pager.page(parent_id)?);

        match sibling.side {
            SiblingSide::Left => {
                let last = donor.entries.len() - 1;
                current.entries.insert(0, donor.entries[last]);
                donor.entries.truncate(last);
                parent.keys[sibling.pivot] = current.entries[0].key;
            }
            SiblingSide::Right => {
                let borrowed = donor.entries.remove(0);
                current.entries.push(borrowed);
                parent.keys[sibling.pivot] = donor.entries[0].key;
            }
        }

        write_leaf(pager.page_mut(page_id)?, &current);
        write_leaf(pager.page_mut(sibling.id)?, &donor);
        write_internal(pager.page_mut(parent_id)?, &parent);
        Ok(())
    }

    /// Fold the right leaf of the pair into the left one, splice the leaf
    /// chain, drop the pivot from the parent, and free the right page.
    fn merge_leaves(
        &mut self,
        pager: &mut Pager,
        page_id: PageId,
        sibling: &Sibling,
        parent_id: PageId,
    ) -> Result<()> {
        let (left_id, right_id) = match sibling.side {
            SiblingSide::Left => (sibling.id, page_id),
            SiblingSide::Right => (page_id, sibling.id),
        };

        let mut left = read_leaf(pager.page(left_id)?);
        let right = read_leaf(pager.page(right_id)?);
        let mut parent = read_internal(pager.page(parent_id)?);

        left.entries.extend(right.entries.iter().copied());
        left.next = right.next;
        parent.keys.remove(sibling.pivot);
        parent.children.remove(sibling.pivot + 1);

        write_leaf(pager.page_mut(left_id)?, &left);
        write_internal(pager.page_mut(parent_id)?, &parent);
        pager.free(right_id);
        Ok(())
    }

    /// Rotate one key through the pivot between an internal node and its
    /// sibling, moving the adjoining child pointer with it.
    fn redistribute_internals(
        &mut self,
        pager: &mut Pager,
        page_id: PageId,
        sibling: &Sibling,
        parent_id: PageId,
    ) -> Result<()> {
        let mut current = read_internal(pager.page(page_id)?);
        let mut donor = read_internal(pager.page(sibling.id)?);
        let mut parent = read_internal(pager.page(parent_id)?);

        match sibling.side {
            SiblingSide::Left => {
                // Pivot drops to the front of the current node; the donor's
                // last key lifts into the pivot.
                current.keys.insert(0, parent.keys[sibling.pivot]);
                let last_child = donor.children.len() - 1;
                current.children.insert(0, donor.children[last_child]);
                donor.children.truncate(last_child);
                let last_key = donor.keys.len() - 1;
                parent.keys[sibling.pivot] = donor.keys[last_key];
                donor.keys.truncate(last_key);
            }
            SiblingSide::Right => {
                current.keys.push(parent.keys[sibling.pivot]);
                current.children.push(donor.children.remove(0));
                parent.keys[sibling.pivot] = donor.keys.remove(0);
            }
        }

        write_internal(pager.page_mut(page_id)?, &current);
        write_internal(pager.page_mut(sibling.id)?, &donor);
        write_internal(pager.page_mut(parent_id)?, &parent);
        Ok(())
    }

    /// Fold the right internal node of the pair into the left one. The
    /// pivot key descends between the two key runs (internal keys route
    /// only, so it must come down rather than disappear).
    fn merge_internals(
        &mut self,
        pager: &mut Pager,
        page_id: PageId,
        sibling: &Sibling,
        parent_id: PageId,
    ) -> Result<()> {
        let (left_id, right_id) = match sibling.side {
            SiblingSide::Left => (sibling.id, page_id),
            SiblingSide::Right => (page_id, sibling.id),
        };

        let mut left = read_internal(pager.page(left_id)?);
        let right = read_internal(pager.page(right_id)?);
        let mut parent = read_internal(pager.page(parent_id)?);

        left.keys.push(parent.keys[sibling.pivot]);
        left.keys.extend(right.keys.iter().copied());
        left.children.extend(right.children.iter().copied());
        parent.keys.remove(sibling.pivot);
        parent.children.remove(sibling.pivot + 1);

        write_internal(pager.page_mut(left_id)?, &left);
        write_internal(pager.page_mut(parent_id)?, &parent);
        pager.free(right_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------------

    /// All `(key, locator)` pairs in ascending key order, collected by
    /// following the leaf chain from the leftmost leaf.
    pub fn scan(&self, pager: &mut Pager) -> Result<Vec<(Dni, RecordId)>> {
        let mut out = Vec::new();
        let mut current = self.leftmost_leaf(pager)?;
        while current != INVALID_PAGE_ID {
            let leaf = read_leaf(pager.page(current)?);
            out.extend(leaf.entries.iter().map(|e| (e.key, e.rid)));
            current = leaf.next;
        }
        Ok(out)
    }

    /// The first leaf of the chain.
    fn leftmost_leaf(&self, pager: &mut Pager) -> Result<PageId> {
        let mut current = self.root;
        loop {
            let page = pager.page(current)?;
            match node_type(page) {
                NODE_LEAF => return Ok(current),
                NODE_INTERNAL => current = read_internal(page).children[0],
                other => {
                    return Err(StoreError::Corrupt(format!(
                        "unknown node type {other} on page {current}"
                    )))
                }
            }
        }
    }
}

fn find_sibling(parent: &InternalNode, index_in_parent: usize) -> Option<Sibling> {
    if index_in_parent > 0 {
        return Some(Sibling {
            id: parent.children[index_in_parent - 1],
            pivot: index_in_parent - 1,
            side: SiblingSide::Left,
        });
    }
    if index_in_parent < parent.keys.len() {
        return Some(Sibling {
            id: parent.children[index_in_parent + 1],
            pivot: index_in_parent,
            side: SiblingSide::Right,
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_tree() -> (TempDir, Pager, BPlusTree) {
        let dir = TempDir::new().unwrap();
        let mut pager = Pager::open(dir.path().join("tree.db"), 1).unwrap();
        let tree = BPlusTree::create(&mut pager).unwrap();
        (dir, pager, tree)
    }

    fn rid(n: u32) -> RecordId {
        RecordId {
            page: n,
            slot: (n % 7) as u16,
        }
    }

    /// Recursively verify height uniformity, separator correctness, and
    /// minimum occupancy; returns (subtree depth, min key, max key).
    fn check_subtree(
        pager: &mut Pager,
        page_id: PageId,
        is_root: bool,
    ) -> (usize, Option<Dni>, Option<Dni>) {
        let page = pager.page(page_id).unwrap();
        if node_type(page) == NODE_LEAF {
            let leaf = read_leaf(page);
            if !is_root {
                assert!(
                    leaf.entries.len() >= LEAF_MIN_KEYS,
                    "leaf {page_id} below minimum occupancy"
                );
            }
            for pair in leaf.entries.windows(2) {
                assert!(pair[0].key < pair[1].key, "leaf keys not strictly sorted");
            }
            return (
                0,
                leaf.entries.first().map(|e| e.key),
                leaf.entries.last().map(|e| e.key),
            );
        }

        let node = read_internal(page);
        assert_eq!(node.children.len(), node.keys.len() + 1);
        if !is_root {
            assert!(
                node.keys.len() >= INTERNAL_MIN_KEYS,
                "internal {page_id} below minimum occupancy"
            );
        } else {
            assert!(!node.keys.is_empty(), "internal root with no keys");
        }

        let mut depth = None;
        let mut low = None;
        let mut high = None;
        for (i, &child) in node.children.iter().enumerate() {
            let (d, min, max) = check_subtree(pager, child, false);
            match depth {
                None => depth = Some(d),
                Some(expected) => assert_eq!(expected, d, "leaves at unequal depth"),
            }
            if i > 0 {
                // Everything right of separator i-1 is >= it.
                assert!(min.map_or(true, |m| m >= node.keys[i - 1]));
            }
            if i < node.keys.len() {
                // Everything left of separator i is strictly below it.
                assert!(max.map_or(true, |m| m < node.keys[i]));
            }
            if i == 0 {
                low = min;
            }
            high = max.or(high);
        }
        (depth.unwrap_or(0) + 1, low, high)
    }

    fn check_tree(pager: &mut Pager, tree: &BPlusTree, expected_keys: &[Dni]) {
        check_subtree(pager, tree.root(), true);
        let scanned: Vec<Dni> = tree.scan(pager).unwrap().iter().map(|&(k, _)| k).collect();
        assert_eq!(scanned, expected_keys, "leaf chain disagrees");
    }

    // ----- Search / insert ---------------------------------------------

    #[test]
    fn empty_tree_finds_nothing() {
        let (_dir, mut pager, tree) = new_tree();
        assert_eq!(tree.search(&mut pager, 42).unwrap(), None);
        assert_eq!(tree.scan(&mut pager).unwrap(), vec![]);
    }

    #[test]
    fn single_insert_is_found() {
        let (_dir, mut pager, mut tree) = new_tree();
        tree.insert(&mut pager, 10_000_001, rid(9)).unwrap();
        assert_eq!(tree.search(&mut pager, 10_000_001).unwrap(), Some(rid(9)));
        assert_eq!(tree.search(&mut pager, 10_000_002).unwrap(), None);
    }

    #[test]
    fn unsorted_inserts_come_back_sorted() {
        let (_dir, mut pager, mut tree) = new_tree();
        let keys = [50u32, 10, 40, 20, 30, 25, 5, 45];
        for &k in &keys {
            tree.insert(&mut pager, k, rid(k)).unwrap();
        }

        let mut expected: Vec<Dni> = keys.to_vec();
        expected.sort_unstable();
        check_tree(&mut pager, &tree, &expected);
        for &k in &keys {
            assert_eq!(tree.search(&mut pager, k).unwrap(), Some(rid(k)));
        }
    }

    #[test]
    fn first_split_grows_an_internal_root() {
        let (_dir, mut pager, mut tree) = new_tree();
        let old_root = tree.root();

        let n = MAX_LEAF_KEYS as u32 + 1;
        for k in 0..n {
            tree.insert(&mut pager, k, rid(k)).unwrap();
        }

        assert_ne!(tree.root(), old_root);
        assert_eq!(node_type(pager.page(tree.root()).unwrap()), NODE_INTERNAL);
        let expected: Vec<Dni> = (0..n).collect();
        check_tree(&mut pager, &tree, &expected);
    }

    #[test]
    fn values_survive_many_splits() {
        let (_dir, mut pager, mut tree) = new_tree();
        let n = 5_000u32;
        for k in 0..n {
            tree.insert(&mut pager, k * 2, rid(k)).unwrap();
        }

        for k in 0..n {
            assert_eq!(tree.search(&mut pager, k * 2).unwrap(), Some(rid(k)));
            assert_eq!(tree.search(&mut pager, k * 2 + 1).unwrap(), None);
        }
        let expected: Vec<Dni> = (0..n).map(|k| k * 2).collect();
        check_tree(&mut pager, &tree, &expected);
    }

    #[test]
    fn split_propagates_to_a_third_level() {
        let (_dir, mut pager, mut tree) = new_tree();

        // Enough sequential keys to overflow the first internal root.
        let n = (MAX_INTERNAL_KEYS as u32 + 2) * (MAX_LEAF_KEYS as u32 / 2 + 1);
        for k in 0..n {
            tree.insert(&mut pager, k, rid(k)).unwrap();
        }

        // Root must be internal over internal nodes now.
        let root_children = read_internal(pager.page(tree.root()).unwrap()).children;
        assert_eq!(
            node_type(pager.page(root_children[0]).unwrap()),
            NODE_INTERNAL
        );

        check_subtree(&mut pager, tree.root(), true);
        for k in (0..n).step_by(97) {
            assert_eq!(tree.search(&mut pager, k).unwrap(), Some(rid(k)));
        }
    }

    // ----- Delete ------------------------------------------------------

    #[test]
    fn remove_reports_absent_keys() {
        let (_dir, mut pager, mut tree) = new_tree();
        tree.insert(&mut pager, 7, rid(7)).unwrap();
        assert!(!tree.remove(&mut pager, 8).unwrap());
        assert!(tree.remove(&mut pager, 7).unwrap());
        assert!(!tree.remove(&mut pager, 7).unwrap());
    }

    #[test]
    fn removed_key_can_be_reinserted() {
        let (_dir, mut pager, mut tree) = new_tree();
        tree.insert(&mut pager, 33, rid(1)).unwrap();
        assert!(tree.remove(&mut pager, 33).unwrap());
        tree.insert(&mut pager, 33, rid(2)).unwrap();
        assert_eq!(tree.search(&mut pager, 33).unwrap(), Some(rid(2)));
    }

    #[test]
    fn deleting_ascending_exercises_right_siblings() {
        let (_dir, mut pager, mut tree) = new_tree();
        let n = MAX_LEAF_KEYS as u32 * 4;
        for k in 0..n {
            tree.insert(&mut pager, k, rid(k)).unwrap();
        }

        let half = n / 2;
        for k in 0..half {
            assert!(tree.remove(&mut pager, k).unwrap());
            check_subtree(&mut pager, tree.root(), true);
        }

        let expected: Vec<Dni> = (half..n).collect();
        check_tree(&mut pager, &tree, &expected);
    }

    #[test]
    fn deleting_descending_exercises_left_siblings() {
        let (_dir, mut pager, mut tree) = new_tree();
        let n = MAX_LEAF_KEYS as u32 * 4;
        for k in 0..n {
            tree.insert(&mut pager, k, rid(k)).unwrap();
        }

        let half = n / 2;
        for k in (half..n).rev() {
            assert!(tree.remove(&mut pager, k).unwrap());
            check_subtree(&mut pager, tree.root(), true);
        }

        let expected: Vec<Dni> = (0..half).collect();
        check_tree(&mut pager, &tree, &expected);
    }

    #[test]
    fn draining_the_tree_collapses_the_root() {
        let (_dir, mut pager, mut tree) = new_tree();
        let n = MAX_LEAF_KEYS as u32 + 1; // forces one split first
        for k in 0..n {
            tree.insert(&mut pager, k, rid(k)).unwrap();
        }
        assert_eq!(node_type(pager.page(tree.root()).unwrap()), NODE_INTERNAL);

        for k in 0..n {
            assert!(tree.remove(&mut pager, k).unwrap());
        }

        // All keys gone: the root collapsed back to a (possibly empty) leaf.
        assert_eq!(node_type(pager.page(tree.root()).unwrap()), NODE_LEAF);
        assert_eq!(tree.scan(&mut pager).unwrap(), vec![]);

        // The tree remains usable afterwards.
        tree.insert(&mut pager, 5, rid(5)).unwrap();
        assert_eq!(tree.search(&mut pager, 5).unwrap(), Some(rid(5)));
    }

    #[test]
    fn merged_pages_are_recycled() {
        let (_dir, mut pager, mut tree) = new_tree();
        let n = MAX_LEAF_KEYS as u32 * 2;
        for k in 0..n {
            tree.insert(&mut pager, k, rid(k)).unwrap();
        }
        let before = pager.page_count();

        for k in 0..n {
            tree.remove(&mut pager, k).unwrap();
        }

        // Merges freed node pages, so new allocations reuse them instead of
        // growing the file.
        let reused = pager.alloc().unwrap();
        assert!((reused as u64) < before);
        assert_eq!(pager.page_count(), before);
    }

    #[test]
    fn interleaved_inserts_and_deletes_stay_consistent() {
        let (_dir, mut pager, mut tree) = new_tree();
        let mut present = std::collections::BTreeSet::new();

        // A deterministic but scrambled workload.
        let mut x: u32 = 1;
        for _ in 0..4_000 {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let key = x % 2_048;
            if present.contains(&key) {
                assert!(tree.remove(&mut pager, key).unwrap());
                present.remove(&key);
            } else {
                tree.insert(&mut pager, key, rid(key)).unwrap();
                present.insert(key);
            }
        }

        let expected: Vec<Dni> = present.iter().copied().collect();
        check_tree(&mut pager, &tree, &expected);
    }

    // ----- Persistence -------------------------------------------------

    #[test]
    fn reopened_tree_keeps_its_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.db");
        let root;

        {
            let mut pager = Pager::open(&path, 1).unwrap();
            let mut tree = BPlusTree::create(&mut pager).unwrap();
            for k in 0..1_000u32 {
                tree.insert(&mut pager, k, rid(k)).unwrap();
            }
            root = tree.root();
            pager.close().unwrap();
        }

        let mut pager = Pager::open(&path, 0).unwrap();
        let tree = BPlusTree::open(root);
        for k in 0..1_000u32 {
            assert_eq!(tree.search(&mut pager, k).unwrap(), Some(rid(k)));
        }
        check_subtree(&mut pager, tree.root(), true);
    }
}
