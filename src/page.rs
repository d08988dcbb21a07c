//! On-disk page layout.
//!
//! Every page is 4096 bytes: a 128-byte header followed by a 3968-byte
//! body. Leaves keep a forward-growing slot array and values packed
//! backward from the end of the page; internal nodes keep a flat branch
//! array with the leftmost child stored in the header.

use crate::types::{Key, PageNum, TrxId};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_SIZE: usize = 128;
pub const SLOT_SIZE: usize = 16;
pub const BRANCH_SIZE: usize = 16;
pub const INITIAL_FREE_SPACE: u64 = (PAGE_SIZE - PAGE_HEADER_SIZE) as u64;

/// Maximum number of children of an internal node.
pub const ORDER: usize = 249;

/// A leaf with at least this much free space is underfull and triggers
/// a merge or redistribution.
pub const THRESHOLD: u64 = 2500;

pub const MIN_VALUE_SIZE: usize = 50;
pub const MAX_VALUE_SIZE: usize = 112;

// Node header offsets.
const OFF_PARENT: usize = 0;
const OFF_IS_LEAF: usize = 8;
const OFF_NUM_KEYS: usize = 12;
const OFF_LSN: usize = 24;
const OFF_FREE_SPACE: usize = 112;
const OFF_SPECIAL: usize = 120;

// Header page offsets.
const OFF_FIRST_FREE: usize = 0;
const OFF_NUM_PAGES: usize = 8;
const OFF_ROOT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub key: Key,
    pub size: u16,
    pub offset: u16,
    pub trx_id: TrxId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Branch {
    pub key: Key,
    pub pagenum: PageNum,
}

/// The header's special field, interpreted by node kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Leaf { right_sibling: PageNum },
    Internal { first_child: PageNum },
}

pub struct Page {
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new() -> Self {
        Self {
            bytes: Box::new([0u8; PAGE_SIZE]),
        }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.bytes
    }

    fn read_u16(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.bytes[off], self.bytes[off + 1]])
    }

    fn write_u16(&mut self, off: usize, v: u16) {
        self.bytes[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn read_i32(&self, off: usize) -> i32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.bytes[off..off + 4]);
        i32::from_le_bytes(b)
    }

    fn write_i32(&mut self, off: usize, v: i32) {
        self.bytes[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn read_u64(&self, off: usize) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.bytes[off..off + 8]);
        u64::from_le_bytes(b)
    }

    fn write_u64(&mut self, off: usize, v: u64) {
        self.bytes[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn read_i64(&self, off: usize) -> i64 {
        self.read_u64(off) as i64
    }

    fn write_i64(&mut self, off: usize, v: i64) {
        self.write_u64(off, v as u64);
    }

    // ------------------------------------------------------------------
    // Header page (pagenum 0)
    // ------------------------------------------------------------------

    pub fn first_free_pagenum(&self) -> PageNum {
        self.read_u64(OFF_FIRST_FREE)
    }

    pub fn set_first_free_pagenum(&mut self, v: PageNum) {
        self.write_u64(OFF_FIRST_FREE, v);
    }

    pub fn number_of_pages(&self) -> u64 {
        self.read_u64(OFF_NUM_PAGES)
    }

    pub fn set_number_of_pages(&mut self, v: u64) {
        self.write_u64(OFF_NUM_PAGES, v);
    }

    pub fn root_pagenum(&self) -> PageNum {
        self.read_u64(OFF_ROOT)
    }

    pub fn set_root_pagenum(&mut self, v: PageNum) {
        self.write_u64(OFF_ROOT, v);
    }

    pub fn init_header(&mut self, first_free: PageNum, number_of_pages: u64, root: PageNum) {
        self.bytes.fill(0);
        self.set_first_free_pagenum(first_free);
        self.set_number_of_pages(number_of_pages);
        self.set_root_pagenum(root);
    }

    // ------------------------------------------------------------------
    // Free page
    // ------------------------------------------------------------------

    pub fn next_free_pagenum(&self) -> PageNum {
        self.read_u64(0)
    }

    pub fn set_next_free_pagenum(&mut self, v: PageNum) {
        self.write_u64(0, v);
    }

    // ------------------------------------------------------------------
    // Node pages (leaf and internal)
    // ------------------------------------------------------------------

    pub fn parent_pagenum(&self) -> PageNum {
        self.read_u64(OFF_PARENT)
    }

    pub fn set_parent_pagenum(&mut self, v: PageNum) {
        self.write_u64(OFF_PARENT, v);
    }

    pub fn is_leaf(&self) -> bool {
        self.read_i32(OFF_IS_LEAF) != 0
    }

    pub fn number_of_keys(&self) -> usize {
        self.read_i32(OFF_NUM_KEYS) as usize
    }

    pub fn set_number_of_keys(&mut self, v: usize) {
        self.write_i32(OFF_NUM_KEYS, v as i32);
    }

    pub fn lsn(&self) -> i64 {
        self.read_i64(OFF_LSN)
    }

    pub fn set_lsn(&mut self, v: i64) {
        self.write_i64(OFF_LSN, v);
    }

    pub fn free_space(&self) -> u64 {
        self.read_u64(OFF_FREE_SPACE)
    }

    pub fn set_free_space(&mut self, v: u64) {
        self.write_u64(OFF_FREE_SPACE, v);
    }

    pub fn used_space(&self) -> u64 {
        INITIAL_FREE_SPACE - self.free_space()
    }

    pub fn node_kind(&self) -> NodeKind {
        let special = self.read_u64(OFF_SPECIAL);
        if self.is_leaf() {
            NodeKind::Leaf {
                right_sibling: special,
            }
        } else {
            NodeKind::Internal {
                first_child: special,
            }
        }
    }

    pub fn right_sibling(&self) -> PageNum {
        debug_assert!(self.is_leaf());
        self.read_u64(OFF_SPECIAL)
    }

    pub fn set_right_sibling(&mut self, v: PageNum) {
        debug_assert!(self.is_leaf());
        self.write_u64(OFF_SPECIAL, v);
    }

    pub fn first_child(&self) -> PageNum {
        debug_assert!(!self.is_leaf());
        self.read_u64(OFF_SPECIAL)
    }

    pub fn set_first_child(&mut self, v: PageNum) {
        debug_assert!(!self.is_leaf());
        self.write_u64(OFF_SPECIAL, v);
    }

    pub fn init_leaf(&mut self, parent: PageNum) {
        self.bytes.fill(0);
        self.write_u64(OFF_PARENT, parent);
        self.write_i32(OFF_IS_LEAF, 1);
        self.set_free_space(INITIAL_FREE_SPACE);
    }

    pub fn init_internal(&mut self, parent: PageNum, first_child: PageNum) {
        self.bytes.fill(0);
        self.write_u64(OFF_PARENT, parent);
        self.set_free_space(INITIAL_FREE_SPACE);
        self.write_u64(OFF_SPECIAL, first_child);
    }

    // ------------------------------------------------------------------
    // Leaf body
    // ------------------------------------------------------------------

    pub fn slot(&self, idx: usize) -> Slot {
        debug_assert!(idx < self.number_of_keys());
        let base = PAGE_HEADER_SIZE + idx * SLOT_SIZE;
        Slot {
            key: self.read_i64(base),
            size: self.read_u16(base + 8),
            offset: self.read_u16(base + 10),
            trx_id: self.read_i32(base + 12),
        }
    }

    pub fn set_slot(&mut self, idx: usize, slot: &Slot) {
        let base = PAGE_HEADER_SIZE + idx * SLOT_SIZE;
        self.write_i64(base, slot.key);
        self.write_u16(base + 8, slot.size);
        self.write_u16(base + 10, slot.offset);
        self.write_i32(base + 12, slot.trx_id);
    }

    pub fn value(&self, idx: usize) -> &[u8] {
        let slot = self.slot(idx);
        &self.bytes[slot.offset as usize..slot.offset as usize + slot.size as usize]
    }

    /// Overwrite the first `data.len()` bytes of the value stored at
    /// the given slot. The slot keeps its size.
    pub fn overwrite_value(&mut self, idx: usize, data: &[u8]) {
        let slot = self.slot(idx);
        debug_assert!(data.len() <= slot.size as usize);
        let off = slot.offset as usize;
        self.bytes[off..off + data.len()].copy_from_slice(data);
    }

    pub fn leaf_find(&self, key: Key) -> Option<usize> {
        (0..self.number_of_keys()).find(|&i| self.slot(i).key == key)
    }

    pub fn leaf_can_hold(&self, value_size: usize) -> bool {
        self.free_space() >= (SLOT_SIZE + value_size) as u64
    }

    /// Insert a record in key order. The caller must have checked
    /// `leaf_can_hold` and key uniqueness.
    pub fn leaf_insert(&mut self, key: Key, value: &[u8], trx_id: TrxId) {
        let n = self.number_of_keys();
        let free = self.free_space();
        let size = value.len();
        debug_assert!(self.leaf_can_hold(size));

        let mut idx = n;
        for i in 0..n {
            if self.slot(i).key > key {
                idx = i;
                break;
            }
        }
        let start = PAGE_HEADER_SIZE + idx * SLOT_SIZE;
        let end = PAGE_HEADER_SIZE + n * SLOT_SIZE;
        self.bytes.copy_within(start..end, start + SLOT_SIZE);

        // The new value lands directly in front of the packed region.
        let offset = PAGE_HEADER_SIZE + SLOT_SIZE * n + free as usize - size;
        self.set_slot(
            idx,
            &Slot {
                key,
                size: size as u16,
                offset: offset as u16,
                trx_id,
            },
        );
        self.bytes[offset..offset + size].copy_from_slice(value);
        self.set_number_of_keys(n + 1);
        self.set_free_space(free - (SLOT_SIZE + size) as u64);
    }

    /// Remove the record at the given slot, compacting the value region
    /// in place so packed values stay contiguous.
    pub fn leaf_remove(&mut self, idx: usize) {
        let n = self.number_of_keys();
        let free = self.free_space();
        let victim = self.slot(idx);
        let voff = victim.offset as usize;
        let vsize = victim.size as usize;

        let values_start = PAGE_HEADER_SIZE + SLOT_SIZE * n + free as usize;
        self.bytes.copy_within(values_start..voff, values_start + vsize);
        for i in 0..n {
            if i == idx {
                continue;
            }
            let mut s = self.slot(i);
            if (s.offset as usize) < voff {
                s.offset += vsize as u16;
                self.set_slot(i, &s);
            }
        }

        let start = PAGE_HEADER_SIZE + (idx + 1) * SLOT_SIZE;
        let end = PAGE_HEADER_SIZE + n * SLOT_SIZE;
        self.bytes.copy_within(start..end, start - SLOT_SIZE);
        self.set_number_of_keys(n - 1);
        self.set_free_space(free + (SLOT_SIZE + vsize) as u64);
    }

    // ------------------------------------------------------------------
    // Internal body
    // ------------------------------------------------------------------

    pub fn branch(&self, idx: usize) -> Branch {
        debug_assert!(idx < self.number_of_keys());
        let base = PAGE_HEADER_SIZE + idx * BRANCH_SIZE;
        Branch {
            key: self.read_i64(base),
            pagenum: self.read_u64(base + 8),
        }
    }

    pub fn set_branch(&mut self, idx: usize, branch: &Branch) {
        let base = PAGE_HEADER_SIZE + idx * BRANCH_SIZE;
        self.write_i64(base, branch.key);
        self.write_u64(base + 8, branch.pagenum);
    }

    pub fn branch_insert(&mut self, key: Key, pagenum: PageNum) {
        let n = self.number_of_keys();
        debug_assert!(n < ORDER - 1);
        let mut idx = n;
        for i in 0..n {
            if self.branch(i).key > key {
                idx = i;
                break;
            }
        }
        let start = PAGE_HEADER_SIZE + idx * BRANCH_SIZE;
        let end = PAGE_HEADER_SIZE + n * BRANCH_SIZE;
        self.bytes.copy_within(start..end, start + BRANCH_SIZE);
        self.set_branch(idx, &Branch { key, pagenum });
        self.set_number_of_keys(n + 1);
        self.set_free_space(self.free_space() - BRANCH_SIZE as u64);
    }

    pub fn branch_remove(&mut self, idx: usize) {
        let n = self.number_of_keys();
        let start = PAGE_HEADER_SIZE + (idx + 1) * BRANCH_SIZE;
        let end = PAGE_HEADER_SIZE + n * BRANCH_SIZE;
        self.bytes.copy_within(start..end, start - BRANCH_SIZE);
        self.set_number_of_keys(n - 1);
        self.set_free_space(self.free_space() + BRANCH_SIZE as u64);
    }

    pub fn branch_index_by_key(&self, key: Key) -> Option<usize> {
        (0..self.number_of_keys()).find(|&i| self.branch(i).key == key)
    }

    pub fn branch_index_by_child(&self, pagenum: PageNum) -> Option<usize> {
        (0..self.number_of_keys()).find(|&i| self.branch(i).pagenum == pagenum)
    }

    /// Descent rule: follow the child of the last branch key that is
    /// not greater than the search key; before the first branch key,
    /// follow the leftmost child.
    pub fn lookup_child(&self, key: Key) -> PageNum {
        let n = self.number_of_keys();
        let mut idx = n;
        for i in 0..n {
            if key < self.branch(i).key {
                idx = i;
                break;
            }
        }
        if idx == 0 {
            self.first_child()
        } else {
            self.branch(idx - 1).pagenum
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Page {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn leaf_insert_packs_values_backward() {
        let mut p = Page::new();
        p.init_leaf(0);
        p.leaf_insert(10, &value_of(50, b'a'), 0);
        p.leaf_insert(20, &value_of(60, b'b'), 0);

        let s0 = p.slot(0);
        let s1 = p.slot(1);
        assert_eq!(s0.key, 10);
        assert_eq!(s1.key, 20);
        // First value sits at the very end of the page.
        assert_eq!(s0.offset as usize, PAGE_SIZE - 50);
        assert_eq!(s1.offset as usize, PAGE_SIZE - 50 - 60);
        assert_eq!(p.value(0), &value_of(50, b'a')[..]);
        assert_eq!(p.value(1), &value_of(60, b'b')[..]);
        assert_eq!(p.free_space(), INITIAL_FREE_SPACE - 2 * 16 - 110);
    }

    #[test]
    fn leaf_insert_keeps_key_order() {
        let mut p = Page::new();
        p.init_leaf(0);
        for key in [30i64, 10, 20, 40].iter() {
            p.leaf_insert(*key, &value_of(50, *key as u8), 0);
        }
        let keys: Vec<i64> = (0..p.number_of_keys()).map(|i| p.slot(i).key).collect();
        assert_eq!(keys, vec![10, 20, 30, 40]);
        for i in 0..4 {
            let k = p.slot(i).key;
            assert_eq!(p.value(i), &value_of(50, k as u8)[..]);
        }
    }

    #[test]
    fn leaf_remove_compacts_the_value_region() {
        let mut p = Page::new();
        p.init_leaf(0);
        p.leaf_insert(1, &value_of(50, b'a'), 0);
        p.leaf_insert(2, &value_of(60, b'b'), 0);
        p.leaf_insert(3, &value_of(70, b'c'), 0);

        p.leaf_remove(1);
        assert_eq!(p.number_of_keys(), 2);
        assert_eq!(p.value(0), &value_of(50, b'a')[..]);
        assert_eq!(p.value(1), &value_of(70, b'c')[..]);
        // Key 3's value shifted right over the removed bytes.
        assert_eq!(p.slot(1).offset as usize, PAGE_SIZE - 50 - 70);
        assert_eq!(p.free_space(), INITIAL_FREE_SPACE - 2 * 16 - 120);
    }

    #[test]
    fn leaf_remove_first_and_last() {
        let mut p = Page::new();
        p.init_leaf(0);
        p.leaf_insert(1, &value_of(50, b'a'), 0);
        p.leaf_insert(2, &value_of(50, b'b'), 0);
        p.leaf_remove(0);
        assert_eq!(p.slot(0).key, 2);
        p.leaf_remove(0);
        assert_eq!(p.number_of_keys(), 0);
        assert_eq!(p.free_space(), INITIAL_FREE_SPACE);
    }

    #[test]
    fn overwrite_value_keeps_slot_size() {
        let mut p = Page::new();
        p.init_leaf(0);
        p.leaf_insert(1, &value_of(60, b'a'), 0);
        p.overwrite_value(0, &value_of(60, b'z'));
        assert_eq!(p.value(0), &value_of(60, b'z')[..]);
        assert_eq!(p.slot(0).size, 60);
    }

    #[test]
    fn branch_ops_and_descent() {
        let mut p = Page::new();
        p.init_internal(0, 5);
        p.branch_insert(10, 6);
        p.branch_insert(30, 8);
        p.branch_insert(20, 7);

        assert_eq!(p.lookup_child(5), 5);
        assert_eq!(p.lookup_child(10), 6);
        assert_eq!(p.lookup_child(15), 6);
        assert_eq!(p.lookup_child(20), 7);
        assert_eq!(p.lookup_child(99), 8);

        p.branch_remove(1);
        assert_eq!(p.number_of_keys(), 2);
        assert_eq!(p.branch(1).key, 30);
        assert_eq!(p.lookup_child(25), 6);
    }

    #[test]
    fn node_kind_follows_the_leaf_flag() {
        let mut p = Page::new();
        p.init_leaf(0);
        p.set_right_sibling(7);
        assert_eq!(p.node_kind(), NodeKind::Leaf { right_sibling: 7 });

        p.init_internal(0, 3);
        assert_eq!(p.node_kind(), NodeKind::Internal { first_child: 3 });
    }

    #[test]
    fn header_page_fields() {
        let mut p = Page::new();
        p.init_header(1, 2560, 0);
        assert_eq!(p.first_free_pagenum(), 1);
        assert_eq!(p.number_of_pages(), 2560);
        assert_eq!(p.root_pagenum(), 0);
    }
}
