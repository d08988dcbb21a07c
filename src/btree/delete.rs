use log::debug;

use super::BTree;
use crate::buffer::PageGuard;
use crate::error::{DbError, DbResult};
use crate::page::{NodeKind, INITIAL_FREE_SPACE, ORDER, THRESHOLD};
use crate::types::{Key, PageNum, TableId};

/// Internal nodes with fewer keys than this are underfull.
const MIN_INTERNAL_KEYS: usize = (ORDER + 1) / 2 - 1;

impl BTree {
    pub fn delete(&self, table_id: TableId, key: Key) -> DbResult<()> {
        let leaf = self.find_leaf(table_id, key);
        if leaf == 0 {
            return Err(DbError::KeyNotFound(key));
        }
        {
            let guard = self.pool().request_page(table_id, leaf);
            if guard.page().leaf_find(key).is_none() {
                return Err(DbError::KeyNotFound(key));
            }
        }
        self.delete_entry(table_id, leaf, key);
        Ok(())
    }

    /// Remove an entry and rebalance upward. Each merge removes the
    /// separator from the parent, so the loop climbs one level per
    /// iteration until a node stays full enough or the root is reached.
    fn delete_entry(&self, table_id: TableId, mut pagenum: PageNum, mut key: Key) {
        loop {
            let mut guard = self.pool().request_page(table_id, pagenum);
            let kind = guard.page().node_kind();

            match kind {
                NodeKind::Leaf { .. } => {
                    let idx = match guard.page().leaf_find(key) {
                        Some(idx) => idx,
                        None => return,
                    };
                    guard.page_mut().leaf_remove(idx);
                }
                NodeKind::Internal { .. } => {
                    let idx = match guard.page().branch_index_by_key(key) {
                        Some(idx) => idx,
                        None => return,
                    };
                    guard.page_mut().branch_remove(idx);
                }
            }

            let root = self.root_pagenum(table_id);
            if pagenum == root {
                drop(guard);
                self.adjust_root(table_id, root);
                return;
            }

            // Leaves go by free bytes, internal nodes by key count.
            let underfull = match kind {
                NodeKind::Leaf { .. } => guard.page().free_space() >= THRESHOLD,
                NodeKind::Internal { .. } => guard.page().number_of_keys() < MIN_INTERNAL_KEYS,
            };
            if !underfull {
                return;
            }

            let parent_pn = guard.page().parent_pagenum();
            drop(guard);

            let is_leaf = matches!(kind, NodeKind::Leaf { .. });
            match self.rebalance(table_id, pagenum, parent_pn, is_leaf) {
                Some(separator) => {
                    // Merged: the separator must leave the parent next.
                    pagenum = parent_pn;
                    key = separator;
                }
                None => return,
            }
        }
    }

    /// Merge with or borrow from a sibling. Returns the separator key
    /// removed by a merge, or None after redistribution.
    fn rebalance(
        &self,
        table_id: TableId,
        pagenum: PageNum,
        parent_pn: PageNum,
        is_leaf: bool,
    ) -> Option<Key> {
        let parent = self.pool().request_page(table_id, parent_pn);

        // The leftmost child pairs with the page to its right; every
        // other page pairs with its left neighbor.
        let leftmost = parent.page().first_child() == pagenum;
        let (neighbor_pn, k_prime_index) = if leftmost {
            (parent.page().branch(0).pagenum, 0)
        } else {
            let idx = match parent.page().branch_index_by_child(pagenum) {
                Some(idx) => idx,
                None => return None,
            };
            let neighbor = if idx == 0 {
                parent.page().first_child()
            } else {
                parent.page().branch(idx - 1).pagenum
            };
            (neighbor, idx)
        };
        let k_prime = parent.page().branch(k_prime_index).key;
        drop(parent);

        let (left_pn, right_pn) = if leftmost {
            (pagenum, neighbor_pn)
        } else {
            (neighbor_pn, pagenum)
        };
        let mut left = self.pool().request_page(table_id, left_pn);
        let mut right = self.pool().request_page(table_id, right_pn);

        let fits = if is_leaf {
            left.page().used_space() + right.page().used_space() <= INITIAL_FREE_SPACE
        } else {
            left.page().number_of_keys() + right.page().number_of_keys() < ORDER - 1
        };

        if fits {
            if is_leaf {
                Self::coalesce_leaves(&mut left, &mut right);
            } else {
                self.coalesce_internals(table_id, &mut left, &mut right, k_prime);
            }
            drop(left);
            drop(right);
            self.pool().free_page(table_id, right_pn);
            debug!(
                "table {} merged {} into {} around key {}",
                table_id, right_pn, left_pn, k_prime
            );
            Some(k_prime)
        } else {
            if is_leaf {
                self.redistribute_leaves(table_id, parent_pn, k_prime_index, &mut left, &mut right, leftmost);
            } else {
                self.redistribute_internals(
                    table_id,
                    parent_pn,
                    k_prime_index,
                    &mut left,
                    &mut right,
                    leftmost,
                    k_prime,
                );
            }
            None
        }
    }

    fn coalesce_leaves(left: &mut PageGuard, right: &mut PageGuard) {
        let n = right.page().number_of_keys();
        for i in 0..n {
            let slot = right.page().slot(i);
            let value = right.page().value(i).to_vec();
            left.page_mut().leaf_insert(slot.key, &value, slot.trx_id);
        }
        let sibling = right.page().right_sibling();
        left.page_mut().set_right_sibling(sibling);
    }

    fn coalesce_internals(
        &self,
        table_id: TableId,
        left: &mut PageGuard,
        right: &mut PageGuard,
        k_prime: Key,
    ) {
        let mut moved = vec![right.page().first_child()];
        left.page_mut().branch_insert(k_prime, moved[0]);
        let n = right.page().number_of_keys();
        for i in 0..n {
            let b = right.page().branch(i);
            left.page_mut().branch_insert(b.key, b.pagenum);
            moved.push(b.pagenum);
        }

        let left_pn = left.pagenum();
        for child in moved {
            self.set_parent(table_id, child, left_pn);
        }
    }

    fn redistribute_leaves(
        &self,
        table_id: TableId,
        parent_pn: PageNum,
        k_prime_index: usize,
        left: &mut PageGuard,
        right: &mut PageGuard,
        leftmost: bool,
    ) {
        if leftmost {
            // The underfull page is on the left; pull from the right
            // sibling's front.
            while left.page().free_space() >= THRESHOLD && right.page().number_of_keys() > 0 {
                let slot = right.page().slot(0);
                let value = right.page().value(0).to_vec();
                right.page_mut().leaf_remove(0);
                left.page_mut().leaf_insert(slot.key, &value, slot.trx_id);
            }
        } else {
            // The underfull page is on the right; pull from the left
            // sibling's back.
            while right.page().free_space() >= THRESHOLD && left.page().number_of_keys() > 0 {
                let last = left.page().number_of_keys() - 1;
                let slot = left.page().slot(last);
                let value = left.page().value(last).to_vec();
                left.page_mut().leaf_remove(last);
                right.page_mut().leaf_insert(slot.key, &value, slot.trx_id);
            }
        }

        let separator = right.page().slot(0).key;
        let mut parent = self.pool().request_page(table_id, parent_pn);
        let mut branch = parent.page().branch(k_prime_index);
        branch.key = separator;
        parent.page_mut().set_branch(k_prime_index, &branch);
    }

    /// Internal redistribution moves exactly one branch through the
    /// parent separator.
    fn redistribute_internals(
        &self,
        table_id: TableId,
        parent_pn: PageNum,
        k_prime_index: usize,
        left: &mut PageGuard,
        right: &mut PageGuard,
        leftmost: bool,
        k_prime: Key,
    ) {
        let separator;
        if leftmost {
            // Underfull page on the left; adopt the right's first child.
            let moved = right.page().first_child();
            left.page_mut().branch_insert(k_prime, moved);
            let b0 = right.page().branch(0);
            right.page_mut().set_first_child(b0.pagenum);
            right.page_mut().branch_remove(0);
            separator = b0.key;
            let left_pn = left.pagenum();
            self.set_parent(table_id, moved, left_pn);
        } else {
            // Underfull page on the right; adopt the left's last child.
            let last = left.page().number_of_keys() - 1;
            let branch = left.page().branch(last);
            left.page_mut().branch_remove(last);
            let old_first = right.page().first_child();
            right.page_mut().set_first_child(branch.pagenum);
            right.page_mut().branch_insert(k_prime, old_first);
            separator = branch.key;
            let right_pn = right.pagenum();
            self.set_parent(table_id, branch.pagenum, right_pn);
        }

        let mut parent = self.pool().request_page(table_id, parent_pn);
        let mut branch = parent.page().branch(k_prime_index);
        branch.key = separator;
        parent.page_mut().set_branch(k_prime_index, &branch);
    }

    fn adjust_root(&self, table_id: TableId, root_pn: PageNum) {
        let guard = self.pool().request_page(table_id, root_pn);
        if guard.page().number_of_keys() > 0 {
            return;
        }

        if guard.page().is_leaf() {
            drop(guard);
            self.set_root_pagenum(table_id, 0);
            self.pool().free_page(table_id, root_pn);
            debug!("table {} is empty again", table_id);
        } else {
            let child = guard.page().first_child();
            drop(guard);
            self.set_root_pagenum(table_id, child);
            self.set_parent(table_id, child, 0);
            self.pool().free_page(table_id, root_pn);
            debug!("table {} root collapsed into {}", table_id, child);
        }
    }
}
