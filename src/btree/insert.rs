use log::debug;

use super::BTree;
use crate::buffer::PageGuard;
use crate::error::{DbError, DbResult};
use crate::page::{Branch, INITIAL_FREE_SPACE, ORDER};
use crate::types::{Key, PageNum, TableId, TrxId};

impl BTree {
    pub fn insert(&self, table_id: TableId, key: Key, value: &[u8]) -> DbResult<()> {
        let root = self.root_pagenum(table_id);
        if root == 0 {
            self.start_new_tree(table_id, key, value);
            return Ok(());
        }

        let leaf_pn = self.find_leaf(table_id, key);
        let mut leaf = self.pool().request_page(table_id, leaf_pn);
        if leaf.page().leaf_find(key).is_some() {
            return Err(DbError::DuplicateKey(key));
        }

        if leaf.page().leaf_can_hold(value.len()) {
            leaf.page_mut().leaf_insert(key, value, 0);
        } else {
            self.insert_into_leaf_after_splitting(table_id, leaf, key, value);
        }
        Ok(())
    }

    fn start_new_tree(&self, table_id: TableId, key: Key, value: &[u8]) {
        let pagenum = self.pool().alloc_page(table_id);
        {
            let mut guard = self.pool().request_page(table_id, pagenum);
            let page = guard.page_mut();
            page.init_leaf(0);
            page.leaf_insert(key, value, 0);
        }
        self.set_root_pagenum(table_id, pagenum);
        debug!("table {} grew root leaf {}", table_id, pagenum);
    }

    fn insert_into_leaf_after_splitting(
        &self,
        table_id: TableId,
        mut leaf: PageGuard,
        key: Key,
        value: &[u8],
    ) {
        let leaf_pn = leaf.pagenum();
        let n = leaf.page().number_of_keys();

        let mut records: Vec<(Key, TrxId, Vec<u8>)> = Vec::with_capacity(n + 1);
        let mut placed = false;
        for i in 0..n {
            let slot = leaf.page().slot(i);
            if !placed && key < slot.key {
                records.push((key, 0, value.to_vec()));
                placed = true;
            }
            records.push((slot.key, slot.trx_id, leaf.page().value(i).to_vec()));
        }
        if !placed {
            records.push((key, 0, value.to_vec()));
        }

        // Split where accumulated value bytes reach half a body; the
        // record that crosses the mark starts the right page, so the
        // left page stays strictly below half.
        let mut split = records.len();
        let mut occupied = 0u64;
        for (i, rec) in records.iter().enumerate() {
            occupied += rec.2.len() as u64;
            if occupied >= INITIAL_FREE_SPACE / 2 {
                split = i;
                break;
            }
        }

        let new_pn = self.pool().alloc_page(table_id);
        let parent = leaf.page().parent_pagenum();
        let old_right = leaf.page().right_sibling();

        {
            let page = leaf.page_mut();
            page.init_leaf(parent);
            page.set_right_sibling(new_pn);
            for (k, t, v) in &records[..split] {
                page.leaf_insert(*k, v, *t);
            }
        }
        drop(leaf);

        let new_key = records[split].0;
        {
            let mut new_leaf = self.pool().request_page(table_id, new_pn);
            let page = new_leaf.page_mut();
            page.init_leaf(parent);
            page.set_right_sibling(old_right);
            for (k, t, v) in &records[split..] {
                page.leaf_insert(*k, v, *t);
            }
        }
        debug!(
            "table {} split leaf {} into {} at key {}",
            table_id, leaf_pn, new_pn, new_key
        );

        self.insert_into_parent(table_id, leaf_pn, new_key, new_pn);
    }

    /// Walk upward inserting the separator produced by a split,
    /// splitting internal nodes along the way as needed.
    fn insert_into_parent(
        &self,
        table_id: TableId,
        mut left_pn: PageNum,
        mut key: Key,
        mut right_pn: PageNum,
    ) {
        loop {
            let parent_pn = {
                let guard = self.pool().request_page(table_id, left_pn);
                guard.page().parent_pagenum()
            };
            if parent_pn == 0 {
                self.insert_into_new_root(table_id, left_pn, key, right_pn);
                return;
            }

            let mut parent = self.pool().request_page(table_id, parent_pn);
            if parent.page().number_of_keys() < ORDER - 1 {
                parent.page_mut().branch_insert(key, right_pn);
                drop(parent);
                self.set_parent(table_id, right_pn, parent_pn);
                return;
            }

            let (up_key, new_pn) = self.split_internal(table_id, parent, key, right_pn);
            left_pn = parent_pn;
            key = up_key;
            right_pn = new_pn;
        }
    }

    fn split_internal(
        &self,
        table_id: TableId,
        mut old: PageGuard,
        key: Key,
        right_pn: PageNum,
    ) -> (Key, PageNum) {
        let old_pn = old.pagenum();
        let parent = old.page().parent_pagenum();
        let first_child = old.page().first_child();
        let n = old.page().number_of_keys();

        let mut branches: Vec<Branch> = Vec::with_capacity(n + 1);
        let mut placed = false;
        for i in 0..n {
            let b = old.page().branch(i);
            if !placed && key < b.key {
                branches.push(Branch {
                    key,
                    pagenum: right_pn,
                });
                placed = true;
            }
            branches.push(b);
        }
        if !placed {
            branches.push(Branch {
                key,
                pagenum: right_pn,
            });
        }

        let split_index = (ORDER - 1) / 2;
        let up = branches[split_index - 1];

        let new_pn = self.pool().alloc_page(table_id);
        {
            let page = old.page_mut();
            page.init_internal(parent, first_child);
            for b in &branches[..split_index - 1] {
                page.branch_insert(b.key, b.pagenum);
            }
        }
        drop(old);

        {
            let mut new_guard = self.pool().request_page(table_id, new_pn);
            let page = new_guard.page_mut();
            page.init_internal(parent, up.pagenum);
            for b in &branches[split_index..] {
                page.branch_insert(b.key, b.pagenum);
            }
        }

        // Re-home everything that moved to the new page.
        self.set_parent(table_id, up.pagenum, new_pn);
        for b in &branches[split_index..] {
            self.set_parent(table_id, b.pagenum, new_pn);
        }

        debug!(
            "table {} split internal {} into {} pushing key {}",
            table_id, old_pn, new_pn, up.key
        );
        (up.key, new_pn)
    }

    fn insert_into_new_root(&self, table_id: TableId, left_pn: PageNum, key: Key, right_pn: PageNum) {
        let root_pn = self.pool().alloc_page(table_id);
        {
            let mut guard = self.pool().request_page(table_id, root_pn);
            let page = guard.page_mut();
            page.init_internal(0, left_pn);
            page.branch_insert(key, right_pn);
        }
        self.set_parent(table_id, left_pn, root_pn);
        self.set_parent(table_id, right_pn, root_pn);
        self.set_root_pagenum(table_id, root_pn);
        debug!("table {} grew root internal {}", table_id, root_pn);
    }
}
