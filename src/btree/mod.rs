//! B+tree engine: structural reads and modifications on top of the
//! buffer pool. Locking and logging for transactional reads and
//! updates live above this layer.

use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::page::NodeKind;
use crate::types::{Key, PageNum, TableId};

mod delete;
mod insert;

pub struct BTree {
    pool: Arc<BufferPool>,
}

impl BTree {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn root_pagenum(&self, table_id: TableId) -> PageNum {
        let guard = self.pool.request_page(table_id, 0);
        guard.page().root_pagenum()
    }

    /// The dirty header page is forced to disk when the guard drops.
    pub(crate) fn set_root_pagenum(&self, table_id: TableId, pagenum: PageNum) {
        let mut guard = self.pool.request_page(table_id, 0);
        guard.page_mut().set_root_pagenum(pagenum);
    }

    /// Descend from the root to the leaf that owns the key. Returns 0
    /// when the tree is empty.
    pub fn find_leaf(&self, table_id: TableId, key: Key) -> PageNum {
        let mut current = self.root_pagenum(table_id);
        while current != 0 {
            let guard = self.pool.request_page(table_id, current);
            match guard.page().node_kind() {
                NodeKind::Leaf { .. } => break,
                NodeKind::Internal { .. } => current = guard.page().lookup_child(key),
            }
        }
        current
    }

    pub fn find(&self, table_id: TableId, key: Key) -> Option<Vec<u8>> {
        let leaf = self.find_leaf(table_id, key);
        if leaf == 0 {
            return None;
        }
        let guard = self.pool.request_page(table_id, leaf);
        let idx = guard.page().leaf_find(key)?;
        Some(guard.page().value(idx).to_vec())
    }

    pub(crate) fn set_parent(&self, table_id: TableId, pagenum: PageNum, parent: PageNum) {
        let mut guard = self.pool.request_page(table_id, pagenum);
        guard.page_mut().set_parent_pagenum(parent);
    }
}
