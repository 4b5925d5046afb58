//! B+Tree core implementation.
//!
//! This module provides the `BPlusTree` handle with operations for:
//! - create/load: a tree addressed by its boot record
//! - insert: key/uid pairs, splitting full nodes bottom up
//! - search: point lookups
//! - search_range: inclusive range scans along the leaf chain
//!
//! Nodes are plain records in the data manager, written under the bypass
//! transaction. Each node latches itself only for its own change; a
//! descent that overtakes a concurrent split follows sibling links.

use crate::btree::node::{self, SearchNext};
use crate::data::{DataItem, DataManager};
use crate::error::{Result, StorageError};
use crate::types::{Uid, SUPER_XID};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of inserting into one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertOutcome {
    /// The key belongs to the right sibling
    Redirect(Uid),
    /// Inserted; a split hands `(new node, its first key)` to the parent
    Inserted { split: Option<(Uid, i64)> },
}

/// Tree node view for visualization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Uid of the node record
    pub uid: u64,
    /// Whether this is a leaf node
    pub is_leaf: bool,
    /// Keys in this node
    pub keys: Vec<i64>,
    /// Record uids (only for leaf nodes)
    pub values: Vec<u64>,
    /// Child nodes (only for interior nodes)
    pub children: Vec<TreeNode>,
}

/// A B+Tree index over `i64` keys
pub struct BPlusTree {
    /// Record storage for the nodes
    dm: Arc<DataManager>,
    /// Uid of the boot record, the tree's durable handle
    boot_uid: Uid,
    /// Boot record holding the current root uid, pinned while the tree is open
    boot: Arc<DataItem>,
    /// Serializes root changes
    boot_lock: Mutex<()>,
}

impl BPlusTree {
    /// Create an empty tree and return its boot uid
    pub fn create(dm: &Arc<DataManager>) -> Result<Uid> {
        let root = dm.insert(SUPER_XID, &node::new_nil_root_raw())?;
        dm.insert(SUPER_XID, &root.value().to_be_bytes())
    }

    /// Open the tree whose boot record is `boot_uid`
    pub fn load(boot_uid: Uid, dm: Arc<DataManager>) -> Result<Self> {
        let boot = dm
            .read(boot_uid)?
            .ok_or_else(|| StorageError::corruption(format!("missing boot record {}", boot_uid)))?;
        if boot.size() != 8 {
            let size = boot.size();
            dm.release(&boot)?;
            return Err(StorageError::corruption(format!(
                "boot record {} has {} bytes",
                boot_uid, size
            )));
        }
        Ok(Self {
            dm,
            boot_uid,
            boot,
            boot_lock: Mutex::new(()),
        })
    }

    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    /// Uid of the current root node
    pub fn root_uid(&self) -> Uid {
        let _guard = self.boot_lock.lock();
        self.boot.with_data(read_uid)
    }

    /// Index `uid` under `key`
    pub fn insert(&self, key: i64, uid: Uid) -> Result<()> {
        let root = self.root_uid();
        if let Some((right, right_key)) = self.insert_into(root, uid, key)? {
            self.grow_root(root, right, right_key)?;
        }
        Ok(())
    }

    /// Uids indexed under `key`
    pub fn search(&self, key: i64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// Uids with keys in `[lo, hi]`, in key order
    pub fn search_range(&self, lo: i64, hi: i64) -> Result<Vec<Uid>> {
        let mut uids = Vec::new();
        if lo > hi {
            return Ok(uids);
        }

        let mut leaf = self.search_leaf(self.root_uid(), lo)?;
        loop {
            let (found, next) = self.with_node(leaf, |raw| node::leaf_range(raw, lo, hi))?;
            uids.extend(found);
            match next {
                Some(sibling) => leaf = sibling,
                None => return Ok(uids),
            }
        }
    }

    /// Snapshot of the tree from the current root
    pub fn dump(&self) -> Result<TreeNode> {
        self.dump_node(self.root_uid())
    }

    /// Unpin the boot record
    pub fn close(self) -> Result<()> {
        self.dm.release(&self.boot)
    }

    fn load_node(&self, uid: Uid) -> Result<Arc<DataItem>> {
        self.dm
            .read(uid)?
            .ok_or_else(|| StorageError::corruption(format!("missing tree node {}", uid)))
    }

    fn with_node<R>(&self, uid: Uid, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let item = self.load_node(uid)?;
        let result = item.with_data(f);
        self.dm.release(&item)?;
        Ok(result)
    }

    /// Descend from `node_uid` to the leftmost leaf that may hold `key`
    fn search_leaf(&self, mut node_uid: Uid, key: i64) -> Result<Uid> {
        loop {
            let next = self.with_node(node_uid, |raw| {
                (!node::is_leaf(raw)).then(|| node::search_first(raw, key))
            })?;
            match next {
                None => return Ok(node_uid),
                Some(SearchNext::Child(child)) => node_uid = child,
                Some(SearchNext::Sibling(sibling)) => {
                    if sibling.is_none() {
                        return Err(StorageError::corruption(format!(
                            "tree node {} has no route for key {}",
                            node_uid, key
                        )));
                    }
                    node_uid = sibling;
                }
            }
        }
    }

    /// Insert into the subtree at `node_uid`; returns a split of that node
    /// for the caller to hang into the level above.
    fn insert_into(&self, node_uid: Uid, uid: Uid, key: i64) -> Result<Option<(Uid, i64)>> {
        let child = self.with_node(node_uid, |raw| {
            (!node::is_leaf(raw)).then(|| node::search_next(raw, key))
        })?;

        let (son, son_key) = match child {
            None => (uid, key),
            Some(SearchNext::Sibling(sibling)) => return self.insert_into(sibling, uid, key),
            Some(SearchNext::Child(next)) => match self.insert_into(next, uid, key)? {
                Some(split) => split,
                None => return Ok(None),
            },
        };
        self.insert_and_split(node_uid, son, son_key)
    }

    /// Add `(son, key)` to the node, walking right past concurrent splits
    fn insert_and_split(&self, mut node_uid: Uid, son: Uid, key: i64) -> Result<Option<(Uid, i64)>> {
        loop {
            let item = self.load_node(node_uid)?;
            let outcome = self.insert_in_node(&item, son, key);
            self.dm.release(&item)?;
            match outcome? {
                InsertOutcome::Redirect(sibling) => node_uid = sibling,
                InsertOutcome::Inserted { split } => return Ok(split),
            }
        }
    }

    fn insert_in_node(&self, item: &DataItem, son: Uid, key: i64) -> Result<InsertOutcome> {
        let mut mutation = item.before();
        if !node::insert(mutation.payload_mut(), son, key) {
            let sibling = node::sibling(mutation.payload());
            mutation.un_before();
            return Ok(InsertOutcome::Redirect(sibling));
        }

        let split = if node::needs_split(mutation.payload()) {
            let right_raw = node::split_right_half(mutation.payload());
            let right = self.dm.insert(SUPER_XID, &right_raw)?;
            node::finish_split(mutation.payload_mut(), right);
            let right_key = node::key(&right_raw, 0);
            tracing::debug!(node = %item.uid(), right = %right, right_key, "split tree node");
            Some((right, right_key))
        } else {
            None
        };

        mutation.after(SUPER_XID)?;
        Ok(InsertOutcome::Inserted { split })
    }

    /// Put a new root over `old_root` and its new right sibling
    fn grow_root(&self, old_root: Uid, right: Uid, right_key: i64) -> Result<()> {
        let _guard = self.boot_lock.lock();
        let new_root = self
            .dm
            .insert(SUPER_XID, &node::new_root_raw(old_root, right, right_key))?;

        let mut mutation = self.boot.before();
        mutation
            .payload_mut()
            .copy_from_slice(&new_root.value().to_be_bytes());
        mutation.after(SUPER_XID)?;
        tracing::debug!(old_root = %old_root, new_root = %new_root, "grew tree root");
        Ok(())
    }

    fn dump_node(&self, uid: Uid) -> Result<TreeNode> {
        let (is_leaf, keys, sons) = self.with_node(uid, |raw| {
            let count = node::key_count(raw);
            (
                node::is_leaf(raw),
                (0..count).map(|k| node::key(raw, k)).collect::<Vec<_>>(),
                (0..count).map(|k| node::son(raw, k)).collect::<Vec<_>>(),
            )
        })?;

        if is_leaf {
            return Ok(TreeNode {
                uid: uid.value(),
                is_leaf,
                keys,
                values: sons.into_iter().map(Uid::value).collect(),
                children: Vec::new(),
            });
        }

        let children = sons
            .into_iter()
            .map(|son| self.dump_node(son))
            .collect::<Result<Vec<_>>>()?;
        Ok(TreeNode {
            uid: uid.value(),
            is_leaf,
            keys,
            values: Vec::new(),
            children,
        })
    }
}

fn read_uid(raw: &[u8]) -> Uid {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[..8]);
    Uid(u64::from_be_bytes(buf))
}
