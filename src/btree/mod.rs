//! B+Tree index.
//!
//! This module provides a B-link style B+Tree stored as records that
//! supports:
//! - Point lookups (search)
//! - Insertions (insert)
//! - Range scans (search_range)
//! - Debug dumps (dump)

pub mod node;
mod tree;

pub use tree::{BPlusTree, TreeNode};
