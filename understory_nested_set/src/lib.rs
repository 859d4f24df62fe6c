// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_nested_set --heading-base-level=0

//! Understory Nested Set: hierarchies stored in flat tables with nested-set bounds.
//!
//! Understory Nested Set is a reusable building block for category trees, menus, comment threads,
//! and any other hierarchy that lives in a relational table and is read far more often than it is
//! reshaped.
//!
//! - Every row carries a `left`/`right` pair and a `tree` partition; a node's descendants are
//!   exactly the rows of its tree whose bounds fall strictly inside its own.
//! - "All descendants" and "path to root" are single range queries.
//! - Inserts, moves, and deletes renumber bounds with two range updates per gap, inside one
//!   store transaction.
//!
//! Storage is pluggable via the [`Store`] trait. The engine never builds SQL itself; it asks the
//! store for filtered selects, bulk shifts, inserts, and deletes.
//!
//! ## Features
//!
//! - `store_sqlite` *(default)*: enables [`SqliteStore`], backed by `rusqlite`. Disable this
//!   feature to avoid the SQLite dependency; [`MemoryStore`] is always available.
//!
//! # Example
//!
//! ```rust
//! use understory_nested_set::{MemoryStore, Node, TreeId, Worker};
//!
//! let mut worker = Worker::new(MemoryStore::default());
//! let schema = worker.schema().clone();
//!
//! // R { A, B }
//! let mut r = Node::new().with_attribute(&schema, "name", "R").unwrap();
//! worker.insert_as_root(&mut r).unwrap();
//! let mut a = Node::new().with_attribute(&schema, "name", "A").unwrap();
//! worker.insert_as_first_child(&mut a, &mut r).unwrap();
//! let mut b = Node::new().with_attribute(&schema, "name", "B").unwrap();
//! worker.insert_as_last_child(&mut b, &mut r).unwrap();
//! assert_eq!((r.left(), r.right()), (1, 6));
//!
//! // Reorder: A after B. The parent keeps its bounds.
//! worker.move_as_next_sibling(&mut a, &mut b).unwrap();
//! assert_eq!((b.left(), a.left()), (2, 4));
//!
//! // Read the subtree back as a hierarchy.
//! let tree = worker.tree(r.key().unwrap(), TreeId(1), 0).unwrap();
//! assert_eq!(tree.apex().unwrap().children().len(), 2);
//! ```
//!
//! ## Concurrency
//!
//! Structural mutations are atomic per call but not safe to interleave: two writers mutating the
//! same tree concurrently can compute overlapping gaps. Serialize mutations per tree, either
//! through the store's transaction isolation or an application-level lock. Reads need no
//! transaction.
//!
//! ## Choosing a store
//!
//! - [`MemoryStore`]: rows in a hash map, snapshot rollback. Tests, caches, small trees.
//! - [`SqliteStore`] *(feature `store_sqlite`)*: a real table; tree reads compute depths with a
//!   self-join in SQL.
//!
//! Other databases plug in by implementing [`Store`].

mod error;
mod hierarchy;
mod schema;
mod store;
mod types;
mod worker;

pub mod bounds;
pub mod gap;
pub mod reposition;
pub mod stores;

pub use bounds::Placement;
pub use error::{Error, Result};
pub use hierarchy::{Entry, EntryId, Hierarchy};
pub use schema::{Column, TableSchema};
pub use store::{Cmp, Condition, Filter, Shift, Store};
pub use stores::MemoryStore;
#[cfg(feature = "store_sqlite")]
pub use stores::SqliteStore;
pub use types::{Attributes, Bounds, Key, Node, TreeId, Value};
pub use worker::{MapNode, MapSummary, TransactionMode, Worker, WorkerConfig};

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds R { A { C }, B }, moves C under B, then A to a new tree, returning the rows.
    fn exercise<S: Store>(store: S) -> Vec<(i64, i64, i64)> {
        let mut worker = Worker::new(store);
        let mut r = Node::new();
        worker.insert_as_root(&mut r).unwrap();
        let mut a = Node::new();
        worker.insert_as_last_child(&mut a, &mut r).unwrap();
        let mut b = Node::new();
        worker.insert_as_last_child(&mut b, &mut r).unwrap();
        let mut c = Node::new();
        worker.insert_as_first_child(&mut c, &mut a).unwrap();

        worker.move_as_first_child(&mut c, &mut b).unwrap();
        worker.move_as_root(&mut a).unwrap();
        worker.validate(TreeId(1)).unwrap();
        worker.validate(TreeId(2)).unwrap();

        worker
            .all_flat(None)
            .unwrap()
            .iter()
            .map(|node| (node.tree().0, node.left(), node.right()))
            .collect()
    }

    #[test]
    fn memory_store_sequence() {
        let rows = exercise(MemoryStore::default());
        assert_eq!(rows, [(1, 1, 6), (1, 2, 5), (1, 3, 4), (2, 1, 2)]);
    }

    #[cfg(feature = "store_sqlite")]
    #[test]
    fn sqlite_store_agrees_with_memory_store() {
        let store = SqliteStore::open_in_memory(TableSchema::default()).unwrap();
        store.create_table(&[]).unwrap();
        assert_eq!(exercise(store), exercise(MemoryStore::default()));
    }
}
