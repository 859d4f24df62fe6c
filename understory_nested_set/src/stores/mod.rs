// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Store implementations.
//!
//! - `memory`: rows in a hash map, transactions by snapshot (tests, small trees, caches).
//! - `sqlite` (feature `store_sqlite`): a table in a `rusqlite` connection; tree
//!   reads run the three-way self-join and compute depths in SQL.

pub(crate) mod memory;
#[cfg(feature = "store_sqlite")]
pub(crate) mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "store_sqlite")]
pub use sqlite::SqliteStore;
