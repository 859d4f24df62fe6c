// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by the engine and the stores.

use thiserror::Error;

use crate::types::Key;

/// Errors raised by tree operations and stores.
///
/// Any error returned from inside a managed transaction rolls the whole
/// operation back.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller programming error: zero-size gap, negative gap removal, a
    /// reserved column used as an attribute, a move into the node's own subtree.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced node does not exist in the store.
    #[error("cannot find node [{key}] in [{table}]")]
    NotFound {
        /// The missing key.
        key: Key,
        /// The table that was searched.
        table: String,
    },

    /// A caller-supplied key is already taken.
    #[error("node [{key}] already exists in [{table}]")]
    DuplicateKey {
        /// The conflicting key.
        key: Key,
        /// The table written to.
        table: String,
    },

    /// Stored bounds (or a requested transition) break the nested-set encoding.
    #[error("nested-set invariant violated: {0}")]
    InvariantViolation(String),

    /// Error reported by the SQLite backend.
    #[cfg(feature = "store_sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result alias with [`Error`] as the default error type.
pub type Result<T, E = Error> = core::result::Result<T, E>;
