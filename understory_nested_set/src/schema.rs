// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Table and column naming for the node table.

use crate::error::{Error, Result};

/// One of the reserved columns the engine owns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Column {
    /// Primary key.
    Key,
    /// Left bound.
    Left,
    /// Right bound.
    Right,
    /// Tree partition.
    Tree,
}

/// Names of the node table and its reserved columns.
///
/// The defaults follow the usual nested-set convention: `lft`/`rgt` rather than
/// `left`/`right`, which are reserved words in most SQL dialects.
///
/// ```rust
/// use understory_nested_set::TableSchema;
///
/// let schema = TableSchema::new("categories")
///     .with_tree_column("tree_id")
///     .with_incrementing(false);
/// assert_eq!(schema.table(), "categories");
/// assert!(schema.is_reserved("tree_id"));
/// assert!(!schema.is_reserved("name"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    key: String,
    left: String,
    right: String,
    tree: String,
    incrementing: bool,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self::new("nodes")
    }
}

impl TableSchema {
    /// Schema for `table` with the default column names and store-assigned keys.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: "id".into(),
            left: "lft".into(),
            right: "rgt".into(),
            tree: "tree".into(),
            incrementing: true,
        }
    }

    /// Rename the primary key column.
    #[must_use]
    pub fn with_key_column(mut self, name: impl Into<String>) -> Self {
        self.key = name.into();
        self
    }

    /// Rename the left bound column.
    #[must_use]
    pub fn with_left_column(mut self, name: impl Into<String>) -> Self {
        self.left = name.into();
        self
    }

    /// Rename the right bound column.
    #[must_use]
    pub fn with_right_column(mut self, name: impl Into<String>) -> Self {
        self.right = name.into();
        self
    }

    /// Rename the tree column.
    #[must_use]
    pub fn with_tree_column(mut self, name: impl Into<String>) -> Self {
        self.tree = name.into();
        self
    }

    /// Whether the store assigns keys on insert (`true`) or callers supply them.
    #[must_use]
    pub fn with_incrementing(mut self, incrementing: bool) -> Self {
        self.incrementing = incrementing;
        self
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of a reserved column.
    pub fn column(&self, column: Column) -> &str {
        match column {
            Column::Key => &self.key,
            Column::Left => &self.left,
            Column::Right => &self.right,
            Column::Tree => &self.tree,
        }
    }

    /// Primary key column.
    pub fn key_column(&self) -> &str {
        &self.key
    }

    /// Left bound column.
    pub fn left_column(&self) -> &str {
        &self.left
    }

    /// Right bound column.
    pub fn right_column(&self) -> &str {
        &self.right
    }

    /// Tree column.
    pub fn tree_column(&self) -> &str {
        &self.tree
    }

    /// Whether keys are store-assigned.
    pub fn incrementing(&self) -> bool {
        self.incrementing
    }

    /// All reserved column names.
    pub fn reserved_columns(&self) -> [&str; 4] {
        [&self.key, &self.left, &self.right, &self.tree]
    }

    /// `true` if `name` is one of the reserved columns.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved_columns().contains(&name)
    }

    pub(crate) fn check_attribute(&self, name: &str) -> Result<()> {
        if self.is_reserved(name) {
            return Err(Error::InvalidArgument(format!(
                "[{name}] is a reserved column of [{}] and cannot be set as an attribute",
                self.table
            )));
        }
        Ok(())
    }
}
