// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory store: one hash map of rows.

use hashbrown::HashMap;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::schema::TableSchema;
use crate::store::{Filter, Shift, Store};
use crate::types::{Attributes, Bounds, Key, Node, TreeId};

/// A node table held in memory.
///
/// Queries are linear scans. [`Store::transaction`] snapshots the rows and restores
/// them when the closure fails.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    schema: TableSchema,
    rows: HashMap<Key, Node>,
    next_key: i64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(TableSchema::default())
    }
}

impl MemoryStore {
    /// Empty table with the given schema.
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: HashMap::new(),
            next_key: 1,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` if the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn apply<F>(&mut self, filter: &Filter, mut f: F) -> usize
    where
        F: FnMut(&mut Node),
    {
        let mut touched = 0;
        for node in self.rows.values_mut() {
            if filter.matches(node) {
                f(node);
                touched += 1;
            }
        }
        touched
    }
}

impl Store for MemoryStore {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let rows = self.rows.clone();
        let next_key = self.next_key;
        let result = f(self);
        if let Err(err) = &result {
            warn!(table = self.schema.table(), error = %err, "rolling back");
            self.rows = rows;
            self.next_key = next_key;
        }
        result
    }

    fn max_tree(&self) -> Result<Option<TreeId>> {
        Ok(self.rows.values().map(Node::tree).max())
    }

    fn fetch(&self, key: Key) -> Result<Option<Node>> {
        Ok(self.rows.get(&key).cloned())
    }

    fn select(&self, filter: &Filter) -> Result<Vec<Node>> {
        let mut out: Vec<Node> = self
            .rows
            .values()
            .filter(|node| filter.matches(node))
            .cloned()
            .collect();
        out.sort_by_key(|node| (node.tree(), node.left(), node.key()));
        trace!(rows = out.len(), "select");
        Ok(out)
    }

    fn shift(&mut self, filter: &Filter, shift: Shift) -> Result<usize> {
        let touched = self.apply(filter, |node| {
            node.set_bounds(Bounds::new(
                node.left() + shift.left,
                node.right() + shift.right,
            ));
            if let Some(tree) = shift.tree {
                node.set_tree(tree);
            }
        });
        trace!(touched, "shift");
        Ok(touched)
    }

    fn insert(&mut self, node: &Node) -> Result<Key> {
        let key = match node.key() {
            Some(key) => key,
            None if self.schema.incrementing() => {
                while self.rows.contains_key(&Key(self.next_key)) {
                    self.next_key = self.next_key.checked_add(1).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "[{}] has no keys left to assign",
                            self.schema.table()
                        ))
                    })?;
                }
                Key(self.next_key)
            }
            None => {
                return Err(Error::InvalidArgument(format!(
                    "[{}] does not assign keys",
                    self.schema.table()
                )));
            }
        };
        if self.rows.contains_key(&key) {
            return Err(Error::DuplicateKey {
                key,
                table: self.schema.table().to_owned(),
            });
        }
        let mut row = node.clone();
        row.set_key(key);
        self.rows.insert(key, row);
        self.next_key = self.next_key.max(key.0.saturating_add(1));
        Ok(key)
    }

    fn update_attributes(&mut self, key: Key, attributes: &Attributes) -> Result<()> {
        let row = self.rows.get_mut(&key).ok_or_else(|| Error::NotFound {
            key,
            table: self.schema.table().to_owned(),
        })?;
        row.merge_attributes(attributes);
        Ok(())
    }

    fn delete(&mut self, filter: &Filter) -> Result<usize> {
        let before = self.rows.len();
        self.rows.retain(|_, node| !filter.matches(node));
        Ok(before - self.rows.len())
    }
}
