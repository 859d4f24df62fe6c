// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public types: keys, tree identifiers, bounds, attribute values, and node rows.

use core::fmt;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::schema::TableSchema;

/// Primary key of a node row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub i64);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier partitioning independent trees that share one table.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeId(pub i64);

impl TreeId {
    /// The identifier handed out when a table holds no trees yet.
    pub const FIRST: Self = Self(1);

    /// The identifier following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `left`/`right` pair of a node.
///
/// A node's descendants are exactly the rows of the same tree whose bounds fall
/// strictly inside its own. Parked subtrees (slid out of the live range during a
/// move) sit at non-positive bounds and end on `0`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bounds {
    /// Left bound (preorder entry).
    pub left: i64,
    /// Right bound (preorder exit).
    pub right: i64,
}

impl Bounds {
    /// Create bounds from a left and right value.
    pub const fn new(left: i64, right: i64) -> Self {
        Self { left, right }
    }

    /// `right - left`; always odd for a well-formed node.
    pub const fn size(self) -> i64 {
        self.right - self.left
    }

    /// Number of descendants encoded by these bounds.
    pub const fn descendant_count(self) -> i64 {
        (self.size() - 1) / 2
    }

    /// `true` when the node has no children.
    pub const fn is_leaf(self) -> bool {
        self.size() == 1
    }

    /// `true` when `other` lies strictly inside these bounds (ancestor test).
    pub const fn contains(self, other: Self) -> bool {
        self.left < other.left && other.right < self.right
    }

    /// Like [`Bounds::contains`] but also `true` for identical bounds.
    pub const fn encloses(self, other: Self) -> bool {
        self.left <= other.left && other.right <= self.right
    }

    /// `true` when the bounds sit outside the live numbering range.
    pub const fn is_parked(self) -> bool {
        self.right <= 0
    }

    /// Both bounds moved by `delta`.
    #[must_use]
    pub const fn shifted(self, delta: i64) -> Self {
        Self::new(self.left + delta, self.right + delta)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.left, self.right)
    }
}

/// A domain attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// The text payload, if this is a [`Value::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The integer payload, if this is a [`Value::Integer`].
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Domain columns of a row, keyed by column name.
pub type Attributes = BTreeMap<String, Value>;

/// A node row: the reserved nested-set columns plus opaque domain attributes.
///
/// The reserved columns (key, bounds, tree) are read-only from the outside; the
/// [`Worker`](crate::Worker) writes them as it mutates the store so callers can
/// keep using the same value without re-fetching it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    key: Option<Key>,
    bounds: Bounds,
    tree: TreeId,
    attributes: Attributes,
}

impl Node {
    /// A new, unsaved node without a key. The store assigns one on insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, unsaved node carrying an application-assigned key.
    pub fn with_key(key: Key) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    /// Rebuild a node from a stored row.
    ///
    /// Intended for [`Store`](crate::Store) implementations; `attributes` must not
    /// contain reserved columns.
    pub fn from_row(key: Key, bounds: Bounds, tree: TreeId, attributes: Attributes) -> Self {
        Self {
            key: Some(key),
            bounds,
            tree,
            attributes,
        }
    }

    /// Primary key, once the node has been persisted (or was given one).
    pub fn key(&self) -> Option<Key> {
        self.key
    }

    /// Current bounds.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Current left bound.
    pub fn left(&self) -> i64 {
        self.bounds.left
    }

    /// Current right bound.
    pub fn right(&self) -> i64 {
        self.bounds.right
    }

    /// Tree the node belongs to.
    pub fn tree(&self) -> TreeId {
        self.tree
    }

    /// Domain attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// A single domain attribute.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set a domain attribute, returning the previous value.
    ///
    /// Fails with [`Error::InvalidArgument`] when `name` is one of the schema's
    /// reserved columns.
    pub fn set_attribute(
        &mut self,
        schema: &TableSchema,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let name = name.into();
        schema.check_attribute(&name)?;
        Ok(self.attributes.insert(name, value.into()))
    }

    /// Builder form of [`Node::set_attribute`].
    pub fn with_attribute(
        mut self,
        schema: &TableSchema,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.set_attribute(schema, name, value)?;
        Ok(self)
    }

    /// Remove a domain attribute.
    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    /// The key, or an error naming the operation that needed it.
    pub(crate) fn require_key(&self, operation: &str) -> Result<Key> {
        self.key.ok_or_else(|| {
            Error::InvalidArgument(format!("{operation} requires a persisted node with a key"))
        })
    }

    pub(crate) fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    pub(crate) fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = bounds;
    }

    pub(crate) fn set_tree(&mut self, tree: TreeId) {
        self.tree = tree;
    }

    pub(crate) fn merge_attributes(&mut self, attributes: &Attributes) {
        for (name, value) in attributes {
            self.attributes.insert(name.clone(), value.clone());
        }
    }

    /// Copy the reserved columns of `fresh` over this node, keeping local attributes.
    pub(crate) fn refresh_from(&mut self, fresh: &Self) {
        self.bounds = fresh.bounds;
        self.tree = fresh.tree;
    }
}
