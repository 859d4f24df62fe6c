// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree reconstruction: fold preorder rows with depths into a nested hierarchy.
//!
//! Entries live in one arena and refer to each other by [`EntryId`]; a
//! [`Hierarchy`] owns its entries outright and is rebuilt on every read.

use core::ops::Index;

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::types::{Bounds, Key, Node, TreeId};

/// Index of an entry inside a [`Hierarchy`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u32);

impl EntryId {
    /// Position of the entry in preorder.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One reconstructed node: the row, its depth, and its children in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    node: Node,
    depth: u32,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
}

impl Entry {
    /// The row.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Depth relative to the node the hierarchy was requested for.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Enclosing entry, `None` for top-level entries.
    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// Children in left-bound order.
    pub fn children(&self) -> &[EntryId] {
        &self.children
    }
}

/// A forest of [`Entry`] values built from preorder rows.
///
/// The fold always produces a list of top-level entries. A subtree read yields
/// exactly one; [`Hierarchy::apex`] returns it and fails loudly otherwise.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hierarchy {
    entries: Vec<Entry>,
    roots: Vec<EntryId>,
}

impl Hierarchy {
    /// Fold `(row, depth)` pairs given in preorder.
    ///
    /// Rows are attached under the nearest open entry of smaller depth. Fails
    /// with [`Error::InvariantViolation`] when a depth skips a level or when a
    /// later top-level row sits at a different depth than the first one.
    ///
    /// ```rust
    /// use understory_nested_set::{Hierarchy, Node};
    ///
    /// let rows = [(Node::new(), 0), (Node::new(), 1), (Node::new(), 1)];
    /// let hierarchy = Hierarchy::from_preorder(rows).unwrap();
    /// let apex = hierarchy.apex().unwrap();
    /// assert_eq!(apex.children().len(), 2);
    /// ```
    pub fn from_preorder<I>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Node, u32)>,
    {
        let mut hierarchy = Self::default();
        let mut open: SmallVec<[EntryId; 16]> = SmallVec::new();

        for (node, depth) in rows {
            while let Some(&top) = open.last() {
                if hierarchy[top].depth >= depth {
                    open.pop();
                } else {
                    break;
                }
            }

            let id = EntryId(u32::try_from(hierarchy.entries.len()).map_err(|_| {
                Error::InvariantViolation("hierarchy exceeds u32::MAX entries".into())
            })?);

            let parent = open.last().copied();
            match parent {
                Some(parent) => {
                    let parent_depth = hierarchy[parent].depth;
                    if depth > parent_depth + 1 {
                        return Err(Error::InvariantViolation(format!(
                            "row at depth {depth} follows an entry at depth {parent_depth}"
                        )));
                    }
                    hierarchy.entries[parent.index()].children.push(id);
                }
                None => {
                    if let Some(&first) = hierarchy.roots.first() {
                        let root_depth = hierarchy[first].depth;
                        if depth != root_depth {
                            return Err(Error::InvariantViolation(format!(
                                "top-level row at depth {depth} after a root at depth {root_depth}"
                            )));
                        }
                    }
                    hierarchy.roots.push(id);
                }
            }

            hierarchy.entries.push(Entry {
                node,
                depth,
                parent,
                children: Vec::new(),
            });
            open.push(id);
        }

        Ok(hierarchy)
    }

    /// Top-level entries in order.
    pub fn roots(&self) -> &[EntryId] {
        &self.roots
    }

    /// The single top-level entry.
    ///
    /// Fails with [`Error::InvariantViolation`] when the hierarchy is empty or
    /// has more than one top-level entry.
    pub fn apex(&self) -> Result<&Entry> {
        match self.roots.as_slice() {
            [only] => Ok(&self[*only]),
            roots => Err(Error::InvariantViolation(format!(
                "expected a single apex, found {} top-level entries",
                roots.len()
            ))),
        }
    }

    /// Entry by id.
    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.index())
    }

    /// Children of an entry.
    pub fn children(&self, id: EntryId) -> impl Iterator<Item = &Entry> + '_ {
        self.get(id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|child| &self[*child])
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no rows were folded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in preorder.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.entries.iter()
    }

    /// Entry holding the row with `key`.
    pub fn find(&self, key: Key) -> Option<EntryId> {
        self.entries
            .iter()
            .position(|entry| entry.node.key() == Some(key))
            .and_then(|index| u32::try_from(index).ok())
            .map(EntryId)
    }
}

impl Index<EntryId> for Hierarchy {
    type Output = Entry;

    fn index(&self, id: EntryId) -> &Entry {
        &self.entries[id.index()]
    }
}

/// Pair rows ordered by `(tree, left)` with their depth, derived from interval
/// containment.
///
/// Depth counts the enclosing rows present in the input, so a subtree read
/// yields depths relative to its root. Malformed bounds surface as
/// [`Error::InvariantViolation`].
pub(crate) fn annotate_depths(rows: Vec<Node>) -> Result<Vec<(Node, u32)>> {
    let mut open: SmallVec<[Bounds; 16]> = SmallVec::new();
    let mut current_tree: Option<TreeId> = None;
    let mut out = Vec::with_capacity(rows.len());

    for node in rows {
        let bounds = node.bounds();
        if current_tree != Some(node.tree()) {
            open.clear();
            current_tree = Some(node.tree());
        }
        if bounds.left >= bounds.right {
            return Err(malformed(&node, "has left >= right"));
        }
        while open.last().is_some_and(|top| top.right < bounds.left) {
            open.pop();
        }
        if let Some(top) = open.last() {
            if bounds.left <= top.left || bounds.left == top.right {
                return Err(malformed(&node, "shares a bound with an earlier row"));
            }
            if bounds.right >= top.right {
                return Err(malformed(&node, "partially overlaps an earlier row"));
            }
        }
        let depth = u32::try_from(open.len())
            .map_err(|_| Error::InvariantViolation("nesting exceeds u32::MAX levels".into()))?;
        open.push(bounds);
        out.push((node, depth));
    }

    Ok(out)
}

fn malformed(node: &Node, what: &str) -> Error {
    let key = node
        .key()
        .map_or_else(|| "unsaved".to_owned(), |key| key.to_string());
    Error::InvariantViolation(format!(
        "row [{key}] with bounds {} in tree [{}] {what}",
        node.bounds(),
        node.tree()
    ))
}
