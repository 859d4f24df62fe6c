// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Gap engine: shift every bound at or past a threshold within one tree.
//!
//! Lefts and rights are updated by two independent range updates; an ancestor
//! straddling the threshold has its right shifted but not its left. Callers run
//! these inside the store transaction of the enclosing mutation.

use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::Column;
use crate::store::{Cmp, Filter, Shift, Store};
use crate::types::TreeId;

/// Add `size` to every left and every right that is `>= left` in `tree`.
///
/// `size` may be negative (closing a gap) but never zero.
///
/// ```rust
/// use understory_nested_set::{MemoryStore, Node, Worker, gap};
///
/// let mut worker = Worker::new(MemoryStore::default());
/// let mut root = Node::new();
/// worker.insert_as_root(&mut root).unwrap();
///
/// // Open two slots at the root's right bound.
/// gap::create_gap(worker.store_mut(), root.tree(), root.right(), 2).unwrap();
/// assert_eq!(worker.find(root.key().unwrap()).unwrap().right(), 4);
/// ```
pub fn create_gap<S: Store>(
    store: &mut S,
    tree: TreeId,
    left: i64,
    size: i64,
) -> Result<()> {
    if size == 0 {
        return Err(Error::InvalidArgument(format!(
            "cannot create a gap in tree [{tree}] starting from [{left}] with a size of [0]"
        )));
    }

    let lefts = store.shift(
        &Filter::in_tree(tree).and(Column::Left, Cmp::Ge, left),
        Shift::left(size),
    )?;
    let rights = store.shift(
        &Filter::in_tree(tree).and(Column::Right, Cmp::Ge, left),
        Shift::right(size),
    )?;
    debug!(tree = tree.0, left, size, lefts, rights, "gap shifted");
    Ok(())
}

/// Close a gap of `size` starting at `start`; the inverse of [`create_gap`].
///
/// `size` is a width and must not be negative.
pub fn remove_gap<S: Store>(
    store: &mut S,
    tree: TreeId,
    start: i64,
    size: i64,
) -> Result<()> {
    if size < 0 {
        return Err(Error::InvalidArgument(format!(
            "cannot remove a gap of negative size [{size}] in tree [{tree}]; pass the width"
        )));
    }
    create_gap(store, tree, start, -size)
}
