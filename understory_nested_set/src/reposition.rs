// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node repositioning: park a subtree outside the live range, then bring it back
//! at a new position.
//!
//! A parked subtree occupies `[-size, 0]` of its tree. Only one subtree may be
//! parked per tree at a time; a second slide-out is reported instead of letting
//! the two parked ranges collide.

use tracing::debug;

use crate::bounds::{park_delta, subtree_gap, unpark_delta};
use crate::error::{Error, Result};
use crate::gap::{create_gap, remove_gap};
use crate::schema::Column;
use crate::store::{Cmp, Filter, Shift, Store};
use crate::types::{Node, TreeId};

/// Move `node` and its subtree to `[-size, 0]` and close the gap it leaves.
///
/// `node` must carry its current bounds; re-read it from the store first when in
/// doubt. Its bounds are updated in place.
pub fn slide_out<S: Store>(store: &mut S, node: &mut Node) -> Result<()> {
    let bounds = node.bounds();
    let tree = node.tree();
    if bounds.is_parked() {
        return Err(Error::InvariantViolation(format!(
            "node with bounds {bounds} in tree [{tree}] is already slid out"
        )));
    }
    let parked = store.select(&Filter::in_tree(tree).and(Column::Right, Cmp::Le, 0))?;
    if !parked.is_empty() {
        return Err(Error::InvariantViolation(format!(
            "tree [{tree}] already holds {} parked rows",
            parked.len()
        )));
    }

    let delta = park_delta(bounds);
    let moved = store.shift(
        &Filter::in_tree(tree)
            .and(Column::Left, Cmp::Ge, bounds.left)
            .and(Column::Left, Cmp::Le, bounds.right),
        Shift::both(delta),
    )?;
    remove_gap(store, tree, bounds.left, subtree_gap(bounds))?;
    node.set_bounds(bounds.shifted(delta));

    debug!(tree = tree.0, left = bounds.left, right = bounds.right, delta, moved, "slid out");
    Ok(())
}

/// Bring a parked `node` back into its own tree at `left`.
pub fn slide_in<S: Store>(store: &mut S, node: &mut Node, left: i64) -> Result<()> {
    let tree = node.tree();
    slide_in_tree(store, node, tree, left)
}

/// Bring a parked `node` into `tree` at `left`, re-tagging its rows when `tree`
/// differs from the tree it was parked in.
pub fn slide_in_tree<S: Store>(
    store: &mut S,
    node: &mut Node,
    tree: TreeId,
    left: i64,
) -> Result<()> {
    let bounds = node.bounds();
    let from = node.tree();
    if bounds.right != 0 {
        return Err(Error::InvariantViolation(format!(
            "node with bounds {bounds} in tree [{from}] is not slid out"
        )));
    }
    if left < 1 {
        return Err(Error::InvalidArgument(format!(
            "cannot slide a node into tree [{tree}] at left bound [{left}]"
        )));
    }

    let size = bounds.size();
    create_gap(store, tree, left, subtree_gap(bounds))?;

    let delta = unpark_delta(bounds, left);
    let shift = if tree == from {
        Shift::both(delta)
    } else {
        Shift::both(delta).with_tree(tree)
    };
    let moved = store.shift(
        &Filter::in_tree(from)
            .and(Column::Left, Cmp::Ge, -size)
            .and(Column::Right, Cmp::Le, 0),
        shift,
    )?;
    node.set_bounds(bounds.shifted(delta));
    node.set_tree(tree);

    debug!(from = from.0, tree = tree.0, left, delta, moved, "slid in");
    Ok(())
}
