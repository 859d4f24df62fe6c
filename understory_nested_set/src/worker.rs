// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Worker: the mutation and query operations over a [`Store`].

use hashbrown::HashSet;
use tracing::{debug, trace};

use crate::bounds::{self, LEAF_GAP, Placement, leaf_at};
use crate::error::{Error, Result};
use crate::gap::create_gap;
use crate::hierarchy::{Hierarchy, annotate_depths};
use crate::reposition::{slide_in_tree, slide_out};
use crate::schema::{Column, TableSchema};
use crate::store::{Cmp, Filter, Store};
use crate::types::{Attributes, Key, Node, TreeId, Value};

/// How the worker scopes structural mutations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TransactionMode {
    /// Every mutation runs inside its own [`Store::transaction`].
    #[default]
    Managed,
    /// The caller already holds a transaction; statements run directly.
    External,
}

/// Worker configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Transaction scoping for structural mutations.
    pub transactions: TransactionMode,
}

impl WorkerConfig {
    /// Configuration for callers that manage transactions themselves.
    pub fn external() -> Self {
        Self {
            transactions: TransactionMode::External,
        }
    }
}

/// Runs nested-set operations against one node table.
///
/// Mutations take the caller's [`Node`] values by `&mut` and write the new
/// bounds, tree and key back into them once the store has committed, so the
/// caller can keep using them without re-fetching. On error the store is
/// rolled back and the passed nodes are left as they were.
///
/// Callers must serialize structural mutations per tree: two concurrent
/// mutations of the same tree can compute overlapping gaps. Reads need no
/// transaction.
///
/// ```rust
/// use understory_nested_set::{MemoryStore, Node, Worker};
///
/// let mut worker = Worker::new(MemoryStore::default());
/// let mut root = Node::new();
/// worker.insert_as_root(&mut root).unwrap();
///
/// let mut child = Node::new();
/// worker.insert_as_last_child(&mut child, &mut root).unwrap();
/// assert_eq!((root.left(), root.right()), (1, 4));
/// assert_eq!(worker.depth(child.key().unwrap()).unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct Worker<S> {
    store: S,
    config: WorkerConfig,
}

impl<S: Store> Worker<S> {
    /// Worker with managed transactions.
    pub fn new(store: S) -> Self {
        Self::with_config(store, WorkerConfig::default())
    }

    /// Worker with an explicit configuration.
    pub fn with_config(store: S, config: WorkerConfig) -> Self {
        Self { store, config }
    }

    /// Active configuration.
    pub fn config(&self) -> WorkerConfig {
        self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The underlying store, mutably. Writes made through it bypass the
    /// worker's transaction scoping.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Give the store back.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Schema of the node table.
    pub fn schema(&self) -> &TableSchema {
        self.store.schema()
    }

    fn run<T>(&mut self, f: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        match self.config.transactions {
            TransactionMode::Managed => self.store.transaction(f),
            TransactionMode::External => f(&mut self.store),
        }
    }

    // --- inserts ---

    /// Persist `node` as the single root of a brand new tree.
    pub fn insert_as_root(&mut self, node: &mut Node) -> Result<Key> {
        let mut working = node.clone();
        let key = self.run(|store| insert_root(store, &mut working))?;
        *node = working;
        Ok(key)
    }

    /// Persist `node` as the first child of `parent`.
    pub fn insert_as_first_child(&mut self, node: &mut Node, parent: &mut Node) -> Result<Key> {
        self.insert(node, Placement::FirstChild, parent)
    }

    /// Persist `node` as the last child of `parent`.
    pub fn insert_as_last_child(&mut self, node: &mut Node, parent: &mut Node) -> Result<Key> {
        self.insert(node, Placement::LastChild, parent)
    }

    /// Persist `node` as the sibling right before `sibling`.
    pub fn insert_as_previous_sibling(
        &mut self,
        node: &mut Node,
        sibling: &mut Node,
    ) -> Result<Key> {
        self.insert(node, Placement::PreviousSibling, sibling)
    }

    /// Persist `node` as the sibling right after `sibling`.
    pub fn insert_as_next_sibling(&mut self, node: &mut Node, sibling: &mut Node) -> Result<Key> {
        self.insert(node, Placement::NextSibling, sibling)
    }

    /// Persist `node` as a leaf placed relative to `reference`.
    ///
    /// `reference` is re-read before the gap is opened and holds its shifted
    /// bounds afterwards.
    pub fn insert(
        &mut self,
        node: &mut Node,
        placement: Placement,
        reference: &mut Node,
    ) -> Result<Key> {
        let mut working = node.clone();
        let mut anchor = reference.clone();
        let key = self.run(|store| insert_at(store, &mut working, placement, &mut anchor))?;
        *node = working;
        *reference = anchor;
        Ok(key)
    }

    // --- moves ---

    /// Move `node` and its subtree to become the first child of `parent`.
    pub fn move_as_first_child(&mut self, node: &mut Node, parent: &mut Node) -> Result<()> {
        self.move_to(node, Placement::FirstChild, parent)
    }

    /// Move `node` and its subtree to become the last child of `parent`.
    pub fn move_as_last_child(&mut self, node: &mut Node, parent: &mut Node) -> Result<()> {
        self.move_to(node, Placement::LastChild, parent)
    }

    /// Move `node` and its subtree right before `sibling`.
    pub fn move_as_previous_sibling(&mut self, node: &mut Node, sibling: &mut Node) -> Result<()> {
        self.move_to(node, Placement::PreviousSibling, sibling)
    }

    /// Move `node` and its subtree right after `sibling`.
    pub fn move_as_next_sibling(&mut self, node: &mut Node, sibling: &mut Node) -> Result<()> {
        self.move_to(node, Placement::NextSibling, sibling)
    }

    /// Move `node` and its subtree relative to `target`, possibly into another tree.
    ///
    /// Both nodes are re-read from the store. Fails with [`Error::NotFound`]
    /// when either row is gone and with [`Error::InvalidArgument`] when
    /// `target` is `node` itself or one of its descendants.
    pub fn move_to(&mut self, node: &mut Node, placement: Placement, target: &mut Node) -> Result<()> {
        let mut working = node.clone();
        let mut anchor = target.clone();
        self.run(|store| move_subtree(store, &mut working, placement, &mut anchor))?;
        *node = working;
        *target = anchor;
        Ok(())
    }

    /// Move `node` and its subtree out into a brand new tree, as its root.
    pub fn move_as_root(&mut self, node: &mut Node) -> Result<()> {
        let mut working = node.clone();
        self.run(|store| move_root(store, &mut working))?;
        *node = working;
        Ok(())
    }

    // --- deletes ---

    /// Delete `node` and its whole subtree, closing the gap it leaves.
    ///
    /// Returns the number of rows removed.
    pub fn delete(&mut self, node: &Node) -> Result<usize> {
        let mut working = node.clone();
        self.run(|store| delete_subtree(store, &mut working))
    }

    /// Reconcile the descendants of `parent` with `nodes`.
    ///
    /// Listed nodes with a key that already exists are moved into place and get
    /// their attributes updated, every other listed node is inserted, in list
    /// order, as the last child of its listed parent. Existing descendants of
    /// `parent` that appear nowhere in `nodes` are deleted afterwards.
    pub fn map_tree(&mut self, parent: &mut Node, nodes: &[MapNode]) -> Result<MapSummary> {
        for node in nodes {
            node.check_attributes(self.store.schema())?;
        }
        let mut anchor = parent.clone();
        let summary = self.run(|store| map_children(store, &mut anchor, nodes))?;
        *parent = anchor;
        Ok(summary)
    }

    // --- reads ---

    /// The row with `key`.
    pub fn find(&self, key: Key) -> Result<Node> {
        self.store
            .fetch(key)?
            .ok_or_else(|| not_found(&self.store, key))
    }

    /// Every row, or every row of one tree, in `(tree, left)` order.
    pub fn all_flat(&self, tree: Option<TreeId>) -> Result<Vec<Node>> {
        let filter = tree.map_or_else(Filter::all, Filter::in_tree);
        self.store.select(&filter)
    }

    /// The first root of every tree.
    pub fn all_root(&self) -> Result<Vec<Node>> {
        self.store
            .select(&Filter::all().and(Column::Left, Cmp::Eq, 1))
    }

    /// Every leaf, or every leaf of one tree.
    pub fn all_leaf(&self, tree: Option<TreeId>) -> Result<Vec<Node>> {
        let filter = tree.map_or_else(Filter::all, Filter::in_tree).leaves();
        self.store.select(&filter)
    }

    /// Strict ancestors of `key`, root first.
    pub fn path(&self, key: Key) -> Result<Vec<Node>> {
        let node = self.find(key)?;
        ancestors(&self.store, &node)
    }

    /// Number of strict ancestors of `key`.
    pub fn depth(&self, key: Key) -> Result<usize> {
        Ok(self.path(key)?.len())
    }

    /// Depth of `key` below `ancestor`; `0` when they are the same node.
    ///
    /// Fails with [`Error::InvalidArgument`] when `ancestor` is not an ancestor
    /// of `key`.
    pub fn relative_depth(&self, key: Key, ancestor: Key) -> Result<usize> {
        if key == ancestor {
            self.find(key)?;
            return Ok(0);
        }
        let node = self.find(key)?;
        let top = self.find(ancestor)?;
        if top.tree() != node.tree() || !top.bounds().contains(node.bounds()) {
            return Err(Error::InvalidArgument(format!(
                "node [{ancestor}] is not an ancestor of node [{key}]"
            )));
        }
        let between = ancestors(&self.store, &node)?
            .into_iter()
            .filter(|row| top.bounds().encloses(row.bounds()))
            .count();
        Ok(between)
    }

    /// The subtree rooted at `key` in `tree`, folded into a [`Hierarchy`]
    /// whose depths are relative to `key`.
    ///
    /// With `max_depth > 0`, only that many levels below `key` are included.
    pub fn tree(&self, key: Key, tree: TreeId, max_depth: u32) -> Result<Hierarchy> {
        let root = self.find_in(key, tree)?;
        let rows = self.store.subtree(&root, max_depth)?;
        trace!(key = key.0, tree = tree.0, max_depth, rows = rows.len(), "subtree read");
        Hierarchy::from_preorder(rows)
    }

    /// Descendants of `key` in preorder, limited to `max_depth` levels when
    /// `max_depth > 0`.
    pub fn children(&self, key: Key, tree: TreeId, max_depth: u32) -> Result<Vec<Node>> {
        let root = self.find_in(key, tree)?;
        Ok(self
            .store
            .subtree(&root, max_depth)?
            .into_iter()
            .filter(|(_, depth)| *depth > 0)
            .map(|(node, _)| node)
            .collect())
    }

    /// Check that the rows of `tree` form a well-formed nested set: proper
    /// nesting, odd sizes, and bounds covering `1..=2n` exactly once.
    pub fn validate(&self, tree: TreeId) -> Result<()> {
        let rows = self.store.select(&Filter::in_tree(tree))?;
        let mut seen: Vec<i64> = Vec::with_capacity(rows.len() * 2);
        for node in &rows {
            if node.bounds().size() % 2 != 1 {
                return Err(Error::InvariantViolation(format!(
                    "node [{}] in tree [{tree}] has even size bounds {}",
                    node.key().map_or(0, |key| key.0),
                    node.bounds()
                )));
            }
            seen.push(node.left());
            seen.push(node.right());
        }
        annotate_depths(rows)?;
        seen.sort_unstable();
        if let Some((position, bound)) = seen
            .iter()
            .zip(1_i64..)
            .find(|(bound, expected)| **bound != *expected)
            .map(|(bound, expected)| (expected, *bound))
        {
            return Err(Error::InvariantViolation(format!(
                "tree [{tree}] expected bound {position} but found {bound}"
            )));
        }
        Ok(())
    }

    fn find_in(&self, key: Key, tree: TreeId) -> Result<Node> {
        match self.store.fetch(key)? {
            Some(node) if node.tree() == tree => Ok(node),
            _ => Err(not_found(&self.store, key)),
        }
    }
}

/// A desired node for [`Worker::map_tree`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapNode {
    key: Option<Key>,
    attributes: Attributes,
    children: Vec<MapNode>,
}

impl MapNode {
    /// A node to be inserted with a store-assigned key.
    pub fn new() -> Self {
        Self::default()
    }

    /// A node with a known key: moved into place when it exists, inserted
    /// under that key otherwise.
    pub fn with_key(key: Key) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    /// Attribute to write on the node. Reserved columns are rejected by
    /// [`Worker::map_tree`].
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Append a desired child.
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Key, if any.
    pub fn key(&self) -> Option<Key> {
        self.key
    }

    /// Attributes to write.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Desired children.
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    fn check_attributes(&self, schema: &TableSchema) -> Result<()> {
        for name in self.attributes.keys() {
            schema.check_attribute(name)?;
        }
        self.children
            .iter()
            .try_for_each(|child| child.check_attributes(schema))
    }

    fn collect_keys(&self, keys: &mut HashSet<Key>) {
        if let Some(key) = self.key {
            keys.insert(key);
        }
        for child in &self.children {
            child.collect_keys(keys);
        }
    }
}

/// Outcome of [`Worker::map_tree`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MapSummary {
    /// Keys of every listed node, in list preorder.
    pub mapped: Vec<Key>,
    /// Rows deleted because they were no longer listed.
    pub removed: usize,
}

fn not_found<S: Store>(store: &S, key: Key) -> Error {
    Error::NotFound {
        key,
        table: store.schema().table().to_owned(),
    }
}

/// Overwrite the reserved columns of `node` with what the store holds.
fn refresh<S: Store>(store: &S, node: &mut Node, operation: &str) -> Result<Key> {
    let key = node.require_key(operation)?;
    let fresh = store.fetch(key)?.ok_or_else(|| not_found(store, key))?;
    node.refresh_from(&fresh);
    Ok(key)
}

fn ancestors<S: Store>(store: &S, node: &Node) -> Result<Vec<Node>> {
    store.select(
        &Filter::in_tree(node.tree())
            .and(Column::Left, Cmp::Lt, node.left())
            .and(Column::Right, Cmp::Gt, node.right()),
    )
}

fn next_tree<S: Store>(store: &S) -> Result<TreeId> {
    Ok(store.max_tree()?.map_or(TreeId::FIRST, TreeId::next))
}

fn persist<S: Store>(store: &mut S, node: &mut Node) -> Result<Key> {
    if node.key().is_none() && !store.schema().incrementing() {
        return Err(Error::InvalidArgument(format!(
            "[{}] does not assign keys; the node needs one before it is inserted",
            store.schema().table()
        )));
    }
    let key = store.insert(node)?;
    node.set_key(key);
    Ok(key)
}

fn insert_root<S: Store>(store: &mut S, node: &mut Node) -> Result<Key> {
    let tree = next_tree(store)?;
    node.set_bounds(bounds::root());
    node.set_tree(tree);
    let key = persist(store, node)?;
    debug!(key = key.0, tree = tree.0, "inserted root");
    Ok(key)
}

fn insert_at<S: Store>(
    store: &mut S,
    node: &mut Node,
    placement: Placement,
    reference: &mut Node,
) -> Result<Key> {
    refresh(store, reference, "insert")?;
    let tree = reference.tree();
    let leaf = leaf_at(placement, reference.bounds());

    create_gap(store, tree, leaf.left, LEAF_GAP)?;
    node.set_bounds(leaf);
    node.set_tree(tree);
    let key = persist(store, node)?;
    reference.set_bounds(placement.reference_after_gap(reference.bounds(), LEAF_GAP));

    debug!(key = key.0, tree = tree.0, ?placement, left = leaf.left, "inserted node");
    Ok(key)
}

fn move_subtree<S: Store>(
    store: &mut S,
    node: &mut Node,
    placement: Placement,
    target: &mut Node,
) -> Result<()> {
    let key = refresh(store, node, "move")?;
    let target_key = refresh(store, target, "move")?;
    if key == target_key
        || (node.tree() == target.tree() && node.bounds().encloses(target.bounds()))
    {
        return Err(Error::InvalidArgument(format!(
            "cannot move node [{key}] relative to node [{target_key}] inside its own subtree"
        )));
    }

    slide_out(store, node)?;
    // The slide-out may have shifted the target.
    refresh(store, target, "move")?;
    let left = placement.target_left(target.bounds());
    slide_in_tree(store, node, target.tree(), left)?;
    refresh(store, target, "move")?;

    debug!(
        key = key.0,
        target = target_key.0,
        tree = target.tree().0,
        ?placement,
        left,
        "moved subtree"
    );
    Ok(())
}

fn move_root<S: Store>(store: &mut S, node: &mut Node) -> Result<()> {
    let key = refresh(store, node, "move")?;
    let tree = next_tree(store)?;
    slide_out(store, node)?;
    slide_in_tree(store, node, tree, bounds::root().left)?;
    debug!(key = key.0, tree = tree.0, "moved subtree to a new tree");
    Ok(())
}

fn delete_subtree<S: Store>(store: &mut S, node: &mut Node) -> Result<usize> {
    let key = refresh(store, node, "delete")?;
    slide_out(store, node)?;
    let parked = node.bounds();
    let removed = store.delete(
        &Filter::in_tree(node.tree())
            .and(Column::Left, Cmp::Ge, parked.left)
            .and(Column::Right, Cmp::Le, 0),
    )?;
    debug!(key = key.0, tree = node.tree().0, removed, "deleted subtree");
    Ok(removed)
}

fn map_children<S: Store>(
    store: &mut S,
    parent: &mut Node,
    nodes: &[MapNode],
) -> Result<MapSummary> {
    let parent_key = refresh(store, parent, "map")?;
    let existing: HashSet<Key> = store
        .select(
            &Filter::in_tree(parent.tree())
                .and(Column::Left, Cmp::Gt, parent.left())
                .and(Column::Right, Cmp::Lt, parent.right()),
        )?
        .iter()
        .filter_map(Node::key)
        .collect();
    let mut wanted = HashSet::new();
    for node in nodes {
        node.collect_keys(&mut wanted);
    }

    let mut summary = MapSummary::default();
    for node in nodes {
        map_one(store, parent, node, &mut summary.mapped)?;
    }

    let mut stale: Vec<Key> = existing.difference(&wanted).copied().collect();
    stale.sort_unstable();
    for key in stale {
        // Already gone with an earlier stale ancestor.
        let Some(mut row) = store.fetch(key)? else {
            continue;
        };
        summary.removed += delete_subtree(store, &mut row)?;
    }
    refresh(store, parent, "map")?;

    debug!(
        parent = parent_key.0,
        mapped = summary.mapped.len(),
        removed = summary.removed,
        "mapped tree"
    );
    Ok(summary)
}

fn map_one<S: Store>(
    store: &mut S,
    parent: &mut Node,
    wanted: &MapNode,
    mapped: &mut Vec<Key>,
) -> Result<()> {
    refresh(store, parent, "map")?;
    let existing = match wanted.key {
        Some(key) => store.fetch(key)?,
        None => None,
    };
    let mut node = match existing {
        Some(mut node) => {
            move_subtree(store, &mut node, Placement::LastChild, parent)?;
            if let Some(key) = node.key()
                && !wanted.attributes.is_empty()
            {
                store.update_attributes(key, &wanted.attributes)?;
            }
            node.merge_attributes(&wanted.attributes);
            node
        }
        None => {
            let mut node = wanted.key.map_or_else(Node::new, Node::with_key);
            node.merge_attributes(&wanted.attributes);
            insert_at(store, &mut node, Placement::LastChild, parent)?;
            node
        }
    };
    mapped.push(node.require_key("map")?);
    for child in &wanted.children {
        map_one(store, &mut node, child, mapped)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Entry;
    use crate::stores::MemoryStore;
    use crate::types::Bounds;

    fn worker() -> Worker<MemoryStore> {
        Worker::new(MemoryStore::default())
    }

    fn named(worker: &Worker<MemoryStore>, name: &str) -> Node {
        Node::new()
            .with_attribute(worker.schema(), "name", name)
            .unwrap()
    }

    fn names(nodes: &[Node]) -> Vec<&str> {
        nodes
            .iter()
            .filter_map(|node| node.attribute("name").and_then(Value::as_text))
            .collect()
    }

    /// R { A, B } in tree 1: the first concrete scenario.
    fn scenario() -> (Worker<MemoryStore>, Node, Node, Node) {
        let mut worker = worker();
        let mut r = named(&worker, "R");
        worker.insert_as_root(&mut r).unwrap();
        let mut a = named(&worker, "A");
        worker.insert_as_first_child(&mut a, &mut r).unwrap();
        let mut b = named(&worker, "B");
        worker.insert_as_last_child(&mut b, &mut r).unwrap();
        (worker, r, a, b)
    }

    #[test]
    fn inserts_update_node_and_reference_bounds() {
        let (worker, r, a, b) = scenario();
        assert_eq!((r.bounds(), r.tree()), (Bounds::new(1, 6), TreeId(1)));
        assert_eq!(a.bounds(), Bounds::new(2, 3));
        assert_eq!(b.bounds(), Bounds::new(4, 5));
        assert_eq!(worker.find(r.key().unwrap()).unwrap(), r);
        worker.validate(TreeId(1)).unwrap();
    }

    #[test]
    fn reads_on_the_small_tree() {
        let (worker, r, _, b) = scenario();
        assert_eq!(names(&worker.all_leaf(Some(TreeId(1))).unwrap()), ["A", "B"]);
        assert_eq!(names(&worker.path(b.key().unwrap()).unwrap()), ["R"]);
        assert_eq!(names(&worker.all_root().unwrap()), ["R"]);

        let hierarchy = worker.tree(r.key().unwrap(), TreeId(1), 0).unwrap();
        let apex = hierarchy.apex().unwrap();
        assert_eq!(apex.node().key(), r.key());
        let children: Vec<Node> = hierarchy
            .children(hierarchy.roots()[0])
            .map(|entry| entry.node().clone())
            .collect();
        assert_eq!(names(&children), ["A", "B"]);
    }

    #[test]
    fn sibling_inserts() {
        let (mut worker, mut r, mut a, mut b) = scenario();
        let mut before_a = named(&worker, "A0");
        worker
            .insert_as_previous_sibling(&mut before_a, &mut a)
            .unwrap();
        assert_eq!(before_a.bounds(), Bounds::new(2, 3));
        assert_eq!(a.bounds(), Bounds::new(4, 5));

        let mut after_b = named(&worker, "B1");
        worker.insert_as_next_sibling(&mut after_b, &mut b).unwrap();
        assert_eq!(b.bounds(), Bounds::new(6, 7), "re-read before the gap");
        assert_eq!(after_b.bounds(), Bounds::new(8, 9));

        r = worker.find(r.key().unwrap()).unwrap();
        assert_eq!(r.bounds(), Bounds::new(1, 10));
        assert_eq!(
            names(&worker.children(r.key().unwrap(), TreeId(1), 0).unwrap()),
            ["A0", "A", "B", "B1"]
        );
        worker.validate(TreeId(1)).unwrap();
    }

    #[test]
    fn move_as_next_sibling_reorders_without_growing_the_parent() {
        let (mut worker, r, mut a, mut b) = scenario();
        worker.move_as_next_sibling(&mut a, &mut b).unwrap();

        assert_eq!(b.bounds(), Bounds::new(2, 3));
        assert_eq!(a.bounds(), Bounds::new(4, 5));
        let r = worker.find(r.key().unwrap()).unwrap();
        assert_eq!(r.bounds(), Bounds::new(1, 6));
        assert_eq!(
            names(&worker.children(r.key().unwrap(), TreeId(1), 0).unwrap()),
            ["B", "A"]
        );
    }

    #[test]
    fn move_into_own_subtree_is_rejected_untouched() {
        let (mut worker, mut r, mut a, _) = scenario();
        let before = worker.all_flat(None).unwrap();
        assert!(matches!(
            worker.move_as_last_child(&mut r, &mut a),
            Err(Error::InvalidArgument(_))
        ));
        let mut r2 = r.clone();
        assert!(worker.move_as_first_child(&mut r, &mut r2).is_err());
        assert_eq!(worker.all_flat(None).unwrap(), before);
    }

    #[test]
    fn move_with_vanished_target_is_not_found_and_rolled_back() {
        let (mut worker, _, mut a, _) = scenario();
        let mut ghost = Node::with_key(Key(99));
        let before = worker.all_flat(None).unwrap();
        let err = worker.move_as_first_child(&mut a, &mut ghost).unwrap_err();
        assert!(matches!(err, Error::NotFound { key: Key(99), .. }));
        assert_eq!(err.to_string(), "cannot find node [99] in [nodes]");
        assert_eq!(worker.all_flat(None).unwrap(), before);
        assert_eq!(a.bounds(), Bounds::new(2, 3));
    }

    #[test]
    fn chain_depths() {
        // A { B { C } }
        let mut worker = worker();
        let mut a = named(&worker, "A");
        worker.insert_as_root(&mut a).unwrap();
        let mut b = named(&worker, "B");
        worker.insert_as_last_child(&mut b, &mut a).unwrap();
        let mut c = named(&worker, "C");
        worker.insert_as_last_child(&mut c, &mut b).unwrap();

        let (a_key, b_key, c_key) = (a.key().unwrap(), b.key().unwrap(), c.key().unwrap());
        assert_eq!(worker.depth(c_key).unwrap(), 2);
        assert_eq!(worker.depth(a_key).unwrap(), 0);
        assert_eq!(worker.relative_depth(c_key, a_key).unwrap(), 2);
        assert_eq!(worker.relative_depth(c_key, b_key).unwrap(), 1);
        assert_eq!(worker.relative_depth(c_key, c_key).unwrap(), 0);
        assert!(matches!(
            worker.relative_depth(a_key, c_key),
            Err(Error::InvalidArgument(_))
        ));

        let full = worker.tree(a_key, TreeId(1), 0).unwrap();
        let b_entry = full.apex().unwrap().children()[0];
        assert_eq!(full[b_entry].depth(), 1);
        assert_eq!(full[full[b_entry].children()[0]].depth(), 2);

        // Depths are relative to the requested node.
        let from_b = worker.tree(b_key, TreeId(1), 0).unwrap();
        assert_eq!(from_b.apex().unwrap().depth(), 0);
        assert_eq!(from_b.iter().map(Entry::depth).collect::<Vec<_>>(), [0, 1]);

        let limited = worker.tree(a_key, TreeId(1), 1).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(
            names(&worker.children(a_key, TreeId(1), 1).unwrap()),
            ["B"]
        );
        assert!(matches!(
            worker.tree(a_key, TreeId(2), 0),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn move_as_root_starts_a_new_tree() {
        let (mut worker, r, mut a, _) = scenario();
        worker.move_as_root(&mut a).unwrap();
        assert_eq!((a.bounds(), a.tree()), (Bounds::new(1, 2), TreeId(2)));
        assert_eq!(worker.find(r.key().unwrap()).unwrap().bounds(), Bounds::new(1, 4));
        assert_eq!(names(&worker.all_root().unwrap()), ["R", "A"]);
        worker.validate(TreeId(1)).unwrap();
        worker.validate(TreeId(2)).unwrap();
    }

    #[test]
    fn cross_tree_move_retags_the_subtree() {
        let (mut worker, _, mut a, _) = scenario();
        let mut other = named(&worker, "O");
        worker.insert_as_root(&mut other).unwrap();
        let mut leaf = named(&worker, "A.1");
        worker.insert_as_first_child(&mut leaf, &mut a).unwrap();

        worker.move_as_last_child(&mut a, &mut other).unwrap();
        assert_eq!(a.tree(), TreeId(2));
        assert_eq!(other.bounds(), Bounds::new(1, 6));
        assert_eq!(worker.find(leaf.key().unwrap()).unwrap().tree(), TreeId(2));
        worker.validate(TreeId(1)).unwrap();
        worker.validate(TreeId(2)).unwrap();
    }

    #[test]
    fn delete_removes_the_whole_subtree() {
        let (mut worker, r, mut a, _) = scenario();
        let mut leaf = named(&worker, "A.1");
        worker.insert_as_first_child(&mut leaf, &mut a).unwrap();

        assert_eq!(worker.delete(&a).unwrap(), 2);
        assert!(matches!(
            worker.find(leaf.key().unwrap()),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(worker.find(r.key().unwrap()).unwrap().bounds(), Bounds::new(1, 4));
        worker.validate(TreeId(1)).unwrap();
    }

    #[test]
    fn external_mode_leaves_rollback_to_the_caller() {
        let schema = TableSchema::default().with_incrementing(false);
        let mut worker = Worker::with_config(MemoryStore::new(schema), WorkerConfig::external());
        assert_eq!(worker.config().transactions, TransactionMode::External);
        let mut root = Node::with_key(Key(1));
        worker.insert_as_root(&mut root).unwrap();

        // The gap is opened before the duplicate insert fails, and nothing undoes it.
        let mut dup = Node::with_key(Key(1));
        assert!(worker.insert_as_last_child(&mut dup, &mut root).is_err());
        assert_eq!(worker.find(Key(1)).unwrap().bounds(), Bounds::new(1, 4));
        assert_eq!(root.bounds(), Bounds::new(1, 2));
    }

    #[test]
    fn keyless_insert_into_manual_keys_is_invalid() {
        let schema = TableSchema::default().with_incrementing(false);
        let mut worker = Worker::new(MemoryStore::new(schema));
        assert!(matches!(
            worker.insert_as_root(&mut Node::new()),
            Err(Error::InvalidArgument(_))
        ));
        let mut keyed = Node::with_key(Key(10));
        assert_eq!(worker.insert_as_root(&mut keyed).unwrap(), Key(10));
        let mut dup = Node::with_key(Key(10));
        assert!(matches!(
            worker.insert_as_last_child(&mut dup, &mut keyed),
            Err(Error::DuplicateKey { key: Key(10), .. })
        ));
        assert_eq!(worker.find(Key(10)).unwrap().bounds(), Bounds::new(1, 2));
    }

    #[test]
    fn map_tree_reconciles_children() {
        let (mut worker, mut r, a, b) = scenario();
        let (a_key, b_key) = (a.key().unwrap(), b.key().unwrap());

        let desired = [
            MapNode::with_key(b_key).attribute("name", "B*"),
            MapNode::new()
                .attribute("name", "N")
                .child(MapNode::new().attribute("name", "N.1")),
        ];
        let summary = worker.map_tree(&mut r, &desired).unwrap();

        assert_eq!(summary.mapped.len(), 3);
        assert_eq!(summary.mapped[0], b_key);
        assert_eq!(summary.removed, 1);
        assert!(matches!(worker.find(a_key), Err(Error::NotFound { .. })));
        assert_eq!(
            names(&worker.children(r.key().unwrap(), TreeId(1), 0).unwrap()),
            ["B*", "N", "N.1"]
        );
        assert_eq!(r.bounds(), Bounds::new(1, 8));
        worker.validate(TreeId(1)).unwrap();
    }

    #[test]
    fn map_tree_rejects_reserved_attributes_before_touching_rows() {
        let (mut worker, mut r, _, _) = scenario();
        let before = worker.all_flat(None).unwrap();
        let desired = [MapNode::new().child(MapNode::new().attribute("lft", 4_i64))];
        assert!(matches!(
            worker.map_tree(&mut r, &desired),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(worker.all_flat(None).unwrap(), before);
    }

    #[test]
    fn validate_reports_gaps() {
        let (mut worker, _, _, _) = scenario();
        create_gap(worker.store_mut(), TreeId(1), 4, 2).unwrap();
        assert!(matches!(
            worker.validate(TreeId(1)),
            Err(Error::InvariantViolation(_))
        ));
    }
}
