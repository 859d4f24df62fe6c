// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Store trait: the row storage and query execution the engine runs against.

use smallvec::SmallVec;

use crate::error::Result;
use crate::hierarchy::annotate_depths;
use crate::schema::{Column, TableSchema};
use crate::types::{Attributes, Key, Node, TreeId};

/// Comparison operator of a [`Condition`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Cmp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `=`
    Eq,
    /// `>=`
    Ge,
    /// `>`
    Gt,
}

impl Cmp {
    /// Evaluate `lhs <op> rhs`.
    pub const fn test(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
        }
    }

    /// SQL spelling of the operator.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ge => ">=",
            Self::Gt => ">",
        }
    }
}

/// `column <cmp> value` over one of the reserved columns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Condition {
    /// Column compared.
    pub column: Column,
    /// Operator.
    pub cmp: Cmp,
    /// Right-hand side.
    pub value: i64,
}

/// Conjunction of an optional tree restriction, column conditions and an
/// optional leaves-only restriction.
///
/// ```rust
/// use understory_nested_set::{Cmp, Column, Filter, TreeId};
///
/// // Every row of tree 3 whose left bound is at or past 5.
/// let filter = Filter::in_tree(TreeId(3)).and(Column::Left, Cmp::Ge, 5);
/// assert_eq!(filter.tree(), Some(TreeId(3)));
/// assert_eq!(filter.conditions().len(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    tree: Option<TreeId>,
    conditions: SmallVec<[Condition; 3]>,
    leaves: bool,
}

impl Filter {
    /// Matches every row of the table.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches every row of one tree.
    pub fn in_tree(tree: TreeId) -> Self {
        Self {
            tree: Some(tree),
            ..Self::default()
        }
    }

    /// Matches the row with the given key.
    pub fn key(key: Key) -> Self {
        Self::all().and(Column::Key, Cmp::Eq, key.0)
    }

    /// Add a condition.
    ///
    /// A [`Column::Tree`] condition with [`Cmp::Eq`] is folded into the tree
    /// restriction.
    #[must_use]
    pub fn and(mut self, column: Column, cmp: Cmp, value: i64) -> Self {
        if column == Column::Tree && cmp == Cmp::Eq && self.tree.is_none() {
            self.tree = Some(TreeId(value));
        } else {
            self.conditions.push(Condition { column, cmp, value });
        }
        self
    }

    /// Keep only leaves (`right - left == 1`).
    #[must_use]
    pub fn leaves(mut self) -> Self {
        self.leaves = true;
        self
    }

    /// Tree restriction, if any.
    pub fn tree(&self) -> Option<TreeId> {
        self.tree
    }

    /// Column conditions.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// `true` when only leaves match.
    pub fn leaves_only(&self) -> bool {
        self.leaves
    }

    /// Evaluate the filter against a node.
    ///
    /// A key condition never matches a node without a key.
    pub fn matches(&self, node: &Node) -> bool {
        if self.tree.is_some_and(|tree| tree != node.tree()) {
            return false;
        }
        if self.leaves && !node.bounds().is_leaf() {
            return false;
        }
        self.conditions.iter().all(|c| {
            let lhs = match c.column {
                Column::Key => match node.key() {
                    Some(key) => key.0,
                    None => return false,
                },
                Column::Left => node.left(),
                Column::Right => node.right(),
                Column::Tree => node.tree().0,
            };
            c.cmp.test(lhs, c.value)
        })
    }
}

/// Bulk update applied by [`Store::shift`]: `left += left`, `right += right`,
/// and optionally `tree = tree`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Shift {
    /// Delta added to the left bound.
    pub left: i64,
    /// Delta added to the right bound.
    pub right: i64,
    /// New tree for the matched rows.
    pub tree: Option<TreeId>,
}

impl Shift {
    /// Shift only left bounds.
    pub const fn left(delta: i64) -> Self {
        Self {
            left: delta,
            right: 0,
            tree: None,
        }
    }

    /// Shift only right bounds.
    pub const fn right(delta: i64) -> Self {
        Self {
            left: 0,
            right: delta,
            tree: None,
        }
    }

    /// Shift both bounds by the same delta.
    pub const fn both(delta: i64) -> Self {
        Self {
            left: delta,
            right: delta,
            tree: None,
        }
    }

    /// Also reassign the matched rows to `tree`.
    #[must_use]
    pub const fn with_tree(mut self, tree: TreeId) -> Self {
        self.tree = Some(tree);
        self
    }
}

/// Row storage for one node table.
///
/// The engine only ever talks to the table through these operations. Every
/// structural mutation issues several of them and relies on
/// [`Store::transaction`] to make the sequence atomic.
pub trait Store {
    /// Schema of the node table.
    fn schema(&self) -> &TableSchema;

    /// Run `f`, committing when it returns `Ok` and rolling back every change
    /// it made when it returns `Err`.
    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>;

    /// Highest tree identifier in the table.
    fn max_tree(&self) -> Result<Option<TreeId>>;

    /// Fetch one row by key.
    fn fetch(&self, key: Key) -> Result<Option<Node>>;

    /// Rows matching `filter`, ordered by tree then left bound.
    fn select(&self, filter: &Filter) -> Result<Vec<Node>>;

    /// Apply `shift` to every row matching `filter`. Returns the number of rows touched.
    fn shift(&mut self, filter: &Filter, shift: Shift) -> Result<usize>;

    /// Append a row, returning its key (store-assigned when the node has none).
    fn insert(&mut self, node: &Node) -> Result<Key>;

    /// Overwrite the given domain columns of one row.
    fn update_attributes(&mut self, key: Key, attributes: &Attributes) -> Result<()>;

    /// Delete every row matching `filter`. Returns the number of rows removed.
    fn delete(&mut self, filter: &Filter) -> Result<usize>;

    /// The subtree rooted at `root` in preorder, each row paired with its depth
    /// below `root` (`root` itself has depth 0).
    ///
    /// When `max_depth > 0`, rows deeper than `max_depth` are left out.
    ///
    /// The default implementation issues one range select and derives depths
    /// from interval containment; backends with a query language may compute
    /// the depths in the query instead.
    fn subtree(&self, root: &Node, max_depth: u32) -> Result<Vec<(Node, u32)>> {
        let bounds = root.bounds();
        let rows = self.select(
            &Filter::in_tree(root.tree())
                .and(Column::Left, Cmp::Ge, bounds.left)
                .and(Column::Right, Cmp::Le, bounds.right),
        )?;
        let mut annotated = annotate_depths(rows)?;
        if max_depth > 0 {
            annotated.retain(|(_, depth)| *depth <= max_depth);
        }
        Ok(annotated)
    }
}
