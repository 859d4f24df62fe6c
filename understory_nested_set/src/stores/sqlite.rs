// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SQLite store over a `rusqlite` connection.
//!
//! Identifiers from the [`TableSchema`] are always double-quoted, so any column
//! naming works. Subtree reads compute depths in SQL with a three-way self-join:
//! each row's ancestor count minus the ancestor count of the subtree root.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row, params_from_iter};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::schema::{Column, TableSchema};
use crate::store::{Filter, Shift, Store};
use crate::types::{Attributes, Bounds, Key, Node, TreeId, Value};

/// Result column carrying the computed depth in subtree reads.
const DEPTH_COLUMN: &str = "nested_set_depth";

/// A node table inside a SQLite database.
///
/// ```rust
/// use understory_nested_set::{Node, SqliteStore, TableSchema, Worker};
///
/// let store = SqliteStore::open_in_memory(TableSchema::new("categories")).unwrap();
/// store.create_table(&["name"]).unwrap();
///
/// let mut worker = Worker::new(store);
/// let mut root = Node::new().with_attribute(worker.schema(), "name", "all").unwrap();
/// worker.insert_as_root(&mut root).unwrap();
/// assert_eq!(worker.all_root().unwrap().len(), 1);
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    schema: TableSchema,
}

impl SqliteStore {
    /// Wrap an open connection. The table must exist or be created with
    /// [`SqliteStore::create_table`].
    pub fn new(conn: Connection, schema: TableSchema) -> Self {
        Self { conn, schema }
    }

    /// Store on a fresh in-memory database.
    pub fn open_in_memory(schema: TableSchema) -> Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?, schema))
    }

    /// Create the node table (if missing) with the reserved columns, the given
    /// untyped attribute columns, and an index on `(tree, left)`.
    pub fn create_table(&self, attributes: &[&str]) -> Result<()> {
        let mut columns = vec![
            format!("{} INTEGER PRIMARY KEY", quote(self.schema.key_column())),
            format!("{} INTEGER NOT NULL", quote(self.schema.left_column())),
            format!("{} INTEGER NOT NULL", quote(self.schema.right_column())),
            format!("{} INTEGER NOT NULL", quote(self.schema.tree_column())),
        ];
        for name in attributes {
            self.schema.check_attribute(name)?;
            columns.push(quote(name));
        }
        let table = self.schema.table();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({});\nCREATE INDEX IF NOT EXISTS {} ON {} ({}, {});",
            quote(table),
            columns.join(", "),
            quote(&format!("{table}_tree_left")),
            quote(table),
            quote(self.schema.tree_column()),
            quote(self.schema.left_column()),
        );
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    /// The wrapped connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Give the connection back.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn col(&self, column: Column) -> String {
        quote(self.schema.column(column))
    }

    /// `WHERE ...` (or nothing) for `filter`, with its positional parameters.
    fn where_clause(&self, filter: &Filter) -> (String, Vec<i64>) {
        let mut terms = Vec::new();
        let mut params = Vec::new();
        if let Some(tree) = filter.tree() {
            terms.push(format!("{} = ?", self.col(Column::Tree)));
            params.push(tree.0);
        }
        for condition in filter.conditions() {
            terms.push(format!(
                "{} {} ?",
                self.col(condition.column),
                condition.cmp.as_sql()
            ));
            params.push(condition.value);
        }
        if filter.leaves_only() {
            terms.push(format!(
                "{} - {} = 1",
                self.col(Column::Right),
                self.col(Column::Left)
            ));
        }
        if terms.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", terms.join(" AND ")), params)
        }
    }

    fn query_nodes(&self, sql: &str, params: Vec<i64>) -> Result<Vec<Node>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns = column_names(&stmt);
        let rows = stmt.query_map(params_from_iter(params), |row| {
            decode(&self.schema, &columns, row)
        })?;
        let nodes = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        trace!(rows = nodes.len(), "select");
        Ok(nodes)
    }

    fn not_found(&self, key: Key) -> Error {
        Error::NotFound {
            key,
            table: self.schema.table().to_owned(),
        }
    }
}

impl Store for SqliteStore {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.conn.execute_batch("BEGIN")?;
        match f(self) {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(err) => {
                    warn!(table = self.schema.table(), error = %err, "commit failed, rolling back");
                    if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                        warn!(error = %rollback, "rollback failed");
                    }
                    Err(err.into())
                }
            },
            Err(err) => {
                warn!(table = self.schema.table(), error = %err, "rolling back");
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn max_tree(&self) -> Result<Option<TreeId>> {
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            self.col(Column::Tree),
            quote(self.schema.table())
        );
        let max: Option<i64> = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(max.map(TreeId))
    }

    fn fetch(&self, key: Key) -> Result<Option<Node>> {
        let (clause, params) = self.where_clause(&Filter::key(key));
        let sql = format!("SELECT * FROM {}{clause}", quote(self.schema.table()));
        Ok(self.query_nodes(&sql, params)?.into_iter().next())
    }

    fn select(&self, filter: &Filter) -> Result<Vec<Node>> {
        let (clause, params) = self.where_clause(filter);
        let sql = format!(
            "SELECT * FROM {}{clause} ORDER BY {}, {}",
            quote(self.schema.table()),
            self.col(Column::Tree),
            self.col(Column::Left),
        );
        self.query_nodes(&sql, params)
    }

    fn shift(&mut self, filter: &Filter, shift: Shift) -> Result<usize> {
        let left = self.col(Column::Left);
        let right = self.col(Column::Right);
        let mut set = format!("{left} = {left} + ?, {right} = {right} + ?");
        let mut params = vec![shift.left, shift.right];
        if let Some(tree) = shift.tree {
            set.push_str(&format!(", {} = ?", self.col(Column::Tree)));
            params.push(tree.0);
        }
        let (clause, filter_params) = self.where_clause(filter);
        params.extend(filter_params);
        let sql = format!("UPDATE {} SET {set}{clause}", quote(self.schema.table()));
        let touched = self.conn.execute(&sql, params_from_iter(params))?;
        trace!(touched, "shift");
        Ok(touched)
    }

    fn insert(&mut self, node: &Node) -> Result<Key> {
        if node.key().is_none() && !self.schema.incrementing() {
            return Err(Error::InvalidArgument(format!(
                "[{}] does not assign keys",
                self.schema.table()
            )));
        }
        let mut columns = Vec::new();
        let mut values = Vec::new();
        if let Some(key) = node.key() {
            columns.push(self.col(Column::Key));
            values.push(SqlValue::Integer(key.0));
        }
        columns.push(self.col(Column::Left));
        values.push(SqlValue::Integer(node.left()));
        columns.push(self.col(Column::Right));
        values.push(SqlValue::Integer(node.right()));
        columns.push(self.col(Column::Tree));
        values.push(SqlValue::Integer(node.tree().0));
        for (name, value) in node.attributes() {
            self.schema.check_attribute(name)?;
            columns.push(quote(name));
            values.push(to_sql(value));
        }

        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(self.schema.table()),
            columns.join(", "),
            placeholders.join(", ")
        );
        match self.conn.execute(&sql, params_from_iter(values)) {
            Ok(_) => Ok(node
                .key()
                .unwrap_or_else(|| Key(self.conn.last_insert_rowid()))),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(Error::DuplicateKey {
                    key: node.key().unwrap_or(Key(0)),
                    table: self.schema.table().to_owned(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn update_attributes(&mut self, key: Key, attributes: &Attributes) -> Result<()> {
        if attributes.is_empty() {
            return self.fetch(key)?.map(drop).ok_or_else(|| self.not_found(key));
        }
        let mut sets = Vec::with_capacity(attributes.len());
        let mut values = Vec::with_capacity(attributes.len() + 1);
        for (name, value) in attributes {
            self.schema.check_attribute(name)?;
            sets.push(format!("{} = ?", quote(name)));
            values.push(to_sql(value));
        }
        values.push(SqlValue::Integer(key.0));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(self.schema.table()),
            sets.join(", "),
            self.col(Column::Key)
        );
        match self.conn.execute(&sql, params_from_iter(values))? {
            0 => Err(self.not_found(key)),
            _ => Ok(()),
        }
    }

    fn delete(&mut self, filter: &Filter) -> Result<usize> {
        let (clause, params) = self.where_clause(filter);
        let sql = format!("DELETE FROM {}{clause}", quote(self.schema.table()));
        Ok(self.conn.execute(&sql, params_from_iter(params))?)
    }

    fn subtree(&self, root: &Node, max_depth: u32) -> Result<Vec<(Node, u32)>> {
        let key = root.require_key("subtree")?;
        let table = quote(self.schema.table());
        let id = self.col(Column::Key);
        let lft = self.col(Column::Left);
        let rgt = self.col(Column::Right);
        let tree = self.col(Column::Tree);
        let depth = format!("(COUNT(parent.{id}) - (sub_tree.depth + 1))");

        let mut sql = format!(
            "SELECT node.*, {depth} AS {DEPTH_COLUMN}
             FROM {table} AS node, {table} AS parent, {table} AS sub_parent,
                  (SELECT node.{id} AS {id}, (COUNT(parent.{id}) - 1) AS depth
                     FROM {table} AS node, {table} AS parent
                    WHERE node.{lft} BETWEEN parent.{lft} AND parent.{rgt}
                      AND node.{id} = ?1
                      AND node.{tree} = ?2 AND parent.{tree} = ?2
                    GROUP BY node.{id}) AS sub_tree
             WHERE node.{lft} BETWEEN parent.{lft} AND parent.{rgt}
               AND node.{lft} BETWEEN sub_parent.{lft} AND sub_parent.{rgt}
               AND sub_parent.{id} = sub_tree.{id}
               AND node.{tree} = ?2 AND parent.{tree} = ?2 AND sub_parent.{tree} = ?2
             GROUP BY node.{id}"
        );
        let mut params = vec![key.0, root.tree().0];
        if max_depth > 0 {
            sql.push_str(&format!(" HAVING {depth} <= ?3"));
            params.push(i64::from(max_depth));
        }
        sql.push_str(&format!(" ORDER BY node.{lft}"));

        let mut stmt = self.conn.prepare(&sql)?;
        let columns = column_names(&stmt);
        let rows = stmt.query_map(params_from_iter(params), |row| {
            Ok((
                decode(&self.schema, &columns, row)?,
                row.get::<_, i64>(DEPTH_COLUMN)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (node, depth) = row?;
            let depth = u32::try_from(depth).map_err(|_| {
                Error::InvariantViolation(format!(
                    "row [{}] has computed depth {depth} below node [{key}]",
                    node.key().map_or(0, |key| key.0)
                ))
            })?;
            out.push((node, depth));
        }
        trace!(key = key.0, rows = out.len(), "subtree");
        Ok(out)
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_owned).collect()
}

fn decode(schema: &TableSchema, columns: &[String], row: &Row<'_>) -> rusqlite::Result<Node> {
    let mut key = Key(0);
    let mut bounds = Bounds::default();
    let mut tree = TreeId::default();
    let mut attributes = Attributes::new();
    for (index, name) in columns.iter().enumerate() {
        if name == schema.key_column() {
            key = Key(row.get(index)?);
        } else if name == schema.left_column() {
            bounds.left = row.get(index)?;
        } else if name == schema.right_column() {
            bounds.right = row.get(index)?;
        } else if name == schema.tree_column() {
            tree = TreeId(row.get(index)?);
        } else if name != DEPTH_COLUMN {
            attributes.insert(name.clone(), from_sql(row.get(index)?));
        }
    }
    Ok(Node::from_row(key, bounds, tree, attributes))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Real(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        Value::Blob(value) => SqlValue::Blob(value.clone()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => Value::Integer(value),
        SqlValue::Real(value) => Value::Real(value),
        SqlValue::Text(value) => Value::Text(value),
        SqlValue::Blob(value) => Value::Blob(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::annotate_depths;
    use crate::store::Cmp;
    use crate::worker::{Worker, WorkerConfig};

    fn worker(schema: TableSchema) -> Worker<SqliteStore> {
        let store = SqliteStore::open_in_memory(schema).unwrap();
        store.create_table(&["name"]).unwrap();
        Worker::new(store)
    }

    fn named(worker: &Worker<SqliteStore>, name: &str) -> Node {
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

    /// root { A { A.1, A.2 { A.2.a } }, B }
    fn populated(schema: TableSchema) -> (Worker<SqliteStore>, Node) {
        let mut worker = worker(schema);
        let mut root = named(&worker, "root");
        worker.insert_as_root(&mut root).unwrap();
        let mut a = named(&worker, "A");
        worker.insert_as_last_child(&mut a, &mut root).unwrap();
        let mut b = named(&worker, "B");
        worker.insert_as_last_child(&mut b, &mut root).unwrap();
        let mut a1 = named(&worker, "A.1");
        worker.insert_as_last_child(&mut a1, &mut a).unwrap();
        let mut a2 = named(&worker, "A.2");
        worker.insert_as_last_child(&mut a2, &mut a).unwrap();
        let mut a2a = named(&worker, "A.2.a");
        worker.insert_as_first_child(&mut a2a, &mut a2).unwrap();
        let root = worker.find(root.key().unwrap()).unwrap();
        (worker, root)
    }

    #[test]
    fn small_tree_scenario() {
        let mut worker = worker(TableSchema::default());
        let mut r = named(&worker, "R");
        worker.insert_as_root(&mut r).unwrap();
        let mut a = named(&worker, "A");
        worker.insert_as_first_child(&mut a, &mut r).unwrap();
        let mut b = named(&worker, "B");
        worker.insert_as_last_child(&mut b, &mut r).unwrap();

        assert_eq!((r.bounds(), r.tree()), (Bounds::new(1, 6), TreeId(1)));
        assert_eq!(a.bounds(), Bounds::new(2, 3));
        assert_eq!(b.bounds(), Bounds::new(4, 5));
        assert_eq!(names(&worker.all_leaf(Some(TreeId(1))).unwrap()), ["A", "B"]);
        assert_eq!(names(&worker.path(b.key().unwrap()).unwrap()), ["R"]);

        worker.move_as_next_sibling(&mut a, &mut b).unwrap();
        assert_eq!(
            names(&worker.children(r.key().unwrap(), TreeId(1), 0).unwrap()),
            ["B", "A"]
        );
        assert_eq!(worker.find(r.key().unwrap()).unwrap().bounds(), Bounds::new(1, 6));
        worker.validate(TreeId(1)).unwrap();
    }

    #[test]
    fn self_join_depths_match_containment_depths() {
        let (worker, root) = populated(TableSchema::default());
        let store = worker.store();
        for node in worker.all_flat(Some(TreeId(1))).unwrap() {
            let joined = store.subtree(&node, 0).unwrap();
            let bounds = node.bounds();
            let scanned = annotate_depths(
                store
                    .select(
                        &Filter::in_tree(TreeId(1))
                            .and(Column::Left, Cmp::Ge, bounds.left)
                            .and(Column::Right, Cmp::Le, bounds.right),
                    )
                    .unwrap(),
            )
            .unwrap();
            assert_eq!(joined, scanned, "subtree of {}", node.bounds());
        }

        let limited = store.subtree(&root, 1).unwrap();
        let depths: Vec<u32> = limited.iter().map(|(_, depth)| *depth).collect();
        assert_eq!(depths, [0, 1, 1]);
    }

    #[test]
    fn tree_fold_over_sqlite() {
        let (worker, root) = populated(TableSchema::default());
        let hierarchy = worker.tree(root.key().unwrap(), TreeId(1), 0).unwrap();
        assert_eq!(hierarchy.len(), 6);
        let apex = hierarchy.apex().unwrap();
        let top: Vec<Node> = apex
            .children()
            .iter()
            .map(|id| hierarchy[*id].node().clone())
            .collect();
        assert_eq!(names(&top), ["A", "B"]);
        let deepest = hierarchy.iter().map(|entry| entry.depth()).max();
        assert_eq!(deepest, Some(3));
    }

    #[test]
    fn custom_column_names_are_quoted() {
        let schema = TableSchema::new("order")
            .with_key_column("select")
            .with_left_column("l\"eft")
            .with_right_column("r")
            .with_tree_column("group");
        let (mut worker, root) = populated(schema);
        worker.validate(TreeId(1)).unwrap();
        let mut a = worker
            .children(root.key().unwrap(), TreeId(1), 1)
            .unwrap()
            .remove(0);
        worker.move_as_root(&mut a).unwrap();
        assert_eq!(a.tree(), TreeId(2));
        assert_eq!(worker.all_flat(Some(TreeId(2))).unwrap().len(), 4);
        worker.validate(TreeId(1)).unwrap();
        worker.validate(TreeId(2)).unwrap();
        assert_eq!(names(&worker.all_leaf(None).unwrap()), ["B", "A.1", "A.2.a"]);
        assert_eq!(names(&worker.all_leaf(Some(TreeId(2))).unwrap()), ["A.1", "A.2.a"]);
    }

    #[test]
    fn failed_move_rolls_back() {
        let (mut worker, root) = populated(TableSchema::default());
        let before = worker.all_flat(None).unwrap();
        let mut first = worker.children(root.key().unwrap(), TreeId(1), 1).unwrap()[0].clone();
        let mut ghost = Node::with_key(Key(404));
        assert!(matches!(
            worker.move_as_last_child(&mut first, &mut ghost),
            Err(Error::NotFound { key: Key(404), .. })
        ));
        assert_eq!(worker.all_flat(None).unwrap(), before);
    }

    #[test]
    fn duplicate_key_rolls_back_the_gap() {
        let mut worker = worker(TableSchema::default().with_incrementing(false));
        let mut root = Node::with_key(Key(7));
        worker.insert_as_root(&mut root).unwrap();
        let mut dup = Node::with_key(Key(7));
        assert!(matches!(
            worker.insert_as_first_child(&mut dup, &mut root),
            Err(Error::DuplicateKey { key: Key(7), .. })
        ));
        assert_eq!(worker.find(Key(7)).unwrap().bounds(), Bounds::new(1, 2));
        assert!(matches!(
            worker.insert_as_root(&mut Node::new()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn external_transactions_are_left_to_the_caller() {
        let store = SqliteStore::open_in_memory(TableSchema::default()).unwrap();
        store.create_table(&["name"]).unwrap();
        let mut worker = Worker::with_config(store, WorkerConfig::external());

        worker.store().connection().execute_batch("BEGIN").unwrap();
        let mut root = Node::new();
        worker.insert_as_root(&mut root).unwrap();
        let mut child = Node::new();
        worker.insert_as_last_child(&mut child, &mut root).unwrap();
        assert_eq!(worker.all_flat(None).unwrap().len(), 2);
        worker.store().connection().execute_batch("ROLLBACK").unwrap();

        assert!(worker.all_flat(None).unwrap().is_empty());
    }

    #[test]
    fn attributes_round_trip_and_update() {
        let store = SqliteStore::open_in_memory(TableSchema::default()).unwrap();
        store.create_table(&["name", "weight", "payload"]).unwrap();
        let mut worker = Worker::new(store);
        let schema = worker.schema().clone();
        let mut root = Node::new()
            .with_attribute(&schema, "name", "root")
            .unwrap()
            .with_attribute(&schema, "weight", 1.5)
            .unwrap()
            .with_attribute(&schema, "payload", vec![1_u8, 2, 3])
            .unwrap();
        let key = worker.insert_as_root(&mut root).unwrap();
        assert_eq!(worker.find(key).unwrap().attributes(), root.attributes());

        let mut changes = Attributes::new();
        changes.insert("name".into(), Value::Null);
        worker.store_mut().update_attributes(key, &changes).unwrap();
        assert_eq!(worker.find(key).unwrap().attribute("name"), Some(&Value::Null));
        assert!(matches!(
            worker.store_mut().update_attributes(Key(99), &changes),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            worker.store().create_table(&["rgt"]),
            Err(Error::InvalidArgument(_))
        ));
    }
}
