//! In-process storage backend
//!
//! [`MemoryStore`] implements [`Connection`] (through [`MemoryConnection`])
//! and [`CopyChannel`] over plain vectors of rows. Transactions work on a
//! private copy of the tables that replaces the shared state on commit.
//!
//! The store also records what it was asked to do (statements, copy batch
//! sizes, abandoned connections) and can be told to fail, which is what the
//! tests lean on.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::entity::{Column, ColumnRole, Entity};
use super::error::{StoreError, StoreResult};
use super::query::{SelectQuery, UpdateStatement};
use super::store::{Connection, ConnectionProvider, CopyChannel, CopySink};
use super::value::{Record, Value};

type Tables = BTreeMap<String, Vec<Record>>;

#[derive(Default)]
struct MemoryState {
    tables: Tables,
    schemas: BTreeMap<String, &'static [Column]>,
    unique: Vec<(String, String)>,
    statements: Vec<String>,
    copy_calls: Vec<usize>,
    copy_sinks: usize,
    fail_copy_batch: Option<usize>,
    fail_next_commit: bool,
    abandoned: usize,
}

/// Shared in-memory tables; clones share state
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already knows `E`'s table
    pub fn for_entity<E: Entity>() -> Self {
        Self::new().register::<E>()
    }

    /// Record `E`'s column table so bulk copies get storage defaults
    pub fn register<E: Entity>(self) -> Self {
        self.state().schemas.insert(E::TABLE.to_string(), E::COLUMNS);
        self
    }

    /// Enforce uniqueness of `column` in `table`
    pub fn with_unique(self, table: &str, column: &str) -> Self {
        self.state()
            .unique
            .push((table.to_string(), column.to_string()));
        self
    }

    /// Open a connection on this store
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            store: self.clone(),
            working: None,
        }
    }

    /// Committed rows of `table`
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Statements issued so far, oldest first
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Row count of every copy batch written
    pub fn copy_calls(&self) -> Vec<usize> {
        self.state().copy_calls.clone()
    }

    /// Number of copy sinks handed out
    pub fn copy_sinks_acquired(&self) -> usize {
        self.state().copy_sinks
    }

    /// Connections given up mid-transaction
    pub fn abandoned(&self) -> usize {
        self.state().abandoned
    }

    /// Make the copy batch at `index` (zero-based, per sink) fail
    pub fn fail_copy_batch(&self, index: usize) {
        self.state().fail_copy_batch = Some(index);
    }

    /// Make the next commit fail
    pub fn fail_next_commit(&self) {
        self.state().fail_next_commit = true;
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionProvider for MemoryStore {
    type Connection = MemoryConnection;

    async fn connect(&self) -> StoreResult<MemoryConnection> {
        Ok(MemoryStore::connect(self))
    }
}

/// One connection on a [`MemoryStore`]
pub struct MemoryConnection {
    store: MemoryStore,
    working: Option<Tables>,
}

impl MemoryConnection {
    fn apply<T>(&mut self, statement: &str, f: impl FnOnce(&mut Tables, &MemoryStateView<'_>) -> T) -> T {
        let mut state = self.store.state();
        state.statements.push(statement.to_string());

        let MemoryState {
            tables, unique, ..
        } = &mut *state;
        let view = MemoryStateView { unique: unique.as_slice() };

        match self.working.as_mut() {
            Some(working) => f(working, &view),
            None => f(tables, &view),
        }
    }
}

struct MemoryStateView<'a> {
    unique: &'a [(String, String)],
}

impl MemoryStateView<'_> {
    fn check_insert(&self, table: &str, existing: &[Record], row: &Record) -> StoreResult<()> {
        for (_, column) in self.unique.iter().filter(|(t, _)| t == table) {
            let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            if existing.iter().any(|other| other.get(column) == Some(value)) {
                return Err(unique_violation(table, column, value));
            }
        }
        Ok(())
    }

    fn check_table(&self, table: &str, rows: &[Record]) -> StoreResult<()> {
        for (index, row) in rows.iter().enumerate() {
            self.check_insert(table, &rows[..index], row)?;
        }
        Ok(())
    }
}

fn unique_violation(table: &str, column: &str, value: &Value) -> StoreError {
    let constraint = format!("{table}_{column}_key");
    StoreError::UniqueViolation {
        message: format!(
            "duplicate key value violates unique constraint \"{constraint}\": ({column})=({value})"
        ),
        constraint: Some(constraint),
    }
}

fn fill_defaults(row: &mut Record, columns: &[Column], now: DateTime<Utc>) {
    for column in columns {
        let default = match column.role {
            ColumnRole::Identity => Value::Uuid(Uuid::new_v4()),
            ColumnRole::CreatedAt | ColumnRole::UpdatedAt => Value::Timestamp(now),
            ColumnRole::Data => Value::Null,
        };
        let slot = row.entry(column.name.to_string()).or_insert(Value::Null);
        if slot.is_null() {
            *slot = default;
        }
    }
}

impl Connection for MemoryConnection {
    async fn begin(&mut self) -> StoreResult<()> {
        let mut state = self.store.state();
        state.statements.push("begin".to_string());
        if self.working.is_some() {
            return Err(StoreError::Database("a transaction is already open".to_string()));
        }
        self.working = Some(state.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut state = self.store.state();
        state.statements.push("commit".to_string());
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(StoreError::Connection("server closed the connection during commit".to_string()));
        }
        if let Some(working) = self.working.take() {
            state.tables = working;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.store.state().statements.push("rollback".to_string());
        self.working = None;
        Ok(())
    }

    async fn fetch(&mut self, query: &SelectQuery) -> StoreResult<Vec<Record>> {
        self.apply(&format!("select {}", query.table), |tables, _| {
            let rows = tables
                .get(query.table)
                .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect::<Vec<_>>())
                .unwrap_or_default();

            Ok(match query.pagination {
                Some(pagination) => pagination.window(rows),
                None => rows,
            })
        })
    }

    async fn insert(
        &mut self,
        table: &'static str,
        columns: &'static [Column],
        values: &Record,
    ) -> StoreResult<Record> {
        self.store
            .state()
            .schemas
            .entry(table.to_string())
            .or_insert(columns);

        self.apply(&format!("insert {table}"), |tables, view| {
            let mut row = values.clone();
            fill_defaults(&mut row, columns, Utc::now());

            let rows = tables.entry(table.to_string()).or_default();
            view.check_insert(table, rows, &row)?;
            rows.push(row.clone());
            Ok(row)
        })
    }

    async fn update(&mut self, statement: &UpdateStatement) -> StoreResult<Vec<Record>> {
        self.apply(&format!("update {}", statement.table), |tables, view| {
            let Some(rows) = tables.get_mut(statement.table) else {
                return Ok(Vec::new());
            };

            let now = Utc::now();
            let mut next = rows.clone();
            let mut updated = Vec::new();
            for row in next.iter_mut().filter(|r| statement.matches(r)) {
                for (column, value) in &statement.assignments {
                    row.insert(column.name.to_string(), value.clone());
                }
                row.insert(statement.touch.to_string(), Value::Timestamp(now));
                updated.push(row.clone());
            }

            view.check_table(statement.table, &next)?;
            *rows = next;
            Ok(updated)
        })
    }

    async fn delete(&mut self, table: &'static str, key: &'static str, id: Uuid) -> StoreResult<u64> {
        self.apply(&format!("delete {table}"), |tables, _| {
            let Some(rows) = tables.get_mut(table) else {
                return Ok(0);
            };
            let before = rows.len();
            rows.retain(|row| row.get(key) != Some(&Value::Uuid(id)));
            Ok((before - rows.len()) as u64)
        })
    }

    fn abandon(&mut self) {
        self.working = None;
        self.store.state().abandoned += 1;
    }
}

/// Copy sink over a [`MemoryStore`]; rows land directly in committed state
pub struct MemorySink {
    store: MemoryStore,
    batches: usize,
}

impl CopyChannel for MemoryStore {
    type Sink = MemorySink;

    async fn acquire(&self) -> StoreResult<MemorySink> {
        self.state().copy_sinks += 1;
        Ok(MemorySink {
            store: self.clone(),
            batches: 0,
        })
    }
}

impl CopySink for MemorySink {
    async fn copy_batch(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<u64> {
        let index = self.batches;
        self.batches += 1;

        let mut state = self.store.state();
        state.statements.push(format!("copy {table}"));
        if state.fail_copy_batch == Some(index) {
            return Err(StoreError::Database(format!("copy batch {index} rejected")));
        }

        let schema = state.schemas.get(table).copied().unwrap_or_default();
        let now = Utc::now();
        let mut incoming = Vec::with_capacity(rows.len());
        for values in rows {
            let mut row: Record = columns.iter().cloned().zip(values.iter().cloned()).collect();
            fill_defaults(&mut row, schema, now);
            incoming.push(row);
        }

        let MemoryState {
            tables, unique, copy_calls, ..
        } = &mut *state;
        let view = MemoryStateView { unique: unique.as_slice() };
        let existing = tables.entry(table.to_string()).or_default();
        for row in incoming {
            view.check_insert(table, existing, &row)?;
            existing.push(row);
        }
        copy_calls.push(rows.len());

        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example::ExampleModel;
    use crate::repository::{build_select, Filters};

    #[tokio::test]
    async fn test_rollback_discards_working_copy() {
        let store = MemoryStore::new();
        let mut connection = store.connect();

        connection.begin().await.unwrap();
        let mut values = Record::new();
        values.insert("name".into(), Value::from("ann"));
        connection
            .insert("example", ExampleModel::COLUMNS, &values)
            .await
            .unwrap();
        connection.rollback().await.unwrap();

        assert!(store.rows("example").is_empty());
    }

    #[tokio::test]
    async fn test_autocommit_without_begin() {
        let store = MemoryStore::new();
        let mut connection = store.connect();

        let row = connection
            .insert("example", ExampleModel::COLUMNS, &Record::new())
            .await
            .unwrap();

        assert!(matches!(row.get("id"), Some(Value::Uuid(_))));
        assert_eq!(row.get("created_at"), row.get("updated_at"));
        assert_eq!(row.get("name"), Some(&Value::Null));
        assert_eq!(store.rows("example").len(), 1);

        let query = build_select::<ExampleModel>(Filters::new()).unwrap();
        assert_eq!(connection.fetch(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_double_begin_is_an_error() {
        let store = MemoryStore::new();
        let mut connection = store.connect();
        connection.begin().await.unwrap();
        assert!(connection.begin().await.is_err());
    }

    #[tokio::test]
    async fn test_copy_fills_registered_defaults() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let mut sink = store.acquire().await.unwrap();

        sink.copy_batch(
            "example",
            &["name".to_string()],
            &[vec![Value::from("ann")], vec![Value::Null]],
        )
        .await
        .unwrap();

        let rows = store.rows("example");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| matches!(r.get("id"), Some(Value::Uuid(_)))));
        assert_eq!(rows[1].get("name"), Some(&Value::Null));
    }
}
