//! PostgreSQL storage backend
//!
//! Queries are rendered with [`sqlx::QueryBuilder`]: identifiers are quoted,
//! every value is bound as a parameter (`NULL`s carry the column's type), and
//! rows are decoded by column kind. Bulk copies go through
//! `COPY ... FROM STDIN WITH (FORMAT csv)` on a separate pool.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::entity::{Column, ColumnKind};
use super::error::{StoreError, StoreResult};
use super::filter::{FilterOperator, Predicate};
use super::query::{SelectQuery, UpdateStatement};
use super::store::{Connection, ConnectionProvider, CopyChannel, CopySink};
use super::value::{Record, Value};

/// One pooled PostgreSQL connection
pub struct PostgresConnection {
    connection: Option<PoolConnection<Postgres>>,
}

impl PostgresConnection {
    pub fn new(connection: PoolConnection<Postgres>) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    /// Borrow a connection from `pool`
    pub async fn acquire(pool: &PgPool) -> StoreResult<Self> {
        Ok(Self::new(pool.acquire().await?))
    }

    fn raw(&mut self) -> StoreResult<&mut sqlx::PgConnection> {
        self.connection
            .as_deref_mut()
            .ok_or_else(|| StoreError::Connection("connection already released".to_string()))
    }

    async fn execute(&mut self, statement: &'static str) -> StoreResult<()> {
        let connection = self.raw()?;
        sqlx::query(statement).execute(&mut *connection).await?;
        Ok(())
    }
}

impl Connection for PostgresConnection {
    async fn begin(&mut self) -> StoreResult<()> {
        self.execute("BEGIN").await
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.execute("COMMIT").await
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.execute("ROLLBACK").await
    }

    async fn fetch(&mut self, query: &SelectQuery) -> StoreResult<Vec<Record>> {
        let mut builder = render_select(query)?;
        let connection = self.raw()?;
        let rows = builder.build().fetch_all(&mut *connection).await?;
        rows.iter().map(|row| decode_row(row, query.columns)).collect()
    }

    async fn insert(
        &mut self,
        table: &'static str,
        columns: &'static [Column],
        values: &Record,
    ) -> StoreResult<Record> {
        let mut builder = render_insert(table, columns, values)?;
        let connection = self.raw()?;
        let row = builder.build().fetch_one(&mut *connection).await?;
        decode_row(&row, columns)
    }

    async fn update(&mut self, statement: &UpdateStatement) -> StoreResult<Vec<Record>> {
        let mut builder = render_update(statement)?;
        let connection = self.raw()?;
        let rows = builder.build().fetch_all(&mut *connection).await?;
        rows.iter()
            .map(|row| decode_row(row, statement.columns))
            .collect()
    }

    async fn delete(&mut self, table: &'static str, key: &'static str, id: Uuid) -> StoreResult<u64> {
        let mut builder = render_delete(table, key, id);
        let connection = self.raw()?;
        let result = builder.build().execute(&mut *connection).await?;
        Ok(result.rows_affected())
    }

    fn abandon(&mut self) {
        // Detached connections close on drop instead of returning to the pool.
        if let Some(connection) = self.connection.take() {
            drop(connection.detach());
        }
    }
}

impl ConnectionProvider for PgPool {
    type Connection = PostgresConnection;

    async fn connect(&self) -> StoreResult<PostgresConnection> {
        PostgresConnection::acquire(self).await
    }
}

/// Copy channel backed by its own pool
#[derive(Clone)]
pub struct PostgresCopyChannel {
    pool: PgPool,
}

impl PostgresCopyChannel {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CopyChannel for PostgresCopyChannel {
    type Sink = PostgresCopySink;

    async fn acquire(&self) -> StoreResult<PostgresCopySink> {
        Ok(PostgresCopySink {
            connection: self.pool.acquire().await?,
        })
    }
}

/// One pooled connection receiving CSV copy batches
pub struct PostgresCopySink {
    connection: PoolConnection<Postgres>,
}

impl CopySink for PostgresCopySink {
    async fn copy_batch(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<u64> {
        let statement = copy_statement(table, columns);
        let payload = encode_csv(rows)?;

        let mut copy = self.connection.copy_in_raw(&statement).await?;
        let sent = copy.send(payload.into_bytes()).await.map(|_| ());
        if let Err(e) = sent {
            if let Err(abort) = copy.abort(e.to_string()).await {
                tracing::warn!(table, error = %abort, "failed to abort copy");
            }
            return Err(e.into());
        }

        Ok(copy.finish().await?)
    }
}

/// Double-quote an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn push_column_list(builder: &mut QueryBuilder<'static, Postgres>, columns: &[Column]) {
    let list: Vec<String> = columns.iter().map(|c| quote_ident(c.name)).collect();
    builder.push(list.join(", "));
}

/// Render a read query
pub fn render_select(query: &SelectQuery) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let mut builder = QueryBuilder::new("SELECT ");
    push_column_list(&mut builder, query.columns);
    builder.push(" FROM ").push(quote_ident(query.table));
    push_where(&mut builder, &query.predicates)?;

    if let Some(pagination) = query.pagination {
        builder
            .push(" LIMIT ")
            .push_bind(i64::try_from(pagination.limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(pagination.offset).unwrap_or(i64::MAX));
    }

    Ok(builder)
}

/// Render an update returning every updated row
pub fn render_update(statement: &UpdateStatement) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let mut builder = QueryBuilder::new("UPDATE ");
    builder.push(quote_ident(statement.table)).push(" SET ");

    for (column, value) in &statement.assignments {
        builder.push(quote_ident(column.name)).push(" = ");
        push_value(&mut builder, column.kind, value)?;
        builder.push(", ");
    }
    builder.push(quote_ident(statement.touch)).push(" = now()");

    push_where(&mut builder, &statement.predicates)?;
    builder.push(" RETURNING ");
    push_column_list(&mut builder, statement.columns);

    Ok(builder)
}

/// Render a single-row insert returning the stored row
pub fn render_insert(
    table: &str,
    columns: &[Column],
    values: &Record,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let mut builder = QueryBuilder::new("INSERT INTO ");
    builder.push(quote_ident(table));

    if values.is_empty() {
        builder.push(" DEFAULT VALUES");
    } else {
        let mut targets = Vec::with_capacity(values.len());
        for (name, value) in values {
            let column = columns
                .iter()
                .find(|c| c.name == name.as_str())
                .ok_or_else(|| StoreError::Unsupported(format!("unknown column `{name}` on {table}")))?;
            targets.push((column, value));
        }

        let names: Vec<String> = targets.iter().map(|(c, _)| quote_ident(c.name)).collect();
        builder.push(" (").push(names.join(", ")).push(") VALUES (");
        for (i, (column, value)) in targets.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            push_value(&mut builder, column.kind, value)?;
        }
        builder.push(")");
    }

    builder.push(" RETURNING ");
    push_column_list(&mut builder, columns);
    Ok(builder)
}

/// Render a delete by identity
pub fn render_delete(table: &str, key: &str, id: Uuid) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("DELETE FROM ");
    builder
        .push(quote_ident(table))
        .push(" WHERE ")
        .push(quote_ident(key))
        .push(" = ")
        .push_bind(id);
    builder
}

fn push_where(
    builder: &mut QueryBuilder<'static, Postgres>,
    predicates: &[Predicate],
) -> StoreResult<()> {
    for (i, predicate) in predicates.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        push_predicate(builder, predicate)?;
    }
    Ok(())
}

fn push_predicate(
    builder: &mut QueryBuilder<'static, Postgres>,
    predicate: &Predicate,
) -> StoreResult<()> {
    let column = predicate.column;

    match (predicate.operator, &predicate.value) {
        (FilterOperator::In, Value::List(items)) if items.is_empty() => {
            builder.push("FALSE");
        }
        (FilterOperator::In, Value::List(items)) => {
            builder.push(quote_ident(column.name)).push(" IN (");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(builder, column.kind, item)?;
            }
            builder.push(")");
        }
        (FilterOperator::Equal, Value::Null) => {
            builder.push(quote_ident(column.name)).push(" IS NULL");
        }
        (FilterOperator::NotEqual, Value::Null) => {
            builder.push(quote_ident(column.name)).push(" IS NOT NULL");
        }
        (operator, value) => {
            builder
                .push(quote_ident(column.name))
                .push(format!(" {} ", operator));
            push_value(builder, column.kind, value)?;
        }
    }

    Ok(())
}

/// Bind one value, typing `NULL` by column kind
fn push_value(
    builder: &mut QueryBuilder<'static, Postgres>,
    kind: ColumnKind,
    value: &Value,
) -> StoreResult<()> {
    match value {
        Value::Null => match kind {
            ColumnKind::Uuid => builder.push_bind(None::<Uuid>),
            ColumnKind::Text => builder.push_bind(None::<String>),
            ColumnKind::Integer => builder.push_bind(None::<i32>),
            ColumnKind::BigInt => builder.push_bind(None::<i64>),
            ColumnKind::Double => builder.push_bind(None::<f64>),
            ColumnKind::Boolean => builder.push_bind(None::<bool>),
            ColumnKind::Timestamp => builder.push_bind(None::<DateTime<Utc>>),
        },
        Value::Int(n) if kind == ColumnKind::Integer => match i32::try_from(*n) {
            Ok(narrow) => builder.push_bind(narrow),
            Err(_) => builder.push_bind(*n),
        },
        Value::Bool(b) => builder.push_bind(*b),
        Value::Int(n) => builder.push_bind(*n),
        Value::Float(n) => builder.push_bind(*n),
        Value::Text(s) => builder.push_bind(s.clone()),
        Value::Uuid(id) => builder.push_bind(*id),
        Value::Timestamp(ts) => builder.push_bind(*ts),
        Value::List(_) => {
            return Err(StoreError::Unsupported(
                "a list can only be the operand of `in`".to_string(),
            ))
        }
    };
    Ok(())
}

/// Decode one row by the column table
pub fn decode_row(row: &PgRow, columns: &[Column]) -> StoreResult<Record> {
    let mut record = Record::new();

    for column in columns {
        let name = column.name;
        let value = match column.kind {
            ColumnKind::Uuid => row.try_get::<Option<Uuid>, _>(name)?.map(Value::Uuid),
            ColumnKind::Text => row.try_get::<Option<String>, _>(name)?.map(Value::Text),
            ColumnKind::Integer => row
                .try_get::<Option<i32>, _>(name)?
                .map(|n| Value::Int(i64::from(n))),
            ColumnKind::BigInt => row.try_get::<Option<i64>, _>(name)?.map(Value::Int),
            ColumnKind::Double => row.try_get::<Option<f64>, _>(name)?.map(Value::Float),
            ColumnKind::Boolean => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
            ColumnKind::Timestamp => row
                .try_get::<Option<DateTime<Utc>>, _>(name)?
                .map(Value::Timestamp),
        };
        record.insert(name.to_string(), value.unwrap_or(Value::Null));
    }

    Ok(record)
}

/// `COPY` statement reading CSV from stdin
pub fn copy_statement(table: &str, columns: &[String]) -> String {
    let list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
        quote_ident(table),
        list.join(", ")
    )
}

/// Encode rows as CSV for `COPY`
///
/// Unquoted empty fields are `NULL`; text is always quoted so an empty
/// string survives.
pub fn encode_csv(rows: &[Vec<Value>]) -> StoreResult<String> {
    let mut out = String::new();

    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            match value {
                Value::Null => {}
                Value::Bool(b) => out.push(if *b { 't' } else { 'f' }),
                Value::Int(n) => out.push_str(&n.to_string()),
                Value::Float(n) => out.push_str(&n.to_string()),
                Value::Uuid(id) => out.push_str(&id.to_string()),
                Value::Timestamp(ts) => out.push_str(&ts.to_rfc3339()),
                Value::Text(s) => {
                    out.push('"');
                    out.push_str(&s.replace('"', "\"\""));
                    out.push('"');
                }
                Value::List(_) => {
                    return Err(StoreError::Unsupported(
                        "lists cannot be bulk copied".to_string(),
                    ))
                }
            }
        }
        out.push('\n');
    }

    Ok(out)
}
