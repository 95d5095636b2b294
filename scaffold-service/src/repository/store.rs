//! Storage backend traits
//!
//! [`Connection`] is one request-scoped storage connection. [`CopyChannel`]
//! hands out [`CopySink`]s for the bulk-copy path, which runs on its own pooled
//! connections outside any transaction.
//!
//! Two backends implement these: [`PostgresConnection`](super::postgres::PostgresConnection)
//! over `sqlx` and [`MemoryStore`](super::memory::MemoryStore) for tests.

use std::future::Future;

use uuid::Uuid;

use super::entity::Column;
use super::error::StoreResult;
use super::query::{SelectQuery, UpdateStatement};
use super::value::{Record, Value};

/// One storage connection with explicit transaction control
pub trait Connection: Send {
    /// Start a transaction
    fn begin(&mut self) -> impl Future<Output = StoreResult<()>> + Send;

    /// Commit the open transaction
    fn commit(&mut self) -> impl Future<Output = StoreResult<()>> + Send;

    /// Roll back the open transaction
    fn rollback(&mut self) -> impl Future<Output = StoreResult<()>> + Send;

    /// Run a read query, returning full rows
    fn fetch(&mut self, query: &SelectQuery)
        -> impl Future<Output = StoreResult<Vec<Record>>> + Send;

    /// Insert one row and return it with storage-assigned columns
    fn insert(
        &mut self,
        table: &'static str,
        columns: &'static [Column],
        values: &Record,
    ) -> impl Future<Output = StoreResult<Record>> + Send;

    /// Run an update, returning every updated row
    fn update(
        &mut self,
        statement: &UpdateStatement,
    ) -> impl Future<Output = StoreResult<Vec<Record>>> + Send;

    /// Delete by identity, returning the number of rows removed
    fn delete(
        &mut self,
        table: &'static str,
        key: &'static str,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Give up the connection while a transaction may still be open
    ///
    /// Called when a session is dropped mid-transaction. The connection must
    /// not be handed to another user in that state.
    fn abandon(&mut self);
}

/// Hands out request-scoped connections, usually a pool
pub trait ConnectionProvider: Send + Sync {
    type Connection: Connection;

    /// Borrow one connection for the lifetime of a request
    fn connect(&self) -> impl Future<Output = StoreResult<Self::Connection>> + Send;
}

/// Source of bulk-copy sinks, usually a dedicated pool
pub trait CopyChannel: Send + Sync {
    type Sink: CopySink;

    /// Borrow one sink for the duration of a load
    fn acquire(&self) -> impl Future<Output = StoreResult<Self::Sink>> + Send;
}

/// A borrowed connection that accepts columnar batches
pub trait CopySink: Send {
    /// Write one batch of column-ordered rows, returning rows written
    fn copy_batch(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> impl Future<Output = StoreResult<u64>> + Send;
}
