//! Generic data-access layer
//!
//! This module provides the entity-typed repository the example service is
//! built on, split into small pieces that build on each other:
//!
//! - **Filter compiler** ([`compile`]): `field[__operator]` keys to typed
//!   [`Predicate`]s against an [`Entity`]'s column table
//! - **Query builder** ([`build_select`], [`build_update`]): predicate
//!   conjunctions plus [`Pagination`] or assignments
//! - **Unit of work** ([`Transaction`]): staged inserts and deletes, resolved
//!   exactly once
//! - **Repository** ([`Repository`]): get / query / create / partial update /
//!   delete, plus the non-transactional bulk-copy path
//! - **Bulk loader** ([`BulkLoader`]): batches records into copy calls
//!
//! Storage sits behind the [`Connection`] and [`CopyChannel`] traits, with a
//! PostgreSQL implementation and an in-memory one.
//!
//! # Example
//!
//! ```rust,ignore
//! use scaffold_service::repository::{PostgresConnection, Repository, Session};
//!
//! let session = Session::new(PostgresConnection::acquire(&pool).await?);
//! let repository = Repository::<ExampleModel, _>::new(&session);
//!
//! let adults = repository
//!     .query(Filters::from([("age__gte".to_string(), Value::Int(18))]))
//!     .await?;
//! ```

mod bulk;
mod entity;
mod error;
mod filter;
mod generic;
pub mod memory;
pub mod postgres;
mod query;
mod session;
mod store;
mod transaction;
mod value;

pub use bulk::{project, BulkLoader, BulkReport, DEFAULT_BATCH_SIZE};
pub use entity::{validate_schema, Column, ColumnKind, ColumnRole, Entity, SchemaError};
pub use error::{
    FilterError, RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryResult,
    StoreError, StoreResult,
};
pub use filter::{compile, compile_all, split_key, FilterOperator, Filters, Predicate, SEPARATOR};
pub use generic::Repository;
pub use memory::{MemoryConnection, MemoryStore};
pub use postgres::{PostgresConnection, PostgresCopyChannel};
pub use query::{
    build_select, build_update, select_by_id, Pagination, SelectQuery, UpdateStatement,
    DEFAULT_LIMIT, DEFAULT_OFFSET, LIMIT_KEY, OFFSET_KEY,
};
pub use session::Session;
pub use store::{Connection, ConnectionProvider, CopyChannel, CopySink};
pub use transaction::Transaction;
pub use value::{take_column, FromValue, Record, Value};
