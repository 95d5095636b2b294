//! # scaffold-service
//!
//! CRUD scaffold for a single `example` table on PostgreSQL, built around a
//! generic data-access layer:
//!
//! - **Filter compiler** and **query builder** for `field[__op]` filter maps
//! - **Unit of work** with exactly-once commit or rollback
//! - **Generic repository** for get / query / create / partial update / delete
//! - **Bulk loader** streaming records through `COPY` in fixed-size batches
//!
//! Around it sit an axum HTTP surface, figment configuration, JSON tracing
//! and optional NATS event publishing (`events` feature).
//!
//! ## Example
//!
//! ```rust,no_run
//! use scaffold_service::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::connect(config.clone()).await?;
//!
//!     Server::new(config).serve(app(state)).await
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod example;
pub mod health;
pub mod observability;
pub mod repository;
pub mod responses;
pub mod server;
pub mod state;

/// Common imports for the binary and integration tests
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventPublisher, NoopPublisher, Publisher};
    pub use crate::example::{ExampleModel, ExampleUsecase};
    pub use crate::observability::init_tracing;
    pub use crate::repository::{
        Entity, Filters, MemoryStore, Repository, RepositoryError, Session, Transaction, Value,
    };
    pub use crate::server::{app, Server};
    pub use crate::state::AppState;
}
