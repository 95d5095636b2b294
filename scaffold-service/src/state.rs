//! Application state management

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::database;
use crate::error::Result;
use crate::events::Publisher;
use crate::example::{ExampleModel, ExampleUsecase};
use crate::repository::{validate_schema, PostgresCopyChannel};

/// Usecase wired to PostgreSQL and the configured broker
pub type PostgresExampleUsecase = ExampleUsecase<PgPool, PostgresCopyChannel, Publisher>;

/// Application state shared across handlers
///
/// Defaults to the PostgreSQL backends; tests substitute the in-memory store
/// through the type parameters.
pub struct AppState<P = PgPool, B = PostgresCopyChannel, E = Publisher> {
    config: Arc<Config>,
    examples: Arc<ExampleUsecase<P, B, E>>,
}

impl<P, B, E> Clone for AppState<P, B, E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            examples: Arc::clone(&self.examples),
        }
    }
}

impl<P, B, E> AppState<P, B, E> {
    pub fn new(config: Config, examples: ExampleUsecase<P, B, E>) -> Self {
        Self {
            config: Arc::new(config),
            examples: Arc::new(examples),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn examples(&self) -> &ExampleUsecase<P, B, E> {
        &self.examples
    }

    /// Shared handle on the usecase, for work outside request handlers
    pub fn shared_examples(&self) -> Arc<ExampleUsecase<P, B, E>> {
        Arc::clone(&self.examples)
    }
}

impl AppState {
    /// Connect every backend named in `config`
    ///
    /// Checks the entity column table, creates the request and copy pools,
    /// applies migrations when enabled and picks the event publisher.
    pub async fn connect(config: Config) -> Result<Self> {
        validate_schema::<ExampleModel>()?;

        let pool = database::create_pool(&config.database).await?;
        let copy_pool = database::create_copy_pool(&config.database).await?;

        if config.database.run_migrations {
            database::run_migrations(&pool).await?;
        }

        let publisher = create_publisher(&config).await?;
        let examples = ExampleUsecase::new(pool, PostgresCopyChannel::new(copy_pool), publisher)
            .with_batch_size(config.bulk.batch_size);

        Ok(Self::new(config, examples))
    }
}

#[cfg(feature = "events")]
async fn create_publisher(config: &Config) -> Result<Publisher> {
    match &config.nats {
        Some(nats) => Ok(Publisher::Nats(
            crate::events::NatsPublisher::connect(nats).await?,
        )),
        None => {
            tracing::info!("No [nats] section configured, events will be dropped");
            Ok(Publisher::default())
        }
    }
}

#[cfg(not(feature = "events"))]
async fn create_publisher(config: &Config) -> Result<Publisher> {
    if let Some(url) = config.nats_url() {
        tracing::warn!(url, "NATS configured but the `events` feature is disabled, events will be dropped");
    }
    Ok(Publisher::default())
}
