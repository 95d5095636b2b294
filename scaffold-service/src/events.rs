//! Domain event publishing
//!
//! Usecases publish through [`EventPublisher`] after a successful commit.
//! [`Publisher`] is the concrete choice made at startup: NATS when the
//! `events` feature is enabled and `[nats]` is configured, a no-op otherwise.

use serde::Serialize;
use std::future::Future;

#[cfg(feature = "events")]
use async_nats::Client;
#[cfg(feature = "events")]
use std::time::Duration;

#[cfg(feature = "events")]
use crate::config::NatsConfig;
use crate::error::{Error, Result};

/// Subjects the example entity publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExampleTopic {
    Created,
    BulkInserted,
    Updated,
    Deleted,
}

impl ExampleTopic {
    pub const ALL: [ExampleTopic; 4] = [
        Self::Created,
        Self::BulkInserted,
        Self::Updated,
        Self::Deleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "example.created",
            Self::BulkInserted => "example.bulk_inserted",
            Self::Updated => "example.updated",
            Self::Deleted => "example.deleted",
        }
    }
}

impl std::fmt::Display for ExampleTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of every published event
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope<'a, T> {
    pub event: &'a str,
    pub version: u32,
    pub data: &'a T,
}

/// Current envelope version
pub const EVENT_VERSION: u32 = 1;

/// Sink for serialized domain events
pub trait EventPublisher: Send + Sync + 'static {
    /// Publish raw bytes on `subject`
    fn publish(&self, subject: &str, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

/// Publish `data` wrapped in an [`EventEnvelope`]
pub async fn publish_json<P, T>(publisher: &P, topic: ExampleTopic, data: &T) -> Result<()>
where
    P: EventPublisher,
    T: Serialize + Sync,
{
    let envelope = EventEnvelope {
        event: topic.as_str(),
        version: EVENT_VERSION,
        data,
    };
    let json = serde_json::to_vec(&envelope)
        .map_err(|e| Error::Internal(format!("Failed to serialize event: {}", e)))?;

    publisher.publish(topic.as_str(), json).await
}

/// Publisher that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        tracing::trace!(subject, bytes = payload.len(), "event dropped, no broker configured");
        Ok(())
    }
}

/// NATS-backed publisher
#[cfg(feature = "events")]
#[derive(Debug, Clone)]
pub struct NatsPublisher {
    client: Client,
}

#[cfg(feature = "events")]
impl NatsPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with retries
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        create_client(config).await.map(Self::new)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[cfg(feature = "events")]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::Nats(format!("Failed to publish to {}: {}", subject, e)))
    }
}

/// Publisher selected at startup
#[derive(Debug, Clone)]
pub enum Publisher {
    Noop(NoopPublisher),
    #[cfg(feature = "events")]
    Nats(NatsPublisher),
}

impl Publisher {
    /// The broker connection, when publishing through NATS
    #[cfg(feature = "events")]
    pub fn nats_client(&self) -> Option<&Client> {
        match self {
            Self::Nats(p) => Some(p.client()),
            Self::Noop(_) => None,
        }
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::Noop(NoopPublisher)
    }
}

impl EventPublisher for Publisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        match self {
            Self::Noop(p) => p.publish(subject, payload).await,
            #[cfg(feature = "events")]
            Self::Nats(p) => p.publish(subject, payload).await,
        }
    }
}

/// Create a NATS client with retry logic
///
/// Uses exponential backoff strategy for retries
#[cfg(feature = "events")]
pub async fn create_client(config: &NatsConfig) -> Result<Client> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_client(config).await {
            Ok(client) => {
                if attempt > 0 {
                    tracing::info!(
                        "NATS connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!("NATS client connected to {}", config.url);
                }
                return Ok(client);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to NATS after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));

                tracing::warn!(
                    "NATS connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Attempt to create a NATS client (single try)
#[cfg(feature = "events")]
async fn try_create_client(config: &NatsConfig) -> Result<Client> {
    let mut opts = async_nats::ConnectOptions::new();

    if let Some(name) = &config.name {
        opts = opts.name(name);
    }

    opts = opts.max_reconnects(Some(config.max_reconnects));

    opts.connect(&config.url).await.map_err(|e| {
        Error::Nats(format!(
            "Failed to connect to NATS server at '{}' (client name: {}): {}",
            config.url,
            config.name.as_deref().unwrap_or("<none>"),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording {
        sent: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    }

    impl EventPublisher for Recording {
        async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
            let body = serde_json::from_slice(&payload).unwrap();
            self.sent.lock().unwrap().push((subject.to_string(), body));
            Ok(())
        }
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(ExampleTopic::Created.as_str(), "example.created");
        assert_eq!(ExampleTopic::BulkInserted.as_str(), "example.bulk_inserted");
        assert_eq!(ExampleTopic::Updated.to_string(), "example.updated");
        assert_eq!(ExampleTopic::Deleted.as_str(), "example.deleted");
    }

    #[tokio::test]
    async fn test_publish_json_wraps_envelope() {
        let recording = Recording::default();
        publish_json(&recording, ExampleTopic::Created, &serde_json::json!({"name": "ann"}))
            .await
            .unwrap();

        let sent = recording.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "example.created");
        assert_eq!(
            sent[0].1,
            serde_json::json!({"event": "example.created", "version": 1, "data": {"name": "ann"}})
        );
    }

    #[tokio::test]
    async fn test_default_publisher_accepts_everything() {
        let publisher = Publisher::default();
        assert!(publisher.publish("example.deleted", b"{}".to_vec()).await.is_ok());
    }
}
