//! Inbound example events
//!
//! Every [`ExampleTopic`] maps to one usecase call:
//!
//! | subject                          | payload `data`          | call             |
//! |----------------------------------|-------------------------|------------------|
//! | `<prefix>.example.created`       | `{name, age}`           | `create`         |
//! | `<prefix>.example.updated`       | `{id, name?, age?}`     | `partial_update` |
//! | `<prefix>.example.deleted`       | `{id}`                  | `delete`         |
//! | `<prefix>.example.bulk_inserted` | `{items: [{name, age}]}`| `bulk_insert`    |
//!
//! Payloads use the same `{event, version, data}` envelope the service
//! publishes. The prefix keeps inbound subjects apart from the ones the
//! usecase publishes on. A message that fails to decode, validate or apply is
//! logged and skipped.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use super::schema::{BulkInsertCreate, ExampleCreate, ExampleUpdate};
use super::usecase::ExampleUsecase;
use crate::error::{Error, Result};
use crate::events::{EventPublisher, ExampleTopic, EVENT_VERSION};
use crate::repository::{ConnectionProvider, CopyChannel};

#[derive(Deserialize)]
struct InboundEnvelope<T> {
    event: String,
    version: u32,
    data: T,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateMessage {
    id: Uuid,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    age: Option<i32>,
}

#[derive(Deserialize)]
struct DeleteMessage {
    id: Uuid,
}

/// Messages seen by [`ExampleEventConsumer::consume`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub handled: usize,
    pub failed: usize,
}

/// Applies inbound example events through an [`ExampleUsecase`]
pub struct ExampleEventConsumer<P, B, E> {
    usecase: Arc<ExampleUsecase<P, B, E>>,
}

impl<P, B, E> ExampleEventConsumer<P, B, E>
where
    P: ConnectionProvider,
    B: CopyChannel,
    E: EventPublisher,
{
    pub fn new(usecase: Arc<ExampleUsecase<P, B, E>>) -> Self {
        Self { usecase }
    }

    /// Decode one payload and apply it
    pub async fn handle(&self, topic: ExampleTopic, payload: &[u8]) -> Result<()> {
        match topic {
            ExampleTopic::Created => {
                let data: ExampleCreate = decode(topic, payload)?;
                data.validate()?;
                let created = self.usecase.create(data).await?;
                tracing::debug!(%topic, id = %created.id, "event applied");
            }
            ExampleTopic::Updated => {
                let message: UpdateMessage = decode(topic, payload)?;
                let data = ExampleUpdate {
                    name: message.name,
                    age: message.age,
                };
                data.validate()?;
                self.usecase.partial_update(data, message.id).await?;
            }
            ExampleTopic::Deleted => {
                let message: DeleteMessage = decode(topic, payload)?;
                self.usecase.delete(message.id).await?;
            }
            ExampleTopic::BulkInserted => {
                let data: BulkInsertCreate<ExampleCreate> = decode(topic, payload)?;
                data.validate()?;
                let report = self.usecase.bulk_insert(data).await?;
                tracing::debug!(%topic, rows = report.inserted_rows, "event applied");
            }
        }
        Ok(())
    }

    /// Apply every message until the stream ends
    pub async fn consume<S>(&self, messages: S) -> ConsumeReport
    where
        S: Stream<Item = (ExampleTopic, Vec<u8>)>,
    {
        let mut messages = std::pin::pin!(messages);
        let mut report = ConsumeReport::default();

        while let Some((topic, payload)) = messages.next().await {
            tracing::info!(%topic, bytes = payload.len(), "event received");
            match self.handle(topic, &payload).await {
                Ok(()) => {
                    report.handled += 1;
                    tracing::info!(%topic, "event processed");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(%topic, error = %e, "failed to process event");
                }
            }
        }

        tracing::info!(
            handled = report.handled,
            failed = report.failed,
            "event stream closed"
        );
        report
    }
}

/// Subject the consumer listens on for `topic`
pub fn inbound_subject(prefix: &str, topic: ExampleTopic) -> String {
    if prefix.is_empty() {
        topic.as_str().to_string()
    } else {
        format!("{prefix}.{topic}")
    }
}

fn decode<T: DeserializeOwned>(topic: ExampleTopic, payload: &[u8]) -> Result<T> {
    let envelope: InboundEnvelope<T> = serde_json::from_slice(payload)
        .map_err(|e| Error::Event(format!("{topic}: {e}")))?;

    if envelope.event != topic.as_str() {
        return Err(Error::Event(format!(
            "{topic}: envelope names `{}`",
            envelope.event
        )));
    }
    if envelope.version != EVENT_VERSION {
        return Err(Error::Event(format!(
            "{topic}: unsupported version {}",
            envelope.version
        )));
    }
    Ok(envelope.data)
}

#[cfg(feature = "events")]
mod nats {
    use futures::stream::{self, BoxStream};

    use super::*;
    use crate::state::AppState;

    /// One stream over every inbound example subject
    pub async fn subscribe(
        client: &async_nats::Client,
        prefix: &str,
    ) -> Result<BoxStream<'static, (ExampleTopic, Vec<u8>)>> {
        let mut streams = Vec::with_capacity(ExampleTopic::ALL.len());

        for topic in ExampleTopic::ALL {
            let subject = inbound_subject(prefix, topic);
            let subscriber = client
                .subscribe(subject.clone())
                .await
                .map_err(|e| Error::Nats(format!("Failed to subscribe to {}: {}", subject, e)))?;
            tracing::info!(subject, "subscribed to inbound events");

            streams.push(
                subscriber
                    .map(move |message| (topic, message.payload.to_vec()))
                    .boxed(),
            );
        }

        Ok(stream::select_all(streams).boxed())
    }

    /// Start the consumer when `[nats] consume = true`
    ///
    /// Returns `None` when consuming is disabled or no broker is connected.
    pub async fn spawn_consumer(
        state: &AppState,
    ) -> Result<Option<tokio::task::JoinHandle<ConsumeReport>>> {
        let Some(nats) = state.config().nats.as_ref().filter(|n| n.consume) else {
            return Ok(None);
        };
        let Some(client) = state.examples().publisher().nats_client() else {
            tracing::warn!("event consumer enabled without a NATS connection, not starting");
            return Ok(None);
        };

        let messages = subscribe(client, &nats.consume_prefix).await?;
        let consumer = ExampleEventConsumer::new(state.shared_examples());

        Ok(Some(tokio::spawn(async move {
            consumer.consume(messages).await
        })))
    }
}

#[cfg(feature = "events")]
pub use nats::{spawn_consumer, subscribe};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopPublisher;
    use crate::example::ExampleModel;
    use crate::repository::{MemoryStore, Value};
    use futures::stream;
    use serde_json::json;

    fn consumer(
        store: &MemoryStore,
    ) -> ExampleEventConsumer<MemoryStore, MemoryStore, NoopPublisher> {
        let usecase = ExampleUsecase::new(store.clone(), store.clone(), NoopPublisher);
        ExampleEventConsumer::new(Arc::new(usecase))
    }

    fn envelope(topic: ExampleTopic, data: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": topic.as_str(),
            "version": EVENT_VERSION,
            "data": data,
        }))
        .unwrap()
    }

    fn only_id(store: &MemoryStore) -> Uuid {
        let rows = store.rows("example");
        assert_eq!(rows.len(), 1);
        match rows[0].get("id") {
            Some(Value::Uuid(id)) => *id,
            other => panic!("unexpected id {other:?}"),
        }
    }

    #[test]
    fn test_inbound_subject() {
        assert_eq!(
            inbound_subject("inbound", ExampleTopic::Created),
            "inbound.example.created"
        );
        assert_eq!(
            inbound_subject("", ExampleTopic::Deleted),
            "example.deleted"
        );
    }

    #[tokio::test]
    async fn test_each_topic_reaches_its_usecase_call() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let consumer = consumer(&store);

        consumer
            .handle(
                ExampleTopic::Created,
                &envelope(ExampleTopic::Created, json!({"name": "ann", "age": 30})),
            )
            .await
            .unwrap();
        let id = only_id(&store);

        consumer
            .handle(
                ExampleTopic::Updated,
                &envelope(ExampleTopic::Updated, json!({"id": id, "age": 31})),
            )
            .await
            .unwrap();
        let rows = store.rows("example");
        assert_eq!(rows[0].get("age"), Some(&Value::Int(31)));
        assert_eq!(rows[0].get("name"), Some(&Value::Text("ann".into())));

        consumer
            .handle(
                ExampleTopic::Deleted,
                &envelope(ExampleTopic::Deleted, json!({"id": id})),
            )
            .await
            .unwrap();
        assert!(store.rows("example").is_empty());

        let items = json!({"items": [
            {"name": "bob", "age": 20},
            {"name": "cid", "age": 21},
        ]});
        consumer
            .handle(
                ExampleTopic::BulkInserted,
                &envelope(ExampleTopic::BulkInserted, items),
            )
            .await
            .unwrap();
        assert_eq!(store.rows("example").len(), 2);
        assert_eq!(store.copy_calls(), vec![2]);
    }

    #[tokio::test]
    async fn test_envelope_must_match_topic_and_version() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let consumer = consumer(&store);

        let wrong_event = envelope(ExampleTopic::Deleted, json!({"name": "ann"}));
        let err = consumer
            .handle(ExampleTopic::Created, &wrong_event)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Event(_)));

        let future_version = serde_json::to_vec(&json!({
            "event": "example.created",
            "version": 2,
            "data": {"name": "ann"},
        }))
        .unwrap();
        let err = consumer
            .handle(ExampleTopic::Created, &future_version)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Event(_)));
        assert!(store.rows("example").is_empty());
    }

    #[tokio::test]
    async fn test_consume_logs_failures_and_continues() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let consumer = consumer(&store);

        let messages = stream::iter(vec![
            (
                ExampleTopic::Created,
                envelope(ExampleTopic::Created, json!({"name": "ann", "age": 30})),
            ),
            (ExampleTopic::Created, b"not json".to_vec()),
            (
                ExampleTopic::Created,
                envelope(ExampleTopic::Created, json!({"name": "x"})),
            ),
            (
                ExampleTopic::Deleted,
                envelope(ExampleTopic::Deleted, json!({"id": Uuid::new_v4()})),
            ),
            (
                ExampleTopic::Created,
                envelope(ExampleTopic::Created, json!({"name": "bob", "age": 40})),
            ),
        ]);

        let report = consumer.consume(messages).await;

        assert_eq!(report, ConsumeReport { handled: 2, failed: 3 });
        assert_eq!(store.rows("example").len(), 2);
    }
}
