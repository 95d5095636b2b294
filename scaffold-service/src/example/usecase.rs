//! Business logic for the example table
//!
//! Every call opens its own [`Session`] on a fresh connection from the
//! provider. Mutations run inside one [`Transaction`](crate::repository::Transaction)
//! and publish their event only after the commit succeeded; a failed publish
//! is logged and otherwise ignored.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use super::model::ExampleModel;
use super::schema::{
    BulkInsertCreate, BulkInsertResponse, CollectionResponse, ExampleCreate, ExampleQueryParams,
    ExampleResponse, ExampleUpdate,
};
use crate::error::{Error, Result};
use crate::events::{publish_json, EventPublisher, ExampleTopic};
use crate::repository::{
    ConnectionProvider, CopyChannel, Entity, Filters, Repository, RepositoryError,
    RepositoryErrorKind, RepositoryOperation, Session, Value, DEFAULT_BATCH_SIZE,
};

type ExampleRepository<'s, P> =
    Repository<'s, ExampleModel, <P as ConnectionProvider>::Connection>;

/// Example CRUD operations over a connection provider, a copy channel and
/// an event publisher
pub struct ExampleUsecase<P, B, E> {
    connections: P,
    copy_channel: B,
    publisher: E,
    batch_size: usize,
}

#[derive(Serialize)]
struct Deleted {
    id: Uuid,
}

impl<P, B, E> ExampleUsecase<P, B, E>
where
    P: ConnectionProvider,
    B: CopyChannel,
    E: EventPublisher,
{
    pub fn new(connections: P, copy_channel: B, publisher: E) -> Self {
        Self {
            connections,
            copy_channel,
            publisher,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn publisher(&self) -> &E {
        &self.publisher
    }

    /// Rows per COPY call on the bulk path
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub async fn get(&self, id: Uuid) -> Result<ExampleResponse> {
        let method_path = "ExampleUsecase.get";
        let session = self.session(RepositoryOperation::Get, method_path).await?;
        let repository = ExampleRepository::<P>::new(&session);

        let model = repository
            .get(by_id(id))
            .await
            .map_err(|e| in_method(method_path, e))?
            .ok_or_else(|| not_found(RepositoryOperation::Get, id))?;

        ExampleResponse::try_from(model)
    }

    pub async fn query(
        &self,
        params: &ExampleQueryParams,
        uri: &http::Uri,
    ) -> Result<CollectionResponse<ExampleResponse>> {
        let method_path = "ExampleUsecase.query";
        let session = self.session(RepositoryOperation::Query, method_path).await?;
        let repository = ExampleRepository::<P>::new(&session);

        let results = repository
            .query(params.to_filters())
            .await
            .map_err(|e| in_method(method_path, e))?
            .into_iter()
            .map(ExampleResponse::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(CollectionResponse::parse_collection(
            uri,
            results,
            params.offset,
            params.limit,
        ))
    }

    pub async fn create(&self, data: ExampleCreate) -> Result<ExampleResponse> {
        let method_path = "ExampleUsecase.create";
        let session = self.session(RepositoryOperation::Create, method_path).await?;
        let repository = ExampleRepository::<P>::new(&session);

        let mut tx = repository.transaction();
        let outcome = async {
            repository.create(ExampleModel::from(data), &mut tx);
            tx.flush().await
        }
        .await;
        let created = tx
            .resolve(outcome)
            .await
            .map_err(|e| in_method(method_path, e))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal(format!("{method_path}: insert returned no row")))?;

        let response = ExampleResponse::try_from(created)?;
        tracing::info!(id = %response.id, "example created");
        self.publish(ExampleTopic::Created, &response).await;
        Ok(response)
    }

    /// Load every item through the bulk-copy path
    ///
    /// Columns come from the first item. Nothing is rolled back when a later
    /// batch fails.
    pub async fn bulk_insert(
        &self,
        data: BulkInsertCreate<ExampleCreate>,
    ) -> Result<BulkInsertResponse> {
        let method_path = "ExampleUsecase.bulk_insert";
        let start = Instant::now();

        let Some(first) = data.items.first() else {
            return Ok(BulkInsertResponse {
                elapsed_time: start.elapsed().as_secs_f64(),
                inserted_rows: 0,
                batches: 0,
            });
        };
        let columns: Vec<String> = first.to_record().into_keys().collect();

        tracing::info!(items = data.items.len(), "Performing bulk insert...");
        let report = ExampleRepository::<P>::bulk_insert_copy(
            &self.copy_channel,
            ExampleModel::TABLE,
            &columns,
            data.items.iter().map(ExampleCreate::to_record),
            self.batch_size,
        )
        .await
        .map_err(|e| in_method(method_path, e))?;

        let elapsed_time = start.elapsed().as_secs_f64();
        tracing::info!(
            rows = report.rows,
            batches = report.batches,
            "Bulk insert finished. Elapsed time: {elapsed_time}"
        );

        let response = BulkInsertResponse {
            elapsed_time,
            inserted_rows: report.rows,
            batches: report.batches,
        };
        self.publish(ExampleTopic::BulkInserted, &response).await;
        Ok(response)
    }

    pub async fn partial_update(&self, data: ExampleUpdate, id: Uuid) -> Result<ExampleResponse> {
        let method_path = "ExampleUsecase.partial_update";
        let session = self
            .session(RepositoryOperation::PartialUpdate, method_path)
            .await?;
        let repository = ExampleRepository::<P>::new(&session);

        let mut tx = repository.transaction();
        let outcome = async {
            repository
                .partial_update(by_id(id), data.to_assignments(), &mut tx)
                .await?
                .ok_or_else(|| not_found(RepositoryOperation::PartialUpdate, id))
        }
        .await;
        let updated = tx
            .resolve(outcome)
            .await
            .map_err(|e| in_method(method_path, e))?;

        let response = ExampleResponse::try_from(updated)?;
        tracing::info!(id = %response.id, "example updated");
        self.publish(ExampleTopic::Updated, &response).await;
        Ok(response)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let method_path = "ExampleUsecase.delete";
        let session = self.session(RepositoryOperation::Delete, method_path).await?;
        let repository = ExampleRepository::<P>::new(&session);

        let mut tx = repository.transaction();
        let outcome = async {
            let model = repository
                .get(by_id(id))
                .await?
                .ok_or_else(|| not_found(RepositoryOperation::Delete, id))?;
            repository.delete(&model, &mut tx).await
        }
        .await;
        tx.resolve(outcome)
            .await
            .map_err(|e| in_method(method_path, e))?;

        tracing::info!(%id, "example deleted");
        self.publish(ExampleTopic::Deleted, &Deleted { id }).await;
        Ok(())
    }

    async fn session(
        &self,
        operation: RepositoryOperation,
        method_path: &str,
    ) -> Result<Session<P::Connection>> {
        let connection = self.connections.connect().await.map_err(|e| {
            in_method(
                method_path,
                RepositoryError::from_store(operation, e).with_entity_type(ExampleModel::NAME),
            )
        })?;
        Ok(Session::new(connection))
    }

    async fn publish<T: Serialize + Sync>(&self, topic: ExampleTopic, data: &T) {
        if let Err(e) = publish_json(&self.publisher, topic, data).await {
            tracing::warn!(%topic, error = %e, "failed to publish event");
        }
    }
}

fn by_id(id: Uuid) -> Filters {
    Filters::from([("id".to_string(), Value::Uuid(id))])
}

fn not_found(operation: RepositoryOperation, id: Uuid) -> RepositoryError {
    RepositoryError::not_found(operation, ExampleModel::NAME, id.to_string())
}

/// Name the usecase method in database-operation errors
fn in_method(method_path: &str, error: RepositoryError) -> Error {
    let error = match error.kind {
        RepositoryErrorKind::DbOperation => {
            let message = format!("{} in {}", error.message, method_path);
            error.with_message(message)
        }
        _ => error,
    };
    Error::Repository(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopPublisher;
    use crate::repository::MemoryStore;

    fn usecase(store: &MemoryStore) -> ExampleUsecase<MemoryStore, MemoryStore, NoopPublisher> {
        ExampleUsecase::new(store.clone(), store.clone(), NoopPublisher)
    }

    fn create(name: &str, age: i32) -> ExampleCreate {
        ExampleCreate {
            name: Some(name.to_string()),
            age: Some(age),
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let usecase = usecase(&store);

        let created = usecase.create(create("ann", 30)).await.unwrap();
        assert_eq!(created.created_at, created.updated_at);

        let fetched = usecase.get(created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let err = usecase(&store).get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::Repository(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_db_errors_name_the_method() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        store.fail_next_commit();

        let err = usecase(&store).create(create("ann", 30)).await.unwrap_err();
        let Error::Repository(err) = err else {
            panic!("expected a repository error, got {err:?}");
        };
        assert_eq!(err.kind, RepositoryErrorKind::DbOperation);
        assert!(err.message.ends_with("in ExampleUsecase.create"));
        assert!(store.rows("example").is_empty());
    }

    #[tokio::test]
    async fn test_partial_update_missing_row() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let update = ExampleUpdate {
            name: Some("nobody".into()),
            age: None,
        };
        let err = usecase(&store)
            .partial_update(update, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Repository(ref e) if e.is_not_found()));
        assert!(store.statements().iter().any(|s| s == "rollback"));
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let usecase = usecase(&store);
        let created = usecase.create(create("ann", 30)).await.unwrap();

        usecase.delete(created.id).await.unwrap();
        assert!(store.rows("example").is_empty());

        let again = usecase.delete(created.id).await.unwrap_err();
        assert!(matches!(again, Error::Repository(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_bulk_insert_uses_configured_batch_size() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let usecase = usecase(&store).with_batch_size(2);

        let items = (0..5).map(|i| create(&format!("bulk-{i}"), i)).collect();
        let response = usecase
            .bulk_insert(BulkInsertCreate { items })
            .await
            .unwrap();

        assert_eq!(response.inserted_rows, 5);
        assert_eq!(response.batches, 3);
        assert_eq!(store.copy_calls(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_bulk_insert_of_nothing() {
        let store = MemoryStore::for_entity::<ExampleModel>();
        let response = usecase(&store)
            .bulk_insert(BulkInsertCreate { items: vec![] })
            .await
            .unwrap();

        assert_eq!(response.inserted_rows, 0);
        assert_eq!(store.copy_sinks_acquired(), 0);
    }
}
