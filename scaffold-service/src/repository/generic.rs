//! Generic entity-typed repository
//!
//! [`Repository`] combines the query builder and the unit of work for one
//! entity type. Reads go straight to the session connection; mutations are
//! staged on a caller-supplied [`Transaction`]. The bulk path skips the
//! transaction entirely and copies through a separate [`CopyChannel`].

use std::marker::PhantomData;

use super::bulk::{BulkLoader, BulkReport};
use super::entity::Entity;
use super::error::{RepositoryError, RepositoryOperation, RepositoryResult, StoreError};
use super::filter::Filters;
use super::query::{build_select, build_update, select_by_id, Pagination, SelectQuery};
use super::session::Session;
use super::store::{Connection, CopyChannel};
use super::transaction::Transaction;
use super::value::Record;

/// Per-entity facade over a [`Session`]
pub struct Repository<'s, E: Entity, C: Connection> {
    session: &'s Session<C>,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, E: Entity, C: Connection> Repository<'s, E, C> {
    pub fn new(session: &'s Session<C>) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    /// An inactive transaction guard on this repository's session
    pub fn transaction(&self) -> Transaction<'s, E, C> {
        Transaction::new(self.session)
    }

    /// First row matching `filters`, if any
    pub async fn get(&self, filters: Filters) -> RepositoryResult<Option<E>> {
        let query = build_select::<E>(filters)
            .map_err(|e| invalid_filter::<E>(RepositoryOperation::Get, &e))?
            .paginate(Pagination::single());

        let rows = self.fetch(RepositoryOperation::Get, &query).await?;
        rows.into_iter()
            .next()
            .map(E::from_record)
            .transpose()
            .map_err(|e| store_error::<E>(RepositoryOperation::Get, e))
    }

    /// Rows matching `filters`, paginated by its `offset` and `limit` keys
    ///
    /// Defaults are offset 0 and limit 10. A limit of zero returns nothing
    /// without querying storage.
    pub async fn query(&self, mut filters: Filters) -> RepositoryResult<Vec<E>> {
        let pagination = Pagination::extract(&mut filters)
            .map_err(|e| invalid_filter::<E>(RepositoryOperation::Query, &e))?;
        let query = build_select::<E>(filters)
            .map_err(|e| invalid_filter::<E>(RepositoryOperation::Query, &e))?
            .paginate(pagination);

        if pagination.limit == 0 {
            return Ok(Vec::new());
        }

        self.fetch(RepositoryOperation::Query, &query)
            .await?
            .into_iter()
            .map(E::from_record)
            .collect::<Result<Vec<_>, StoreError>>()
            .map_err(|e| store_error::<E>(RepositoryOperation::Query, e))
    }

    /// Stage one insert
    ///
    /// Identity and timestamps are populated only once the transaction
    /// flushes or commits.
    pub fn create(&self, entity: E, tx: &mut Transaction<'_, E, C>) -> E {
        tx.insert(entity.clone());
        entity
    }

    /// Stage several inserts and flush them
    pub async fn create_all(
        &self,
        entities: Vec<E>,
        tx: &mut Transaction<'_, E, C>,
    ) -> RepositoryResult<Vec<E>> {
        tx.insert_all(entities);
        tx.flush().await
    }

    /// Update rows matching `filters` in one round trip
    ///
    /// Returns the first updated row, or `None` when nothing matched.
    pub async fn partial_update(
        &self,
        filters: Filters,
        assignments: Record,
        tx: &mut Transaction<'_, E, C>,
    ) -> RepositoryResult<Option<E>> {
        let statement = build_update::<E>(filters, assignments)
            .map_err(|e| invalid_filter::<E>(RepositoryOperation::PartialUpdate, &e))?;

        tx.flush().await?;
        let rows = tx
            .connection(RepositoryOperation::PartialUpdate)
            .await?
            .update(&statement)
            .await
            .map_err(|e| store_error::<E>(RepositoryOperation::PartialUpdate, e))?;

        tracing::debug!(entity = E::NAME, rows = rows.len(), "partial update applied");

        rows.into_iter()
            .next()
            .map(E::from_record)
            .transpose()
            .map_err(|e| store_error::<E>(RepositoryOperation::PartialUpdate, e))
    }

    /// Stage a delete after checking the identity exists
    ///
    /// Fails with object-not-found before any delete is issued.
    pub async fn delete(&self, entity: &E, tx: &mut Transaction<'_, E, C>) -> RepositoryResult<()> {
        let id = entity.id().ok_or_else(|| {
            RepositoryError::not_found(RepositoryOperation::Delete, E::NAME, "<unsaved>")
        })?;
        let query = select_by_id::<E>(id)
            .map_err(|e| invalid_filter::<E>(RepositoryOperation::Delete, &e))?;

        tx.flush().await?;
        let found = tx
            .connection(RepositoryOperation::Delete)
            .await?
            .fetch(&query)
            .await
            .map_err(|e| store_error::<E>(RepositoryOperation::Delete, e))?;

        if found.is_empty() {
            return Err(RepositoryError::not_found(
                RepositoryOperation::Delete,
                E::NAME,
                id.to_string(),
            ));
        }

        tx.stage_delete(id);
        Ok(())
    }

    /// Copy records into `table` in batches, outside any transaction
    ///
    /// Runs on `channel` alone; no session connection is involved.
    pub async fn bulk_insert_copy<B, I>(
        channel: &B,
        table: &str,
        columns: &[String],
        records: I,
        batch_size: usize,
    ) -> RepositoryResult<BulkReport>
    where
        B: CopyChannel,
        I: IntoIterator<Item = Record>,
        I::IntoIter: Send,
    {
        let report = BulkLoader::new(batch_size)
            .load(channel, table, columns, records)
            .await
            .map_err(|e| store_error::<E>(RepositoryOperation::BulkInsert, e))?;

        tracing::info!(
            entity = E::NAME,
            table,
            batches = report.batches,
            rows = report.rows,
            "bulk copy finished"
        );
        Ok(report)
    }

    async fn fetch(
        &self,
        operation: RepositoryOperation,
        query: &SelectQuery,
    ) -> RepositoryResult<Vec<Record>> {
        let mut connection = self
            .session
            .lock()
            .await
            .map_err(|e| store_error::<E>(operation, e))?;

        connection
            .fetch(query)
            .await
            .map_err(|e| store_error::<E>(operation, e))
    }
}

fn invalid_filter<E: Entity>(
    operation: RepositoryOperation,
    source: &super::error::FilterError,
) -> RepositoryError {
    RepositoryError::invalid_filter(operation, source).with_entity_type(E::NAME)
}

fn store_error<E: Entity>(operation: RepositoryOperation, fault: StoreError) -> RepositoryError {
    RepositoryError::from_store(operation, fault).with_entity_type(E::NAME)
}
