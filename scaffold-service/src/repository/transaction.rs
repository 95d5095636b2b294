//! Unit of work
//!
//! A [`Transaction`] stages inserts and deletes for one entity type and writes
//! them in staging order on [`flush`](Transaction::flush). It resolves exactly
//! once: [`commit`](Transaction::commit), [`rollback`](Transaction::rollback)
//! and [`resolve`](Transaction::resolve) consume the guard.
//!
//! The first guard to begin on a session owns the transaction. Guards that
//! begin while one is already open join it; they flush but never commit or
//! roll back. Once the transaction a guard joined is resolved or rolled back,
//! the guard fails instead of writing outside it.
//!
//! Dropping an owning guard without resolving it (early return, panic, a
//! cancelled future) schedules a rollback on the session. It runs before the
//! connection is used again.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut tx = repository.transaction();
//! let outcome = async {
//!     repository.create(model, &mut tx);
//!     let created = tx.flush().await?;
//!     Ok::<_, RepositoryError>(created)
//! }
//! .await;
//! let created = tx.resolve(outcome).await?;
//! ```

use std::fmt;

use tokio::sync::MutexGuard;
use uuid::Uuid;

use super::entity::Entity;
use super::error::{RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryResult};
use super::query::select_by_id;
use super::session::Session;
use super::store::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    Owner,
    Joined,
}

enum Staged<E> {
    Insert(E),
    Delete(Uuid),
}

/// Transaction guard over a [`Session`]
pub struct Transaction<'s, E: Entity, C: Connection> {
    session: &'s Session<C>,
    state: State,
    generation: u64,
    staged: Vec<Staged<E>>,
}

impl<'s, E: Entity, C: Connection> Transaction<'s, E, C> {
    /// An inactive guard; nothing happens until first use
    pub fn new(session: &'s Session<C>) -> Self {
        Self {
            session,
            state: State::Inactive,
            generation: 0,
            staged: Vec::new(),
        }
    }

    /// Whether the guard has begun (as owner or joiner)
    pub fn is_active(&self) -> bool {
        self.state != State::Inactive
    }

    /// Whether this guard is responsible for commit and rollback
    pub fn is_owner(&self) -> bool {
        self.state == State::Owner
    }

    /// Number of staged, unflushed mutations
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    /// Start the transaction, or join the one already open on the session
    pub async fn begin(&mut self) -> RepositoryResult<()> {
        self.connection(RepositoryOperation::Begin).await.map(drop)
    }

    /// Stage one insert
    pub fn insert(&mut self, entity: E) -> &mut Self {
        self.staged.push(Staged::Insert(entity));
        self
    }

    /// Stage several inserts, keeping their order
    pub fn insert_all<I>(&mut self, entities: I) -> &mut Self
    where
        I: IntoIterator<Item = E>,
    {
        self.staged.extend(entities.into_iter().map(Staged::Insert));
        self
    }

    pub(crate) fn stage_delete(&mut self, id: Uuid) {
        self.staged.push(Staged::Delete(id));
    }

    /// Write staged mutations in staging order without resolving
    ///
    /// Returns the inserted rows with storage-assigned identity and
    /// timestamps.
    pub async fn flush(&mut self) -> RepositoryResult<Vec<E>> {
        if self.staged.is_empty() {
            return Ok(Vec::new());
        }

        let staged = std::mem::take(&mut self.staged);
        let mut connection = self.connection(RepositoryOperation::Flush).await?;
        let mut persisted = Vec::new();

        for item in staged {
            match item {
                Staged::Insert(entity) => {
                    let row = connection
                        .insert(E::TABLE, E::COLUMNS, &entity.to_record())
                        .await
                        .map_err(|e| store_error::<E>(RepositoryOperation::Flush, e))?;
                    let entity = E::from_record(row)
                        .map_err(|e| store_error::<E>(RepositoryOperation::Flush, e))?;
                    persisted.push(entity);
                }
                Staged::Delete(id) => {
                    connection
                        .delete(E::TABLE, E::identity_column(), id)
                        .await
                        .map_err(|e| store_error::<E>(RepositoryOperation::Flush, e))?;
                }
            }
        }

        tracing::debug!(entity = E::NAME, rows = persisted.len(), "flushed staged mutations");
        Ok(persisted)
    }

    /// Reload an entity's persisted state in place
    pub async fn refresh(&mut self, entity: &mut E) -> RepositoryResult<()> {
        let id = entity.id().ok_or_else(|| {
            RepositoryError::not_found(RepositoryOperation::Refresh, E::NAME, "<unsaved>")
        })?;
        let query = select_by_id::<E>(id)
            .map_err(|e| RepositoryError::invalid_filter(RepositoryOperation::Refresh, &e))?;

        let mut connection = self.connection(RepositoryOperation::Refresh).await?;
        let row = connection
            .fetch(&query)
            .await
            .map_err(|e| store_error::<E>(RepositoryOperation::Refresh, e))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RepositoryError::not_found(RepositoryOperation::Refresh, E::NAME, id.to_string())
            })?;

        *entity = E::from_record(row).map_err(|e| store_error::<E>(RepositoryOperation::Refresh, e))?;
        Ok(())
    }

    /// Flush and commit
    ///
    /// A joined guard only flushes. If the commit fails the transaction is
    /// rolled back and the commit fault is returned.
    pub async fn commit(mut self) -> RepositoryResult<Vec<E>> {
        let persisted = match self.flush().await {
            Ok(persisted) => persisted,
            Err(fault) => {
                self.discard().await;
                return Err(fault);
            }
        };

        if self.state != State::Owner {
            let joined = self.state == State::Joined;
            self.state = State::Inactive;
            if joined && !self.session.is_live(self.generation) {
                return Err(joined_resolved::<E>(RepositoryOperation::Commit));
            }
            return Ok(persisted);
        }

        let session = self.session;
        self.state = State::Inactive;

        let mut connection = session.lock().await.map_err(|e| {
            session.schedule_rollback();
            store_error::<E>(RepositoryOperation::Commit, e)
        })?;

        if let Err(fault) = connection.commit().await {
            tracing::error!(entity = E::NAME, error = %fault, "commit failed, rolling back");
            if let Err(e) = connection.rollback().await {
                tracing::error!(entity = E::NAME, error = %e, "rollback after failed commit failed");
            }
            session.set_in_transaction(false);
            return Err(store_error::<E>(RepositoryOperation::Commit, fault));
        }

        session.set_in_transaction(false);
        tracing::debug!(entity = E::NAME, rows = persisted.len(), "transaction committed");
        Ok(persisted)
    }

    /// Discard staged mutations and roll back
    ///
    /// A joined guard only discards its staged mutations.
    pub async fn rollback(mut self) -> RepositoryResult<()> {
        self.staged.clear();

        if self.state != State::Owner {
            self.state = State::Inactive;
            return Ok(());
        }

        let session = self.session;
        self.state = State::Inactive;

        let mut connection = session.lock().await.map_err(|e| {
            session.schedule_rollback();
            store_error::<E>(RepositoryOperation::Rollback, e)
        })?;

        if let Err(fault) = connection.rollback().await {
            session.schedule_rollback();
            return Err(store_error::<E>(RepositoryOperation::Rollback, fault));
        }

        session.set_in_transaction(false);
        tracing::debug!(entity = E::NAME, "transaction rolled back");
        Ok(())
    }

    /// Commit on `Ok`, roll back on `Err`
    ///
    /// The fault in `outcome` propagates unchanged; a failed rollback is only
    /// logged. A failed commit is returned.
    pub async fn resolve<T, Err>(self, outcome: Result<T, Err>) -> Result<T, Err>
    where
        Err: From<RepositoryError> + fmt::Display,
    {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(fault) => {
                tracing::warn!(entity = E::NAME, error = %fault, "rolling back after fault");
                if let Err(e) = self.rollback().await {
                    tracing::error!(entity = E::NAME, error = %e, "rollback failed");
                }
                Err(fault)
            }
        }
    }

    /// Lock the session connection, beginning or joining first
    pub(crate) async fn connection(
        &mut self,
        operation: RepositoryOperation,
    ) -> RepositoryResult<MutexGuard<'s, C>> {
        let session = self.session;
        let mut connection = session
            .lock()
            .await
            .map_err(|e| store_error::<E>(operation, e))?;

        match self.state {
            State::Owner => return Ok(connection),
            State::Joined if session.is_live(self.generation) => return Ok(connection),
            State::Joined => return Err(joined_resolved::<E>(operation)),
            State::Inactive => {}
        }

        if session.in_transaction() {
            self.state = State::Joined;
            self.generation = session.generation();
            tracing::debug!(entity = E::NAME, "joined open transaction");
            return Ok(connection);
        }

        connection
            .begin()
            .await
            .map_err(|e| store_error::<E>(operation, e))?;
        self.generation = session.start_transaction();
        self.state = State::Owner;
        tracing::debug!(entity = E::NAME, "transaction started");
        Ok(connection)
    }

    async fn discard(&mut self) {
        self.staged.clear();
        if self.state != State::Owner {
            self.state = State::Inactive;
            return;
        }

        self.state = State::Inactive;
        match self.session.lock().await {
            Ok(mut connection) => {
                if let Err(e) = connection.rollback().await {
                    tracing::error!(entity = E::NAME, error = %e, "rollback failed");
                    self.session.schedule_rollback();
                } else {
                    self.session.set_in_transaction(false);
                }
            }
            Err(e) => {
                tracing::error!(entity = E::NAME, error = %e, "rollback failed");
                self.session.schedule_rollback();
            }
        }
    }
}

impl<E: Entity, C: Connection> Drop for Transaction<'_, E, C> {
    fn drop(&mut self) {
        if self.state == State::Owner {
            tracing::warn!(entity = E::NAME, "transaction dropped unresolved, scheduling rollback");
            self.session.schedule_rollback();
        }
    }
}

fn joined_resolved<E: Entity>(operation: RepositoryOperation) -> RepositoryError {
    RepositoryError::new(
        operation,
        RepositoryErrorKind::DbOperation,
        "joined transaction already resolved",
    )
    .with_entity_type(E::NAME)
}

fn store_error<E: Entity>(
    operation: RepositoryOperation,
    fault: super::error::StoreError,
) -> RepositoryError {
    RepositoryError::from_store(operation, fault).with_entity_type(E::NAME)
}
