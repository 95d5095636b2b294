//! Request-scoped session around one storage connection
//!
//! The repository and its transactions share the session for the length of a
//! request. The connection sits behind an async mutex; transaction state is
//! tracked here so a second transaction guard joins the first one instead of
//! nesting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use super::error::StoreResult;
use super::store::Connection;

/// One borrowed connection plus its transaction state
pub struct Session<C: Connection> {
    connection: Mutex<C>,
    in_transaction: AtomicBool,
    rollback_pending: AtomicBool,
    generation: AtomicU64,
}

impl<C: Connection> Session<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection: Mutex::new(connection),
            in_transaction: AtomicBool::new(false),
            rollback_pending: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Whether a transaction is open on the connection
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    /// Whether a dropped guard left a rollback to run
    pub fn rollback_pending(&self) -> bool {
        self.rollback_pending.load(Ordering::Acquire)
    }

    /// Counter bumped each time a transaction begins on the connection
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether transaction `generation` is still open and not scheduled for
    /// rollback
    pub fn is_live(&self, generation: u64) -> bool {
        self.in_transaction() && !self.rollback_pending() && self.generation() == generation
    }

    /// Lock the connection
    ///
    /// Runs any rollback scheduled by a dropped transaction guard first, so the
    /// caller never sees a half-finished transaction.
    pub(crate) async fn lock(&self) -> StoreResult<MutexGuard<'_, C>> {
        let mut connection = self.connection.lock().await;

        if self.rollback_pending.swap(false, Ordering::AcqRel) {
            tracing::warn!("rolling back transaction abandoned by a dropped guard");
            if let Err(e) = connection.rollback().await {
                self.rollback_pending.store(true, Ordering::Release);
                return Err(e);
            }
            self.in_transaction.store(false, Ordering::Release);
        }

        Ok(connection)
    }

    /// Mark a freshly begun transaction; returns its generation
    pub(crate) fn start_transaction(&self) -> u64 {
        self.in_transaction.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn set_in_transaction(&self, active: bool) {
        self.in_transaction.store(active, Ordering::Release);
    }

    pub(crate) fn schedule_rollback(&self) {
        self.rollback_pending.store(true, Ordering::Release);
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        if self.in_transaction() || self.rollback_pending() {
            tracing::warn!("session dropped with an open transaction, closing its connection");
            self.connection.get_mut().abandon();
        }
    }
}
