//! Bulk-copy loader
//!
//! Drains a possibly lazy sequence of records into fixed-size batches and
//! pushes each batch through one [`CopySink`], sequentially. Batches already
//! written stay written when a later one fails.

use super::error::StoreResult;
use super::store::{CopyChannel, CopySink};
use super::value::{Record, Value};

/// Rows per copy call unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Outcome of a bulk load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Copy calls made
    pub batches: usize,
    /// Rows the backend reported written
    pub rows: u64,
}

/// Batching front end for a [`CopyChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkLoader {
    batch_size: usize,
}

impl Default for BulkLoader {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BulkLoader {
    /// A batch size of zero is treated as one
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Copy `records` into `table`
    ///
    /// Each record is projected onto `columns` in order; missing keys become
    /// `NULL`. Empty input makes no copy calls and borrows no sink.
    pub async fn load<C, I>(
        &self,
        channel: &C,
        table: &str,
        columns: &[String],
        records: I,
    ) -> StoreResult<BulkReport>
    where
        C: CopyChannel,
        I: IntoIterator<Item = Record>,
        I::IntoIter: Send,
    {
        let mut records = records.into_iter().peekable();
        let mut report = BulkReport::default();

        if records.peek().is_none() {
            tracing::debug!(table, "bulk load with no records");
            return Ok(report);
        }

        let mut sink = channel.acquire().await?;

        loop {
            let batch: Vec<Vec<Value>> = records
                .by_ref()
                .take(self.batch_size)
                .map(|record| project(&record, columns))
                .collect();

            if batch.is_empty() {
                break;
            }

            let written = sink.copy_batch(table, columns, &batch).await.map_err(|e| {
                tracing::error!(
                    table,
                    batch = report.batches + 1,
                    rows_written = report.rows,
                    error = %e,
                    "bulk copy batch failed"
                );
                e
            })?;

            report.batches += 1;
            report.rows += written;
            tracing::debug!(table, batch = report.batches, rows = batch.len(), "copied batch");
        }

        Ok(report)
    }
}

/// Order a record's values by `columns`
pub fn project(record: &Record, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}
