//! Forward-only record cursor.

use tokio::sync::mpsc;

use crate::error::StoreError;

/// A forward-only stream of records, ordered by `created_at` ascending.
///
/// Backed by a bounded channel fed by a spawned fetch task, so the
/// consumer applies backpressure to the database read and the cursor
/// stays O(1) in memory regardless of result size. Dropping the cursor
/// drops the channel and stops the producer at its next send.
pub struct RecordCursor<T> {
    rx: mpsc::Receiver<Result<T, StoreError>>,
}

impl<T: Send + 'static> RecordCursor<T> {
    /// Channel pair for a producer task; capacity bounds read-ahead.
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<Result<T, StoreError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// Cursor over an already-materialized set; used by the in-memory
    /// store and tests.
    pub fn from_records(records: Vec<T>) -> Self {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for record in records {
            // Capacity covers every record, so try_send cannot fail.
            let _ = tx.try_send(Ok(record));
        }
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Result<T, StoreError>> {
        self.rx.recv().await
    }
}
