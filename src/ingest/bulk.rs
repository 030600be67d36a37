//! Chunked bulk writes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::storage::{ItemFailure, StorageError, WaypointStore};
use crate::waypoint::IndexedWaypoint;

/// Documents per bulk request unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 100;
/// Per-chunk timeout unless configured otherwise.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from a bulk write.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    #[error("{failed} of {total} bulk chunks failed, last error: {last}")]
    ChunksFailed {
        failed: usize,
        total: usize,
        summary: BulkSummary,
        #[source]
        last: StorageError,
    },
}

impl BulkError {
    pub fn is_unavailable(&self) -> bool {
        match self {
            BulkError::InvalidChunkSize => false,
            BulkError::ChunksFailed { last, .. } => last.is_unavailable(),
        }
    }
}

/// Outcome of writing one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSummary {
    pub chunks: usize,
    pub written: usize,
    pub item_failures: Vec<ItemFailure>,
    pub failed_chunks: usize,
}

/// Writes waypoints to one index in fixed-size chunks, one bulk request each.
pub struct BulkWriter {
    store: Arc<dyn WaypointStore>,
    index: String,
    chunk_size: usize,
    timeout: Duration,
}

impl BulkWriter {
    pub fn new(store: Arc<dyn WaypointStore>, index: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, BulkError> {
        if chunk_size == 0 {
            return Err(BulkError::InvalidChunkSize);
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Write all entries, chunk by chunk, in order.
    ///
    /// Rejected documents are logged and counted. A failed chunk is logged and
    /// the rest are still attempted; the call then fails with the last chunk
    /// error.
    pub async fn write(&self, entries: &[IndexedWaypoint]) -> Result<BulkSummary, BulkError> {
        let mut summary = BulkSummary::default();
        let mut last_error = None;

        for (n, chunk) in entries.chunks(self.chunk_size).enumerate() {
            summary.chunks += 1;

            let result = tokio::time::timeout(
                self.timeout,
                self.store.bulk_upsert(&self.index, chunk),
            )
            .await
            .unwrap_or_else(|_| {
                Err(StorageError::Unavailable(format!(
                    "bulk request timed out after {:?}",
                    self.timeout
                )))
            });

            match result {
                Ok(report) => {
                    for failure in &report.failures {
                        warn!(
                            index = %self.index,
                            id = %failure.id,
                            status = failure.status,
                            reason = %failure.reason,
                            "document rejected"
                        );
                    }
                    debug!(
                        index = %self.index,
                        chunk = n,
                        written = report.written,
                        "bulk chunk written"
                    );
                    summary.written += report.written;
                    summary.item_failures.extend(report.failures);
                }
                Err(e) => {
                    error!(
                        index = %self.index,
                        chunk = n,
                        size = chunk.len(),
                        error = %e,
                        "bulk chunk failed"
                    );
                    summary.failed_chunks += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            None => Ok(summary),
            Some(last) => Err(BulkError::ChunksFailed {
                failed: summary.failed_chunks,
                total: summary.chunks,
                summary,
                last,
            }),
        }
    }
}
