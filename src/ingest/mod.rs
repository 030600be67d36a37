//! Waypoint ingestion.
//!
//! One invocation takes a batch of queue envelopes, makes sure the index is
//! migrated, normalizes every body and bulk-writes the resulting waypoints.
//! Malformed input is skipped; a backend failure fails the whole invocation so
//! the queue can redeliver.

pub mod bulk;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::{SchemaManager, StorageError};
use crate::waypoint::{normalize_bodies, IndexedWaypoint};

pub use bulk::{BulkError, BulkSummary, BulkWriter};

/// One queue message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub message_id: Option<String>,
    /// JSON text holding one raw message or an array of them.
    pub body: String,
}

/// Batch shape delivered by the queue trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<Envelope>,
}

/// Errors that fail an ingestion invocation.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("index migration failed: {0}")]
    Schema(#[source] StorageError),

    #[error(transparent)]
    Write(#[from] BulkError),
}

impl IngestError {
    /// Whether the failure came from an unreachable or failing backend.
    pub fn is_unavailable(&self) -> bool {
        match self {
            IngestError::Schema(e) => e.is_unavailable(),
            IngestError::Write(e) => e.is_unavailable(),
        }
    }
}

/// Counts for a completed invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Envelopes received.
    pub received: usize,
    /// Envelopes whose body could not be decoded.
    pub undecodable: usize,
    /// Raw messages decoded from the bodies.
    pub decoded: usize,
    /// Raw messages rejected by validation.
    pub invalid: usize,
    pub chunks: usize,
    pub written: usize,
    /// Documents the backend refused individually.
    pub rejected: usize,
}

/// Entry point for a batch of queue messages.
pub struct IngestHandler {
    schema: Arc<SchemaManager>,
    writer: BulkWriter,
}

impl IngestHandler {
    pub fn new(schema: Arc<SchemaManager>, writer: BulkWriter) -> Self {
        Self { schema, writer }
    }

    pub async fn handle(&self, envelopes: &[Envelope]) -> Result<IngestReport, IngestError> {
        self.schema.ensure().await.map_err(IngestError::Schema)?;

        let batch = normalize_bodies(envelopes.iter().map(|e| e.body.as_str()));
        let entries: Vec<IndexedWaypoint> = batch
            .waypoints
            .into_iter()
            .map(IndexedWaypoint::from)
            .collect();

        let summary = self.writer.write(&entries).await?;

        let report = IngestReport {
            received: envelopes.len(),
            undecodable: batch.undecodable,
            decoded: batch.decoded,
            invalid: batch.invalid,
            chunks: summary.chunks,
            written: summary.written,
            rejected: summary.item_failures.len(),
        };
        info!(
            index = %self.writer.index(),
            received = report.received,
            written = report.written,
            skipped = report.undecodable + report.invalid,
            rejected = report.rejected,
            "ingested waypoint batch"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::{IndexDefinition, MemoryStore, WaypointStore};

    const INDEX: &str = "ferry_waypoints";

    fn handler(store: Arc<MemoryStore>, chunk_size: usize) -> IngestHandler {
        let schema = Arc::new(SchemaManager::new(
            store.clone(),
            INDEX,
            Some("waypoints".to_string()),
            IndexDefinition::waypoints(1, 1),
        ));
        let writer = BulkWriter::new(store, INDEX)
            .with_chunk_size(chunk_size)
            .unwrap();
        IngestHandler::new(schema, writer)
    }

    fn envelope(body: serde_json::Value) -> Envelope {
        Envelope {
            message_id: None,
            body: body.to_string(),
        }
    }

    fn raw(ferry: &str, ts: i64) -> serde_json::Value {
        json!({
            "ferryId": ferry,
            "lat": 63.0,
            "lon": 9.0,
            "timestamp": ts,
            "source": "ais",
            "metadata": {"length": 10}
        })
    }

    #[test]
    fn test_envelope_batch_shape() {
        let batch: EnvelopeBatch = serde_json::from_value(json!({
            "Records": [
                {"messageId": "m-1", "body": "[]"},
                {"body": "{}"}
            ]
        }))
        .unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].message_id.as_deref(), Some("m-1"));
        assert_eq!(batch.records[1].body, "{}");
    }

    #[tokio::test]
    async fn test_handle_writes_and_counts() {
        let store = Arc::new(MemoryStore::new());
        let envelopes = vec![
            envelope(json!([raw("f1", 1_614_852_000), raw("f2", 1_614_852_000)])),
            Envelope {
                message_id: Some("bad".to_string()),
                body: "not json".to_string(),
            },
            envelope(json!({"ferryId": "f3", "lat": 1.0})),
        ];

        let report = handler(store.clone(), 100).handle(&envelopes).await.unwrap();

        assert_eq!(
            report,
            IngestReport {
                received: 3,
                undecodable: 1,
                decoded: 3,
                invalid: 1,
                chunks: 1,
                written: 2,
                rejected: 0,
            }
        );
        assert_eq!(store.document_count(INDEX).await, 2);
        assert!(store
            .document(INDEX, "1614852000000-63.0-9.0-f1")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_handle_migrates_first() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_document("waypoints", "old", &json!({"ferryId": "x"}))
            .await
            .unwrap();

        handler(store.clone(), 100).handle(&[]).await.unwrap();

        assert!(!store.index_exists("waypoints").await.unwrap());
        assert!(store.mapping(INDEX).await.is_some());
    }

    #[tokio::test]
    async fn test_handle_redelivery_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let ingest = handler(store.clone(), 100);
        let envelopes = vec![envelope(json!([raw("f1", 1_000), raw("f1", 2_000)]))];

        ingest.handle(&envelopes).await.unwrap();
        ingest.handle(&envelopes).await.unwrap();

        assert_eq!(store.document_count(INDEX).await, 2);
    }

    #[tokio::test]
    async fn test_handle_backend_unavailable() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true).await;

        let err = handler(store, 100)
            .handle(&[envelope(raw("f1", 1_000))])
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Schema(_)));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_handle_failed_chunk_fails_invocation() {
        let store = Arc::new(MemoryStore::new());
        store.fail_bulk_request(1).await;
        let bodies: Vec<_> = (0..3).map(|i| raw("f1", 1_000 + i)).collect();

        let err = handler(store.clone(), 2)
            .handle(&[envelope(json!(bodies))])
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Write(_)));
        assert!(err.is_unavailable());
        // Second chunk still landed
        assert_eq!(store.document_count(INDEX).await, 1);
    }
}
