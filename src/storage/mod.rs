//! Storage implementations.
//!
//! Waypoints live in a single search index. [`WaypointStore`] is the narrow
//! slice of a document store the pipeline needs: index lifecycle, upsert by id,
//! bulk upsert, filtered search and delete by id.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::query::SearchQuery;
use crate::waypoint::IndexedWaypoint;

pub mod memory;
pub mod opensearch;
pub mod schema;

pub use memory::MemoryStore;
pub use opensearch::OpenSearchStore;
pub use schema::{IndexDefinition, SchemaManager};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} returned HTTP {status}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl StorageError {
    /// Whether the backend could not be reached or answered with a server fault.
    ///
    /// These are the errors an upstream queue should redeliver on.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::Http(e) => e.is_timeout() || e.is_connect(),
            StorageError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// A raw search hit.
///
/// The source is left untyped: stored documents may predate the current
/// schema, and the repair pass needs to see exactly what is there.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Map<String, Value>,
}

/// Answer to a conditional index create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// A single document the backend refused inside an otherwise accepted bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Per-request result of a bulk upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    pub written: usize,
    pub failures: Vec<ItemFailure>,
}

/// Pluggable backing store for waypoint documents.
///
/// Implementations:
/// - `OpenSearchStore`: OpenSearch / Elasticsearch over REST
/// - `MemoryStore`: in-memory store for tests and local runs
#[async_trait]
pub trait WaypointStore: Send + Sync + 'static {
    /// Check that the backend answers at all.
    async fn ping(&self) -> Result<()>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create an index unless it already exists.
    ///
    /// An existing index is reported as [`CreateOutcome::AlreadyExists`], not an error.
    async fn create_index(&self, index: &str, definition: &IndexDefinition)
        -> Result<CreateOutcome>;

    /// Delete an index. Deleting a missing index succeeds.
    async fn delete_index(&self, index: &str) -> Result<()>;

    /// Apply a field mapping, merging with whatever the index already has.
    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<()>;

    /// Upsert one document by id.
    async fn put_document(&self, index: &str, id: &str, document: &Value) -> Result<()>;

    /// Upsert many waypoints in one round trip.
    ///
    /// Documents the backend rejects individually come back in
    /// [`BulkReport::failures`]; only request-level faults are errors.
    async fn bulk_upsert(&self, index: &str, entries: &[IndexedWaypoint]) -> Result<BulkReport>;

    /// Run a filtered search. A missing index yields no hits.
    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Delete one document. Returns whether it existed.
    async fn delete_document(&self, index: &str, id: &str) -> Result<bool>;
}

/// Initialize storage based on configuration.
pub fn init_storage(config: &StorageConfig) -> Result<Arc<dyn WaypointStore>> {
    match config.storage_type {
        StorageType::Opensearch => {
            let store = OpenSearchStore::new(config)?;
            info!(endpoint = %store.endpoint(), index = %config.index, "storage: opensearch");
            Ok(Arc::new(store))
        }
        StorageType::Memory => {
            info!(index = %config.index, "storage: in-memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
