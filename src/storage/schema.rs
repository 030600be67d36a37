//! Waypoint index definition and one-shot migration.
//!
//! The target index is created with conditional-create semantics and then has
//! its mapping merged, so the sequence is safe to run from any number of
//! processes at once. A configured legacy index is dropped first.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{CreateOutcome, Result, WaypointStore};

/// Field mapping for waypoint documents.
///
/// `timestamp` keeps the default date format, which reads epoch millis. The
/// format of an existing field cannot change, so none is set here.
pub fn waypoint_mapping() -> Value {
    json!({
        "properties": {
            "timestamp": { "type": "date", "index": true },
            "location": { "type": "geo_point" },
            "ferryId": { "type": "keyword" },
            "waypointSource": { "type": "keyword" },
            "metadata": { "type": "object", "enabled": false }
        }
    })
}

/// Settings and mappings sent on index creation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub settings: Value,
    pub mappings: Value,
}

impl IndexDefinition {
    pub fn waypoints(shards: u32, replicas: u32) -> Self {
        Self {
            settings: json!({
                "number_of_shards": shards,
                "number_of_replicas": replicas,
            }),
            mappings: waypoint_mapping(),
        }
    }

    /// Request body for index creation.
    pub fn to_body(&self) -> Value {
        json!({
            "settings": self.settings,
            "mappings": self.mappings,
        })
    }
}

/// Guarantees the waypoint index exists with the current mapping.
///
/// [`ensure`](Self::ensure) runs the migration the first time it succeeds and is
/// a no-op afterwards. Concurrent callers wait on the same attempt.
pub struct SchemaManager {
    store: Arc<dyn WaypointStore>,
    index: String,
    legacy_index: Option<String>,
    definition: IndexDefinition,
    migrated: OnceCell<()>,
}

impl SchemaManager {
    pub fn new(
        store: Arc<dyn WaypointStore>,
        index: impl Into<String>,
        legacy_index: Option<String>,
        definition: IndexDefinition,
    ) -> Self {
        Self {
            store,
            index: index.into(),
            legacy_index,
            definition,
            migrated: OnceCell::new(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Run the migration unless it already succeeded in this process.
    pub async fn ensure(&self) -> Result<()> {
        self.migrated.get_or_try_init(|| self.migrate()).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        if let Some(legacy) = self.legacy_index.as_deref() {
            if legacy != self.index && self.store.index_exists(legacy).await? {
                self.store.delete_index(legacy).await?;
                info!(index = %legacy, "deleted legacy waypoint index");
            }
        }

        match self.store.create_index(&self.index, &self.definition).await? {
            CreateOutcome::Created => info!(index = %self.index, "created waypoint index"),
            CreateOutcome::AlreadyExists => {
                debug!(index = %self.index, "waypoint index already exists")
            }
        }

        self.store
            .put_mapping(&self.index, &self.definition.mappings)
            .await?;
        info!(index = %self.index, "waypoint index mapping applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::waypoint::{IndexedWaypoint, Location, Waypoint, WaypointSource};

    const INDEX: &str = "ferry_waypoints";
    const LEGACY: &str = "waypoints";

    fn manager(store: Arc<MemoryStore>, legacy: Option<&str>) -> SchemaManager {
        SchemaManager::new(
            store,
            INDEX,
            legacy.map(str::to_string),
            IndexDefinition::waypoints(1, 1),
        )
    }

    fn sample() -> IndexedWaypoint {
        IndexedWaypoint::from(Waypoint {
            ferry_id: "f1".to_string(),
            timestamp: 1_000,
            location: Location { lat: 63.0, lon: 9.0 },
            waypoint_source: WaypointSource::Ais,
            metadata: serde_json::Map::new(),
        })
    }

    #[test]
    fn test_mapping_fields() {
        let mapping = waypoint_mapping();
        let props = &mapping["properties"];
        assert_eq!(props["timestamp"]["type"], "date");
        assert!(props["timestamp"].get("format").is_none());
        assert_eq!(props["timestamp"]["index"], true);
        assert_eq!(props["location"]["type"], "geo_point");
        assert_eq!(props["ferryId"]["type"], "keyword");
        assert_eq!(props["waypointSource"]["type"], "keyword");
        assert_eq!(props["metadata"]["enabled"], false);
    }

    #[test]
    fn test_definition_body() {
        let body = IndexDefinition::waypoints(3, 2).to_body();
        assert_eq!(body["settings"]["number_of_shards"], 3);
        assert_eq!(body["settings"]["number_of_replicas"], 2);
        assert_eq!(body["mappings"], waypoint_mapping());
    }

    #[tokio::test]
    async fn test_ensure_creates_index() {
        let store = Arc::new(MemoryStore::new());
        manager(store.clone(), None).ensure().await.unwrap();

        assert!(store.index_exists(INDEX).await.unwrap());
        let mapping = store.mapping(INDEX).await.unwrap();
        assert_eq!(mapping["properties"]["location"]["type"], "geo_point");
    }

    #[tokio::test]
    async fn test_ensure_deletes_legacy_index() {
        let store = Arc::new(MemoryStore::new());
        store.bulk_upsert(LEGACY, &[sample()]).await.unwrap();

        manager(store.clone(), Some(LEGACY)).ensure().await.unwrap();

        assert!(!store.index_exists(LEGACY).await.unwrap());
        assert!(store.index_exists(INDEX).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_never_deletes_target() {
        let store = Arc::new(MemoryStore::new());
        store.bulk_upsert(INDEX, &[sample()]).await.unwrap();

        // Legacy name equal to the target is ignored
        manager(store.clone(), Some(INDEX)).ensure().await.unwrap();

        assert_eq!(store.document_count(INDEX).await, 1);
    }

    #[tokio::test]
    async fn test_ensure_existing_index_is_success() {
        let store = Arc::new(MemoryStore::new());
        let first = manager(store.clone(), None);
        let second = manager(store.clone(), None);

        first.ensure().await.unwrap();
        store.bulk_upsert(INDEX, &[sample()]).await.unwrap();
        second.ensure().await.unwrap();

        assert_eq!(store.document_count(INDEX).await, 1);
    }

    #[tokio::test]
    async fn test_ensure_accepts_index_with_plain_date_mapping() {
        let store = Arc::new(MemoryStore::new());
        let existing = IndexDefinition {
            settings: json!({}),
            mappings: json!({"properties": {"timestamp": {"type": "date"}}}),
        };
        store.create_index(INDEX, &existing).await.unwrap();

        manager(store.clone(), None).ensure().await.unwrap();

        let mapping = store.mapping(INDEX).await.unwrap();
        assert_eq!(mapping["properties"]["timestamp"]["type"], "date");
        assert_eq!(mapping["properties"]["location"]["type"], "geo_point");
    }

    #[tokio::test]
    async fn test_ensure_surfaces_mapping_conflict() {
        let store = Arc::new(MemoryStore::new());
        let existing = IndexDefinition {
            settings: json!({}),
            mappings: json!({"properties": {"location": {"type": "keyword"}}}),
        };
        store.create_index(INDEX, &existing).await.unwrap();

        let err = manager(store.clone(), None).ensure().await.unwrap_err();
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_ensure_runs_once() {
        let store = Arc::new(MemoryStore::new());
        let schema = manager(store.clone(), Some(LEGACY));
        schema.ensure().await.unwrap();

        // A legacy index appearing later is left alone by this instance
        store.bulk_upsert(LEGACY, &[sample()]).await.unwrap();
        schema.ensure().await.unwrap();

        assert!(store.index_exists(LEGACY).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_migration_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let schema = manager(store.clone(), None);

        store.set_unavailable(true).await;
        assert!(schema.ensure().await.is_err());

        store.set_unavailable(false).await;
        schema.ensure().await.unwrap();
        assert!(store.index_exists(INDEX).await.unwrap());
    }
}
