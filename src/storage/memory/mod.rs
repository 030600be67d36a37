//! In-memory waypoint store.
//!
//! Evaluates [`SearchQuery`] with the same clause semantics as the search
//! backend. Also carries failure injection hooks so pipeline tests can
//! simulate an unreachable backend or per-document rejections.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{
    BulkReport, CreateOutcome, IndexDefinition, ItemFailure, Result, SearchHit, StorageError,
    WaypointStore,
};
use crate::query::SearchQuery;
use crate::waypoint::IndexedWaypoint;

#[derive(Default)]
struct MemoryIndex {
    mapping: Map<String, Value>,
    documents: BTreeMap<String, Value>,
}

/// In-memory store keyed by index name, then document id.
#[derive(Default)]
pub struct MemoryStore {
    indices: RwLock<HashMap<String, MemoryIndex>>,
    /// Sizes of every bulk request received, in order.
    bulk_requests: RwLock<Vec<usize>>,
    /// 1-based bulk request numbers that fail as if the backend were down.
    failing_bulk_requests: RwLock<HashSet<usize>>,
    /// Document ids rejected individually inside bulk requests.
    rejected_ids: RwLock<HashSet<String>>,
    unavailable: RwLock<bool>,
    fail_on_delete: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StorageError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Fail the `n`th bulk request (1-based) at request level.
    pub async fn fail_bulk_request(&self, n: usize) {
        self.failing_bulk_requests.write().await.insert(n);
    }

    /// Reject this document id inside bulk requests.
    pub async fn reject_id(&self, id: impl Into<String>) {
        self.rejected_ids.write().await.insert(id.into());
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn bulk_request_sizes(&self) -> Vec<usize> {
        self.bulk_requests.read().await.clone()
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let indices = self.indices.read().await;
        indices.get(index)?.documents.get(id).cloned()
    }

    pub async fn document_count(&self, index: &str) -> usize {
        let indices = self.indices.read().await;
        indices.get(index).map(|i| i.documents.len()).unwrap_or(0)
    }

    pub async fn mapping(&self, index: &str) -> Option<Value> {
        let indices = self.indices.read().await;
        indices.get(index).map(|i| Value::Object(i.mapping.clone()))
    }

    async fn check_available(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(StorageError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Merge `incoming` into `existing`, recursing into nested `properties`.
///
/// New fields and parameters are added. A parameter already set to a
/// different value is a conflict, reported with its dotted path.
fn merge_mapping(
    existing: &mut Map<String, Value>,
    incoming: &Map<String, Value>,
    path: &str,
) -> std::result::Result<(), String> {
    for (key, value) in incoming {
        let key_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        match (existing.get_mut(key), value) {
            (Some(Value::Object(current)), Value::Object(next)) => {
                merge_mapping(current, next, &key_path)?
            }
            (Some(current), next) if &*current != next => return Err(key_path),
            (Some(_), _) => {}
            (None, _) => {
                existing.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

#[async_trait]
impl WaypointStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_available().await
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.check_available().await?;
        Ok(self.indices.read().await.contains_key(index))
    }

    async fn create_index(
        &self,
        index: &str,
        definition: &IndexDefinition,
    ) -> Result<CreateOutcome> {
        self.check_available().await?;
        let mut indices = self.indices.write().await;
        if indices.contains_key(index) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let mapping = definition
            .mappings
            .as_object()
            .cloned()
            .unwrap_or_default();
        indices.insert(
            index.to_string(),
            MemoryIndex {
                mapping,
                documents: BTreeMap::new(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.check_available().await?;
        self.indices.write().await.remove(index);
        Ok(())
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<()> {
        self.check_available().await?;
        let incoming = mapping.as_object().ok_or_else(|| StorageError::UnexpectedStatus {
            operation: "put_mapping",
            status: 400,
            body: "mapping must be an object".to_string(),
        })?;

        let mut indices = self.indices.write().await;
        let target = indices
            .get_mut(index)
            .ok_or_else(|| StorageError::UnexpectedStatus {
                operation: "put_mapping",
                status: 404,
                body: format!("no such index [{}]", index),
            })?;
        // Applied to a copy so a conflict leaves the stored mapping untouched
        let mut merged = target.mapping.clone();
        merge_mapping(&mut merged, incoming, "").map_err(|path| {
            StorageError::UnexpectedStatus {
                operation: "put_mapping",
                status: 400,
                body: format!(
                    "illegal_argument_exception: cannot change mapping parameter [{}]",
                    path
                ),
            }
        })?;
        target.mapping = merged;
        Ok(())
    }

    async fn put_document(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        self.check_available().await?;
        let mut indices = self.indices.write().await;
        indices
            .entry(index.to_string())
            .or_default()
            .documents
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn bulk_upsert(&self, index: &str, entries: &[IndexedWaypoint]) -> Result<BulkReport> {
        self.check_available().await?;

        let request_number = {
            let mut requests = self.bulk_requests.write().await;
            requests.push(entries.len());
            requests.len()
        };
        if self
            .failing_bulk_requests
            .read()
            .await
            .contains(&request_number)
        {
            return Err(StorageError::Unavailable(format!(
                "bulk request {} failed",
                request_number
            )));
        }

        let rejected = self.rejected_ids.read().await;
        let mut indices = self.indices.write().await;
        let target = indices.entry(index.to_string()).or_default();

        let mut report = BulkReport::default();
        for entry in entries {
            if rejected.contains(&entry.id) {
                report.failures.push(ItemFailure {
                    id: entry.id.clone(),
                    status: 400,
                    reason: "document rejected".to_string(),
                });
                continue;
            }
            target
                .documents
                .insert(entry.id.clone(), serde_json::to_value(&entry.waypoint)?);
            report.written += 1;
        }

        Ok(report)
    }

    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.check_available().await?;
        let indices = self.indices.read().await;
        let Some(target) = indices.get(index) else {
            return Ok(Vec::new());
        };

        Ok(target
            .documents
            .iter()
            .filter_map(|(id, doc)| doc.as_object().map(|source| (id, source)))
            .filter(|(_, source)| query.matches(source))
            .take(query.size)
            .map(|(id, source)| SearchHit {
                id: id.clone(),
                source: source.clone(),
            })
            .collect())
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<bool> {
        self.check_available().await?;
        if *self.fail_on_delete.read().await {
            return Err(StorageError::Unavailable("delete refused".to_string()));
        }
        let mut indices = self.indices.write().await;
        Ok(indices
            .get_mut(index)
            .is_some_and(|i| i.documents.remove(id).is_some()))
    }
}
