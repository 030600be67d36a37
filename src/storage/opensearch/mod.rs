//! OpenSearch / Elasticsearch waypoint store.
//!
//! Talks to the REST API directly over reqwest. Only the handful of endpoints
//! the pipeline uses are covered: index lifecycle, `_mapping`, `_doc`, `_bulk`
//! and `_search`.

mod bulk;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    BulkReport, CreateOutcome, IndexDefinition, Result, SearchHit, StorageError, WaypointStore,
};
use crate::config::{resolve_endpoint, StorageConfig};
use crate::query::SearchQuery;
use crate::waypoint::IndexedWaypoint;

/// Error bodies are cut to this many characters before logging or wrapping.
const ERROR_BODY_CHARS: usize = 200;

/// Error type the backend returns when a create races an existing index.
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// REST client for a single OpenSearch / Elasticsearch cluster.
pub struct OpenSearchStore {
    client: Client,
    base: Url,
    credentials: Option<(String, String)>,
    search_timeout: String,
    refresh_on_write: bool,
}

impl OpenSearchStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let endpoint = resolve_endpoint(&config.endpoint);
        let base = Url::parse(&endpoint)
            .map_err(|e| StorageError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        if base.cannot_be_a_base() {
            return Err(StorageError::InvalidEndpoint(endpoint));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            base,
            credentials,
            search_timeout: config.search_timeout.clone(),
            refresh_on_write: config.refresh_on_write,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.base.as_str()
    }

    /// Build `{base}/{segments...}`, percent-encoding each segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    fn with_refresh(&self, request: RequestBuilder) -> RequestBuilder {
        if self.refresh_on_write {
            request.query(&[("refresh", "wait_for")])
        } else {
            request
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                StorageError::Unavailable(e.to_string())
            } else {
                StorageError::Http(e)
            }
        })
    }

    /// Turn a non-success response into [`StorageError::UnexpectedStatus`].
    async fn check(operation: &'static str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(Self::status_error(operation, status, response).await)
    }

    async fn status_error(
        operation: &'static str,
        status: StatusCode,
        response: Response,
    ) -> StorageError {
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(ERROR_BODY_CHARS)
            .collect();
        warn!(operation, status = %status, body = %body, "backend request failed");
        StorageError::UnexpectedStatus {
            operation,
            status: status.as_u16(),
            body,
        }
    }
}

/// Extract `hits.hits[]` from a search response.
fn parse_hits(response: &Value) -> Vec<SearchHit> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let id = hit.get("_id")?.as_str()?.to_string();
                    let source = hit
                        .get("_source")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_else(Map::new);
                    Some(SearchHit { id, source })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl WaypointStore for OpenSearchStore {
    async fn ping(&self) -> Result<()> {
        let response = self.send(self.client.get(self.base.clone())).await?;
        Self::check("ping", response).await?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self.send(self.client.head(self.url(&[index])?)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                Self::check("index_exists", response).await?;
                Ok(true)
            }
        }
    }

    async fn create_index(
        &self,
        index: &str,
        definition: &IndexDefinition,
    ) -> Result<CreateOutcome> {
        let request = self
            .client
            .put(self.url(&[index])?)
            .json(&definition.to_body());
        let response = self.send(request).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(CreateOutcome::Created);
        }
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains(ALREADY_EXISTS) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            return Err(StorageError::UnexpectedStatus {
                operation: "create_index",
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_CHARS).collect(),
            });
        }
        Err(Self::status_error("create_index", status, response).await)
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let response = self.send(self.client.delete(self.url(&[index])?)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check("delete_index", response).await?;
        Ok(())
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<()> {
        let request = self
            .client
            .put(self.url(&[index, "_mapping"])?)
            .json(mapping);
        let response = self.send(request).await?;
        Self::check("put_mapping", response).await?;
        Ok(())
    }

    async fn put_document(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        let request = self
            .client
            .put(self.url(&[index, "_doc", id])?)
            .json(document);
        let response = self.send(self.with_refresh(request)).await?;
        Self::check("put_document", response).await?;
        Ok(())
    }

    async fn bulk_upsert(&self, index: &str, entries: &[IndexedWaypoint]) -> Result<BulkReport> {
        if entries.is_empty() {
            return Ok(BulkReport::default());
        }

        let request = self
            .client
            .post(self.url(&["_bulk"])?)
            .header("Content-Type", "application/x-ndjson")
            .body(bulk::encode(index, entries)?);
        let response = self.send(self.with_refresh(request)).await?;
        let response = Self::check("bulk", response).await?;

        let report = bulk::parse_response(&response.json::<Value>().await?);
        debug!(
            index = %index,
            written = report.written,
            failed = report.failures.len(),
            "bulk request complete"
        );
        Ok(report)
    }

    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let mut body = query.to_dsl();
        if let Some(object) = body.as_object_mut() {
            object.insert(
                "timeout".to_string(),
                Value::String(self.search_timeout.clone()),
            );
        }

        let request = self
            .client
            .post(self.url(&[index, "_search"])?)
            .json(&body);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(index = %index, "search on missing index");
            return Ok(Vec::new());
        }
        let response = Self::check("search", response).await?;

        Ok(parse_hits(&response.json::<Value>().await?))
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<bool> {
        let response = self
            .send(self.client.delete(self.url(&[index, "_doc", id])?))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check("delete_document", response).await?;
        Ok(true)
    }
}
