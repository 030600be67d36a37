//! Waypoint search: request validation, query construction and repair.
//!
//! A [`QueryRequest`] is built from the HTTP parameters, turned into a typed
//! [`SearchQuery`], and run against the store. [`SearchQuery::to_dsl`] renders
//! the OpenSearch body:
//!
//! ```json
//! {"size": 10000,
//!  "query": {"bool": {
//!    "must":   [{"range": {"timestamp": {"gte": 1614844800000, "lte": 1614845000000, "format": "epoch_millis"}}}],
//!    "filter": [{"term": {"waypointSource": "ais"}},
//!               {"bool": {"should": [
//!                  {"geo_bounding_box": {"location": {"top_left": {...}, "bottom_right": {...}}}},
//!                  {"bool": {"must_not": [{"exists": {"field": "location"}}]}}],
//!                "minimum_should_match": 1}}]}}}
//! ```
//!
//! The box clause also admits documents without `location`. Those are the
//! ones [`repair`] deletes, so they must reach it through a boxed query.

pub mod repair;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::storage::{SearchHit, StorageError, WaypointStore};
use crate::waypoint::{Location, WaypointSource};

/// Hard cap on returned hits. There is no pagination.
pub const MAX_RESULTS: usize = 10_000;

/// Errors from building or running a waypoint query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Query string parameters as received, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub min_lat: Option<String>,
    pub min_lon: Option<String>,
    pub max_lat: Option<String>,
    pub max_lon: Option<String>,
    pub source: Option<String>,
}

/// Rectangular geographic filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub top_left: Location,
    pub bottom_right: Location,
}

impl BoundingBox {
    /// Build from corner extremes. `min_lon > max_lon` describes a box crossing
    /// the antimeridian.
    pub fn from_extremes(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            top_left: Location {
                lat: max_lat,
                lon: min_lon,
            },
            bottom_right: Location {
                lat: min_lat,
                lon: max_lon,
            },
        }
    }

    pub fn contains(&self, location: &Location) -> bool {
        let lat_ok = location.lat <= self.top_left.lat && location.lat >= self.bottom_right.lat;
        let lon_ok = if self.top_left.lon <= self.bottom_right.lon {
            location.lon >= self.top_left.lon && location.lon <= self.bottom_right.lon
        } else {
            location.lon >= self.top_left.lon || location.lon <= self.bottom_right.lon
        };
        lat_ok && lon_ok
    }
}

/// A validated waypoint query. Times are epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub start: i64,
    pub end: i64,
    pub source: Option<String>,
    pub bounding_box: Option<BoundingBox>,
}

impl QueryRequest {
    /// Validate raw parameters. `start`, `end` and all four box corners are required.
    pub fn from_params(params: &QueryParams) -> Result<Self, QueryError> {
        let start = parse_required(&params.start, "start")?;
        let end = parse_required(&params.end, "end")?;

        let min_lat: f64 = parse_required(&params.min_lat, "min_lat")?;
        let min_lon: f64 = parse_required(&params.min_lon, "min_lon")?;
        let max_lat: f64 = parse_required(&params.max_lat, "max_lat")?;
        let max_lon: f64 = parse_required(&params.max_lon, "max_lon")?;

        check_range("min_lat", min_lat, 90.0)?;
        check_range("max_lat", max_lat, 90.0)?;
        check_range("min_lon", min_lon, 180.0)?;
        check_range("max_lon", max_lon, 180.0)?;
        if min_lat > max_lat {
            return Err(QueryError::InvalidParameter {
                name: "min_lat",
                reason: format!("{} is above max_lat {}", min_lat, max_lat),
            });
        }

        Ok(Self {
            start,
            end,
            source: params.source.clone(),
            bounding_box: Some(BoundingBox::from_extremes(min_lat, min_lon, max_lat, max_lon)),
        })
    }

    /// Translate into a backend query.
    ///
    /// Unrecognized `source` values are dropped rather than rejected, so the
    /// query falls back to all sources.
    pub fn to_search(&self) -> Result<SearchQuery, QueryError> {
        Ok(SearchQuery {
            gte_millis: seconds_to_millis(self.start, "start")?,
            lte_millis: seconds_to_millis(self.end, "end")?,
            source: self
                .source
                .as_deref()
                .and_then(WaypointSource::recognized),
            bounding_box: self.bounding_box,
            size: MAX_RESULTS,
        })
    }
}

/// Typed backend query: inclusive millisecond range, optional source term and
/// optional bounding box, ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub gte_millis: i64,
    pub lte_millis: i64,
    pub source: Option<WaypointSource>,
    pub bounding_box: Option<BoundingBox>,
    pub size: usize,
}

impl SearchQuery {
    /// Render the OpenSearch / Elasticsearch request body.
    pub fn to_dsl(&self) -> Value {
        let must = vec![json!({
            "range": {
                "timestamp": {
                    "gte": self.gte_millis,
                    "lte": self.lte_millis,
                    "format": "epoch_millis",
                }
            }
        })];

        let mut filter = Vec::new();
        if let Some(source) = &self.source {
            filter.push(json!({ "term": { "waypointSource": source.as_str() } }));
        }
        if let Some(bbox) = &self.bounding_box {
            filter.push(json!({
                "bool": {
                    "should": [
                        {
                            "geo_bounding_box": {
                                "location": {
                                    "top_left": { "lat": bbox.top_left.lat, "lon": bbox.top_left.lon },
                                    "bottom_right": { "lat": bbox.bottom_right.lat, "lon": bbox.bottom_right.lon },
                                }
                            }
                        },
                        { "bool": { "must_not": [{ "exists": { "field": "location" } }] } },
                    ],
                    "minimum_should_match": 1,
                }
            }));
        }

        json!({
            "size": self.size,
            "query": {
                "bool": {
                    "must": must,
                    "filter": filter,
                }
            }
        })
    }

    /// Evaluate the query against a stored document, with the backend's semantics:
    /// a document lacking a field never satisfies a range or term clause on it.
    /// The box clause passes documents whose `location` is missing or null.
    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        let in_range = document
            .get("timestamp")
            .and_then(Value::as_i64)
            .is_some_and(|ts| ts >= self.gte_millis && ts <= self.lte_millis);
        if !in_range {
            return false;
        }

        if let Some(source) = &self.source {
            let same = document
                .get("waypointSource")
                .and_then(Value::as_str)
                .is_some_and(|stored| stored == source.as_str());
            if !same {
                return false;
            }
        }

        if let Some(bbox) = &self.bounding_box {
            let admitted = match document.get("location") {
                None | Some(Value::Null) => true,
                Some(loc) => serde_json::from_value::<Location>(loc.clone())
                    .is_ok_and(|loc| bbox.contains(&loc)),
            };
            if !admitted {
                return false;
            }
        }

        true
    }
}

/// Runs waypoint queries against one index and repairs what it finds.
pub struct WaypointQuery {
    store: Arc<dyn WaypointStore>,
    index: String,
}

impl WaypointQuery {
    pub fn new(store: Arc<dyn WaypointStore>, index: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
        }
    }

    /// Search, then drop (and delete) any structurally broken hits.
    pub async fn run(&self, request: &QueryRequest) -> Result<Vec<SearchHit>, QueryError> {
        let search = request.to_search()?;
        let hits = self.store.search(&self.index, &search).await?;
        debug!(index = %self.index, hits = hits.len(), "waypoint search complete");

        Ok(repair::repair_hits(self.store.as_ref(), &self.index, hits).await)
    }
}

fn parse_required<T>(value: &Option<String>, name: &'static str) -> Result<T, QueryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(QueryError::MissingParameter(name))?;
    raw.parse().map_err(|e: T::Err| QueryError::InvalidParameter {
        name,
        reason: e.to_string(),
    })
}

fn check_range(name: &'static str, value: f64, limit: f64) -> Result<(), QueryError> {
    if value.is_finite() && value.abs() <= limit {
        Ok(())
    } else {
        Err(QueryError::InvalidParameter {
            name,
            reason: format!("{} is outside [-{}, {}]", value, limit, limit),
        })
    }
}

fn seconds_to_millis(seconds: i64, name: &'static str) -> Result<i64, QueryError> {
    seconds
        .checked_mul(1000)
        .ok_or_else(|| QueryError::InvalidParameter {
            name,
            reason: format!("{} overflows epoch milliseconds", seconds),
        })
}
