//! Canonical waypoint records.
//!
//! A waypoint is a single timestamped vessel position report. Inbound messages
//! are coerced into [`Waypoint`] by [`normalize`], and each record is keyed by a
//! content-derived identity from [`identity`] so re-delivery overwrites instead
//! of duplicating.

pub mod identity;
pub mod normalize;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use identity::{document_id, IndexedWaypoint};
pub use normalize::{normalize_bodies, NormalizeError, NormalizedBatch};

/// WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Origin of a position report.
///
/// `Ais` and `Radar` are the only values a query can filter on. Anything else is
/// kept verbatim in `Other` so it round-trips through storage untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WaypointSource {
    Ais,
    Radar,
    Other(String),
}

impl WaypointSource {
    /// Parse a filter value, returning `None` for anything outside the closed set.
    pub fn recognized(value: &str) -> Option<Self> {
        match Self::from(value.to_string()) {
            Self::Other(_) => None,
            known => Some(known),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Ais => "ais",
            Self::Radar => "radar",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for WaypointSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ais" => Self::Ais,
            "radar" => Self::Radar,
            _ => Self::Other(value),
        }
    }
}

impl From<WaypointSource> for String {
    fn from(source: WaypointSource) -> Self {
        match source {
            WaypointSource::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WaypointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized waypoint as persisted in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub ferry_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub location: Location,
    pub waypoint_source: WaypointSource,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Render a coordinate the way the index ids and CSV exports expect it.
///
/// Shortest round-trip digits, with a trailing `.0` on integral values, so
/// `63.0` stays `63.0` and `9.668` stays `9.668`.
pub fn format_coordinate(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}
