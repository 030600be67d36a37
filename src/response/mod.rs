//! CSV rendering of query results.

use serde_json::{Map, Value};
use tracing::warn;

use crate::storage::SearchHit;
use crate::waypoint::{format_coordinate, Location};

/// Column order of the export.
pub const CSV_HEADER: [&str; 8] = [
    "ferryId",
    "timestamp",
    "lat",
    "lon",
    "heading",
    "length",
    "width",
    "source",
];

/// Placeholder for absent optional columns.
const NULL: &str = "null";

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV buffer flush failed: {0}")]
    Flush(String),

    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// One exported waypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct WaypointRow {
    pub ferry_id: String,
    pub timestamp: i64,
    pub location: Location,
    pub heading: Option<String>,
    pub length: Option<String>,
    pub width: Option<String>,
    pub source: String,
}

impl WaypointRow {
    /// Map a stored document. Returns `None` if a required field is unusable.
    pub fn from_hit(hit: &SearchHit) -> Option<Self> {
        let source = &hit.source;
        let location = serde_json::from_value::<Location>(source.get("location")?.clone()).ok()?;
        let empty = Map::new();
        let metadata = source
            .get("metadata")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        Some(Self {
            ferry_id: scalar(source.get("ferryId")?)?,
            timestamp: source.get("timestamp")?.as_i64()?,
            location,
            heading: metadata.get("heading").and_then(scalar),
            length: metadata.get("length").and_then(scalar),
            width: metadata.get("width").and_then(scalar),
            source: source
                .get("waypointSource")
                .and_then(scalar)
                .unwrap_or_else(|| NULL.to_string()),
        })
    }

    fn record(&self) -> [String; 8] {
        let optional = |v: &Option<String>| v.clone().unwrap_or_else(|| NULL.to_string());
        [
            self.ferry_id.clone(),
            self.timestamp.to_string(),
            format_coordinate(self.location.lat),
            format_coordinate(self.location.lon),
            optional(&self.heading),
            optional(&self.length),
            optional(&self.width),
            self.source.clone(),
        ]
    }
}

/// Natural string form of a JSON value. Null maps to `None`.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Render hits as CSV with a header row. Unmappable hits are skipped.
pub fn render_csv(hits: &[SearchHit]) -> Result<String, ResponseError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for hit in hits {
        match WaypointRow::from_hit(hit) {
            Some(row) => writer.write_record(row.record())?,
            None => warn!(id = %hit.id, "skipping unmappable waypoint"),
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ResponseError::Flush(e.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}
