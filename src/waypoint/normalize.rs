//! Raw message decoding and normalization.
//!
//! Producers send each queue message body as JSON text holding one raw message
//! or an array of them:
//!
//! ```json
//! [{"ferryId": "ef35...", "lat": 63.6853, "lon": 9.668,
//!   "timestamp": "2021-03-04T10:00:00", "source": "ais",
//!   "metadata": {"length": 10}}]
//! ```
//!
//! Bad bodies and bad records are skipped with a warning; they never abort the
//! rest of the batch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{Location, Waypoint, WaypointSource};

/// Numeric timestamps at or above this magnitude are already epoch millis.
///
/// 10^11 seconds is roughly the year 5138, so no real epoch-seconds value
/// reaches it, while every millisecond value after March 1973 does.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Naive ISO-8601 layouts accepted when no UTC offset is present.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Maximum number of body characters echoed into skip warnings.
const LOG_BODY_CHARS: usize = 200;

/// Errors raised while turning raw input into waypoints.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("undecodable message body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("expected {expected}, found {found}")]
    Shape {
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Outcome of normalizing a batch of message bodies.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub waypoints: Vec<Waypoint>,
    /// Raw messages decoded from all bodies.
    pub decoded: usize,
    /// Bodies skipped because they were not valid JSON of the expected shape.
    pub undecodable: usize,
    /// Raw messages skipped because a field was missing or malformed.
    pub invalid: usize,
}

/// Decode one message body into its raw messages.
pub fn decode_body(body: &str) -> Result<Vec<Value>, NormalizeError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Array(messages) => Ok(messages),
        message @ Value::Object(_) => Ok(vec![message]),
        other => Err(NormalizeError::Shape {
            expected: "object or array",
            found: kind(&other),
        }),
    }
}

/// Coerce one raw message into a canonical waypoint.
pub fn normalize_message(raw: &Value) -> Result<Waypoint, NormalizeError> {
    let fields = raw.as_object().ok_or(NormalizeError::Shape {
        expected: "object",
        found: kind(raw),
    })?;

    let ferry_id = match required(fields, "ferryId")? {
        Value::String(id) => id.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(invalid("ferryId", format!("unexpected {}", kind(other)))),
    };

    let location = Location {
        lat: coordinate(fields, "lat")?,
        lon: coordinate(fields, "lon")?,
    };

    let timestamp = timestamp_millis(required(fields, "timestamp")?)?;

    let waypoint_source = match required(fields, "source")? {
        Value::String(source) => WaypointSource::from(source.clone()),
        other => return Err(invalid("source", format!("unexpected {}", kind(other)))),
    };

    let metadata = match fields.get("metadata") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(metadata)) => metadata.clone(),
        Some(other) => return Err(invalid("metadata", format!("unexpected {}", kind(other)))),
    };

    Ok(Waypoint {
        ferry_id,
        timestamp,
        location,
        waypoint_source,
        metadata,
    })
}

/// Decode and normalize every body, flattening the results into one batch.
pub fn normalize_bodies<'a, I>(bodies: I) -> NormalizedBatch
where
    I: IntoIterator<Item = &'a str>,
{
    let mut batch = NormalizedBatch::default();

    for body in bodies {
        let messages = match decode_body(body) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(
                    error = %e,
                    body = %body.chars().take(LOG_BODY_CHARS).collect::<String>(),
                    "skipping undecodable message"
                );
                batch.undecodable += 1;
                continue;
            }
        };

        batch.decoded += messages.len();

        for raw in &messages {
            match normalize_message(raw) {
                Ok(waypoint) => batch.waypoints.push(waypoint),
                Err(e) => {
                    warn!(error = %e, "skipping invalid waypoint");
                    batch.invalid += 1;
                }
            }
        }
    }

    debug!(
        decoded = batch.decoded,
        normalized = batch.waypoints.len(),
        undecodable = batch.undecodable,
        invalid = batch.invalid,
        "normalized batch"
    );

    batch
}

/// Convert an inbound timestamp into epoch milliseconds.
///
/// ISO-8601 text is truncated to whole seconds first. Offset-less text is
/// read as UTC. Values outside the representable date range are invalid.
pub fn timestamp_millis(value: &Value) -> Result<i64, NormalizeError> {
    let millis = match value {
        Value::Number(n) => {
            let raw = match n.as_i64() {
                Some(whole) => whole,
                None => n
                    .as_f64()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| f.trunc() as i64)
                    .ok_or_else(|| invalid("timestamp", format!("out of range: {}", n)))?,
            };
            if raw.unsigned_abs() >= MILLIS_THRESHOLD as u64 {
                raw
            } else {
                seconds_to_millis(raw)?
            }
        }
        Value::String(text) => seconds_to_millis(parse_iso_seconds(text.trim())?)?,
        other => return Err(invalid("timestamp", format!("unexpected {}", kind(other)))),
    };

    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(_) => Ok(millis),
        None => Err(invalid("timestamp", format!("out of range: {}", millis))),
    }
}

fn parse_iso_seconds(text: &str) -> Result<i64, NormalizeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp());
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc().timestamp());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp())
        .ok_or_else(|| invalid("timestamp", format!("not ISO-8601: {:?}", text)))
}

fn seconds_to_millis(seconds: i64) -> Result<i64, NormalizeError> {
    seconds
        .checked_mul(1000)
        .ok_or_else(|| invalid("timestamp", format!("out of range: {}", seconds)))
}

fn required<'a>(
    fields: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a Value, NormalizeError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(NormalizeError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

fn coordinate(fields: &Map<String, Value>, name: &'static str) -> Result<f64, NormalizeError> {
    let value = required(fields, name)?;
    value
        .as_f64()
        .ok_or_else(|| invalid(name, format!("expected number, found {}", kind(value))))
}

fn invalid(field: &'static str, reason: String) -> NormalizeError {
    NormalizeError::InvalidField { field, reason }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw_message() -> Value {
        json!({
            "ferryId": "f1",
            "lat": 63.0,
            "lon": 9.0,
            "timestamp": "2021-03-04T10:00:00",
            "source": "ais",
            "metadata": {"length": 10},
        })
    }

    #[test]
    fn test_normalize_iso_timestamp_to_millis() {
        let waypoint = normalize_message(&raw_message()).unwrap();
        assert_eq!(waypoint.timestamp, 1_614_852_000_000);
        assert_eq!(waypoint.ferry_id, "f1");
        assert_eq!(waypoint.location, Location { lat: 63.0, lon: 9.0 });
        assert_eq!(waypoint.waypoint_source, WaypointSource::Ais);
        assert_eq!(waypoint.metadata["length"], 10);
    }

    #[test]
    fn test_epoch_seconds_and_iso_agree() {
        let mut raw = raw_message();
        raw["timestamp"] = json!(1_614_852_000);
        let from_seconds = normalize_message(&raw).unwrap();
        let from_iso = normalize_message(&raw_message()).unwrap();
        assert_eq!(from_seconds.timestamp, from_iso.timestamp);
    }

    #[test]
    fn test_timestamp_forms() {
        assert_eq!(timestamp_millis(&json!(1_614_843_750)).unwrap(), 1_614_843_750_000);
        assert_eq!(timestamp_millis(&json!(1_614_843_750.9)).unwrap(), 1_614_843_750_000);
        // Already millis
        assert_eq!(
            timestamp_millis(&json!(1_614_843_750_000_i64)).unwrap(),
            1_614_843_750_000
        );
        // Offsets are honoured, fractional seconds truncated
        assert_eq!(
            timestamp_millis(&json!("2021-03-04T11:00:00.750+01:00")).unwrap(),
            1_614_852_000_000
        );
        assert_eq!(
            timestamp_millis(&json!("2021-03-04T10:00:00Z")).unwrap(),
            1_614_852_000_000
        );
        assert_eq!(
            timestamp_millis(&json!("2021-03-04 10:00:00")).unwrap(),
            1_614_852_000_000
        );
        assert_eq!(
            timestamp_millis(&json!("2021-03-04")).unwrap(),
            1_614_816_000_000
        );
    }

    #[test]
    fn test_minute_precision_timestamps() {
        assert_eq!(
            timestamp_millis(&json!("2021-03-04T10:00")).unwrap(),
            1_614_852_000_000
        );
        assert_eq!(
            timestamp_millis(&json!("2021-03-04 10:00")).unwrap(),
            1_614_852_000_000
        );
    }

    #[test]
    fn test_extreme_numeric_timestamps_are_invalid() {
        for extreme in [json!(i64::MIN), json!(i64::MAX), json!(-1e300)] {
            assert!(matches!(
                timestamp_millis(&extreme),
                Err(NormalizeError::InvalidField { field: "timestamp", .. })
            ));
        }
        // Negative millis inside the calendar range are still accepted
        assert_eq!(
            timestamp_millis(&json!(-1_614_843_750_000_i64)).unwrap(),
            -1_614_843_750_000
        );
    }

    #[test]
    fn test_minimum_i64_timestamp_is_skipped() {
        let batch = normalize_bodies([
            r#"[{"ferryId":"f1","lat":63.0,"lon":9.0,"timestamp":-9223372036854775808,"source":"ais"}]"#,
        ]);
        assert!(batch.waypoints.is_empty());
        assert_eq!(batch.decoded, 1);
        assert_eq!(batch.invalid, 1);
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert!(matches!(
            timestamp_millis(&json!("yesterday")),
            Err(NormalizeError::InvalidField { field: "timestamp", .. })
        ));
        assert!(timestamp_millis(&json!(true)).is_err());
    }

    #[test]
    fn test_missing_required_fields() {
        for field in ["ferryId", "lat", "lon", "timestamp", "source"] {
            let mut raw = raw_message();
            raw.as_object_mut().unwrap().remove(field);
            match normalize_message(&raw) {
                Err(NormalizeError::MissingField(name)) => assert_eq!(name, field),
                other => panic!("expected missing {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_null_counts_as_missing() {
        let mut raw = raw_message();
        raw["lat"] = Value::Null;
        assert!(matches!(
            normalize_message(&raw),
            Err(NormalizeError::MissingField("lat"))
        ));
    }

    #[test]
    fn test_metadata_optional() {
        let mut raw = raw_message();
        raw.as_object_mut().unwrap().remove("metadata");
        let waypoint = normalize_message(&raw).unwrap();
        assert!(waypoint.metadata.is_empty());
    }

    #[test]
    fn test_numeric_ferry_id_is_stringified() {
        let mut raw = raw_message();
        raw["ferryId"] = json!(42);
        assert_eq!(normalize_message(&raw).unwrap().ferry_id, "42");
    }

    #[test]
    fn test_unknown_source_passes_through() {
        let mut raw = raw_message();
        raw["source"] = json!("sonar");
        assert_eq!(
            normalize_message(&raw).unwrap().waypoint_source,
            WaypointSource::Other("sonar".to_string())
        );
    }

    #[test]
    fn test_decode_body_shapes() {
        assert_eq!(decode_body(r#"[{"a":1},{"b":2}]"#).unwrap().len(), 2);
        assert_eq!(decode_body(r#"{"a":1}"#).unwrap().len(), 1);
        assert!(matches!(
            decode_body("42"),
            Err(NormalizeError::Shape { .. })
        ));
        assert!(matches!(
            decode_body("not json"),
            Err(NormalizeError::Decode(_))
        ));
    }

    #[test]
    fn test_normalize_bodies_skips_bad_input() {
        let good = serde_json::to_string(&json!([raw_message(), raw_message()])).unwrap();
        let mut missing = raw_message();
        missing.as_object_mut().unwrap().remove("source");
        let partly_bad = serde_json::to_string(&json!([missing, raw_message()])).unwrap();

        let batch = normalize_bodies([good.as_str(), "{broken", partly_bad.as_str()]);

        assert_eq!(batch.waypoints.len(), 3);
        assert_eq!(batch.decoded, 4);
        assert_eq!(batch.undecodable, 1);
        assert_eq!(batch.invalid, 1);
    }
}
