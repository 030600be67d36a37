//! `_bulk` request encoding and response parsing.

use serde_json::{json, Value};

use crate::storage::{BulkReport, ItemFailure, Result};
use crate::waypoint::IndexedWaypoint;

/// Encode an NDJSON bulk body: an `index` action line followed by the
/// document line for each entry, newline terminated.
pub fn encode(index: &str, entries: &[IndexedWaypoint]) -> Result<String> {
    let mut body = String::new();
    for entry in entries {
        let action = json!({ "index": { "_index": index, "_id": entry.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&entry.waypoint)?);
        body.push('\n');
    }
    Ok(body)
}

/// Read per-item outcomes from a bulk response.
pub fn parse_response(response: &Value) -> BulkReport {
    let mut report = BulkReport::default();
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for item in items {
        let Some(result) = item.get("index") else {
            continue;
        };
        let status = result
            .get("status")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u16;

        match result.get("error") {
            Some(error) if !error.is_null() => {
                let reason = error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                report.failures.push(ItemFailure {
                    id: result
                        .get("_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    status,
                    reason,
                });
            }
            _ => report.written += 1,
        }
    }

    report
}
