//! Content-derived document identity.

use serde::Serialize;

use super::{format_coordinate, Waypoint};

/// Delimiter between identity components.
const ID_DELIMITER: char = '-';

/// Storage key for a waypoint: `{timestamp}-{lat}-{lon}-{ferryId}`.
///
/// Two records with the same timestamp, position and vessel map to the same
/// document, so a redelivered message overwrites rather than duplicates.
pub fn document_id(waypoint: &Waypoint) -> String {
    format!(
        "{ts}{d}{lat}{d}{lon}{d}{ferry}",
        ts = waypoint.timestamp,
        lat = format_coordinate(waypoint.location.lat),
        lon = format_coordinate(waypoint.location.lon),
        ferry = waypoint.ferry_id,
        d = ID_DELIMITER,
    )
}

/// A waypoint paired with its storage key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedWaypoint {
    pub id: String,
    pub waypoint: Waypoint,
}

impl From<Waypoint> for IndexedWaypoint {
    fn from(waypoint: Waypoint) -> Self {
        Self {
            id: document_id(&waypoint),
            waypoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::waypoint::{Location, WaypointSource};

    fn waypoint(ts: i64, lat: f64, lon: f64, ferry: &str) -> Waypoint {
        Waypoint {
            ferry_id: ferry.to_string(),
            timestamp: ts,
            location: Location { lat, lon },
            waypoint_source: WaypointSource::Ais,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_document_id_format() {
        let id = document_id(&waypoint(1_614_843_750_000, 63.6853, 9.668, "ef35"));
        assert_eq!(id, "1614843750000-63.6853-9.668-ef35");
    }

    #[test]
    fn test_document_id_integral_coordinates() {
        let id = document_id(&waypoint(1000, 63.0, 9.0, "f1"));
        assert_eq!(id, "1000-63.0-9.0-f1");
    }

    #[test]
    fn test_document_id_is_deterministic() {
        let a = waypoint(1000, 63.1, 9.2, "f1");
        let mut b = a.clone();
        b.metadata.insert("heading".to_string(), 90.into());
        b.waypoint_source = WaypointSource::Radar;

        // Only the four identity fields participate
        assert_eq!(document_id(&a), document_id(&b));
    }

    #[test]
    fn test_document_id_changes_with_each_field() {
        let base = waypoint(1000, 63.1, 9.2, "f1");
        let base_id = document_id(&base);

        let variants = [
            waypoint(1001, 63.1, 9.2, "f1"),
            waypoint(1000, 63.2, 9.2, "f1"),
            waypoint(1000, 63.1, 9.3, "f1"),
            waypoint(1000, 63.1, 9.2, "f2"),
        ];

        for variant in &variants {
            assert_ne!(document_id(variant), base_id);
        }
    }

    #[test]
    fn test_indexed_waypoint_from() {
        let indexed = IndexedWaypoint::from(waypoint(5000, 1.5, 2.5, "x"));
        assert_eq!(indexed.id, "5000-1.5-2.5-x");
        assert_eq!(indexed.waypoint.ferry_id, "x");
    }
}
