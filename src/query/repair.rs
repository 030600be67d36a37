//! Self-healing pass over search hits.
//!
//! Older producers wrote documents without a `location`. Those documents can
//! never be placed on a map, so the first query that sees one deletes it.

use tracing::{info, warn};

use crate::storage::{SearchHit, WaypointStore};

/// Remove hits lacking `location` from the result and from the store.
///
/// A failed delete is logged; the hit is excluded either way.
pub async fn repair_hits(
    store: &dyn WaypointStore,
    index: &str,
    hits: Vec<SearchHit>,
) -> Vec<SearchHit> {
    let mut kept = Vec::with_capacity(hits.len());

    for hit in hits {
        if hit.source.get("location").is_some_and(|loc| !loc.is_null()) {
            kept.push(hit);
            continue;
        }

        match store.delete_document(index, &hit.id).await {
            Ok(_) => info!(index = %index, id = %hit.id, "deleted waypoint without location"),
            Err(e) => warn!(
                index = %index,
                id = %hit.id,
                error = %e,
                "failed to delete waypoint without location"
            ),
        }
    }

    kept
}
