//! Pathtaker - ferry waypoint ingestion and query service
//!
//! Normalizes vessel position reports from a queue, bulk-writes them into an
//! OpenSearch index under content-derived ids, and serves time / bounding box
//! / source filtered exports as CSV.

pub mod config;
pub mod handlers;
pub mod ingest;
pub mod query;
pub mod response;
pub mod storage;
pub mod utils;
pub mod waypoint;
