//! pathtaker: ferry waypoint API
//!
//! Accepts queue batches on `POST /ingest`, writes them to the waypoint index,
//! and serves CSV exports on `GET /waypoints`.
//!
//! ## Architecture
//! ```text
//! [Queue] -> POST /ingest -> [IngestHandler] -> [BulkWriter] -> [OpenSearch]
//!                                                                   |
//! [Client] <- CSV <- GET /waypoints <- [WaypointQuery + repair] <---+
//! ```
//!
//! ## Configuration
//! - `--config <path>` or PATHTAKER_CONFIG: YAML config file
//! - PATHTAKER__SECTION__KEY: per-key overrides
//! - ELASTICSEARCH_HOSTNAME: storage endpoint override
//! - PATHTAKER_LOG: tracing filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use pathtaker::config::Config;
use pathtaker::handlers::{serve, AppState, BasicCredentials};
use pathtaker::ingest::{BulkWriter, IngestHandler};
use pathtaker::query::WaypointQuery;
use pathtaker::storage::{init_storage, IndexDefinition, SchemaManager};
use pathtaker::utils::bootstrap::{init_tracing, parse_config_path, wait_for_storage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path(std::env::args().skip(1));
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    info!(
        storage = ?config.storage.storage_type,
        index = %config.storage.index,
        port = config.server.port,
        "starting pathtaker"
    );

    let store = init_storage(&config.storage)?;
    wait_for_storage(store.as_ref()).await?;

    let storage = &config.storage;
    let schema = Arc::new(SchemaManager::new(
        store.clone(),
        storage.index.clone(),
        storage.legacy_index.clone(),
        IndexDefinition::waypoints(storage.shards, storage.replicas),
    ));

    let writer = BulkWriter::new(store.clone(), storage.index.clone())
        .with_chunk_size(config.ingest.chunk_size)?
        .with_timeout(Duration::from_secs(storage.request_timeout_secs));

    let state = AppState {
        ingest: Arc::new(IngestHandler::new(schema, writer)),
        query: Arc::new(WaypointQuery::new(store, storage.index.clone())),
        credentials: BasicCredentials::from(&config.auth),
    };

    serve(state, &config.server.host, config.server.port)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    Ok(())
}
