//! Bootstrap utilities for the pathtaker binary.

use backon::Retryable;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::{connection_backoff, is_retryable};
use crate::config::LOG_ENV_VAR;
use crate::storage::{StorageError, WaypointStore};

/// Initialize tracing with the PATHTAKER_LOG environment variable.
///
/// Defaults to "info" level if PATHTAKER_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Extract the value of `--config <path>` or `--config=<path>`.
pub fn parse_config_path<I>(args: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Block until the backend answers a ping, with exponential backoff.
///
/// Gives up immediately on errors that retrying cannot fix.
pub async fn wait_for_storage(store: &dyn WaypointStore) -> Result<(), StorageError> {
    (|| async { store.ping().await })
        .retry(connection_backoff())
        .when(is_retryable)
        .notify(|e: &StorageError, delay| {
            warn!(error = %e, delay = ?delay, "storage not reachable, retrying");
        })
        .await?;
    info!("storage reachable");
    Ok(())
}
