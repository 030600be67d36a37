//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter. Request paths never
//! retry; only startup waits for the backend.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::storage::StorageError;

/// Backoff for backend reachability checks at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Whether a startup reachability failure is worth retrying.
///
/// Bad endpoints and client-side errors will not fix themselves.
pub fn is_retryable(error: &StorageError) -> bool {
    error.is_unavailable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&StorageError::Unavailable("refused".to_string())));
        assert!(is_retryable(&StorageError::UnexpectedStatus {
            operation: "ping",
            status: 503,
            body: String::new(),
        }));
        assert!(!is_retryable(&StorageError::UnexpectedStatus {
            operation: "ping",
            status: 401,
            body: String::new(),
        }));
        assert!(!is_retryable(&StorageError::InvalidEndpoint(
            "nope".to_string()
        )));
    }
}
