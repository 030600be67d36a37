//! Storage configuration types.

use serde::Deserialize;

/// Port assumed for host-only endpoints that are not `localhost`.
const DEFAULT_TLS_PORT: u16 = 443;

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Opensearch,
    Memory,
}

/// Search backend configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Cluster URL, or a bare `host[:port]`.
    pub endpoint: String,
    /// Index holding waypoint documents.
    pub index: String,
    /// Deprecated index dropped on first migration. `None` disables the drop.
    pub legacy_index: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
    /// Client-side timeout for every backend request, including each bulk chunk.
    pub request_timeout_secs: u64,
    /// Server-side search timeout, in the backend's duration syntax.
    pub search_timeout: String,
    pub shards: u32,
    pub replicas: u32,
    /// Ask the backend to make writes visible before acknowledging them.
    pub refresh_on_write: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("storage_type", &self.storage_type)
            .field("endpoint", &self.endpoint)
            .field("index", &self.index)
            .field("legacy_index", &self.legacy_index)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("search_timeout", &self.search_timeout)
            .field("shards", &self.shards)
            .field("replicas", &self.replicas)
            .field("refresh_on_write", &self.refresh_on_write)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Opensearch,
            endpoint: "http://localhost:9200".to_string(),
            index: "ferry_waypoints".to_string(),
            legacy_index: Some("waypoints".to_string()),
            username: None,
            password: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            search_timeout: "60s".to_string(),
            shards: 1,
            replicas: 1,
            refresh_on_write: false,
        }
    }
}

/// Turn a configured endpoint into a full URL.
///
/// Values with a scheme pass through. A bare `localhost[:port]` becomes
/// `http://`; any other bare host becomes `https://`, on port 443 unless one
/// is given.
pub fn resolve_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        return endpoint.to_string();
    }

    let (host, port) = match endpoint.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => (host, Some(port)),
        _ => (endpoint, None),
    };

    if host == "localhost" {
        return format!("http://{}", endpoint);
    }
    match port {
        Some(_) => format!("https://{}", endpoint),
        None => format!("https://{}:{}", host, DEFAULT_TLS_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let storage = StorageConfig::default();
        assert_eq!(storage.storage_type, StorageType::Opensearch);
        assert_eq!(storage.index, "ferry_waypoints");
        assert_eq!(storage.legacy_index.as_deref(), Some("waypoints"));
        assert_eq!(storage.request_timeout_secs, 30);
        assert_eq!(storage.search_timeout, "60s");
        assert_eq!((storage.shards, storage.replicas), (1, 1));
    }

    #[test]
    fn test_storage_config_debug_redacts_password() {
        let storage = StorageConfig {
            password: Some("hunter2".to_string()),
            ..StorageConfig::default()
        };
        let rendered = format!("{:?}", storage);
        assert!(rendered.contains("ferry_waypoints"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_resolve_endpoint() {
        assert_eq!(resolve_endpoint("http://es:9200"), "http://es:9200");
        assert_eq!(resolve_endpoint("localhost"), "http://localhost");
        assert_eq!(resolve_endpoint("localhost:9200"), "http://localhost:9200");
        assert_eq!(
            resolve_endpoint("search-ferries.eu-north-1.es.amazonaws.com"),
            "https://search-ferries.eu-north-1.es.amazonaws.com:443"
        );
        assert_eq!(resolve_endpoint("es.internal:9243"), "https://es.internal:9243");
    }
}
