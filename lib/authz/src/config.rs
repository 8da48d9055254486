//! Configuration for the authorization graph client.

use crate::pool::PoolConfig;
use serde::Deserialize;

/// Connection settings for an OpenFGA-compatible HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthzConfig {
    /// Base URL of the API, e.g. `http://localhost:8080`.
    pub api_url: String,

    /// Store holding this deployment's tuples.
    pub store_id: String,

    /// Model to evaluate against. The store's latest model when unset.
    #[serde(default)]
    pub model_id: Option<String>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Tuples requested per read page.
    #[serde(default = "default_read_page_size")]
    pub read_page_size: u32,

    /// Worker pool used to fan out batch checks.
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_read_page_size() -> u32 {
    100
}

impl AuthzConfig {
    /// Creates a config with defaults for everything but the endpoint.
    #[must_use]
    pub fn new(api_url: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            store_id: store_id.into(),
            model_id: None,
            api_token: None,
            request_timeout_seconds: default_request_timeout_seconds(),
            read_page_size: default_read_page_size(),
            pool: PoolConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: AuthzConfig = serde_json::from_str(
            r#"{"api_url": "http://fga:8080", "store_id": "01HSTORE"}"#,
        )
        .expect("config");

        assert_eq!(config.request_timeout_seconds, 10);
        assert_eq!(config.read_page_size, 100);
        assert_eq!(config.pool.workers, 150);
        assert!(config.model_id.is_none());
        assert!(config.api_token.is_none());
    }

    #[test]
    fn pool_settings_can_be_overridden() {
        let config: AuthzConfig = serde_json::from_str(
            r#"{"api_url": "http://fga:8080", "store_id": "s", "pool": {"workers": 8}}"#,
        )
        .expect("config");
        assert_eq!(config.pool.workers, 8);
        assert_eq!(config.pool.drain_timeout_seconds, 30);
    }
}
