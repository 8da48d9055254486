//! Reconciler configuration, loaded via the `config` crate from environment
//! variables. Nested fields use `__` as the separator, e.g.
//! `AUTHZ__API_URL` or `AUTHZ__POOL__WORKERS`.

use groupgate_authz::AuthzConfig;
use serde::Deserialize;

/// Reconciler configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ReconcilerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Upper bound on pooled database connections.
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Authorization graph connection.
    pub authz: AuthzConfig,
}

fn default_database_max_connections() -> u32 {
    5
}

impl ReconcilerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(config::Environment::default())
    }

    fn load(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::default().source(Some(map))
    }

    #[test]
    fn loads_nested_authz_settings() {
        let config = ReconcilerConfig::load(env(&[
            ("DATABASE_URL", "postgres://localhost/groupgate"),
            ("AUTHZ__API_URL", "http://localhost:8080"),
            ("AUTHZ__STORE_ID", "01HSTORE"),
            ("AUTHZ__POOL__WORKERS", "8"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "postgres://localhost/groupgate");
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.authz.api_url, "http://localhost:8080");
        assert_eq!(config.authz.store_id, "01HSTORE");
        assert_eq!(config.authz.pool.workers, 8);
        assert_eq!(config.authz.request_timeout_seconds, 10);
        assert!(config.authz.api_token.is_none());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let result = ReconcilerConfig::load(env(&[
            ("AUTHZ__API_URL", "http://localhost:8080"),
            ("AUTHZ__STORE_ID", "01HSTORE"),
        ]));
        assert!(result.is_err());
    }
}
