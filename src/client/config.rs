use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

/// Number of results kept per query text when no size is configured.
pub const DEFAULT_CACHE_SIZE: usize = 10;

/// Error type for loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name} must be a number: {source}")]
    InvalidNumber {
        name: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Extra request options applied to mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Headers merged over the JSON `Accept`/`Content-Type` defaults.
    pub headers: BTreeMap<String, String>,
}

/// Configuration for an [`Endpoint`](super::Endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address queries and mutations are sent to.
    pub endpoint: String,

    /// Results kept per distinct query text before the least recently used one
    /// is evicted. Zero selects [`DEFAULT_CACHE_SIZE`].
    pub cache_size: usize,

    pub fetch_options: FetchOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            cache_size: DEFAULT_CACHE_SIZE,
            fetch_options: FetchOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for `endpoint` with the default cache size.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fetch_options.headers.insert(name.into(), value.into());
        self
    }

    /// The capacity each per-query cache is created with.
    pub const fn cache_size_to_use(&self) -> usize {
        if self.cache_size > 0 {
            self.cache_size
        } else {
            DEFAULT_CACHE_SIZE
        }
    }

    /// Reads `BOOKLIST_GRAPHQL_ENDPOINT` and, optionally, `BOOKLIST_CACHE_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        const ENDPOINT: &str = "BOOKLIST_GRAPHQL_ENDPOINT";
        const CACHE_SIZE: &str = "BOOKLIST_CACHE_SIZE";

        let endpoint = std::env::var(ENDPOINT).map_err(|_| ConfigError::Missing { name: ENDPOINT })?;
        let cache_size = match std::env::var(CACHE_SIZE) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|source| ConfigError::InvalidNumber {
                    name: CACHE_SIZE,
                    source,
                })?,
            Err(_) => DEFAULT_CACHE_SIZE,
        };

        Ok(Self::new(endpoint).with_cache_size(cache_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.cache_size, DEFAULT_CACHE_SIZE);
        assert!(config.endpoint.is_empty());
        assert!(config.fetch_options.headers.is_empty());
    }

    #[test]
    fn test_new_config() {
        let config = ClientConfig::new("/graphql")
            .with_cache_size(3)
            .with_header("Authorization", "Bearer t");
        assert_eq!(config.endpoint, "/graphql");
        assert_eq!(config.cache_size_to_use(), 3);
        assert_eq!(
            config.fetch_options.headers.get("Authorization").map(String::as_str),
            Some("Bearer t")
        );
    }

    #[test]
    fn test_zero_cache_size_falls_back_to_default() {
        let config = ClientConfig::new("/graphql").with_cache_size(0);
        assert_eq!(config.cache_size_to_use(), DEFAULT_CACHE_SIZE);
    }

    #[test]
    fn test_from_env() {
        const ENDPOINT: &str = "BOOKLIST_GRAPHQL_ENDPOINT";
        const CACHE_SIZE: &str = "BOOKLIST_CACHE_SIZE";

        // SAFETY: no other test in this binary reads or writes these variables.
        unsafe {
            std::env::remove_var(ENDPOINT);
            std::env::remove_var(CACHE_SIZE);
        }
        assert!(matches!(
            ClientConfig::from_env(),
            Err(ConfigError::Missing { name: ENDPOINT })
        ));

        unsafe {
            std::env::set_var(ENDPOINT, "/graphql");
            std::env::set_var(CACHE_SIZE, "lots");
        }
        let err = ClientConfig::from_env().expect_err("cache size is not a number");
        assert!(matches!(err, ConfigError::InvalidNumber { name: CACHE_SIZE, .. }));
        assert!(err.to_string().starts_with("BOOKLIST_CACHE_SIZE must be a number"));

        unsafe { std::env::set_var(CACHE_SIZE, " 4 ") };
        let config = ClientConfig::from_env().expect("valid environment");
        assert_eq!(config.endpoint, "/graphql");
        assert_eq!(config.cache_size, 4);

        unsafe { std::env::remove_var(CACHE_SIZE) };
        let config = ClientConfig::from_env().expect("cache size is optional");
        assert_eq!(config.cache_size, DEFAULT_CACHE_SIZE);

        unsafe { std::env::remove_var(ENDPOINT) };
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ClientConfig =
            serde_json::from_str(r#"{ "endpoint": "/graphql", "fetch_options": { "headers": { "x-a": "1" } } }"#)
                .expect("config should deserialize");
        assert_eq!(config.endpoint, "/graphql");
        assert_eq!(config.cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(config.fetch_options.headers.len(), 1);
    }
}
