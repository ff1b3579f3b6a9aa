//! Gateway configuration.
//!
//! Configuration comes from an optional JSON file (path in `SWGATE_CONFIG`),
//! then environment overrides. Every field has a default, so an empty
//! environment yields a working gateway on `127.0.0.1:8080` in front of
//! `http://127.0.0.1:8000`.
//!
//! | Variable               | Field                    |
//! |------------------------|--------------------------|
//! | `SWGATE_LISTEN`        | `listen`                 |
//! | `SWGATE_UPSTREAM`      | `upstream`               |
//! | `SWGATE_STATIC_CACHE`  | `worker.static_cache`    |
//! | `SWGATE_API_CACHE`     | `worker.api_cache`       |
//! | `SWGATE_TTL_MS`        | `worker.ttl_ms`          |
//! | `SWGATE_MAX_ENTRIES`   | `worker.max_api_entries` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::worker::WorkerConfig;

/// Names the JSON config file.
pub const CONFIG_PATH_VAR: &str = "SWGATE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the gateway listens on.
    pub listen: String,
    /// Base URL of the backend API.
    pub upstream: String,
    /// Upper bound on an upstream fetch. Unset leaves it to the transport.
    pub upstream_timeout_ms: Option<u64>,
    /// Path receiving push messages; clicks go to `{push_path}/click`.
    pub push_path: String,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            upstream: "http://127.0.0.1:8000".to_owned(),
            upstream_timeout_ms: None,
            push_path: "/__swgate/push".to_owned(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Loads from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_sources(|key| std::env::var(key).ok())
    }

    /// Loads using `var` to look up environment variables.
    pub fn from_sources(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match var(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(&var)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("SWGATE_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = var("SWGATE_UPSTREAM") {
            self.upstream = v;
        }
        if let Some(v) = var("SWGATE_STATIC_CACHE") {
            self.worker.static_cache = v;
        }
        if let Some(v) = var("SWGATE_API_CACHE") {
            self.worker.api_cache = v;
        }
        if let Some(v) = var("SWGATE_TTL_MS") {
            self.worker.ttl_ms = parse_number("SWGATE_TTL_MS", v)?;
        }
        if let Some(v) = var("SWGATE_MAX_ENTRIES") {
            self.worker.max_api_entries = parse_number("SWGATE_MAX_ENTRIES", v)?;
        }
        Ok(())
    }

    /// Checks the invariants the worker relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.worker;
        if w.ttl_ms == 0 {
            return Err(ConfigError::Invalid("worker.ttl_ms must be positive".into()));
        }
        if w.max_api_entries == 0 {
            return Err(ConfigError::Invalid("worker.max_api_entries must be positive".into()));
        }
        if w.static_cache.is_empty() || w.api_cache.is_empty() {
            return Err(ConfigError::Invalid("cache generation names must be non-empty".into()));
        }
        if w.static_cache == w.api_cache {
            return Err(ConfigError::Invalid(format!(
                "static and api caches share the name {:?}",
                w.static_cache
            )));
        }
        if !(w.api_prefix.starts_with('/') && w.api_prefix.ends_with('/')) {
            return Err(ConfigError::Invalid(format!(
                "worker.api_prefix {:?} must start and end with '/'",
                w.api_prefix
            )));
        }
        if !self.push_path.starts_with('/') {
            return Err(ConfigError::Invalid("push_path must start with '/'".into()));
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_sources(env(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.worker.ttl_ms, 300_000);
        assert_eq!(config.worker.max_api_entries, 50);
        assert_eq!(config.upstream_timeout(), None);
    }

    #[test]
    fn env_overrides_apply() {
        let config = Config::from_sources(env(&[
            ("SWGATE_UPSTREAM", "http://backend:9000"),
            ("SWGATE_API_CACHE", "api-v3"),
            ("SWGATE_TTL_MS", "60000"),
        ]))
        .unwrap();
        assert_eq!(config.upstream, "http://backend:9000");
        assert_eq!(config.worker.api_cache, "api-v3");
        assert_eq!(config.worker.ttl_ms, 60_000);
    }

    #[test]
    fn non_numeric_ttl_is_rejected() {
        let err = Config::from_sources(env(&[("SWGATE_TTL_MS", "five minutes")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "SWGATE_TTL_MS", .. }));
    }

    #[test]
    fn shared_generation_name_is_rejected() {
        let err = Config::from_sources(env(&[
            ("SWGATE_STATIC_CACHE", "v2"),
            ("SWGATE_API_CACHE", "v2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{"listen":"0.0.0.0:80","worker":{"precache":["/"],"ttl_ms":1000}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.listen, "0.0.0.0:80");
        assert_eq!(config.worker.precache, vec!["/"]);
        assert_eq!(config.worker.ttl_ms, 1000);
        assert_eq!(config.worker.api_prefix, "/api/");
        assert_eq!(config.worker.never_cache, vec!["/auth/", "/payments/"]);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::from_sources(env(&[(CONFIG_PATH_VAR, "/nonexistent/swgate.json")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
