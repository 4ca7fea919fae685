//! Dashboard configuration
//!
//! Built once at process start from the environment (after `.env` is
//! loaded) and handed to every collaborator. Nothing reads the environment
//! after this point.

use std::env;
use std::path::PathBuf;

use crate::error::{InsightError, InsightResult};

const DEFAULT_API_BASE: &str = "https://rbk-predictor.onrender.com";
const DEFAULT_HISTORY_PATH: &str = "rbk_history.jsonl";
const DEFAULT_HIERARCHY: &str = "public/rbk_hierarchy.json";
const DEFAULT_REGIONS: &str = "public/districts.geojson";
const DEFAULT_BIND: &str = "0.0.0.0:8002";

/// Where prediction history is kept
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    /// Append-only JSONL document log
    Jsonl { path: PathBuf },
    /// Process-local, lost on exit
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Opaque credential for a hosted store; carried but never logged
    pub credentials: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Jsonl {
                path: PathBuf::from(DEFAULT_HISTORY_PATH),
            },
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightConfig {
    /// Base URL of the scoring service (`/predict`, `/retrain`)
    pub api_base: String,
    pub storage: StorageConfig,
    /// Path or http(s) URL of the location hierarchy JSON
    pub hierarchy_source: String,
    /// Optional GeoJSON region polygons
    pub regions_path: PathBuf,
    pub bind_addr: String,
    /// Identity from the auth provider; a random id is generated when absent
    pub user_id: Option<String>,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            storage: StorageConfig::default(),
            hierarchy_source: DEFAULT_HIERARCHY.to_string(),
            regions_path: PathBuf::from(DEFAULT_REGIONS),
            bind_addr: DEFAULT_BIND.to_string(),
            user_id: None,
        }
    }
}

impl InsightConfig {
    pub fn from_env() -> InsightResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests don't touch process env.
    pub fn from_lookup<F>(lookup: F) -> InsightResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_base = get("RBK_API_BASE").unwrap_or(defaults.api_base);
        if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
            return Err(InsightError::Config(format!(
                "RBK_API_BASE must be an http(s) URL, got '{}'",
                api_base
            )));
        }

        let backend = match get("RBK_STORAGE").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("jsonl") => StorageBackend::Jsonl {
                path: get("RBK_HISTORY_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_PATH)),
            },
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(InsightError::Config(format!(
                    "unknown RBK_STORAGE '{}' (expected 'jsonl' or 'memory')",
                    other
                )))
            }
        };

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            storage: StorageConfig {
                backend,
                credentials: get("RBK_STORAGE_TOKEN"),
            },
            hierarchy_source: get("RBK_HIERARCHY").unwrap_or(defaults.hierarchy_source),
            regions_path: get("RBK_REGIONS").map(PathBuf::from).unwrap_or(defaults.regions_path),
            bind_addr: get("RBK_BIND").unwrap_or(defaults.bind_addr),
            user_id: get("RBK_USER_ID"),
        })
    }

    pub fn predict_endpoint(&self) -> String {
        format!("{}/predict", self.api_base)
    }

    pub fn retrain_endpoint(&self) -> String {
        format!("{}/retrain", self.api_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = InsightConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, InsightConfig::default());
        assert_eq!(config.predict_endpoint(), "https://rbk-predictor.onrender.com/predict");
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let config = InsightConfig::from_lookup(lookup(&[
            ("RBK_API_BASE", "http://localhost:9000/"),
            ("RBK_STORAGE", "memory"),
            ("RBK_USER_ID", "farmer-7"),
        ]))
        .unwrap();
        assert_eq!(config.retrain_endpoint(), "http://localhost:9000/retrain");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.user_id.as_deref(), Some("farmer-7"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(InsightConfig::from_lookup(lookup(&[("RBK_API_BASE", "ftp://x")])).is_err());
        assert!(InsightConfig::from_lookup(lookup(&[("RBK_STORAGE", "firestore")])).is_err());
    }
}
