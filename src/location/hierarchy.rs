//! State → mandal → RBK tree loaded from a static JSON resource.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{InsightError, InsightResult};

/// Ordered mapping `{ state: { mandal: [rbk, ...] } }`.
///
/// Key order is the order of the resource, so "first" is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationHierarchy {
    tree: IndexMap<String, IndexMap<String, Vec<String>>>,
}

impl LocationHierarchy {
    pub fn from_json(raw: &str) -> InsightResult<Self> {
        serde_json::from_str(raw).map_err(|e| InsightError::resource("location hierarchy", e))
    }

    /// Load from a filesystem path or an http(s) URL.
    pub async fn load(source: &str) -> InsightResult<Self> {
        let raw = if source.starts_with("http://") || source.starts_with("https://") {
            debug!("Fetching location hierarchy from {}", source);
            let response = reqwest::get(source)
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| InsightError::resource(source, e))?;
            response.text().await.map_err(|e| InsightError::resource(source, e))?
        } else {
            tokio::fs::read_to_string(source)
                .await
                .map_err(|e| InsightError::resource(source, e))?
        };

        let hierarchy = Self::from_json(&raw)?;
        info!(
            "Location hierarchy loaded: {} states, {} RBKs",
            hierarchy.tree.len(),
            hierarchy.rbk_count()
        );
        Ok(hierarchy)
    }

    pub fn states(&self) -> Vec<String> {
        self.tree.keys().cloned().collect()
    }

    /// Mandals of `state`, empty when the state is unknown.
    pub fn mandals(&self, state: &str) -> Vec<String> {
        self.tree
            .get(state)
            .map(|mandals| mandals.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// RBKs of `state`/`mandal`, empty when either key is unknown.
    pub fn rbks(&self, state: &str, mandal: &str) -> Vec<String> {
        self.tree
            .get(state)
            .and_then(|mandals| mandals.get(mandal))
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains_state(&self, state: &str) -> bool {
        self.tree.contains_key(state)
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn rbk_count(&self) -> usize {
        self.tree.values().flat_map(|m| m.values()).map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "Guntur": { "Tenali": ["RBK-T1", "RBK-T2"], "Bapatla": ["RBK-B1"] },
        "Anantapur": { "Kadiri": ["RBK-K1"] }
    }"#;

    #[test]
    fn test_preserves_resource_order() {
        let h = LocationHierarchy::from_json(SAMPLE).unwrap();
        assert_eq!(h.states(), vec!["Guntur", "Anantapur"]);
        assert_eq!(h.mandals("Guntur"), vec!["Tenali", "Bapatla"]);
        assert_eq!(h.rbks("Guntur", "Tenali"), vec!["RBK-T1", "RBK-T2"]);
    }

    #[test]
    fn test_missing_keys_degrade_to_empty() {
        let h = LocationHierarchy::from_json(SAMPLE).unwrap();
        assert!(h.mandals("Nowhere").is_empty());
        assert!(h.rbks("Guntur", "Nowhere").is_empty());
        assert!(h.rbks("Nowhere", "Tenali").is_empty());
    }

    #[test]
    fn test_malformed_resource_is_unavailable() {
        let err = LocationHierarchy::from_json("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, InsightError::ResourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rbk_hierarchy.json");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let h = LocationHierarchy::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(h.states().len(), 2);

        let missing = dir.path().join("absent.json");
        let err = LocationHierarchy::load(missing.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, InsightError::ResourceUnavailable { .. }));
    }
}
