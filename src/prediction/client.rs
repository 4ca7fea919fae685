use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::InsightConfig;
use crate::error::{InsightError, InsightResult};
use crate::location::Selection;

/// Scoring result: amount plus per-feature SHAP contributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub amount: Option<f64>,
    pub contributions: IndexMap<String, f64>,
}

impl Prediction {
    /// Accepts `predicted_amount` or `amount`, and `shap_values` or `shap`.
    pub fn from_response(body: &Value) -> Self {
        let amount = ["predicted_amount", "amount"]
            .iter()
            .find_map(|key| body.get(*key).filter(|v| !v.is_null()))
            .and_then(Value::as_f64);

        let contributions = ["shap_values", "shap"]
            .iter()
            .find_map(|key| body.get(*key).filter(|v| !v.is_null()))
            .and_then(Value::as_object)
            .map(|shap| {
                shap.iter()
                    .filter_map(|(feature, value)| value.as_f64().map(|v| (feature.clone(), v)))
                    .collect()
            })
            .unwrap_or_default();

        Self { amount, contributions }
    }
}

/// Wire body for `POST /predict`. The model calls the state `district`.
#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    district: &'a str,
    mandal: &'a str,
    rbk: &'a str,
    season: &'a str,
    qty: f64,
    farmers: u32,
}

impl<'a> From<&'a Selection> for PredictRequest<'a> {
    fn from(selection: &'a Selection) -> Self {
        Self {
            district: &selection.state,
            mandal: &selection.mandal,
            rbk: &selection.rbk,
            season: selection.season.as_str(),
            qty: selection.quantity,
            farmers: selection.farmer_count,
        }
    }
}

#[async_trait]
pub trait ScoringBackend: Send + Sync {
    async fn predict(&self, selection: &Selection) -> InsightResult<Prediction>;

    /// Fire-and-forget model retrain. No retry, no status polling.
    async fn retrain(&self) -> InsightResult<()>;
}

/// Scoring service reached over HTTP
pub struct HttpScoringClient {
    client: Client,
    predict_url: String,
    retrain_url: String,
}

impl HttpScoringClient {
    pub fn new(config: &InsightConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("rbk_insight/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            predict_url: config.predict_endpoint(),
            retrain_url: config.retrain_endpoint(),
        }
    }
}

#[async_trait]
impl ScoringBackend for HttpScoringClient {
    async fn predict(&self, selection: &Selection) -> InsightResult<Prediction> {
        debug!("POST {} for rbk '{}'", self.predict_url, selection.rbk);

        let response = self
            .client
            .post(&self.predict_url)
            .json(&PredictRequest::from(selection))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Prediction API returned {}", status);
            return Err(InsightError::Upstream(format!(
                "prediction API returned {}",
                status
            )));
        }

        let body: Value = response.json().await?;
        Ok(Prediction::from_response(&body))
    }

    async fn retrain(&self) -> InsightResult<()> {
        debug!("POST {}", self.retrain_url);
        let status = self.client.post(&self.retrain_url).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(InsightError::Upstream(format!("retrain returned {}", status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_field_names() {
        let p = Prediction::from_response(&json!({
            "predicted_amount": 42000.0,
            "shap_values": { "qty": 1.5, "farmers": -2.0 }
        }));
        assert_eq!(p.amount, Some(42000.0));
        assert_eq!(p.contributions.get("farmers"), Some(&-2.0));
        assert_eq!(p.contributions.keys().collect::<Vec<_>>(), vec!["qty", "farmers"]);
    }

    #[test]
    fn test_alternate_field_names() {
        let p = Prediction::from_response(&json!({ "amount": 10, "shap": { "a": 3 } }));
        assert_eq!(p.amount, Some(10.0));
        assert_eq!(p.contributions.get("a"), Some(&3.0));
    }

    #[test]
    fn test_primary_wins_and_null_falls_through() {
        let p = Prediction::from_response(&json!({
            "predicted_amount": null,
            "amount": 7,
            "shap_values": { "x": 1 },
            "shap": { "y": 2 }
        }));
        assert_eq!(p.amount, Some(7.0));
        assert!(p.contributions.contains_key("x"));
        assert!(!p.contributions.contains_key("y"));
    }

    #[test]
    fn test_missing_fields_default() {
        let p = Prediction::from_response(&json!({}));
        assert_eq!(p, Prediction::default());
    }

    #[test]
    fn test_request_body_shape() {
        let selection = Selection {
            state: "Guntur".into(),
            mandal: "Tenali".into(),
            rbk: "T1".into(),
            ..Selection::default()
        };
        let body = serde_json::to_value(PredictRequest::from(&selection)).unwrap();
        assert_eq!(
            body,
            json!({
                "district": "Guntur",
                "mandal": "Tenali",
                "rbk": "T1",
                "season": "Kharif",
                "qty": 10.0,
                "farmers": 50
            })
        );
    }
}
