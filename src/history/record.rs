use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::location::{Season, Selection};
use crate::prediction::Prediction;

/// One persisted prediction. Field names on the wire follow the document
/// layout of the history collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Assigned by the store on append
    #[serde(default)]
    pub id: String,
    pub state: String,
    pub mandal: String,
    pub rbk: String,
    pub season: Season,
    #[serde(rename = "qty")]
    pub quantity: f64,
    #[serde(rename = "farmers")]
    pub farmer_count: u32,
    pub amount: Option<f64>,
    #[serde(rename = "shapValues", default)]
    pub feature_contributions: IndexMap<String, f64>,
    /// ISO-8601
    pub timestamp: String,
    #[serde(rename = "userId")]
    pub submitted_by: String,
}

impl PredictionRecord {
    pub fn new(
        selection: &Selection,
        prediction: &Prediction,
        submitted_by: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            state: selection.state.clone(),
            mandal: selection.mandal.clone(),
            rbk: selection.rbk.clone(),
            season: selection.season,
            quantity: selection.quantity,
            farmer_count: selection.farmer_count,
            amount: prediction.amount,
            feature_contributions: prediction.contributions.clone(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            submitted_by: submitted_by.to_string(),
        }
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Newest first by timestamp, capped at `limit`.
///
/// `records` is in append order; among equal timestamps the later append
/// wins. Unparseable timestamps sort last.
pub fn newest_first(mut records: Vec<PredictionRecord>, limit: usize) -> Vec<PredictionRecord> {
    records.reverse();
    records.sort_by(|a, b| b.recorded_at().cmp(&a.recorded_at()));
    records.truncate(limit);
    records
}
