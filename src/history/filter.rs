//! Search and facet filtering over the live history view.

use serde::{Deserialize, Serialize};

use super::record::PredictionRecord;
use crate::error::InsightResult;
use crate::location::Season;

/// A facet is either unconstrained ("All") or pinned to one value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Facet<T> {
    #[default]
    All,
    Only(T),
}

impl<T: PartialEq> Facet<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Facet::All => true,
            Facet::Only(expected) => expected == value,
        }
    }
}

impl Facet<String> {
    /// `"All"` or blank means no constraint.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("All") => Facet::All,
            Some(value) => Facet::Only(value.to_string()),
        }
    }
}

impl Facet<Season> {
    /// Unknown season names are a `Config` error, never "All".
    pub fn parse(raw: Option<&str>) -> InsightResult<Self> {
        match raw.map(str::trim) {
            None | Some("") | Some("All") => Ok(Facet::All),
            Some(value) => value.parse().map(Facet::Only),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub search: String,
    pub state: Facet<String>,
    pub season: Facet<Season>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &PredictionRecord) -> bool {
        if !self.state.admits(&record.state) || !self.season.admits(&record.season) {
            return false;
        }
        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [&record.rbk, &record.mandal, &record.state]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    pub fn apply(&self, view: &[PredictionRecord]) -> Vec<PredictionRecord> {
        view.iter().filter(|r| self.matches(r)).cloned().collect()
    }

    pub fn is_passthrough(&self) -> bool {
        self.search.trim().is_empty() && self.state == Facet::All && self.season == Facet::All
    }
}
