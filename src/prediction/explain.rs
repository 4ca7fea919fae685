//! SHAP chart data for the explanations panel.

use indexmap::IndexMap;
use serde::Serialize;

const MAX_CHART_FEATURES: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributionBar {
    pub name: String,
    pub value: f64,
}

/// Strongest contributions first (by magnitude), at most 30.
pub fn chart_data(contributions: &IndexMap<String, f64>) -> Vec<ContributionBar> {
    let mut bars: Vec<ContributionBar> = contributions
        .iter()
        .map(|(name, value)| ContributionBar {
            name: name.clone(),
            value: *value,
        })
        .collect();
    bars.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
    bars.truncate(MAX_CHART_FEATURES);
    bars
}
