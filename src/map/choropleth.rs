//! Region coloring for the allocation map.

use std::collections::HashMap;
use std::path::Path;

use geojson::{Feature, FeatureCollection, GeoJson};
use html_escape::encode_text;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::history::PredictionRecord;
use crate::report::format_currency;

/// Six-step green scale, darkest first. Thresholds are exclusive.
const SCALE: [(f64, &str); 5] = [
    (1_000_000.0, "#005824"),
    (500_000.0, "#238b45"),
    (100_000.0, "#41ab5d"),
    (50_000.0, "#74c476"),
    (10_000.0, "#a1d99b"),
];
const LOWEST: &str = "#c7e9c0";

pub fn fill_color(value: f64) -> &'static str {
    SCALE
        .iter()
        .find(|(threshold, _)| value > *threshold)
        .map(|(_, color)| *color)
        .unwrap_or(LOWEST)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionStyle {
    pub fill_color: &'static str,
    pub weight: u32,
    pub opacity: f64,
    pub color: &'static str,
    pub fill_opacity: f64,
}

impl RegionStyle {
    pub fn for_value(value: f64) -> Self {
        Self {
            fill_color: fill_color(value),
            weight: 1,
            opacity: 1.0,
            color: "white",
            fill_opacity: 0.8,
        }
    }
}

/// Sum of predicted amounts per state; records without an amount are skipped.
pub fn aggregate_by_state(records: &[PredictionRecord]) -> HashMap<String, f64> {
    let mut totals = HashMap::new();
    for record in records {
        if let Some(amount) = record.amount.filter(|a| a.is_finite()) {
            *totals.entry(record.state.clone()).or_insert(0.0) += amount;
        }
    }
    totals
}

/// Region polygons are optional. Missing or unreadable files mean "no
/// overlay", never an error.
pub async fn load_regions(path: &Path) -> Option<FeatureCollection> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("No region polygons at {}: {}", path.display(), e);
            return None;
        }
    };
    match raw.parse::<GeoJson>() {
        Ok(GeoJson::FeatureCollection(fc)) => {
            info!("Loaded {} region polygons from {}", fc.features.len(), path.display());
            Some(fc)
        }
        Ok(GeoJson::Feature(feature)) => Some(FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        }),
        Ok(GeoJson::Geometry(_)) => {
            warn!("{} holds a bare geometry, expected features", path.display());
            None
        }
        Err(e) => {
            warn!("Failed to parse region polygons {}: {}", path.display(), e);
            None
        }
    }
}

fn region_name(feature: &Feature) -> String {
    feature
        .property("name")
        .and_then(|v| v.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

/// Copy of `regions` with `style`, `popup` and `total` set on every feature.
pub fn render(regions: &FeatureCollection, totals: &HashMap<String, f64>) -> FeatureCollection {
    let mut styled = regions.clone();
    for feature in &mut styled.features {
        let name = region_name(feature);
        let total = totals.get(&name).copied().unwrap_or(0.0);
        feature.set_property("style", json!(RegionStyle::for_value(total)));
        feature.set_property(
            "popup",
            format!("<b>{}</b><br/>Total: {}", encode_text(&name), format_currency(Some(total))),
        );
        feature.set_property("total", total);
    }
    styled
}
