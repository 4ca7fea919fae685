//! Map Module
//!
//! Choropleth overlay of predicted totals per state.

pub mod choropleth;

pub use choropleth::{aggregate_by_state, fill_color, load_regions, render, RegionStyle};
