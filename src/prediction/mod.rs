//! Prediction Module
//!
//! Client for the remote scoring service: predicted amount, SHAP
//! contributions, and retrain triggers.

pub mod client;
pub mod explain;

pub use client::{HttpScoringClient, Prediction, ScoringBackend};
pub use explain::{chart_data, ContributionBar};
