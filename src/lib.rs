//! RBK Insight
//!
//! Dashboard service for RBK (Rythu Bharosa Kendra) subsidy predictions:
//! - Cascading state → mandal → RBK selection
//! - Remote scoring with SHAP explanations and retrain triggers
//! - Live, filterable prediction history
//! - Choropleth allocation map
//! - Paginated PDF report export

pub mod config;
pub mod error;
pub mod history;
pub mod location;
pub mod map;
pub mod prediction;
pub mod report;
pub mod server;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use config::InsightConfig;
pub use error::{InsightError, InsightResult};
pub use session::Dashboard;
