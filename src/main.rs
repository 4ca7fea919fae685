//! RBK Insight dashboard server
//!
//! Reads configuration from `.env` and the environment, loads the location
//! hierarchy and region polygons, attaches the live history view, and serves
//! the dashboard until Ctrl-C.

use anyhow::{Context, Result};
use tracing::info;

use rbk_insight::server::{run_server, AppState};
use rbk_insight::utils::init_tracing;
use rbk_insight::{Dashboard, InsightConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = InsightConfig::from_env().context("invalid configuration")?;
    info!(
        "Scoring service: {} | history: {:?} | hierarchy: {}",
        config.api_base, config.storage.backend, config.hierarchy_source
    );

    let dashboard = Dashboard::from_config(&config);
    dashboard
        .start(&config)
        .await
        .context("failed to attach prediction history")?;

    let state = AppState {
        dashboard,
        start_local: chrono::Local::now().format("%Y-%m-%d %H:%M").to_string(),
    };
    run_server(state, &config.bind_addr).await
}
