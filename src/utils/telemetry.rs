//! Logging setup
//!
//! One global `tracing` subscriber: an `EnvFilter` (overridable through
//! `RUST_LOG`) in front of the fmt layer.

use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const DEFAULT_FILTER: &str = "rbk_insight=info,tower_http=info";

/// `RUST_LOG` when set and valid, otherwise `fallback`.
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(env_filter(DEFAULT_FILTER))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
