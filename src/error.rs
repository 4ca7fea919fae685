//! Error taxonomy for the dashboard
//!
//! Every variant is caught at the session boundary and turned into a notice;
//! none of them is allowed to end the session.

use thiserror::Error;

pub type InsightResult<T> = std::result::Result<T, InsightError>;

#[derive(Debug, Error)]
pub enum InsightError {
    /// A static resource (location hierarchy) is missing or malformed
    #[error("resource unavailable: {resource}: {reason}")]
    ResourceUnavailable { resource: String, reason: String },

    /// The scoring or retrain call failed (transport or non-2xx status)
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A history write failed. Logged and swallowed by the session.
    #[error("persistence warning: {0}")]
    Persistence(String),

    /// A report was requested before any prediction exists
    #[error("export precondition: {0}")]
    ExportPrecondition(String),

    /// Invalid configuration or user input
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Rasterization or PDF assembly failed
    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl InsightError {
    pub fn resource(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for InsightError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}
