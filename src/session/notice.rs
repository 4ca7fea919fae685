//! Short-lived user-visible notices with per-message auto-dismiss.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub const LOAD_FAILED: &str = "Failed to load location data. Check the hierarchy resource.";
pub const PREDICT_OK: &str = "Prediction successful";
pub const PREDICT_FAILED: &str = "Prediction failed. Check backend.";
pub const EXPORT_NEEDS_PREDICTION: &str = "Generate a prediction first";
pub const RETRAIN_SENDING: &str = "Sending retrain request...";
pub const RETRAIN_OK: &str = "Retrain job started on backend";
pub const RETRAIN_FAILED: &str = "Retrain request failed. Check backend.";
pub const EXPLANATIONS_CLEARED: &str = "Cleared SHAP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub id: u64,
    pub message: String,
    pub level: NoticeLevel,
    /// None stays up until dismissed
    pub ttl_ms: Option<u64>,
    #[serde(skip)]
    expires_at: Option<Instant>,
}

impl Notice {
    pub fn is_active(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
pub struct NoticeBoard {
    next_id: u64,
    notices: Vec<Notice>,
}

impl NoticeBoard {
    pub fn push(&mut self, message: &str, level: NoticeLevel, ttl: Option<Duration>) -> Notice {
        self.push_at(message, level, ttl, Instant::now())
    }

    pub fn push_at(&mut self, message: &str, level: NoticeLevel, ttl: Option<Duration>, now: Instant) -> Notice {
        self.prune(now);
        self.next_id += 1;
        let notice = Notice {
            id: self.next_id,
            message: message.to_string(),
            level,
            ttl_ms: ttl.map(|d| d.as_millis() as u64),
            expires_at: ttl.map(|d| now + d),
        };
        self.notices.push(notice.clone());
        notice
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    pub fn prune(&mut self, now: Instant) {
        self.notices.retain(|n| n.is_active(now));
    }

    /// Oldest first
    pub fn active(&self, now: Instant) -> Vec<Notice> {
        self.notices.iter().filter(|n| n.is_active(now)).cloned().collect()
    }

    pub fn latest(&self, now: Instant) -> Option<&Notice> {
        self.notices.iter().rev().find(|n| n.is_active(now))
    }
}
