//! History Module
//!
//! Persisted prediction records, the live (subscribed) recent view, and the
//! search/facet filter applied to it.

pub mod filter;
pub mod jsonl;
pub mod record;
pub mod store;

pub use filter::{Facet, HistoryFilter};
pub use jsonl::JsonlHistoryStore;
pub use record::PredictionRecord;
pub use store::{HistoryListener, HistoryStore, MemoryHistoryStore, Subscription, HISTORY_LIMIT};

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};

/// Build the store named by the configuration.
pub fn open_store(config: &StorageConfig) -> Arc<dyn HistoryStore> {
    match &config.backend {
        StorageBackend::Jsonl { path } => Arc::new(JsonlHistoryStore::new(path.clone())),
        StorageBackend::Memory => Arc::new(MemoryHistoryStore::new()),
    }
}
