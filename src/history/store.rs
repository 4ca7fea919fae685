//! History store interface, listener registry, and the in-process store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::record::{newest_first, PredictionRecord};
use crate::error::{InsightError, InsightResult};

/// Size of the live history view
pub const HISTORY_LIMIT: usize = 200;

/// Receives the full recent view (newest first) after every change.
pub type HistoryListener = Arc<dyn Fn(&[PredictionRecord]) + Send + Sync>;

/// Handle returned by [`HistoryStore::subscribe`]; pass it back to
/// [`HistoryStore::unsubscribe`] on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a record and return the id assigned to it.
    async fn append(&self, record: PredictionRecord) -> InsightResult<String>;

    /// Most recent `limit` records, newest first.
    async fn recent(&self, limit: usize) -> InsightResult<Vec<PredictionRecord>>;

    /// Register a live query. The listener is invoked once with the current
    /// view, then after every change.
    async fn subscribe(&self, limit: usize, listener: HistoryListener) -> InsightResult<Subscription>;

    /// Returns false when the subscription was already gone.
    fn unsubscribe(&self, subscription: Subscription) -> bool;
}

/// Live-query bookkeeping shared by the store implementations.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, (usize, HistoryListener)>>,
}

impl ListenerRegistry {
    pub fn register(&self, limit: usize, listener: HistoryListener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(id, (limit, listener));
        }
        Subscription(id)
    }

    pub fn remove(&self, subscription: Subscription) -> bool {
        self.listeners
            .lock()
            .map(|mut listeners| listeners.remove(&subscription.0).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest limit any listener asked for
    pub fn widest_limit(&self) -> usize {
        self.listeners
            .lock()
            .map(|l| l.values().map(|(limit, _)| *limit).max().unwrap_or(0))
            .unwrap_or(0)
    }

    /// `view` must already be newest first and at least as long as any
    /// listener's limit allows.
    pub fn notify(&self, view: &[PredictionRecord]) {
        // Listeners run outside the lock so they may unsubscribe themselves.
        let targets: Vec<(usize, HistoryListener)> = match self.listeners.lock() {
            Ok(listeners) => listeners.values().cloned().collect(),
            Err(_) => return,
        };
        debug!("Notifying {} history listeners", targets.len());
        for (limit, listener) in targets {
            listener(&view[..view.len().min(limit)]);
        }
    }
}

/// Process-local store; contents are lost on exit.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<PredictionRecord>>,
    listeners: ListenerRegistry,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, limit: usize) -> InsightResult<Vec<PredictionRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| InsightError::Persistence("history lock poisoned".into()))?
            .clone();
        Ok(newest_first(records, limit))
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, mut record: PredictionRecord) -> InsightResult<String> {
        let id = Uuid::new_v4().to_string();
        record.id = id.clone();
        self.records
            .lock()
            .map_err(|_| InsightError::Persistence("history lock poisoned".into()))?
            .push(record);

        if !self.listeners.is_empty() {
            let view = self.snapshot(self.listeners.widest_limit())?;
            self.listeners.notify(&view);
        }
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> InsightResult<Vec<PredictionRecord>> {
        self.snapshot(limit)
    }

    async fn subscribe(&self, limit: usize, listener: HistoryListener) -> InsightResult<Subscription> {
        let view = self.snapshot(limit)?;
        listener(view.as_slice());
        Ok(self.listeners.register(limit, listener))
    }

    fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.listeners.remove(subscription)
    }
}
