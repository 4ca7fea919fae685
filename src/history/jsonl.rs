//! Append-only JSONL document log for prediction history
//!
//! Each record is one line. Writers take an exclusive advisory lock while
//! appending; the file is owner-only on unix. Records are never rewritten
//! or deleted. While anyone is subscribed, the log is watched so that lines
//! appended by other handles or processes reach the live view too.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs as tokio_fs;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
#[cfg(unix)]
use fs2::FileExt;

use super::record::{newest_first, PredictionRecord};
use super::store::{HistoryListener, HistoryStore, ListenerRegistry, Subscription};
use crate::error::{InsightError, InsightResult};

const MAX_RETRIES: usize = 10;
const RETRY_SLEEP: Duration = Duration::from_millis(100);

/// State shared with the file watcher task.
struct HistoryLog {
    path: PathBuf,
    listeners: ListenerRegistry,
    /// Byte length of the complete lines last pushed to listeners
    delivered_len: AtomicU64,
}

impl HistoryLog {
    /// All readable records in append order, plus the byte length they span.
    /// A trailing line still being written is left for the next read.
    async fn load_all(&self) -> InsightResult<(Vec<PredictionRecord>, u64)> {
        if !tokio_fs::try_exists(&self.path).await? {
            return Ok((Vec::new(), 0));
        }
        let content = tokio_fs::read_to_string(&self.path).await?;
        let complete = match content.rfind('\n') {
            Some(end) => &content[..=end],
            None => "",
        };
        let mut skipped = 0usize;
        let records: Vec<PredictionRecord> = complete
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(_) => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            warn!("Skipped {} unreadable history lines in {}", skipped, self.path.display());
        }
        Ok((records, complete.len() as u64))
    }

    /// Push the current view unless this exact log length was already sent.
    async fn refresh(&self) -> InsightResult<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        let (records, len) = self.load_all().await?;
        if self.delivered_len.swap(len, Ordering::SeqCst) == len {
            return Ok(());
        }
        let view = newest_first(records, self.listeners.widest_limit());
        self.listeners.notify(&view);
        Ok(())
    }
}

pub struct JsonlHistoryStore {
    log: Arc<HistoryLog>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: Arc::new(HistoryLog {
                path: path.into(),
                listeners: ListenerRegistry::default(),
                delivered_len: AtomicU64::new(0),
            }),
            watcher: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.log.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        }
    }

    async fn write_line(&self, line: String) -> InsightResult<()> {
        tokio_fs::create_dir_all(self.parent_dir()).await?;

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            options.append(true);
            options.mode(0o600);
        }
        let mut file = options.open(&self.log.path)?;

        #[cfg(unix)]
        {
            let mut perms = file.metadata()?.permissions();
            if perms.mode() & 0o777 != 0o600 {
                perms.set_mode(0o600);
                file.set_permissions(perms)?;
            }
        }

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            #[cfg(unix)]
            {
                for _ in 0..MAX_RETRIES {
                    match file.try_lock_exclusive() {
                        Ok(()) => {
                            file.seek(SeekFrom::End(0))?;
                            file.write_all(line.as_bytes())?;
                            file.flush()?;
                            let _ = file.unlock();
                            return Ok(());
                        }
                        Err(_) => std::thread::sleep(RETRY_SLEEP),
                    }
                }
                Err(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "could not acquire exclusive lock on history file",
                ))
            }
            #[cfg(not(unix))]
            {
                file.seek(SeekFrom::End(0))?;
                file.write_all(line.as_bytes())?;
                file.flush()
            }
        })
        .await
        .map_err(|e| InsightError::Persistence(format!("history writer task failed: {e}")))??;

        Ok(())
    }

    /// Start watching the log's directory if nobody is yet. Without a
    /// watcher the live view still follows this handle's own appends.
    async fn ensure_watching(&self) {
        let watching = self.watcher.lock().map(|w| w.is_some()).unwrap_or(true);
        if watching {
            return;
        }
        let dir = self.parent_dir();
        if let Err(e) = tokio_fs::create_dir_all(&dir).await {
            warn!("Cannot watch history directory {}: {}", dir.display(), e);
            return;
        }

        let file_name = self.log.path.file_name().map(|n| n.to_os_string());
        let (tx, mut rx) = mpsc::channel::<()>(16);
        let handler = move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if ours && (event.kind.is_modify() || event.kind.is_create()) {
                    // A full channel already has a refresh pending
                    let _ = tx.try_send(());
                }
            }
        };

        let mut watcher = match RecommendedWatcher::new(handler, notify::Config::default()) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!("History file watcher unavailable: {}", e);
                return;
            }
        };
        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            warn!("Cannot watch history directory {}: {}", dir.display(), e);
            return;
        }

        let log = self.log.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                if let Err(e) = log.refresh().await {
                    warn!("History reload after file change failed: {}", e);
                }
            }
            debug!("History watcher stopped for {}", log.path.display());
        });

        if let Ok(mut slot) = self.watcher.lock() {
            *slot = Some(watcher);
            info!("Watching {} for history changes", self.log.path.display());
        }
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, mut record: PredictionRecord) -> InsightResult<String> {
        let id = Uuid::new_v4().to_string();
        record.id = id.clone();

        let mut line = serde_json::to_string(&record)
            .map_err(|e| InsightError::Persistence(format!("failed to serialize history record: {e}")))?;
        line.push('\n');

        self.write_line(line)
            .await
            .map_err(|e| InsightError::Persistence(e.to_string()))?;
        debug!("Appended history record {} to {}", id, self.log.path.display());

        // The record is stored; a failed reload only delays the live view.
        if let Err(e) = self.log.refresh().await {
            warn!("History listeners not refreshed after {}: {}", id, e);
        }
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> InsightResult<Vec<PredictionRecord>> {
        Ok(newest_first(self.log.load_all().await?.0, limit))
    }

    async fn subscribe(&self, limit: usize, listener: HistoryListener) -> InsightResult<Subscription> {
        let (records, len) = self.log.load_all().await?;
        listener(newest_first(records, limit).as_slice());
        let subscription = self.log.listeners.register(limit, listener);
        self.log.delivered_len.store(len, Ordering::SeqCst);
        self.ensure_watching().await;
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: Subscription) -> bool {
        let removed = self.log.listeners.remove(subscription);
        if self.log.listeners.is_empty() {
            if let Ok(mut slot) = self.watcher.lock() {
                // Dropping the watcher closes the channel and ends its task
                slot.take();
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Selection;
    use crate::prediction::Prediction;
    use chrono::{Duration, Utc};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn record(rbk: &str, offset_secs: i64) -> PredictionRecord {
        let selection = Selection {
            state: "Guntur".into(),
            rbk: rbk.into(),
            ..Selection::default()
        };
        PredictionRecord::new(
            &selection,
            &Prediction::default(),
            "tester",
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[tokio::test]
    async fn test_append_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.jsonl");
        let store = JsonlHistoryStore::new(&path);

        let first = store.append(record("T1", 0)).await.unwrap();
        store.append(record("T2", 10)).await.unwrap();

        // A fresh handle sees the same log
        let reopened = JsonlHistoryStore::new(&path);
        let recent = reopened.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].rbk, "T2");
        assert_eq!(recent[1].id, first);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("none.jsonl"));
        assert!(store.recent(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = JsonlHistoryStore::new(&path);
        store.append(record("good", 0)).await.unwrap();
        tokio_fs::write(
            &path,
            format!("{}{{not json\n", tokio_fs::read_to_string(&path).await.unwrap()),
        )
        .await
        .unwrap();

        let recent = store.recent(5).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].rbk, "good");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_owner_only_permissions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = JsonlHistoryStore::new(&path);
        store.append(record("T1", 0)).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn test_listeners_see_own_writes() {
        let dir = tempdir().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("history.jsonl"));
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        let sub = store
            .subscribe(2, Arc::new(move |view: &[PredictionRecord]| sink.lock().unwrap().push(view.len())))
            .await
            .unwrap();

        for i in 0..3 {
            store.append(record(&format!("r{}", i), i)).await.unwrap();
        }
        assert!(store.unsubscribe(sub));
        assert_eq!(*counts.lock().unwrap(), vec![0, 1, 2, 2]);
    }

    #[tokio::test]
    async fn test_listeners_see_other_writers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let reader = JsonlHistoryStore::new(&path);
        let writer = JsonlHistoryStore::new(&path);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = reader
            .subscribe(10, Arc::new(move |view: &[PredictionRecord]| {
                sink.lock().unwrap().push(view.iter().map(|r| r.rbk.clone()).collect::<Vec<_>>())
            }))
            .await
            .unwrap();

        writer.append(record("elsewhere", 0)).await.unwrap();

        let mut delivered = false;
        for _ in 0..100 {
            if seen.lock().unwrap().last().map(|v| v.as_slice()) == Some(&["elsewhere".to_string()][..]) {
                delivered = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(delivered, "reader never saw the other handle's write: {:?}", seen.lock().unwrap());
        assert!(reader.unsubscribe(sub));
    }

    #[tokio::test]
    async fn test_append_survives_unreadable_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = JsonlHistoryStore::new(&path);
        let sub = store.subscribe(10, Arc::new(|_: &[PredictionRecord]| {})).await.unwrap();

        // Invalid UTF-8 makes every reload fail while appends still succeed
        std::fs::write(&path, [0xff, 0xfe, b'\n']).unwrap();
        let id = store.append(record("stored", 0)).await.unwrap();
        assert!(!id.is_empty());
        assert!(std::fs::read(&path).unwrap().ends_with(b"\n"));
        assert!(store.unsubscribe(sub));
    }
}
