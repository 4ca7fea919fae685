//! The dashboard session and its shared handle.
//!
//! All UI state lives in one `DashboardSession` behind an async mutex. The
//! `Dashboard` handle wires it to the scoring backend, the history store and
//! the report exporter. The lock is never held across a network call.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use geojson::FeatureCollection;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notice::{self, Notice, NoticeBoard, NoticeLevel};
use crate::config::InsightConfig;
use crate::error::{InsightError, InsightResult};
use crate::history::{
    open_store, HistoryFilter, HistoryListener, HistoryStore, PredictionRecord, Subscription, HISTORY_LIMIT,
};
use crate::location::{LocationHierarchy, Season, Selection, SelectionState};
use crate::map;
use crate::prediction::{chart_data, ContributionBar, HttpScoringClient, Prediction, ScoringBackend};
use crate::report::{format_currency, ReportExporter, ReportFile, ReportLayout};

const LOAD_FAILED_TTL: Duration = Duration::from_millis(4000);
const PREDICT_OK_TTL: Duration = Duration::from_millis(2500);
const PREDICT_FAILED_TTL: Duration = Duration::from_millis(3000);
const EXPORT_PRECONDITION_TTL: Duration = Duration::from_millis(2000);
const RETRAIN_RESULT_TTL: Duration = Duration::from_millis(3000);
const CLEARED_TTL: Duration = Duration::from_millis(1500);

/// Pushed to every WebSocket client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum DashboardEvent {
    /// The whole live view after a store change. Each client applies its
    /// own filter through `GET /api/history`.
    HistoryUpdated { records: Vec<HistoryRow>, total: usize },
    PredictionUpdated { prediction: Option<Prediction> },
    BusyChanged(bool),
    NoticePosted(Notice),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Completed(Prediction),
    /// Another submission was outstanding; nothing was sent
    Busy,
}

/// A history record as shown in the table, with the amount already formatted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    #[serde(flatten)]
    pub record: PredictionRecord,
    pub amount_display: String,
}

impl From<&PredictionRecord> for HistoryRow {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            amount_display: format_currency(record.amount),
            record: record.clone(),
        }
    }
}

fn rows(records: &[PredictionRecord]) -> Vec<HistoryRow> {
    records.iter().map(HistoryRow::from).collect()
}

#[derive(Debug, Default)]
pub struct DashboardSession {
    selection: SelectionState,
    prediction: Option<Prediction>,
    busy: bool,
    notices: NoticeBoard,
    /// Recent view as last delivered by the store, newest first
    history: Vec<PredictionRecord>,
    regions: Option<FeatureCollection>,
}

impl DashboardSession {
    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        self.prediction.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn history(&self) -> &[PredictionRecord] {
        &self.history
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            states: self.selection.states().to_vec(),
            mandals: self.selection.mandals().to_vec(),
            rbks: self.selection.rbks().to_vec(),
            selection: self.selection.selection().clone(),
            amount_display: format_currency(self.prediction.as_ref().and_then(|p| p.amount)),
            prediction: self.prediction.clone(),
            busy: self.busy,
            notices: self.notices.active(Instant::now()),
            history_size: self.history.len(),
            has_regions: self.regions.is_some(),
        }
    }
}

/// Serializable view of the session for `GET /api/state`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub states: Vec<String>,
    pub mandals: Vec<String>,
    pub rbks: Vec<String>,
    pub selection: Selection,
    pub prediction: Option<Prediction>,
    pub amount_display: String,
    pub busy: bool,
    pub notices: Vec<Notice>,
    pub history_size: usize,
    pub has_regions: bool,
}

/// Partial update of the free inputs
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct InputsUpdate {
    pub season: Option<Season>,
    #[serde(alias = "qty")]
    pub quantity: Option<f64>,
    pub farmers: Option<u32>,
}

#[derive(Clone)]
pub struct Dashboard {
    session: Arc<Mutex<DashboardSession>>,
    scoring: Arc<dyn ScoringBackend>,
    history: Arc<dyn HistoryStore>,
    exporter: ReportExporter,
    events: broadcast::Sender<DashboardEvent>,
    subscription: Arc<std::sync::Mutex<Option<Subscription>>>,
    user_id: Arc<str>,
}

impl Dashboard {
    pub fn new(
        scoring: Arc<dyn ScoringBackend>,
        history: Arc<dyn HistoryStore>,
        exporter: ReportExporter,
        user_id: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let user_id: String = user_id.into();
        Self {
            session: Arc::new(Mutex::new(DashboardSession::default())),
            scoring,
            history,
            exporter,
            events,
            subscription: Arc::new(std::sync::Mutex::new(None)),
            user_id: Arc::from(user_id),
        }
    }

    /// Wire the production collaborators named by `config`.
    pub fn from_config(config: &InsightConfig) -> Self {
        let user_id = config.user_id.clone().unwrap_or_else(|| {
            let generated = Uuid::new_v4().to_string();
            info!("No RBK_USER_ID set, using session identity {}", generated);
            generated
        });
        Self::new(
            Arc::new(HttpScoringClient::new(config)),
            open_store(&config.storage),
            ReportExporter::default(),
            user_id,
        )
    }

    /// Load locations and regions, then attach the live history view.
    pub async fn start(&self, config: &InsightConfig) -> InsightResult<()> {
        self.load_locations(&config.hierarchy_source).await;
        self.load_regions(&config.regions_path).await;
        self.attach_history().await
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: DashboardEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn post_notice(&self, session: &mut DashboardSession, message: &str, level: NoticeLevel, ttl: Option<Duration>) -> Notice {
        let notice = session.notices.push(message, level, ttl);
        self.publish(DashboardEvent::NoticePosted(notice.clone()));
        notice
    }

    /// Failure leaves every list empty and posts a notice; it never aborts.
    pub async fn load_locations(&self, source: &str) -> bool {
        let loaded = LocationHierarchy::load(source).await;
        let mut session = self.session.lock().await;
        match loaded {
            Ok(hierarchy) => {
                session.selection = SelectionState::new(hierarchy);
                true
            }
            Err(e) => {
                error!("Location hierarchy unavailable: {}", e);
                session.selection = SelectionState::default();
                self.post_notice(&mut session, notice::LOAD_FAILED, NoticeLevel::Error, Some(LOAD_FAILED_TTL));
                false
            }
        }
    }

    pub async fn load_regions(&self, path: &Path) {
        let regions = map::load_regions(path).await;
        self.session.lock().await.regions = regions;
    }

    /// Subscribe to the store's recent view. Updates flow through a channel
    /// into the session so the store's listener never blocks on the lock.
    pub async fn attach_history(&self) -> InsightResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PredictionRecord>>();
        let listener: HistoryListener = Arc::new(move |view: &[PredictionRecord]| {
            let _ = tx.send(view.to_vec());
        });

        let session = self.session.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(view) = rx.recv().await {
                let records = rows(&view);
                let total = view.len();
                session.lock().await.history = view;
                debug!("History view refreshed: {} records", total);
                let _ = events.send(DashboardEvent::HistoryUpdated { records, total });
            }
            debug!("History pump stopped");
        });

        let subscription = self.history.subscribe(HISTORY_LIMIT, listener).await?;
        if let Ok(mut slot) = self.subscription.lock() {
            if let Some(previous) = slot.replace(subscription) {
                self.history.unsubscribe(previous);
            }
        }
        info!("Live history attached (limit {})", HISTORY_LIMIT);
        Ok(())
    }

    /// Unregister the live history query. Safe to call more than once.
    pub fn shutdown(&self) {
        let taken = self.subscription.lock().ok().and_then(|mut slot| slot.take());
        if let Some(subscription) = taken {
            let removed = self.history.unsubscribe(subscription);
            info!("Live history detached (was registered: {})", removed);
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    pub async fn select_state(&self, state: &str) -> SessionSnapshot {
        let mut session = self.session.lock().await;
        session.selection.select_state(state);
        session.snapshot()
    }

    pub async fn select_mandal(&self, mandal: &str) -> SessionSnapshot {
        let mut session = self.session.lock().await;
        session.selection.select_mandal(mandal);
        session.snapshot()
    }

    pub async fn select_rbk(&self, rbk: &str) -> SessionSnapshot {
        let mut session = self.session.lock().await;
        session.selection.select_rbk(rbk);
        session.snapshot()
    }

    pub async fn update_inputs(&self, update: InputsUpdate) -> InsightResult<SessionSnapshot> {
        let mut session = self.session.lock().await;
        if let Some(quantity) = update.quantity {
            session.selection.set_quantity(quantity)?;
        }
        if let Some(season) = update.season {
            session.selection.set_season(season);
        }
        if let Some(farmers) = update.farmers {
            session.selection.set_farmers(farmers);
        }
        Ok(session.snapshot())
    }

    pub async fn selection_json(&self) -> serde_json::Value {
        self.session.lock().await.selection.selection_json()
    }

    /// Score the current selection and persist the result.
    ///
    /// Upstream failures are returned after the error notice is posted;
    /// history write failures are logged and do not affect the outcome.
    /// The work runs on its own task, so a caller that gives up (a dropped
    /// HTTP request) never leaves the session busy.
    pub async fn submit_prediction(&self) -> InsightResult<SubmitOutcome> {
        let selection = {
            let mut session = self.session.lock().await;
            if session.busy {
                debug!("Prediction already in flight, ignoring submit");
                return Ok(SubmitOutcome::Busy);
            }
            session.busy = true;
            session.prediction = None;
            session.selection.selection().clone()
        };
        self.publish(DashboardEvent::BusyChanged(true));
        self.publish(DashboardEvent::PredictionUpdated { prediction: None });

        let this = self.clone();
        match tokio::spawn(async move { this.run_prediction(selection).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Prediction task aborted: {}", e);
                self.session.lock().await.busy = false;
                self.publish(DashboardEvent::BusyChanged(false));
                Err(InsightError::Upstream(format!("prediction task failed: {e}")))
            }
        }
    }

    async fn run_prediction(&self, selection: Selection) -> InsightResult<SubmitOutcome> {
        info!(
            "Requesting prediction for {}/{}/{} ({})",
            selection.state, selection.mandal, selection.rbk, selection.season
        );
        let scored = self.scoring.predict(&selection).await;

        let outcome = match scored {
            Ok(prediction) => {
                self.session.lock().await.prediction = Some(prediction.clone());
                self.publish(DashboardEvent::PredictionUpdated {
                    prediction: Some(prediction.clone()),
                });

                let record = PredictionRecord::new(&selection, &prediction, &self.user_id, Utc::now());
                match self.history.append(record).await {
                    Ok(id) => debug!("Prediction stored as {}", id),
                    Err(e) => warn!("Prediction not stored: {}", e),
                }
                Ok(SubmitOutcome::Completed(prediction))
            }
            Err(e) => {
                error!("Prediction failed: {}", e);
                Err(e)
            }
        };

        let mut session = self.session.lock().await;
        session.busy = false;
        match &outcome {
            Ok(_) => self.post_notice(&mut session, notice::PREDICT_OK, NoticeLevel::Success, Some(PREDICT_OK_TTL)),
            Err(_) => self.post_notice(&mut session, notice::PREDICT_FAILED, NoticeLevel::Error, Some(PREDICT_FAILED_TTL)),
        };
        drop(session);
        self.publish(DashboardEvent::BusyChanged(false));
        outcome
    }

    /// Fire the retrain job. Prediction and history are untouched. Like
    /// submit, the request outlives a caller that stops waiting.
    pub async fn retrain(&self) -> InsightResult<()> {
        let pending = {
            let mut session = self.session.lock().await;
            self.post_notice(&mut session, notice::RETRAIN_SENDING, NoticeLevel::Info, None).id
        };

        let this = self.clone();
        match tokio::spawn(async move { this.run_retrain(pending).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!("Retrain task aborted: {}", e);
                self.session.lock().await.notices.dismiss(pending);
                Err(InsightError::Upstream(format!("retrain task failed: {e}")))
            }
        }
    }

    async fn run_retrain(&self, pending: u64) -> InsightResult<()> {
        let result = self.scoring.retrain().await;

        let mut session = self.session.lock().await;
        session.notices.dismiss(pending);
        match &result {
            Ok(()) => {
                info!("Retrain job accepted");
                self.post_notice(&mut session, notice::RETRAIN_OK, NoticeLevel::Success, Some(RETRAIN_RESULT_TTL));
            }
            Err(e) => {
                error!("Retrain failed: {}", e);
                self.post_notice(&mut session, notice::RETRAIN_FAILED, NoticeLevel::Error, Some(RETRAIN_RESULT_TTL));
            }
        }
        result
    }

    pub async fn explanations(&self) -> Vec<ContributionBar> {
        let session = self.session.lock().await;
        session
            .prediction
            .as_ref()
            .map(|p| chart_data(&p.contributions))
            .unwrap_or_default()
    }

    /// Drops the contributions; the predicted amount stays.
    pub async fn clear_explanations(&self) {
        let mut session = self.session.lock().await;
        if let Some(prediction) = session.prediction.as_mut() {
            prediction.contributions.clear();
        }
        let prediction = session.prediction.clone();
        self.post_notice(&mut session, notice::EXPLANATIONS_CLEARED, NoticeLevel::Info, Some(CLEARED_TTL));
        drop(session);
        self.publish(DashboardEvent::PredictionUpdated { prediction });
    }

    /// Project the live view through `filter`. Session state is untouched.
    pub async fn filtered_history(&self, filter: &HistoryFilter) -> Vec<HistoryRow> {
        let session = self.session.lock().await;
        rows(&filter.apply(&session.history))
    }

    pub async fn history_view(&self) -> Vec<PredictionRecord> {
        self.session.lock().await.history.clone()
    }

    /// Styled regions, or `None` when no polygons were loaded.
    pub async fn map_overlay(&self) -> Option<FeatureCollection> {
        let session = self.session.lock().await;
        let regions = session.regions.as_ref()?;
        let totals = map::aggregate_by_state(&session.history);
        Some(map::render(regions, &totals))
    }

    async fn report_layout(&self) -> InsightResult<ReportLayout> {
        let mut session = self.session.lock().await;
        let built = ReportLayout::build(session.selection.selection(), session.prediction.as_ref(), Utc::now());
        if let Err(InsightError::ExportPrecondition(_)) = &built {
            self.post_notice(
                &mut session,
                notice::EXPORT_NEEDS_PREDICTION,
                NoticeLevel::Error,
                Some(EXPORT_PRECONDITION_TTL),
            );
        }
        built
    }

    pub async fn report_preview(&self) -> InsightResult<String> {
        Ok(self.report_layout().await?.to_html())
    }

    /// Rasterize and paginate on the blocking pool.
    pub async fn export_report(&self) -> InsightResult<ReportFile> {
        let layout = self.report_layout().await?;
        let exporter = self.exporter.clone();
        tokio::task::spawn_blocking(move || exporter.export(&layout))
            .await
            .map_err(|e| InsightError::Render(format!("export task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Facet, MemoryHistoryStore};
    use crate::report::{ImagePdfAssembler, PageSize, Rasterizer};
    use async_trait::async_trait;
    use image::RgbaImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedScoring {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl ScoringBackend for FixedScoring {
        async fn predict(&self, _selection: &Selection) -> InsightResult<Prediction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(InsightError::Upstream("503".into()));
            }
            Ok(Prediction {
                amount: Some(42000.0),
                contributions: [("qty".to_string(), 3.0), ("farmers".to_string(), -1.0)].into_iter().collect(),
            })
        }

        async fn retrain(&self) -> InsightResult<()> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(InsightError::Upstream("500".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Blank;

    impl Rasterizer for Blank {
        fn rasterize(&self, layout: &ReportLayout) -> InsightResult<RgbaImage> {
            Ok(RgbaImage::new(1000, layout.height()))
        }
    }

    fn dashboard(fail: bool) -> (Dashboard, Arc<FixedScoring>) {
        slow_dashboard(fail, Duration::ZERO)
    }

    fn slow_dashboard(fail: bool, delay: Duration) -> (Dashboard, Arc<FixedScoring>) {
        let scoring = Arc::new(FixedScoring {
            calls: AtomicUsize::new(0),
            fail,
            delay,
        });
        let exporter = ReportExporter::new(Arc::new(Blank), Arc::new(ImagePdfAssembler), PageSize::A4_PORTRAIT);
        let dashboard = Dashboard::new(scoring.clone(), Arc::new(MemoryHistoryStore::new()), exporter, "tester");
        (dashboard, scoring)
    }

    async fn seed_locations(dashboard: &Dashboard) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hierarchy.json");
        tokio::fs::write(&path, r#"{"Guntur":{"Tenali":["Kollur","Angalakuduru"]},"Krishna":{"Nuzvid":["Agiripalli"]}}"#)
            .await
            .unwrap();
        assert!(dashboard.load_locations(path.to_str().unwrap()).await);
        dir
    }

    #[tokio::test]
    async fn test_load_selects_first_path() {
        let (dashboard, _) = dashboard(false);
        let _dir = seed_locations(&dashboard).await;
        let snapshot = dashboard.snapshot().await;
        assert_eq!(snapshot.states, vec!["Guntur", "Krishna"]);
        assert_eq!(snapshot.selection.rbk, "Kollur");

        let snapshot = dashboard.select_state("Krishna").await;
        assert_eq!(snapshot.mandals, vec!["Nuzvid"]);
        assert_eq!(snapshot.selection.rbk, "Agiripalli");
    }

    #[tokio::test]
    async fn test_failed_load_leaves_lists_empty() {
        let (dashboard, _) = dashboard(false);
        assert!(!dashboard.load_locations("/nonexistent/hierarchy.json").await);
        let snapshot = dashboard.snapshot().await;
        assert!(snapshot.states.is_empty() && snapshot.mandals.is_empty() && snapshot.rbks.is_empty());
        assert_eq!(snapshot.notices[0].message, notice::LOAD_FAILED);
        assert_eq!(snapshot.notices[0].ttl_ms, Some(4000));
    }

    #[tokio::test]
    async fn test_submit_busy_is_noop() {
        let (dashboard, scoring) = dashboard(false);
        dashboard.session.lock().await.busy = true;
        assert_eq!(dashboard.submit_prediction().await.unwrap(), SubmitOutcome::Busy);
        assert_eq!(scoring.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abandoned_submit_releases_busy() {
        let (dashboard, scoring) = slow_dashboard(false, Duration::from_millis(300));
        let first = tokio::time::timeout(Duration::from_millis(50), dashboard.submit_prediction()).await;
        assert!(first.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let snapshot = dashboard.snapshot().await;
        assert!(!snapshot.busy);
        assert_eq!(snapshot.amount_display, "Rs 42,000");

        let second = dashboard.submit_prediction().await.unwrap();
        assert!(matches!(second, SubmitOutcome::Completed(_)));
        assert_eq!(scoring.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_retrain_still_resolves_notice() {
        let (dashboard, _) = slow_dashboard(false, Duration::from_millis(300));
        assert!(tokio::time::timeout(Duration::from_millis(50), dashboard.retrain()).await.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let messages: Vec<_> = dashboard.snapshot().await.notices.into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec![notice::RETRAIN_OK]);
    }

    #[tokio::test]
    async fn test_failed_submit_clears_prior_prediction() {
        let (dashboard, _) = dashboard(true);
        dashboard.session.lock().await.prediction = Some(Prediction {
            amount: Some(1.0),
            ..Default::default()
        });
        assert!(matches!(dashboard.submit_prediction().await, Err(InsightError::Upstream(_))));
        let snapshot = dashboard.snapshot().await;
        assert!(snapshot.prediction.is_none());
        assert!(!snapshot.busy);
        assert_eq!(snapshot.notices.last().unwrap().message, notice::PREDICT_FAILED);
    }

    #[tokio::test]
    async fn test_export_requires_prediction() {
        let (dashboard, _) = dashboard(false);
        assert!(matches!(dashboard.export_report().await, Err(InsightError::ExportPrecondition(_))));
        let snapshot = dashboard.snapshot().await;
        assert_eq!(snapshot.notices.last().unwrap().message, notice::EXPORT_NEEDS_PREDICTION);

        let _dir = seed_locations(&dashboard).await;
        dashboard.submit_prediction().await.unwrap();
        let file = dashboard.export_report().await.unwrap();
        assert_eq!(file.file_name, "RBK_Prediction_Kollur.pdf");
    }

    #[tokio::test]
    async fn test_clear_explanations_keeps_amount() {
        let (dashboard, _) = dashboard(false);
        dashboard.submit_prediction().await.unwrap();
        assert_eq!(dashboard.explanations().await[0].name, "qty");
        dashboard.clear_explanations().await;
        assert!(dashboard.explanations().await.is_empty());
        assert_eq!(dashboard.snapshot().await.amount_display, "Rs 42,000");
    }

    #[tokio::test]
    async fn test_retrain_failure_posts_error_only() {
        let (dashboard, _) = dashboard(true);
        assert!(dashboard.retrain().await.is_err());
        let messages: Vec<_> = dashboard.snapshot().await.notices.into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec![notice::RETRAIN_FAILED]);
    }

    #[tokio::test]
    async fn test_history_filter_applies_to_live_view() {
        let (dashboard, _) = dashboard(false);
        let _dir = seed_locations(&dashboard).await;
        dashboard.attach_history().await.unwrap();
        let mut events = dashboard.subscribe_events();

        dashboard.submit_prediction().await.unwrap();
        loop {
            if let DashboardEvent::HistoryUpdated { total, .. } = events.recv().await.unwrap() {
                if total == 1 {
                    break;
                }
            }
        }

        while events.try_recv().is_ok() {}

        let hits = dashboard
            .filtered_history(&HistoryFilter {
                state: Facet::Only("Krishna".into()),
                ..Default::default()
            })
            .await;
        assert!(hits.is_empty());
        let hits = dashboard.filtered_history(&HistoryFilter::default()).await;
        assert_eq!(hits[0].record.submitted_by, "tester");
        assert_eq!(hits[0].amount_display, "Rs 42,000");

        // Filtering is a read; other clients hear nothing
        assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
        assert_eq!(dashboard.history_view().await.len(), 1);
        dashboard.shutdown();
    }

    #[test]
    fn test_history_row_formats_amount() {
        let selection = Selection {
            rbk: "Kollur".into(),
            ..Selection::default()
        };
        let prediction = Prediction {
            amount: Some(-1500.0),
            ..Default::default()
        };
        let record = PredictionRecord::new(&selection, &prediction, "tester", Utc::now());
        let row = HistoryRow::from(&record);
        assert_eq!(row.amount_display, "-Rs 1,500");

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["amount_display"], "-Rs 1,500");
        assert_eq!(json["rbk"], "Kollur");
        assert_eq!(json["userId"], "tester");
    }
}
