use axum::{
    extract::{ws::{Message as WsMessage, WebSocketUpgrade}, Json, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::InsightError;
use crate::history::{Facet, HistoryFilter};
use crate::location::Season;
use crate::session::{Dashboard, InputsUpdate, SubmitOutcome};

struct ServerError(InsightError);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InsightError::ExportPrecondition(_) => StatusCode::CONFLICT,
            InsightError::Upstream(_) => StatusCode::BAD_GATEWAY,
            InsightError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<InsightError> for ServerError {
    fn from(err: InsightError) -> Self {
        Self(err)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Dashboard,
    pub start_local: String,
}

#[derive(Deserialize)]
struct PathChoice {
    value: String,
}

#[derive(Deserialize, Default)]
struct HistoryQuery {
    search: Option<String>,
    state: Option<String>,
    season: Option<String>,
}

impl TryFrom<HistoryQuery> for HistoryFilter {
    type Error = InsightError;

    fn try_from(query: HistoryQuery) -> Result<Self, Self::Error> {
        Ok(HistoryFilter {
            search: query.search.unwrap_or_default(),
            state: Facet::<String>::parse(query.state.as_deref()),
            season: Facet::<Season>::parse(query.season.as_deref())?,
        })
    }
}

/// `attachment` header with a quoted ASCII fallback and the exact name in
/// RFC 5987 form.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/api/state", get(session_state))
        .route("/api/selection/state", post(select_state))
        .route("/api/selection/mandal", post(select_mandal))
        .route("/api/selection/rbk", post(select_rbk))
        .route("/api/selection/inputs", post(update_inputs))
        .route("/api/selection/json", get(selection_json))
        .route("/api/predict", post(predict))
        .route("/api/retrain", post(retrain))
        .route("/api/explanations", get(explanations))
        .route("/api/explanations/clear", post(clear_explanations))
        .route("/api/history", get(history))
        .route("/api/map", get(map_overlay))
        .route("/api/report", get(report))
        .route("/api/report/preview", get(report_preview))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C, then detach the live history query.
pub async fn run_server(state: AppState, addr: &str) -> Result<()> {
    let dashboard = state.dashboard.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("RBK Insight dashboard ready: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    dashboard.shutdown();
    info!("Dashboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn session_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dashboard.snapshot().await)
}

async fn select_state(State(state): State<AppState>, Json(choice): Json<PathChoice>) -> impl IntoResponse {
    Json(state.dashboard.select_state(&choice.value).await)
}

async fn select_mandal(State(state): State<AppState>, Json(choice): Json<PathChoice>) -> impl IntoResponse {
    Json(state.dashboard.select_mandal(&choice.value).await)
}

async fn select_rbk(State(state): State<AppState>, Json(choice): Json<PathChoice>) -> impl IntoResponse {
    Json(state.dashboard.select_rbk(&choice.value).await)
}

async fn update_inputs(
    State(state): State<AppState>,
    Json(update): Json<InputsUpdate>,
) -> Result<impl IntoResponse, ServerError> {
    Ok(Json(state.dashboard.update_inputs(update).await?))
}

async fn selection_json(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dashboard.selection_json().await)
}

async fn predict(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    let body = match state.dashboard.submit_prediction().await? {
        SubmitOutcome::Completed(prediction) => serde_json::json!({ "status": "completed", "prediction": prediction }),
        SubmitOutcome::Busy => serde_json::json!({ "status": "busy" }),
    };
    Ok(Json(body))
}

async fn retrain(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    state.dashboard.retrain().await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "started" }))))
}

async fn explanations(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dashboard.explanations().await)
}

async fn clear_explanations(State(state): State<AppState>) -> impl IntoResponse {
    state.dashboard.clear_explanations().await;
    Json(serde_json::json!({ "status": "cleared" }))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ServerError> {
    let filter = HistoryFilter::try_from(query)?;
    Ok(Json(state.dashboard.filtered_history(&filter).await))
}

async fn map_overlay(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dashboard.map_overlay().await)
}

async fn report(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    let file = state.dashboard.export_report().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&file.file_name)),
        ],
        file.bytes,
    ))
}

async fn report_preview(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    Ok(Html(state.dashboard.report_preview().await?))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| async move {
        let (mut sender, mut receiver) = socket.split();
        let mut rx = state.dashboard.subscribe_events();

        // Forward dashboard events until the client goes away
        let forward = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let msg = match serde_json::to_string(&event) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!("Unserializable dashboard event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("WebSocket client lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(_) => break,
                }
            }
        });

        // The page only listens; drain until close
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Close(_) = msg {
                break;
            }
        }
        forward.abort();
    })
}

async fn dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let user_id = html_escape::encode_text(state.dashboard.user_id()).to_string();
    let start_local = state.start_local.clone();

    // NOTE: HTML content uses double braces {{ }} for escaping in format! macro.
    Html(format!(r####"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>RBK Insight</title>
    <link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
    <script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
    <style>
        :root {{ --bg: #f4f7f4; --panel: #ffffff; --border: #dde5dd; --accent: #238b45; --danger: #c0392b; --info: #2c7fb8; --font-ui: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif; --font-mono: "SF Mono", monospace; }}
        body {{ background: var(--bg); color: #1b2b1b; font-family: var(--font-ui); margin: 0; }}
        header {{ background: var(--accent); color: #fff; display: flex; align-items: center; justify-content: space-between; padding: 10px 20px; }}
        .brand {{ font-weight: 700; letter-spacing: 1px; }}
        .meta {{ font-size: 11px; font-family: var(--font-mono); opacity: 0.8; }}
        .grid {{ display: grid; grid-template-columns: 320px 1fr; gap: 16px; padding: 16px; }}
        .panel {{ background: var(--panel); border: 1px solid var(--border); border-radius: 6px; padding: 14px; margin-bottom: 16px; }}
        .panel h3 {{ margin: 0 0 10px; font-size: 12px; text-transform: uppercase; letter-spacing: 1px; color: #557755; }}
        label {{ display: block; font-size: 12px; margin-top: 8px; color: #445544; }}
        select, input {{ width: 100%; box-sizing: border-box; padding: 6px; border: 1px solid var(--border); border-radius: 4px; }}
        .btn {{ background: var(--accent); border: none; color: #fff; padding: 7px 12px; font-size: 12px; border-radius: 4px; cursor: pointer; margin: 10px 6px 0 0; }}
        .btn.secondary {{ background: #667766; }}
        .btn:disabled {{ opacity: 0.5; cursor: wait; }}
        #amount {{ font-size: 36px; font-weight: 300; font-family: var(--font-mono); color: var(--accent); }}
        .bar-row {{ display: grid; grid-template-columns: 180px 1fr 70px; gap: 8px; align-items: center; font-size: 12px; margin: 3px 0; }}
        .bar {{ height: 12px; border-radius: 2px; }}
        table {{ border-collapse: collapse; width: 100%; font-size: 12px; }}
        th, td {{ border-bottom: 1px solid var(--border); padding: 6px; text-align: left; }}
        th {{ background: #eef3ee; text-transform: uppercase; font-size: 10px; color: #557755; }}
        #map {{ height: 360px; border-radius: 4px; }}
        #notices {{ position: fixed; right: 16px; bottom: 16px; display: flex; flex-direction: column; gap: 8px; }}
        .notice {{ color: #fff; padding: 10px 14px; border-radius: 4px; font-size: 13px; box-shadow: 0 2px 6px rgba(0,0,0,0.2); }}
        .notice.success {{ background: var(--accent); }} .notice.error {{ background: var(--danger); }} .notice.info {{ background: var(--info); }}
        .filters {{ display: grid; grid-template-columns: 2fr 1fr 1fr; gap: 8px; margin-bottom: 8px; }}
    </style>
</head>
<body>
    <header>
        <div class="brand">RBK INSIGHT</div>
        <div class="meta">USER {} &middot; SINCE {}</div>
    </header>

    <div class="grid">
        <div>
            <div class="panel">
                <h3>Location</h3>
                <label>State</label><select id="state" onchange="choose('state', this.value)"></select>
                <label>Mandal</label><select id="mandal" onchange="choose('mandal', this.value)"></select>
                <label>RBK</label><select id="rbk" onchange="choose('rbk', this.value)"></select>
                <label>Season</label>
                <select id="season" onchange="inputs({{ season: this.value }})"><option>Kharif</option><option>Rabi</option><option>Summer</option></select>
                <label>Quantity (MTs)</label><input id="qty" type="number" min="0" step="0.1" onchange="inputs({{ qty: parseFloat(this.value) }})">
                <label>Farmers</label><input id="farmers" type="number" min="0" step="1" onchange="inputs({{ farmers: parseInt(this.value, 10) }})">
                <button class="btn" id="predict-btn" onclick="predict()">Predict</button>
                <button class="btn secondary" onclick="retrain()">Retrain</button>
                <button class="btn secondary" onclick="copyJson()">Copy JSON</button>
            </div>
        </div>
        <div>
            <div class="panel">
                <h3>Predicted Amount</h3>
                <div id="amount">-</div>
                <button class="btn" onclick="window.location='/api/report'">Export PDF</button>
                <button class="btn secondary" onclick="window.open('/api/report/preview')">Preview</button>
            </div>
            <div class="panel">
                <h3>Feature Contributions</h3>
                <div id="shap"></div>
                <button class="btn secondary" onclick="clearShap()">Clear</button>
            </div>
            <div class="panel">
                <h3>Allocation Map</h3>
                <div id="map"></div>
            </div>
            <div class="panel">
                <h3>History</h3>
                <div class="filters">
                    <input id="search" placeholder="Search RBK, mandal or state" oninput="loadHistory()">
                    <select id="state-facet" onchange="loadHistory()"><option>All</option></select>
                    <select id="season-facet" onchange="loadHistory()"><option>All</option><option>Kharif</option><option>Rabi</option><option>Summer</option></select>
                </div>
                <table>
                    <thead><tr><th>Time</th><th>State</th><th>Mandal</th><th>RBK</th><th>Season</th><th>Qty</th><th>Farmers</th><th>Amount</th></tr></thead>
                    <tbody id="history"></tbody>
                </table>
            </div>
        </div>
    </div>
    <div id="notices"></div>

    <script>
        const map = L.map('map').setView([15.9, 79.7], 7);
        L.tileLayer('https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png', {{ attribution: '&copy; OpenStreetMap' }}).addTo(map);
        let overlay = null;

        async function api(path, body) {{
            const opts = body === undefined ? {{}} : {{ method: 'POST', headers: {{ 'Content-Type': 'application/json' }}, body: JSON.stringify(body) }};
            const res = await fetch(path, opts);
            const data = await res.json().catch(() => null);
            return {{ ok: res.ok, data }};
        }}

        function fill(id, values, current) {{
            const el = document.getElementById(id);
            el.innerHTML = '';
            values.forEach(v => {{ const o = document.createElement('option'); o.textContent = v; o.selected = v === current; el.appendChild(o); }});
        }}

        function render(s) {{
            fill('state', s.states, s.selection.state);
            fill('mandal', s.mandals, s.selection.mandal);
            fill('rbk', s.rbks, s.selection.rbk);
            const facet = document.getElementById('state-facet');
            if (facet.options.length !== s.states.length + 1) fill('state-facet', ['All'].concat(s.states), 'All');
            document.getElementById('season').value = s.selection.season;
            document.getElementById('qty').value = s.selection.qty;
            document.getElementById('farmers').value = s.selection.farmers;
            document.getElementById('amount').textContent = s.amount_display;
            document.getElementById('predict-btn').disabled = s.busy;
            s.notices.forEach(showNotice);
        }}

        const shown = new Set();
        function showNotice(n) {{
            if (shown.has(n.id)) return;
            shown.add(n.id);
            const div = document.createElement('div');
            div.className = 'notice ' + n.level;
            div.textContent = n.message;
            document.getElementById('notices').appendChild(div);
            setTimeout(() => div.remove(), n.ttl_ms === null ? 10000 : n.ttl_ms);
        }}

        function renderShap(bars) {{
            const el = document.getElementById('shap');
            el.innerHTML = '';
            const max = Math.max(1e-9, ...bars.map(b => Math.abs(b.value)));
            bars.forEach(b => {{
                const row = document.createElement('div');
                row.className = 'bar-row';
                const name = document.createElement('span'); name.textContent = b.name;
                const bar = document.createElement('div'); bar.className = 'bar';
                bar.style.width = Math.min(100, Math.abs(b.value) / max * 100) + '%';
                bar.style.background = b.value >= 0 ? '#238b45' : '#c0392b';
                const val = document.createElement('span'); val.textContent = b.value.toFixed(2);
                row.append(name, bar, val);
                el.appendChild(row);
            }});
        }}

        function renderHistory(records) {{
            const body = document.getElementById('history');
            body.innerHTML = '';
            records.forEach(r => {{
                const tr = document.createElement('tr');
                [new Date(r.timestamp).toLocaleString(), r.state, r.mandal, r.rbk, r.season, r.qty, r.farmers, r.amount_display].forEach(v => {{
                    const td = document.createElement('td'); td.textContent = v; tr.appendChild(td);
                }});
                body.appendChild(tr);
            }});
        }}

        async function refresh() {{ const r = await api('/api/state'); if (r.ok) render(r.data); }}
        async function choose(level, value) {{ const r = await api('/api/selection/' + level, {{ value }}); if (r.ok) render(r.data); }}
        async function inputs(update) {{ const r = await api('/api/selection/inputs', update); if (r.ok) render(r.data); else refresh(); }}
        async function predict() {{ await api('/api/predict', {{}}); await refresh(); loadShap(); loadMap(); }}
        async function retrain() {{ await api('/api/retrain', {{}}); refresh(); }}
        async function clearShap() {{ await api('/api/explanations/clear', {{}}); loadShap(); refresh(); }}
        async function loadShap() {{ const r = await api('/api/explanations'); if (r.ok) renderShap(r.data); }}
        async function copyJson() {{ const r = await api('/api/selection/json'); if (r.ok) navigator.clipboard.writeText(JSON.stringify(r.data, null, 2)); }}

        async function loadHistory() {{
            const q = new URLSearchParams({{
                search: document.getElementById('search').value,
                state: document.getElementById('state-facet').value,
                season: document.getElementById('season-facet').value,
            }});
            const r = await api('/api/history?' + q);
            if (r.ok) renderHistory(r.data);
        }}

        async function loadMap() {{
            const r = await api('/api/map');
            if (!r.ok || !r.data) return;
            if (overlay) map.removeLayer(overlay);
            overlay = L.geoJSON(r.data, {{
                style: f => f.properties.style,
                onEachFeature: (f, layer) => layer.bindPopup(f.properties.popup),
            }}).addTo(map);
        }}

        const ws = new WebSocket('ws://' + location.host + '/ws');
        ws.onmessage = (e) => {{
            let event;
            try {{ event = JSON.parse(e.data); }} catch (err) {{ return; }}
            if (event.type === 'HistoryUpdated') {{ loadHistory(); loadMap(); }}
            else if (event.type === 'NoticePosted') {{ showNotice(event.payload); }}
            else if (event.type === 'BusyChanged') {{ document.getElementById('predict-btn').disabled = event.payload; }}
            else if (event.type === 'PredictionUpdated') {{ loadShap(); refresh(); }}
        }};

        refresh().then(() => {{ loadHistory(); loadShap(); loadMap(); }});
    </script>
</body>
</html>"####, user_id, start_local))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_is_header_safe() {
        let value = content_disposition("RBK_Prediction_Ko\"l\u{7}lur\\ ప.pdf");
        assert!(value.starts_with("attachment; filename=\"RBK_Prediction_Ko_l_lur_ _.pdf\";"));
        assert!(value.ends_with("filename*=UTF-8''RBK_Prediction_Ko%22l%07lur%5C%20%E0%B0%AA.pdf"));
        assert!(axum::http::HeaderValue::from_str(&value).is_ok());
    }

    #[test]
    fn test_unknown_season_query_is_rejected() {
        let query = HistoryQuery {
            season: Some("Monsoon".into()),
            ..HistoryQuery::default()
        };
        assert!(matches!(HistoryFilter::try_from(query), Err(InsightError::Config(_))));
    }
}
