//! Web server - Axum with WebSocket support for streaming scan progress

use crate::cache::CacheDir;
use crate::config::{Config, DetectorConfig};
use crate::data::DataStore;
use crate::report;
use crate::scan_types::{Engine, EngineInfo, ScanParam};
use crate::scanner::{run_scan, ScanProgress, ScanRequest, ScanResult, ScanSettings};
use crate::universe::{self, Universe};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// Application state
pub struct AppState {
    pub data_store: RwLock<DataStore>,
    pub config: Config,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: msg.into() }))
}

fn load_store(config: &Config) -> DataStore {
    let mut store = DataStore::new();
    if let Err(e) = store.load_directory(&config.cache_dir, &config.period, config.timeframe) {
        tracing::warn!("Could not load cache: {}", e);
        tracing::info!("Run `liquidity-scanner cache build` to populate {:?}", config.cache_dir);
    }
    store
}

pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/universes", get(get_universes))
        .route("/api/engines", get(get_engines))
        .route("/api/tickers", get(get_tickers))
        .route("/api/ticker/:ticker", get(get_ticker_data))
        .route("/api/scan", post(run_scan_handler))
        .route("/api/scan/export", post(export_handler))
        .route("/api/scan/ws", get(scan_ws_handler))
        .route("/api/reload", post(reload_handler));

    if state.config.frontend_dir.is_dir() {
        router = router.fallback_service(
            ServeDir::new(&state.config.frontend_dir).append_index_html_on_directories(true),
        );
    }

    router
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

/// Run the web server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || load_store(&config)).await?
    };
    let addr = config.bind_addr;

    let state = Arc::new(AppState {
        data_store: RwLock::new(store),
        config,
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server running at http://{}", addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

// ============================================
// HANDLERS
// ============================================

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct UniverseInfo {
    #[serde(flatten)]
    universe: Universe,
    tickers: usize,
}

async fn get_universes(State(state): State<Arc<AppState>>) -> Json<Vec<UniverseInfo>> {
    let infos = universe::discover_all(&state.config)
        .into_iter()
        .map(|u| UniverseInfo {
            tickers: u.tickers().map(|t| t.len()).unwrap_or(0),
            universe: u,
        })
        .collect();
    Json(infos)
}

async fn get_engines() -> Json<Vec<EngineInfo>> {
    let d = DetectorConfig::default();
    let param = |name: &str, param_type: &str, default: serde_json::Value, description: &str| ScanParam {
        name: name.into(),
        param_type: param_type.into(),
        default,
        description: description.into(),
    };

    Json(vec![
        EngineInfo {
            id: Engine::Classic,
            name: "Classic".into(),
            description: "Three-bar swing low swept within 4 bars and closed back above".into(),
            params: vec![],
        },
        EngineInfo {
            id: Engine::Scored,
            name: "Scored".into(),
            description: "Swing sweep scored on volume, wick, candle, depth and context".into(),
            params: vec![
                param("swing_left", "number", d.swing_left.into(), "Bars left of the swing"),
                param("swing_right", "number", d.swing_right.into(), "Bars right of the swing"),
                param("min_volume_spike", "number", d.min_volume_spike.into(), "Relative volume for a spike"),
                param("min_wick_ratio", "number", d.min_wick_ratio.into(), "Lower wick share of range"),
                param(
                    "require_bullish_candle",
                    "boolean",
                    d.require_bullish_candle.into(),
                    "Skip bearish grab bars without a strong wick or confirmation",
                ),
                param("two_candle_confirm", "boolean", d.two_candle_confirm.into(), "Accept a bullish follow-up bar"),
                param("grab_lookahead", "number", d.grab_lookahead.into(), "Bars searched after the swing"),
                param("grade_c_min_score", "number", d.grade_c_min_score.into(), "Lowest score reported"),
            ],
        },
    ])
}

async fn get_tickers(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    let store = state.data_store.read().await;
    Json(store.get_tickers().to_vec())
}

#[derive(Deserialize)]
struct TickerQuery {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Serialize)]
struct TickerResponse {
    ticker: String,
    data: Vec<OHLCVPoint>,
}

#[derive(Serialize)]
struct OHLCVPoint {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

async fn get_ticker_data(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(query): Query<TickerQuery>,
) -> Result<Json<TickerResponse>, ApiError> {
    let store = state.data_store.read().await;

    let data = store
        .get(&ticker)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("{} is not in the cache", ticker)))?;

    let in_range = |date: &String| {
        query.from.as_ref().map_or(true, |from| date >= from) && query.to.as_ref().map_or(true, |to| date <= to)
    };

    let mut points: Vec<OHLCVPoint> = data
        .date
        .iter()
        .enumerate()
        .filter(|(_, date)| in_range(date))
        .map(|(i, date)| OHLCVPoint {
            date: date.clone(),
            open: data.open[i],
            high: data.high[i],
            low: data.low[i],
            close: data.close[i],
            volume: data.volume[i],
        })
        .collect();

    points.sort_by(|a, b| a.date.cmp(&b.date));

    Ok(Json(TickerResponse {
        ticker: ticker.to_uppercase(),
        data: points,
    }))
}

fn select_universes(config: &Config, request: &ScanRequest) -> Result<Vec<Universe>, ApiError> {
    let universes = if !request.files.is_empty() {
        request
            .files
            .iter()
            .map(|sel| {
                universe::resolve(config, sel)
                    .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("unknown ticker list: {}", sel)))
            })
            .collect::<Result<Vec<_>, _>>()?
    } else {
        match request.kind {
            Some(kind) => universe::discover(config, kind),
            None => universe::discover_all(config),
        }
    };

    if universes.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "no ticker lists selected"));
    }
    Ok(universes)
}

async fn execute_scan(
    state: Arc<AppState>,
    request: ScanRequest,
    progress: Option<mpsc::UnboundedSender<ScanProgress>>,
) -> Result<ScanResult, ApiError> {
    let universes = select_universes(&state.config, &request)?;
    let settings = ScanSettings::from_config(&state.config)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .with_request(&request)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    // run_scan uses Rayon (blocking), so run it on the blocking thread pool
    tokio::task::spawn_blocking(move || {
        let report = |p: ScanProgress| {
            if let Some(tx) = &progress {
                let _ = tx.send(p);
            }
        };

        if settings.timeframe == state.config.timeframe {
            let store = state.data_store.blocking_read();
            run_scan(&*store, &universes, &settings, &report)
        } else {
            let source = CacheDir {
                timeframe: settings.timeframe,
                ..CacheDir::from_config(&state.config)
            };
            run_scan(&source, &universes, &settings, &report)
        }
    })
    .await
    .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "Scan task panicked"))
}

async fn run_scan_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResult>, ApiError> {
    execute_scan(state, request, None).await.map(Json)
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn export_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
    Json(request): Json<ScanRequest>,
) -> Result<Response, ApiError> {
    let format: report::ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("csv")
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;

    let result = execute_scan(state, request, None).await?;
    let body = format
        .render(&result.universes)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", format.file_name()),
            ),
        ],
        body,
    )
        .into_response())
}

/// Events pushed over the scan socket
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ScanEvent {
    Progress(ScanProgress),
    Result(ScanResult),
    Error { error: String },
}

async fn scan_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_scan_socket(socket, state))
}

async fn send_event(socket: &mut WebSocket, event: &ScanEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::warn!("Could not encode scan event: {}", e);
            false
        }
    }
}

async fn handle_scan_socket(mut socket: WebSocket, state: Arc<AppState>) {
    // The client opens with a single scan request
    let parsed = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => break serde_json::from_str::<ScanRequest>(&text),
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!("Scan socket closed: {}", e);
                return;
            }
        }
    };

    let request = match parsed {
        Ok(r) => r,
        Err(e) => {
            send_event(&mut socket, &ScanEvent::Error { error: e.to_string() }).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let scan = tokio::spawn(execute_scan(state, request, Some(tx)));

    while let Some(progress) = rx.recv().await {
        if !send_event(&mut socket, &ScanEvent::Progress(progress)).await {
            // client went away; let the scan finish in the background
            return;
        }
    }

    let event = match scan.await {
        Ok(Ok(result)) => ScanEvent::Result(result),
        Ok(Err((_, Json(err)))) => ScanEvent::Error { error: err.error },
        Err(e) => ScanEvent::Error { error: e.to_string() },
    };
    send_event(&mut socket, &event).await;
    let _ = socket.send(Message::Close(None)).await;
}

#[derive(Serialize)]
struct ReloadResponse {
    tickers: usize,
}

async fn reload_handler(State(state): State<Arc<AppState>>) -> Result<Json<ReloadResponse>, ApiError> {
    let config = state.config.clone();
    let store = tokio::task::spawn_blocking(move || load_store(&config))
        .await
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "Reload task panicked"))?;

    let tickers = store.get_tickers().len();
    *state.data_store.write().await = store;
    tracing::info!("Reloaded {} tickers", tickers);
    Ok(Json(ReloadResponse { tickers }))
}
