//! Scanner - parallel liquidity grab scan across ticker universes

use crate::alerts::{build_alerts, Alert, SignalWindow, MAX_LOOKBACK_DAYS};
use crate::cache::CacheDir;
use crate::config::{Config, DetectorConfig};
use crate::data::{DataStore, TickerData};
use crate::detector::detect;
use crate::scan_types::{Engine, Timeframe};
use crate::universe::{Universe, UniverseKind};
use chrono_tz::Tz;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Where candles come from: the in-memory store or the cache directory
pub trait CandleSource: Sync {
    fn candles(&self, ticker: &str) -> Option<Arc<TickerData>>;
}

impl CandleSource for DataStore {
    fn candles(&self, ticker: &str) -> Option<Arc<TickerData>> {
        self.get(ticker)
    }
}

impl CandleSource for CacheDir {
    fn candles(&self, ticker: &str) -> Option<Arc<TickerData>> {
        self.load(ticker).map(Arc::new)
    }
}

/// Scan request as sent by the dashboard
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    /// Scan every list of this kind when `files` is empty
    #[serde(default)]
    pub kind: Option<UniverseKind>,
    /// List selectors: path, file stem or label
    #[serde(default)]
    pub files: Vec<String>,
    pub engine: Option<Engine>,
    /// Signal window in days; 0 disables the window
    pub days: Option<i64>,
    pub timeframe: Option<Timeframe>,
    pub detector: Option<DetectorConfig>,
}

/// Everything a scan needs besides the candles
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub engine: Engine,
    pub detector: DetectorConfig,
    pub timeframe: Timeframe,
    pub tz: Tz,
    pub window: Option<SignalWindow>,
    pub period: String,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let tz = config.tz_parsed()?;
        Ok(Self {
            engine: config.engine,
            detector: config.detector.clone(),
            timeframe: config.timeframe,
            tz,
            window: config
                .filter_recent
                .then(|| SignalWindow::ending_today(tz, config.lookback_days)),
            period: config.period.clone(),
        })
    }

    /// Request fields override the configured defaults
    pub fn with_request(mut self, request: &ScanRequest) -> anyhow::Result<Self> {
        if let Some(engine) = request.engine {
            self.engine = engine;
        }
        if let Some(timeframe) = request.timeframe {
            self.timeframe = timeframe;
        }
        if let Some(detector) = &request.detector {
            self.detector = detector.clone();
        }
        match request.days {
            Some(days) if !(0..=MAX_LOOKBACK_DAYS).contains(&days) => {
                anyhow::bail!("days must be between 0 and {}, got {}", MAX_LOOKBACK_DAYS, days)
            }
            Some(0) => self.window = None,
            Some(days) => self.window = Some(SignalWindow::ending_today(self.tz, days)),
            None => {}
        }
        Ok(self)
    }
}

/// Signals for one universe, newest first
#[derive(Debug, Clone, Serialize)]
pub struct UniverseScan {
    pub kind: UniverseKind,
    pub name: String,
    pub label: String,
    pub scanned: usize,
    /// Tickers in the list with no candles available
    pub missing: usize,
    pub stocks_with_signals: usize,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub universes_scanned: usize,
    pub universes_with_signals: usize,
    pub signal_count: usize,
    /// Summed per universe, so a ticker listed twice counts twice
    pub stocks_with_signals: usize,
    /// Distinct tickers with candles
    pub stocks_scanned: usize,
    pub period: String,
    pub engine: Engine,
    pub timeframe: Timeframe,
    pub scan_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub universes: Vec<UniverseScan>,
    pub summary: ScanSummary,
}

impl ScanResult {
    /// All alerts, one per ticker and bar
    pub fn unique_alerts(&self) -> Vec<Alert> {
        let mut seen = HashSet::new();
        self.universes
            .iter()
            .flat_map(|u| u.alerts.iter())
            .filter(|a| seen.insert((a.ticker.clone(), a.bar_date.clone())))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub universe: String,
    pub done: usize,
    pub total: usize,
    pub signals: usize,
}

/// Detect and date the grabs of a single ticker
pub fn scan_ticker(ticker: &str, data: &TickerData, settings: &ScanSettings) -> Vec<Alert> {
    let grabs = detect(settings.engine, data, &settings.detector);
    build_alerts(
        ticker,
        data,
        &grabs,
        settings.timeframe,
        settings.tz,
        settings.window.as_ref(),
    )
}

type Memo = Mutex<HashMap<String, Option<Vec<Alert>>>>;

fn scan_cached(ticker: &str, source: &dyn CandleSource, settings: &ScanSettings, memo: &Memo) -> Option<Vec<Alert>> {
    if let Ok(guard) = memo.lock() {
        if let Some(hit) = guard.get(ticker) {
            return hit.clone();
        }
    }

    let result = source
        .candles(ticker)
        .map(|data| scan_ticker(ticker, &data, settings));

    if let Ok(mut guard) = memo.lock() {
        guard.insert(ticker.to_string(), result.clone());
    }
    result
}

/// Scan one universe in parallel
fn scan_universe(
    universe: &Universe,
    tickers: &[String],
    source: &dyn CandleSource,
    settings: &ScanSettings,
    memo: &Memo,
) -> UniverseScan {
    let results: Vec<Option<Vec<Alert>>> = tickers
        .par_iter()
        .map(|ticker| scan_cached(ticker, source, settings, memo))
        .collect();

    let missing = results.iter().filter(|r| r.is_none()).count();
    let scanned = results.len() - missing;
    let stocks_with_signals = results
        .iter()
        .filter(|r| r.as_ref().map(|a| !a.is_empty()).unwrap_or(false))
        .count();

    let mut alerts: Vec<Alert> = results.into_iter().flatten().flatten().collect();
    alerts.sort_by(|a, b| {
        b.day
            .cmp(&a.day)
            .then(b.total_score().total_cmp(&a.total_score()))
            .then(a.ticker.cmp(&b.ticker))
    });

    UniverseScan {
        kind: universe.kind,
        name: universe.name.clone(),
        label: universe.label.clone(),
        scanned,
        missing,
        stocks_with_signals,
        alerts,
    }
}

/// Run a scan across the given universes, reporting progress after each one
pub fn run_scan(
    source: &dyn CandleSource,
    universes: &[Universe],
    settings: &ScanSettings,
    progress: &(dyn Fn(ScanProgress) + Sync),
) -> ScanResult {
    let start = std::time::Instant::now();
    let memo: Memo = Mutex::new(HashMap::new());
    let total = universes.len();

    let mut scans = Vec::with_capacity(total);
    for (i, universe) in universes.iter().enumerate() {
        let tickers = match universe.tickers() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", universe.label, e);
                Vec::new()
            }
        };

        let scan = scan_universe(universe, &tickers, source, settings, &memo);
        if scan.missing > 0 {
            tracing::info!("{}: {} tickers not in cache", scan.label, scan.missing);
        }
        progress(ScanProgress {
            universe: scan.label.clone(),
            done: i + 1,
            total,
            signals: scan.alerts.len(),
        });
        scans.push(scan);
    }

    let stocks_scanned = memo
        .lock()
        .map(|m| m.values().filter(|r| r.is_some()).count())
        .unwrap_or(0);
    let scan_time_ms = start.elapsed().as_millis() as u64;

    let summary = ScanSummary {
        universes_scanned: scans.len(),
        universes_with_signals: scans.iter().filter(|s| !s.alerts.is_empty()).count(),
        signal_count: scans.iter().map(|s| s.alerts.len()).sum(),
        stocks_with_signals: scans.iter().map(|s| s.stocks_with_signals).sum(),
        stocks_scanned,
        period: settings.period.clone(),
        engine: settings.engine,
        timeframe: settings.timeframe,
        scan_time_ms,
    };

    tracing::info!(
        "Scan complete: {} signals across {} universes ({} stocks) in {}ms",
        summary.signal_count,
        summary.universes_with_signals,
        summary.stocks_scanned,
        scan_time_ms
    );

    ScanResult { universes: scans, summary }
}
