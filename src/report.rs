//! Console report and file exports

use crate::alerts::{Alert, SignalWindow};
use crate::config::DetectorConfig;
use crate::scan_types::{Engine, Grade};
use crate::scanner::UniverseScan;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::Path;

const WIDE: usize = 80;

/// Header printed before a scan
pub fn render_header(engine: Engine, period: &str, interval: &str, fetch_missing: bool) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let rule = "=".repeat(WIDE);
    writeln!(out, "\n{}", rule)?;
    match engine {
        Engine::Classic => writeln!(out, "   LIQUIDITY GRAB SCANNER")?,
        Engine::Scored => {
            writeln!(out, "   [*] LIQUIDITY GRAB SCANNER (SCORED)")?;
            writeln!(out, "   {}", "-".repeat(50))?;
            writeln!(out, "   [+] Features: Volume Spike | Wick Analysis | Signal Scoring")?;
        }
    }
    writeln!(out, "   Period: {} | Timeframes: {}", period, interval.to_uppercase())?;
    writeln!(
        out,
        "   Cache: ON{}",
        if fetch_missing { " (fetching missing tickers)" } else { "" }
    )?;
    writeln!(out, "{}\n", rule)?;
    Ok(out)
}

/// Group alerts by calendar day, each day sorted by score (highest first)
pub fn group_by_day(alerts: &[Alert]) -> BTreeMap<chrono::NaiveDate, Vec<&Alert>> {
    let mut by_day: BTreeMap<chrono::NaiveDate, Vec<&Alert>> = BTreeMap::new();
    for alert in alerts {
        by_day.entry(alert.day).or_default().push(alert);
    }
    for day in by_day.values_mut() {
        day.sort_by(|a, b| b.total_score().total_cmp(&a.total_score()));
    }
    by_day
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GradeCounts {
    pub a_plus: usize,
    pub b: usize,
    pub c: usize,
}

impl GradeCounts {
    pub fn tally<'a>(alerts: impl IntoIterator<Item = &'a Alert>) -> Self {
        let mut counts = Self::default();
        for alert in alerts {
            match alert.grade() {
                Some(Grade::APlus) => counts.a_plus += 1,
                Some(Grade::B) => counts.b += 1,
                Some(_) => counts.c += 1,
                None => {}
            }
        }
        counts
    }
}

/// Date-sectioned signal report for the last `window.days` days
pub fn render_report(
    alerts: &[Alert],
    engine: Engine,
    window: &SignalWindow,
    stocks_scanned: usize,
    cfg: &DetectorConfig,
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let rule = "=".repeat(WIDE);

    writeln!(out, "\n{}", rule)?;
    writeln!(out, "[*] LIQUIDITY GRAB SIGNALS (Last {} Days)", window.days)?;
    writeln!(out, "{}\n", rule)?;

    if alerts.is_empty() {
        writeln!(out, "   (No liquidity grabs detected in last {} days)", window.days)?;
        writeln!(out, "   Stocks Scanned: {}", stocks_scanned)?;
        writeln!(out, "\n{}\n", rule)?;
        return Ok(out);
    }

    let by_day = group_by_day(alerts);
    let mut total = 0;

    for day in window.days_desc() {
        let marker = if day == window.today { " <<< [TODAY]" } else { "" };
        writeln!(out, "   [{}]{}", day.format("%d-%b-%Y"), marker)?;
        writeln!(out, "   {}", "-".repeat(WIDE - 4))?;

        match by_day.get(&day) {
            Some(day_alerts) => {
                for alert in day_alerts {
                    writeln!(out, "{}", alert.line())?;
                    if let Some(details) = alert.details_line() {
                        writeln!(out, "{}", details)?;
                    }
                    total += 1;
                }
            }
            None => writeln!(out, "   (No signals)")?,
        }
        writeln!(out)?;
    }

    writeln!(out, "{}", rule)?;
    writeln!(out, "[SUMMARY]")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "   Total Signals: {}", total)?;

    if engine == Engine::Scored {
        let in_window: Vec<&Alert> = alerts.iter().filter(|a| window.contains(a.day)).collect();
        let counts = GradeCounts::tally(in_window);
        writeln!(out, "   [A+] Grade A+ (Score >= {}): {}", cfg.grade_a_min_score, counts.a_plus)?;
        writeln!(out, "   [B]  Grade B  (Score >= {}): {}", cfg.grade_b_min_score, counts.b)?;
        writeln!(out, "   [C]  Grade C  (Score >= {}): {}", cfg.grade_c_min_score, counts.c)?;
    }
    writeln!(out, "   Stocks Scanned: {}", stocks_scanned)?;
    writeln!(out, "{}", rule)?;

    if engine == Engine::Scored {
        writeln!(out, "\n[SIGNAL QUALITY GUIDE]")?;
        writeln!(
            out,
            "   [A+] Grade ({}-100): EXCEPTIONAL - High volume + Strong wick + All confirmations",
            cfg.grade_a_min_score
        )?;
        writeln!(
            out,
            "   [B]  Grade ({}-{}):  GOOD - Decent setup, tradeable",
            cfg.grade_b_min_score,
            cfg.grade_a_min_score - 1.0
        )?;
        writeln!(
            out,
            "   [C]  Grade ({}-{}):  WEAK - Missing confirmations, be cautious",
            cfg.grade_c_min_score,
            cfg.grade_b_min_score - 1.0
        )?;
        writeln!(out, "\n[SCORE BREAKDOWN]")?;
        writeln!(out, "   Volume (Max {}pts): [FIRE]=75%+ [OK]=50%+ [LOW]=Below", cfg.volume_weight)?;
        writeln!(out, "   Wick   (Max {}pts): [HIT]=75%+ [OK]=50%+ [LOW]=Below", cfg.wick_weight)?;
        writeln!(out, "   Candle (Max {}pts): [BULL]=Bullish [BEAR]=Bearish", cfg.bullish_body_weight)?;
        writeln!(out, "   Depth  (Max {}pts): Optimal 0.5-1.5%", cfg.depth_weight)?;
        writeln!(
            out,
            "   Context(Max {}pts): [EQL]=Equal Lows, [HAMMER], [DRAGONFLY]",
            cfg.context_weight
        )?;
    }

    writeln!(out, "\n{}\n", rule)?;
    Ok(out)
}

// ============================================
// EXPORTS
// ============================================

fn universe_rows(universes: &[UniverseScan]) -> impl Iterator<Item = (&str, &Alert)> {
    universes
        .iter()
        .flat_map(|u| u.alerts.iter().map(move |a| (u.name.as_str(), a)))
}

/// Flat table of alerts, one row per signal and list
pub fn alerts_frame(universes: &[UniverseScan]) -> PolarsResult<DataFrame> {
    let rows: Vec<(&str, &Alert)> = universe_rows(universes).collect();

    let universe: Vec<&str> = rows.iter().map(|(u, _)| *u).collect();
    let ticker: Vec<&str> = rows.iter().map(|(_, a)| a.ticker.as_str()).collect();
    let timeframe: Vec<&str> = rows.iter().map(|(_, a)| a.timeframe.interval()).collect();
    let date: Vec<String> = rows.iter().map(|(_, a)| a.day.format("%Y-%m-%d").to_string()).collect();
    let time: Vec<&str> = rows.iter().map(|(_, a)| a.time.as_str()).collect();
    let close: Vec<f64> = rows.iter().map(|(_, a)| a.close).collect();
    let swing: Vec<f64> = rows.iter().map(|(_, a)| a.swing_level).collect();
    let depth: Vec<f64> = rows.iter().map(|(_, a)| a.depth).collect();
    let grade: Vec<Option<String>> = rows.iter().map(|(_, a)| a.grade().map(|g| g.to_string())).collect();
    let score: Vec<Option<f64>> = rows.iter().map(|(_, a)| a.score.as_ref().map(|s| s.total)).collect();
    let details: Vec<Option<&str>> = rows.iter().map(|(_, a)| a.details.as_deref()).collect();

    df!(
        "universe" => universe,
        "ticker" => ticker,
        "timeframe" => timeframe,
        "date" => date,
        "time" => time,
        "close" => close,
        "swing_level" => swing,
        "depth_pct" => depth,
        "grade" => grade,
        "score" => score,
        "details" => details,
    )
}

pub fn alerts_csv(universes: &[UniverseScan]) -> PolarsResult<Vec<u8>> {
    let mut df = alerts_frame(universes)?;
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf).include_header(true).finish(&mut df)?;
    Ok(buf)
}

/// Alerts keyed by list name, then by ticker
pub fn alerts_by_universe(universes: &[UniverseScan]) -> BTreeMap<&str, BTreeMap<&str, Vec<&Alert>>> {
    let mut grouped: BTreeMap<&str, BTreeMap<&str, Vec<&Alert>>> = BTreeMap::new();
    for (universe, alert) in universe_rows(universes) {
        grouped
            .entry(universe)
            .or_default()
            .entry(alert.ticker.as_str())
            .or_default()
            .push(alert);
    }
    grouped
}

/// Plain text listing, one section per list with signals
pub fn alerts_text(universes: &[UniverseScan]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "LIQUIDITY GRAB SIGNALS")?;
    writeln!(out, "{}\n", "=".repeat(70))?;

    for (universe, tickers) in alerts_by_universe(universes) {
        writeln!(out, "\n{}", universe)?;
        writeln!(out, "{}", "-".repeat(70))?;
        for alert in tickers.values().flatten() {
            writeln!(out, "{}", alert.line())?;
            if let Some(details) = alert.details_line() {
                writeln!(out, "{}", details)?;
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Text,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|s| s.to_str()).map(|s| s.to_lowercase()) {
            Some(ext) if ext == "csv" => Some(ExportFormat::Csv),
            Some(ext) if ext == "json" => Some(ExportFormat::Json),
            Some(ext) if ext == "txt" => Some(ExportFormat::Text),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Text => "text/plain; charset=utf-8",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ExportFormat::Csv => "liquidity_signals.csv",
            ExportFormat::Json => "liquidity_signals.json",
            ExportFormat::Text => "liquidity_signals.txt",
        }
    }

    pub fn render(self, universes: &[UniverseScan]) -> anyhow::Result<Vec<u8>> {
        Ok(match self {
            ExportFormat::Csv => alerts_csv(universes)?,
            ExportFormat::Json => serde_json::to_vec_pretty(&alerts_by_universe(universes))?,
            ExportFormat::Text => alerts_text(universes)?.into_bytes(),
        })
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" => Ok(ExportFormat::Text),
            other => Err(format!("unsupported export format: {other}")),
        }
    }
}

pub fn export_alerts(path: &Path, universes: &[UniverseScan]) -> anyhow::Result<()> {
    let format = ExportFormat::from_path(path)
        .ok_or_else(|| anyhow::anyhow!("export path must end in .csv, .json or .txt: {:?}", path))?;
    std::fs::write(path, format.render(universes)?)?;
    tracing::info!(
        "Exported {} signals to {:?}",
        universes.iter().map(|u| u.alerts.len()).sum::<usize>(),
        path
    );
    Ok(())
}
