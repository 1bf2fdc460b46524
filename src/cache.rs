//! On-disk candle cache: layout, full rebuilds, incremental updates

use crate::config::Config;
use crate::data::{load_csv, save_csv, TickerData};
use crate::error::CacheError;
use crate::fetch::YahooClient;
use crate::scan_types::Timeframe;
use crate::universe::{self, Universe};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// `{TICKER}_{period}_{interval}.csv`
pub fn cache_file_name(ticker: &str, period: &str, timeframe: Timeframe) -> String {
    format!("{}_{}_{}.csv", ticker, period, timeframe.interval())
}

pub fn cache_path(dir: &Path, ticker: &str, period: &str, timeframe: Timeframe) -> PathBuf {
    dir.join(cache_file_name(ticker, period, timeframe))
}

/// Inverse of [`cache_file_name`]; exchange suffixes like `.NS` stay on the ticker
pub fn ticker_from_file_name(name: &str, period: &str, timeframe: Timeframe) -> Option<String> {
    let suffix = format!("_{}_{}.csv", period, timeframe.interval());
    let ticker = name.strip_suffix(&suffix)?;
    (!ticker.is_empty()).then(|| ticker.to_string())
}

/// Tickers that already have a cache file for this period and timeframe
pub fn cached_tickers(dir: &Path, period: &str, timeframe: Timeframe) -> BTreeSet<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return BTreeSet::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name();
            ticker_from_file_name(name.to_str()?, period, timeframe)
        })
        .collect()
}

/// Cache files split by whether their header carries a `Volume` column
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeReport {
    pub with_volume: Vec<String>,
    pub without_volume: Vec<String>,
}

fn header_has_volume(path: &Path) -> Result<bool, CacheError> {
    let file = fs::File::open(path).map_err(|e| CacheError::io(path, e))?;
    let mut header = String::new();
    BufReader::new(file)
        .read_line(&mut header)
        .map_err(|e| CacheError::io(path, e))?;
    Ok(header
        .split(',')
        .any(|col| col.trim().trim_matches('"').eq_ignore_ascii_case("volume")))
}

pub fn check_volume(dir: &Path, period: &str, timeframe: Timeframe) -> Result<VolumeReport, CacheError> {
    if !dir.exists() {
        return Err(CacheError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "cache directory not found"),
        ));
    }

    let mut report = VolumeReport::default();
    for ticker in cached_tickers(dir, period, timeframe) {
        let path = cache_path(dir, &ticker, period, timeframe);
        if header_has_volume(&path)? {
            report.with_volume.push(ticker);
        } else {
            report.without_volume.push(ticker);
        }
    }
    Ok(report)
}

/// Cache reads for the CLI scan, one file per ticker
#[derive(Debug, Clone)]
pub struct CacheDir {
    pub dir: PathBuf,
    pub period: String,
    pub timeframe: Timeframe,
}

impl CacheDir {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dir: config.cache_dir.clone(),
            period: config.period.clone(),
            timeframe: config.timeframe,
        }
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        cache_path(&self.dir, ticker, &self.period, self.timeframe)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.path_for(ticker).is_file()
    }

    /// `None` when there is no cache file; unreadable files are logged and skipped
    pub fn load(&self, ticker: &str) -> Option<TickerData> {
        let path = self.path_for(ticker);
        if !path.is_file() {
            return None;
        }
        match load_csv(&path) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", ticker, e);
                None
            }
        }
    }
}

// ============================================
// DIRECTORY ROTATION
// ============================================

fn parent_of(dir: &Path) -> PathBuf {
    match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Remove dated `{cache}_2*` generations and a stale temp dir. The backup stays.
pub fn cleanup_old_caches(config: &Config) -> Result<usize, CacheError> {
    let name = config
        .cache_dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("data_cache")
        .to_string();
    let dated_prefix = format!("{name}_2");
    let temp = config.temp_dir();
    let parent = parent_of(&config.cache_dir);

    let mut removed = 0;
    let entries = fs::read_dir(&parent).map_err(|e| CacheError::io(&parent, e))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let is_dated = entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with(&dated_prefix))
            .unwrap_or(false);
        let is_temp = Some(entry.file_name().as_os_str()) == temp.file_name();
        if is_dated || is_temp {
            fs::remove_dir_all(&path).map_err(|e| CacheError::io(&path, e))?;
            tracing::info!("Removed old cache {:?}", path);
            removed += 1;
        }
    }
    Ok(removed)
}

/// Swap a finished rebuild in: live becomes backup, temp becomes live
pub fn finalize(config: &Config) -> Result<(), CacheError> {
    let live = &config.cache_dir;
    let backup = config.backup_dir();
    let temp = config.temp_dir();

    if !temp.is_dir() {
        return Err(CacheError::io(
            &temp,
            std::io::Error::new(std::io::ErrorKind::NotFound, "temp cache missing"),
        ));
    }

    if backup.exists() {
        fs::remove_dir_all(&backup).map_err(|e| CacheError::io(&backup, e))?;
    }
    if live.exists() {
        fs::rename(live, &backup).map_err(|e| CacheError::io(live, e))?;
    }
    fs::rename(&temp, live).map_err(|e| CacheError::io(&temp, e))?;

    tracing::info!("Cache swapped in at {:?} (backup {:?})", live, backup);
    Ok(())
}

// ============================================
// DOWNLOADS
// ============================================

#[derive(Debug, Clone, Serialize)]
pub struct FailedTicker {
    pub ticker: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DownloadSummary {
    pub total: usize,
    pub downloaded: usize,
    pub failed: Vec<FailedTicker>,
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "   Total tickers: {}", self.total)?;
        writeln!(f, "   Downloaded:    {}", self.downloaded)?;
        write!(f, "   Failed:        {}", self.failed.len())?;
        for failed in self.failed.iter().take(20) {
            write!(f, "\n      - {}: {}", failed.ticker, failed.reason)?;
        }
        if self.failed.len() > 20 {
            write!(f, "\n      ... and {} more", self.failed.len() - 20)?;
        }
        Ok(())
    }
}

/// Fetch each ticker into `dest`, pacing requests and bounding concurrency
pub async fn download_into(
    client: &YahooClient,
    config: &Config,
    tickers: Vec<String>,
    dest: &Path,
) -> DownloadSummary {
    let total = tickers.len();
    let period = config.period.as_str();
    let timeframe = config.timeframe;
    let retries = config.download_retries;
    let delay = config.request_delay();
    let done = AtomicUsize::new(0);
    let done = &done;

    let outcomes: Vec<(String, Result<usize, String>)> = stream::iter(tickers)
        .map(|ticker| async move {
            tokio::time::sleep(delay).await;
            let outcome = match client.fetch_with_retry(&ticker, period, timeframe, retries).await {
                Ok(data) => save_csv(&cache_path(dest, &ticker, period, timeframe), &data)
                    .map(|_| data.len())
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            match &outcome {
                Ok(candles) => tracing::info!("[{}/{}] {} ({} candles)", n, total, ticker, candles),
                Err(e) => tracing::warn!("[{}/{}] {} failed: {}", n, total, ticker, e),
            }
            (ticker, outcome)
        })
        .buffer_unordered(config.download_concurrency.max(1))
        .collect()
        .await;

    let mut summary = DownloadSummary {
        total,
        ..DownloadSummary::default()
    };
    for (ticker, outcome) in outcomes {
        match outcome {
            Ok(_) => summary.downloaded += 1,
            Err(reason) => summary.failed.push(FailedTicker { ticker, reason }),
        }
    }
    summary.failed.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    summary
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub download: DownloadSummary,
    pub files: usize,
    pub cache_dir: PathBuf,
    pub built_at: String,
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.download)?;
        writeln!(f, "   Cache files:   {}", self.files)?;
        writeln!(f, "   Cache dir:     {}", self.cache_dir.display())?;
        write!(f, "   Built at:      {}", self.built_at)
    }
}

/// Full rebuild from every universe list, swapped in only when the download finishes
pub async fn build(config: &Config) -> anyhow::Result<BuildSummary> {
    let removed = cleanup_old_caches(config)?;
    if removed > 0 {
        tracing::info!("Cleaned {} old cache directories", removed);
    }

    let temp = config.temp_dir();
    fs::create_dir_all(&temp).map_err(|e| CacheError::io(&temp, e))?;

    let universes = universe::discover_all(config);
    let tickers = universe::collect_tickers(&universes);
    if tickers.is_empty() {
        anyhow::bail!(
            "No tickers found in {:?}, {:?} or {:?}",
            config.index_dir,
            config.sector_dir,
            config.custom_dir
        );
    }
    tracing::info!(
        "Building cache for {} tickers from {} lists into {:?}",
        tickers.len(),
        universes.len(),
        temp
    );

    let client = YahooClient::new(&config.yahoo_base_url)?;
    let download = download_into(&client, config, tickers, &temp).await;

    if download.downloaded == 0 {
        anyhow::bail!("Nothing downloaded; live cache untouched, partial data left in {:?}", temp);
    }

    if let Err(e) = finalize(config) {
        tracing::error!("Finalize failed, new data left in {:?}: {}", temp, e);
        return Err(e.into());
    }

    let tz = config.tz_parsed()?;
    Ok(BuildSummary {
        files: cached_tickers(&config.cache_dir, &config.period, config.timeframe).len(),
        cache_dir: config.cache_dir.clone(),
        built_at: chrono::Utc::now().with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string(),
        download,
    })
}

/// Download only tickers that have no cache file yet; rebuild when there is no cache
/// Tickers listed in any of `universes` with no cache file yet, sorted
pub fn missing_tickers(config: &Config, universes: &[Universe]) -> Vec<String> {
    let cached = cached_tickers(&config.cache_dir, &config.period, config.timeframe);
    universe::collect_tickers(universes)
        .into_iter()
        .filter(|t| !cached.contains(t))
        .collect()
}

pub async fn quick_update(config: &Config) -> anyhow::Result<DownloadSummary> {
    if !config.cache_dir.is_dir() {
        tracing::warn!("No cache at {:?}, running a full build", config.cache_dir);
        return Ok(build(config).await?.download);
    }

    let missing = missing_tickers(config, &universe::discover_all(config));
    if missing.is_empty() {
        tracing::info!("Cache is complete");
        return Ok(DownloadSummary::default());
    }

    tracing::info!("{} tickers missing from cache", missing.len());
    let client = YahooClient::new(&config.yahoo_base_url)?;
    Ok(download_into(&client, config, missing, &config.cache_dir).await)
}

/// Re-download every ticker of the given lists straight into the live cache
pub async fn refresh(config: &Config, lists: &[Universe]) -> anyhow::Result<DownloadSummary> {
    let tickers = universe::collect_tickers(lists);
    if tickers.is_empty() {
        anyhow::bail!("No tickers in the selected lists");
    }

    fs::create_dir_all(&config.cache_dir).map_err(|e| CacheError::io(&config.cache_dir, e))?;
    tracing::info!("Refreshing {} tickers from {} lists", tickers.len(), lists.len());

    let client = YahooClient::new(&config.yahoo_base_url)?;
    Ok(download_into(&client, config, tickers, &config.cache_dir).await)
}

/// Fetch tickers that a scan needs but the cache lacks
pub async fn fill_missing(config: &Config, tickers: &[String]) -> anyhow::Result<DownloadSummary> {
    let source = CacheDir::from_config(config);
    let missing: Vec<String> = tickers.iter().filter(|t| !source.contains(t)).cloned().collect();
    if missing.is_empty() {
        return Ok(DownloadSummary::default());
    }

    fs::create_dir_all(&config.cache_dir).map_err(|e| CacheError::io(&config.cache_dir, e))?;
    tracing::info!("Fetching {} tickers missing from cache", missing.len());

    let client = YahooClient::new(&config.yahoo_base_url)?;
    Ok(download_into(&client, config, missing, &config.cache_dir).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANDLES: &str = "Date,Open,High,Low,Close,Volume\n2025-01-01,1,2,0.5,1.5,100\n";

    fn config_in(root: &Path) -> Config {
        Config {
            cache_dir: root.join("data_cache"),
            ..Config::default()
        }
    }

    fn touch(dir: &Path, name: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn file_names_round_trip_with_exchange_suffix() {
        let name = cache_file_name("RELIANCE.NS", "6mo", Timeframe::Daily);
        assert_eq!(name, "RELIANCE.NS_6mo_1d.csv");
        assert_eq!(
            ticker_from_file_name(&name, "6mo", Timeframe::Daily).as_deref(),
            Some("RELIANCE.NS")
        );
        assert_eq!(
            ticker_from_file_name("M_M.BO_6mo_4h.csv", "6mo", Timeframe::FourHour).as_deref(),
            Some("M_M.BO")
        );
        assert_eq!(ticker_from_file_name("RELIANCE.NS_1y_1d.csv", "6mo", Timeframe::Daily), None);
        assert_eq!(ticker_from_file_name("_6mo_1d.csv", "6mo", Timeframe::Daily), None);
    }

    #[test]
    fn missing_tickers_skips_cached_ones() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            index_dir: root.path().join("INDEX CSV"),
            sector_dir: root.path().join("SECTORS CSV"),
            custom_dir: root.path().join("custom"),
            ..config_in(root.path())
        };
        touch(&config.index_dir, "nifty_a.csv", "A.NS\nB.NS\n");
        touch(&config.index_dir, "nifty_b.csv", "C.NS\nB.NS\n");
        touch(&config.cache_dir, "A.NS_6mo_1d.csv", CANDLES);
        // other period and timeframe do not count
        touch(&config.cache_dir, "C.NS_1y_1d.csv", CANDLES);
        touch(&config.cache_dir, "C.NS_6mo_4h.csv", CANDLES);

        let universes = universe::discover_all(&config);
        assert_eq!(universes.len(), 2);
        assert_eq!(missing_tickers(&config, &universes), vec!["B.NS", "C.NS"]);

        touch(&config.cache_dir, "B.NS_6mo_1d.csv", CANDLES);
        touch(&config.cache_dir, "C.NS_6mo_1d.csv", CANDLES);
        assert!(missing_tickers(&config, &universes).is_empty());
    }

    #[test]
    fn finalize_swaps_live_into_backup() {
        let root = tempfile::tempdir().unwrap();
        let config = config_in(root.path());
        touch(&config.cache_dir, "OLD.NS_6mo_1d.csv", CANDLES);
        touch(&config.backup_dir(), "OLDER.NS_6mo_1d.csv", CANDLES);
        touch(&config.temp_dir(), "NEW.NS_6mo_1d.csv", CANDLES);

        finalize(&config).unwrap();

        assert!(config.cache_dir.join("NEW.NS_6mo_1d.csv").exists());
        assert!(config.backup_dir().join("OLD.NS_6mo_1d.csv").exists());
        assert!(!config.backup_dir().join("OLDER.NS_6mo_1d.csv").exists());
        assert!(!config.temp_dir().exists());
    }

    #[test]
    fn finalize_without_temp_leaves_live_alone() {
        let root = tempfile::tempdir().unwrap();
        let config = config_in(root.path());
        touch(&config.cache_dir, "OLD.NS_6mo_1d.csv", CANDLES);

        assert!(finalize(&config).is_err());
        assert!(config.cache_dir.join("OLD.NS_6mo_1d.csv").exists());
    }

    #[test]
    fn cleanup_keeps_live_and_backup() {
        let root = tempfile::tempdir().unwrap();
        let config = config_in(root.path());
        touch(&config.cache_dir, "A.NS_6mo_1d.csv", CANDLES);
        touch(&config.backup_dir(), "A.NS_6mo_1d.csv", CANDLES);
        touch(&config.temp_dir(), "A.NS_6mo_1d.csv", CANDLES);
        touch(&root.path().join("data_cache_20251201"), "A.NS_6mo_1d.csv", CANDLES);
        touch(&root.path().join("other_20251201"), "A.NS_6mo_1d.csv", CANDLES);

        let removed = cleanup_old_caches(&config).unwrap();

        assert_eq!(removed, 2);
        assert!(config.cache_dir.exists());
        assert!(config.backup_dir().exists());
        assert!(!config.temp_dir().exists());
        assert!(!root.path().join("data_cache_20251201").exists());
        assert!(root.path().join("other_20251201").exists());
    }

    #[test]
    fn check_volume_reads_headers() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path();
        touch(dir, "A.NS_6mo_1d.csv", CANDLES);
        touch(dir, "B.NS_6mo_1d.csv", "Date,Open,High,Low,Close\n2025-01-01,1,2,0.5,1.5\n");
        touch(dir, "C.NS_1y_1d.csv", CANDLES);

        let report = check_volume(dir, "6mo", Timeframe::Daily).unwrap();
        assert_eq!(report.with_volume, vec!["A.NS".to_string()]);
        assert_eq!(report.without_volume, vec!["B.NS".to_string()]);
    }

    #[test]
    fn cache_dir_skips_missing_tickers() {
        let root = tempfile::tempdir().unwrap();
        let config = config_in(root.path());
        touch(&config.cache_dir, "A.NS_6mo_1d.csv", CANDLES);

        let source = CacheDir::from_config(&config);
        assert!(source.contains("A.NS"));
        assert_eq!(source.load("A.NS").map(|d| d.len()), Some(1));
        assert!(source.load("B.NS").is_none());
    }
}
