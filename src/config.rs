//! Runtime configuration (environment + defaults)

use crate::alerts::MAX_LOOKBACK_DAYS;
use crate::scan_types::{Engine, Timeframe};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Cache
    pub cache_dir: PathBuf,
    pub period: String,
    pub timeframe: Timeframe,

    // Universes
    pub index_dir: PathBuf,
    pub sector_dir: PathBuf,
    pub custom_dir: PathBuf,

    // Signal window
    pub tz: String,
    pub lookback_days: i64,
    pub filter_recent: bool,

    // Detection
    pub engine: Engine,
    pub detector: DetectorConfig,

    // Provider
    pub yahoo_base_url: String,
    pub request_delay_ms: u64,
    pub download_retries: u32,
    pub download_concurrency: usize,
    pub fetch_missing: bool,

    // Server
    pub bind_addr: SocketAddr,
    pub frontend_dir: PathBuf,
}

/// Tuning knobs for the scored detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    // Swing detection
    pub swing_left: usize,
    pub swing_right: usize,
    pub equal_low_tolerance: f64,

    // Volume
    pub volume_sma_period: usize,
    pub volume_sma_min_periods: usize,
    pub volume_rank_window: usize,
    pub volume_rank_min_periods: usize,
    pub min_volume_spike: f64,
    pub extreme_volume_spike: f64,
    pub volume_weight: f64,

    // Wick
    pub min_wick_ratio: f64,
    pub strong_wick_ratio: f64,
    pub extreme_wick_ratio: f64,
    pub wick_weight: f64,

    // Candle
    pub require_bullish_candle: bool,
    pub strong_wick_override: f64,
    pub bullish_body_weight: f64,
    pub two_candle_confirm: bool,

    // Depth
    pub min_grab_depth: f64,
    pub max_grab_depth: f64,
    pub depth_weight: f64,

    // Context
    pub close_above_swing_margin: f64,
    pub swing_touch_tolerance: f64,
    pub grab_lookahead: usize,
    pub context_weight: f64,

    // Grades
    pub grade_a_min_score: f64,
    pub grade_b_min_score: f64,
    pub grade_c_min_score: f64,

    pub min_candles: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            swing_left: 3,
            swing_right: 2,
            equal_low_tolerance: 0.005,
            volume_sma_period: 20,
            volume_sma_min_periods: 5,
            volume_rank_window: 50,
            volume_rank_min_periods: 10,
            min_volume_spike: 1.3,
            extreme_volume_spike: 2.0,
            volume_weight: 25.0,
            min_wick_ratio: 0.4,
            strong_wick_ratio: 0.6,
            extreme_wick_ratio: 0.75,
            wick_weight: 30.0,
            require_bullish_candle: false,
            strong_wick_override: 0.65,
            bullish_body_weight: 15.0,
            two_candle_confirm: true,
            min_grab_depth: 0.1,
            max_grab_depth: 3.0,
            depth_weight: 15.0,
            close_above_swing_margin: 0.2,
            swing_touch_tolerance: 0.01,
            grab_lookahead: 5,
            context_weight: 15.0,
            grade_a_min_score: 65.0,
            grade_b_min_score: 50.0,
            grade_c_min_score: 35.0,
            min_candles: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data_cache"),
            period: "6mo".to_string(),
            timeframe: Timeframe::Daily,
            index_dir: PathBuf::from("INDEX CSV"),
            sector_dir: PathBuf::from("SECTORS CSV"),
            custom_dir: PathBuf::from("."),
            tz: "Asia/Kolkata".to_string(),
            lookback_days: 7,
            filter_recent: true,
            engine: Engine::Scored,
            detector: DetectorConfig::default(),
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            request_delay_ms: 500,
            download_retries: 3,
            download_concurrency: 2,
            fetch_missing: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            frontend_dir: PathBuf::from("frontend"),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|s| s.trim().to_lowercase()) {
        None => default,
        Some(v) if v.is_empty() => default,
        Some(v) if v == "1" || v == "true" || v == "yes" || v == "y" || v == "on" => true,
        Some(v) if v == "0" || v == "false" || v == "no" || v == "n" || v == "off" => false,
        Some(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|x| x.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let cache_dir = env_parse::<PathBuf>("SCANNER_CACHE_DIR").unwrap_or(defaults.cache_dir);
        let period = std::env::var("SCANNER_PERIOD").unwrap_or(defaults.period);
        let timeframe = match std::env::var("SCANNER_TIMEFRAME") {
            Ok(raw) => raw.parse::<Timeframe>().map_err(|e| anyhow!(e))?,
            Err(_) => defaults.timeframe,
        };

        let index_dir = env_parse::<PathBuf>("SCANNER_INDEX_DIR").unwrap_or(defaults.index_dir);
        let sector_dir = env_parse::<PathBuf>("SCANNER_SECTOR_DIR").unwrap_or(defaults.sector_dir);
        let custom_dir = env_parse::<PathBuf>("SCANNER_CUSTOM_DIR").unwrap_or(defaults.custom_dir);

        let tz = std::env::var("SCANNER_TZ").unwrap_or(defaults.tz);
        let lookback_days = env_parse::<i64>("SCANNER_LOOKBACK_DAYS").unwrap_or(defaults.lookback_days);
        let filter_recent = env_bool("SCANNER_FILTER_RECENT", defaults.filter_recent);

        let engine = match std::env::var("SCANNER_ENGINE") {
            Ok(raw) => raw.parse::<Engine>().map_err(|e| anyhow!(e))?,
            Err(_) => defaults.engine,
        };

        let yahoo_base_url = std::env::var("SCANNER_YAHOO_URL").unwrap_or(defaults.yahoo_base_url);
        let request_delay_ms = env_parse::<u64>("SCANNER_REQUEST_DELAY_MS").unwrap_or(defaults.request_delay_ms);
        let download_retries = env_parse::<u32>("SCANNER_DOWNLOAD_RETRIES").unwrap_or(defaults.download_retries);
        let download_concurrency =
            env_parse::<usize>("SCANNER_DOWNLOAD_CONCURRENCY").unwrap_or(defaults.download_concurrency);
        let fetch_missing = env_bool("SCANNER_FETCH_MISSING", defaults.fetch_missing);

        let bind_addr = env_parse::<SocketAddr>("SCANNER_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let frontend_dir = env_parse::<PathBuf>("SCANNER_FRONTEND_DIR").unwrap_or(defaults.frontend_dir);

        let config = Self {
            cache_dir,
            period,
            timeframe,
            index_dir,
            sector_dir,
            custom_dir,
            tz,
            lookback_days,
            filter_recent,
            engine,
            detector: defaults.detector,
            yahoo_base_url,
            request_delay_ms,
            download_retries,
            download_concurrency,
            fetch_missing,
            bind_addr,
            frontend_dir,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.tz_parsed()?;
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days) {
            return Err(anyhow!(
                "lookback days must be between 0 and {}, got {}",
                MAX_LOOKBACK_DAYS,
                self.lookback_days
            ));
        }
        if self.download_retries == 0 {
            return Err(anyhow!("SCANNER_DOWNLOAD_RETRIES must be at least 1"));
        }
        if self.download_concurrency == 0 {
            return Err(anyhow!("SCANNER_DOWNLOAD_CONCURRENCY must be at least 1"));
        }
        if self.period.trim().is_empty() {
            return Err(anyhow!("SCANNER_PERIOD cannot be empty"));
        }
        Ok(())
    }

    pub fn tz_parsed(&self) -> Result<chrono_tz::Tz> {
        self.tz.parse().map_err(|_| anyhow!("invalid tz: {}", self.tz))
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Sibling directory that holds the previous cache generation
    pub fn backup_dir(&self) -> PathBuf {
        sibling_with_suffix(&self.cache_dir, "backup")
    }

    /// Sibling directory a full rebuild writes into before the swap
    pub fn temp_dir(&self) -> PathBuf {
        sibling_with_suffix(&self.cache_dir, "temp")
    }
}

fn sibling_with_suffix(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("data_cache");
    dir.with_file_name(format!("{name}_{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_dirs_follow_cache_name() {
        let config = Config {
            cache_dir: PathBuf::from("/srv/scanner/data_cache"),
            ..Config::default()
        };
        assert_eq!(config.backup_dir(), PathBuf::from("/srv/scanner/data_cache_backup"));
        assert_eq!(config.temp_dir(), PathBuf::from("/srv/scanner/data_cache_temp"));
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tz_parsed().unwrap(), chrono_tz::Asia::Kolkata);
    }

    #[test]
    fn rejects_bad_timezone() {
        let config = Config {
            tz: "Mars/Olympus".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_lookback() {
        for days in [-1, MAX_LOOKBACK_DAYS + 1, 100_000_000] {
            let config = Config {
                lookback_days: days,
                ..Config::default()
            };
            assert!(config.validate().is_err(), "{days} should be rejected");
        }
        let config = Config {
            lookback_days: MAX_LOOKBACK_DAYS,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn detector_config_fills_missing_fields() {
        let cfg: DetectorConfig = serde_json::from_str(r#"{"swing_left": 4}"#).unwrap();
        assert_eq!(cfg.swing_left, 4);
        assert_eq!(cfg.swing_right, 2);
        assert_eq!(cfg.grade_c_min_score, 35.0);
    }
}
