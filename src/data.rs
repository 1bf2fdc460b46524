//! Candle storage: cache CSV reader/writer and the in-memory store

use crate::cache;
use crate::error::CacheError;
use crate::scan_types::Timeframe;
use polars::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Raw ticker data in memory-efficient format
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerData {
    pub date: Vec<String>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    /// False when the source had no volume column (volume is zero-filled)
    pub has_volume: bool,
}

impl TickerData {
    pub fn new() -> Self {
        Self {
            has_volume: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn push(&mut self, date: impl Into<String>, open: f64, high: f64, low: f64, close: f64, volume: f64) {
        self.date.push(date.into());
        self.open.push(open);
        self.high.push(high);
        self.low.push(low);
        self.close.push(close);
        self.volume.push(volume);
    }
}

fn find_column(df: &DataFrame, wanted: &str) -> Option<String> {
    df.get_column_names()
        .into_iter()
        .find(|name| name.eq_ignore_ascii_case(wanted))
        .map(|name| name.to_string())
}

fn f64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let col = df.column(name)?.cast(&DataType::Float64)?;
    Ok(col.f64()?.into_iter().collect())
}

/// Load a single cache CSV.
///
/// The first column (or one called `Date`) holds the bar date. Rows with a
/// missing open/high/low/close are dropped; a missing `Volume` column is
/// zero-filled and recorded in `has_volume`.
pub fn load_csv(path: &Path) -> Result<TickerData, CacheError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| CacheError::csv(path, e))?;

    let date_col = match find_column(&df, "date") {
        Some(name) => name,
        None => df
            .get_column_names()
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| CacheError::Empty(path.to_path_buf()))?,
    };

    let dates: Vec<Option<String>> = df
        .column(&date_col)
        .and_then(|c| c.cast(&DataType::String))
        .map_err(|e| CacheError::csv(path, e))?
        .str()
        .map_err(|e| CacheError::csv(path, e))?
        .into_iter()
        .map(|s| s.map(|s| s.to_string()))
        .collect();

    let mut ohlc = Vec::with_capacity(4);
    for wanted in ["open", "high", "low", "close"] {
        let name = find_column(&df, wanted).ok_or_else(|| CacheError::MissingColumn {
            path: path.to_path_buf(),
            column: wanted.to_string(),
        })?;
        ohlc.push(f64_values(&df, &name).map_err(|e| CacheError::csv(path, e))?);
    }

    let volume = match find_column(&df, "volume") {
        Some(name) => Some(f64_values(&df, &name).map_err(|e| CacheError::csv(path, e))?),
        None => None,
    };

    let mut data = TickerData {
        has_volume: volume.is_some(),
        ..TickerData::default()
    };

    for (i, date) in dates.into_iter().enumerate() {
        let (Some(date), Some(o), Some(h), Some(l), Some(c)) =
            (date, ohlc[0][i], ohlc[1][i], ohlc[2][i], ohlc[3][i])
        else {
            continue;
        };
        if date.trim().is_empty() || [o, h, l, c].iter().any(|v| v.is_nan()) {
            continue;
        }
        let v = volume
            .as_ref()
            .and_then(|vol| vol[i])
            .filter(|v| !v.is_nan())
            .unwrap_or(0.0);
        data.push(date, o, h, l, c, v);
    }

    if data.is_empty() {
        return Err(CacheError::Empty(path.to_path_buf()));
    }
    Ok(data)
}

/// Write a series in the cache layout: `Date,Open,High,Low,Close,Volume`
pub fn save_csv(path: &Path, data: &TickerData) -> Result<(), CacheError> {
    let mut df = df!(
        "Date" => data.date.as_slice(),
        "Open" => data.open.as_slice(),
        "High" => data.high.as_slice(),
        "Low" => data.low.as_slice(),
        "Close" => data.close.as_slice(),
        "Volume" => data.volume.as_slice(),
    )
    .map_err(|e| CacheError::csv(path, e))?;

    let mut file = fs::File::create(path).map_err(|e| CacheError::io(path, e))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)
        .map_err(|e| CacheError::csv(path, e))?;
    Ok(())
}

/// Data store - holds all loaded ticker data in memory
pub struct DataStore {
    pub data: HashMap<String, Arc<TickerData>>,
    pub tickers: Vec<String>,
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            tickers: Vec::new(),
        }
    }

    /// Load every `{TICKER}_{period}_{interval}.csv` from a cache directory
    pub fn load_directory(&mut self, dir: &Path, period: &str, timeframe: Timeframe) -> anyhow::Result<()> {
        tracing::info!("Loading cache from {:?}", dir);

        if !dir.exists() {
            anyhow::bail!("Cache directory does not exist: {:?}", dir);
        }

        let entries: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                let ticker = cache::ticker_from_file_name(&name, period, timeframe)?;
                Some((ticker, e.path()))
            })
            .collect();

        tracing::info!("Found {} cache files to load", entries.len());

        let mut loaded = 0;
        let mut failed = 0;

        for (ticker, path) in entries {
            match load_csv(&path) {
                Ok(data) => {
                    self.insert(ticker, data);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", ticker, e);
                    failed += 1;
                }
            }

            if (loaded + failed) % 500 == 0 {
                tracing::info!("Progress: {} loaded, {} failed", loaded, failed);
            }
        }

        self.tickers.sort();

        tracing::info!(
            "Loaded {} tickers ({} failed) with {} total candles",
            loaded,
            failed,
            self.data.values().map(|d| d.len()).sum::<usize>()
        );

        Ok(())
    }

    pub fn insert(&mut self, ticker: String, data: TickerData) {
        let key = ticker.to_uppercase();
        if self.data.insert(key.clone(), Arc::new(data)).is_none() {
            self.tickers.push(key);
        }
    }

    /// Get data for a single ticker
    pub fn get(&self, ticker: &str) -> Option<Arc<TickerData>> {
        self.data.get(&ticker.to_uppercase()).cloned()
    }

    /// Get all tickers
    pub fn get_tickers(&self) -> &[String] {
        &self.tickers
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
