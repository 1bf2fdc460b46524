//! Yahoo Finance chart client

use crate::data::TickerData;
use crate::error::FetchError;
use crate::scan_types::Timeframe;
use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) liquidity-scanner/0.1";

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RawBar {
    ts: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn parse_bars(body: &str) -> Result<(Vec<RawBar>, i64), FetchError> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    if let Some(err) = envelope.chart.error {
        let msg = err
            .description
            .or(err.code)
            .unwrap_or_else(|| "unknown chart error".to_string());
        return Err(FetchError::Provider(msg));
    }

    let result = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or(FetchError::NoData)?;

    let offset = result.meta.gmtoffset;
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let at = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();
    let bars: Vec<RawBar> = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            Some(RawBar {
                ts,
                open: at(&quote.open[..], i)?,
                high: at(&quote.high[..], i)?,
                low: at(&quote.low[..], i)?,
                close: at(&quote.close[..], i)?,
                volume: at(&quote.volume[..], i).unwrap_or(0.0),
            })
        })
        .collect();

    if bars.is_empty() {
        return Err(FetchError::NoData);
    }
    Ok((bars, offset))
}

fn local_day(ts: i64, offset: i64) -> i64 {
    (ts + offset).div_euclid(86_400)
}

/// Groups each trading day's hourly bars into consecutive buckets of four
fn bucket_four_hour(bars: &[RawBar], offset: i64) -> Vec<RawBar> {
    let mut out = Vec::new();
    let mut start = 0;
    while start < bars.len() {
        let day = local_day(bars[start].ts, offset);
        let mut end = start;
        while end < bars.len() && local_day(bars[end].ts, offset) == day {
            end += 1;
        }
        for chunk in bars[start..end].chunks(4) {
            let first = chunk[0];
            let last = chunk[chunk.len() - 1];
            out.push(RawBar {
                ts: first.ts,
                open: first.open,
                high: chunk.iter().fold(f64::NEG_INFINITY, |a, b| a.max(b.high)),
                low: chunk.iter().fold(f64::INFINITY, |a, b| a.min(b.low)),
                close: last.close,
                volume: chunk.iter().map(|b| b.volume).sum(),
            });
        }
        start = end;
    }
    out
}

fn format_bar_date(ts: i64, offset: i64, timeframe: Timeframe) -> Option<String> {
    match timeframe {
        Timeframe::Daily => {
            let local = DateTime::from_timestamp(ts + offset, 0)?;
            Some(local.date_naive().format("%Y-%m-%d").to_string())
        }
        Timeframe::FourHour => {
            let utc = DateTime::from_timestamp(ts, 0)?;
            Some(utc.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
    }
}

/// Turn a chart API payload into candles for the given timeframe
pub fn parse_chart(body: &str, timeframe: Timeframe) -> Result<TickerData, FetchError> {
    let (bars, offset) = parse_bars(body)?;
    let bars = match timeframe {
        Timeframe::Daily => bars,
        Timeframe::FourHour => bucket_four_hour(&bars, offset),
    };

    let mut data = TickerData::new();
    for bar in bars {
        let date = format_bar_date(bar.ts, offset, timeframe)
            .ok_or_else(|| FetchError::Malformed(format!("timestamp out of range: {}", bar.ts)))?;
        data.push(date, bar.open, bar.high, bar.low, bar.close, bar.volume);
    }
    Ok(data)
}

#[derive(Clone)]
pub struct YahooClient {
    http: reqwest::Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// One chart request, no retries
    pub async fn fetch(&self, ticker: &str, period: &str, timeframe: Timeframe) -> Result<TickerData, FetchError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        let response = self
            .http
            .get(&url)
            .query(&[("range", period), ("interval", timeframe.fetch_interval())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            // Unknown symbols come back as 404 with a chart error body
            if let Err(e @ FetchError::Provider(_)) = parse_bars(&body) {
                return Err(e);
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        parse_chart(&body, timeframe)
    }

    /// Retry transport failures, waiting 3s, 6s, ... between attempts
    pub async fn fetch_with_retry(
        &self,
        ticker: &str,
        period: &str,
        timeframe: Timeframe,
        retries: u32,
    ) -> Result<TickerData, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch(ticker, period, timeframe).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && attempt + 1 < retries => {
                    let wait = Duration::from_secs(3 * (attempt as u64 + 1));
                    tracing::debug!("{}: {} (retry after {:?})", ticker, e, wait);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Three NSE sessions; the second row has a null close and must be dropped
    const DAILY: &str = r#"{"chart":{"result":[{"meta":{"currency":"INR","symbol":"SAMHI.NS","gmtoffset":19800,"exchangeTimezoneName":"Asia/Kolkata"},
        "timestamp":[1765424700,1765511100,1765770300],
        "indicators":{"quote":[{"open":[190.5,191.0,188.0],"high":[192.0,193.0,190.0],"low":[186.1,189.5,185.9],"close":[189.0,null,189.7],"volume":[120000,90000,null]}]}}],"error":null}}"#;

    #[test]
    fn parses_daily_payload() {
        let data = parse_chart(DAILY, Timeframe::Daily).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.date, vec!["2025-12-11", "2025-12-15"]);
        assert_eq!(data.low, vec![186.1, 185.9]);
        assert_eq!(data.volume, vec![120000.0, 0.0]);
    }

    #[test]
    fn provider_error_is_reported() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        match parse_chart(body, Timeframe::Daily) {
            Err(FetchError::Provider(msg)) => assert!(msg.contains("delisted")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn empty_result_is_no_data() {
        let body = r#"{"chart":{"result":[{"meta":{"gmtoffset":19800},"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(matches!(parse_chart(body, Timeframe::Daily), Err(FetchError::NoData)));
    }

    #[test]
    fn hourly_bars_bucket_into_four_hour_candles() {
        let offset = 19_800;
        // 2025-12-11 09:15 IST = 03:45 UTC, seven hourly bars, then one bar next day
        let day_start = 1_765_424_700;
        let mut bars: Vec<RawBar> = (0..7)
            .map(|i| RawBar {
                ts: day_start + i * 3600,
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 - i as f64,
                close: 100.5 + i as f64,
                volume: 10.0,
            })
            .collect();
        bars.push(RawBar {
            ts: day_start + 86_400,
            open: 50.0,
            high: 51.0,
            low: 49.0,
            close: 50.5,
            volume: 5.0,
        });

        let out = bucket_four_hour(&bars, offset);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].open, 100.0);
        assert_eq!(out[0].high, 104.0);
        assert_eq!(out[0].low, 96.0);
        assert_eq!(out[0].close, 103.5);
        assert_eq!(out[0].volume, 40.0);
        assert_eq!(out[1].volume, 30.0);
        assert_eq!(out[2].open, 50.0);

        let date = format_bar_date(out[0].ts, offset, Timeframe::FourHour).unwrap();
        assert_eq!(date, "2025-12-11T03:45:00Z");
    }
}
