//! Turning detector output into dated, formatted alerts

use crate::data::TickerData;
use crate::detector::{Grab, ScoreCard};
use crate::scan_types::{Grade, Timeframe};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Time printed for daily signals (NSE session open)
const SESSION_OPEN: (u32, u32) = (9, 15);

/// Longest signal window accepted from config, CLI or API
pub const MAX_LOOKBACK_DAYS: i64 = 365;

/// A liquidity grab placed on the calendar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub ticker: String,
    pub timeframe: Timeframe,
    /// Bar date as stored in the cache
    pub bar_date: String,
    /// Calendar day of the bar in the scanner time zone
    pub day: NaiveDate,
    /// e.g. `18-Dec-2025 09:15 IST`
    pub time: String,
    pub close: f64,
    pub swing_level: f64,
    pub depth: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Alert {
    pub fn grade(&self) -> Option<Grade> {
        self.score.as_ref().map(|s| s.grade)
    }

    pub fn total_score(&self) -> f64 {
        self.score.as_ref().map(|s| s.total).unwrap_or(0.0)
    }

    /// Console line in the classic or scored layout
    pub fn line(&self) -> String {
        match &self.score {
            None => format!(
                "   [{}] {:<12} @ {} | {:.2} (Depth: {:.2}%)",
                self.timeframe.label(),
                self.ticker,
                self.time,
                self.close,
                self.depth
            ),
            Some(card) => {
                let marker = match card.grade {
                    Grade::APlus => "***",
                    Grade::B => " * ",
                    _ => "   ",
                };
                format!(
                    "   {}[{}] [{}] {:<12} @ {} | Rs.{:.2} | Score: {:.0}/100",
                    marker,
                    card.grade,
                    self.timeframe.label(),
                    self.ticker,
                    self.time,
                    self.close,
                    card.total
                )
            }
        }
    }

    pub fn details_line(&self) -> Option<String> {
        self.details.as_ref().map(|d| format!("         -> {}", d))
    }
}

/// Inclusive window of calendar days ending today
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalWindow {
    pub today: NaiveDate,
    pub days: i64,
}

impl SignalWindow {
    pub fn ending_today(tz: Tz, days: i64) -> Self {
        Self {
            today: Utc::now().with_timezone(&tz).date_naive(),
            days,
        }
    }

    fn days_back(&self, days: i64) -> Option<NaiveDate> {
        self.today.checked_sub_signed(TimeDelta::try_days(days)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.days_back(self.days).unwrap_or(NaiveDate::MIN)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start() && day <= self.today
    }

    /// Every day in the window, newest first (at most `MAX_LOOKBACK_DAYS` back)
    pub fn days_desc(&self) -> Vec<NaiveDate> {
        (0..=self.days.clamp(0, MAX_LOOKBACK_DAYS))
            .filter_map(|i| self.days_back(i))
            .collect()
    }
}

/// Resolve a cache date string to a zoned timestamp.
///
/// Plain dates stay on their calendar day (session open time); timestamps
/// with an offset are converted, and naive timestamps are taken as UTC.
pub fn bar_time(date: &str, tz: Tz) -> Option<DateTime<Tz>> {
    let date = date.trim();

    if let Ok(day) = NaiveDate::parse_from_str(date.get(0..10).unwrap_or(date), "%Y-%m-%d") {
        if date.len() <= 10 {
            let open = NaiveTime::from_hms_opt(SESSION_OPEN.0, SESSION_OPEN.1, 0)?;
            return tz.from_local_datetime(&day.and_time(open)).earliest();
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return Some(dt.with_timezone(&tz));
    }
    if let Ok(dt) = DateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&tz));
    }
    NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).with_timezone(&tz))
}

/// Daily bars print the session open, intraday bars their own time
pub fn format_time(at: &DateTime<Tz>, timeframe: Timeframe) -> String {
    match timeframe {
        Timeframe::Daily => at.format("%d-%b-%Y %H:%M %Z").to_string(),
        Timeframe::FourHour => at.format("%d-%b %H:%M %Z").to_string(),
    }
}

/// Build alerts for a ticker's grabs, dropping bars outside `window` when given
pub fn build_alerts(
    ticker: &str,
    data: &TickerData,
    grabs: &[Grab],
    timeframe: Timeframe,
    tz: Tz,
    window: Option<&SignalWindow>,
) -> Vec<Alert> {
    grabs
        .iter()
        .filter_map(|grab| {
            let raw = data.date.get(grab.index)?;
            let Some(at) = bar_time(raw, tz) else {
                tracing::warn!("{}: unparseable bar date {:?}", ticker, raw);
                return None;
            };
            let day = at.date_naive();
            if let Some(window) = window {
                if !window.contains(day) {
                    return None;
                }
            }

            Some(Alert {
                ticker: ticker.to_string(),
                timeframe,
                bar_date: raw.clone(),
                day,
                time: format_time(&at, timeframe),
                close: data.close[grab.index],
                swing_level: grab.swing_level,
                depth: grab.depth,
                details: grab.score.as_ref().map(|s| s.details(grab.depth)),
                score: grab.score.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use chrono_tz::Asia::Kolkata;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn daily_bars_keep_calendar_day() {
        let at = bar_time("2025-12-18", Kolkata).unwrap();
        assert_eq!(at.date_naive(), day("2025-12-18"));
        assert_eq!((at.hour(), at.minute()), (9, 15));
        assert_eq!(format_time(&at, Timeframe::Daily), "18-Dec-2025 09:15 IST");
    }

    #[test]
    fn intraday_bars_convert_to_zone() {
        let at = bar_time("2025-12-18T20:00:00Z", Kolkata).unwrap();
        assert_eq!(at.date_naive(), day("2025-12-19"));
        assert_eq!(format_time(&at, Timeframe::FourHour), "19-Dec 01:30 IST");

        let offset = bar_time("2025-12-18 13:15:00+05:30", Kolkata).unwrap();
        assert_eq!((offset.hour(), offset.minute()), (13, 15));

        let naive = bar_time("2025-12-18 03:45:00", Kolkata).unwrap();
        assert_eq!((naive.hour(), naive.minute()), (9, 15));
    }

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let window = SignalWindow {
            today: day("2025-12-20"),
            days: 7,
        };
        assert!(window.contains(day("2025-12-20")));
        assert!(window.contains(day("2025-12-13")));
        assert!(!window.contains(day("2025-12-12")));
        assert!(!window.contains(day("2025-12-21")));

        let days = window.days_desc();
        assert_eq!(days.len(), 8);
        assert_eq!(days[0], day("2025-12-20"));
        assert_eq!(days[7], day("2025-12-13"));
    }

    #[test]
    fn oversized_window_does_not_overflow() {
        let window = SignalWindow {
            today: day("2025-12-20"),
            days: 100_000_000,
        };
        assert!(window.contains(day("2025-12-20")));
        assert!(window.contains(day("1990-01-01")));
        assert_eq!(window.days_desc().len(), MAX_LOOKBACK_DAYS as usize + 1);

        let negative = SignalWindow {
            today: day("2025-12-20"),
            days: -3,
        };
        assert_eq!(negative.days_desc(), vec![day("2025-12-20")]);
    }

    #[test]
    fn classic_alert_line() {
        let mut data = TickerData::new();
        data.push("2025-12-18", 100.0, 101.0, 98.0, 100.456, 0.0);
        let grabs = vec![Grab {
            index: 0,
            swing_level: 98.5,
            depth: 0.5076,
            score: None,
        }];

        let alerts = build_alerts("SAMHI.NS", &data, &grabs, Timeframe::Daily, Kolkata, None);
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].line(),
            "   [1D] SAMHI.NS     @ 18-Dec-2025 09:15 IST | 100.46 (Depth: 0.51%)"
        );
        assert!(alerts[0].details_line().is_none());
    }

    #[test]
    fn window_filters_old_grabs() {
        let mut data = TickerData::new();
        data.push("2025-11-01", 1.0, 1.0, 1.0, 1.0, 0.0);
        data.push("2025-12-19", 1.0, 1.0, 1.0, 1.0, 0.0);
        let grabs: Vec<Grab> = (0..2)
            .map(|index| Grab {
                index,
                swing_level: 1.0,
                depth: 0.0,
                score: None,
            })
            .collect();
        let window = SignalWindow {
            today: day("2025-12-20"),
            days: 7,
        };

        let alerts = build_alerts("X", &data, &grabs, Timeframe::Daily, Kolkata, Some(&window));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].bar_date, "2025-12-19");
    }
}
