//! Liquidity grab detection
//!
//! A liquidity grab is a bar that trades down to (or through) a recent swing
//! low and then closes back above it. Two detectors are provided:
//!
//! - classic: three-bar swing lows, a 0.5% touch band and a close above the level
//! - scored: wider swings plus volume, wick, candle, depth and context scoring,
//!   graded A+/B/C with anything under the C threshold discarded

use crate::config::DetectorConfig;
use crate::data::TickerData;
use crate::indicators::*;
use crate::scan_types::{Engine, Grade};
use serde::Serialize;
use std::fmt;

/// A bar flagged as a liquidity grab
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grab {
    /// Bar index into the series
    pub index: usize,
    pub swing_level: f64,
    /// How far the low went under the swing, in percent of the swing level
    pub depth: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreCard>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandleLabel {
    #[serde(rename = "BULL")]
    Bull,
    #[serde(rename = "BEAR->BULL")]
    BearThenBull,
    #[serde(rename = "BEAR")]
    Bear,
}

impl fmt::Display for CandleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandleLabel::Bull => f.write_str("[BULL]"),
            CandleLabel::BearThenBull => f.write_str("[BEAR->BULL]"),
            CandleLabel::Bear => f.write_str("[BEAR]"),
        }
    }
}

/// Score breakdown for a scored grab
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreCard {
    pub total: f64,
    pub grade: Grade,
    /// Raw 0-100 volume score
    pub volume_score: f64,
    /// Raw 0-100 wick score
    pub wick_score: f64,
    pub volume_points: f64,
    pub wick_points: f64,
    pub candle_points: f64,
    pub depth_points: f64,
    pub context_points: f64,
    pub rel_volume: f64,
    pub volume_percentile: Option<f64>,
    pub swing_strength: f64,
    pub candle: CandleLabel,
    pub equal_low: bool,
    pub hammer: bool,
    pub dragonfly: bool,
    pub two_candle: bool,
}

impl ScoreCard {
    pub fn volume_label(&self) -> &'static str {
        if self.volume_score >= 75.0 {
            "[FIRE]"
        } else if self.volume_score >= 50.0 {
            "[OK]"
        } else {
            "[LOW]"
        }
    }

    pub fn wick_label(&self) -> &'static str {
        if self.wick_score >= 75.0 {
            "[HIT]"
        } else if self.wick_score >= 50.0 {
            "[OK]"
        } else {
            "[LOW]"
        }
    }

    /// `Vol:25[LOW] Wick:95[HIT] Candle:[BULL] Depth:0.42% [EQL]`
    pub fn details(&self, depth: f64) -> String {
        let mut details = format!(
            "Vol:{:.0}{} Wick:{:.0}{} Candle:{} Depth:{:.2}%",
            self.volume_score,
            self.volume_label(),
            self.wick_score,
            self.wick_label(),
            self.candle,
            depth
        );
        if self.equal_low {
            details.push_str(" [EQL]");
        }
        if self.hammer {
            details.push_str(" [HAMMER]");
        }
        if self.dragonfly {
            details.push_str(" [DRAGONFLY]");
        }
        if self.two_candle {
            details.push_str(" [2-CANDLE]");
        }
        details
    }
}

pub fn detect(engine: Engine, data: &TickerData, cfg: &DetectorConfig) -> Vec<Grab> {
    match engine {
        Engine::Classic => detect_classic(data),
        Engine::Scored => detect_scored(data, cfg),
    }
}

fn collect_marks(marks: Vec<Option<Grab>>) -> Vec<Grab> {
    marks.into_iter().flatten().collect()
}

// ============================================
// CLASSIC
// ============================================

pub fn detect_classic(data: &TickerData) -> Vec<Grab> {
    let n = data.len();
    let mut marks: Vec<Option<Grab>> = vec![None; n];

    for i in 1..n.saturating_sub(3) {
        let curr = data.low[i];
        if !(curr < data.low[i - 1] && curr < data.low[i + 1]) {
            continue;
        }

        let swing = curr;
        let tolerance = swing * 0.005;
        for j in (i + 1)..(i + 5).min(n) {
            if data.low[j] <= swing + tolerance && data.close[j] > swing {
                marks[j] = Some(Grab {
                    index: j,
                    swing_level: swing,
                    depth: (swing - data.low[j]) / swing * 100.0,
                    score: None,
                });
                break;
            }
        }
    }

    collect_marks(marks)
}

// ============================================
// SCORED
// ============================================

/// Stepwise 0-100 score on relative volume, +10 when volume has been rising
pub fn volume_score(rel_volume: f64, trend_up: bool, cfg: &DetectorConfig) -> f64 {
    let base: f64 = if rel_volume >= cfg.extreme_volume_spike {
        100.0
    } else if rel_volume >= 1.8 {
        90.0
    } else if rel_volume >= 1.5 {
        75.0
    } else if rel_volume >= cfg.min_volume_spike {
        60.0
    } else if rel_volume >= 1.1 {
        40.0
    } else if rel_volume >= 1.0 {
        25.0
    } else {
        10.0
    };

    if trend_up {
        (base + 10.0).min(100.0)
    } else {
        base
    }
}

/// Stepwise 0-100 rejection score on the lower wick, with shape bonuses
pub fn wick_score(shape: &CandleShape, cfg: &DetectorConfig) -> f64 {
    let lw = shape.lower_wick_ratio;
    let mut score: f64 = if lw >= cfg.extreme_wick_ratio {
        100.0
    } else if lw >= cfg.strong_wick_ratio {
        85.0
    } else if lw >= 0.5 {
        70.0
    } else if lw >= cfg.min_wick_ratio {
        55.0
    } else if lw >= 0.3 {
        35.0
    } else if lw >= 0.2 {
        20.0
    } else {
        5.0
    };

    if shape.bullish {
        score = (score + 10.0).min(100.0);
    }
    if shape.upper_wick_ratio < 0.1 {
        score = (score + 5.0).min(100.0);
    }
    if shape.wick_body_ratio > 2.0 {
        score = (score + 10.0).min(100.0);
    }
    score
}

pub fn grade_for(total: f64, cfg: &DetectorConfig) -> Grade {
    if total >= cfg.grade_a_min_score {
        Grade::APlus
    } else if total >= cfg.grade_b_min_score {
        Grade::B
    } else if total >= cfg.grade_c_min_score {
        Grade::C
    } else {
        Grade::D
    }
}

fn depth_points(depth: f64, cfg: &DetectorConfig) -> f64 {
    if !(cfg.min_grab_depth..=cfg.max_grab_depth).contains(&depth) {
        0.0
    } else if (0.5..=1.5).contains(&depth) {
        cfg.depth_weight
    } else if depth < 0.5 {
        cfg.depth_weight * 0.7
    } else {
        cfg.depth_weight * 0.5
    }
}

/// Per-bar inputs shared by every swing's grab search
struct BarMetrics {
    shapes: Vec<CandleShape>,
    rel_volume: Vec<f64>,
    volume_rank: Vec<f64>,
    volume_score: Vec<f64>,
    wick_score: Vec<f64>,
    swings: Vec<bool>,
    swing_strength: Vec<f64>,
    equal_low: Vec<bool>,
}

impl BarMetrics {
    fn compute(data: &TickerData, cfg: &DetectorConfig) -> Self {
        let vol_sma = rolling_mean(&data.volume, cfg.volume_sma_period, cfg.volume_sma_min_periods);
        let rel_volume = relative_volume(&data.volume, &vol_sma);
        let trend_up = rising_volume(&data.volume);
        let volume_rank = rolling_percentile_rank(&data.volume, cfg.volume_rank_window, cfg.volume_rank_min_periods);
        let volume_score = rel_volume
            .iter()
            .zip(trend_up.iter())
            .map(|(&r, &t)| volume_score(r, t, cfg))
            .collect();

        let shapes = candle_shapes(&data.open, &data.high, &data.low, &data.close);
        let wick_score = shapes.iter().map(|s| wick_score(s, cfg)).collect();

        let swings = swing_lows(&data.low, cfg.swing_left, cfg.swing_right);
        let swing_strength = swings
            .iter()
            .enumerate()
            .map(|(i, &is_swing)| {
                if !is_swing {
                    return 0.0;
                }
                let curr = data.low[i];
                let left = &data.low[i - cfg.swing_left..i];
                let right = &data.low[i + 1..=i + cfg.swing_right];
                let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
                let avg_neighbor = (mean(left) + mean(right)) / 2.0;
                (avg_neighbor - curr) / curr * 100.0
            })
            .collect();
        let equal_low = equal_lows(&data.low, &swings, cfg.equal_low_tolerance);

        Self {
            shapes,
            rel_volume,
            volume_rank,
            volume_score,
            wick_score,
            swings,
            swing_strength,
            equal_low,
        }
    }
}

pub fn detect_scored(data: &TickerData, cfg: &DetectorConfig) -> Vec<Grab> {
    let n = data.len();
    if n < cfg.min_candles.max(cfg.swing_left + cfg.swing_right + 1) {
        return Vec::new();
    }

    let m = BarMetrics::compute(data, cfg);
    let mut marks: Vec<Option<Grab>> = vec![None; n];

    for swing_pos in (0..n).filter(|&i| m.swings[i]) {
        let swing = data.low[swing_pos];
        let is_equal_low = m.equal_low[swing_pos];
        let strength = m.swing_strength[swing_pos];
        let tolerance = swing * cfg.swing_touch_tolerance;
        let margin = swing * (cfg.close_above_swing_margin / 100.0);

        for j in (swing_pos + 1)..(swing_pos + 1 + cfg.grab_lookahead).min(n) {
            let low = data.low[j];
            let close = data.close[j];
            let shape = &m.shapes[j];
            let depth = if swing > 0.0 { (swing - low) / swing * 100.0 } else { 0.0 };

            if !(low <= swing + tolerance && close > swing + margin) {
                continue;
            }

            let vol_raw = m.volume_score[j];
            let wick_raw = m.wick_score[j];
            let volume_points = vol_raw / 100.0 * cfg.volume_weight;
            let wick_points = wick_raw / 100.0 * cfg.wick_weight;
            let mut candle_points = if shape.bullish { cfg.bullish_body_weight } else { 0.0 };

            let strong_wick = wick_raw >= cfg.strong_wick_override * 100.0;

            let mut two_candle = false;
            if !shape.bullish && cfg.two_candle_confirm && j + 1 < n {
                let next_bullish = data.close[j + 1] > data.open[j + 1];
                if next_bullish && data.close[j + 1] > swing + margin {
                    two_candle = true;
                    candle_points = cfg.bullish_body_weight * 0.7;
                }
            }

            if cfg.require_bullish_candle && !shape.bullish && !strong_wick && !two_candle {
                continue;
            }

            let depth_points = depth_points(depth, cfg);

            let mut context_points: f64 = 0.0;
            if is_equal_low {
                context_points += 8.0;
            }
            if strength > 1.0 {
                context_points += 7.0;
            }
            let context_points = context_points.min(cfg.context_weight);

            let total = (volume_points + wick_points + candle_points + depth_points + context_points).min(100.0);
            if total < cfg.grade_c_min_score {
                continue;
            }

            let candle = if shape.bullish {
                CandleLabel::Bull
            } else if two_candle {
                CandleLabel::BearThenBull
            } else {
                CandleLabel::Bear
            };
            let volume_rank = m.volume_rank[j];

            marks[j] = Some(Grab {
                index: j,
                swing_level: swing,
                depth,
                score: Some(ScoreCard {
                    total,
                    grade: grade_for(total, cfg),
                    volume_score: vol_raw,
                    wick_score: wick_raw,
                    volume_points,
                    wick_points,
                    candle_points,
                    depth_points,
                    context_points,
                    rel_volume: m.rel_volume[j],
                    volume_percentile: (!volume_rank.is_nan()).then_some(volume_rank),
                    swing_strength: strength,
                    candle,
                    equal_low: is_equal_low,
                    hammer: shape.is_hammer(),
                    dragonfly: shape.is_dragonfly(),
                    two_candle,
                }),
            });
            break;
        }
    }

    collect_marks(marks)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat 100-102 range with a swing low to `swing_low` at bar 20 and a grab bar at 23
    fn series(swing_low: f64, grab: (f64, f64, f64, f64), volume: f64) -> TickerData {
        let mut data = TickerData::new();
        for i in 0..40 {
            let date = format!("2025-01-{:02}", (i % 28) + 1);
            match i {
                20 => data.push(date, 101.0, 102.0, swing_low, 101.0, volume),
                23 => data.push(date, grab.0, grab.1, grab.2, grab.3, volume),
                _ => data.push(date, 101.0, 102.0, 100.0, 101.5, volume),
            }
        }
        data
    }

    #[test]
    fn classic_marks_close_back_above_swing() {
        let mut data = TickerData::new();
        let lows = [10.0, 9.0, 8.0, 9.0, 9.5, 7.98, 8.5, 9.0];
        let closes = [10.5, 9.5, 8.5, 9.5, 10.0, 8.2, 9.0, 9.5];
        for (k, (&l, &c)) in lows.iter().zip(closes.iter()).enumerate() {
            data.push(format!("2025-02-{:02}", k + 1), c, c + 0.5, l, c, 0.0);
        }

        let grabs = detect_classic(&data);
        // swing at bar 2 (8.0); bar 5 dips to 7.98 and closes 8.2 > 8.0
        assert_eq!(grabs.len(), 1);
        assert_eq!(grabs[0].index, 5);
        assert_eq!(grabs[0].swing_level, 8.0);
        assert!((grabs[0].depth - 0.25).abs() < 1e-9);
        assert!(grabs[0].score.is_none());
    }

    #[test]
    fn classic_ignores_grab_outside_window() {
        let mut data = TickerData::new();
        let lows = [9.3, 8.0, 9.0, 9.2, 9.4, 9.6, 7.99, 9.0, 9.0, 9.0];
        for (k, &l) in lows.iter().enumerate() {
            data.push(format!("2025-03-{:02}", k + 1), 9.5, 10.0, l, 9.5, 0.0);
        }
        // bar 6 is five bars after the swing: too late
        assert!(detect_classic(&data).iter().all(|g| g.index != 6));
    }

    #[test]
    fn classic_handles_short_series() {
        let mut data = TickerData::new();
        data.push("2025-01-01", 1.0, 1.0, 1.0, 1.0, 0.0);
        assert!(detect_classic(&data).is_empty());
    }

    #[test]
    fn volume_score_steps() {
        let cfg = DetectorConfig::default();
        assert_eq!(volume_score(2.5, false, &cfg), 100.0);
        assert_eq!(volume_score(1.85, false, &cfg), 90.0);
        assert_eq!(volume_score(1.35, true, &cfg), 70.0);
        assert_eq!(volume_score(1.0, false, &cfg), 25.0);
        assert_eq!(volume_score(0.4, false, &cfg), 10.0);
        assert_eq!(volume_score(2.0, true, &cfg), 100.0);
    }

    #[test]
    fn wick_score_bonuses_cap_at_100() {
        let cfg = DetectorConfig::default();
        let hammer = CandleShape::new(99.0, 100.2, 95.0, 100.0);
        assert_eq!(wick_score(&hammer, &cfg), 100.0);

        // bearish marubozu: no wick at all
        let bar = CandleShape::new(10.0, 10.0, 9.0, 9.0);
        assert_eq!(wick_score(&bar, &cfg), 10.0);
    }

    #[test]
    fn grades_follow_thresholds() {
        let cfg = DetectorConfig::default();
        assert_eq!(grade_for(80.0, &cfg), Grade::APlus);
        assert_eq!(grade_for(65.0, &cfg), Grade::APlus);
        assert_eq!(grade_for(64.9, &cfg), Grade::B);
        assert_eq!(grade_for(35.0, &cfg), Grade::C);
        assert_eq!(grade_for(34.9, &cfg), Grade::D);
    }

    #[test]
    fn scored_detects_hammer_grab_without_volume() {
        let cfg = DetectorConfig::default();
        // swing at 99.0; grab bar dips to 98.5 (0.505% deep), closes 100.4 with a long lower wick
        let data = series(99.0, (100.0, 100.5, 98.5, 100.4), 0.0);

        let grabs = detect_scored(&data, &cfg);
        assert_eq!(grabs.len(), 1);
        let grab = &grabs[0];
        assert_eq!(grab.index, 23);
        assert_eq!(grab.swing_level, 99.0);

        let card = grab.score.as_ref().unwrap();
        // zero volume scores as average volume
        assert_eq!(card.volume_score, 25.0);
        assert_eq!(card.wick_score, 100.0);
        assert_eq!(card.candle, CandleLabel::Bull);
        assert_eq!(card.depth_points, 15.0);
        assert!(card.hammer);
        assert!(!card.equal_low);
        // swing sits 1.01% under its neighbours
        assert_eq!(card.context_points, 7.0);
        // 6.25 + 30 + 15 + 15 + 7
        assert!((card.total - 73.25).abs() < 1e-9);
        assert_eq!(card.grade, Grade::APlus);
        assert_eq!(
            card.details(grab.depth),
            "Vol:25[LOW] Wick:100[HIT] Candle:[BULL] Depth:0.51% [HAMMER]"
        );
    }

    #[test]
    fn scored_skips_weak_setups() {
        let cfg = DetectorConfig::default();
        // bearish bar that only touches the band: no depth, tiny wick
        let mut data = series(99.0, (100.0, 100.1, 99.4, 99.5), 0.0);
        // next bar bearish so there is no two-candle confirmation
        data.open[24] = 101.5;
        data.close[24] = 101.0;

        // 6.25 vol + 1.5 wick + 0 candle + 0 depth + 7 context is below grade C
        assert!(detect_scored(&data, &cfg).is_empty());
    }

    #[test]
    fn scored_two_candle_confirmation() {
        let cfg = DetectorConfig::default();
        // bearish grab bar with a decent wick; bar 24 is bullish and closes above the swing
        let data = series(99.0, (100.5, 100.8, 98.6, 100.0), 0.0);

        let grabs = detect_scored(&data, &cfg);
        let grab = grabs.iter().find(|g| g.index == 23).unwrap();
        let card = grab.score.as_ref().unwrap();
        assert_eq!(card.candle, CandleLabel::BearThenBull);
        assert!(card.two_candle);
        assert!((card.candle_points - 10.5).abs() < 1e-9);
        assert!(card.equal_low);
        assert!(card.details(grab.depth).ends_with("[EQL] [2-CANDLE]"));
    }

    #[test]
    fn require_bullish_moves_past_weak_bearish_bar() {
        let mut cfg = DetectorConfig {
            two_candle_confirm: false,
            ..DetectorConfig::default()
        };
        // bar 23 is bearish with a 60-point wick; bar 24 is a small bullish bar above the swing
        let mut data = series(99.0, (100.5, 100.6, 98.8, 99.6), 0.0);
        data.open[24] = 99.5;
        data.high[24] = 100.5;
        data.low[24] = 99.3;
        data.close[24] = 100.3;

        let grabs = detect_scored(&data, &cfg);
        assert_eq!(grabs.len(), 1);
        assert_eq!(grabs[0].index, 23);
        let card = grabs[0].score.as_ref().unwrap();
        assert_eq!(card.wick_score, 60.0);
        assert_eq!(card.candle, CandleLabel::Bear);
        // 6.25 + 18 + 0 + 10.5 + 15
        assert!((card.total - 49.75).abs() < 1e-9);

        cfg.require_bullish_candle = true;
        let grabs = detect_scored(&data, &cfg);
        assert_eq!(grabs.len(), 1);
        assert_eq!(grabs[0].index, 24);
        assert_eq!(grabs[0].swing_level, 99.0);
        let card = grabs[0].score.as_ref().unwrap();
        assert_eq!(card.candle, CandleLabel::Bull);
        // 6.25 + 4.5 + 15 + 0 + 15
        assert!((card.total - 40.75).abs() < 1e-9);
    }

    #[test]
    fn require_bullish_keeps_bearish_bar_with_strong_wick() {
        let cfg = DetectorConfig {
            require_bullish_candle: true,
            two_candle_confirm: false,
            ..DetectorConfig::default()
        };
        // lower wick 45% of range, wick 9x the body: 55 + 10 lands exactly on the override
        let mut data = series(99.0, (100.0, 101.0, 99.0, 99.9), 1000.0);
        data.volume[23] = 5000.0;

        let grabs = detect_scored(&data, &cfg);
        assert_eq!(grabs.len(), 1);
        assert_eq!(grabs[0].index, 23);
        let card = grabs[0].score.as_ref().unwrap();
        assert_eq!(card.wick_score, 65.0);
        assert_eq!(card.candle, CandleLabel::Bear);
        assert!(!card.two_candle);
        // 25 + 19.5 + 0 + 0 + 7
        assert!((card.total - 51.5).abs() < 1e-9);
        assert_eq!(card.grade, Grade::B);
    }

    #[test]
    fn scored_requires_minimum_history() {
        let cfg = DetectorConfig::default();
        let mut data = series(99.0, (100.0, 100.5, 98.5, 100.4), 0.0);
        data.date.truncate(25);
        data.open.truncate(25);
        data.high.truncate(25);
        data.low.truncate(25);
        data.close.truncate(25);
        data.volume.truncate(25);
        assert!(detect_scored(&data, &cfg).is_empty());
    }

    #[test]
    fn score_never_exceeds_100() {
        let cfg = DetectorConfig::default();
        let mut data = series(99.0, (100.0, 100.5, 98.5, 100.4), 1000.0);
        data.volume[21] = 1100.0;
        data.volume[22] = 1500.0;
        data.volume[23] = 5000.0;
        let grabs = detect_scored(&data, &cfg);
        let card = grabs[0].score.as_ref().unwrap();
        assert_eq!(card.volume_score, 100.0);
        assert!(card.total <= 100.0);
    }
}
