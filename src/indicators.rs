//! Candle and volume indicators
//! All functions operate on slices and return Vec<f64> or Vec<bool>

/// Rolling mean that emits a value once `min_periods` samples are in the window
#[inline]
pub fn rolling_mean(data: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let n = data.len();
    let mut result = vec![f64::NAN; n];

    if window == 0 {
        return result;
    }

    let min_periods = min_periods.max(1);
    let mut sum = 0.0;

    for i in 0..n {
        sum += data[i];
        if i >= window {
            sum -= data[i - window];
        }
        let count = (i + 1).min(window);
        if count >= min_periods {
            result[i] = sum / count as f64;
        }
    }

    result
}

/// Percentile rank (0-100) of each value within its trailing window, ties averaged
#[inline]
pub fn rolling_percentile_rank(data: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let n = data.len();
    let mut result = vec![f64::NAN; n];

    if window == 0 {
        return result;
    }

    for i in 0..n {
        let start = (i + 1).saturating_sub(window);
        let slice = &data[start..=i];
        if slice.len() < min_periods.max(1) {
            continue;
        }

        let current = data[i];
        let below = slice.iter().filter(|&&v| v < current).count() as f64;
        let equal = slice.iter().filter(|&&v| v == current).count() as f64;
        // average rank among ties, 1-based
        let rank = below + (equal + 1.0) / 2.0;
        result[i] = rank / slice.len() as f64 * 100.0;
    }

    result
}

/// Volume relative to its average; 1.0 where the average is missing or zero
#[inline]
pub fn relative_volume(volume: &[f64], average: &[f64]) -> Vec<f64> {
    volume
        .iter()
        .zip(average.iter())
        .map(|(&v, &a)| if !a.is_nan() && a > 0.0 { v / a } else { 1.0 })
        .collect()
}

/// Volume rose on each of the last two bars
#[inline]
pub fn rising_volume(volume: &[f64]) -> Vec<bool> {
    let n = volume.len();
    let mut result = vec![false; n];

    for i in 2..n {
        result[i] = volume[i] > volume[i - 1] && volume[i - 1] > volume[i - 2];
    }

    result
}

/// Shape of a single candle relative to its range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleShape {
    pub range: f64,
    pub body: f64,
    pub upper_wick: f64,
    pub lower_wick: f64,
    pub lower_wick_ratio: f64,
    pub upper_wick_ratio: f64,
    pub body_ratio: f64,
    /// Lower wick over body; 0 for a flat body
    pub wick_body_ratio: f64,
    pub bullish: bool,
}

impl CandleShape {
    pub fn new(open: f64, high: f64, low: f64, close: f64) -> Self {
        let range = high - low;
        let body = (close - open).abs();
        let upper_wick = high - open.max(close);
        let lower_wick = open.min(close) - low;
        let ratio = |x: f64| if range > 0.0 { x / range } else { 0.0 };

        Self {
            range,
            body,
            upper_wick,
            lower_wick,
            lower_wick_ratio: ratio(lower_wick),
            upper_wick_ratio: ratio(upper_wick),
            body_ratio: ratio(body),
            wick_body_ratio: if body > 0.0 { lower_wick / body } else { 0.0 },
            bullish: close > open,
        }
    }

    pub fn is_hammer(&self) -> bool {
        self.lower_wick_ratio >= 0.6 && self.upper_wick_ratio < 0.1 && self.body_ratio < 0.3
    }

    pub fn is_dragonfly(&self) -> bool {
        self.lower_wick_ratio >= 0.8 && self.body_ratio < 0.05
    }
}

#[inline]
pub fn candle_shapes(open: &[f64], high: &[f64], low: &[f64], close: &[f64]) -> Vec<CandleShape> {
    (0..close.len())
        .map(|i| CandleShape::new(open[i], high[i], low[i], close[i]))
        .collect()
}

/// Swing lows: strictly below each of `left` prior and `right` following lows
#[inline]
pub fn swing_lows(low: &[f64], left: usize, right: usize) -> Vec<bool> {
    let n = low.len();
    let mut result = vec![false; n];

    if n < left + right + 1 {
        return result;
    }

    for i in left..(n - right) {
        let curr = low[i];
        let left_higher = (1..=left).all(|j| low[i - j] > curr);
        let right_higher = (1..=right).all(|j| low[i + j] > curr);
        result[i] = left_higher && right_higher;
    }

    result
}

/// Mark swing lows that sit within `tolerance` (fraction) of another swing low
#[inline]
pub fn equal_lows(low: &[f64], swings: &[bool], tolerance: f64) -> Vec<bool> {
    let mut result = vec![false; low.len()];
    let idx: Vec<usize> = swings
        .iter()
        .enumerate()
        .filter_map(|(i, &s)| s.then_some(i))
        .collect();

    for (k, &a) in idx.iter().enumerate() {
        for &b in &idx[k + 1..] {
            if (low[a] - low[b]).abs() <= low[a] * tolerance {
                result[a] = true;
                result[b] = true;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_mean_min_periods() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let result = rolling_mean(&data, 4, 2);
        assert!(result[0].is_nan());
        assert!((result[1] - 1.5).abs() < 1e-9);
        assert!((result[3] - 2.5).abs() < 1e-9);
        assert!((result[5] - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_rank_averages_ties() {
        let data = vec![1.0, 1.0, 3.0, 2.0];
        let result = rolling_percentile_rank(&data, 4, 2);
        assert!(result[0].is_nan());
        // two equal values: average rank 1.5 of 2
        assert!((result[1] - 75.0).abs() < 1e-9);
        assert!((result[2] - 100.0).abs() < 1e-9);
        // 2.0 ranks third of four
        assert!((result[3] - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_relative_volume_falls_back_to_one() {
        let rel = relative_volume(&[10.0, 0.0, 30.0], &[f64::NAN, 0.0, 20.0]);
        assert_eq!(rel, vec![1.0, 1.0, 1.5]);
    }

    #[test]
    fn test_rising_volume() {
        let r = rising_volume(&[1.0, 2.0, 3.0, 3.0, 4.0]);
        assert_eq!(r, vec![false, false, true, false, false]);
    }

    #[test]
    fn test_candle_shape_hammer() {
        // open 99, close 100, high 100.2, low 95
        let shape = CandleShape::new(99.0, 100.2, 95.0, 100.0);
        assert!(shape.bullish);
        assert!((shape.lower_wick_ratio - 4.0 / 5.2).abs() < 1e-9);
        assert!(shape.is_hammer());
        assert!(!shape.is_dragonfly());
    }

    #[test]
    fn test_flat_candle_has_zero_ratios() {
        let shape = CandleShape::new(10.0, 10.0, 10.0, 10.0);
        assert_eq!(shape.lower_wick_ratio, 0.0);
        assert_eq!(shape.wick_body_ratio, 0.0);
        assert!(!shape.bullish);
    }

    #[test]
    fn test_swing_lows_and_equal_lows() {
        let low = vec![10.0, 9.0, 8.0, 7.0, 8.0, 9.0, 8.5, 7.02, 8.0, 9.0];
        let swings = swing_lows(&low, 3, 2);
        assert!(swings[3]);
        assert!(swings[7]);
        assert_eq!(swings.iter().filter(|&&s| s).count(), 2);

        let eq = equal_lows(&low, &swings, 0.005);
        assert!(eq[3] && eq[7]);
    }
}
