//! Textbook indicator formulas over plain `f64` series.
//!
//! Every function returns only the latest value, or `None` when the series is
//! shorter than that indicator's own minimum window.

#[allow(clippy::cast_precision_loss)]
fn as_f64(n: usize) -> f64 {
    n as f64
}

/// Simple moving average of the last `period` values.
#[must_use]
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / as_f64(period))
}

/// Full EMA series, seeded with the SMA of the first `period` values.
///
/// Element `i` of the result corresponds to `values[i + period - 1]`.
#[must_use]
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (as_f64(period) + 1.0);
    let seed = values[..period].iter().sum::<f64>() / as_f64(period);

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for value in &values[period..] {
        prev = (value - prev).mul_add(k, prev);
        out.push(prev);
    }
    out
}

/// Latest exponential moving average.
#[must_use]
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Relative Strength Index with Wilder smoothing.
///
/// Needs `period + 1` closes. A window with no losses reads 100.
#[must_use]
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let p = as_f64(period);
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (gain_sum, loss_sum) = changes[..period]
        .iter()
        .fold((0.0, 0.0), |(g, l), c| (g + c.max(0.0), l + (-c).max(0.0)));
    let mut avg_gain = gain_sum / p;
    let mut avg_loss = loss_sum / p;

    for change in &changes[period..] {
        avg_gain = avg_gain.mul_add(p - 1.0, change.max(0.0)) / p;
        avg_loss = avg_loss.mul_add(p - 1.0, (-change).max(0.0)) / p;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Latest MACD line, signal and histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    /// Fast EMA minus slow EMA.
    pub macd: f64,
    /// EMA of the MACD line.
    pub signal: f64,
    /// MACD minus signal.
    pub histogram: f64,
}

/// EMA-based MACD. Needs `slow + signal - 1` closes.
#[must_use]
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdValue> {
    if fast == 0 || fast >= slow {
        return None;
    }
    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if slow_series.is_empty() {
        return None;
    }

    // fast_series starts at closes[fast - 1], slow_series at closes[slow - 1]
    let offset = slow - fast;
    let line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow)| fast_series[i + offset] - slow)
        .collect();

    let signal_value = ema(&line, signal)?;
    let macd_value = *line.last()?;
    Some(MacdValue {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
    })
}

/// Bollinger bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerValue {
    /// Middle plus `k` deviations.
    pub upper: f64,
    /// Simple moving average.
    pub middle: f64,
    /// Middle minus `k` deviations.
    pub lower: f64,
}

/// Bollinger bands using the population standard deviation.
#[must_use]
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<BollingerValue> {
    let middle = sma(closes, period)?;
    let window = &closes[closes.len() - period..];
    let variance = window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / as_f64(period);
    let deviation = variance.sqrt() * k;
    Some(BollingerValue {
        upper: middle + deviation,
        middle,
        lower: middle - deviation,
    })
}

/// Stochastic oscillator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticValue {
    /// Latest %K.
    pub k: f64,
    /// SMA of the last `signal` %K values.
    pub d: f64,
}

/// Stochastic %K/%D. Needs `period + signal - 1` bars.
///
/// A window whose high equals its low reads %K = 0.
#[must_use]
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    signal: usize,
) -> Option<StochasticValue> {
    let len = closes.len().min(highs.len()).min(lows.len());
    if period == 0 || signal == 0 || len < period + signal - 1 {
        return None;
    }

    let percent_k = |end: usize| {
        let start = end + 1 - period;
        let highest = highs[start..=end].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lowest = lows[start..=end].iter().copied().fold(f64::INFINITY, f64::min);
        let range = highest - lowest;
        if range == 0.0 {
            0.0
        } else {
            100.0 * (closes[end] - lowest) / range
        }
    };

    let ks: Vec<f64> = (len - signal..len).map(percent_k).collect();
    let k = *ks.last()?;
    let d = sma(&ks, signal)?;
    Some(StochasticValue { k, d })
}

/// Average True Range with Wilder smoothing.
///
/// True range starts at the second bar; the first `period` ranges seed the
/// average, so `period + 1` bars are needed.
#[must_use]
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let len = closes.len().min(highs.len()).min(lows.len());
    if period == 0 || len < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = (1..len)
        .map(|i| {
            let prev_close = closes[i - 1];
            (highs[i] - lows[i])
                .max((highs[i] - prev_close).abs())
                .max((lows[i] - prev_close).abs())
        })
        .collect();

    let p = as_f64(period);
    let seed = true_ranges[..period].iter().sum::<f64>() / p;
    Some(
        true_ranges[period..]
            .iter()
            .fold(seed, |prev, tr| prev.mul_add(p - 1.0, *tr) / p),
    )
}

/// On-Balance Volume. Needs two bars.
#[must_use]
pub fn obv(closes: &[f64], volumes: &[f64]) -> Option<f64> {
    let len = closes.len().min(volumes.len());
    if len < 2 {
        return None;
    }
    Some((1..len).fold(0.0, |acc, i| {
        if closes[i] > closes[i - 1] {
            acc + volumes[i]
        } else if closes[i] < closes[i - 1] {
            acc - volumes[i]
        } else {
            acc
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test_case(&[1.0, 2.0, 3.0, 4.0], 2, Some(3.5) ; "last window")]
    #[test_case(&[1.0, 2.0], 3, None ; "too short")]
    #[test_case(&[5.0], 0, None ; "zero period")]
    fn sma_cases(values: &[f64], period: usize, expected: Option<f64>) {
        assert_eq!(sma(values, period), expected);
    }

    #[test]
    fn ema_seeds_with_sma() {
        let series = ema_series(&[2.0, 4.0, 6.0, 8.0], 3);
        assert_eq!(series.len(), 2);
        assert!(close_to(series[0], 4.0));
        // k = 0.5
        assert!(close_to(series[1], 6.0));
    }

    #[test]
    fn ema_of_constant_is_constant() {
        assert!(close_to(ema(&[7.0; 30], 14).unwrap(), 7.0));
    }

    #[test]
    fn rsi_balanced_moves_is_fifty() {
        let closes: Vec<f64> = (0..15).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        assert!(close_to(rsi(&closes, 14).unwrap(), 50.0));
    }

    #[test]
    fn rsi_without_losses_is_hundred() {
        let closes: Vec<f64> = (0..20).map(f64::from).collect();
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_needs_period_plus_one() {
        let closes: Vec<f64> = (0..14).map(f64::from).collect();
        assert_eq!(rsi(&closes, 14), None);
    }

    #[test]
    fn rsi_wilder_smoothing() {
        // 14 alternating changes give avg gain = avg loss = 0.5, then one
        // +1 change: gain = (0.5*13 + 1)/14, loss = 0.5*13/14
        let mut closes: Vec<f64> = (0..15).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        closes.push(11.0);
        let gain = 0.5f64.mul_add(13.0, 1.0) / 14.0;
        let loss = 0.5 * 13.0 / 14.0;
        let expected = 100.0 - 100.0 / (1.0 + gain / loss);
        assert!(close_to(rsi(&closes, 14).unwrap(), expected));
    }

    #[test]
    fn macd_of_linear_series_converges_to_lag_difference() {
        let closes: Vec<f64> = (0..60).map(f64::from).collect();
        let value = macd(&closes, 12, 26, 9).unwrap();
        // EMA lags a unit-slope line by (p - 1) / 2
        assert!(close_to(value.macd, 7.0));
        assert!(close_to(value.signal, 7.0));
        assert!(close_to(value.histogram, 0.0));
    }

    #[test]
    fn macd_needs_slow_plus_signal() {
        let closes: Vec<f64> = (0..33).map(f64::from).collect();
        assert!(macd(&closes, 12, 26, 9).is_none());
        let closes: Vec<f64> = (0..34).map(f64::from).collect();
        assert!(macd(&closes, 12, 26, 9).is_some());
    }

    #[test]
    fn bollinger_population_deviation() {
        let closes = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bands = bollinger(&closes, 8, 2.0).unwrap();
        assert!(close_to(bands.middle, 5.0));
        assert!(close_to(bands.upper, 9.0));
        assert!(close_to(bands.lower, 1.0));
    }

    #[test]
    fn stochastic_values() {
        let highs = [10.0, 12.0, 14.0, 16.0];
        let lows = [8.0, 8.0, 8.0, 8.0];
        let closes = [9.0, 11.0, 13.0, 12.0];
        let value = stochastic(&highs, &lows, &closes, 2, 2).unwrap();
        // window [1,2]: (13-8)/(14-8); window [2,3]: (12-8)/(16-8)
        let k_prev = 100.0 * 5.0 / 6.0;
        assert!(close_to(value.k, 50.0));
        assert!(close_to(value.d, f64::midpoint(k_prev, 50.0)));
    }

    #[test]
    fn stochastic_flat_range_reads_zero() {
        let flat = [5.0; 20];
        let value = stochastic(&flat, &flat, &flat, 14, 3).unwrap();
        assert_eq!(value.k, 0.0);
        assert_eq!(value.d, 0.0);
    }

    #[test]
    fn atr_of_constant_range() {
        let highs = [11.0; 20];
        let lows = [9.0; 20];
        let closes = [10.0; 20];
        assert!(close_to(atr(&highs, &lows, &closes, 14).unwrap(), 2.0));
    }

    #[test]
    fn atr_uses_gaps_against_previous_close() {
        let highs = [10.0, 20.0];
        let lows = [9.0, 19.0];
        let closes = [9.5, 19.5];
        assert!(close_to(atr(&highs, &lows, &closes, 1).unwrap(), 10.5));
        assert!(atr(&highs, &lows, &closes, 2).is_none());
    }

    #[test]
    fn obv_accumulates_by_direction() {
        let closes = [10.0, 11.0, 10.5, 10.5, 12.0];
        let volumes = [100.0, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(obv(&closes, &volumes), Some(30.0));
        assert_eq!(obv(&closes[..1], &volumes[..1]), None);
    }
}
