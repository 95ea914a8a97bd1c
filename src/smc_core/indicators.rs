//! Moving averages and volatility helpers shared by the detectors

use crate::types::Candle;

pub const ATR_PERIOD: usize = 14;

/// Average True Range: simple mean of the last `period` true ranges.
/// Falls back to the plain range of the last bar on short input.
pub fn calculate_atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < 2 || period == 0 {
        return candles.last().map(|c| c.range()).unwrap_or(0.0);
    }

    let start = candles.len().saturating_sub(period).max(1);
    let window = &candles[start..];
    let sum_tr: f64 = window
        .iter()
        .enumerate()
        .map(|(offset, c)| c.true_range(Some(candles[start + offset - 1].close)))
        .sum();

    sum_tr / window.len() as f64
}

/// Exponential moving average series seeded with the SMA of the first `period` values.
/// Entries before the seed are `None`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(ema);
    for i in period..values.len() {
        ema = values[i] * k + ema * (1.0 - k);
        out[i] = Some(ema);
    }
    out
}

/// Latest EMA value, if there is enough data
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied().flatten()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
