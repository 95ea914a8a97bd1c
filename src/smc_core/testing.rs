//! Synthetic candle builders shared by the unit tests

use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::Candle;

/// Hourly candle at position `i`, starting 2024-01-01 00:00 UTC
pub fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    candle_with_volume(i, open, high, low, close, 100.0)
}

pub fn candle_with_volume(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
    let open_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
    Candle {
        open_time,
        open,
        high,
        low,
        close,
        volume,
        close_time: open_time + Duration::hours(1) - Duration::milliseconds(1),
    }
}

/// Series following `closes`. Each bar opens halfway between the previous
/// close and its own close so turning points never share an extreme.
pub fn from_closes(start: f64, closes: &[f64], pad: f64) -> Vec<Candle> {
    let mut prev = start;
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = (prev + close) / 2.0;
            let c = candle(i, open, open.max(close) + pad, open.min(close) - pad, close);
            prev = close;
            c
        })
        .collect()
}

/// Oscillation with identical peaks and troughs (period 8)
pub fn sideways(n: usize, mid: f64, amplitude: f64) -> Vec<Candle> {
    const SHAPE: [f64; 8] = [0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0, -0.5];
    (0..n)
        .map(|i| {
            let m = mid + SHAPE[i % 8] * amplitude;
            let half_body = 0.05 * amplitude;
            let (open, close) = if i % 2 == 0 { (m - half_body, m + half_body) } else { (m + half_body, m - half_body) };
            candle(i, open, m + 0.2 * amplitude, m - 0.2 * amplitude, close)
        })
        .collect()
}

/// Seeded random walk with well-formed candles
pub fn random_walk(n: usize, seed: u64) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price: f64 = 100.0;
    (0..n)
        .map(|i| {
            let open = price;
            let close = (open * (1.0 + rng.gen_range(-0.02..0.02))).max(1.0);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(50.0..150.0);
            price = close;
            candle_with_volume(i, open, high, low, close, volume)
        })
        .collect()
}

/// Mirror a series around `pivot` so bullish structure becomes bearish
pub fn mirror(candles: &[Candle], pivot: f64) -> Vec<Candle> {
    candles
        .iter()
        .map(|c| Candle {
            open: 2.0 * pivot - c.open,
            high: 2.0 * pivot - c.low,
            low: 2.0 * pivot - c.high,
            close: 2.0 * pivot - c.close,
            ..*c
        })
        .collect()
}

/// Hourly bullish ICT sequence on 57 candles:
/// - 0..=47 stepped downtrend (lower highs at 19/29/40, lower lows at 15/25/35)
/// - 50 bearish order block candle [97.5, 98.2] on raised volume
/// - 51 displacement, 52 completes a bullish FVG [98.2, 99.6]
/// - 53 closes above the 101.1 lower high (CHoCH), 54 holds above it
/// - 55 pulls back into the FVG, 56 prints a hammer into the order block
pub fn bullish_setup() -> Vec<Candle> {
    let knots: [(usize, f64); 10] = [
        (0, 108.0),
        (5, 104.0),
        (9, 106.0),
        (15, 102.5),
        (19, 104.2),
        (25, 101.0),
        (29, 102.6),
        (35, 99.8),
        (40, 101.0),
        (47, 99.4),
    ];
    let mut closes = Vec::new();
    for w in knots.windows(2) {
        let ((i0, c0), (i1, c1)) = (w[0], w[1]);
        for i in i0..i1 {
            closes.push(c0 + (c1 - c0) * (i - i0) as f64 / (i1 - i0) as f64);
        }
    }
    closes.push(99.4);

    let mut candles = from_closes(108.0, &closes, 0.1);
    candles.push(candle(48, 99.3, 99.4, 98.6, 98.7));
    candles.push(candle(49, 98.7, 98.8, 97.9, 98.0));
    candles.push(candle_with_volume(50, 98.1, 98.2, 97.5, 97.6, 150.0));
    candles.push(candle(51, 98.4, 99.9, 98.3, 99.8));
    candles.push(candle(52, 99.8, 100.7, 99.6, 100.6));
    candles.push(candle(53, 100.6, 101.6, 100.4, 101.5));
    candles.push(candle(54, 101.5, 101.9, 101.2, 101.2));
    candles.push(candle(55, 101.2, 101.3, 98.8, 98.9));
    candles.push(candle(56, 98.9, 99.3, 97.7, 99.2));
    candles
}
