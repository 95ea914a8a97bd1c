//! Liquidity: where stops rest and when they get taken
//!
//! A sweep takes out resting stops beyond a prior swing and immediately
//! reverses. All three conditions are required:
//! 1. the wick breaks beyond the swing level
//! 2. the candle closes back inside
//! 3. the next candle closes further in the reversal direction
//!
//! Resting liquidity is external (equal swing highs or lows) or internal
//! (the edges of a tight consolidation). Inducements are fake breakouts of
//! the recent range that reverse within two candles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::swings::{SwingKind, SwingPoint, SwingPoints};
use crate::types::{Candle, Direction};

/// Swing must be strictly more than this many candles behind the sweep
const MIN_SWING_AGE: usize = 3;
/// ...and strictly less than this many
const MAX_SWING_AGE: usize = 20;

/// Swings within 0.3% of each other count as equal
const EQUAL_LEVEL_TOLERANCE: f64 = 0.003;
const STRONG_POOL_TOUCHES: usize = 3;

const CONSOLIDATION_LOOKBACK: usize = 50;
const CONSOLIDATION_BEFORE: usize = 10;
const CONSOLIDATION_AFTER: usize = 5;
const CONSOLIDATION_MAX_PERCENT: f64 = 2.0;
/// Ranges whose edges are within 0.1% of an earlier one are duplicates
const CONSOLIDATION_DUPLICATE: f64 = 0.001;

const INDUCEMENT_LOOKBACK: usize = 30;
const INDUCEMENT_LEVEL_WINDOW: usize = 10;
const INDUCEMENT_REVERSAL_CANDLES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquiditySweep {
    pub direction: Direction,
    pub index: usize,
    pub swing_level: f64,
    pub swing_index: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

fn in_window(swing: &SwingPoint, i: usize) -> bool {
    swing.index + MIN_SWING_AGE < i && swing.index + MAX_SWING_AGE > i
}

/// Detect sweeps of swing lows (bullish) and swing highs (bearish).
/// One sweep per candle and direction, against the most recent swing it took.
pub fn detect_liquidity_sweeps(candles: &[Candle], swings: &SwingPoints) -> Vec<LiquiditySweep> {
    let mut sweeps = Vec::new();
    if candles.len() < 2 {
        return sweeps;
    }

    for i in 0..candles.len() - 1 {
        let (candle, next) = (&candles[i], &candles[i + 1]);
        if !candle.is_well_formed() || !next.is_well_formed() {
            continue;
        }

        let bullish = swings.lows.iter().rev().find(|s| {
            in_window(s, i) && candle.low < s.price && candle.close > s.price && next.close > candle.close
        });
        if let Some(swing) = bullish {
            sweeps.push(LiquiditySweep {
                direction: Direction::Bullish,
                index: i,
                swing_level: swing.price,
                swing_index: swing.index,
                timestamp: candle.open_time,
            });
        }

        let bearish = swings.highs.iter().rev().find(|s| {
            in_window(s, i) && candle.high > s.price && candle.close < s.price && next.close < candle.close
        });
        if let Some(swing) = bearish {
            sweeps.push(LiquiditySweep {
                direction: Direction::Bearish,
                index: i,
                swing_level: swing.price,
                swing_index: swing.index,
                timestamp: candle.open_time,
            });
        }
    }

    sweeps
}

/// Equal swing highs or lows: stops cluster just beyond them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityPool {
    /// `High` for equal highs, `Low` for equal lows
    pub kind: SwingKind,
    /// Average of the clustered swing prices
    pub price: f64,
    pub touches: usize,
    pub strong: bool,
    pub swing_indices: Vec<usize>,
}

impl LiquidityPool {
    /// Pools a trade in `direction` can target: equal highs above for
    /// longs, equal lows below for shorts
    pub fn is_target_for(&self, direction: Direction) -> bool {
        matches!(
            (direction, self.kind),
            (Direction::Bullish, SwingKind::High) | (Direction::Bearish, SwingKind::Low)
        )
    }
}

/// Group swings of each kind that sit within 0.3% of each other.
/// Two or more make a pool, three or more a strong one.
pub fn detect_external_liquidity(swings: &SwingPoints) -> Vec<LiquidityPool> {
    let mut pools: Vec<LiquidityPool> = Vec::new();

    for (kind, points) in [(SwingKind::High, &swings.highs), (SwingKind::Low, &swings.lows)] {
        for swing in points.iter() {
            let cluster: Vec<&SwingPoint> = points
                .iter()
                .filter(|other| ((other.price - swing.price) / swing.price).abs() <= EQUAL_LEVEL_TOLERANCE)
                .collect();
            if cluster.len() < 2 {
                continue;
            }

            let price = cluster.iter().map(|p| p.price).sum::<f64>() / cluster.len() as f64;
            let known = pools
                .iter()
                .any(|p| p.kind == kind && (p.price - price).abs() < price * EQUAL_LEVEL_TOLERANCE);
            if known {
                continue;
            }

            pools.push(LiquidityPool {
                kind,
                price,
                touches: cluster.len(),
                strong: cluster.len() >= STRONG_POOL_TOUCHES,
                swing_indices: cluster.iter().map(|p| p.index).collect(),
            });
        }
    }

    pools
}

/// Tight sideways range; stops rest above its high and below its low
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationRange {
    pub start_index: usize,
    pub end_index: usize,
    pub high: f64,
    pub low: f64,
    pub midpoint: f64,
    /// Height as percent of the midpoint
    pub range_percent: f64,
}

/// 15-candle windows over the last 50 candles whose height stays under 2%
/// of price. Windows with the same edges (within 0.1%) are reported once.
pub fn detect_internal_liquidity(candles: &[Candle]) -> Vec<ConsolidationRange> {
    let offset = candles.len().saturating_sub(CONSOLIDATION_LOOKBACK);
    let recent = &candles[offset..];
    let mut ranges: Vec<ConsolidationRange> = Vec::new();
    if recent.len() < CONSOLIDATION_BEFORE + CONSOLIDATION_AFTER {
        return ranges;
    }

    for i in CONSOLIDATION_BEFORE..recent.len() - CONSOLIDATION_AFTER {
        let window = recent[i - CONSOLIDATION_BEFORE..i + CONSOLIDATION_AFTER]
            .iter()
            .filter(|c| c.is_well_formed());
        let (high, low) = window.fold((f64::MIN, f64::MAX), |(h, l), c| (h.max(c.high), l.min(c.low)));
        if high < low {
            continue;
        }

        let midpoint = (high + low) / 2.0;
        let range_percent = (high - low) / midpoint * 100.0;
        if !(range_percent < CONSOLIDATION_MAX_PERCENT) {
            continue;
        }

        let duplicate = ranges.iter().any(|r| {
            (r.high - high).abs() < high * CONSOLIDATION_DUPLICATE && (r.low - low).abs() < low * CONSOLIDATION_DUPLICATE
        });
        if !duplicate {
            ranges.push(ConsolidationRange {
                start_index: offset + i - CONSOLIDATION_BEFORE,
                end_index: offset + i + CONSOLIDATION_AFTER,
                high,
                low,
                midpoint,
                range_percent,
            });
        }
    }

    ranges
}

/// Stop hunt beyond the recent range that closed back inside and reversed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inducement {
    /// Direction of the expected move after the trap
    pub direction: Direction,
    pub index: usize,
    /// Low (or high) of the prior 10 candles that the wick ran
    pub hunted_level: f64,
    /// Wick extreme beyond that level
    pub wick: f64,
    pub close: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Fake breakdowns (bullish) and breakouts (bearish) over the last 30
/// candles. The candle wicks beyond the extreme of the 10 before it, closes
/// back inside, and one of the next two candles closes further away.
pub fn detect_inducements(candles: &[Candle]) -> Vec<Inducement> {
    let mut found = Vec::new();
    if candles.len() < INDUCEMENT_LOOKBACK {
        return found;
    }

    let start = candles.len() - INDUCEMENT_LOOKBACK;
    for i in start + 5..candles.len() - INDUCEMENT_REVERSAL_CANDLES - 1 {
        let candle = &candles[i];
        if !candle.is_well_formed() {
            continue;
        }
        let prior: Vec<&Candle> = candles[start.max(i.saturating_sub(INDUCEMENT_LEVEL_WINDOW))..i]
            .iter()
            .filter(|c| c.is_well_formed())
            .collect();
        if prior.is_empty() {
            continue;
        }
        let next = || {
            candles[i + 1..=i + INDUCEMENT_REVERSAL_CANDLES]
                .iter()
                .filter(|c| c.is_well_formed())
        };

        let support = prior.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        if candle.low < support && candle.close > support && next().any(|c| c.close > candle.close) {
            found.push(Inducement {
                direction: Direction::Bullish,
                index: i,
                hunted_level: support,
                wick: candle.low,
                close: candle.close,
                timestamp: candle.open_time,
            });
        }

        let resistance = prior.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        if candle.high > resistance && candle.close < resistance && next().any(|c| c.close < candle.close) {
            found.push(Inducement {
                direction: Direction::Bearish,
                index: i,
                hunted_level: resistance,
                wick: candle.high,
                close: candle.close,
                timestamp: candle.open_time,
            });
        }
    }

    found
}
