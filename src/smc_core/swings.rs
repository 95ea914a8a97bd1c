//! Swing Point Detection
//!
//! A bar is a swing high when no other bar within `lookback` on either side
//! has a high at or above it. Ties disqualify, so flat tops produce no pivot.
//! Swing lows mirror the rule. Every structural detector downstream reads
//! these pivots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Candle;

pub const DEFAULT_SWING_LOOKBACK: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub kind: SwingKind,
}

/// Swing highs and lows, each in chronological order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwingPoints {
    pub highs: Vec<SwingPoint>,
    pub lows: Vec<SwingPoint>,
}

impl SwingPoints {
    pub fn last_high(&self) -> Option<&SwingPoint> {
        self.highs.last()
    }

    pub fn last_low(&self) -> Option<&SwingPoint> {
        self.lows.last()
    }

    pub fn is_empty(&self) -> bool {
        self.highs.is_empty() && self.lows.is_empty()
    }
}

/// Minimum series length for any pivot to exist
pub fn min_candles_for_swings(lookback: usize) -> usize {
    2 * lookback + 1
}

/// Detect swing highs and lows. Malformed bars never become pivots.
pub fn detect_swing_points(candles: &[Candle], lookback: usize) -> SwingPoints {
    let mut points = SwingPoints::default();
    if lookback == 0 || candles.len() < min_candles_for_swings(lookback) {
        return points;
    }

    for i in lookback..candles.len() - lookback {
        let candle = &candles[i];
        if !candle.is_well_formed() {
            continue;
        }
        let window = (i - lookback..=i + lookback).filter(|&j| j != i);

        if window.clone().all(|j| candles[j].high < candle.high) {
            points.highs.push(SwingPoint {
                index: i,
                price: candle.high,
                timestamp: candle.open_time,
                kind: SwingKind::High,
            });
        }
        if window.into_iter().all(|j| candles[j].low > candle.low) {
            points.lows.push(SwingPoint {
                index: i,
                price: candle.low,
                timestamp: candle.open_time,
                kind: SwingKind::Low,
            });
        }
    }

    points
}
