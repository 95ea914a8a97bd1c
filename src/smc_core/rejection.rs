//! Rejection candles that confirm a zone is holding

use serde::{Deserialize, Serialize};

use crate::types::{Candle, Direction};

const HAMMER_MIN_WICK_RATIO: f64 = 0.6;
const HAMMER_MIN_CLOSE_POSITION: f64 = 0.6;
const HAMMER_MIN_RANGE_PERCENT: f64 = 1.5;
const STRONG_CLOSE_MIN_POSITION: f64 = 0.75;
const STRONG_CLOSE_MIN_WICK_RATIO: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectionPattern {
    /// Hammer for longs, shooting star for shorts
    Hammer,
    Engulfing,
    StrongClose,
}

impl std::fmt::Display for RejectionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionPattern::Hammer => write!(f, "hammer"),
            RejectionPattern::Engulfing => write!(f, "engulfing"),
            RejectionPattern::StrongClose => write!(f, "strong close"),
        }
    }
}

/// Rejection pattern printed by `candle` in favour of `direction`, if any.
/// Hammer wins over engulfing, engulfing over strong close.
pub fn detect_rejection(candle: &Candle, previous: Option<&Candle>, direction: Direction) -> Option<RejectionPattern> {
    if !candle.is_well_formed() {
        return None;
    }
    let range = candle.range();
    if range <= 0.0 {
        return None;
    }

    // Wick on the rejection side and close position measured from the far extreme
    let (wick, close_position, aligned) = match direction {
        Direction::Bullish => (candle.lower_wick(), (candle.close - candle.low) / range, candle.is_bullish()),
        Direction::Bearish => (candle.upper_wick(), (candle.high - candle.close) / range, candle.is_bearish()),
    };
    let wick_ratio = wick / range;

    if wick_ratio >= HAMMER_MIN_WICK_RATIO
        && close_position >= HAMMER_MIN_CLOSE_POSITION
        && range / candle.close * 100.0 >= HAMMER_MIN_RANGE_PERCENT
    {
        return Some(RejectionPattern::Hammer);
    }

    if let Some(prev) = previous.filter(|p| p.is_well_formed()) {
        let engulfs = match direction {
            Direction::Bullish => candle.close > prev.open && candle.open < prev.close && candle.close > prev.high,
            Direction::Bearish => candle.close < prev.open && candle.open > prev.close && candle.close < prev.low,
        };
        if engulfs && aligned {
            return Some(RejectionPattern::Engulfing);
        }
    }

    if aligned && close_position > STRONG_CLOSE_MIN_POSITION && wick_ratio > STRONG_CLOSE_MIN_WICK_RATIO {
        return Some(RejectionPattern::StrongClose);
    }

    None
}

/// Rejection on the latest candle of the series
pub fn latest_rejection(candles: &[Candle], direction: Direction) -> Option<RejectionPattern> {
    let (last, rest) = candles.split_last()?;
    detect_rejection(last, rest.last(), direction)
}
