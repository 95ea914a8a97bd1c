//! Market Structure
//!
//! Classifies trend from the last three swing highs and lows and detects
//! breaks of structure:
//! - CHoCH: close beyond the last opposing swing, against the prevailing trend
//! - BOS: close beyond the last same-side swing, with the trend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::swings::{SwingPoint, SwingPoints};
use crate::types::{Candle, Direction};

/// Swings sampled from the end of each list
const STRUCTURE_SAMPLE: usize = 3;
/// Below this swing range (percent of midpoint) a directionless market is ranging
const RANGING_MAX_PERCENT: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Uptrend,
    Downtrend,
    Ranging,
    Neutral,
}

impl Trend {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Trend::Uptrend => Some(Direction::Bullish),
            Trend::Downtrend => Some(Direction::Bearish),
            Trend::Ranging | Trend::Neutral => None,
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Uptrend => write!(f, "uptrend"),
            Trend::Downtrend => write!(f, "downtrend"),
            Trend::Ranging => write!(f, "ranging"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendConfidence {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStructure {
    pub trend: Trend,
    pub confidence: TrendConfidence,
    pub last_swing_high: Option<SwingPoint>,
    pub last_swing_low: Option<SwingPoint>,
    pub higher_highs: usize,
    pub higher_lows: usize,
    pub lower_highs: usize,
    pub lower_lows: usize,
    /// Range of the sampled swings as percent of their midpoint
    pub range_percent: f64,
}

impl MarketStructure {
    fn neutral(swings: &SwingPoints) -> Self {
        Self {
            trend: Trend::Neutral,
            confidence: TrendConfidence::Low,
            last_swing_high: swings.last_high().copied(),
            last_swing_low: swings.last_low().copied(),
            higher_highs: 0,
            higher_lows: 0,
            lower_highs: 0,
            lower_lows: 0,
            range_percent: 0.0,
        }
    }
}

fn tail(points: &[SwingPoint]) -> &[SwingPoint] {
    &points[points.len().saturating_sub(STRUCTURE_SAMPLE)..]
}

/// Count pairwise rises and falls between consecutive swings
fn count_steps(points: &[SwingPoint]) -> (usize, usize) {
    points.windows(2).fold((0, 0), |(up, down), w| {
        if w[1].price > w[0].price {
            (up + 1, down)
        } else if w[1].price < w[0].price {
            (up, down + 1)
        } else {
            (up, down)
        }
    })
}

/// Classify trend from swing sequences
pub fn analyze_market_structure(swings: &SwingPoints) -> MarketStructure {
    if swings.highs.len() < 2 || swings.lows.len() < 2 {
        return MarketStructure::neutral(swings);
    }

    let highs = tail(&swings.highs);
    let lows = tail(&swings.lows);
    let (higher_highs, lower_highs) = count_steps(highs);
    let (higher_lows, lower_lows) = count_steps(lows);

    let top = highs.iter().map(|p| p.price).fold(f64::MIN, f64::max);
    let bottom = lows.iter().map(|p| p.price).fold(f64::MAX, f64::min);
    let midpoint = (top + bottom) / 2.0;
    let range_percent = if midpoint > 0.0 { (top - bottom) / midpoint * 100.0 } else { 0.0 };

    // Two rises (or falls) on both sides; a single step on either side is low
    let graded = |a: usize, b: usize| {
        if a >= 2 && b >= 2 {
            TrendConfidence::High
        } else {
            TrendConfidence::Low
        }
    };

    let (trend, confidence) = if higher_highs >= 1 && higher_lows >= 1 {
        (Trend::Uptrend, graded(higher_highs, higher_lows))
    } else if lower_highs >= 1 && lower_lows >= 1 {
        (Trend::Downtrend, graded(lower_highs, lower_lows))
    } else if range_percent < RANGING_MAX_PERCENT {
        (Trend::Ranging, TrendConfidence::Low)
    } else {
        (Trend::Neutral, TrendConfidence::Low)
    };

    MarketStructure {
        trend,
        confidence,
        last_swing_high: swings.last_high().copied(),
        last_swing_low: swings.last_low().copied(),
        higher_highs,
        higher_lows,
        lower_highs,
        lower_lows,
        range_percent,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    /// Continuation in the trend direction
    Bos,
    /// Change of character: first break against the trend
    Choch,
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakKind::Bos => write!(f, "BOS"),
            BreakKind::Choch => write!(f, "CHoCH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureBreak {
    #[serde(rename = "type")]
    pub direction: Direction,
    pub kind: BreakKind,
    pub index: usize,
    pub break_level: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub previous_trend: Trend,
}

/// Scan forward from the later of the last swing high/low for the first
/// close beyond each relevant swing level.
pub fn detect_structure_breaks(candles: &[Candle], structure: &MarketStructure) -> Vec<StructureBreak> {
    let (Some(high), Some(low)) = (structure.last_swing_high, structure.last_swing_low) else {
        return Vec::new();
    };

    // (direction, level, kind) pairs that can break given the trend
    let watch: Vec<(Direction, f64, BreakKind)> = match structure.trend {
        Trend::Downtrend => vec![
            (Direction::Bullish, high.price, BreakKind::Choch),
            (Direction::Bearish, low.price, BreakKind::Bos),
        ],
        Trend::Uptrend => vec![
            (Direction::Bearish, low.price, BreakKind::Choch),
            (Direction::Bullish, high.price, BreakKind::Bos),
        ],
        Trend::Ranging | Trend::Neutral => Vec::new(),
    };

    let start = high.index.max(low.index) + 1;
    let mut breaks = Vec::new();

    for (direction, level, kind) in watch {
        let first = candles
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(_, c)| c.is_well_formed())
            .find(|(_, c)| match direction {
                Direction::Bullish => c.close > level,
                Direction::Bearish => c.close < level,
            });

        if let Some((index, candle)) = first {
            breaks.push(StructureBreak {
                direction,
                kind,
                index,
                break_level: level,
                timestamp: candle.open_time,
                previous_trend: structure.trend,
            });
        }
    }

    breaks.sort_by_key(|b| b.index);
    breaks
}

/// Every historical swing break: each swing high is broken by the first later
/// close above it, each swing low by the first later close below it. A break
/// of a lower high (or higher low) is a CHoCH, anything else a BOS.
pub fn detect_swing_breaks(candles: &[Candle], swings: &SwingPoints) -> Vec<StructureBreak> {
    let mut breaks = Vec::new();

    for (direction, points) in [(Direction::Bullish, &swings.highs), (Direction::Bearish, &swings.lows)] {
        for (k, swing) in points.iter().enumerate() {
            let first = candles
                .iter()
                .enumerate()
                .skip(swing.index + 1)
                .filter(|(_, c)| c.is_well_formed())
                .find(|(_, c)| match direction {
                    Direction::Bullish => c.close > swing.price,
                    Direction::Bearish => c.close < swing.price,
                });
            let Some((index, candle)) = first else {
                continue;
            };

            let previous_trend = match k.checked_sub(1).map(|p| points[p].price) {
                Some(prev) if direction == Direction::Bullish && swing.price < prev => Trend::Downtrend,
                Some(prev) if direction == Direction::Bearish && swing.price > prev => Trend::Uptrend,
                Some(_) => match direction {
                    Direction::Bullish => Trend::Uptrend,
                    Direction::Bearish => Trend::Downtrend,
                },
                None => Trend::Neutral,
            };
            let kind = match (direction, previous_trend) {
                (Direction::Bullish, Trend::Downtrend) | (Direction::Bearish, Trend::Uptrend) => BreakKind::Choch,
                _ => BreakKind::Bos,
            };

            breaks.push(StructureBreak {
                direction,
                kind,
                index,
                break_level: swing.price,
                timestamp: candle.open_time,
                previous_trend,
            });
        }
    }

    merge_breaks(breaks, Vec::new())
}

/// Union of two break lists, one per (direction, candle), keeping the most
/// extreme level broken. Sorted by index.
pub fn merge_breaks(a: Vec<StructureBreak>, b: Vec<StructureBreak>) -> Vec<StructureBreak> {
    let mut merged: Vec<StructureBreak> = Vec::with_capacity(a.len() + b.len());
    for brk in a.into_iter().chain(b) {
        match merged.iter_mut().find(|m| m.direction == brk.direction && m.index == brk.index) {
            Some(existing) => {
                let further = match brk.direction {
                    Direction::Bullish => brk.break_level > existing.break_level,
                    Direction::Bearish => brk.break_level < existing.break_level,
                };
                if further {
                    *existing = brk;
                }
            }
            None => merged.push(brk),
        }
    }
    merged.sort_by_key(|b| (b.index, b.direction == Direction::Bearish));
    merged
}
