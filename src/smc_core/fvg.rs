//! Fair Value Gap Detection
//!
//! Three-candle imbalance: the wicks of candle i-2 and candle i do not
//! overlap. Only gaps created by a displacement candle (a real body moving in
//! the gap direction) are kept. Each gap carries how much of it later price
//! has filled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Candle, Direction, Timeframe};

/// Fill fraction (percent) below which a gap is only "touched"
const TOUCHED_MAX_FILL: f64 = 30.0;
/// Fill fraction (percent) at which a gap counts as filled
const FILLED_MIN_FILL: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillStatus {
    Unfilled,
    Touched,
    Partial,
    Filled,
}

impl FillStatus {
    fn from_fill_percent(fill: f64) -> Self {
        if fill <= 0.0 {
            FillStatus::Unfilled
        } else if fill < TOUCHED_MAX_FILL {
            FillStatus::Touched
        } else if fill < FILLED_MIN_FILL {
            FillStatus::Partial
        } else {
            FillStatus::Filled
        }
    }

    /// Still usable as an entry zone
    pub fn is_open(&self) -> bool {
        !matches!(self, FillStatus::Filled)
    }
}

impl std::fmt::Display for FillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillStatus::Unfilled => write!(f, "unfilled"),
            FillStatus::Touched => write!(f, "touched"),
            FillStatus::Partial => write!(f, "partially filled"),
            FillStatus::Filled => write!(f, "filled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairValueGap {
    #[serde(rename = "type")]
    pub direction: Direction,
    /// Index of the third candle, the one that completes the gap
    pub index: usize,
    pub top: f64,
    pub bottom: f64,
    pub gap_size: f64,
    /// Gap size as percent of the reference price (the gap edge of candle i-2)
    pub gap_percent: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Price has traded all the way through the gap
    pub mitigated: bool,
    pub fill_percent: f64,
    pub fill_status: FillStatus,
}

impl FairValueGap {
    pub fn midpoint(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    pub fn contains(&self, candle: &Candle) -> bool {
        candle.intersects(self.bottom, self.top)
    }
}

/// Detect FVGs with the timeframe's gap and displacement thresholds
pub fn detect_fvgs(candles: &[Candle], timeframe: Timeframe) -> Vec<FairValueGap> {
    detect_fvgs_with(
        candles,
        timeframe.fvg_min_gap_percent(),
        timeframe.fvg_min_displacement_percent(),
    )
}

/// Detect FVGs with explicit thresholds (percent values)
pub fn detect_fvgs_with(candles: &[Candle], min_gap_percent: f64, min_displacement_percent: f64) -> Vec<FairValueGap> {
    let mut gaps = Vec::new();
    if candles.len() < 3 {
        return gaps;
    }

    for i in 2..candles.len() {
        let (first, middle, third) = (&candles[i - 2], &candles[i - 1], &candles[i]);
        if !(first.is_well_formed() && middle.is_well_formed() && third.is_well_formed()) {
            continue;
        }

        let candidate = if third.low > first.high {
            Some((Direction::Bullish, third.low, first.high, first.high))
        } else if third.high < first.low {
            Some((Direction::Bearish, first.low, third.high, first.low))
        } else {
            None
        };
        let Some((direction, top, bottom, reference)) = candidate else {
            continue;
        };

        let gap_size = top - bottom;
        let gap_percent = gap_size / reference * 100.0;
        if gap_percent < min_gap_percent {
            continue;
        }

        let displacement = middle.body() / middle.open * 100.0;
        let aligned = match direction {
            Direction::Bullish => middle.is_bullish(),
            Direction::Bearish => middle.is_bearish(),
        };
        if !aligned || displacement < min_displacement_percent {
            continue;
        }

        let fill_percent = fill_percent(direction, top, bottom, &candles[i + 1..]);
        gaps.push(FairValueGap {
            direction,
            index: i,
            top,
            bottom,
            gap_size,
            gap_percent,
            timestamp: third.open_time,
            mitigated: fill_percent >= 100.0,
            fill_percent,
            fill_status: FillStatus::from_fill_percent(fill_percent),
        });
    }

    gaps
}

/// Deepest retracement into the gap by later candles, 0..=100
fn fill_percent(direction: Direction, top: f64, bottom: f64, later: &[Candle]) -> f64 {
    let size = top - bottom;
    if size <= 0.0 {
        return 0.0;
    }

    let filled = match direction {
        Direction::Bullish => {
            let deepest = later
                .iter()
                .filter(|c| c.is_well_formed())
                .map(|c| c.low)
                .fold(f64::MAX, f64::min);
            top - deepest
        }
        Direction::Bearish => {
            let deepest = later
                .iter()
                .filter(|c| c.is_well_formed())
                .map(|c| c.high)
                .fold(f64::MIN, f64::max);
            deepest - bottom
        }
    };

    (filled / size * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc_core::testing::{candle, mirror, random_walk};

    fn bullish_gap() -> Vec<Candle> {
        vec![
            candle(0, 100.0, 100.5, 99.5, 100.2),
            candle(1, 100.3, 102.2, 100.2, 102.0),
            candle(2, 102.0, 103.0, 101.5, 102.8),
        ]
    }

    #[test]
    fn test_bullish_gap_edges() {
        let candles = bullish_gap();
        let gaps = detect_fvgs(&candles, Timeframe::H1);
        assert_eq!(gaps.len(), 1);
        let gap = gaps[0];
        assert_eq!(gap.direction, Direction::Bullish);
        assert_eq!(gap.index, 2);
        assert_eq!(gap.bottom, candles[0].high);
        assert_eq!(gap.top, candles[2].low);
        assert!((gap.gap_size - 1.0).abs() < 1e-9);
        assert_eq!(gap.fill_status, FillStatus::Unfilled);
        assert!(!gap.mitigated);
    }

    #[test]
    fn test_requires_displacement() {
        let mut candles = bullish_gap();
        // Doji middle candle: same gap, no momentum
        candles[1] = candle(1, 101.0, 102.2, 100.2, 101.05);
        assert!(detect_fvgs(&candles, Timeframe::H1).is_empty());

        // Bearish-coloured middle candle cannot back a bullish gap
        candles[1] = candle(1, 102.0, 102.2, 100.2, 100.3);
        assert!(detect_fvgs(&candles, Timeframe::H1).is_empty());
    }

    #[test]
    fn test_min_gap_threshold() {
        let candles = vec![
            candle(0, 100.0, 100.5, 99.5, 100.2),
            candle(1, 100.3, 102.2, 100.2, 102.0),
            candle(2, 102.0, 103.0, 100.6, 102.8),
        ];
        // 0.1% gap is below the 1h minimum but above the 4h one
        assert!(detect_fvgs(&candles, Timeframe::H1).is_empty());
        assert_eq!(detect_fvgs(&candles, Timeframe::H4).len(), 1);
    }

    #[test]
    fn test_fill_tracking() {
        let mut candles = bullish_gap();
        candles.push(candle(3, 102.8, 103.2, 101.3, 102.0));
        let gap = detect_fvgs(&candles, Timeframe::H1)[0];
        assert!((gap.fill_percent - 20.0).abs() < 1e-6);
        assert_eq!(gap.fill_status, FillStatus::Touched);

        candles.push(candle(4, 102.0, 102.1, 100.9, 101.0));
        let gap = detect_fvgs(&candles, Timeframe::H1)[0];
        assert_eq!(gap.fill_status, FillStatus::Partial);

        candles.push(candle(5, 101.0, 101.1, 100.3, 100.4));
        let gap = detect_fvgs(&candles, Timeframe::H1)[0];
        assert_eq!(gap.fill_status, FillStatus::Filled);
        assert!(gap.mitigated);
        assert!(!gap.fill_status.is_open());
    }

    #[test]
    fn test_ordering_invariant_on_random_series() {
        for seed in 0..20 {
            let candles = random_walk(400, seed);
            for gap in detect_fvgs(&candles, Timeframe::H1) {
                assert!(gap.top > gap.bottom);
                assert!(gap.gap_percent >= Timeframe::H1.fvg_min_gap_percent());
                match gap.direction {
                    Direction::Bullish => {
                        assert_eq!(gap.bottom, candles[gap.index - 2].high);
                        assert_eq!(gap.top, candles[gap.index].low);
                    }
                    Direction::Bearish => {
                        assert_eq!(gap.top, candles[gap.index - 2].low);
                        assert_eq!(gap.bottom, candles[gap.index].high);
                    }
                }
            }
        }
    }

    #[test]
    fn test_bearish_mirror() {
        let candles = mirror(&bullish_gap(), 100.0);
        let gaps = detect_fvgs(&candles, Timeframe::H1);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].direction, Direction::Bearish);
        assert_eq!(gaps[0].index, 2);
        assert!((gaps[0].gap_size - 1.0).abs() < 1e-9);
    }
}
