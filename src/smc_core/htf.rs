//! Higher-Timeframe Analysis
//!
//! Overlays trend, zones and structure from a coarser timeframe onto the
//! trading timeframe. Trend is a 2-of-3 vote:
//! 1. EMA(20) vs EMA(50)
//! 2. Swing pattern over the last 3 swings (HH+HL or LH+LL)
//! 3. Close above or below both EMAs

use serde::{Deserialize, Serialize};

use super::fvg::{detect_fvgs, FairValueGap};
use super::indicators::ema;
use super::order_blocks::{detect_order_blocks, OrderBlock};
use super::structure::{analyze_market_structure, detect_swing_breaks, StructureBreak};
use super::swings::{detect_swing_points, SwingPoint, SwingPoints, DEFAULT_SWING_LOOKBACK};
use super::zones::PriceZone;
use crate::types::{Candle, Direction, Timeframe};

/// Candles needed before the trend vote is attempted
pub const MIN_HTF_TREND_CANDLES: usize = 100;
const ZONE_LOOKBACK: usize = 50;
const DISCOUNT_MAX: f64 = 0.382;
const PREMIUM_MIN: f64 = 0.618;
const MIN_HTF_FVG_PERCENT: f64 = 0.2;
const STRUCTURE_SWINGS: usize = 5;
const STRUCTURE_MIN_CONFIDENCE: f64 = 60.0;
const RECENT_SWING_CANDLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HtfTrend {
    Bullish,
    Bearish,
    Neutral,
}

impl HtfTrend {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            HtfTrend::Bullish => Some(Direction::Bullish),
            HtfTrend::Bearish => Some(Direction::Bearish),
            HtfTrend::Neutral => None,
        }
    }
}

impl std::fmt::Display for HtfTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HtfTrend::Bullish => write!(f, "bullish"),
            HtfTrend::Bearish => write!(f, "bearish"),
            HtfTrend::Neutral => write!(f, "neutral"),
        }
    }
}

/// Price position in the trailing HTF range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtfZone {
    pub zone: PriceZone,
    /// 0 = range low, 1 = range high
    pub position: f64,
    /// How deep into the zone, 0..=1 (always 0 in equilibrium)
    pub strength: f64,
    pub range_high: f64,
    pub range_low: f64,
}

/// Direction of the recent HTF swing sequence and how fresh it is
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtfStructure {
    pub direction: Option<Direction>,
    /// Share of swing-to-swing comparisons agreeing with `direction`
    pub confidence: f64,
    pub recent: bool,
    pub last_swing_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtfAnalysis {
    pub timeframe: Timeframe,
    pub trend: HtfTrend,
    pub bullish_votes: u8,
    pub bearish_votes: u8,
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub zone: Option<HtfZone>,
    pub structure: HtfStructure,
    pub order_blocks: Vec<OrderBlock>,
    pub fvgs: Vec<FairValueGap>,
    pub breaks: Vec<StructureBreak>,
}

impl HtfAnalysis {
    pub fn trend_aligned(&self, direction: Direction) -> bool {
        self.trend.direction() == Some(direction)
    }

    /// HTF price sits in the zone this direction wants (discount for longs)
    pub fn zone_aligned(&self, direction: Direction) -> bool {
        self.zone
            .map(|z| z.zone == PriceZone::favoured_for(direction))
            .unwrap_or(false)
    }
}

pub fn analyze_htf(candles: &[Candle], timeframe: Timeframe, ob_impulse_threshold: f64) -> HtfAnalysis {
    let swings = detect_swing_points(candles, DEFAULT_SWING_LOOKBACK);
    let closes: Vec<f64> = candles.iter().filter(|c| c.is_well_formed()).map(|c| c.close).collect();
    let ema20 = ema(&closes, 20);
    let ema50 = ema(&closes, 50);

    let (bullish_votes, bearish_votes) = if candles.len() >= MIN_HTF_TREND_CANDLES {
        trend_votes(&swings, closes.last().copied(), ema20, ema50)
    } else {
        (0, 0)
    };
    let trend = if bullish_votes >= 2 {
        HtfTrend::Bullish
    } else if bearish_votes >= 2 {
        HtfTrend::Bearish
    } else {
        HtfTrend::Neutral
    };

    let fvgs: Vec<FairValueGap> = detect_fvgs(candles, timeframe)
        .into_iter()
        .filter(|g| g.gap_percent > MIN_HTF_FVG_PERCENT)
        .collect();

    HtfAnalysis {
        timeframe,
        trend,
        bullish_votes,
        bearish_votes,
        ema20,
        ema50,
        zone: htf_zone(candles),
        structure: htf_structure(&swings, candles.len()),
        order_blocks: detect_order_blocks(candles, ob_impulse_threshold, timeframe),
        fvgs,
        breaks: detect_swing_breaks(candles, &swings),
    }
}

fn trend_votes(swings: &SwingPoints, close: Option<f64>, ema20: Option<f64>, ema50: Option<f64>) -> (u8, u8) {
    let mut bullish = 0;
    let mut bearish = 0;

    if let (Some(fast), Some(slow)) = (ema20, ema50) {
        if fast > slow {
            bullish += 1;
        } else if fast < slow {
            bearish += 1;
        }

        if let Some(close) = close {
            if close > fast && close > slow {
                bullish += 1;
            } else if close < fast && close < slow {
                bearish += 1;
            }
        }
    }

    let structure = analyze_market_structure(swings);
    if structure.higher_highs >= 1 && structure.higher_lows >= 1 {
        bullish += 1;
    } else if structure.lower_highs >= 1 && structure.lower_lows >= 1 {
        bearish += 1;
    }

    (bullish, bearish)
}

fn htf_zone(candles: &[Candle]) -> Option<HtfZone> {
    let window: Vec<&Candle> = candles[candles.len().saturating_sub(ZONE_LOOKBACK)..]
        .iter()
        .filter(|c| c.is_well_formed())
        .collect();
    let price = window.last()?.close;
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if high <= low {
        return None;
    }

    let position = (price - low) / (high - low);
    let (zone, strength) = if position <= DISCOUNT_MAX {
        (PriceZone::Discount, (DISCOUNT_MAX - position) / DISCOUNT_MAX)
    } else if position >= PREMIUM_MIN {
        (PriceZone::Premium, (position - PREMIUM_MIN) / (1.0 - PREMIUM_MIN))
    } else {
        (PriceZone::Equilibrium, 0.0)
    };

    Some(HtfZone {
        zone,
        position,
        strength: strength.clamp(0.0, 1.0),
        range_high: high,
        range_low: low,
    })
}

fn htf_structure(swings: &SwingPoints, len: usize) -> HtfStructure {
    let highs = &swings.highs[swings.highs.len().saturating_sub(STRUCTURE_SWINGS)..];
    let lows = &swings.lows[swings.lows.len().saturating_sub(STRUCTURE_SWINGS)..];
    let comparisons = highs.len().saturating_sub(1) + lows.len().saturating_sub(1);
    let none = HtfStructure {
        direction: None,
        confidence: 0.0,
        recent: false,
        last_swing_index: None,
    };
    if comparisons == 0 {
        return none;
    }

    // Swings that continue the pattern (rising for bullish, falling for bearish)
    let continuing = |points: &[SwingPoint], rising: bool| -> Vec<usize> {
        points
            .windows(2)
            .filter(|w| if rising { w[1].price > w[0].price } else { w[1].price < w[0].price })
            .map(|w| w[1].index)
            .collect()
    };

    let candidates = [
        (Direction::Bullish, [continuing(highs, true), continuing(lows, true)].concat()),
        (Direction::Bearish, [continuing(highs, false), continuing(lows, false)].concat()),
    ];

    for (direction, agreeing) in candidates {
        let confidence = agreeing.len() as f64 / comparisons as f64 * 100.0;
        if confidence >= STRUCTURE_MIN_CONFIDENCE {
            let last = agreeing.iter().copied().max();
            return HtfStructure {
                direction: Some(direction),
                confidence,
                recent: last.map(|i| i + RECENT_SWING_CANDLES >= len.saturating_sub(1)).unwrap_or(false),
                last_swing_index: last,
            };
        }
    }

    none
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc_core::testing::{from_closes, mirror};

    /// Zig-zag climbing 1.5 per leg: higher highs and higher lows throughout
    fn rising_zigzag(n: usize) -> Vec<Candle> {
        let closes: Vec<f64> = (0..n)
            .map(|i| {
                let leg = (i / 6) as f64;
                let phase = (i % 6) as f64;
                let swing = if phase < 4.0 { phase } else { 6.0 - phase };
                100.0 + leg * 1.5 + swing
            })
            .collect();
        from_closes(100.0, &closes, 0.2)
    }

    #[test]
    fn test_short_series_is_neutral() {
        let analysis = analyze_htf(&rising_zigzag(80), Timeframe::H4, 0.005);
        assert_eq!(analysis.trend, HtfTrend::Neutral);
        assert_eq!(analysis.bullish_votes, 0);
    }

    #[test]
    fn test_rising_series_is_bullish() {
        let analysis = analyze_htf(&rising_zigzag(120), Timeframe::H4, 0.005);
        assert_eq!(analysis.trend, HtfTrend::Bullish);
        assert!(analysis.bullish_votes >= 2);
        assert!(analysis.trend_aligned(Direction::Bullish));
        assert_eq!(analysis.structure.direction, Some(Direction::Bullish));
        assert!(analysis.structure.recent);
        assert!(analysis.fvgs.iter().all(|g| g.gap_percent > MIN_HTF_FVG_PERCENT));
    }

    #[test]
    fn test_falling_series_is_bearish() {
        let analysis = analyze_htf(&mirror(&rising_zigzag(120), 150.0), Timeframe::H4, 0.005);
        assert_eq!(analysis.trend, HtfTrend::Bearish);
        assert_eq!(analysis.structure.direction, Some(Direction::Bearish));
    }

    #[test]
    fn test_zone_thresholds() {
        // Price at the top of the rising series sits in premium
        let analysis = analyze_htf(&rising_zigzag(120), Timeframe::H4, 0.005);
        let zone = analysis.zone.unwrap();
        assert!(zone.position >= PREMIUM_MIN);
        assert_eq!(zone.zone, PriceZone::Premium);
        assert!(analysis.zone_aligned(Direction::Bearish));
        assert!(!analysis.zone_aligned(Direction::Bullish));
        assert!(zone.strength > 0.0 && zone.strength <= 1.0);
    }
}
