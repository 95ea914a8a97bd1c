//! Order Block Detection
//!
//! The last opposing candle before an impulse. A bearish candle followed by a
//! strong up-move becomes a bullish block spanning its full high-low range,
//! and the reverse for bearish blocks. Only blocks that no later candle has
//! traded back into are kept ("fresh").
//!
//! Blocks can additionally be graded against ICT criteria:
//! - clean candle (body ≥ 40% of range)
//! - clean structure before it (few colour flips)
//! - volume at or above 80% of the prior average
//! - a swing break shortly after the block
//! - a same-direction FVG created by the impulse
//!
//! A block that price later closes through flips polarity and becomes a
//! breaker: a failed bullish block is resistance, a failed bearish block support.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fvg::FairValueGap;
use super::swings::SwingPoints;
use crate::types::{Candle, Direction, Timeframe};

const CLEAN_BODY_RATIO: f64 = 0.4;
const CLEAN_STRUCTURE_WINDOW: usize = 6;
const CLEAN_STRUCTURE_MAX_FLIPS: usize = 3;
const VOLUME_AVG_WINDOW: usize = 20;
const VOLUME_CONFIRM_RATIO: f64 = 0.8;
const BOS_NEARBY_CANDLES: usize = 10;
const FVG_NEARBY_CANDLES: usize = 5;

/// ICT grading of a single block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IctValidation {
    pub clean_candle: bool,
    pub clean_structure: bool,
    pub volume_confirmed: bool,
    /// Block volume / prior average volume
    pub volume_strength: f64,
    pub bos_nearby: bool,
    pub fvg_nearby: bool,
    /// 20 points per satisfied criterion (0-100)
    pub quality_score: u32,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBlock {
    #[serde(rename = "type")]
    pub direction: Direction,
    pub index: usize,
    pub top: f64,
    pub bottom: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Largest impulse away from the block, in percent
    pub strength: f64,
    /// Candle where that impulse peaked
    pub impulse_index: usize,
    pub is_fresh: bool,
    /// Later candles (before the evaluation bar) that traded into the block
    pub touches: usize,
    pub volume: f64,
    pub ict: Option<IctValidation>,
}

impl OrderBlock {
    pub fn contains(&self, candle: &Candle) -> bool {
        candle.intersects(self.bottom, self.top)
    }

    pub fn is_ict_valid(&self) -> bool {
        self.ict.map(|v| v.is_valid).unwrap_or(false)
    }
}

/// Detect fresh order blocks, evaluated at the latest candle
pub fn detect_order_blocks(candles: &[Candle], impulse_threshold: f64, timeframe: Timeframe) -> Vec<OrderBlock> {
    let candidates = find_order_block_candidates(candles, impulse_threshold, timeframe.ob_forward_offsets());
    retain_fresh(candidates, candles, candles.len().saturating_sub(1))
}

/// Every block whose impulse clears the threshold, fresh or not.
/// `impulse_threshold` is a fraction (0.005 = 0.5%).
pub fn find_order_block_candidates(candles: &[Candle], impulse_threshold: f64, offsets: &[usize]) -> Vec<OrderBlock> {
    let threshold_pct = impulse_threshold * 100.0;
    let mut blocks = Vec::new();

    for (i, candle) in candles.iter().enumerate() {
        if !candle.is_well_formed() {
            continue;
        }

        let direction = if candle.is_bearish() {
            Direction::Bullish
        } else if candle.is_bullish() {
            Direction::Bearish
        } else {
            continue;
        };

        let impulse = offsets
            .iter()
            .map(|&k| i + k)
            .filter_map(|j| candles.get(j).map(|later| (j, later)))
            .filter(|(_, c)| c.is_well_formed())
            .map(|(j, later)| match direction {
                Direction::Bullish => (j, (later.high - candle.low) / candle.low * 100.0),
                Direction::Bearish => (j, (candle.high - later.low) / candle.high * 100.0),
            })
            .fold(None, |best: Option<(usize, f64)>, (j, move_pct)| match best {
                Some((_, b)) if b >= move_pct => best,
                _ => Some((j, move_pct)),
            });

        let Some((impulse_index, strength)) = impulse.filter(|&(_, s)| s >= threshold_pct) else {
            continue;
        };

        blocks.push(OrderBlock {
            direction,
            index: i,
            top: candle.high,
            bottom: candle.low,
            timestamp: candle.open_time,
            strength,
            impulse_index,
            is_fresh: true,
            touches: 0,
            volume: candle.volume,
            ict: None,
        });
    }

    blocks
}

/// Count touches between each block and `eval_index` (exclusive)
pub fn mark_touches(blocks: &mut [OrderBlock], candles: &[Candle], eval_index: usize) {
    for block in blocks.iter_mut() {
        let end = eval_index.min(candles.len());
        let start = (block.index + 1).min(end);
        block.touches = candles[start..end].iter().filter(|c| block.contains(c)).count();
        block.is_fresh = block.touches == 0;
    }
}

/// Keep only blocks untouched before `eval_index`. Idempotent.
pub fn retain_fresh(mut blocks: Vec<OrderBlock>, candles: &[Candle], eval_index: usize) -> Vec<OrderBlock> {
    mark_touches(&mut blocks, candles, eval_index);
    blocks.retain(|b| b.is_fresh);
    blocks
}

/// Grade a block against the ICT criteria
pub fn validate_ict(block: &OrderBlock, candles: &[Candle], swings: &SwingPoints, fvgs: &[FairValueGap]) -> IctValidation {
    let Some(candle) = candles.get(block.index) else {
        return IctValidation {
            clean_candle: false,
            clean_structure: false,
            volume_confirmed: false,
            volume_strength: 0.0,
            bos_nearby: false,
            fvg_nearby: false,
            quality_score: 0,
            is_valid: false,
        };
    };

    let clean_candle = candle.range() > 0.0 && candle.body() / candle.range() >= CLEAN_BODY_RATIO;

    let before = &candles[block.index.saturating_sub(CLEAN_STRUCTURE_WINDOW)..block.index];
    let flips = before
        .windows(2)
        .filter(|w| w[0].is_bullish() != w[1].is_bullish())
        .count();
    let clean_structure = before.len() >= 2 && flips <= CLEAN_STRUCTURE_MAX_FLIPS;

    let prior = &candles[block.index.saturating_sub(VOLUME_AVG_WINDOW)..block.index];
    let avg_volume = if prior.is_empty() {
        0.0
    } else {
        prior.iter().map(|c| c.volume).sum::<f64>() / prior.len() as f64
    };
    let volume_strength = if avg_volume > 0.0 { candle.volume / avg_volume } else { 0.0 };
    let volume_confirmed = volume_strength >= VOLUME_CONFIRM_RATIO;

    let bos_nearby = broke_structure_after(block, candles, swings);
    let fvg_nearby = fvgs.iter().any(|g| {
        g.direction == block.direction && g.index > block.index && g.index <= block.index + FVG_NEARBY_CANDLES
    });

    let quality_score = [clean_candle, clean_structure, volume_confirmed, bos_nearby, fvg_nearby]
        .iter()
        .filter(|&&x| x)
        .count() as u32
        * 20;

    IctValidation {
        clean_candle,
        clean_structure,
        volume_confirmed,
        volume_strength,
        bos_nearby,
        fvg_nearby,
        quality_score,
        is_valid: clean_candle && volume_confirmed && bos_nearby && fvg_nearby,
    }
}

/// Attach ICT grading to every block
pub fn apply_ict_validation(blocks: &mut [OrderBlock], candles: &[Candle], swings: &SwingPoints, fvgs: &[FairValueGap]) {
    for block in blocks.iter_mut() {
        block.ict = Some(validate_ict(block, candles, swings, fvgs));
    }
}

/// Order block that failed: price closed through it after its impulse.
/// `direction` is the new polarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerBlock {
    #[serde(rename = "type")]
    pub direction: Direction,
    /// Index of the original block candle
    pub index: usize,
    pub break_index: usize,
    pub top: f64,
    pub bottom: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub break_timestamp: DateTime<Utc>,
    pub strength: f64,
    /// Candles after the break that traded back into the zone
    pub retests: usize,
}

impl BreakerBlock {
    pub fn contains(&self, candle: &Candle) -> bool {
        candle.intersects(self.bottom, self.top)
    }

    pub fn is_retested(&self) -> bool {
        self.retests > 0
    }
}

/// Flip failed blocks into breakers. `blocks` should be the unfiltered
/// candidates: a failed block is never fresh. Breakers that price has since
/// closed back through are dropped. Sorted by break index.
pub fn detect_breaker_blocks(blocks: &[OrderBlock], candles: &[Candle]) -> Vec<BreakerBlock> {
    let closes_through = |c: &Candle, direction: Direction, bottom: f64, top: f64| match direction {
        // Support fails on a close below, resistance on a close above
        Direction::Bullish => c.close < bottom,
        Direction::Bearish => c.close > top,
    };

    let mut breakers: Vec<BreakerBlock> = blocks
        .iter()
        .filter_map(|block| {
            let (break_index, breaking) = candles
                .iter()
                .enumerate()
                .skip(block.impulse_index + 1)
                .filter(|(_, c)| c.is_well_formed())
                .find(|(_, c)| closes_through(c, block.direction, block.bottom, block.top))?;

            let direction = block.direction.opposite();
            let later = || candles[break_index + 1..].iter().filter(|c| c.is_well_formed());
            if later().any(|c| closes_through(c, direction, block.bottom, block.top)) {
                return None;
            }

            Some(BreakerBlock {
                direction,
                index: block.index,
                break_index,
                top: block.top,
                bottom: block.bottom,
                timestamp: block.timestamp,
                break_timestamp: breaking.open_time,
                strength: block.strength,
                retests: later().filter(|c| c.intersects(block.bottom, block.top)).count(),
            })
        })
        .collect();

    breakers.sort_by_key(|b| (b.break_index, b.index));
    breakers
}

/// Did a close within a few candles after the block break the last
/// opposing swing formed before it?
fn broke_structure_after(block: &OrderBlock, candles: &[Candle], swings: &SwingPoints) -> bool {
    let window_end = (block.index + BOS_NEARBY_CANDLES + 1).min(candles.len());
    let window = candles.get(block.index + 1..window_end).unwrap_or(&[]);

    match block.direction {
        Direction::Bullish => swings
            .highs
            .iter()
            .rev()
            .find(|s| s.index < block.index)
            .map(|s| window.iter().any(|c| c.close > s.price))
            .unwrap_or(false),
        Direction::Bearish => swings
            .lows
            .iter()
            .rev()
            .find(|s| s.index < block.index)
            .map(|s| window.iter().any(|c| c.close < s.price))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc_core::fvg::detect_fvgs;
    use crate::smc_core::swings::detect_swing_points;
    use crate::smc_core::testing::{bullish_setup, candle, candle_with_volume, mirror, random_walk};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// 500 hourly candles with a bearish candle at 120 followed by an 8% rally
    /// that never trades back into it
    fn impulse_at_120() -> Vec<Candle> {
        let mut candles = random_walk(120, 42);
        let p = candles[119].close;
        candles.push(candle(120, p, p * 1.001, p * 0.996, p * 0.997));

        let mut price = p * 1.004;
        for i in 121..126 {
            let open = price;
            let close = open * 1.016;
            candles.push(candle(i, open, close * 1.001, open * 0.999, close));
            price = close;
        }

        let floor = p * 1.01;
        let mut rng = StdRng::seed_from_u64(9);
        for i in 126..500 {
            let open = price;
            let close = (open * (1.0 + rng.gen_range(-0.005..0.006))).max(floor);
            let high = open.max(close) * 1.002;
            let low = open.min(close) * 0.997;
            candles.push(candle_with_volume(i, open, high, low, close, 100.0));
            price = close;
        }
        candles
    }

    #[test]
    fn test_impulse_scenario_includes_block_120() {
        let candles = impulse_at_120();
        let blocks = detect_order_blocks(&candles, 0.005, Timeframe::H1);
        let block = blocks
            .iter()
            .find(|b| b.index == 120)
            .expect("block at 120");
        assert_eq!(block.direction, Direction::Bullish);
        assert!(block.strength >= 0.5);
        assert_eq!(block.top, candles[120].high);
        assert_eq!(block.bottom, candles[120].low);
        assert!(block.is_fresh);
        assert_eq!(block.touches, 0);
    }

    #[test]
    fn test_retested_block_is_excluded() {
        let mut candles = impulse_at_120();
        let zone_top = candles[120].high;
        let c = candles[300];
        candles[300] = candle(300, c.open, c.open.max(c.close) * 1.001, zone_top * 0.999, c.close);
        let blocks = detect_order_blocks(&candles, 0.005, Timeframe::H1);
        assert!(blocks.iter().all(|b| b.index != 120));
    }

    #[test]
    fn test_touch_by_evaluation_bar_keeps_block_fresh() {
        let candles = bullish_setup();
        let blocks = detect_order_blocks(&candles, 0.005, Timeframe::H1);
        let block = blocks.iter().find(|b| b.index == 50).expect("block at 50");
        assert_eq!(block.direction, Direction::Bullish);
        // The hammer at 56 trades into the block but is the evaluation bar
        assert!(block.contains(&candles[56]));
        assert!(block.is_fresh);
    }

    #[test]
    fn test_freshness_filter_is_idempotent() {
        for seed in 0..10 {
            let candles = random_walk(300, seed);
            let eval = candles.len() - 1;
            let candidates = find_order_block_candidates(&candles, 0.003, Timeframe::M15.ob_forward_offsets());
            let once = retain_fresh(candidates, &candles, eval);
            let twice = retain_fresh(once.clone(), &candles, eval);
            assert_eq!(once, twice);

            for block in &once {
                assert!(candles[block.index + 1..eval].iter().all(|c| !block.contains(c)));
            }
        }
    }

    #[test]
    fn test_strength_meets_threshold() {
        let candles = random_walk(300, 3);
        for block in detect_order_blocks(&candles, 0.01, Timeframe::H4) {
            assert!(block.strength >= 1.0);
            assert!(block.top > block.bottom);
        }
    }

    #[test]
    fn test_doji_is_never_a_block() {
        let candles: Vec<_> = (0..10)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(i, base, base + 0.5, base - 0.5, base)
            })
            .collect();
        assert!(find_order_block_candidates(&candles, 0.001, &[3]).is_empty());
    }

    #[test]
    fn test_ict_validation_on_setup() {
        let candles = bullish_setup();
        let swings = detect_swing_points(&candles, 2);
        let fvgs = detect_fvgs(&candles, Timeframe::H1);
        let mut blocks = detect_order_blocks(&candles, 0.005, Timeframe::H1);
        apply_ict_validation(&mut blocks, &candles, &swings, &fvgs);

        let block = blocks.iter().find(|b| b.index == 50).expect("block at 50");
        let ict = block.ict.expect("graded");
        assert!(ict.clean_candle);
        assert!(ict.volume_confirmed);
        assert!((ict.volume_strength - 1.5).abs() < 1e-9);
        assert!(ict.bos_nearby);
        assert!(ict.fvg_nearby);
        assert!(ict.is_valid);
        assert!(ict.quality_score >= 80);
        assert!(block.is_ict_valid());
    }

    /// Bearish candle at 10, rally to 13, then a collapse that closes below the block
    fn failed_bullish_block() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..10).map(|i| candle(i, 100.0, 100.3, 99.7, 100.1)).collect();
        candles.push(candle(10, 100.2, 100.3, 99.5, 99.6));
        candles.push(candle(11, 99.7, 100.8, 99.6, 100.7));
        candles.push(candle(12, 100.7, 101.5, 100.6, 101.4));
        candles.push(candle(13, 101.4, 102.0, 101.2, 101.8));
        candles.push(candle(14, 101.8, 101.9, 100.5, 100.6));
        candles.push(candle(15, 100.6, 100.7, 99.0, 99.1));
        candles.push(candle(16, 99.1, 99.2, 98.5, 98.7));
        candles
    }

    #[test]
    fn test_failed_block_becomes_breaker() {
        let mut candles = failed_bullish_block();
        let blocks = find_order_block_candidates(&candles, 0.005, &[3]);
        let block = blocks.iter().find(|b| b.index == 10).expect("block at 10");
        assert_eq!(block.direction, Direction::Bullish);
        assert_eq!(block.impulse_index, 13);

        let breakers = detect_breaker_blocks(&blocks, &candles);
        let breaker = breakers.iter().find(|b| b.index == 10).expect("breaker from block 10");
        assert_eq!(breaker.direction, Direction::Bearish);
        assert_eq!(breaker.break_index, 15);
        assert_eq!((breaker.bottom, breaker.top), (99.5, 100.3));
        assert!(!breaker.is_retested());

        // Rally back into the zone that holds below the top: a retest
        candles.push(candle(17, 98.7, 99.9, 98.6, 99.4));
        let breakers = detect_breaker_blocks(&blocks, &candles);
        let breaker = breakers.iter().find(|b| b.index == 10).unwrap();
        assert_eq!(breaker.retests, 1);

        // A close back above the top invalidates it
        candles.push(candle(18, 99.4, 100.6, 99.3, 100.5));
        assert!(detect_breaker_blocks(&blocks, &candles).iter().all(|b| b.index != 10));
    }

    #[test]
    fn test_break_before_impulse_is_not_a_failure() {
        let candles = failed_bullish_block();
        let mut blocks = find_order_block_candidates(&candles, 0.005, &[3]);
        // Same block, but with its impulse peaking after the collapse
        for block in blocks.iter_mut().filter(|b| b.index == 10) {
            block.impulse_index = 16;
        }
        assert!(detect_breaker_blocks(&blocks, &candles).iter().all(|b| b.index != 10));
    }

    #[test]
    fn test_breakers_mirror() {
        let candles = failed_bullish_block();
        let mirrored = mirror(&candles, 100.0);
        let up = detect_breaker_blocks(&find_order_block_candidates(&candles, 0.005, &[3]), &candles);
        let down = detect_breaker_blocks(&find_order_block_candidates(&mirrored, 0.005, &[3]), &mirrored);
        let key = |b: &BreakerBlock| (b.index, b.break_index);
        assert_eq!(up.iter().map(key).collect::<Vec<_>>(), down.iter().map(key).collect::<Vec<_>>());
        assert!(down.iter().all(|b| up.iter().any(|u| u.index == b.index && u.direction == b.direction.opposite())));
    }

    #[test]
    fn test_bearish_blocks_mirror_bullish() {
        let candles = bullish_setup();
        let mirrored = mirror(&candles, 100.0);
        let up = detect_order_blocks(&candles, 0.005, Timeframe::H1);
        let down = detect_order_blocks(&mirrored, 0.005, Timeframe::H1);
        let up_idx: Vec<_> = up.iter().map(|b| (b.index, b.direction)).collect();
        let down_idx: Vec<_> = down.iter().map(|b| (b.index, b.direction.opposite())).collect();
        assert_eq!(up_idx, down_idx);
    }
}
