//! Full analysis pass over one candle series
//!
//! Candles → swings → structure and patterns → structure-shift filter →
//! HTF overlay → regime → confluence → signals. Pure: no I/O, no shared
//! state, the strategy configuration is passed in.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fvg::{detect_fvgs, FairValueGap};
use super::htf::{analyze_htf, HtfAnalysis, MIN_HTF_TREND_CANDLES};
use super::liquidity::{
    detect_external_liquidity, detect_inducements, detect_internal_liquidity, detect_liquidity_sweeps,
    ConsolidationRange, Inducement, LiquidityPool, LiquiditySweep,
};
use super::order_blocks::{
    apply_ict_validation, detect_breaker_blocks, find_order_block_candidates, retain_fresh, BreakerBlock, OrderBlock,
};
use super::regime::{detect_market_regime, MarketRegime};
use super::session::Session;
use super::signals::{generate_signals, Signal, SignalContext};
use super::structure::{
    analyze_market_structure, detect_structure_breaks, detect_swing_breaks, merge_breaks, MarketStructure,
    StructureBreak,
};
use super::swings::{detect_swing_points, SwingPoints};
use super::volume::{analyze_volume, VolumeAnalysis};
use super::zones::{calculate_premium_discount, PremiumDiscount};
use crate::config::{StrategyConfig, StrategyMode};
use crate::error::{ensure_min_candles, AnalysisError};
use crate::types::{Candle, Direction, Timeframe};

/// Candles needed before signals are generated
pub const MIN_ANALYSIS_CANDLES: usize = 50;

/// FVGs and order blocks must sit this close to a same-direction break or sweep
const FVG_SHIFT_WINDOW: usize = 15;
const ORDER_BLOCK_SHIFT_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AnalysisStatus {
    Complete,
    InsufficientData { required: usize, actual: usize },
}

/// Structured record of what the analysis did, alongside its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DiagnosticEvent {
    MalformedCandle {
        index: usize,
        reason: String,
    },
    Thresholds {
        fvg_min_gap_percent: f64,
        fvg_min_displacement_percent: f64,
        ob_impulse_threshold: f64,
        swing_lookback: usize,
    },
    OrderBlocksFiltered {
        candidates: usize,
        fresh: usize,
    },
    /// Zones dropped for lack of a nearby structure shift
    StructureShiftFiltered {
        fvgs_dropped: usize,
        order_blocks_dropped: usize,
    },
    PatternCounts {
        swing_highs: usize,
        swing_lows: usize,
        fvgs: usize,
        order_blocks: usize,
        liquidity_sweeps: usize,
        structure_breaks: usize,
        breaker_blocks: usize,
        inducements: usize,
        liquidity_pools: usize,
        consolidations: usize,
    },
    InsufficientHtfData {
        required: usize,
        actual: usize,
    },
    SignalRejected {
        direction: Direction,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub timeframe: Timeframe,
    pub mode: StrategyMode,
    pub status: AnalysisStatus,
    pub swing_points: SwingPoints,
    pub structure: MarketStructure,
    pub fvgs: Vec<FairValueGap>,
    pub order_blocks: Vec<OrderBlock>,
    pub liquidity_sweeps: Vec<LiquiditySweep>,
    pub bos_events: Vec<StructureBreak>,
    pub breaker_blocks: Vec<BreakerBlock>,
    pub inducements: Vec<Inducement>,
    pub external_liquidity: Vec<LiquidityPool>,
    pub internal_liquidity: Vec<ConsolidationRange>,
    pub premium_discount: PremiumDiscount,
    pub volume: VolumeAnalysis,
    pub session: Option<Session>,
    pub regime: MarketRegime,
    pub htf: Option<HtfAnalysis>,
    pub signals: Vec<Signal>,
    pub diagnostics: Vec<DiagnosticEvent>,
}

impl AnalysisResult {
    /// Fail with `InsufficientData` if the series was too short to analyze
    pub fn ensure_complete(&self) -> Result<(), AnalysisError> {
        match self.status {
            AnalysisStatus::Complete => Ok(()),
            AnalysisStatus::InsufficientData { required, actual } => ensure_min_candles("analysis", actual, required),
        }
    }

    pub fn trackable_signals(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter().filter(|s| s.is_trackable())
    }
}

/// Malformed candles, as errors carrying their index
pub fn malformed_candles(candles: &[Candle]) -> Vec<AnalysisError> {
    candles
        .iter()
        .enumerate()
        .filter_map(|(index, c)| {
            c.defect().map(|reason| AnalysisError::MalformedCandle {
                index,
                reason: reason.to_string(),
            })
        })
        .collect()
}

/// Whether a break or sweep in `direction` lies within `window` candles of
/// `index`, before or after it
pub fn near_structure_shift(
    direction: Direction,
    index: usize,
    window: usize,
    breaks: &[StructureBreak],
    sweeps: &[LiquiditySweep],
) -> bool {
    let close = |i: usize| i.abs_diff(index) <= window;
    breaks.iter().any(|b| b.direction == direction && close(b.index))
        || sweeps.iter().any(|s| s.direction == direction && close(s.index))
}

/// Run every detector and build signals for both directions.
///
/// Configuration problems are errors. A series shorter than 50 candles is
/// not: the result carries `AnalysisStatus::InsufficientData` and no signals.
pub fn analyze(
    candles: &[Candle],
    htf_candles: Option<&[Candle]>,
    timeframe: Timeframe,
    config: &StrategyConfig,
) -> Result<AnalysisResult, AnalysisError> {
    config.validate()?;

    let mut diagnostics = Vec::new();
    for err in malformed_candles(candles) {
        warn!(%err, "skipping candle");
        if let AnalysisError::MalformedCandle { index, reason } = err {
            diagnostics.push(DiagnosticEvent::MalformedCandle { index, reason });
        }
    }

    let swing_lookback = config.swing_lookback_for(timeframe);
    diagnostics.push(DiagnosticEvent::Thresholds {
        fvg_min_gap_percent: timeframe.fvg_min_gap_percent(),
        fvg_min_displacement_percent: timeframe.fvg_min_displacement_percent(),
        ob_impulse_threshold: config.ob_impulse_threshold,
        swing_lookback,
    });

    let swing_points = detect_swing_points(candles, swing_lookback);
    let structure = analyze_market_structure(&swing_points);
    let mut fvgs = detect_fvgs(candles, timeframe);

    let candidates = find_order_block_candidates(candles, config.ob_impulse_threshold, timeframe.ob_forward_offsets());
    let candidate_count = candidates.len();
    let breaker_blocks = detect_breaker_blocks(&candidates, candles);
    let mut order_blocks = retain_fresh(candidates, candles, candles.len().saturating_sub(1));
    apply_ict_validation(&mut order_blocks, candles, &swing_points, &fvgs);
    diagnostics.push(DiagnosticEvent::OrderBlocksFiltered {
        candidates: candidate_count,
        fresh: order_blocks.len(),
    });

    let liquidity_sweeps = detect_liquidity_sweeps(candles, &swing_points);
    let bos_events = merge_breaks(
        detect_structure_breaks(candles, &structure),
        detect_swing_breaks(candles, &swing_points),
    );

    // ICT validation above sees every gap; only shift-backed zones are kept
    let (fvg_count, ob_count) = (fvgs.len(), order_blocks.len());
    fvgs.retain(|g| near_structure_shift(g.direction, g.index, FVG_SHIFT_WINDOW, &bos_events, &liquidity_sweeps));
    order_blocks
        .retain(|b| near_structure_shift(b.direction, b.index, ORDER_BLOCK_SHIFT_WINDOW, &bos_events, &liquidity_sweeps));
    diagnostics.push(DiagnosticEvent::StructureShiftFiltered {
        fvgs_dropped: fvg_count - fvgs.len(),
        order_blocks_dropped: ob_count - order_blocks.len(),
    });

    let inducements = detect_inducements(candles);
    let external_liquidity = detect_external_liquidity(&swing_points);
    let internal_liquidity = detect_internal_liquidity(candles);

    diagnostics.push(DiagnosticEvent::PatternCounts {
        swing_highs: swing_points.highs.len(),
        swing_lows: swing_points.lows.len(),
        fvgs: fvgs.len(),
        order_blocks: order_blocks.len(),
        liquidity_sweeps: liquidity_sweeps.len(),
        structure_breaks: bos_events.len(),
        breaker_blocks: breaker_blocks.len(),
        inducements: inducements.len(),
        liquidity_pools: external_liquidity.len(),
        consolidations: internal_liquidity.len(),
    });
    debug!(
        candles = candles.len(),
        trend = %structure.trend,
        fvgs = fvgs.len(),
        order_blocks = order_blocks.len(),
        sweeps = liquidity_sweeps.len(),
        breaks = bos_events.len(),
        breakers = breaker_blocks.len(),
        "patterns detected"
    );

    let latest = candles.iter().rev().find(|c| c.is_well_formed());
    let price = latest.map(|c| c.close).unwrap_or(f64::NAN);
    let premium_discount = calculate_premium_discount(candles, &swing_points, price);
    let volume = analyze_volume(candles);
    let session = latest.map(|c| Session::at(c.open_time));
    let regime = detect_market_regime(candles);

    let htf = htf_candles.map(|htf| {
        if htf.len() < MIN_HTF_TREND_CANDLES {
            diagnostics.push(DiagnosticEvent::InsufficientHtfData {
                required: MIN_HTF_TREND_CANDLES,
                actual: htf.len(),
            });
        }
        analyze_htf(htf, timeframe.higher(), config.ob_impulse_threshold)
    });

    let status = if candles.len() < MIN_ANALYSIS_CANDLES {
        AnalysisStatus::InsufficientData {
            required: MIN_ANALYSIS_CANDLES,
            actual: candles.len(),
        }
    } else {
        AnalysisStatus::Complete
    };

    let signals = match (status, session) {
        (AnalysisStatus::Complete, Some(session)) => {
            let ctx = SignalContext {
                candles,
                config,
                fvgs: &fvgs,
                order_blocks: &order_blocks,
                sweeps: &liquidity_sweeps,
                structure_breaks: &bos_events,
                breaker_blocks: &breaker_blocks,
                inducements: &inducements,
                liquidity_pools: &external_liquidity,
                swing_points: &swing_points,
                premium_discount: &premium_discount,
                volume: &volume,
                session,
                regime: &regime,
                htf: htf.as_ref(),
            };
            let (signals, rejections) = generate_signals(&ctx);
            for (direction, reason) in rejections {
                debug!(%direction, %reason, "no signal");
                diagnostics.push(DiagnosticEvent::SignalRejected {
                    direction,
                    reason: reason.to_string(),
                });
            }
            signals
        }
        _ => {
            debug!(candles = candles.len(), "not enough candles for signals");
            Vec::new()
        }
    };

    Ok(AnalysisResult {
        timeframe,
        mode: config.mode,
        status,
        swing_points,
        structure,
        fvgs,
        order_blocks,
        liquidity_sweeps,
        bos_events,
        breaker_blocks,
        inducements,
        external_liquidity,
        internal_liquidity,
        premium_discount,
        volume,
        session,
        regime,
        htf,
        signals,
        diagnostics,
    })
}
