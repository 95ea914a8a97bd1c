//! Confluence Scoring and Signal Generation
//!
//! For each direction independently:
//! 1. Gather recent evidence (FVG ≤10 candles back, fresh OB or retested
//!    breaker ≤20, sweep, inducement and BOS ≤5)
//! 2. Require a zone (FVG, OB or breaker) AND a confirming event (sweep or BOS)
//! 3. Check required confirmations, premium/discount location, HTF and regime gates
//! 4. Score the confluence, adjust for regime, compare against the mode minimum
//! 5. Derive entry state, stop, targets and a readable explanation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::entry_state::{evaluate_retest, Confirmations, EntryState};
use super::fvg::FairValueGap;
use super::htf::{HtfAnalysis, HtfTrend};
use super::liquidity::{Inducement, LiquidityPool, LiquiditySweep};
use super::order_blocks::{BreakerBlock, OrderBlock};
use super::regime::{adjust_confluence, should_allow_signal, MarketRegime, Regime};
use super::rejection::latest_rejection;
use super::risk::{compute_trade_levels, AdaptiveStop, RiskRejection, TakeProfitLevel, TargetCandidate, TargetSource};
use super::session::Session;
use super::structure::StructureBreak;
use super::swings::SwingPoints;
use super::volume::VolumeAnalysis;
use super::zones::{PremiumDiscount, PriceZone};
use crate::config::{Confirmation, PatternLookbacks, StrategyConfig};
use crate::types::{Candle, Direction, SignalType};

/// A detected pattern backing a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "camelCase")]
pub enum Pattern {
    Fvg(FairValueGap),
    OrderBlock(OrderBlock),
    LiquiditySweep(LiquiditySweep),
    StructureBreak(StructureBreak),
    BreakerBlock(BreakerBlock),
    Inducement(Inducement),
}

impl Pattern {
    pub fn index(&self) -> usize {
        match self {
            Pattern::Fvg(p) => p.index,
            Pattern::OrderBlock(p) => p.index,
            Pattern::LiquiditySweep(p) => p.index,
            Pattern::StructureBreak(p) => p.index,
            Pattern::BreakerBlock(p) => p.break_index,
            Pattern::Inducement(p) => p.index,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Pattern::Fvg(g) => format!(
                "{} FVG at {}-{} ({})",
                capitalized(g.direction),
                price(g.bottom),
                price(g.top),
                g.fill_status
            ),
            Pattern::OrderBlock(ob) => {
                let ict = if ob.is_ict_valid() { ", ICT valid" } else { "" };
                format!(
                    "Fresh {} order block at {}-{} (+{:.2}% impulse{})",
                    ob.direction,
                    price(ob.bottom),
                    price(ob.top),
                    ob.strength,
                    ict
                )
            }
            Pattern::LiquiditySweep(s) => format!("Liquidity sweep of {}", price(s.swing_level)),
            Pattern::StructureBreak(b) => {
                let side = match b.direction {
                    Direction::Bullish => "above",
                    Direction::Bearish => "below",
                };
                format!("{} {} {}", b.kind, side, price(b.break_level))
            }
            Pattern::BreakerBlock(b) => format!(
                "{} breaker block at {}-{} ({} retests)",
                capitalized(b.direction),
                price(b.bottom),
                price(b.top),
                b.retests
            ),
            Pattern::Inducement(i) => {
                let side = match i.direction {
                    Direction::Bullish => "below",
                    Direction::Bearish => "above",
                };
                format!("Inducement {} {} (wick to {})", side, price(i.hunted_level), price(i.wick))
            }
        }
    }
}

fn capitalized(direction: Direction) -> &'static str {
    match direction {
        Direction::Bullish => "Bullish",
        Direction::Bearish => "Bearish",
    }
}

/// Price with precision suited to its magnitude
fn price(value: f64) -> String {
    if value.abs() >= 10.0 {
        format!("{value:.2}")
    } else if value.abs() >= 1.0 {
        format!("{value:.4}")
    } else {
        format!("{value:.6}")
    }
}

/// Most recent qualifying pattern of each kind for one direction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evidence {
    pub fvg: Option<FairValueGap>,
    pub order_block: Option<OrderBlock>,
    pub sweep: Option<LiquiditySweep>,
    pub structure_break: Option<StructureBreak>,
    /// Only breakers price has come back to
    pub breaker: Option<BreakerBlock>,
    pub inducement: Option<Inducement>,
}

impl Evidence {
    /// Collect evidence within the lookback windows ending at `latest`
    pub fn gather(direction: Direction, latest: usize, ctx: &SignalContext<'_>, lookbacks: &PatternLookbacks) -> Self {
        let recent = |index: usize, window: usize| index <= latest && latest - index <= window;

        Self {
            fvg: ctx
                .fvgs
                .iter()
                .rev()
                .find(|g| g.direction == direction && g.fill_status.is_open() && recent(g.index, lookbacks.fvg))
                .copied(),
            order_block: ctx
                .order_blocks
                .iter()
                .rev()
                .find(|b| b.direction == direction && b.is_fresh && recent(b.index, lookbacks.order_block))
                .copied(),
            sweep: ctx
                .sweeps
                .iter()
                .rev()
                .find(|s| s.direction == direction && recent(s.index, lookbacks.liquidity_sweep))
                .copied(),
            structure_break: ctx
                .structure_breaks
                .iter()
                .rev()
                .find(|b| b.direction == direction && recent(b.index, lookbacks.bos))
                .copied(),
            breaker: ctx
                .breaker_blocks
                .iter()
                .rev()
                .find(|b| b.direction == direction && b.is_retested() && recent(b.break_index, lookbacks.order_block))
                .copied(),
            inducement: ctx
                .inducements
                .iter()
                .rev()
                .find(|i| i.direction == direction && recent(i.index, lookbacks.liquidity_sweep))
                .copied(),
        }
    }

    pub fn has_zone(&self) -> bool {
        self.fvg.is_some() || self.order_block.is_some() || self.breaker.is_some()
    }

    pub fn has_confirmation(&self) -> bool {
        self.sweep.is_some() || self.structure_break.is_some()
    }

    /// Zone used for retests and the signal id: breaker, then order block,
    /// then FVG
    pub fn anchor_zone(&self) -> Option<(f64, f64, DateTime<Utc>)> {
        self.breaker
            .map(|b| (b.bottom, b.top, b.timestamp))
            .or_else(|| self.order_block.map(|ob| (ob.bottom, ob.top, ob.timestamp)))
            .or_else(|| self.fvg.map(|g| (g.bottom, g.top, g.timestamp)))
    }

    /// Block the stop hides behind; gaps never carry the stop
    pub fn stop_zone(&self) -> Option<(f64, f64)> {
        self.breaker
            .map(|b| (b.bottom, b.top))
            .or_else(|| self.order_block.map(|ob| (ob.bottom, ob.top)))
    }

    pub fn patterns(&self) -> Vec<Pattern> {
        let mut patterns = Vec::new();
        if let Some(g) = self.fvg {
            patterns.push(Pattern::Fvg(g));
        }
        if let Some(ob) = self.order_block {
            patterns.push(Pattern::OrderBlock(ob));
        }
        if let Some(s) = self.sweep {
            patterns.push(Pattern::LiquiditySweep(s));
        }
        if let Some(b) = self.structure_break {
            patterns.push(Pattern::StructureBreak(b));
        }
        if let Some(b) = self.breaker {
            patterns.push(Pattern::BreakerBlock(b));
        }
        if let Some(i) = self.inducement {
            patterns.push(Pattern::Inducement(i));
        }
        patterns.sort_by_key(|p| p.index());
        patterns
    }

    /// Latest candle trades inside a zone that existed before it
    fn price_at_zone(&self, latest_index: usize, latest: &Candle) -> bool {
        let in_fvg = self.fvg.map(|g| latest_index > g.index && g.contains(latest)).unwrap_or(false);
        let in_ob = self
            .order_block
            .map(|ob| latest_index > ob.index && ob.contains(latest))
            .unwrap_or(false);
        let in_breaker = self
            .breaker
            .map(|b| latest_index > b.break_index && b.contains(latest))
            .unwrap_or(false);
        in_fvg || in_ob || in_breaker
    }
}

/// Detector output and market context a signal is built from
#[derive(Debug, Clone, Copy)]
pub struct SignalContext<'a> {
    pub candles: &'a [Candle],
    pub config: &'a StrategyConfig,
    pub fvgs: &'a [FairValueGap],
    pub order_blocks: &'a [OrderBlock],
    pub sweeps: &'a [LiquiditySweep],
    pub structure_breaks: &'a [StructureBreak],
    pub breaker_blocks: &'a [BreakerBlock],
    pub inducements: &'a [Inducement],
    pub liquidity_pools: &'a [LiquidityPool],
    pub swing_points: &'a SwingPoints,
    pub premium_discount: &'a PremiumDiscount,
    pub volume: &'a VolumeAnalysis,
    pub session: Session,
    pub regime: &'a MarketRegime,
    pub htf: Option<&'a HtfAnalysis>,
}

/// Points earned per factor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub fvg: f64,
    pub order_block: f64,
    pub ict_order_block: f64,
    pub liquidity_sweep: f64,
    pub bos: f64,
    pub htf_trend: f64,
    pub htf_zone: f64,
    pub volume: f64,
    pub retest: f64,
    pub session: f64,
    pub breaker_block: f64,
    pub inducement: f64,
    /// Sum before the regime adjustment
    pub raw: f64,
    pub regime_adjustment: i32,
    /// Adjusted and clamped to the maximum score
    pub total: f64,
}

pub fn score_confluence(
    direction: Direction,
    evidence: &Evidence,
    ctx: &SignalContext<'_>,
    retest_validated: bool,
) -> ScoreBreakdown {
    let w = &ctx.config.weights;
    let earn = |present: bool, weight: u32| if present { weight as f64 } else { 0.0 };

    let mut score = ScoreBreakdown {
        fvg: earn(evidence.fvg.is_some(), w.fvg),
        order_block: earn(evidence.order_block.is_some(), w.order_block),
        ict_order_block: earn(evidence.order_block.map(|ob| ob.is_ict_valid()).unwrap_or(false), w.ict_order_block),
        liquidity_sweep: earn(evidence.sweep.is_some(), w.liquidity_sweep),
        bos: earn(evidence.structure_break.is_some(), w.bos),
        htf_trend: earn(ctx.htf.map(|h| h.trend_aligned(direction)).unwrap_or(false), w.htf_trend),
        htf_zone: earn(ctx.htf.map(|h| h.zone_aligned(direction)).unwrap_or(false), w.htf_zone),
        volume: w.volume as f64 * ctx.volume.weight_factor(direction),
        retest: earn(retest_validated, w.retest),
        session: w.session as f64 * ctx.session.quality(),
        breaker_block: earn(evidence.breaker.is_some(), w.breaker_block),
        inducement: earn(evidence.inducement.is_some(), w.inducement),
        ..Default::default()
    };

    score.raw = score.fvg
        + score.order_block
        + score.ict_order_block
        + score.liquidity_sweep
        + score.bos
        + score.htf_trend
        + score.htf_zone
        + score.volume
        + score.retest
        + score.session
        + score.breaker_block
        + score.inducement;
    score.regime_adjustment = ctx.regime.confluence_adjustment;
    score.total = adjust_confluence(score.raw, ctx.regime, w.max_score());
    score
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Standard,
    High,
    Premium,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Confidence::Premium
        } else if score >= 65.0 {
            Confidence::High
        } else if score >= 40.0 {
            Confidence::Standard
        } else {
            Confidence::Low
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Standard => write!(f, "standard"),
            Confidence::High => write!(f, "high"),
            Confidence::Premium => write!(f, "premium"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Stable across scans for the same setup
    pub id: Uuid,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub target_source: TargetSource,
    pub risk_reward: f64,
    pub take_profits: Vec<TakeProfitLevel>,
    pub adaptive_stop: Option<AdaptiveStop>,
    pub confluence_score: f64,
    pub score: ScoreBreakdown,
    pub confidence: Confidence,
    pub patterns: Vec<Pattern>,
    pub entry_state: EntryState,
    pub confirmations: Confirmations,
    pub zone: PriceZone,
    pub in_ote: bool,
    pub session: Session,
    pub regime: Regime,
    pub explanation: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Only entry-ready signals are handed to paper trading and alerts
    pub fn is_trackable(&self) -> bool {
        self.entry_state == EntryState::EntryReady
    }
}

/// Why a direction produced no signal
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum SignalRejection {
    #[error("no candles")]
    NoCandles,

    #[error("no fresh order block, retested breaker or open FVG in range")]
    NoZone,

    #[error("no liquidity sweep or structure break in range")]
    NoConfirmation,

    #[error("required confirmation missing: {0}")]
    MissingConfirmation(Confirmation),

    #[error("price in {zone} ({percentage:.1}%) does not suit the direction")]
    WrongZone { zone: PriceZone, percentage: f64 },

    #[error("higher timeframe trend is {0}")]
    HtfMisaligned(HtfTrend),

    #[error("{0} regime blocks entries in this mode")]
    RegimeBlocked(Regime),

    #[error("confluence {score:.1} below minimum {minimum}")]
    BelowMinimum { score: f64, minimum: u32 },

    #[error(transparent)]
    Risk(#[from] RiskRejection),
}

fn signal_id(direction: Direction, zone_time: DateTime<Utc>) -> Uuid {
    let key = format!("{}:{}", direction, zone_time.timestamp_millis());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

/// First required confirmation the evidence does not satisfy
fn missing_confirmation(direction: Direction, evidence: &Evidence, ctx: &SignalContext<'_>) -> Option<Confirmation> {
    let all = [
        Confirmation::Fvg,
        Confirmation::OrderBlock,
        Confirmation::LiquiditySweep,
        Confirmation::Bos,
        Confirmation::ValidZone,
    ];
    all.into_iter().filter(|c| ctx.config.requires(*c)).find(|c| {
        let satisfied = match c {
            Confirmation::Fvg => evidence.fvg.is_some(),
            Confirmation::OrderBlock => evidence.order_block.is_some(),
            Confirmation::LiquiditySweep => evidence.sweep.is_some(),
            Confirmation::Bos => evidence.structure_break.is_some(),
            Confirmation::ValidZone => ctx.premium_discount.zone == PriceZone::favoured_for(direction),
            Confirmation::HtfAlignment => true,
        };
        !satisfied
    })
}

/// Equal highs/lows and swing levels on the profit side of a trade
fn target_candidates(direction: Direction, ctx: &SignalContext<'_>) -> Vec<TargetCandidate> {
    let swings = match direction {
        Direction::Bullish => &ctx.swing_points.highs,
        Direction::Bearish => &ctx.swing_points.lows,
    };
    ctx.liquidity_pools
        .iter()
        .filter(|p| p.is_target_for(direction))
        .map(|p| TargetCandidate {
            price: p.price,
            source: TargetSource::ExternalLiquidity,
        })
        .chain(swings.iter().map(|s| TargetCandidate {
            price: s.price,
            source: TargetSource::SwingLevel,
        }))
        .collect()
}

/// Build the signal for one direction, or say why there is none
pub fn generate_signal(direction: Direction, ctx: &SignalContext<'_>) -> Result<Signal, SignalRejection> {
    let config = ctx.config;
    let Some((latest_index, latest)) = ctx.candles.iter().enumerate().last() else {
        return Err(SignalRejection::NoCandles);
    };

    let evidence = Evidence::gather(direction, latest_index, ctx, &config.lookbacks);
    if !evidence.has_zone() {
        return Err(SignalRejection::NoZone);
    }
    if !evidence.has_confirmation() {
        return Err(SignalRejection::NoConfirmation);
    }
    if let Some(missing) = missing_confirmation(direction, &evidence, ctx) {
        return Err(SignalRejection::MissingConfirmation(missing));
    }

    let pd = ctx.premium_discount;
    let zone_ok = if pd.zone == PriceZone::favoured_for(direction) {
        true
    } else {
        pd.zone == PriceZone::Equilibrium && config.allow_neutral_zone
    };
    if !zone_ok {
        return Err(SignalRejection::WrongZone {
            zone: pd.zone,
            percentage: pd.percentage,
        });
    }

    // HTF alignment is only enforced when HTF candles were supplied
    if let Some(htf) = ctx.htf {
        if config.requires(Confirmation::HtfAlignment) && !htf.trend_aligned(direction) {
            return Err(SignalRejection::HtfMisaligned(htf.trend));
        }
    }

    if !should_allow_signal(ctx.regime, config.mode) {
        return Err(SignalRejection::RegimeBlocked(ctx.regime.regime));
    }

    let rejection = latest_rejection(ctx.candles, direction);
    let retest = evidence.anchor_zone().map(|(bottom, top, _)| {
        evaluate_retest(
            ctx.candles,
            bottom,
            top,
            direction,
            evidence.structure_break.map(|b| b.index),
            rejection.is_some(),
        )
    });

    let confirmations = Confirmations {
        setup_detected: true,
        structure_break_confirmed: evidence.structure_break.is_some(),
        price_at_zone: evidence.price_at_zone(latest_index, latest),
        rejection_confirmed: rejection.is_some(),
        rejection_pattern: rejection,
        retest_required: config.retest_required,
        retest,
    };

    let score = score_confluence(direction, &evidence, ctx, confirmations.retest_validated());
    if score.total < config.minimum_confluence as f64 {
        return Err(SignalRejection::BelowMinimum {
            score: score.total,
            minimum: config.minimum_confluence,
        });
    }

    let targets = target_candidates(direction, ctx);
    let levels = compute_trade_levels(direction, latest.close, evidence.stop_zone(), &targets, ctx.candles, config)?;

    let entry_state = confirmations.entry_state();
    let in_ote = pd.ote(direction).map(|o| o.price_in_ote).unwrap_or(false);
    let zone_time = evidence.anchor_zone().map(|(_, _, t)| t).unwrap_or(latest.open_time);
    let patterns = evidence.patterns();
    let mut explanation = explain(direction, &patterns, &confirmations, &score, ctx, in_ote);
    if levels.target_source != TargetSource::RiskMultiple {
        explanation.push_str(&format!("; Target at {} {}", levels.target_source, price(levels.take_profit)));
    }

    Ok(Signal {
        id: signal_id(direction, zone_time),
        signal_type: direction.signal_type(),
        direction,
        entry: levels.entry,
        stop_loss: levels.stop_loss,
        take_profit: levels.take_profit,
        target_source: levels.target_source,
        risk_reward: levels.risk_reward,
        take_profits: levels.take_profits,
        adaptive_stop: levels.adaptive_stop,
        confluence_score: score.total,
        confidence: Confidence::from_score(score.total),
        score,
        patterns,
        entry_state,
        confirmations,
        zone: pd.zone,
        in_ote,
        session: ctx.session,
        regime: ctx.regime.regime,
        explanation,
        timestamp: latest.open_time,
    })
}

fn explain(
    direction: Direction,
    patterns: &[Pattern],
    confirmations: &Confirmations,
    score: &ScoreBreakdown,
    ctx: &SignalContext<'_>,
    in_ote: bool,
) -> String {
    let mut parts: Vec<String> = patterns.iter().map(Pattern::describe).collect();

    if let Some(htf) = ctx.htf {
        if htf.trend_aligned(direction) {
            parts.push(format!("HTF {} trend aligned", htf.trend));
        }
        if htf.zone_aligned(direction) {
            parts.push(format!("HTF price in {}", PriceZone::favoured_for(direction)));
        }
    }

    let pd = ctx.premium_discount;
    let ote = if in_ote { ", inside OTE" } else { "" };
    parts.push(format!("Price in {} ({:.1}% of range{})", pd.zone, pd.percentage, ote));

    if let Some(pattern) = confirmations.rejection_pattern {
        parts.push(format!("{} rejection", pattern));
    }
    if let Some(retest) = confirmations.retest.as_ref().filter(|_| confirmations.retest_required) {
        parts.push(format!("Retest: {}", retest.reason));
    }
    if score.volume > 0.0 {
        parts.push(format!("Volume {:.1}x average", ctx.volume.ratio));
    }
    if ctx.volume.climax {
        parts.push("Volume climax".to_string());
    }
    parts.push(format!("{} regime ({:+})", ctx.regime.regime, score.regime_adjustment));
    parts.push(format!("{} session", ctx.session));

    parts.join("; ")
}

/// Bullish and bearish signals for one context, plus the reasons for any
/// direction that produced none
pub fn generate_signals(ctx: &SignalContext<'_>) -> (Vec<Signal>, Vec<(Direction, SignalRejection)>) {
    let mut signals = Vec::new();
    let mut rejections = Vec::new();
    for direction in [Direction::Bullish, Direction::Bearish] {
        match generate_signal(direction, ctx) {
            Ok(signal) => signals.push(signal),
            Err(reason) => rejections.push((direction, reason)),
        }
    }
    (signals, rejections)
}
