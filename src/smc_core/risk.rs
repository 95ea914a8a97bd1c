//! Stops, targets and take-profit ladders

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::indicators::{calculate_atr, ATR_PERIOD};
use crate::config::{StopMode, StrategyConfig};
use crate::types::{Candle, Direction};

const BASELINE_ATR_PERIOD: usize = 50;
const ATR_MULTIPLIER_STEP: f64 = 0.5;
/// Liquidity targets sit this many ATRs in front of the level
const TARGET_FRONT_RUN_ATR: f64 = 0.3;

/// Partial exits: 50% at 1R, 30% at the main target, 20% at 3R
const PARTIAL_LADDER: [(PartialTarget, f64); 3] = [
    (PartialTarget::R(1.0), 0.5),
    (PartialTarget::Main, 0.3),
    (PartialTarget::R(3.0), 0.2),
];

#[derive(Debug, Clone, Copy)]
enum PartialTarget {
    R(f64),
    Main,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeProfitLevel {
    pub price: f64,
    pub r_multiple: f64,
    /// Fraction of the position closed here
    pub allocation: f64,
}

/// ATR multiple chosen for the current volatility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveStop {
    pub multiplier: f64,
    pub atr: f64,
    pub baseline_atr: f64,
    /// Short ATR / baseline ATR
    pub volatility_ratio: f64,
    pub reason: String,
}

/// Where the main target came from, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetSource {
    ExternalLiquidity,
    SwingLevel,
    RiskMultiple,
}

impl std::fmt::Display for TargetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSource::ExternalLiquidity => write!(f, "equal highs/lows"),
            TargetSource::SwingLevel => write!(f, "swing level"),
            TargetSource::RiskMultiple => write!(f, "R multiple"),
        }
    }
}

/// Price level a trade could aim at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetCandidate {
    pub price: f64,
    pub source: TargetSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub target_source: TargetSource,
    pub risk: f64,
    pub risk_reward: f64,
    pub take_profits: Vec<TakeProfitLevel>,
    pub adaptive_stop: Option<AdaptiveStop>,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RiskRejection {
    #[error("stop {stop:.4} is on the wrong side of entry {entry:.4}")]
    StopWrongSide { entry: f64, stop: f64 },

    #[error("risk/reward {actual:.2} below minimum {minimum:.2}")]
    RiskRewardTooLow { actual: f64, minimum: f64 },
}

/// Pick the stop ATR multiple from short-term vs baseline volatility:
/// `base - 0.5` when calm, `base` when normal, `base + 0.5` when expanding.
/// Falls back to `base` when ATR cannot be computed.
pub fn adaptive_stop_multiplier(candles: &[Candle], base: f64, volatility_ratio: f64) -> AdaptiveStop {
    let atr = calculate_atr(candles, ATR_PERIOD);
    let baseline_atr = calculate_atr(candles, BASELINE_ATR_PERIOD);
    let ratio = atr / baseline_atr;

    if !ratio.is_finite() || !atr.is_finite() || atr <= 0.0 {
        return AdaptiveStop {
            multiplier: base,
            atr: if atr.is_finite() { atr } else { 0.0 },
            baseline_atr: if baseline_atr.is_finite() { baseline_atr } else { 0.0 },
            volatility_ratio: 1.0,
            reason: "ATR unavailable, using default multiplier".to_string(),
        };
    }

    let (multiplier, reason) = if ratio > volatility_ratio {
        (base + ATR_MULTIPLIER_STEP, format!("volatility expanding ({ratio:.2}x baseline)"))
    } else if ratio < 1.0 / volatility_ratio {
        (base - ATR_MULTIPLIER_STEP, format!("volatility contracting ({ratio:.2}x baseline)"))
    } else {
        (base, format!("normal volatility ({ratio:.2}x baseline)"))
    };

    AdaptiveStop {
        multiplier,
        atr,
        baseline_atr,
        volatility_ratio: ratio,
        reason,
    }
}

/// First candidate beyond entry, by source preference then distance, whose
/// front-run price still pays `minimum_risk_reward`
fn liquidity_target(
    direction: Direction,
    entry: f64,
    risk: f64,
    targets: &[TargetCandidate],
    candles: &[Candle],
    minimum_risk_reward: f64,
) -> Option<(f64, TargetSource)> {
    let sign = direction.sign();
    let atr = calculate_atr(candles, ATR_PERIOD);
    let front_run = if atr.is_finite() { atr * TARGET_FRONT_RUN_ATR } else { 0.0 };

    let mut beyond: Vec<&TargetCandidate> = targets
        .iter()
        .filter(|t| t.price.is_finite() && (t.price - entry) * sign > 0.0)
        .collect();
    beyond.sort_by(|a, b| {
        a.source
            .cmp(&b.source)
            .then_with(|| (a.price - entry).abs().total_cmp(&(b.price - entry).abs()))
    });

    beyond.into_iter().find_map(|t| {
        let price = t.price - sign * front_run;
        let rr = (price - entry) * sign / risk;
        (rr + 1e-9 >= minimum_risk_reward).then_some((price, t.source))
    })
}

/// Entry at `entry`, stop per the config's stop mode. The target is the
/// first liquidity candidate that pays the minimum R when the config aims at
/// liquidity, else `target_risk_reward` R. `stop_zone` is the (bottom, top)
/// of the order or breaker block behind the setup. Rejects setups whose stop
/// lands on the wrong side or whose reward does not cover the minimum R.
pub fn compute_trade_levels(
    direction: Direction,
    entry: f64,
    stop_zone: Option<(f64, f64)>,
    targets: &[TargetCandidate],
    candles: &[Candle],
    config: &StrategyConfig,
) -> Result<TradeLevels, RiskRejection> {
    let sign = direction.sign();

    let (stop_loss, adaptive_stop) = match (config.stop_mode, stop_zone) {
        (StopMode::OrderBlock, Some((bottom, top))) => {
            let stop = match direction {
                Direction::Bullish => bottom * (1.0 - config.ob_stop_buffer),
                Direction::Bearish => top * (1.0 + config.ob_stop_buffer),
            };
            (stop, None)
        }
        (StopMode::OrderBlock, None) => (entry * (1.0 - sign * config.fallback_stop_percent), None),
        (StopMode::AtrAdaptive, _) => {
            let adaptive = adaptive_stop_multiplier(candles, config.stop_loss_atr_multiplier, config.atr_volatility_ratio);
            let distance = if adaptive.atr > 0.0 {
                adaptive.atr * adaptive.multiplier
            } else {
                entry * config.fallback_stop_percent
            };
            (entry - sign * distance, Some(adaptive))
        }
    };

    let risk = (entry - stop_loss) * sign;
    if risk.is_nan() || risk <= 0.0 {
        return Err(RiskRejection::StopWrongSide { entry, stop: stop_loss });
    }

    let liquidity = if config.use_liquidity_targets {
        liquidity_target(direction, entry, risk, targets, candles, config.minimum_risk_reward)
    } else {
        None
    };
    let (take_profit, target_source) =
        liquidity.unwrap_or((entry + sign * config.target_risk_reward * risk, TargetSource::RiskMultiple));
    let risk_reward = match target_source {
        TargetSource::RiskMultiple => config.target_risk_reward,
        _ => (take_profit - entry) * sign / risk,
    };
    if risk_reward + 1e-9 < config.minimum_risk_reward {
        return Err(RiskRejection::RiskRewardTooLow {
            actual: risk_reward,
            minimum: config.minimum_risk_reward,
        });
    }

    let take_profits = if config.use_partial_take_profits {
        PARTIAL_LADDER
            .iter()
            .map(|&(target, allocation)| {
                let (price, r_multiple) = match target {
                    PartialTarget::R(r) => (entry + sign * r * risk, r),
                    PartialTarget::Main => (take_profit, risk_reward),
                };
                TakeProfitLevel {
                    price,
                    r_multiple,
                    allocation,
                }
            })
            .collect()
    } else {
        vec![TakeProfitLevel {
            price: take_profit,
            r_multiple: risk_reward,
            allocation: 1.0,
        }]
    };

    Ok(TradeLevels {
        entry,
        stop_loss,
        take_profit,
        target_source,
        risk,
        risk_reward,
        take_profits,
        adaptive_stop,
    })
}
