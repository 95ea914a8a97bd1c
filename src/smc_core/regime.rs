//! Market Regime Detection
//!
//! Classifies the last 50 candles by trend strength (ADX, Wilder smoothing)
//! and volatility (Bollinger Band width as percent of price):
//! - STRONG_TREND: ADX > 25 and BB width > 3%
//! - WEAK_TREND: 20 < ADX <= 25
//! - TIGHT_RANGE: ADX <= 20 and BB width < 1.5%
//! - CHOPPY: everything else
//!
//! Each regime carries trade management recommendations and a confluence
//! adjustment applied to signal scores.

use serde::{Deserialize, Serialize};

use super::indicators::{mean, round2, std_dev};
use crate::config::StrategyMode;
use crate::types::Candle;

/// Largest positive confluence adjustment any regime grants
pub const MAX_REGIME_BONUS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    StrongTrend,
    WeakTrend,
    Choppy,
    TightRange,
    InsufficientData,
}

impl Regime {
    /// Points added to (or removed from) a confluence score
    pub fn confluence_adjustment(&self) -> i32 {
        match self {
            Regime::StrongTrend => MAX_REGIME_BONUS as i32,
            Regime::WeakTrend => 5,
            Regime::Choppy => -10,
            Regime::TightRange => -15,
            Regime::InsufficientData => 0,
        }
    }

    pub fn recommendation(&self) -> RegimeRecommendation {
        let (target_rr, trailing_stop_start, partial_close, allow_entry) = match self {
            Regime::StrongTrend => (3.0, Some(1.0), false, true),
            Regime::WeakTrend => (2.0, Some(1.5), true, true),
            Regime::TightRange => (1.5, None, true, false),
            Regime::Choppy => (1.8, Some(1.5), true, true),
            Regime::InsufficientData => (1.5, Some(1.5), true, true),
        };
        RegimeRecommendation {
            target_rr,
            trailing_stop_start,
            partial_close,
            allow_entry,
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::StrongTrend => write!(f, "STRONG_TREND"),
            Regime::WeakTrend => write!(f, "WEAK_TREND"),
            Regime::Choppy => write!(f, "CHOPPY"),
            Regime::TightRange => write!(f, "TIGHT_RANGE"),
            Regime::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
        }
    }
}

/// Trade management suggested for a regime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeRecommendation {
    /// Target in multiples of risk
    pub target_rr: f64,
    /// R multiple at which to start trailing the stop (None = don't trail)
    pub trailing_stop_start: Option<f64>,
    /// Take partial profits along the way
    pub partial_close: bool,
    pub allow_entry: bool,
}

/// Configuration for regime detection
#[derive(Debug, Clone)]
pub struct RegimeConfig {
    /// Candles analyzed (default: 50)
    pub window: usize,
    /// ADX period (default: 14)
    pub adx_period: usize,
    /// Bollinger period (default: 20)
    pub bb_period: usize,
    /// ADX above this is a strong trend (default: 25)
    pub strong_adx: f64,
    /// ADX above this is a weak trend (default: 20)
    pub weak_adx: f64,
    /// Minimum BB width % for a strong trend (default: 3.0)
    pub strong_bb_width: f64,
    /// Maximum BB width % for a tight range (default: 1.5)
    pub tight_bb_width: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window: 50,
            adx_period: 14,
            bb_period: 20,
            strong_adx: 25.0,
            weak_adx: 20.0,
            strong_bb_width: 3.0,
            tight_bb_width: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRegime {
    pub regime: Regime,
    pub adx: f64,
    pub bb_width_percent: f64,
    pub recommendation: RegimeRecommendation,
    pub confluence_adjustment: i32,
}

impl MarketRegime {
    fn from_parts(regime: Regime, adx: f64, bb_width_percent: f64) -> Self {
        Self {
            regime,
            adx,
            bb_width_percent,
            recommendation: regime.recommendation(),
            confluence_adjustment: regime.confluence_adjustment(),
        }
    }
}

/// Detect the regime of the trailing window with default settings
pub fn detect_market_regime(candles: &[Candle]) -> MarketRegime {
    detect_market_regime_with(candles, &RegimeConfig::default())
}

pub fn detect_market_regime_with(candles: &[Candle], config: &RegimeConfig) -> MarketRegime {
    let clean: Vec<Candle> = candles.iter().filter(|c| c.is_well_formed()).copied().collect();
    if clean.len() < config.window {
        return MarketRegime::from_parts(Regime::InsufficientData, 0.0, 0.0);
    }

    let window = &clean[clean.len() - config.window..];
    let adx = calculate_adx(window, config.adx_period).unwrap_or(0.0);
    let bb_width_percent = bollinger_width_percent(window, config.bb_period);

    let regime = if adx > config.strong_adx && bb_width_percent > config.strong_bb_width {
        Regime::StrongTrend
    } else if adx > config.weak_adx && adx <= config.strong_adx {
        Regime::WeakTrend
    } else if adx <= config.weak_adx && bb_width_percent < config.tight_bb_width {
        Regime::TightRange
    } else {
        Regime::Choppy
    };

    MarketRegime::from_parts(regime, round2(adx), round2(bb_width_percent))
}

/// Average Directional Index with Wilder smoothing. None when there are
/// fewer than `2 * period + 1` candles.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let mut tr = Vec::with_capacity(candles.len() - 1);
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        tr.push(cur.true_range(Some(prev.close)));
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let p = period as f64;
    let mut s_tr: f64 = tr[..period].iter().sum();
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();

    let dx = |s_tr: f64, s_plus: f64, s_minus: f64| {
        if s_tr <= 0.0 {
            return 0.0;
        }
        let di_plus = 100.0 * s_plus / s_tr;
        let di_minus = 100.0 * s_minus / s_tr;
        let sum = di_plus + di_minus;
        if sum <= 0.0 {
            0.0
        } else {
            100.0 * (di_plus - di_minus).abs() / sum
        }
    };

    let mut dxs = vec![dx(s_tr, s_plus, s_minus)];
    for i in period..tr.len() {
        s_tr = s_tr - s_tr / p + tr[i];
        s_plus = s_plus - s_plus / p + plus_dm[i];
        s_minus = s_minus - s_minus / p + minus_dm[i];
        dxs.push(dx(s_tr, s_plus, s_minus));
    }

    let mut adx = mean(&dxs[..period]);
    for &value in &dxs[period..] {
        adx = (adx * (p - 1.0) + value) / p;
    }
    Some(adx)
}

/// (upper - lower) / average close * 100 for 2-sigma bands
fn bollinger_width_percent(candles: &[Candle], period: usize) -> f64 {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    if closes.len() < period || period == 0 {
        return 0.0;
    }
    let sigma = std_dev(&closes[closes.len() - period..]);
    let average = mean(&closes);
    if average <= 0.0 {
        return 0.0;
    }
    4.0 * sigma / average * 100.0
}

/// Apply the regime adjustment and clamp to `[0, max_score]`
pub fn adjust_confluence(score: f64, regime: &MarketRegime, max_score: u32) -> f64 {
    (score + regime.confluence_adjustment as f64).clamp(0.0, max_score as f64)
}

/// Whether a signal may be taken in this regime under the given mode.
/// Tight ranges are only tradable when scalping, and strict modes also skip
/// choppy markets.
pub fn should_allow_signal(regime: &MarketRegime, mode: StrategyMode) -> bool {
    match regime.regime {
        Regime::TightRange => mode == StrategyMode::Scalping,
        Regime::Choppy if mode.is_strict() => false,
        _ => regime.recommendation.allow_entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc_core::testing::{from_closes, random_walk, sideways};

    #[test]
    fn test_insufficient_data() {
        let regime = detect_market_regime(&random_walk(30, 1));
        assert_eq!(regime.regime, Regime::InsufficientData);
        assert_eq!(regime.confluence_adjustment, 0);
        assert!(regime.recommendation.allow_entry);
    }

    #[test]
    fn test_ramp_is_strong_trend() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let regime = detect_market_regime(&from_closes(99.0, &closes, 0.3));
        assert_eq!(regime.regime, Regime::StrongTrend);
        assert!(regime.adx > 25.0);
        assert!(regime.bb_width_percent > 3.0);
        assert_eq!(regime.recommendation.target_rr, 3.0);
        assert!(!regime.recommendation.partial_close);
    }

    #[test]
    fn test_flat_oscillation_is_tight_range() {
        let regime = detect_market_regime(&sideways(60, 100.0, 0.3));
        assert_eq!(regime.regime, Regime::TightRange);
        assert!(!regime.recommendation.allow_entry);
        assert_eq!(regime.recommendation.trailing_stop_start, None);
    }

    #[test]
    fn test_regime_is_deterministic() {
        for seed in 0..10 {
            let candles = random_walk(120, seed);
            let a = detect_market_regime(&candles);
            let b = detect_market_regime(&candles);
            assert_eq!(a, b);
            // Only the trailing window matters
            let c = detect_market_regime(&candles[candles.len() - 50..]);
            assert_eq!(a, c);
        }
    }

    #[test]
    fn test_adjustment_is_clamped() {
        let strong = MarketRegime::from_parts(Regime::StrongTrend, 30.0, 4.0);
        let tight = MarketRegime::from_parts(Regime::TightRange, 10.0, 1.0);
        assert_eq!(adjust_confluence(140.0, &strong, 145), 145.0);
        assert_eq!(adjust_confluence(60.0, &strong, 145), 70.0);
        assert_eq!(adjust_confluence(10.0, &tight, 145), 0.0);
    }

    #[test]
    fn test_mode_gate() {
        let tight = MarketRegime::from_parts(Regime::TightRange, 10.0, 1.0);
        let choppy = MarketRegime::from_parts(Regime::Choppy, 22.0, 2.0);
        assert!(should_allow_signal(&tight, StrategyMode::Scalping));
        assert!(!should_allow_signal(&tight, StrategyMode::Aggressive));
        assert!(should_allow_signal(&choppy, StrategyMode::Moderate));
        assert!(!should_allow_signal(&choppy, StrategyMode::Elite));
    }
}
