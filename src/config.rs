//! Strategy configuration
//!
//! Every threshold the detectors and the confluence scorer read lives in a
//! `StrategyConfig` value. Callers pick a named preset, optionally apply a
//! flat override document, and pass the result into `analyze`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::smc_core::regime::MAX_REGIME_BONUS;
use crate::types::Timeframe;

/// Named preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    Conservative,
    Moderate,
    Aggressive,
    Scalping,
    Sniper,
    Elite,
}

impl StrategyMode {
    pub const ALL: [StrategyMode; 6] = [
        StrategyMode::Conservative,
        StrategyMode::Moderate,
        StrategyMode::Aggressive,
        StrategyMode::Scalping,
        StrategyMode::Sniper,
        StrategyMode::Elite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
            Self::Scalping => "scalping",
            Self::Sniper => "sniper",
            Self::Elite => "elite",
        }
    }

    /// Modes that refuse to trade in choppy or compressed markets
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Conservative | Self::Sniper | Self::Elite)
    }
}

impl Default for StrategyMode {
    fn default() -> Self {
        Self::Moderate
    }
}

impl std::fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownMode(s.to_string()))
    }
}

/// Evidence a mode can insist on before a signal is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Confirmation {
    Fvg,
    OrderBlock,
    LiquiditySweep,
    Bos,
    /// Price sits in discount (longs) or premium (shorts), not equilibrium
    ValidZone,
    HtfAlignment,
}

impl std::fmt::Display for Confirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confirmation::Fvg => write!(f, "FVG"),
            Confirmation::OrderBlock => write!(f, "order block"),
            Confirmation::LiquiditySweep => write!(f, "liquidity sweep"),
            Confirmation::Bos => write!(f, "BOS"),
            Confirmation::ValidZone => write!(f, "valid zone"),
            Confirmation::HtfAlignment => write!(f, "HTF alignment"),
        }
    }
}

/// Points contributed by each piece of confluence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfluenceWeights {
    pub fvg: u32,
    pub order_block: u32,
    /// Extra points when the order block passes ICT validation
    pub ict_order_block: u32,
    pub liquidity_sweep: u32,
    pub bos: u32,
    pub htf_trend: u32,
    pub htf_zone: u32,
    /// Full weight for strong volume, half for moderate
    pub volume: u32,
    pub retest: u32,
    /// Scaled by the session quality factor
    pub session: u32,
    /// Retested breaker block of the trade direction
    pub breaker_block: u32,
    /// Recent stop hunt against the trade direction
    pub inducement: u32,
}

impl Default for ConfluenceWeights {
    fn default() -> Self {
        Self {
            fvg: 20,
            order_block: 15,
            ict_order_block: 10,
            liquidity_sweep: 20,
            bos: 20,
            htf_trend: 15,
            htf_zone: 10,
            volume: 10,
            retest: 10,
            session: 5,
            breaker_block: 10,
            inducement: 10,
        }
    }
}

impl ConfluenceWeights {
    /// Score cap: the core factors plus the best regime adjustment.
    /// Breaker and inducement points stack inside this cap.
    pub fn max_score(&self) -> u32 {
        self.fvg
            + self.order_block
            + self.ict_order_block
            + self.liquidity_sweep
            + self.bos
            + self.htf_trend
            + self.htf_zone
            + self.volume
            + self.retest
            + self.session
            + MAX_REGIME_BONUS
    }
}

/// How far back (in candles from the latest bar) each pattern still counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternLookbacks {
    pub fvg: usize,
    pub order_block: usize,
    pub liquidity_sweep: usize,
    pub bos: usize,
}

impl Default for PatternLookbacks {
    fn default() -> Self {
        Self {
            fvg: 10,
            order_block: 20,
            liquidity_sweep: 5,
            bos: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopMode {
    /// Just beyond the order block boundary, %-of-price fallback without one
    OrderBlock,
    /// Entry ± ATR × a volatility-adaptive multiplier
    AtrAdaptive,
}

/// Complete parameter set for one analysis call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub mode: StrategyMode,
    /// Score a signal must reach (0..=max score)
    pub minimum_confluence: u32,
    pub required_confirmations: Vec<Confirmation>,
    #[serde(rename = "requireBOSConfirmation")]
    pub require_bos_confirmation: bool,
    /// Accept equilibrium prices for either direction
    pub allow_neutral_zone: bool,
    /// Minimum impulse after an order block candle, as a fraction (0.005 = 0.5%)
    pub ob_impulse_threshold: f64,
    pub retest_required: bool,
    /// Baseline ATR multiple for stops; the adaptive policy moves it ±0.5
    #[serde(rename = "stopLossATRMultiplier")]
    pub stop_loss_atr_multiplier: f64,
    /// Short ATR / baseline ATR ratio that counts as a volatility shift
    pub atr_volatility_ratio: f64,
    pub stop_mode: StopMode,
    /// Order block stop buffer as a fraction of price
    pub ob_stop_buffer: f64,
    /// Stop distance used when no order block backs the setup
    pub fallback_stop_percent: f64,
    pub minimum_risk_reward: f64,
    /// Main target in R multiples
    pub target_risk_reward: f64,
    pub use_partial_take_profits: bool,
    /// Aim at equal highs/lows or the next swing before falling back to
    /// the R-multiple target
    pub use_liquidity_targets: bool,
    /// Reject setups that fight the higher-timeframe trend
    pub require_htf_alignment: bool,
    pub swing_lookback: usize,
    /// Widen the swing lookback on the fastest timeframes
    pub adaptive_swing_lookback: bool,
    pub weights: ConfluenceWeights,
    pub lookbacks: PatternLookbacks,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::moderate()
    }
}

impl StrategyConfig {
    pub fn for_mode(mode: StrategyMode) -> Self {
        match mode {
            StrategyMode::Conservative => Self::conservative(),
            StrategyMode::Moderate => Self::moderate(),
            StrategyMode::Aggressive => Self::aggressive(),
            StrategyMode::Scalping => Self::scalping(),
            StrategyMode::Sniper => Self::sniper(),
            StrategyMode::Elite => Self::elite(),
        }
    }

    /// Balanced preset: FVG required, everything else scores
    pub fn moderate() -> Self {
        Self {
            mode: StrategyMode::Moderate,
            minimum_confluence: 40,
            required_confirmations: vec![Confirmation::Fvg],
            require_bos_confirmation: false,
            allow_neutral_zone: true,
            ob_impulse_threshold: 0.005,
            retest_required: true,
            stop_loss_atr_multiplier: 2.5,
            atr_volatility_ratio: 1.2,
            stop_mode: StopMode::OrderBlock,
            ob_stop_buffer: 0.005,
            fallback_stop_percent: 0.02,
            minimum_risk_reward: 2.0,
            target_risk_reward: 2.0,
            use_partial_take_profits: false,
            use_liquidity_targets: false,
            require_htf_alignment: false,
            swing_lookback: 2,
            adaptive_swing_lookback: false,
            weights: ConfluenceWeights::default(),
            lookbacks: PatternLookbacks::default(),
        }
    }

    /// Full ICT sequence: sweep, BOS, FVG and a discount/premium location
    pub fn conservative() -> Self {
        Self {
            mode: StrategyMode::Conservative,
            minimum_confluence: 65,
            required_confirmations: vec![
                Confirmation::LiquiditySweep,
                Confirmation::Bos,
                Confirmation::Fvg,
                Confirmation::ValidZone,
            ],
            require_bos_confirmation: true,
            allow_neutral_zone: false,
            ob_impulse_threshold: 0.007,
            require_htf_alignment: true,
            ..Self::moderate()
        }
    }

    pub fn aggressive() -> Self {
        Self {
            mode: StrategyMode::Aggressive,
            minimum_confluence: 25,
            required_confirmations: vec![],
            ob_impulse_threshold: 0.003,
            retest_required: false,
            stop_loss_atr_multiplier: 2.0,
            minimum_risk_reward: 1.5,
            ..Self::moderate()
        }
    }

    /// Fast timeframes, ATR stops, scaled exits
    pub fn scalping() -> Self {
        Self {
            mode: StrategyMode::Scalping,
            minimum_confluence: 20,
            required_confirmations: vec![],
            ob_impulse_threshold: 0.002,
            retest_required: false,
            stop_loss_atr_multiplier: 2.5,
            stop_mode: StopMode::AtrAdaptive,
            minimum_risk_reward: 1.5,
            target_risk_reward: 1.5,
            use_partial_take_profits: true,
            adaptive_swing_lookback: true,
            ..Self::moderate()
        }
    }

    pub fn sniper() -> Self {
        Self {
            mode: StrategyMode::Sniper,
            minimum_confluence: 75,
            required_confirmations: vec![Confirmation::Bos, Confirmation::Fvg],
            require_bos_confirmation: true,
            allow_neutral_zone: false,
            ob_impulse_threshold: 0.007,
            minimum_risk_reward: 2.5,
            target_risk_reward: 2.5,
            use_partial_take_profits: true,
            use_liquidity_targets: true,
            require_htf_alignment: true,
            ..Self::moderate()
        }
    }

    pub fn elite() -> Self {
        Self {
            mode: StrategyMode::Elite,
            minimum_confluence: 85,
            ob_impulse_threshold: 0.008,
            stop_loss_atr_multiplier: 3.0,
            minimum_risk_reward: 3.0,
            target_risk_reward: 3.0,
            use_partial_take_profits: true,
            use_liquidity_targets: true,
            ..Self::conservative()
        }
    }

    /// Swing lookback to use on a given timeframe
    pub fn swing_lookback_for(&self, timeframe: Timeframe) -> usize {
        if self.adaptive_swing_lookback && matches!(timeframe, Timeframe::M1 | Timeframe::M5) {
            self.swing_lookback.max(3)
        } else {
            self.swing_lookback
        }
    }

    pub fn requires(&self, confirmation: Confirmation) -> bool {
        self.required_confirmations.contains(&confirmation)
            || (confirmation == Confirmation::Bos && self.require_bos_confirmation)
            || (confirmation == Confirmation::HtfAlignment && self.require_htf_alignment)
    }

    /// Reject threshold combinations that would make the mode unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = self.weights.max_score();
        if self.minimum_confluence > max {
            return Err(ConfigError::InvalidThreshold {
                name: "minimumConfluence".into(),
                value: self.minimum_confluence as f64,
                reason: format!("exceeds the maximum reachable score {}", max),
            });
        }
        positive("obImpulseThreshold", self.ob_impulse_threshold)?;
        if self.ob_impulse_threshold >= 0.5 {
            return Err(ConfigError::InvalidThreshold {
                name: "obImpulseThreshold".into(),
                value: self.ob_impulse_threshold,
                reason: "expected a fraction such as 0.005".into(),
            });
        }
        if !(self.stop_loss_atr_multiplier.is_finite() && self.stop_loss_atr_multiplier > 0.5) {
            return Err(ConfigError::InvalidThreshold {
                name: "stopLossATRMultiplier".into(),
                value: self.stop_loss_atr_multiplier,
                reason: "must be greater than 0.5".into(),
            });
        }
        positive("atrVolatilityRatio", self.atr_volatility_ratio - 1.0)?;
        positive("fallbackStopPercent", self.fallback_stop_percent)?;
        positive("minimumRiskReward", self.minimum_risk_reward)?;
        positive("targetRiskReward", self.target_risk_reward)?;
        if !(0.0..0.1).contains(&self.ob_stop_buffer) {
            return Err(ConfigError::InvalidThreshold {
                name: "obStopBuffer".into(),
                value: self.ob_stop_buffer,
                reason: "expected a fraction below 0.1".into(),
            });
        }
        if self.target_risk_reward < self.minimum_risk_reward {
            return Err(ConfigError::Inconsistent {
                setting: format!("targetRiskReward {}", self.target_risk_reward),
                other: format!("minimumRiskReward {}", self.minimum_risk_reward),
            });
        }
        if self.swing_lookback == 0 {
            return Err(ConfigError::InvalidThreshold {
                name: "swingLookback".into(),
                value: 0.0,
                reason: "must be at least 1".into(),
            });
        }
        if self.require_htf_alignment && self.weights.htf_trend == 0 {
            return Err(ConfigError::Inconsistent {
                setting: "requireHtfAlignment".into(),
                other: "a zero htfTrend weight".into(),
            });
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            name: name.into(),
            value,
            reason: "must be positive".into(),
        })
    }
}

/// Flat key-value document of runtime overrides, e.g.
/// `{"mode": "sniper", "minimumConfluence": 80}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct StrategyOverrides {
    pub mode: Option<String>,
    pub minimum_confluence: Option<u32>,
    #[serde(rename = "stopLossATRMultiplier")]
    pub stop_loss_atr_multiplier: Option<f64>,
    pub ob_impulse_threshold: Option<f64>,
    pub allow_neutral_zone: Option<bool>,
    pub minimum_risk_reward: Option<f64>,
    pub retest_required: Option<bool>,
    pub use_liquidity_targets: Option<bool>,
}

impl StrategyOverrides {
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(document).map_err(|e| ConfigError::Document(e.to_string()))
    }

    /// Build the effective config: preset for the document's mode (or
    /// `fallback_mode`), then overrides, then validation.
    pub fn resolve(&self, fallback_mode: StrategyMode) -> Result<StrategyConfig, ConfigError> {
        let mode = match &self.mode {
            Some(name) => name.parse()?,
            None => fallback_mode,
        };
        let mut config = StrategyConfig::for_mode(mode);

        if let Some(v) = self.minimum_confluence {
            config.minimum_confluence = v;
        }
        if let Some(v) = self.stop_loss_atr_multiplier {
            config.stop_loss_atr_multiplier = v;
        }
        if let Some(v) = self.ob_impulse_threshold {
            config.ob_impulse_threshold = v;
        }
        if let Some(v) = self.allow_neutral_zone {
            config.allow_neutral_zone = v;
        }
        if let Some(v) = self.minimum_risk_reward {
            config.minimum_risk_reward = v;
            // Keep the main target reachable when the floor is raised
            config.target_risk_reward = config.target_risk_reward.max(v);
        }
        if let Some(v) = self.retest_required {
            config.retest_required = v;
        }
        if let Some(v) = self.use_liquidity_targets {
            config.use_liquidity_targets = v;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_validate() {
        for mode in StrategyMode::ALL {
            let config = StrategyConfig::for_mode(mode);
            assert_eq!(config.mode, mode);
            assert!(config.validate().is_ok(), "{} preset invalid", mode);
        }
    }

    #[test]
    fn test_default_weights_cap_at_145() {
        assert_eq!(ConfluenceWeights::default().max_score(), 145);
    }

    #[test]
    fn test_retest_requirement_per_mode() {
        assert!(StrategyConfig::conservative().retest_required);
        assert!(StrategyConfig::moderate().retest_required);
        assert!(StrategyConfig::sniper().retest_required);
        assert!(StrategyConfig::elite().retest_required);
        assert!(!StrategyConfig::aggressive().retest_required);
        assert!(!StrategyConfig::scalping().retest_required);
    }

    #[test]
    fn test_conservative_requirements() {
        let config = StrategyConfig::conservative();
        assert_eq!(config.minimum_confluence, 65);
        assert!(config.requires(Confirmation::LiquiditySweep));
        assert!(config.requires(Confirmation::Bos));
        assert!(config.requires(Confirmation::ValidZone));
        assert!(!config.allow_neutral_zone);
        assert_eq!(config.ob_impulse_threshold, 0.007);
    }

    #[test]
    fn test_unknown_mode_is_an_error() {
        assert_eq!("turbo".parse::<StrategyMode>(), Err(ConfigError::UnknownMode("turbo".into())));
        let doc = StrategyOverrides::from_json(r#"{"mode": "turbo"}"#).unwrap();
        assert!(matches!(doc.resolve(StrategyMode::Moderate), Err(ConfigError::UnknownMode(_))));
    }

    #[test]
    fn test_overrides_apply() {
        let doc = StrategyOverrides::from_json(
            r#"{"mode": "Aggressive", "minimumConfluence": 50, "stopLossATRMultiplier": 1.8, "allowNeutralZone": false}"#,
        )
        .unwrap();
        let config = doc.resolve(StrategyMode::Moderate).unwrap();
        assert_eq!(config.mode, StrategyMode::Aggressive);
        assert_eq!(config.minimum_confluence, 50);
        assert_eq!(config.stop_loss_atr_multiplier, 1.8);
        assert!(!config.allow_neutral_zone);
    }

    #[test]
    fn test_unknown_override_key_rejected() {
        let err = StrategyOverrides::from_json(r#"{"minConfluence": 50}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Document(_)));
    }

    #[test]
    fn test_inconsistent_thresholds_rejected() {
        let doc = StrategyOverrides { minimum_confluence: Some(200), ..Default::default() };
        assert!(matches!(
            doc.resolve(StrategyMode::Moderate),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let doc = StrategyOverrides { ob_impulse_threshold: Some(0.0), ..Default::default() };
        assert!(doc.resolve(StrategyMode::Moderate).is_err());

        let mut config = StrategyConfig::moderate();
        config.target_risk_reward = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Inconsistent { .. })));
    }

    #[test]
    fn test_raising_min_rr_lifts_target() {
        let doc = StrategyOverrides { minimum_risk_reward: Some(3.0), ..Default::default() };
        let config = doc.resolve(StrategyMode::Moderate).unwrap();
        assert_eq!(config.target_risk_reward, 3.0);
    }

    #[test]
    fn test_liquidity_targets_per_mode() {
        assert!(StrategyConfig::sniper().use_liquidity_targets);
        assert!(StrategyConfig::elite().use_liquidity_targets);
        assert!(!StrategyConfig::moderate().use_liquidity_targets);
        assert!(!StrategyConfig::conservative().use_liquidity_targets);
        assert!(!StrategyConfig::scalping().use_liquidity_targets);

        let doc = StrategyOverrides::from_json(r#"{"useLiquidityTargets": true}"#).unwrap();
        assert!(doc.resolve(StrategyMode::Moderate).unwrap().use_liquidity_targets);
    }

    #[test]
    fn test_breaker_and_inducement_stay_inside_cap() {
        let weights = ConfluenceWeights::default();
        assert_eq!((weights.breaker_block, weights.inducement), (10, 10));
        let without = ConfluenceWeights {
            breaker_block: 0,
            inducement: 0,
            ..weights.clone()
        };
        assert_eq!(weights.max_score(), without.max_score());
    }

    #[test]
    fn test_adaptive_swing_lookback() {
        let scalping = StrategyConfig::scalping();
        assert_eq!(scalping.swing_lookback_for(Timeframe::M1), 3);
        assert_eq!(scalping.swing_lookback_for(Timeframe::H1), 2);
        assert_eq!(StrategyConfig::moderate().swing_lookback_for(Timeframe::M1), 2);
    }
}
