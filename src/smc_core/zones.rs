//! Premium / Discount and Optimal Trade Entry
//!
//! Where does price sit inside the dealing range between the highest swing
//! high and lowest swing low of the last 100 candles? Longs belong in
//! discount, shorts in premium.

use serde::{Deserialize, Serialize};

use super::swings::SwingPoints;
use crate::types::{Candle, Direction};

const RANGE_LOOKBACK: usize = 100;
const MIN_CANDLES: usize = 50;
const DISCOUNT_BELOW: f64 = 45.0;
const PREMIUM_ABOVE: f64 = 55.0;

const OTE_START: f64 = 0.618;
const OTE_SWEET_SPOT: f64 = 0.705;
const OTE_END: f64 = 0.786;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceZone {
    Discount,
    #[serde(rename = "neutral")]
    Equilibrium,
    Premium,
}

impl PriceZone {
    /// Zone a long (discount) or short (premium) wants
    pub fn favoured_for(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => PriceZone::Discount,
            Direction::Bearish => PriceZone::Premium,
        }
    }
}

impl std::fmt::Display for PriceZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceZone::Discount => write!(f, "discount"),
            PriceZone::Equilibrium => write!(f, "equilibrium"),
            PriceZone::Premium => write!(f, "premium"),
        }
    }
}

/// Fibonacci retracement band a pullback entry should land in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OteBand {
    pub direction: Direction,
    /// Edge nearest the 61.8% retracement
    pub start: f64,
    pub sweet_spot: f64,
    /// Edge nearest the 78.6% retracement
    pub end: f64,
    pub price_in_ote: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumDiscount {
    pub zone: PriceZone,
    /// Position in the dealing range, 0 (low) to 100 (high)
    pub percentage: f64,
    pub equilibrium: f64,
    pub range_high: Option<f64>,
    pub range_low: Option<f64>,
    pub bullish_ote: Option<OteBand>,
    pub bearish_ote: Option<OteBand>,
}

impl PremiumDiscount {
    fn neutral(price: f64) -> Self {
        Self {
            zone: PriceZone::Equilibrium,
            percentage: 50.0,
            equilibrium: price,
            range_high: None,
            range_low: None,
            bullish_ote: None,
            bearish_ote: None,
        }
    }

    pub fn ote(&self, direction: Direction) -> Option<&OteBand> {
        match direction {
            Direction::Bullish => self.bullish_ote.as_ref(),
            Direction::Bearish => self.bearish_ote.as_ref(),
        }
    }
}

pub fn calculate_premium_discount(candles: &[Candle], swings: &SwingPoints, price: f64) -> PremiumDiscount {
    if candles.len() < MIN_CANDLES || !price.is_finite() {
        return PremiumDiscount::neutral(price);
    }

    let first = candles.len().saturating_sub(RANGE_LOOKBACK);
    let high = swings
        .highs
        .iter()
        .filter(|s| s.index >= first)
        .map(|s| s.price)
        .fold(f64::NAN, f64::max);
    let low = swings
        .lows
        .iter()
        .filter(|s| s.index >= first)
        .map(|s| s.price)
        .fold(f64::NAN, f64::min);

    if high.is_nan() || low.is_nan() || high <= low {
        return PremiumDiscount::neutral(price);
    }

    let range = high - low;
    let percentage = ((price - low) / range * 100.0).clamp(0.0, 100.0);
    let zone = if percentage < DISCOUNT_BELOW {
        PriceZone::Discount
    } else if percentage > PREMIUM_ABOVE {
        PriceZone::Premium
    } else {
        PriceZone::Equilibrium
    };

    PremiumDiscount {
        zone,
        percentage,
        equilibrium: low + range * 0.5,
        range_high: Some(high),
        range_low: Some(low),
        bullish_ote: Some(calculate_ote(high, low, price, Direction::Bullish)),
        bearish_ote: Some(calculate_ote(high, low, price, Direction::Bearish)),
    }
}

/// OTE band for a retracement of the `low..high` leg
pub fn calculate_ote(high: f64, low: f64, price: f64, direction: Direction) -> OteBand {
    let range = high - low;
    let (start, sweet_spot, end) = match direction {
        Direction::Bullish => (high - range * OTE_START, high - range * OTE_SWEET_SPOT, high - range * OTE_END),
        Direction::Bearish => (low + range * OTE_START, low + range * OTE_SWEET_SPOT, low + range * OTE_END),
    };
    let (lo, hi) = (start.min(end), start.max(end));

    OteBand {
        direction,
        start,
        sweet_spot,
        end,
        price_in_ote: price >= lo && price <= hi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc_core::swings::detect_swing_points;
    use crate::smc_core::testing::bullish_setup;

    #[test]
    fn test_setup_pullback_is_discount() {
        let candles = bullish_setup();
        let swings = detect_swing_points(&candles, 2);
        let price = candles.last().unwrap().close;
        let pd = calculate_premium_discount(&candles, &swings, price);
        assert_eq!(pd.zone, PriceZone::Discount);
        assert!((pd.range_high.unwrap() - 106.1).abs() < 1e-9);
        assert!((pd.range_low.unwrap() - 97.5).abs() < 1e-9);
        assert!(pd.percentage < 45.0);
    }

    #[test]
    fn test_short_series_is_neutral() {
        let candles = bullish_setup();
        let swings = detect_swing_points(&candles[..40], 2);
        let pd = calculate_premium_discount(&candles[..40], &swings, 100.0);
        assert_eq!(pd.zone, PriceZone::Equilibrium);
        assert_eq!(pd.percentage, 50.0);
        assert!(pd.bullish_ote.is_none());
    }

    #[test]
    fn test_ote_band() {
        let ote = calculate_ote(110.0, 100.0, 103.0, Direction::Bullish);
        assert!((ote.start - 103.82).abs() < 1e-9);
        assert!((ote.end - 102.14).abs() < 1e-9);
        assert!(ote.price_in_ote);

        let ote = calculate_ote(110.0, 100.0, 103.0, Direction::Bearish);
        assert!((ote.start - 106.18).abs() < 1e-9);
        assert!(!ote.price_in_ote);
    }

    #[test]
    fn test_zone_symmetry() {
        assert_eq!(PriceZone::favoured_for(Direction::Bullish), PriceZone::Discount);
        assert_eq!(PriceZone::favoured_for(Direction::Bearish), PriceZone::Premium);
    }
}
