//! Volume analysis: participation behind the latest candle and
//! price/volume divergence.

use serde::{Deserialize, Serialize};

use super::indicators::mean;
use crate::types::{Candle, Direction};

const AVERAGE_PERIOD: usize = 20;
const TREND_WINDOW: usize = 5;
const DIVERGENCE_VOLUME_RATIO: f64 = 0.7;
const STRONG_RATIO: f64 = 1.5;
const MODERATE_RATIO: f64 = 1.0;
/// Latest bar above this multiple of the average is a climax
const CLIMAX_RATIO: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeTrend {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStrength {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAnalysis {
    pub average: f64,
    pub current: f64,
    /// Current volume / 20-candle average
    pub ratio: f64,
    pub trend: VolumeTrend,
    /// Direction price is likely to turn towards when volume fails to
    /// confirm a new extreme
    pub divergence: Option<Direction>,
    pub confirmation: VolumeStrength,
    /// Latest volume above twice the average, often exhaustion
    pub climax: bool,
}

impl VolumeAnalysis {
    fn empty() -> Self {
        Self {
            average: 0.0,
            current: 0.0,
            ratio: 0.0,
            trend: VolumeTrend::Flat,
            divergence: None,
            confirmation: VolumeStrength::Weak,
            climax: false,
        }
    }

    /// Fraction of the volume weight this analysis earns for a setup
    pub fn weight_factor(&self, direction: Direction) -> f64 {
        match self.divergence {
            Some(d) if d == direction => return 1.0,
            Some(_) => return 0.0,
            None => {}
        }
        match self.confirmation {
            VolumeStrength::Strong => 1.0,
            VolumeStrength::Moderate => 0.5,
            VolumeStrength::Weak => 0.0,
        }
    }
}

pub fn analyze_volume(candles: &[Candle]) -> VolumeAnalysis {
    let candles: Vec<&Candle> = candles.iter().filter(|c| c.is_well_formed() && c.volume.is_finite()).collect();
    if candles.len() < AVERAGE_PERIOD {
        return VolumeAnalysis::empty();
    }

    let window = &candles[candles.len() - AVERAGE_PERIOD..];
    let volumes: Vec<f64> = window.iter().map(|c| c.volume).collect();
    let average = mean(&volumes);
    let current = volumes[volumes.len() - 1];
    let ratio = if average > 0.0 { current / average } else { 0.0 };

    let recent = mean(&volumes[volumes.len() - TREND_WINDOW..]);
    let previous = mean(&volumes[volumes.len() - 2 * TREND_WINDOW..volumes.len() - TREND_WINDOW]);
    let trend = if recent > previous * 1.1 {
        VolumeTrend::Rising
    } else if recent < previous * 0.9 {
        VolumeTrend::Falling
    } else {
        VolumeTrend::Flat
    };

    let divergence = detect_divergence(window, average);

    let confirmation = if ratio >= STRONG_RATIO && trend == VolumeTrend::Rising && divergence.is_none() {
        VolumeStrength::Strong
    } else if ratio >= MODERATE_RATIO {
        VolumeStrength::Moderate
    } else {
        VolumeStrength::Weak
    };

    VolumeAnalysis {
        average,
        current,
        ratio,
        trend,
        divergence,
        confirmation,
        climax: ratio > CLIMAX_RATIO,
    }
}

/// New closing extreme on the last 5 candles versus the first 5 of the
/// window, made on volume below 70% of average
fn detect_divergence(window: &[&Candle], average: f64) -> Option<Direction> {
    let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
    let first = &closes[..TREND_WINDOW];
    let last = &closes[closes.len() - TREND_WINDOW..];
    let recent_volume = mean(&window[window.len() - TREND_WINDOW..].iter().map(|c| c.volume).collect::<Vec<_>>());
    if recent_volume >= average * DIVERGENCE_VOLUME_RATIO {
        return None;
    }

    let max = |v: &[f64]| v.iter().copied().fold(f64::MIN, f64::max);
    let min = |v: &[f64]| v.iter().copied().fold(f64::MAX, f64::min);

    if max(last) > max(first) {
        // Higher price on fading volume: buyers are exhausted
        Some(Direction::Bearish)
    } else if min(last) < min(first) {
        Some(Direction::Bullish)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc_core::testing::candle_with_volume;

    fn series(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&c, &v))| candle_with_volume(i, c, c + 0.5, c - 0.5, c, v))
            .collect()
    }

    #[test]
    fn test_too_short_is_weak() {
        let candles = series(&[100.0; 10], &[100.0; 10]);
        let analysis = analyze_volume(&candles);
        assert_eq!(analysis.confirmation, VolumeStrength::Weak);
        assert_eq!(analysis.ratio, 0.0);
    }

    #[test]
    fn test_strong_confirmation() {
        let closes = vec![100.0; 20];
        let mut volumes = vec![100.0; 15];
        volumes.extend([150.0, 160.0, 170.0, 180.0, 400.0]);
        let analysis = analyze_volume(&series(&closes, &volumes));
        assert_eq!(analysis.trend, VolumeTrend::Rising);
        assert!(analysis.ratio >= 1.5);
        assert_eq!(analysis.divergence, None);
        assert_eq!(analysis.confirmation, VolumeStrength::Strong);
        assert_eq!(analysis.weight_factor(Direction::Bullish), 1.0);
        assert!(analysis.climax);
    }

    #[test]
    fn test_climax_needs_double_average() {
        let mut volumes = vec![100.0; 19];
        volumes.push(190.0);
        let analysis = analyze_volume(&series(&[100.0; 20], &volumes));
        assert!(analysis.ratio < 2.0);
        assert!(!analysis.climax);

        volumes[19] = 260.0;
        assert!(analyze_volume(&series(&[100.0; 20], &volumes)).climax);
    }

    #[test]
    fn test_opposing_divergence_voids_moderate_volume() {
        // Rally on fading volume, then one heavy bar: moderate ratio, bearish divergence
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let mut volumes = vec![200.0; 15];
        volumes.extend([10.0, 10.0, 10.0, 10.0, 250.0]);
        let analysis = analyze_volume(&series(&closes, &volumes));
        assert_eq!(analysis.divergence, Some(Direction::Bearish));
        assert_eq!(analysis.confirmation, VolumeStrength::Moderate);
        assert_eq!(analysis.weight_factor(Direction::Bullish), 0.0);
        assert_eq!(analysis.weight_factor(Direction::Bearish), 1.0);
    }

    #[test]
    fn test_moderate_confirmation() {
        let analysis = analyze_volume(&series(&[100.0; 20], &[100.0; 20]));
        assert_eq!(analysis.confirmation, VolumeStrength::Moderate);
        assert_eq!(analysis.weight_factor(Direction::Bearish), 0.5);
    }

    #[test]
    fn test_divergence_on_fading_rally() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let mut volumes = vec![200.0; 15];
        volumes.extend([20.0; 5]);
        let analysis = analyze_volume(&series(&closes, &volumes));
        assert_eq!(analysis.divergence, Some(Direction::Bearish));
        assert_eq!(analysis.weight_factor(Direction::Bearish), 1.0);
        assert_eq!(analysis.weight_factor(Direction::Bullish), 0.0);

        let falling: Vec<f64> = (0..20).map(|i| 120.0 - i as f64).collect();
        let analysis = analyze_volume(&series(&falling, &volumes));
        assert_eq!(analysis.divergence, Some(Direction::Bullish));
    }
}
