//! Shared market data types
//!
//! Candles are the only input the detection core needs. Everything else in
//! the crate is derived from a `&[Candle]` slice plus a `Timeframe`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConfigError;

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub close_time: DateTime<Utc>,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body_top(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> f64 {
        self.open.min(self.close)
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.body_top()
    }

    pub fn lower_wick(&self) -> f64 {
        self.body_bottom() - self.low
    }

    /// True range against the previous close (plain range for the first bar)
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => self
                .range()
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => self.range(),
        }
    }

    /// Whether the bar's range touches the closed interval [bottom, top]
    pub fn intersects(&self, bottom: f64, top: f64) -> bool {
        self.low <= top && self.high >= bottom
    }

    /// Finite prices and high ≥ max(open, close) ≥ min(open, close) ≥ low
    pub fn is_well_formed(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite && self.high >= self.body_top() && self.body_bottom() >= self.low && self.low > 0.0
    }

    /// Describe why a candle is malformed, if it is
    pub fn defect(&self) -> Option<&'static str> {
        if ![self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
        {
            Some("non-finite OHLCV field")
        } else if self.low <= 0.0 {
            Some("non-positive price")
        } else if self.high < self.body_top() || self.body_bottom() < self.low {
            Some("high/low inconsistent with open/close")
        } else {
            None
        }
    }
}

/// Direction of a pattern or setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }

    pub fn signal_type(self) -> SignalType {
        match self {
            Direction::Bullish => SignalType::Buy,
            Direction::Bearish => SignalType::Sell,
        }
    }

    /// +1.0 for bullish, -1.0 for bearish
    pub fn sign(self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bullish => write!(f, "bullish"),
            Direction::Bearish => write!(f, "bearish"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Buy => write!(f, "BUY"),
            SignalType::Sell => write!(f, "SELL"),
        }
    }
}

/// Candle interval. Detector thresholds scale with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Minimum FVG size in percent of the reference price.
    /// Noisy low timeframes need a bigger gap to count.
    pub fn fvg_min_gap_percent(&self) -> f64 {
        match self {
            Timeframe::M1 => 0.10,
            Timeframe::M5 => 0.12,
            Timeframe::M15 => 0.15,
            Timeframe::M30 => 0.12,
            Timeframe::H1 => 0.10,
            Timeframe::H4 => 0.05,
            Timeframe::D1 => 0.05,
        }
    }

    /// Minimum body of the middle FVG candle, in percent of its open
    pub fn fvg_min_displacement_percent(&self) -> f64 {
        match self {
            Timeframe::M1 => 0.15,
            Timeframe::M5 => 0.2,
            Timeframe::M15 => 0.3,
            Timeframe::M30 => 0.4,
            Timeframe::H1 => 0.5,
            Timeframe::H4 => 0.8,
            Timeframe::D1 => 1.2,
        }
    }

    /// Forward offsets scanned when measuring the impulse after an order block candle
    pub fn ob_forward_offsets(&self) -> &'static [usize] {
        match self {
            Timeframe::M1 | Timeframe::M5 => &[3, 5, 10, 15, 20],
            Timeframe::M15 => &[3, 5, 7, 10, 15],
            Timeframe::M30 | Timeframe::H1 => &[3, 5, 7, 10],
            Timeframe::H4 => &[2, 3, 5, 7],
            Timeframe::D1 => &[2, 3, 5],
        }
    }

    /// Coarser timeframe used for the HTF overlay
    pub fn higher(&self) -> Timeframe {
        match self {
            Timeframe::M1 => Timeframe::M15,
            Timeframe::M5 => Timeframe::H1,
            Timeframe::M15 => Timeframe::H1,
            Timeframe::M30 => Timeframe::H4,
            Timeframe::H1 => Timeframe::H4,
            Timeframe::H4 => Timeframe::D1,
            Timeframe::D1 => Timeframe::D1,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownTimeframe(s.to_string()))
    }
}
