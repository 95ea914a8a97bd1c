//! Error types for the detection core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with the strategy configuration or request parameters.
/// Always fatal for the call that hit them.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("unknown strategy mode '{0}'")]
    UnknownMode(String),

    #[error("unknown timeframe '{0}'")]
    UnknownTimeframe(String),

    #[error("invalid {name} = {value}: {reason}")]
    InvalidThreshold {
        name: String,
        value: f64,
        reason: String,
    },

    #[error("{setting} conflicts with {other}")]
    Inconsistent { setting: String, other: String },

    #[error("unreadable strategy document: {0}")]
    Document(String),
}

/// Errors raised by `analyze` and the detector helpers
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisError {
    #[error("insufficient data for {detector}: need {required} candles, got {actual}")]
    InsufficientData {
        detector: String,
        required: usize,
        actual: usize,
    },

    #[error("malformed candle at index {index}: {reason}")]
    MalformedCandle { index: usize, reason: String },

    #[error("configuration inconsistency: {0}")]
    Configuration(#[from] ConfigError),
}

/// Check a detector's minimum input length
pub fn ensure_min_candles(detector: &str, actual: usize, required: usize) -> Result<(), AnalysisError> {
    if actual < required {
        return Err(AnalysisError::InsufficientData {
            detector: detector.to_string(),
            required,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_min_candles() {
        assert!(ensure_min_candles("regime", 50, 50).is_ok());
        let err = ensure_min_candles("regime", 49, 50).unwrap_err();
        assert_eq!(err.to_string(), "insufficient data for regime: need 50 candles, got 49");
    }

    #[test]
    fn test_config_error_converts() {
        let err: AnalysisError = ConfigError::UnknownMode("turbo".into()).into();
        assert!(matches!(err, AnalysisError::Configuration(ConfigError::UnknownMode(_))));
        assert_eq!(err.to_string(), "configuration inconsistency: unknown strategy mode 'turbo'");
    }
}
