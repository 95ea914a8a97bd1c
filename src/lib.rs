// Library crate - exports candle types, strategy configuration and the detection core

pub mod types;
pub mod error;
pub mod config;
pub mod data;
pub mod smc_core;

// Re-export commonly used types
pub use types::*;
pub use error::{AnalysisError, ConfigError};
pub use config::{StrategyConfig, StrategyMode, StrategyOverrides};
pub use smc_core::{analyze, AnalysisResult, Signal};
