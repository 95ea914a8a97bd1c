//! SMC Core - Smart-money pattern detection and signal confluence
//!
//! This module contains the analysis pipeline components:
//! - Swing point and market structure detection
//! - Fair value gaps, order and breaker blocks
//! - Liquidity sweeps, pools, consolidations and inducements
//! - Premium/discount zones and OTE bands
//! - Volume, session and market regime context
//! - Higher-timeframe trend overlay
//! - Confluence scoring, trade levels and the entry state machine
//! - One-call analysis of a candle series

pub mod indicators;
pub mod swings;
pub mod structure;
pub mod fvg;
pub mod order_blocks;
pub mod liquidity;
pub mod zones;
pub mod volume;
pub mod session;
pub mod regime;
pub mod htf;
pub mod rejection;
pub mod entry_state;
pub mod risk;
pub mod signals;
pub mod analyzer;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use swings::{SwingKind, SwingPoint, SwingPoints};
pub use structure::{BreakKind, MarketStructure, StructureBreak, Trend};
pub use fvg::{FairValueGap, FillStatus};
pub use order_blocks::{BreakerBlock, IctValidation, OrderBlock};
pub use liquidity::{ConsolidationRange, Inducement, LiquidityPool, LiquiditySweep};
pub use zones::{OteBand, PremiumDiscount, PriceZone};
pub use volume::VolumeAnalysis;
pub use session::Session;
pub use regime::{MarketRegime, Regime};
pub use htf::{HtfAnalysis, HtfTrend};
pub use entry_state::{Confirmations, EntryState, EntryStateTracker, StateTransition};
pub use risk::{RiskRejection, TargetSource, TradeLevels};
pub use signals::{Confidence, Pattern, Signal, SignalRejection};
pub use analyzer::{analyze, AnalysisResult, AnalysisStatus, DiagnosticEvent};
