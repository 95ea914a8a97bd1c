//! Entry State Machine
//!
//! A setup moves through three states, re-derived from scratch on each scan:
//! 1. MONITORING - zone found, structure break or return to zone missing
//! 2. WAITING - structure broke and price is back in the zone
//! 3. ENTRY_READY - a rejection candle confirmed the zone (and the
//!    break-and-retest held, when the mode asks for it)
//!
//! `EntryStateTracker` compares successive scans and reports transitions
//! keyed by signal id, for whoever persists signal history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::indicators::{calculate_atr, ATR_PERIOD};
use super::rejection::RejectionPattern;
use super::signals::Signal;
use crate::types::{Candle, Direction};

/// Excursion beyond the zone, in ATRs, that counts as displacement
const MIN_DISPLACEMENT_ATR: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryState {
    Monitoring,
    Waiting,
    EntryReady,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryState::Monitoring => write!(f, "MONITORING"),
            EntryState::Waiting => write!(f, "WAITING"),
            EntryState::EntryReady => write!(f, "ENTRY_READY"),
        }
    }
}

/// Break-and-retest check against the setup's zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetestDetails {
    pub has_displaced: bool,
    /// Furthest excursion beyond the zone after the break, in ATRs
    pub displacement_atr: f64,
    pub has_retested: bool,
    pub in_zone_now: bool,
    pub rejection_on_retest: bool,
    pub validated: bool,
    pub reason: String,
}

/// What each detection stage confirmed for one direction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmations {
    /// Zone (FVG or order block) plus a confirming event
    pub setup_detected: bool,
    pub structure_break_confirmed: bool,
    /// Latest candle trades inside the zone
    pub price_at_zone: bool,
    pub rejection_confirmed: bool,
    pub rejection_pattern: Option<RejectionPattern>,
    pub retest_required: bool,
    pub retest: Option<RetestDetails>,
}

impl Confirmations {
    pub fn retest_validated(&self) -> bool {
        self.retest.as_ref().map(|r| r.validated).unwrap_or(false)
    }

    pub fn entry_state(&self) -> EntryState {
        if !(self.structure_break_confirmed && self.price_at_zone) {
            return EntryState::Monitoring;
        }
        if self.rejection_confirmed && (!self.retest_required || self.retest_validated()) {
            EntryState::EntryReady
        } else {
            EntryState::Waiting
        }
    }
}

/// Check for displacement away from `[bottom, top]` after `break_index`,
/// a return into the zone after the excursion peak, and rejection on the
/// latest candle.
pub fn evaluate_retest(
    candles: &[Candle],
    bottom: f64,
    top: f64,
    direction: Direction,
    break_index: Option<usize>,
    rejection: bool,
) -> RetestDetails {
    let mut details = RetestDetails {
        has_displaced: false,
        displacement_atr: 0.0,
        has_retested: false,
        in_zone_now: candles.last().map(|c| c.intersects(bottom, top)).unwrap_or(false),
        rejection_on_retest: rejection,
        validated: false,
        reason: String::new(),
    };

    let Some(break_index) = break_index.filter(|&i| i < candles.len()) else {
        details.reason = "no structure break to retest".to_string();
        return details;
    };

    let atr = calculate_atr(candles, ATR_PERIOD);
    let peak = candles
        .iter()
        .enumerate()
        .skip(break_index)
        .filter(|(_, c)| c.is_well_formed())
        .map(|(i, c)| {
            let excursion = match direction {
                Direction::Bullish => c.high - top,
                Direction::Bearish => bottom - c.low,
            };
            (i, excursion)
        })
        .fold(None, |best: Option<(usize, f64)>, (i, e)| match best {
            Some((_, b)) if b >= e => best,
            _ => Some((i, e)),
        });

    let Some((peak_index, excursion)) = peak else {
        details.reason = "no candles after the structure break".to_string();
        return details;
    };

    details.displacement_atr = if atr > 0.0 { excursion.max(0.0) / atr } else { 0.0 };
    details.has_displaced = details.displacement_atr >= MIN_DISPLACEMENT_ATR;
    details.has_retested = candles[peak_index + 1..].iter().any(|c| c.intersects(bottom, top));

    details.validated = details.has_displaced && details.has_retested && details.in_zone_now && rejection;
    details.reason = if details.validated {
        format!("displaced {:.1} ATR, retested with rejection", details.displacement_atr)
    } else if !details.has_displaced {
        format!("displacement {:.2} ATR below {:.1}", details.displacement_atr, MIN_DISPLACEMENT_ATR)
    } else if !details.has_retested {
        "price has not returned to the zone".to_string()
    } else if !details.in_zone_now {
        "retest happened but price has left the zone".to_string()
    } else {
        "waiting for rejection on the retest".to_string()
    };

    details
}

/// State change observed between two scans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StateTransition {
    /// Setup seen for the first time
    Detected {
        signal_id: Uuid,
        direction: Direction,
        state: EntryState,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        at: DateTime<Utc>,
    },
    /// Setup moved to a later state
    Promoted {
        signal_id: Uuid,
        from: EntryState,
        to: EntryState,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        at: DateTime<Utc>,
    },
    /// Setup no longer produced by the scan
    Expired {
        signal_id: Uuid,
        last_state: EntryState,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
struct TrackedSetup {
    direction: Direction,
    state: EntryState,
}

/// Remembers the furthest state each setup reached across scans
#[derive(Debug, Default)]
pub struct EntryStateTracker {
    setups: HashMap<Uuid, TrackedSetup>,
}

impl EntryStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a tracked setup
    pub fn state(&self, signal_id: &Uuid) -> Option<EntryState> {
        self.setups.get(signal_id).map(|s| s.state)
    }

    pub fn active(&self) -> usize {
        self.setups.len()
    }

    /// Feed the signals of one scan and collect the transitions it caused.
    /// States only move forward; a scan reporting an earlier state for a
    /// known setup leaves it where it was.
    pub fn observe(&mut self, signals: &[Signal], at: DateTime<Utc>) -> Vec<StateTransition> {
        let mut transitions = Vec::new();

        let mut seen = Vec::with_capacity(signals.len());
        for signal in signals {
            seen.push(signal.id);
            match self.setups.get_mut(&signal.id) {
                None => {
                    debug!(id = %signal.id, state = %signal.entry_state, "setup detected");
                    self.setups.insert(
                        signal.id,
                        TrackedSetup {
                            direction: signal.direction,
                            state: signal.entry_state,
                        },
                    );
                    transitions.push(StateTransition::Detected {
                        signal_id: signal.id,
                        direction: signal.direction,
                        state: signal.entry_state,
                        at,
                    });
                }
                Some(tracked) if signal.entry_state > tracked.state => {
                    debug!(id = %signal.id, from = %tracked.state, to = %signal.entry_state, "setup promoted");
                    transitions.push(StateTransition::Promoted {
                        signal_id: signal.id,
                        from: tracked.state,
                        to: signal.entry_state,
                        at,
                    });
                    tracked.state = signal.entry_state;
                }
                Some(_) => {}
            }
        }

        let expired: Vec<Uuid> = self.setups.keys().filter(|id| !seen.contains(id)).copied().collect();
        for id in expired {
            if let Some(tracked) = self.setups.remove(&id) {
                debug!(id = %id, direction = %tracked.direction, "setup expired");
                transitions.push(StateTransition::Expired {
                    signal_id: id,
                    last_state: tracked.state,
                    at,
                });
            }
        }

        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smc_core::testing::{bullish_setup, mirror};

    fn ready() -> Confirmations {
        Confirmations {
            setup_detected: true,
            structure_break_confirmed: true,
            price_at_zone: true,
            rejection_confirmed: true,
            rejection_pattern: Some(RejectionPattern::Hammer),
            retest_required: false,
            retest: None,
        }
    }

    #[test]
    fn test_state_from_confirmations() {
        assert_eq!(ready().entry_state(), EntryState::EntryReady);

        let waiting = Confirmations { rejection_confirmed: false, ..ready() };
        assert_eq!(waiting.entry_state(), EntryState::Waiting);

        let monitoring = Confirmations { price_at_zone: false, ..ready() };
        assert_eq!(monitoring.entry_state(), EntryState::Monitoring);

        let unbroken = Confirmations { structure_break_confirmed: false, ..ready() };
        assert_eq!(unbroken.entry_state(), EntryState::Monitoring);

        // Retest required but not validated holds the setup in WAITING
        let unretested = Confirmations { retest_required: true, ..ready() };
        assert_eq!(unretested.entry_state(), EntryState::Waiting);
    }

    #[test]
    fn test_retest_on_setup() {
        let candles = bullish_setup();
        // Order block [97.5, 98.2], CHoCH at 53
        let details = evaluate_retest(&candles, 97.5, 98.2, Direction::Bullish, Some(53), true);
        assert!(details.has_displaced, "{}", details.reason);
        assert!(details.displacement_atr >= 1.0);
        assert!(details.has_retested);
        assert!(details.in_zone_now);
        assert!(details.validated);
    }

    #[test]
    fn test_retest_needs_rejection_and_return() {
        let candles = bullish_setup();
        let details = evaluate_retest(&candles, 97.5, 98.2, Direction::Bullish, Some(53), false);
        assert!(!details.validated);
        assert_eq!(details.reason, "waiting for rejection on the retest");

        // One bar earlier price has not come back to the block yet
        let details = evaluate_retest(&candles[..56], 97.5, 98.2, Direction::Bullish, Some(53), true);
        assert!(!details.has_retested);
        assert!(!details.validated);

        let details = evaluate_retest(&candles, 97.5, 98.2, Direction::Bullish, None, true);
        assert!(!details.validated);
    }

    #[test]
    fn test_retest_mirror() {
        let candles = mirror(&bullish_setup(), 100.0);
        let details = evaluate_retest(&candles, 101.8, 102.5, Direction::Bearish, Some(53), true);
        assert!(details.validated, "{}", details.reason);
    }
}
