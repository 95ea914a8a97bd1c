//! Trading session classification (UTC hours)

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Session active at a given time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Session {
    /// London and New York both open (13:00-17:00 UTC)
    LondonNewYorkOverlap,
    London,
    NewYork,
    Asia,
    /// Between the New York close and the Asian open
    DeadZone,
}

impl Session {
    pub fn at(time: DateTime<Utc>) -> Self {
        let hour = time.hour();
        let asia = hour < 9;
        let london = (8..17).contains(&hour);
        let new_york = (13..22).contains(&hour);

        match (london, new_york, asia) {
            (true, true, _) => Session::LondonNewYorkOverlap,
            (true, false, _) => Session::London,
            (false, true, _) => Session::NewYork,
            (false, false, true) => Session::Asia,
            (false, false, false) => Session::DeadZone,
        }
    }

    /// 0..=1 multiplier for the session weight
    pub fn quality(&self) -> f64 {
        match self {
            Session::LondonNewYorkOverlap => 1.0,
            Session::London | Session::NewYork => 0.6,
            Session::Asia => 0.2,
            Session::DeadZone => 0.0,
        }
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Session::LondonNewYorkOverlap => write!(f, "London/NY overlap"),
            Session::London => write!(f, "London"),
            Session::NewYork => write!(f, "New York"),
            Session::Asia => write!(f, "Asia"),
            Session::DeadZone => write!(f, "dead zone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(hour: u32) -> Session {
        Session::at(Utc.with_ymd_and_hms(2024, 3, 4, hour, 30, 0).unwrap())
    }

    #[test]
    fn test_session_hours() {
        assert_eq!(at_hour(2), Session::Asia);
        assert_eq!(at_hour(8), Session::London);
        assert_eq!(at_hour(10), Session::London);
        assert_eq!(at_hour(13), Session::LondonNewYorkOverlap);
        assert_eq!(at_hour(16), Session::LondonNewYorkOverlap);
        assert_eq!(at_hour(17), Session::NewYork);
        assert_eq!(at_hour(22), Session::DeadZone);
        assert_eq!(at_hour(23), Session::DeadZone);
    }

    #[test]
    fn test_quality_ordering() {
        assert!(Session::LondonNewYorkOverlap.quality() > Session::London.quality());
        assert!(Session::NewYork.quality() > Session::Asia.quality());
        assert!(Session::Asia.quality() > Session::DeadZone.quality());
    }
}
