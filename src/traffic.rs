//! Time-of-day traffic buffers.
//!
//! Travel durations from non-traffic-aware providers are inflated by a
//! multiplicative factor keyed to the hour of day. The same table serves the
//! ETA calculator and the optimizer's simulated-traffic path.

use chrono::{NaiveTime, Timelike};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficPeriod {
    RushHourMorning,
    RushHourEvening,
    PeakHours,
    LateNight,
    Normal,
}

impl TrafficPeriod {
    pub fn multiplier(self) -> f64 {
        match self {
            TrafficPeriod::RushHourMorning => 1.30,
            TrafficPeriod::RushHourEvening => 1.40,
            TrafficPeriod::PeakHours => 1.15,
            TrafficPeriod::LateNight => 1.00,
            TrafficPeriod::Normal => 1.05,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrafficPeriod::RushHourMorning => "rush_hour_morning",
            TrafficPeriod::RushHourEvening => "rush_hour_evening",
            TrafficPeriod::PeakHours => "peak_hours",
            TrafficPeriod::LateNight => "late_night",
            TrafficPeriod::Normal => "normal",
        }
    }
}

/// Classifies a time of day into its traffic period.
///
/// Late night wins over everything (22:00–06:00), then morning rush
/// (07:00–09:00), evening rush (17:00–19:00), peak (12:00–14:00); all other
/// hours are normal.
pub fn period_at(time: NaiveTime) -> TrafficPeriod {
    let hour = time.hour();
    let minutes = hour * 60 + time.minute();

    if hour >= 22 || hour < 6 {
        return TrafficPeriod::LateNight;
    }
    if (7 * 60..9 * 60).contains(&minutes) {
        return TrafficPeriod::RushHourMorning;
    }
    if (17 * 60..19 * 60).contains(&minutes) {
        return TrafficPeriod::RushHourEvening;
    }
    if (12 * 60..14 * 60).contains(&minutes) {
        return TrafficPeriod::PeakHours;
    }
    TrafficPeriod::Normal
}

/// Applies the buffer for the given time of day to a base duration in seconds.
pub fn buffered_duration(base_seconds: f64, time: NaiveTime) -> f64 {
    base_seconds * period_at(time).multiplier()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn periods_match_table() {
        assert_eq!(period_at(t(8, 30)), TrafficPeriod::RushHourMorning);
        assert_eq!(period_at(t(13, 30)), TrafficPeriod::PeakHours);
        assert_eq!(period_at(t(18, 0)), TrafficPeriod::RushHourEvening);
        assert_eq!(period_at(t(2, 0)), TrafficPeriod::LateNight);
        assert_eq!(period_at(t(23, 15)), TrafficPeriod::LateNight);
        assert_eq!(period_at(t(10, 0)), TrafficPeriod::Normal);
        assert_eq!(period_at(t(15, 0)), TrafficPeriod::Normal);
    }

    #[test]
    fn boundaries_are_half_open() {
        assert_eq!(period_at(t(7, 0)), TrafficPeriod::RushHourMorning);
        assert_eq!(period_at(t(9, 0)), TrafficPeriod::Normal);
        assert_eq!(period_at(t(17, 0)), TrafficPeriod::RushHourEvening);
        assert_eq!(period_at(t(19, 0)), TrafficPeriod::Normal);
        assert_eq!(period_at(t(22, 0)), TrafficPeriod::LateNight);
        assert_eq!(period_at(t(6, 0)), TrafficPeriod::Normal);
    }

    #[test]
    fn buffer_is_exact_multiplication() {
        assert_eq!(buffered_duration(600.0, t(8, 30)), 780.0);
        assert_eq!(buffered_duration(600.0, t(2, 0)), 600.0);
        assert_eq!(buffered_duration(600.0, t(13, 30)), 690.0);
    }
}
