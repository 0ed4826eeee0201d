//! Alert classification from the nearest forecast breach.

use chrono::{DateTime, Utc};

use crate::forecast::breach_time;
use crate::model::{AlertLevel, PollutantKind, TimeToPeak};

/// The pollutant closest to breaching its limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriticalBreach {
    pub pollutant: PollutantKind,
    pub hours: f64,
}

/// Classified alert for a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub critical_pollutant: Option<PollutantKind>,
    pub time_to_peak: TimeToPeak,
}

/// Pick the minimum breach time from forecasts given in evaluation order.
///
/// Ties keep the earlier pollutant: a later one must be strictly sooner.
pub fn nearest_breach<I>(forecasts: I) -> Option<CriticalBreach>
where
    I: IntoIterator<Item = (PollutantKind, f64)>,
{
    forecasts
        .into_iter()
        .fold(None, |best: Option<CriticalBreach>, (pollutant, hours)| match best {
            Some(b) if hours >= b.hours => Some(b),
            _ => Some(CriticalBreach { pollutant, hours }),
        })
}

/// Map a breach time to its alert level.
pub fn level_for_hours(hours: f64) -> AlertLevel {
    if hours <= 3.0 {
        AlertLevel::Critical
    } else if hours <= 6.0 {
        AlertLevel::High
    } else if hours <= 12.0 {
        AlertLevel::Moderate
    } else {
        AlertLevel::Low
    }
}

/// Classify the nearest breach into a level, message and time-to-peak.
pub fn classify(breach: Option<CriticalBreach>, now: DateTime<Utc>) -> Alert {
    let Some(CriticalBreach { pollutant, hours }) = breach else {
        return Alert {
            level: AlertLevel::Good,
            message: "Air quality within acceptable levels".to_string(),
            critical_pollutant: None,
            time_to_peak: TimeToPeak::default(),
        };
    };

    let level = level_for_hours(hours);
    let rounded = hours.round();
    let message = match level {
        AlertLevel::Critical => format!(
            "ATTENTION: {} will reach a critical level in less than 3 hours!",
            pollutant
        ),
        AlertLevel::High => format!(
            "ALERT: {} will reach a critical level in {} hours",
            pollutant, rounded
        ),
        AlertLevel::Moderate => format!(
            "Attention: {} may reach a critical level in {} hours",
            pollutant, rounded
        ),
        _ => format!("{} is trending upward but still safe", pollutant),
    };

    Alert {
        level,
        message,
        critical_pollutant: Some(pollutant),
        time_to_peak: time_to_peak(hours, now),
    }
}

/// Split hours into whole hours and minutes, rounding once on total minutes
/// so 2.999h reads as 3h 0m.
fn time_to_peak(hours: f64, now: DateTime<Utc>) -> TimeToPeak {
    let total_minutes = (hours * 60.0).round().clamp(0.0, u32::MAX as f64 * 60.0);
    let whole_hours = (total_minutes / 60.0).floor();
    TimeToPeak {
        hours: Some(whole_hours as u32),
        minutes: Some((total_minutes - whole_hours * 60.0) as u32),
        eta: breach_time(now, hours),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ladder() {
        assert_eq!(level_for_hours(0.0), AlertLevel::Critical);
        assert_eq!(level_for_hours(3.0), AlertLevel::Critical);
        assert_eq!(level_for_hours(3.01), AlertLevel::High);
        assert_eq!(level_for_hours(6.0), AlertLevel::High);
        assert_eq!(level_for_hours(12.0), AlertLevel::Moderate);
        assert_eq!(level_for_hours(12.5), AlertLevel::Low);
    }

    #[test]
    fn test_level_is_monotonic() {
        let mut previous = level_for_hours(100.0).rank();
        let mut hours = 100.0;
        while hours >= 0.0 {
            let rank = level_for_hours(hours).rank();
            assert!(rank >= previous, "rank dropped at {hours}h");
            previous = rank;
            hours -= 0.25;
        }
        assert!(AlertLevel::Good.rank() < AlertLevel::Low.rank());
    }

    #[test]
    fn test_nearest_breach_tie_keeps_first() {
        let breach = nearest_breach([
            (PollutantKind::No2, 4.0),
            (PollutantKind::O3, 4.0),
            (PollutantKind::Co, 9.0),
        ])
        .unwrap();
        assert_eq!(breach.pollutant, PollutantKind::No2);
    }

    #[test]
    fn test_nearest_breach_picks_minimum() {
        let breach = nearest_breach([(PollutantKind::Pm25, 8.0), (PollutantKind::O3, 5.0)]).unwrap();
        assert_eq!(breach.pollutant, PollutantKind::O3);
        assert_eq!(breach.hours, 5.0);
        assert!(nearest_breach(Vec::new()).is_none());
    }

    #[test]
    fn test_good_without_breach() {
        let alert = classify(None, Utc::now());
        assert_eq!(alert.level, AlertLevel::Good);
        assert_eq!(alert.critical_pollutant, None);
        assert_eq!(alert.time_to_peak, TimeToPeak::default());
    }

    #[test]
    fn test_critical_message_names_pollutant() {
        let alert = classify(
            Some(CriticalBreach {
                pollutant: PollutantKind::No2,
                hours: 2.0,
            }),
            Utc::now(),
        );
        assert_eq!(alert.level, AlertLevel::Critical);
        assert!(alert.message.contains("NO2"));
        assert_eq!(alert.time_to_peak.hours, Some(2));
        assert_eq!(alert.time_to_peak.minutes, Some(0));
    }

    #[test]
    fn test_time_to_peak_split() {
        let now = Utc::now();
        let alert = classify(
            Some(CriticalBreach {
                pollutant: PollutantKind::Pm25,
                hours: 7.5,
            }),
            now,
        );
        assert_eq!(alert.level, AlertLevel::Moderate);
        assert_eq!(alert.message, "Attention: PM25 may reach a critical level in 8 hours");
        assert_eq!(alert.time_to_peak.hours, Some(7));
        assert_eq!(alert.time_to_peak.minutes, Some(30));
        assert_eq!(alert.time_to_peak.eta, Some(now + chrono::Duration::minutes(450)));
    }

    #[test]
    fn test_low_message() {
        let alert = classify(
            Some(CriticalBreach {
                pollutant: PollutantKind::Co,
                hours: 20.0,
            }),
            Utc::now(),
        );
        assert_eq!(alert.level, AlertLevel::Low);
        assert_eq!(alert.message, "CO is trending upward but still safe");
    }

    #[test]
    fn test_minutes_carry_into_hours() {
        let alert = classify(
            Some(CriticalBreach {
                pollutant: PollutantKind::O3,
                hours: 2.999,
            }),
            Utc::now(),
        );
        assert_eq!(alert.time_to_peak.hours, Some(3));
        assert_eq!(alert.time_to_peak.minutes, Some(0));
    }

    #[test]
    fn test_distant_breach_has_no_eta() {
        let alert = classify(
            Some(CriticalBreach {
                pollutant: PollutantKind::Pm25,
                hours: 5e12,
            }),
            Utc::now(),
        );
        assert_eq!(alert.level, AlertLevel::Low);
        assert_eq!(alert.time_to_peak.hours, Some(u32::MAX));
        assert_eq!(alert.time_to_peak.eta, None);
    }
}
