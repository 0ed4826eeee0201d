//! Safety recommendations derived from current readings.
//!
//! Each flag is an independent rule; several can trip at once.

use crate::model::{AlertLevel, HUMIDITY_MAX, HUMIDITY_MIN, PollutantKind, Recommendations};

/// PM2.5 level above which an air purifier should run.
const PURIFIER_PM25: f64 = 35.0;

/// O3 level above which an air purifier should run.
const PURIFIER_O3: f64 = 70.0;

/// PM2.5 level above which masks are advised.
const MASK_PM25: f64 = 55.0;

/// Derive the action flags. `current` must return 0 for missing pollutants.
pub fn derive_recommendations(
    current: impl Fn(PollutantKind) -> f64,
    humidity: f64,
    level: AlertLevel,
) -> Recommendations {
    let pm25 = current(PollutantKind::Pm25);
    let no2 = current(PollutantKind::No2);
    let o3 = current(PollutantKind::O3);
    let co = current(PollutantKind::Co);

    let humidity_out_of_range = !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&humidity);

    Recommendations {
        close_windows: pm25 > PollutantKind::Pm25.limit() || no2 > PollutantKind::No2.limit(),
        run_purifier: pm25 > PURIFIER_PM25 || o3 > PURIFIER_O3,
        wear_masks: pm25 > MASK_PM25 || co > PollutantKind::Co.limit(),
        manage_humidity: humidity_out_of_range || level.is_severe(),
    }
}
