//! Snapshot assembly for one update cycle.
//!
//! Runs every pollutant through the trend and forecast steps, then derives
//! the global alert, the composite index and the recommendations. Everything
//! here is pure: the same readings and evaluation time always produce the
//! same snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::alert::{classify, nearest_breach};
use crate::aqi::air_quality_index;
use crate::forecast::forecast_series;
use crate::model::{PollutantKind, RawReadings, Snapshot};
use crate::recommendation::derive_recommendations;

/// Build the snapshot for a set of readings.
///
/// # Arguments
///
/// * `raw` - Readings from one ingestion, index 0 being the current value
/// * `now` - Evaluation time; breach times are projected from here
/// * `location` - Name of the location the readings belong to
///
/// # Returns
///
/// A fully populated `Snapshot`. Missing pollutants count as 0 and missing
/// humidity as 50.
pub fn build_snapshot(raw: &RawReadings, now: DateTime<Utc>, location: Option<&str>) -> Snapshot {
    let mut forecasts = BTreeMap::new();
    let mut breaches = Vec::new();

    for kind in PollutantKind::ALL {
        let Some(series) = raw.series(kind) else {
            continue;
        };
        let Some(result) = forecast_series(series, kind.limit(), now) else {
            continue;
        };
        if let Some(hours) = result.raw_hours {
            breaches.push((kind, hours));
        }
        forecasts.insert(kind, result.forecast);
    }

    let alert = classify(nearest_breach(breaches), now);

    let current_values: BTreeMap<PollutantKind, f64> = PollutantKind::ALL
        .iter()
        .map(|kind| (*kind, raw.current(*kind)))
        .collect();
    let current_humidity = raw.current_humidity();

    let aqi = air_quality_index(|kind| raw.current(kind));
    let recommendations = derive_recommendations(|kind| raw.current(kind), current_humidity, alert.level);

    Snapshot {
        timestamp: now,
        alert_level: alert.level,
        time_category: alert.level.time_category(),
        alert_message: alert.message,
        critical_pollutant: alert.critical_pollutant,
        time_to_peak: alert.time_to_peak,
        aqi,
        current_values,
        current_humidity,
        forecasts,
        recommendations,
        location: location.map(str::to_string),
        error: None,
    }
}
