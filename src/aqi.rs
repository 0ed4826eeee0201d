//! Composite air-quality index.
//!
//! This is a bespoke weighted heuristic, not an official AQI standard: each
//! pollutant contributes `(value / limit) * weight` with weights summing to 100,
//! and the total is capped at 100. A single pollutant far over its limit can
//! saturate the score on its own.

use crate::model::{AirQualityIndex, AqiCategory, PollutantKind};

/// Compute the index from current values. `current` must return 0 for
/// missing pollutants.
pub fn air_quality_index(current: impl Fn(PollutantKind) -> f64) -> AirQualityIndex {
    let score: f64 = PollutantKind::ALL
        .iter()
        .map(|kind| current(*kind) / kind.limit() * kind.aqi_weight())
        .sum();

    let value = score.round().clamp(0.0, 100.0) as u8;

    AirQualityIndex {
        value,
        category: category_for(value),
    }
}

/// Category band for an index value.
pub fn category_for(value: u8) -> AqiCategory {
    match value {
        0..=24 => AqiCategory::Good,
        25..=49 => AqiCategory::Regular,
        50..=74 => AqiCategory::Poor,
        _ => AqiCategory::VeryPoor,
    }
}
