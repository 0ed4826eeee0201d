//! Threshold forecasting for a single pollutant.
//!
//! Only growth toward a limit is forecast. Falling or flat trends, and rising
//! trends whose projection lies in the past, produce no breach time.

use chrono::{DateTime, Duration, Utc};

use crate::model::{PollutantForecast, PreviewPoint, Sample, TrendDirection, TrendResult};
use crate::trend::estimate_trend;

/// Slope magnitude below which a trend is reported as stable.
const STABLE_BAND: f64 = 0.5;

/// Number of raw samples echoed in a forecast preview.
const PREVIEW_LEN: usize = 6;

/// Classify a slope, treating `±0.5` units per sample as noise.
pub fn classify_trend(slope: f64) -> TrendDirection {
    if slope > STABLE_BAND {
        TrendDirection::Rising
    } else if slope < -STABLE_BAND {
        TrendDirection::Falling
    } else {
        TrendDirection::Stable
    }
}

/// Hours until `current` reaches `limit` along `trend`.
///
/// `None` unless the slope is positive and the breach lies in the future.
pub fn hours_to_breach(current: f64, trend: &TrendResult, limit: f64) -> Option<f64> {
    if trend.slope <= 0.0 {
        return None;
    }
    let hours = (limit - current) / trend.slope;
    (hours >= 0.0).then_some(hours)
}

/// Result of forecasting one series: the public forecast plus the unrounded
/// breach time used for alert ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesForecast {
    pub forecast: PollutantForecast,
    pub raw_hours: Option<f64>,
}

/// Forecast a pollutant series against its limit, relative to `now`.
///
/// Returns `None` for an empty series.
pub fn forecast_series(series: &[Sample], limit: f64, now: DateTime<Utc>) -> Option<SeriesForecast> {
    let current = series.first()?.value;

    let mut forecast = PollutantForecast {
        current_value: current,
        limit,
        trend: None,
        hours_to_breach: None,
        breach_at: None,
        preview: preview(series),
    };

    let values: Vec<f64> = series.iter().map(|s| s.value).collect();
    let Some(trend) = estimate_trend(&values) else {
        return Some(SeriesForecast {
            forecast,
            raw_hours: None,
        });
    };

    forecast.trend = Some(classify_trend(trend.slope));

    let raw_hours = hours_to_breach(current, &trend, limit);
    if let Some(hours) = raw_hours {
        forecast.hours_to_breach = Some(round_tenth(hours));
        forecast.breach_at = breach_time(now, hours);
    }

    Some(SeriesForecast {
        forecast,
        raw_hours,
    })
}

/// `now` plus fractional hours at millisecond precision.
///
/// `None` when the instant is not representable, e.g. a near-flat slope
/// projecting a breach millions of years out.
pub(crate) fn breach_time(now: DateTime<Utc>, hours: f64) -> Option<DateTime<Utc>> {
    let millis = (hours * 3_600_000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    let offset = Duration::try_milliseconds(millis as i64)?;
    now.checked_add_signed(offset)
}

pub(crate) fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn preview(series: &[Sample]) -> Vec<PreviewPoint> {
    series
        .iter()
        .take(PREVIEW_LEN)
        .map(|s| PreviewPoint {
            time: s.timestamp.format("%H:%M").to_string(),
            value: round_tenth(s.value),
        })
        .collect()
}
