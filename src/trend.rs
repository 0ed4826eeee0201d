//! Linear trend estimation over an ordered sample.
//!
//! The sample index is the x-coordinate, so no real timestamps are needed,
//! only a consistent order.

use crate::model::TrendResult;

/// Fit an ordinary least-squares line through `values` against `x = 0..n-1`.
///
/// Returns `None` for fewer than two values or a zero x-variance.
pub fn estimate_trend(values: &[f64]) -> Option<TrendResult> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let y_mean = values.iter().sum::<f64>() / n as f64;
    let x_mean = (n - 1) as f64 / 2.0;

    let (numer, denom) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(numer, denom), (i, y)| {
            let x_diff = i as f64 - x_mean;
            (numer + x_diff * (y - y_mean), denom + x_diff * x_diff)
        });

    if denom == 0.0 {
        return None;
    }

    let slope = numer / denom;
    let intercept = y_mean - slope * x_mean;

    Some(TrendResult { slope, intercept })
}
