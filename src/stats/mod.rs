// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Outlier-resistant statistics used by the excision and calibration engines.
//!
//! All functions here are pure and NaN-aware; NaNs are ignored rather than
//! propagated. `iqr_trimmed_mean_std` goes quietly to NaN when every value is
//! trimmed away, so callers must check.


use ndarray::prelude::*;
use thiserror::Error;

/// The constant relating the median absolute deviation to the standard
/// deviation of a normal distribution.
const MZS_SCALE: f64 = 0.6745;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Input must be a 1D vector, but it has {0} dimensions")]
    NotOneDimensional(usize),
}

/// sqrt(mean(x²)) over the supplied values. NaN for an empty slice.
pub fn root_mean_square(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let sum_sq: f64 = values.iter().map(|v| v * v).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// Linearly-interpolated percentile over ascendingly-sorted, finite values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// The mean and (population) standard deviation of `values` after discarding
/// IQR outliers.
///
/// The outlier bounds are [Q1 − k·IQR, Q3 + k·IQR] with k = `tolerance`; NaNs
/// are always discarded. If nothing survives the trim, both returned values
/// are NaN.
pub fn iqr_trimmed_mean_std(values: &[f64], tolerance: f64) -> (f64, f64) {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    finite.sort_unstable_by(|a, b| a.total_cmp(b));

    let q1 = percentile(&finite, 25.0);
    let q3 = percentile(&finite, 75.0);
    let excess = tolerance * (q3 - q1);
    let (lower, upper) = (q1 - excess, q3 + excess);

    let kept: Vec<f64> = finite
        .iter()
        .copied()
        .filter(|&v| v >= lower && v <= upper)
        .collect();
    if kept.is_empty() {
        return (f64::NAN, f64::NAN);
    }

    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    let var = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / kept.len() as f64;
    (mean, var.sqrt())
}

/// A rejection mask following the Chauvenet criterion: true where
/// |x − mean| > threshold·stddev.
pub fn chauvenet(values: ArrayViewD<f64>, mean: f64, stddev: f64, threshold: f64) -> ArrayD<bool> {
    values.mapv(|v| (v - mean).abs() > threshold * stddev)
}

/// NaN-aware median. NaN if no finite values are present.
fn nan_median(values: &[f64]) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = finite.len();
    if n % 2 == 1 {
        finite[n / 2]
    } else {
        (finite[n / 2 - 1] + finite[n / 2]) / 2.0
    }
}

/// A rejection mask from the modified Z-score with a two-sided ("double")
/// median absolute deviation, which copes with skewed distributions better
/// than a single MAD.
///
/// Only 1-D input is accepted. Values exactly equal to the median always
/// score 0 and are never flagged.
pub fn double_mad(vector: ArrayViewD<f64>, threshold: f64) -> Result<Array1<bool>, StatsError> {
    if vector.ndim() != 1 {
        return Err(StatsError::NotOneDimensional(vector.ndim()));
    }
    let values: Vec<f64> = vector.iter().copied().collect();
    let m = nan_median(&values);

    let abs_dev: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    let left: Vec<f64> = values
        .iter()
        .zip(abs_dev.iter())
        .filter(|(v, _)| **v <= m)
        .map(|(_, d)| *d)
        .collect();
    let right: Vec<f64> = values
        .iter()
        .zip(abs_dev.iter())
        .filter(|(v, _)| **v >= m)
        .map(|(_, d)| *d)
        .collect();
    let left_mad = nan_median(&left);
    let right_mad = nan_median(&right);

    let mask = values
        .iter()
        .zip(abs_dev)
        .map(|(&v, dev)| {
            if v == m {
                return false;
            }
            let mad = if v > m { right_mad } else { left_mad };
            let mzs = MZS_SCALE * dev / mad;
            mzs > threshold
        })
        .collect();
    Ok(mask)
}
