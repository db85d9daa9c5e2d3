// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pulse-profile analysis: locating the off-pulse baseline, per-channel RMS,
//! and the phase windows occupied by the noise-diode cal signal.

#[cfg(test)]
mod tests;

use ndarray::{Array1, ArrayD, ArrayViewD, Axis};
use thiserror::Error;

use crate::stats::{iqr_trimmed_mean_std, root_mean_square};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Expected a 1-D profile, but the data has {0} dimensions")]
    NotOneDimensional(usize),

    #[error("The off-pulse window ({window} bins) does not fit in the profile ({nbin} bins)")]
    WindowTooLarge { window: usize, nbin: usize },

    #[error("The off-pulse mask has {mask} bins but the data has {nbin}")]
    MaskMismatch { mask: usize, nbin: usize },

    #[error("Data with {0} dimensions is not supported; expected 1 to 4")]
    UnsupportedRank(usize),
}

/// Phase-bin boundaries of the cal signal's low and high states. `start..mid`
/// is the low (diode off) region, `mid..end` the high (diode on) region. `end`
/// is deliberately not clamped to the bin count; callers clamp where needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalWindows {
    pub start: usize,
    pub mid: usize,
    pub end: usize,
}

/// Compute the cal windows from the header's phase of the cal start
/// (`start_duty`) and its duty cycle (`duty`), both as fractions of a turn.
pub fn cal_windows(nbin: usize, start_duty: f64, duty: f64) -> CalWindows {
    let n = nbin as f64;
    let start = (n * start_duty).floor() as usize;
    let mid = (n * (start_duty + duty)).floor() as usize;
    let end = mid + (n * duty).floor() as usize;
    CalWindows { start, mid, end }
}

/// Find the off-pulse region of a 1-D profile: the cyclic window of
/// `window_size` bins with the smallest mean. Returns a mask over the bins
/// where `false` marks the off-pulse baseline and `true` everything else.
pub fn off_pulse_mask(
    profile: ArrayViewD<f64>,
    window_size: usize,
) -> Result<Array1<bool>, ProfileError> {
    if profile.ndim() != 1 {
        return Err(ProfileError::NotOneDimensional(profile.ndim()));
    }
    let nbin = profile.len();
    if window_size == 0 || window_size > nbin {
        return Err(ProfileError::WindowTooLarge {
            window: window_size,
            nbin,
        });
    }
    let values: Vec<f64> = profile.iter().copied().collect();

    // Rolling cyclic sum; the first window seeds it.
    let mut sum: f64 = values[..window_size].iter().sum();
    let mut best_sum = sum;
    let mut best_start = 0;
    for start in 1..nbin {
        sum -= values[start - 1];
        sum += values[(start + window_size - 1) % nbin];
        if sum < best_sum {
            best_sum = sum;
            best_start = start;
        }
    }

    let mut mask = Array1::from_elem(nbin, true);
    for i in 0..window_size {
        mask[(best_start + i) % nbin] = false;
    }
    Ok(mask)
}

/// RMS over the off-pulse bins of every profile in `data`, where the last
/// axis is pulse phase. The result has one dimension fewer than the input;
/// a 1-D profile yields a 0-D array.
pub fn channel_rms(
    data: ArrayViewD<f64>,
    off_pulse: &Array1<bool>,
) -> Result<ArrayD<f64>, ProfileError> {
    let ndim = data.ndim();
    if !(1..=4).contains(&ndim) {
        return Err(ProfileError::UnsupportedRank(ndim));
    }
    let nbin = data.shape()[ndim - 1];
    if off_pulse.len() != nbin {
        return Err(ProfileError::MaskMismatch {
            mask: off_pulse.len(),
            nbin,
        });
    }

    let result_shape: Vec<usize> = data.shape()[..ndim - 1].to_vec();
    let rms: Vec<f64> = data
        .lanes(Axis(ndim - 1))
        .into_iter()
        .map(|lane| {
            let baseline: Vec<f64> = lane
                .iter()
                .zip(off_pulse.iter())
                .filter(|(_, &on)| !on)
                .map(|(&v, _)| v)
                .collect();
            root_mean_square(&baseline)
        })
        .collect();
    // The lanes iterate in the same row-major order the shape implies.
    Ok(ArrayD::from_shape_vec(result_shape, rms).unwrap())
}

/// Per-channel RMS values together with their robust mean and standard
/// deviation over the whole data set.
#[derive(Debug, Clone)]
pub struct RmsStats {
    /// Off-pulse RMS per profile; one dimension fewer than the input data.
    pub rms: ArrayD<f64>,
    /// The same values flattened, in row-major order.
    pub flat: Array1<f64>,
    /// IQR-trimmed mean of the flattened RMS values.
    pub mean: f64,
    /// IQR-trimmed standard deviation of the flattened RMS values.
    pub std: f64,
}

/// Compute the off-pulse RMS of every profile in `data` and summarise the
/// population with an IQR-trimmed mean and standard deviation.
pub fn rms_statistics(
    data: ArrayViewD<f64>,
    off_pulse: &Array1<bool>,
    tolerance: f64,
) -> Result<RmsStats, ProfileError> {
    let rms = channel_rms(data, off_pulse)?;
    let flat = Array1::from_iter(rms.iter().copied());
    let (mean, std) = iqr_trimmed_mean_std(flat.as_slice().unwrap(), tolerance);
    Ok(RmsStats {
        rms,
        flat,
        mean,
        std,
    })
}
