// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array2, ArrayD, IxDyn};

use super::*;

#[test]
fn cal_windows_follow_the_header_fractions() {
    // Typical PSRFITS cal header: starts at phase 0.0 with a 25% duty cycle.
    let w = cal_windows(2048, 0.0, 0.25);
    assert_eq!(w, CalWindows { start: 0, mid: 512, end: 1024 });

    let w = cal_windows(1024, 0.5, 0.25);
    assert_eq!(w, CalWindows { start: 512, mid: 768, end: 1024 });
}

#[test]
fn cal_windows_end_can_exceed_nbin() {
    let w = cal_windows(64, 0.75, 0.375);
    assert_eq!(w.start, 48);
    assert_eq!(w.mid, 72);
    assert_eq!(w.end, 96);
}

#[test]
fn off_pulse_mask_finds_the_quiet_window() {
    // Flat baseline with a pulse in bins 10..20.
    let mut profile = Array1::zeros(64);
    for i in 10..20 {
        profile[i] = 50.0;
    }
    let mask = off_pulse_mask(profile.view().into_dyn(), 32).unwrap();
    assert_eq!(mask.iter().filter(|&&on| !on).count(), 32);
    // All pulse bins must be flagged as on-pulse.
    for i in 10..20 {
        assert!(mask[i]);
    }
}

#[test]
fn off_pulse_mask_wraps_around() {
    // Pulse centred on phase 0.5; the quiet window must straddle the ends.
    let mut profile = Array1::zeros(32);
    for i in 8..24 {
        profile[i] = 10.0;
    }
    let mask = off_pulse_mask(profile.view().into_dyn(), 16).unwrap();
    for i in 8..24 {
        assert!(mask[i]);
    }
    for i in (24..32).chain(0..8) {
        assert!(!mask[i]);
    }
}

#[test]
fn off_pulse_mask_rejects_bad_inputs() {
    let two_d = Array2::<f64>::zeros((4, 8));
    assert!(matches!(
        off_pulse_mask(two_d.view().into_dyn(), 4),
        Err(ProfileError::NotOneDimensional(2))
    ));

    let profile = Array1::<f64>::zeros(8);
    assert!(matches!(
        off_pulse_mask(profile.view().into_dyn(), 9),
        Err(ProfileError::WindowTooLarge { window: 9, nbin: 8 })
    ));
}

#[test]
fn channel_rms_over_baseline_bins_only() {
    // Two channels of four bins; the last two bins are on-pulse and must be
    // ignored.
    let data = array![[3.0, -3.0, 100.0, 100.0], [4.0, 4.0, -7.0, 0.0]];
    let mask = array![false, false, true, true];
    let rms = channel_rms(data.view().into_dyn(), &mask).unwrap();
    assert_eq!(rms.shape(), &[2]);
    assert_abs_diff_eq!(rms[IxDyn(&[0])], 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(rms[IxDyn(&[1])], 4.0, epsilon = 1e-12);
}

#[test]
fn channel_rms_reduces_rank_by_one() {
    let data = ArrayD::<f64>::ones(IxDyn(&[2, 4, 3, 8]));
    let mask = Array1::from_elem(8, false);
    let rms = channel_rms(data.view(), &mask).unwrap();
    assert_eq!(rms.shape(), &[2, 4, 3]);
    assert!(rms.iter().all(|&v| (v - 1.0).abs() < 1e-12));
}

#[test]
fn channel_rms_mask_length_must_match() {
    let data = Array2::<f64>::zeros((2, 8));
    let mask = Array1::from_elem(4, false);
    assert!(matches!(
        channel_rms(data.view().into_dyn(), &mask),
        Err(ProfileError::MaskMismatch { mask: 4, nbin: 8 })
    ));
}

#[test]
fn rms_statistics_trims_outlying_channels() {
    // 9 quiet channels and one wildly loud one. The trimmed mean must sit
    // near the quiet population.
    let mut data = Array2::<f64>::zeros((10, 16));
    for (i, mut row) in data.rows_mut().into_iter().enumerate() {
        let amp = if i == 9 { 1000.0 } else { 2.0 };
        for (j, v) in row.iter_mut().enumerate() {
            *v = if j % 2 == 0 { amp } else { -amp };
        }
    }
    let mask = Array1::from_elem(16, false);
    let stats = rms_statistics(data.view().into_dyn(), &mask, 1.5).unwrap();
    assert_eq!(stats.flat.len(), 10);
    assert_abs_diff_eq!(stats.mean, 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(stats.std, 0.0, epsilon = 1e-12);
}
