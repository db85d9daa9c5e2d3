// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array4};
use tempfile::tempdir;
use vec1::vec1;

use super::*;
use crate::archive::ArchiveHeader;
use crate::pol::{Feed, PolBasis};

fn header(source: &str, frontend: &str, obs_mode: ObsMode) -> ArchiveHeader {
    ArchiveHeader {
        source: source.to_string(),
        frontend: frontend.to_string(),
        obs_mode,
        start_mjd: 56436,
        ra: "14:53:45.71".to_string(),
        dec: "+19:02:12.2".to_string(),
        cal_phase: 0.0,
        cal_duty: 0.25,
        bandwidth_mhz: 100.0,
        centre_freq_mhz: 430.0,
        pol_type: PolBasis::Stokes,
        feed: Feed::Linear,
    }
}

fn write_archive(dir: &Path, name: &str, data: Array4<f64>) {
    let nchan = data.shape()[2];
    let ar = Archive::new(
        header("J1453+1902", "430", ObsMode::Psr),
        data,
        Array1::ones(nchan),
    )
    .unwrap();
    ar.write(&dir.join(name)).unwrap();
}

fn params(data_dir: &Path, out_dir: &Path, subbands: usize, mode: TemplateMode) -> TemplateParams {
    TemplateParams {
        pulsar: "J1453+1902".to_string(),
        frontend: "430".to_string(),
        subbands,
        mode,
        data_dirs: vec1![data_dir.to_path_buf()],
        output_dir: out_dir.to_path_buf(),
    }
}

#[test]
fn artifact_names_are_fixed() {
    assert_eq!(
        Template::artifact_name("J1453+1902", "430", 1, TemplateMode::Frequency),
        "J1453+1902_430_nchan1_template"
    );
    assert_eq!(
        Template::artifact_name("J1453+1902", "lbw", 8, TemplateMode::Time),
        "J1453+1902_lbw_nsubint8_template"
    );
}

#[test]
fn two_unit_files_accumulate_to_two() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_archive(data.path(), "obs_0001.json", Array4::ones((1, 1, 4, 256)));
    write_archive(data.path(), "obs_0002.json", Array4::ones((1, 1, 4, 256)));

    let template = TemplateBuilder::new(params(
        data.path(),
        out.path(),
        4,
        TemplateMode::Frequency,
    ))
    .run()
    .unwrap();

    assert_eq!(template.profile.shape(), &[4, 256]);
    for &v in template.profile.iter() {
        assert_abs_diff_eq!(v, 2.0, epsilon = 1e-12);
    }
    assert!(out.path().join("J1453+1902_430_nchan4_template").exists());
}

#[test]
fn single_subband_template_is_one_dimensional() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_archive(data.path(), "obs_0001.json", Array4::ones((2, 1, 8, 64)));

    let template = TemplateBuilder::new(params(
        data.path(),
        out.path(),
        1,
        TemplateMode::Frequency,
    ))
    .run()
    .unwrap();
    assert_eq!(template.profile.shape(), &[64]);
}

#[test]
fn time_mode_bins_subintegrations() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    let mut cube = Array4::zeros((4, 1, 2, 32));
    for s in 0..4 {
        cube.index_axis_mut(ndarray::Axis(0), s).fill(s as f64);
    }
    write_archive(data.path(), "obs_0001.json", cube);

    let template =
        TemplateBuilder::new(params(data.path(), out.path(), 2, TemplateMode::Time))
            .run()
            .unwrap();
    assert_eq!(template.profile.shape(), &[2, 32]);
    // First epoch bin averages subints 0 and 1, second 2 and 3.
    assert_abs_diff_eq!(template.profile[[0, 0]], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(template.profile[[1, 0]], 2.5, epsilon = 1e-12);
}

#[test]
fn accumulation_is_order_independent() {
    let profiles = [
        Array4::from_elem((1, 1, 2, 16), 1.0),
        Array4::from_elem((1, 1, 2, 16), 3.0),
        Array4::from_elem((1, 1, 2, 16), 7.0),
    ];

    // Same three cubes, assigned to filenames in two different orders.
    let data_a = tempdir().unwrap();
    let out_a = tempdir().unwrap();
    for (i, p) in profiles.iter().enumerate() {
        write_archive(data_a.path(), &format!("obs_000{}.json", i + 1), p.clone());
    }
    let data_b = tempdir().unwrap();
    let out_b = tempdir().unwrap();
    write_archive(data_b.path(), "obs_0001.json", profiles[2].clone());
    write_archive(data_b.path(), "obs_0002.json", profiles[0].clone());
    write_archive(data_b.path(), "obs_0003.json", profiles[1].clone());

    let a = TemplateBuilder::new(params(data_a.path(), out_a.path(), 2, TemplateMode::Frequency))
        .run()
        .unwrap();
    let b = TemplateBuilder::new(params(data_b.path(), out_b.path(), 2, TemplateMode::Frequency))
        .run()
        .unwrap();
    for (x, y) in a.profile.iter().zip(b.profile.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-12);
    }
}

#[test]
fn non_qualifying_files_are_skipped() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_archive(data.path(), "obs_0001.json", Array4::ones((1, 1, 2, 32)));

    // Wrong source.
    let wrong_src = Archive::new(
        header("J0000+0000", "430", ObsMode::Psr),
        Array4::ones((1, 1, 2, 32)),
        Array1::ones(2),
    )
    .unwrap();
    wrong_src.write(&data.path().join("obs_0002.json")).unwrap();

    // Cal scan of the right source.
    let cal = Archive::new(
        header("J1453+1902", "430", ObsMode::Cal),
        Array4::ones((1, 1, 2, 32)),
        Array1::ones(2),
    )
    .unwrap();
    cal.write(&data.path().join("obs_0003.json")).unwrap();

    let template = TemplateBuilder::new(params(
        data.path(),
        out.path(),
        1,
        TemplateMode::Frequency,
    ))
    .run()
    .unwrap();
    // Only the qualifying file contributed.
    for &v in template.profile.iter() {
        assert_abs_diff_eq!(v, 1.0, epsilon = 1e-12);
    }
}

#[test]
fn rerunning_does_not_double_count() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_archive(data.path(), "obs_0001.json", Array4::ones((1, 1, 2, 32)));

    let p = params(data.path(), out.path(), 2, TemplateMode::Frequency);
    let first = TemplateBuilder::new(p.clone()).run().unwrap();
    let second = TemplateBuilder::new(p).run().unwrap();
    assert_eq!(first.profile, second.profile);
}

#[test]
fn mismatched_profile_shapes_are_an_error() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_archive(data.path(), "obs_0001.json", Array4::ones((1, 1, 4, 64)));
    write_archive(data.path(), "obs_0002.json", Array4::ones((1, 1, 4, 128)));

    let result = TemplateBuilder::new(params(
        data.path(),
        out.path(),
        1,
        TemplateMode::Frequency,
    ))
    .run();
    assert!(matches!(result, Err(TemplateError::ShapeMismatch { .. })));
}

#[test]
fn no_qualifying_files_is_an_error() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    let result = TemplateBuilder::new(params(
        data.path(),
        out.path(),
        1,
        TemplateMode::Frequency,
    ))
    .run();
    assert!(matches!(result, Err(TemplateError::NoQualifyingFiles { .. })));
}
