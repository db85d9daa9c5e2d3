// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ndarray::{Array1, Array4};
use tempfile::tempdir;
use vec1::vec1;

use super::*;
use crate::archive::ArchiveHeader;
use crate::pol::{Feed, PolBasis};

const NBIN: usize = 512;

fn header(obs_mode: ObsMode) -> ArchiveHeader {
    ArchiveHeader {
        source: "J1453+1902".to_string(),
        frontend: "430".to_string(),
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

/// A single-subint, single-pol archive whose channels have the given RMS
/// amplitudes (bins alternate +amp / -amp).
fn noisy_archive(amps: &[f64], obs_mode: ObsMode) -> Archive {
    let nchan = amps.len();
    let mut data = Array4::zeros((1, 1, nchan, NBIN));
    for (c, &amp) in amps.iter().enumerate() {
        for b in 0..NBIN {
            data[[0, 0, c, b]] = if b % 2 == 0 { amp } else { -amp };
        }
    }
    Archive::new(header(obs_mode), data, Array1::ones(nchan)).unwrap()
}

/// A trivial single-channel template with a pulse at the start.
fn write_template(dir: &Path) {
    let mut profile = Array1::zeros(NBIN);
    for b in 0..50 {
        profile[b] = 100.0;
    }
    let template = Template {
        pulsar: "J1453+1902".to_string(),
        frontend: "430".to_string(),
        subbands: 1,
        mode: TemplateMode::Frequency,
        profile: profile.into_dyn(),
    };
    template.write(dir).unwrap();
}

fn params(data_dir: &Path, template_dir: &Path, output_dir: &Path) -> ExcisionParams {
    ExcisionParams {
        pulsar: "J1453+1902".to_string(),
        data_dirs: vec1![data_dir.to_path_buf()],
        template_dir: template_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        strategy: ExcisionStrategy::SigmaClip,
        iterations: 2,
        sigma_threshold: DEFAULT_SIGMA_THRESHOLD,
        epoch_average: false,
        protect_cal_region: false,
        build_missing_templates: false,
    }
}

#[test]
fn obs_number_prefers_trailing_digits() {
    assert_eq!(obs_number("puppi_57747_J1453+1902_0007"), "0007");
    assert_eq!(obs_number("J1453+1902_0123"), "0123");
    // No trailing digit group: last four characters.
    assert_eq!(obs_number("archive"), "hive");
}

#[test]
fn loud_channel_is_zapped_and_output_named_by_convention() {
    let data = tempdir().unwrap();
    let templates = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_template(templates.path());

    // Seven quiet channels and one at 500x the population.
    let amps = [2.0, 2.0, 2.0, 1000.0, 2.0, 2.0, 2.0, 2.0];
    noisy_archive(&amps, ObsMode::Psr)
        .write(&data.path().join("J1453+1902_0007.json"))
        .unwrap();

    let report = ExcisionEngine::new(params(data.path(), templates.path(), out.path()))
        .run()
        .unwrap();
    assert_eq!(report.excised, 1);

    let output = out.path().join("J1453+1902_56436_430_0007.json");
    assert!(output.exists());
    let excised = Archive::load(&output).unwrap();
    for (c, &w) in excised.weights().iter().enumerate() {
        if c == 3 {
            assert_eq!(w, 0.0);
        } else {
            assert_eq!(w, 1.0);
        }
    }
}

#[test]
fn cal_region_guard_protects_low_channels() {
    let data = tempdir().unwrap();
    let templates = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_template(templates.path());

    let amps = [2.0, 1000.0, 2.0, 2.0, 2.0, 1000.0, 2.0, 2.0];
    let mut archive = noisy_archive(&amps, ObsMode::Psr);
    // cal mid boundary = floor(512 * 0.005) = 2, so channel 1 is protected.
    archive.header.cal_phase = 0.0;
    archive.header.cal_duty = 0.005;
    archive
        .write(&data.path().join("J1453+1902_0001.json"))
        .unwrap();

    let mut p = params(data.path(), templates.path(), out.path());
    p.protect_cal_region = true;
    ExcisionEngine::new(p).run().unwrap();

    let excised =
        Archive::load(&out.path().join("J1453+1902_56436_430_0001.json")).unwrap();
    assert_eq!(excised.weights()[1], 1.0);
    assert_eq!(excised.weights()[5], 0.0);
}

#[test]
fn already_excised_files_are_skipped_on_rerun() {
    let data = tempdir().unwrap();
    let templates = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_template(templates.path());
    noisy_archive(&[2.0, 2.0, 2.0, 2.0], ObsMode::Psr)
        .write(&data.path().join("J1453+1902_0001.json"))
        .unwrap();

    let p = params(data.path(), templates.path(), out.path());
    let first = ExcisionEngine::new(p.clone()).run().unwrap();
    assert_eq!(first.excised, 1);
    let second = ExcisionEngine::new(p).run().unwrap();
    assert_eq!(second.excised, 0);
    assert_eq!(second.skipped, 1);
}

#[test]
fn cal_scans_and_other_pulsars_are_skipped() {
    let data = tempdir().unwrap();
    let templates = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_template(templates.path());

    noisy_archive(&[2.0, 2.0], ObsMode::Cal)
        .write(&data.path().join("J1453+1902_0001.json"))
        .unwrap();
    let mut other = noisy_archive(&[2.0, 2.0], ObsMode::Psr);
    other.header.source = "J0000+0000".to_string();
    other
        .write(&data.path().join("J0000+0000_0002.json"))
        .unwrap();

    let report = ExcisionEngine::new(params(data.path(), templates.path(), out.path()))
        .run()
        .unwrap();
    assert_eq!(report.excised, 0);
    assert_eq!(report.skipped, 2);
}

#[test]
fn checkpoint_last_file_mismatch_skips_defensively() {
    let data = tempdir().unwrap();
    let templates = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_template(templates.path());
    noisy_archive(&[2.0, 2.0], ObsMode::Psr)
        .write(&data.path().join("J1453+1902_0001.json"))
        .unwrap();

    // A checkpoint naming a different in-progress file.
    let store = CheckpointStore::new(out.path());
    store
        .write(
            "J1453+1902_excision.checkpoint",
            &ExcisionCheckpoint {
                version: CHECKPOINT_VERSION,
                last_file: Some("J1453+1902_0999.json".to_string()),
                cursor: [0, 0],
                ignore_list: vec![],
            },
        )
        .unwrap();

    let report = ExcisionEngine::new(params(data.path(), templates.path(), out.path()))
        .run()
        .unwrap();
    assert_eq!(report.excised, 0);
    assert_eq!(report.skipped, 1);
}

#[test]
fn missing_template_is_a_descriptive_error() {
    let data = tempdir().unwrap();
    let templates = tempdir().unwrap();
    let out = tempdir().unwrap();
    noisy_archive(&[2.0, 2.0], ObsMode::Psr)
        .write(&data.path().join("J1453+1902_0001.json"))
        .unwrap();

    let result = ExcisionEngine::new(params(data.path(), templates.path(), out.path())).run();
    match result {
        Err(ExcisionError::MissingTemplate { pulsar, frontend, .. }) => {
            assert_eq!(pulsar, "J1453+1902");
            assert_eq!(frontend, "430");
        }
        other => panic!("Expected MissingTemplate, got {other:?}"),
    }
}

#[test]
fn missing_template_can_be_built_on_demand() {
    let data = tempdir().unwrap();
    let templates = tempdir().unwrap();
    let out = tempdir().unwrap();
    noisy_archive(&[2.0, 2.0], ObsMode::Psr)
        .write(&data.path().join("J1453+1902_0001.json"))
        .unwrap();

    let mut p = params(data.path(), templates.path(), out.path());
    p.build_missing_templates = true;
    let report = ExcisionEngine::new(p).run().unwrap();
    assert_eq!(report.excised, 1);
    assert!(templates
        .path()
        .join("J1453+1902_430_nchan1_template")
        .exists());
}

#[test]
fn unimplemented_strategies_fail_loudly() {
    let data = tempdir().unwrap();
    let templates = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_template(templates.path());
    noisy_archive(&[2.0, 2.0], ObsMode::Psr)
        .write(&data.path().join("J1453+1902_0001.json"))
        .unwrap();

    for strategy in [ExcisionStrategy::Bayesian, ExcisionStrategy::NeuralNet] {
        let mut p = params(data.path(), templates.path(), out.path());
        p.strategy = strategy;
        let result = ExcisionEngine::new(p).run();
        assert!(matches!(result, Err(ExcisionError::Unimplemented(s)) if s == strategy));
    }
}

#[test]
fn method_tags_are_stable() {
    assert_eq!(ExcisionStrategy::SigmaClip.method_tag(), 'S');
    assert_eq!(ExcisionStrategy::Bayesian.method_tag(), 'B');
    assert_eq!(ExcisionStrategy::NeuralNet.method_tag(), 'N');
}
