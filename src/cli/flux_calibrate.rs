// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use clap::Parser;
use lazy_static::lazy_static;
use log::info;
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use super::PsrfluxError;
use crate::fluxcal::{
    FluxCalParams, FluxCalibrator, DEFAULT_ANGULAR_TOLERANCE_ARCMIN, DEFAULT_CAL_GAIN,
    DEFAULT_EPOCH_TOLERANCE_DAYS,
};

pub(super) const DEFAULT_OUTPUT_DIR: &str = "data";

lazy_static! {
    static ref GAIN_HELP: String =
        format!("The cal-signal gain used when deriving Jy per count. Default: {DEFAULT_CAL_GAIN}");
    static ref EPOCH_TOL_HELP: String = format!(
        "Use a calibrator pair up to this many days from the science epoch. Default: {DEFAULT_EPOCH_TOLERANCE_DAYS}"
    );
    static ref ANGULAR_TOL_HELP: String = format!(
        "A calibrator scan within this many arcminutes of the continuum source is ON-source. Default: {DEFAULT_ANGULAR_TOLERANCE_ARCMIN}"
    );
    static ref OUTPUT_DIR_HELP: String =
        format!("The directory to write calibrated archives to. Default: {DEFAULT_OUTPUT_DIR}");
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub struct FluxCalibrateArgs {
    /// The pulsar name as it appears in the archives' SRC_NAME field.
    #[clap(name = "PULSAR")]
    pulsar: Option<String>,

    /// The continuum source name as it appears in the flux catalogue, e.g.
    /// B1442.
    #[clap(short = 's', long)]
    continuum_source: Option<String>,

    /// Directories to search for science and pulsar-cal archives.
    #[clap(short, long, multiple_values(true), help_heading = "INPUT FILES")]
    data_dirs: Vec<PathBuf>,

    /// The directory of continuum calibrator scans.
    #[clap(short = 'C', long, help_heading = "INPUT FILES")]
    continuum_dir: Option<PathBuf>,

    /// The flux catalogue file.
    #[clap(short = 'F', long, help_heading = "INPUT FILES")]
    catalogue: Option<PathBuf>,

    #[clap(short, long, help = OUTPUT_DIR_HELP.as_str(), help_heading = "OUTPUT FILES")]
    output_dir: Option<PathBuf>,

    #[clap(short, long, help = GAIN_HELP.as_str(), help_heading = "CALIBRATION")]
    gain: Option<f64>,

    #[clap(long, help = EPOCH_TOL_HELP.as_str(), help_heading = "CALIBRATION")]
    epoch_tolerance: Option<f64>,

    #[clap(long, help = ANGULAR_TOL_HELP.as_str(), help_heading = "CALIBRATION")]
    angular_tolerance: Option<f64>,

    /// Skip science files with no usable calibration instead of writing them
    /// through uncalibrated.
    #[clap(long, help_heading = "CALIBRATION")]
    #[serde(default)]
    skip_uncalibrated: bool,
}

impl FluxCalibrateArgs {
    fn into_params(self) -> Result<FluxCalParams, PsrfluxError> {
        let FluxCalibrateArgs {
            pulsar,
            continuum_source,
            data_dirs,
            continuum_dir,
            catalogue,
            output_dir,
            gain,
            epoch_tolerance,
            angular_tolerance,
            skip_uncalibrated,
        } = self;
        Ok(FluxCalParams {
            pulsar: pulsar.ok_or(PsrfluxError::NoPulsar)?,
            continuum_source: continuum_source.ok_or(PsrfluxError::NoContinuumSource)?,
            data_dirs: Vec1::try_from_vec(data_dirs).map_err(|_| PsrfluxError::NoDataDirs)?,
            continuum_dir: continuum_dir.ok_or(PsrfluxError::NoContinuumDir)?,
            catalogue: catalogue.ok_or(PsrfluxError::NoCatalogue)?,
            output_dir: output_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            gain: gain.unwrap_or(DEFAULT_CAL_GAIN),
            epoch_tolerance_days: epoch_tolerance.unwrap_or(DEFAULT_EPOCH_TOLERANCE_DAYS),
            angular_tolerance_arcmin: angular_tolerance.unwrap_or(DEFAULT_ANGULAR_TOLERANCE_ARCMIN),
            skip_uncalibrated,
        })
    }

    pub fn run(self, dry_run: bool) -> Result<(), PsrfluxError> {
        let params = self.into_params()?;
        info!(
            "Flux calibrating {} against {} (gain {}, epoch tolerance {} day(s))",
            params.pulsar, params.continuum_source, params.gain, params.epoch_tolerance_days
        );
        if dry_run {
            info!("Dry run -- quitting.");
            return Ok(());
        }

        FluxCalibrator::new(params).run()?;
        Ok(())
    }
}
