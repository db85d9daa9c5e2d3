// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use lazy_static::lazy_static;
use log::info;
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use super::PsrfluxError;
use crate::excision::{
    ExcisionEngine, ExcisionParams, ExcisionStrategy, DEFAULT_ITERATIONS, DEFAULT_SIGMA_THRESHOLD,
};

pub(super) const DEFAULT_TEMPLATE_DIR: &str = "templates";
pub(super) const DEFAULT_OUTPUT_DIR: &str = "data";

lazy_static! {
    static ref STRATEGY_HELP: String = format!(
        "The channel-rejection strategy ('sigma-clip', 'bayesian' or 'neural-net'). Default: {}",
        ExcisionStrategy::SigmaClip
    );
    static ref ITERATIONS_HELP: String = format!(
        "The maximum number of excision rounds per file; fewer run if the channel statistics converge. Default: {DEFAULT_ITERATIONS}"
    );
    static ref SIGMA_HELP: String = format!(
        "Reject a channel when its off-pulse RMS is more than this many sigma from the population mean. Default: {DEFAULT_SIGMA_THRESHOLD}"
    );
    static ref TEMPLATE_DIR_HELP: String =
        format!("The directory holding templates. Default: {DEFAULT_TEMPLATE_DIR}");
    static ref OUTPUT_DIR_HELP: String =
        format!("The directory to write excised archives to. Default: {DEFAULT_OUTPUT_DIR}");
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExciseArgs {
    /// The pulsar name as it appears in the archives' SRC_NAME field.
    #[clap(name = "PULSAR")]
    pulsar: Option<String>,

    /// Directories to search for input archives.
    #[clap(short, long, multiple_values(true), help_heading = "INPUT FILES")]
    data_dirs: Vec<PathBuf>,

    #[clap(short, long, help = TEMPLATE_DIR_HELP.as_str(), help_heading = "INPUT FILES")]
    template_dir: Option<PathBuf>,

    #[clap(short, long, help = OUTPUT_DIR_HELP.as_str(), help_heading = "OUTPUT FILES")]
    output_dir: Option<PathBuf>,

    #[clap(short, long, help = STRATEGY_HELP.as_str(), help_heading = "EXCISION")]
    strategy: Option<String>,

    #[clap(short, long, help = ITERATIONS_HELP.as_str(), help_heading = "EXCISION")]
    iterations: Option<usize>,

    #[clap(long, help = SIGMA_HELP.as_str(), help_heading = "EXCISION")]
    sigma_threshold: Option<f64>,

    /// Collapse each archive's sub-integrations to one before excising.
    #[clap(long, help_heading = "EXCISION")]
    #[serde(default)]
    epoch_average: bool,

    /// Never zero a channel below the cal signal's mid boundary.
    #[clap(long, help_heading = "EXCISION")]
    #[serde(default)]
    protect_cal_region: bool,

    /// Build any missing template on the spot instead of failing.
    #[clap(long)]
    #[serde(default)]
    build_missing_templates: bool,
}

impl ExciseArgs {
    fn into_params(self) -> Result<ExcisionParams, PsrfluxError> {
        let ExciseArgs {
            pulsar,
            data_dirs,
            template_dir,
            output_dir,
            strategy,
            iterations,
            sigma_threshold,
            epoch_average,
            protect_cal_region,
            build_missing_templates,
        } = self;
        let strategy = match strategy {
            None => ExcisionStrategy::SigmaClip,
            Some(s) => {
                ExcisionStrategy::from_str(&s).map_err(|_| PsrfluxError::UnknownStrategy(s))?
            }
        };
        Ok(ExcisionParams {
            pulsar: pulsar.ok_or(PsrfluxError::NoPulsar)?,
            data_dirs: Vec1::try_from_vec(data_dirs).map_err(|_| PsrfluxError::NoDataDirs)?,
            template_dir: template_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR)),
            output_dir: output_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            strategy,
            iterations: iterations.unwrap_or(DEFAULT_ITERATIONS),
            sigma_threshold: sigma_threshold.unwrap_or(DEFAULT_SIGMA_THRESHOLD),
            epoch_average,
            protect_cal_region,
            build_missing_templates,
        })
    }

    pub fn run(self, dry_run: bool) -> Result<(), PsrfluxError> {
        let params = self.into_params()?;
        info!(
            "Excising {} archives with {} (threshold {} sigma, up to {} round(s))",
            params.pulsar, params.strategy, params.sigma_threshold, params.iterations
        );
        if dry_run {
            info!("Dry run -- quitting.");
            return Ok(());
        }

        ExcisionEngine::new(params).run()?;
        Ok(())
    }
}
