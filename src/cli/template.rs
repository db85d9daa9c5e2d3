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
use crate::template::{Template, TemplateBuilder, TemplateMode, TemplateParams};

pub(super) const DEFAULT_SUBBANDS: usize = 1;
pub(super) const DEFAULT_OUTPUT_DIR: &str = "templates";

lazy_static! {
    static ref SUBBANDS_HELP: String =
        format!("The number of sub-bands the template resolves. Default: {DEFAULT_SUBBANDS}");
    static ref MODE_HELP: String = format!(
        "Whether sub-bands are frequency bins or epoch bins ('frequency' or 'time'). Default: {}",
        TemplateMode::Frequency
    );
    static ref OUTPUT_DIR_HELP: String =
        format!("The directory to write the template to. Default: {DEFAULT_OUTPUT_DIR}");
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateArgs {
    /// The pulsar name as it appears in the archives' SRC_NAME field, e.g.
    /// J1453+1902.
    #[clap(name = "PULSAR")]
    pulsar: Option<String>,

    /// The receiver name as it appears in the archives' FRONTEND field.
    #[clap(short = 'b', long)]
    frontend: Option<String>,

    /// Directories to search for input archives.
    #[clap(short, long, multiple_values(true), help_heading = "INPUT FILES")]
    data_dirs: Vec<PathBuf>,

    #[clap(short = 'n', long, help = SUBBANDS_HELP.as_str())]
    subbands: Option<usize>,

    #[clap(short, long, help = MODE_HELP.as_str())]
    mode: Option<String>,

    #[clap(short, long, help = OUTPUT_DIR_HELP.as_str(), help_heading = "OUTPUT FILES")]
    output_dir: Option<PathBuf>,
}

impl TemplateArgs {
    fn into_params(self) -> Result<TemplateParams, PsrfluxError> {
        let TemplateArgs {
            pulsar,
            frontend,
            data_dirs,
            subbands,
            mode,
            output_dir,
        } = self;
        let mode = match mode {
            None => TemplateMode::Frequency,
            Some(s) => TemplateMode::from_str(&s)
                .map_err(|_| PsrfluxError::UnknownTemplateMode(s))?,
        };
        Ok(TemplateParams {
            pulsar: pulsar.ok_or(PsrfluxError::NoPulsar)?,
            frontend: frontend.ok_or(PsrfluxError::NoFrontend)?,
            subbands: subbands.unwrap_or(DEFAULT_SUBBANDS),
            mode,
            data_dirs: Vec1::try_from_vec(data_dirs).map_err(|_| PsrfluxError::NoDataDirs)?,
            output_dir: output_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        })
    }

    pub fn run(self, dry_run: bool) -> Result<(), PsrfluxError> {
        let params = self.into_params()?;
        info!(
            "Building a {} {}-sub-band template for {} ({})",
            params.mode, params.subbands, params.pulsar, params.frontend
        );
        if dry_run {
            info!("Dry run -- quitting.");
            return Ok(());
        }

        let template = TemplateBuilder::new(params.clone()).run()?;
        info!(
            "Wrote {}",
            params
                .output_dir
                .join(Template::artifact_name(
                    &template.pulsar,
                    &template.frontend,
                    template.subbands,
                    template.mode,
                ))
                .display()
        );
        Ok(())
    }
}
