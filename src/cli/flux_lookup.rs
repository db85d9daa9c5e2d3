// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};

use super::PsrfluxError;
use crate::catalogue::Catalogue;

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub struct FluxLookupArgs {
    /// The continuum source name as it appears in the catalogue, e.g.
    /// "J1445+0958".
    #[clap(name = "SOURCE")]
    source: Option<String>,

    /// The frequency to evaluate the model at [GHz].
    #[clap(short, long)]
    freq: Option<f64>,

    /// The flux catalogue file.
    #[clap(short = 'F', long)]
    catalogue: Option<PathBuf>,

    /// Also report the model flux at these frequencies [GHz], with the
    /// percentage difference from the flux at --freq.
    #[clap(short, long, multiple_values(true))]
    compare: Vec<f64>,
}

impl FluxLookupArgs {
    pub fn run(self) -> Result<(), PsrfluxError> {
        let FluxLookupArgs {
            source,
            freq,
            catalogue,
            compare,
        } = self;
        let source = source.ok_or(PsrfluxError::NoContinuumSource)?;
        let freq = freq.ok_or(PsrfluxError::NoFrequency)?;
        let catalogue = Catalogue::load(&catalogue.ok_or(PsrfluxError::NoCatalogue)?)?;

        let flux = catalogue.flux(&source, freq)?;
        info!("{source} at {freq} GHz: {flux} Jy");

        for f in compare {
            let comp = catalogue.flux(&source, f)?;
            let err = 100.0 * (comp - flux).abs() / flux;
            info!("{source} at {f} GHz: {comp} Jy ({err:.3}% difference)");
        }
        Ok(())
    }
}
