// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all psrflux-related errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PsrfluxError {
    #[error("No pulsar name was supplied")]
    NoPulsar,

    #[error("No frontend was supplied")]
    NoFrontend,

    #[error("No data directories were supplied")]
    NoDataDirs,

    #[error("No continuum source was supplied")]
    NoContinuumSource,

    #[error("No continuum directory was supplied")]
    NoContinuumDir,

    #[error("No flux catalogue was supplied")]
    NoCatalogue,

    #[error("No frequency was supplied")]
    NoFrequency,

    #[error("'{0}' is not a template mode; expected 'frequency' or 'time'")]
    UnknownTemplateMode(String),

    #[error("'{0}' is not an excision strategy; expected 'sigma-clip', 'bayesian' or 'neural-net'")]
    UnknownStrategy(String),

    #[error("{0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("{0}")]
    Excision(#[from] crate::excision::ExcisionError),

    #[error("{0}")]
    FluxCal(#[from] crate::fluxcal::FluxCalError),

    #[error("{0}")]
    Catalogue(#[from] crate::catalogue::CatalogueError),

    #[error("{0}")]
    IO(#[from] std::io::Error),
}
