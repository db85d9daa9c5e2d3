// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The in-memory representation of a folded pulsar archive, along with the
//! averaging ("scrunching") operations the rest of the pipeline is built on.
//!
//! Archives are stored on disk as JSON documents; conversion from the
//! telescope's native format is expected to happen upstream.


use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use hifitime::Epoch;
use ndarray::{Array1, Array4, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pol::{convert, Feed, PolBasis, PolError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Could not open archive {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse archive {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Could not write archive {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not serialise archive {path}: {source}")]
    Serialise {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Cannot average {available} {axis} down to {requested}")]
    BadScrunchFactor {
        axis: &'static str,
        available: usize,
        requested: usize,
    },

    #[error("Replacement data has shape {got:?}, but the archive holds {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        got: Vec<usize>,
    },

    #[error("Archive holds {nchan} channels but {got} weights")]
    WeightMismatch { nchan: usize, got: usize },

    #[error(transparent)]
    Pol(#[from] PolError),
}

/// What the backend was observing when the archive was folded.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
    Serialize,
    Deserialize,
)]
pub enum ObsMode {
    /// A pulsar observation.
    #[strum(serialize = "PSR")]
    #[serde(rename = "PSR")]
    Psr,

    /// A noise-diode cal scan.
    #[strum(serialize = "CAL")]
    #[serde(rename = "CAL")]
    Cal,
}

/// Header cards carried alongside the folded data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Source name (`SRC_NAME`).
    pub source: String,
    /// Receiver name (`FRONTEND`).
    pub frontend: String,
    pub obs_mode: ObsMode,
    /// Integer MJD of the observation start (`STT_IMJD`).
    pub start_mjd: i64,
    /// Right ascension as a sexagesimal hourangle string, e.g. "14:45:16.465".
    pub ra: String,
    /// Declination as a sexagesimal degree string, e.g. "+09:58:36.0".
    pub dec: String,
    /// Phase of the cal signal's rising edge (`CAL_PHS`), as a turn fraction.
    pub cal_phase: f64,
    /// Cal duty cycle (`CAL_DCYC`), as a turn fraction.
    pub cal_duty: f64,
    pub bandwidth_mhz: f64,
    pub centre_freq_mhz: f64,
    /// Basis of the stored polarisation products (`POL_TYPE`).
    pub pol_type: PolBasis,
    /// Receptor feed type (`FD_POLN`).
    pub feed: Feed,
}

impl ArchiveHeader {
    pub fn start_epoch(&self) -> Epoch {
        Epoch::from_mjd_utc(self.start_mjd as f64)
    }
}

/// A folded archive: header plus a \[subint, pol, chan, bin\] data cube and
/// per-channel weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    pub header: ArchiveHeader,
    data: Array4<f64>,
    weights: Array1<f64>,
}

impl Archive {
    pub fn new(
        header: ArchiveHeader,
        data: Array4<f64>,
        weights: Array1<f64>,
    ) -> Result<Archive, ArchiveError> {
        if weights.len() != data.shape()[2] {
            return Err(ArchiveError::WeightMismatch {
                nchan: data.shape()[2],
                got: weights.len(),
            });
        }
        Ok(Archive {
            header,
            data,
            weights,
        })
    }

    pub fn nsubint(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn npol(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn nchan(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn nbin(&self) -> usize {
        self.data.shape()[3]
    }

    /// The data cube with channel weights applied.
    pub fn data(&self) -> Array4<f64> {
        let mut weighted = self.data.clone();
        for (c, mut chan) in weighted.axis_iter_mut(Axis(2)).enumerate() {
            chan *= self.weights[c];
        }
        weighted
    }

    /// The raw, unweighted data cube.
    pub fn raw_data(&self) -> &Array4<f64> {
        &self.data
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn set_weight(&mut self, chan: usize, weight: f64) {
        self.weights[chan] = weight;
    }

    /// Replace the data cube. The shape must match the existing one.
    pub fn set_data(&mut self, data: Array4<f64>) -> Result<(), ArchiveError> {
        if data.shape() != self.data.shape() {
            return Err(ArchiveError::ShapeMismatch {
                expected: [self.nsubint(), self.npol(), self.nchan(), self.nbin()],
                got: data.shape().to_vec(),
            });
        }
        self.data = data;
        Ok(())
    }

    /// Average the sub-integrations down to `nsub` contiguous groups.
    pub fn tscrunch(&mut self, nsub: usize) -> Result<(), ArchiveError> {
        let nsubint = self.nsubint();
        if nsub == 0 || nsub > nsubint {
            return Err(ArchiveError::BadScrunchFactor {
                axis: "sub-integrations",
                available: nsubint,
                requested: nsub,
            });
        }
        if nsub == nsubint {
            return Ok(());
        }

        let mut out = Array4::zeros((nsub, self.npol(), self.nchan(), self.nbin()));
        let mut counts = vec![0usize; nsub];
        for (i, subint) in self.data.axis_iter(Axis(0)).enumerate() {
            let group = i * nsub / nsubint;
            let mut acc = out.index_axis_mut(Axis(0), group);
            acc += &subint;
            counts[group] += 1;
        }
        for (group, mut acc) in out.axis_iter_mut(Axis(0)).enumerate() {
            acc /= counts[group] as f64;
        }
        self.data = out;
        Ok(())
    }

    /// Average the frequency channels down to `nchan` contiguous sub-bands,
    /// weighting each input channel by its weight. A sub-band's new weight is
    /// the sum of its members'.
    pub fn fscrunch(&mut self, nchan: usize) -> Result<(), ArchiveError> {
        let old_nchan = self.nchan();
        if nchan == 0 || nchan > old_nchan {
            return Err(ArchiveError::BadScrunchFactor {
                axis: "channels",
                available: old_nchan,
                requested: nchan,
            });
        }
        if nchan == old_nchan {
            return Ok(());
        }

        let mut out = Array4::zeros((self.nsubint(), self.npol(), nchan, self.nbin()));
        let mut new_weights = Array1::zeros(nchan);
        for (c, chan) in self.data.axis_iter(Axis(2)).enumerate() {
            let group = c * nchan / old_nchan;
            let w = self.weights[c];
            let mut acc = out.index_axis_mut(Axis(2), group);
            acc.scaled_add(w, &chan);
            new_weights[group] += w;
        }
        for (group, mut acc) in out.axis_iter_mut(Axis(2)).enumerate() {
            let w = new_weights[group];
            if w > 0.0 {
                acc /= w;
            }
        }
        self.data = out;
        self.weights = new_weights;
        Ok(())
    }

    /// Collapse the polarisation products to total intensity. In a coherence
    /// basis that is AA + BB; in a Stokes basis it is Stokes I.
    pub fn pscrunch(&mut self) -> Result<(), ArchiveError> {
        if self.npol() == 1 {
            return Ok(());
        }
        let intensity = match self.header.pol_type {
            PolBasis::Coherence => {
                &self.data.index_axis(Axis(1), 0) + &self.data.index_axis(Axis(1), 1)
            }
            PolBasis::Stokes => self.data.index_axis(Axis(1), 0).to_owned(),
        };
        self.data = intensity.insert_axis(Axis(1));
        self.header.pol_type = PolBasis::Stokes;
        Ok(())
    }

    /// Re-express the polarisation products in another basis.
    pub fn convert_pol(&mut self, to: PolBasis) -> Result<(), ArchiveError> {
        if self.header.pol_type == to {
            return Ok(());
        }
        self.data = convert(self.data.view(), self.header.pol_type, to, self.header.feed)?;
        self.header.pol_type = to;
        Ok(())
    }

    /// Sky frequency of each channel \[MHz\], evenly spaced across the band.
    pub fn channel_freqs(&self) -> Array1<f64> {
        let nchan = self.nchan();
        let low = self.header.centre_freq_mhz - self.header.bandwidth_mhz / 2.0;
        let high = self.header.centre_freq_mhz + self.header.bandwidth_mhz / 2.0;
        if nchan == 1 {
            return Array1::from_elem(1, self.header.centre_freq_mhz);
        }
        Array1::linspace(low, high, nchan)
    }

    pub fn load(path: &Path) -> Result<Archive, ArchiveError> {
        let file = File::open(path).map_err(|source| ArchiveError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ArchiveError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), ArchiveError> {
        let file = File::create(path).map_err(|source| ArchiveError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer(BufWriter::new(file), self).map_err(|source| {
            ArchiveError::Serialise {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}
