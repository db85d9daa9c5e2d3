// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The continuum-source flux catalogue. Each entry gives a calibrator's sky
//! position and a spectral model in one of two formats:
//!
//! - Format 1 (`%` lines): a reference flux and spectral index, i.e.
//!   `S(f) = S_ref * (f / f_ref)^alpha`;
//! - Format 2 (`&` lines): log-polynomial coefficients, i.e.
//!   `log10 S(f) = a0 + a1 log10(f) + a2 log10(f)^2 + ...`.
//!
//! Lines starting `#` are comments. Any other non-empty line is an alias for
//! the entry above it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::coord::{CoordError, RADec};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("Could not read catalogue {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Catalogue {path} line {line}: entry '{text}' is malformed")]
    MalformedEntry {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("Catalogue {path} line {line}: alias '{text}' appears before any entry")]
    OrphanAlias {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("Catalogue {path} line {line}: {source}")]
    BadPosition {
        path: PathBuf,
        line: usize,
        source: CoordError,
    },

    #[error("No catalogue entry matches source '{0}'")]
    UnknownSource(String),
}

#[derive(Debug, Clone)]
enum SpectralModel {
    /// Reference frequency \[GHz\], reference flux \[Jy\], spectral index.
    PowerLaw {
        ref_freq_ghz: f64,
        ref_flux_jy: f64,
        index: f64,
    },
    /// Coefficients of log10(S) as a polynomial in log10(f \[GHz\]).
    LogPolynomial(Vec<f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    position: RADec,
    model: SpectralModel,
}

/// A parsed flux catalogue, queryable by source name or alias.
#[derive(Debug, Clone)]
pub struct Catalogue {
    entries: Vec<Entry>,
    /// Name or alias -> index into `entries`.
    names: HashMap<String, usize>,
}

impl Catalogue {
    pub fn load(path: &Path) -> Result<Catalogue, CatalogueError> {
        let contents = fs::read_to_string(path).map_err(|source| CatalogueError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Catalogue, CatalogueError> {
        let mut entries = vec![];
        let mut names = HashMap::new();

        for (i, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            let line_num = i + 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let malformed = || CatalogueError::MalformedEntry {
                path: path.to_path_buf(),
                line: line_num,
                text: line.to_string(),
            };

            if let Some(rest) = line.strip_prefix('%') {
                let fields: Vec<&str> = rest.split_whitespace().collect();
                let [name, ra, dec, freq, flux, spectral_index] = fields[..] else {
                    return Err(malformed());
                };
                let position =
                    RADec::from_sexagesimal(ra, dec).map_err(|source| CatalogueError::BadPosition {
                        path: path.to_path_buf(),
                        line: line_num,
                        source,
                    })?;
                let ref_freq_mhz: f64 = freq.parse().map_err(|_| malformed())?;
                let model = SpectralModel::PowerLaw {
                    ref_freq_ghz: ref_freq_mhz / 1000.0,
                    ref_flux_jy: flux.parse().map_err(|_| malformed())?,
                    index: spectral_index.parse().map_err(|_| malformed())?,
                };
                names.insert(name.to_string(), entries.len());
                entries.push(Entry { position, model });
            } else if let Some(rest) = line.strip_prefix('&') {
                let fields: Vec<&str> = rest.split_whitespace().collect();
                if fields.len() < 4 {
                    return Err(malformed());
                }
                let position = RADec::from_sexagesimal(fields[1], fields[2]).map_err(|source| {
                    CatalogueError::BadPosition {
                        path: path.to_path_buf(),
                        line: line_num,
                        source,
                    }
                })?;
                let coeffs = fields[3..]
                    .iter()
                    .map(|f| f.parse())
                    .collect::<Result<Vec<f64>, _>>()
                    .map_err(|_| malformed())?;
                names.insert(fields[0].to_string(), entries.len());
                entries.push(Entry {
                    position,
                    model: SpectralModel::LogPolynomial(coeffs),
                });
            } else {
                // An alias for the entry above.
                if entries.is_empty() {
                    return Err(CatalogueError::OrphanAlias {
                        path: path.to_path_buf(),
                        line: line_num,
                        text: line.to_string(),
                    });
                }
                names.insert(line.to_string(), entries.len() - 1);
            }
        }

        Ok(Catalogue { entries, names })
    }

    fn entry(&self, source: &str) -> Result<&Entry, CatalogueError> {
        self.names
            .get(source)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| CatalogueError::UnknownSource(source.to_string()))
    }

    pub fn contains(&self, source: &str) -> bool {
        self.names.contains_key(source)
    }

    /// The catalogued position of a source.
    pub fn position(&self, source: &str) -> Result<RADec, CatalogueError> {
        Ok(self.entry(source)?.position)
    }

    /// The model flux of a source at `freq_ghz` \[Jy\].
    pub fn flux(&self, source: &str, freq_ghz: f64) -> Result<f64, CatalogueError> {
        let entry = self.entry(source)?;
        Ok(match &entry.model {
            SpectralModel::PowerLaw {
                ref_freq_ghz,
                ref_flux_jy,
                index,
            } => ref_flux_jy * (freq_ghz / ref_freq_ghz).powf(*index),
            SpectralModel::LogPolynomial(coeffs) => {
                let log_f = freq_ghz.log10();
                let log_s: f64 = coeffs
                    .iter()
                    .enumerate()
                    .map(|(i, a)| a * log_f.powi(i as i32))
                    .sum();
                10.0_f64.powf(log_s)
            }
        })
    }
}
