// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! High signal-to-noise template construction: coherently summing the folded
//! profiles of many observations of the same pulsar with the same receiver.

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, trace};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use crate::archive::{Archive, ArchiveError, ObsMode};
use crate::checkpoint::{CheckpointError, CheckpointStore, Versioned, CHECKPOINT_VERSION};
use crate::PROGRESS_BARS;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("No qualifying archives for {pulsar} with frontend {frontend} were found under the supplied directories")]
    NoQualifyingFiles { pulsar: String, frontend: String },

    #[error("Archive {path} has profile shape {got:?}, but the accumulator was created with shape {expected:?}")]
    ShapeMismatch {
        path: PathBuf,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Could not search directory {path}: {source}")]
    Glob {
        path: PathBuf,
        source: glob::PatternError,
    },

    #[error("Could not read template {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse template {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Could not write template {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not serialise template {path}: {source}")]
    Serialise {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// How the template resolves its sub-bands.
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
pub enum TemplateMode {
    /// Sub-bands are frequency bins; every observation is collapsed in time.
    #[strum(serialize = "frequency")]
    Frequency,

    /// Sub-bands are epoch bins; every observation is collapsed in frequency.
    #[strum(serialize = "time")]
    Time,
}

/// A finished (or resumable) template: the accumulated profile plus the key
/// it was built under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub pulsar: String,
    pub frontend: String,
    pub subbands: usize,
    pub mode: TemplateMode,
    /// Shape \[nbin\] when `subbands == 1`, otherwise \[subbands, nbin\].
    pub profile: ArrayD<f64>,
}

impl Template {
    /// The artifact filename for this key. Downstream tooling parses these
    /// names, so the format is fixed.
    pub fn artifact_name(pulsar: &str, frontend: &str, subbands: usize, mode: TemplateMode) -> String {
        match mode {
            TemplateMode::Frequency => format!("{pulsar}_{frontend}_nchan{subbands}_template"),
            TemplateMode::Time => format!("{pulsar}_{frontend}_nsubint{subbands}_template"),
        }
    }

    pub fn nbin(&self) -> usize {
        self.profile.shape()[self.profile.ndim() - 1]
    }

    /// The template summed over its sub-bands, as a 1-D profile.
    pub fn total_profile(&self) -> ArrayD<f64> {
        match self.profile.ndim() {
            1 => self.profile.clone(),
            _ => self.profile.sum_axis(Axis(0)),
        }
    }

    pub fn load(path: &Path) -> Result<Template, TemplateError> {
        let file = File::open(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| TemplateError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf, TemplateError> {
        let path = dir.join(Template::artifact_name(
            &self.pulsar,
            &self.frontend,
            self.subbands,
            self.mode,
        ));
        let file = File::create(&path).map_err(|source| TemplateError::Write {
            path: path.clone(),
            source,
        })?;
        serde_json::to_writer(BufWriter::new(file), self).map_err(|source| {
            TemplateError::Serialise {
                path: path.clone(),
                source,
            }
        })?;
        Ok(path)
    }
}

/// Resume state, written after every accumulated file.
#[derive(Debug, Serialize, Deserialize)]
struct TemplateCheckpoint {
    version: u32,
    accumulator: Option<ArrayD<f64>>,
    ignore_list: Vec<String>,
}

impl Versioned for TemplateCheckpoint {
    fn version(&self) -> u32 {
        self.version
    }
}

#[derive(Debug, Clone)]
pub struct TemplateParams {
    pub pulsar: String,
    pub frontend: String,
    pub subbands: usize,
    pub mode: TemplateMode,
    /// Directories searched for input archives.
    pub data_dirs: Vec1<PathBuf>,
    /// Where the finished template and its checkpoint land.
    pub output_dir: PathBuf,
}

pub struct TemplateBuilder {
    params: TemplateParams,
    store: CheckpointStore,
}

impl TemplateBuilder {
    pub fn new(params: TemplateParams) -> TemplateBuilder {
        let store = CheckpointStore::new(&params.output_dir);
        TemplateBuilder { params, store }
    }

    fn checkpoint_name(&self) -> String {
        format!(
            "{}.checkpoint",
            Template::artifact_name(
                &self.params.pulsar,
                &self.params.frontend,
                self.params.subbands,
                self.params.mode,
            )
        )
    }

    /// Every candidate archive under the search directories, in lexicographic
    /// order so resumed runs see the same sequence.
    fn candidate_files(&self) -> Result<Vec<PathBuf>, TemplateError> {
        let mut files = vec![];
        for dir in &self.params.data_dirs {
            let pattern = dir.join("*.json");
            let paths = glob::glob(&pattern.to_string_lossy()).map_err(|source| {
                TemplateError::Glob {
                    path: dir.clone(),
                    source,
                }
            })?;
            files.extend(paths.flatten());
        }
        files.sort();
        Ok(files)
    }

    /// Does this archive contribute to the template?
    fn qualifies(&self, archive: &Archive) -> bool {
        archive.header.source == self.params.pulsar
            && archive.header.frontend == self.params.frontend
            && archive.header.obs_mode == ObsMode::Psr
    }

    /// Collapse an archive to its per-sub-band profile for this template's
    /// mode: \[nbin\] for a single sub-band, \[subbands, nbin\] otherwise.
    fn reduce(&self, mut archive: Archive) -> Result<ArrayD<f64>, TemplateError> {
        let n = self.params.subbands;
        match self.params.mode {
            TemplateMode::Frequency => {
                archive.tscrunch(1)?;
                archive.pscrunch()?;
                archive.fscrunch(n.min(archive.nchan()))?;
            }
            TemplateMode::Time => {
                archive.tscrunch(n.min(archive.nsubint()))?;
                archive.pscrunch()?;
                archive.fscrunch(1)?;
            }
        }
        let cube = archive.raw_data();
        let profile = match self.params.mode {
            // [1, 1, subbands, nbin] -> [subbands, nbin]
            TemplateMode::Frequency => cube
                .index_axis(Axis(0), 0)
                .index_axis(Axis(0), 0)
                .to_owned()
                .into_dyn(),
            // [subbands, 1, 1, nbin] -> [subbands, nbin]
            TemplateMode::Time => cube
                .index_axis(Axis(1), 0)
                .index_axis(Axis(1), 0)
                .to_owned()
                .into_dyn(),
        };
        Ok(if n == 1 {
            profile.index_axis(Axis(0), 0).to_owned().into_dyn()
        } else {
            profile
        })
    }

    /// Accumulate every qualifying archive and write the finished template.
    /// Progress survives interruption through the checkpoint store.
    pub fn run(&self) -> Result<Template, TemplateError> {
        let checkpoint_name = self.checkpoint_name();
        let mut state: TemplateCheckpoint = self
            .store
            .read_versioned(&checkpoint_name)?
            .unwrap_or(TemplateCheckpoint {
                version: CHECKPOINT_VERSION,
                accumulator: None,
                ignore_list: vec![],
            });
        if !state.ignore_list.is_empty() {
            info!(
                "Resuming template for {} ({}): {} file(s) already accumulated",
                self.params.pulsar,
                self.params.frontend,
                state.ignore_list.len()
            );
        }

        let files = self.candidate_files()?;
        let pb = if PROGRESS_BARS.load() {
            ProgressBar::new(files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg:18}: [{wide_bar:.blue}] {pos:3}/{len:3}")
                .unwrap()
                .progress_chars("=> "),
        );
        pb.set_message("Template files");

        let mut used = state.ignore_list.len();
        for path in files {
            pb.inc(1);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if state.ignore_list.iter().any(|f| f == &name) {
                trace!("{name}: already accumulated; skipping");
                continue;
            }
            let archive = match Archive::load(&path) {
                Ok(a) => a,
                Err(e) => {
                    debug!("{name}: unreadable ({e}); skipping");
                    continue;
                }
            };
            if !self.qualifies(&archive) {
                trace!("{name}: does not qualify; skipping");
                continue;
            }

            let profile = self.reduce(archive)?;
            match &mut state.accumulator {
                None => state.accumulator = Some(profile),
                Some(acc) => {
                    if acc.shape() != profile.shape() {
                        return Err(TemplateError::ShapeMismatch {
                            path,
                            expected: acc.shape().to_vec(),
                            got: profile.shape().to_vec(),
                        });
                    }
                    *acc += &profile;
                }
            }
            state.ignore_list.push(name);
            used += 1;
            self.store.write(&checkpoint_name, &state)?;
        }
        pb.finish_and_clear();

        let Some(profile) = state.accumulator else {
            return Err(TemplateError::NoQualifyingFiles {
                pulsar: self.params.pulsar.clone(),
                frontend: self.params.frontend.clone(),
            });
        };

        let template = Template {
            pulsar: self.params.pulsar.clone(),
            frontend: self.params.frontend.clone(),
            subbands: self.params.subbands,
            mode: self.params.mode,
            profile,
        };
        let path = template.write(&self.params.output_dir)?;
        info!(
            "Template for {} ({}) built from {used} file(s): {}",
            self.params.pulsar,
            self.params.frontend,
            path.display()
        );
        Ok(template)
    }
}
