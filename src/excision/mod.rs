// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! RFI excision: iterative sigma-clipping of frequency channels whose
//! off-pulse RMS is inconsistent with the rest of the band.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use log::{debug, info, trace};
use ndarray::Dimension;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use crate::archive::{Archive, ArchiveError, ObsMode};
use crate::checkpoint::{CheckpointError, CheckpointStore, Versioned, CHECKPOINT_VERSION};
use crate::profile::{cal_windows, off_pulse_mask, rms_statistics, ProfileError};
use crate::stats::chauvenet;
use crate::template::{Template, TemplateBuilder, TemplateError, TemplateMode, TemplateParams};
use crate::PROGRESS_BARS;

/// Stop iterating once both |Δmean| and |Δstddev| of the channel RMS
/// population fall below this.
pub const CONVERGENCE_TOL: f64 = 1e-7;

/// Default Chauvenet rejection threshold in units of sigma.
pub const DEFAULT_SIGMA_THRESHOLD: f64 = 3.0;

/// Default IQR multiplier used when trimming the RMS population.
pub const DEFAULT_RMS_TOLERANCE: f64 = 1.5;

pub const DEFAULT_ITERATIONS: usize = 5;

lazy_static! {
    /// The trailing observation index in an archive filename stem.
    static ref OBS_NUM_RE: Regex = Regex::new(r"(\d{4})$").unwrap();
}

#[derive(Debug, Error)]
pub enum ExcisionError {
    #[error("The {0} excision strategy is not implemented")]
    Unimplemented(ExcisionStrategy),

    #[error(
        "No single-channel template for {pulsar} ({frontend}) exists at {path}. Build one with 'psrflux template {pulsar} --frontend {frontend} --subbands 1', or rerun with --build-missing-templates"
    )]
    MissingTemplate {
        pulsar: String,
        frontend: String,
        path: PathBuf,
    },

    #[error("Could not search directory {path}: {source}")]
    Glob {
        path: PathBuf,
        source: glob::PatternError,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// The statistic used to flag channels. Only sigma clipping exists; the other
/// two are declared so callers see a stable surface, but invoking them fails.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
    Serialize,
    Deserialize,
)]
pub enum ExcisionStrategy {
    #[strum(serialize = "sigma-clip")]
    SigmaClip,

    #[strum(serialize = "bayesian")]
    Bayesian,

    #[strum(serialize = "neural-net")]
    NeuralNet,
}

impl ExcisionStrategy {
    /// The single-character tag recorded in ignore lists, so that a file
    /// excised under one strategy is still eligible under another.
    pub fn method_tag(self) -> char {
        match self {
            ExcisionStrategy::SigmaClip => 'S',
            ExcisionStrategy::Bayesian => 'B',
            ExcisionStrategy::NeuralNet => 'N',
        }
    }
}

/// One already-excised file, recorded with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreEntry {
    pub file: String,
    pub method: char,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExcisionCheckpoint {
    version: u32,
    /// The file a previous run was interrupted in, if any.
    last_file: Option<String>,
    /// (sub-integration, channel) cursor within `last_file`.
    cursor: [usize; 2],
    ignore_list: Vec<IgnoreEntry>,
}

impl Versioned for ExcisionCheckpoint {
    fn version(&self) -> u32 {
        self.version
    }
}

#[derive(Debug, Clone)]
pub struct ExcisionParams {
    pub pulsar: String,
    /// Directories searched for input archives.
    pub data_dirs: Vec1<PathBuf>,
    pub template_dir: PathBuf,
    pub output_dir: PathBuf,
    pub strategy: ExcisionStrategy,
    pub iterations: usize,
    pub sigma_threshold: f64,
    /// Collapse each archive's sub-integrations to one before excising.
    pub epoch_average: bool,
    /// Never zero a channel below the cal signal's mid boundary.
    pub protect_cal_region: bool,
    /// Build any missing template on the spot instead of failing.
    pub build_missing_templates: bool,
}

/// What happened to the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExcisionReport {
    pub excised: usize,
    pub skipped: usize,
}

pub struct ExcisionEngine {
    params: ExcisionParams,
    store: CheckpointStore,
}

impl ExcisionEngine {
    pub fn new(params: ExcisionParams) -> ExcisionEngine {
        let store = CheckpointStore::new(&params.output_dir);
        ExcisionEngine { params, store }
    }

    fn checkpoint_name(&self) -> String {
        format!("{}_excision.checkpoint", self.params.pulsar)
    }

    fn candidate_files(&self) -> Result<Vec<PathBuf>, ExcisionError> {
        let mut files = vec![];
        for dir in &self.params.data_dirs {
            let pattern = dir.join("*.json");
            let paths = glob::glob(&pattern.to_string_lossy()).map_err(|source| {
                ExcisionError::Glob {
                    path: dir.clone(),
                    source,
                }
            })?;
            files.extend(paths.flatten());
        }
        files.sort();
        Ok(files)
    }

    /// The template this pulsar/frontend pair is excised against, building it
    /// on demand if allowed.
    fn load_template(&self, frontend: &str) -> Result<Template, ExcisionError> {
        let name = Template::artifact_name(&self.params.pulsar, frontend, 1, TemplateMode::Frequency);
        let path = self.params.template_dir.join(&name);
        if path.exists() {
            return Ok(Template::load(&path)?);
        }
        if self.params.build_missing_templates {
            info!(
                "No template for {} ({frontend}); building one now",
                self.params.pulsar
            );
            let builder = TemplateBuilder::new(TemplateParams {
                pulsar: self.params.pulsar.clone(),
                frontend: frontend.to_string(),
                subbands: 1,
                mode: TemplateMode::Frequency,
                data_dirs: self.params.data_dirs.clone(),
                output_dir: self.params.template_dir.clone(),
            });
            return Ok(builder.run()?);
        }
        Err(ExcisionError::MissingTemplate {
            pulsar: self.params.pulsar.clone(),
            frontend: frontend.to_string(),
            path,
        })
    }

    /// One excision pass over an archive: flag channels whose off-pulse RMS
    /// fails Chauvenet's criterion and zero their weights. Returns the
    /// trimmed mean and stddev of the RMS population before zapping.
    fn sigma_clip_pass(
        &self,
        archive: &mut Archive,
        template: &Template,
    ) -> Result<(f64, f64), ExcisionError> {
        let nbin = template.nbin();
        let mask = off_pulse_mask(template.total_profile().view(), nbin.saturating_sub(100))?;
        let data = archive.data();
        let stats = rms_statistics(data.view().into_dyn(), &mask, DEFAULT_RMS_TOLERANCE)?;
        let reject = chauvenet(stats.rms.view(), stats.mean, stats.std, self.params.sigma_threshold);

        let guard = if self.params.protect_cal_region {
            cal_windows(archive.nbin(), archive.header.cal_phase, archive.header.cal_duty).mid
        } else {
            0
        };

        // The channel axis is the last axis of the RMS cube. A channel is
        // zapped if any (subint, pol) flags it.
        let nchan = archive.nchan();
        let chan_axis = reject.ndim() - 1;
        for c in 0..nchan {
            if c < guard {
                continue;
            }
            let flagged = reject
                .indexed_iter()
                .any(|(idx, &r)| r && idx.slice()[chan_axis] == c);
            if flagged && archive.weights()[c] != 0.0 {
                trace!("Zapping channel {c}");
                archive.set_weight(c, 0.0);
            }
        }
        Ok((stats.mean, stats.std))
    }

    fn mitigate(
        &self,
        archive: &mut Archive,
        template: &Template,
    ) -> Result<(f64, f64), ExcisionError> {
        match self.params.strategy {
            ExcisionStrategy::SigmaClip => self.sigma_clip_pass(archive, template),
            other => Err(ExcisionError::Unimplemented(other)),
        }
    }

    /// Excise every qualifying archive under the search directories,
    /// resuming from the checkpoint where one exists.
    pub fn run(&self) -> Result<ExcisionReport, ExcisionError> {
        let checkpoint_name = self.checkpoint_name();
        let mut state: ExcisionCheckpoint = self
            .store
            .read_versioned(&checkpoint_name)?
            .unwrap_or(ExcisionCheckpoint {
                version: CHECKPOINT_VERSION,
                last_file: None,
                cursor: [0, 0],
                ignore_list: vec![],
            });

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
        pb.set_message("Excising archives");

        let tag = self.params.strategy.method_tag();
        let mut report = ExcisionReport::default();
        for path in files {
            pb.inc(1);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if state
                .ignore_list
                .iter()
                .any(|e| e.file == name && e.method == tag)
            {
                debug!("{name}: already excised with method {tag}");
                report.skipped += 1;
                continue;
            }
            if let Some(last) = &state.last_file {
                if last != &name {
                    debug!("{name}: does not match the checkpointed file {last}; skipping");
                    report.skipped += 1;
                    continue;
                }
            }

            let mut archive = match Archive::load(&path) {
                Ok(a) => a,
                Err(e) => {
                    debug!("{name}: unreadable ({e}); skipping");
                    report.skipped += 1;
                    continue;
                }
            };
            if archive.header.source != self.params.pulsar
                || archive.header.obs_mode != ObsMode::Psr
            {
                trace!("{name}: not a science pointing of {}", self.params.pulsar);
                report.skipped += 1;
                continue;
            }

            let template = self.load_template(&archive.header.frontend)?;
            if self.params.epoch_average {
                archive.tscrunch(1)?;
            }

            // Mark the file in progress so an interrupted run resumes here.
            state.last_file = Some(name.clone());
            self.store.write(&checkpoint_name, &state)?;

            let mut previous: Option<(f64, f64)> = None;
            for it in 0..self.params.iterations {
                let (mu, sigma) = self.mitigate(&mut archive, &template)?;
                if let Some((old_mu, old_sigma)) = previous {
                    if (old_mu - mu).abs() < CONVERGENCE_TOL
                        && (old_sigma - sigma).abs() < CONVERGENCE_TOL
                    {
                        trace!("{name}: converged after {} iteration(s)", it + 1);
                        break;
                    }
                }
                previous = Some((mu, sigma));
            }

            let output = self.output_path(&path, &archive);
            archive.write(&output)?;
            state.ignore_list.push(IgnoreEntry { file: name.clone(), method: tag });
            state.last_file = None;
            state.cursor = [0, 0];
            self.store.write(&checkpoint_name, &state)?;
            report.excised += 1;
            debug!("{name}: fully excised with method {tag}");
        }
        pb.finish_and_clear();

        info!(
            "Excision of {}: {} file(s) excised, {} skipped",
            self.params.pulsar, report.excised, report.skipped
        );
        Ok(report)
    }

    /// `{pulsar}_{mjd}_{frontend}_{obs_num}` plus the input's extension.
    /// Downstream tooling parses these names, so the format is fixed.
    fn output_path(&self, input: &Path, archive: &Archive) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let obs_num = obs_number(&stem);
        let mut name = format!(
            "{}_{}_{}_{obs_num}",
            self.params.pulsar, archive.header.start_mjd, archive.header.frontend
        );
        if let Some(ext) = input.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        self.params.output_dir.join(name)
    }
}

/// The 4-digit observation index at the end of a filename stem, falling back
/// to the stem's last four characters.
pub fn obs_number(stem: &str) -> String {
    if let Some(caps) = OBS_NUM_RE.captures(stem) {
        return caps[1].to_string();
    }
    let chars: Vec<char> = stem.chars().collect();
    chars[chars.len().saturating_sub(4)..].iter().collect()
}
