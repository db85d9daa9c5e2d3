// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flux calibration: converting instrument counts to Jansky using the noise
//! diode and interleaved on/off continuum-source calibrator scans.
//!
//! The chain per calibration epoch: the on/off calibrator pair gives the cal
//! signal's absolute scale (`F_cal`, Jy per cal deflection), a spline carries
//! that scale across the band onto the science channelisation, and the
//! pulsar's own cal scan converts it to Jy per count.

mod interp;

pub use interp::{CubicSpline, InterpError};

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use crate::archive::{Archive, ArchiveError, ObsMode};
use crate::catalogue::{Catalogue, CatalogueError};
use crate::checkpoint::{CheckpointError, CheckpointStore, Versioned, CHECKPOINT_VERSION};
use crate::coord::RADec;
use crate::excision::obs_number;
use crate::pol::{PolBasis, PolError};
use crate::profile::cal_windows;
use crate::PROGRESS_BARS;

/// A calibrator pair is usable for a science epoch up to this many days away.
pub const DEFAULT_EPOCH_TOLERANCE_DAYS: f64 = 50.0;

/// A calibrator scan within this distance of the continuum source is ON.
pub const DEFAULT_ANGULAR_TOLERANCE_ARCMIN: f64 = 1.0;

/// Assumed cal-signal gain when deriving Jy per count.
pub const DEFAULT_CAL_GAIN: f64 = 10.0;

/// Cal-state means are rounded to this many decimals to suppress floating
/// noise before ratios are taken.
pub const MEAN_ROUND_DECIMALS: i32 = 8;

#[derive(Debug, Error)]
pub enum FluxCalError {
    #[error("Could not search directory {path}: {source}")]
    Glob {
        path: PathBuf,
        source: glob::PatternError,
    },

    #[error("Calibration needs all four polarisation products, but the archive has {npol}")]
    NotFourProducts { npol: usize },

    #[error("Conversion factor covers {factor} channels but the archive has {nchan}")]
    FactorMismatch { factor: usize, nchan: usize },

    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Pol(#[from] PolError),

    #[error(transparent)]
    Interp(#[from] InterpError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// An ON/OFF calibrator scan pair from one epoch with one receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratorPair {
    pub mjd: i64,
    pub frontend: String,
    pub obs_number: String,
    pub on: PathBuf,
    pub off: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct PairsCheckpoint {
    version: u32,
    pairs: Vec<CalibratorPair>,
}

impl Versioned for PairsCheckpoint {
    fn version(&self) -> u32 {
        self.version
    }
}

/// Cached per-epoch Jy-per-count factors, in the same order the epochs were
/// encountered.
#[derive(Debug, Serialize, Deserialize)]
struct FactorsCheckpoint {
    version: u32,
    epochs: Vec<i64>,
    factors: Vec<Array2<f64>>,
}

impl Versioned for FactorsCheckpoint {
    fn version(&self) -> u32 {
        self.version
    }
}

fn round_dp(x: f64, decimals: i32) -> f64 {
    let scale = 10.0_f64.powi(decimals);
    (x * scale).round() / scale
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Per-channel means of the cal signal's low and high states for the two
/// orthogonal polarisations. Shape \[2, nchan\].
#[derive(Debug, Clone)]
pub struct CalStateMeans {
    pub low: Array2<f64>,
    pub high: Array2<f64>,
}

/// Collapse a cal scan to one sub-integration, express it in the coherence
/// basis and measure the mean of each cal state per channel for AA and BB.
pub fn cal_state_means(mut archive: Archive) -> Result<CalStateMeans, FluxCalError> {
    if archive.npol() != 4 {
        return Err(FluxCalError::NotFourProducts {
            npol: archive.npol(),
        });
    }
    archive.tscrunch(1)?;
    archive.convert_pol(PolBasis::Coherence)?;

    let nchan = archive.nchan();
    let nbin = archive.nbin();
    let windows = cal_windows(nbin, archive.header.cal_phase, archive.header.cal_duty);
    let data = archive.data();

    let mut low = Array2::zeros((2, nchan));
    let mut high = Array2::zeros((2, nchan));
    for p in 0..2 {
        for c in 0..nchan {
            let profile = data.slice(ndarray::s![0, p, c, ..]);
            let bins: Vec<f64> = profile.iter().copied().collect();
            let low_mean = mean(&bins[windows.start..windows.mid.min(nbin)]);
            let high_mean = mean(&bins[windows.mid.min(nbin)..windows.end.min(nbin)]);
            low[[p, c]] = round_dp(low_mean, MEAN_ROUND_DECIMALS);
            high[[p, c]] = round_dp(high_mean, MEAN_ROUND_DECIMALS);
        }
    }
    Ok(CalStateMeans { low, high })
}

/// Derive `F_cal` (Jy per unit cal deflection) per polarisation and channel
/// from an ON/OFF calibrator pair and the continuum source's expected flux.
///
/// For each channel: f = high/low - 1 for both scans; C0 = T0 / (1/f_on -
/// 1/f_off); T_sys = C0 / f_off; F_cal = T_sys * f_off / gain. An undefined
/// ratio is treated as 1, an undefined factor as 0.
pub fn derive_conversion_factor(
    on: &CalStateMeans,
    off: &CalStateMeans,
    expected_flux_jy: &Array1<f64>,
    gain: f64,
) -> Array2<f64> {
    let nchan = on.low.ncols();
    let mut f_cal = Array2::zeros((2, nchan));
    for p in 0..2 {
        for c in 0..nchan {
            let mut f_on = on.high[[p, c]] / on.low[[p, c]] - 1.0;
            let mut f_off = off.high[[p, c]] / off.low[[p, c]] - 1.0;
            if f_on.is_nan() {
                f_on = 1.0;
            }
            if f_off.is_nan() {
                f_off = 1.0;
            }
            let c0 = expected_flux_jy[c] / (1.0 / f_on - 1.0 / f_off);
            let t_sys = c0 / f_off;
            let factor = t_sys * f_off / gain;
            f_cal[[p, c]] = if factor.is_nan() { 0.0 } else { factor };
        }
    }
    f_cal
}

/// Carry `F_cal` from the calibrator's channelisation onto the science one
/// and divide by the pulsar cal scan's deflection, giving Jy per count.
pub fn jy_per_count(
    f_cal: &Array2<f64>,
    cal_freqs_mhz: &Array1<f64>,
    psr_cal: &CalStateMeans,
    target_freqs_mhz: &Array1<f64>,
) -> Result<Array2<f64>, FluxCalError> {
    let nchan = target_freqs_mhz.len();
    let mut factor = Array2::zeros((2, nchan));
    let xs = cal_freqs_mhz.as_slice().unwrap_or(&[]).to_vec();
    for p in 0..2 {
        let ys: Vec<f64> = f_cal.row(p).iter().copied().collect();
        let spline = CubicSpline::new(&xs, &ys)?;
        for c in 0..nchan {
            let deflection = psr_cal.high[[p, c]] - psr_cal.low[[p, c]];
            factor[[p, c]] = spline.evaluate(target_freqs_mhz[c]) / deflection;
        }
    }
    Ok(factor)
}

/// Scale an archive's two orthogonal polarisation products by a per-channel
/// Jy-per-count factor, preserving the archive's original basis.
pub fn apply_conversion_factor(
    archive: &mut Archive,
    factor: &Array2<f64>,
) -> Result<(), FluxCalError> {
    if factor.ncols() != archive.nchan() {
        return Err(FluxCalError::FactorMismatch {
            factor: factor.ncols(),
            nchan: archive.nchan(),
        });
    }
    let original = archive.header.pol_type;
    archive.convert_pol(PolBasis::Coherence)?;

    let mut data = archive.raw_data().clone();
    for mut subint in data.axis_iter_mut(Axis(0)) {
        for p in 0..2 {
            for c in 0..archive.nchan() {
                let mut bins = subint.slice_mut(ndarray::s![p, c, ..]);
                bins *= factor[[p, c]];
            }
        }
    }
    archive.set_data(data)?;
    archive.convert_pol(original)?;
    Ok(())
}

/// Tag every calibration scan in `cal_dir` ON or OFF by angular separation
/// from the continuum source, then pair them up by (epoch, frontend,
/// observation index). Groups missing either member are dropped.
pub fn match_calibrator_pairs(
    cal_dir: &Path,
    target: RADec,
    tolerance_arcmin: f64,
) -> Result<Vec<CalibratorPair>, FluxCalError> {
    let pattern = cal_dir.join("*.json");
    let paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|source| FluxCalError::Glob {
            path: cal_dir.to_path_buf(),
            source,
        })?
        .flatten()
        .sorted()
        .collect();

    // (mjd, frontend, obs number) -> (Option<on>, Option<off>), insertion
    // ordered.
    let mut groups: Vec<((i64, String, String), (Option<PathBuf>, Option<PathBuf>))> = vec![];
    for path in paths {
        let archive = match Archive::load(&path) {
            Ok(a) => a,
            Err(e) => {
                debug!("{}: unreadable ({e}); skipping", path.display());
                continue;
            }
        };
        if archive.header.obs_mode != ObsMode::Cal {
            continue;
        }
        let position = match RADec::from_sexagesimal(&archive.header.ra, &archive.header.dec) {
            Ok(p) => p,
            Err(e) => {
                debug!("{}: bad coordinates ({e}); skipping", path.display());
                continue;
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = (
            archive.header.start_mjd,
            archive.header.frontend.clone(),
            obs_number(&stem),
        );
        let on_source = position.separation_arcmin(&target) <= tolerance_arcmin;
        trace!(
            "{}: {} source ({} arcmin)",
            path.display(),
            if on_source { "ON" } else { "OFF" },
            position.separation_arcmin(&target)
        );

        let slot = match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => slot,
            None => {
                groups.push((key, (None, None)));
                &mut groups.last_mut().unwrap().1
            }
        };
        let member = if on_source { &mut slot.0 } else { &mut slot.1 };
        if member.is_none() {
            *member = Some(path);
        }
    }

    Ok(groups
        .into_iter()
        .filter_map(|((mjd, frontend, obs_number), (on, off))| {
            Some(CalibratorPair {
                mjd,
                frontend,
                obs_number,
                on: on?,
                off: off?,
            })
        })
        .collect())
}

/// The pair closest in epoch to `mjd` with a matching frontend, or `None` if
/// nothing lies within the tolerance.
pub fn nearest_calibrator_pair<'a>(
    pairs: &'a [CalibratorPair],
    mjd: i64,
    frontend: &str,
    tolerance_days: f64,
) -> Option<&'a CalibratorPair> {
    pairs
        .iter()
        .filter(|p| p.frontend == frontend)
        .min_by_key(|p| (p.mjd - mjd).abs())
        .filter(|p| (p.mjd - mjd).abs() as f64 <= tolerance_days)
}

#[derive(Debug, Clone)]
pub struct FluxCalParams {
    pub pulsar: String,
    /// Continuum source name as it appears in the flux catalogue.
    pub continuum_source: String,
    /// Directories searched for science and pulsar-cal archives.
    pub data_dirs: Vec1<PathBuf>,
    /// Directory of continuum calibrator scans.
    pub continuum_dir: PathBuf,
    pub catalogue: PathBuf,
    pub output_dir: PathBuf,
    pub gain: f64,
    pub epoch_tolerance_days: f64,
    pub angular_tolerance_arcmin: f64,
    /// Skip science files with no usable calibration instead of writing them
    /// through uncalibrated.
    pub skip_uncalibrated: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FluxCalReport {
    pub calibrated: usize,
    pub uncalibrated: usize,
    pub skipped: usize,
}

pub struct FluxCalibrator {
    params: FluxCalParams,
    store: CheckpointStore,
}

impl FluxCalibrator {
    pub fn new(params: FluxCalParams) -> FluxCalibrator {
        let store = CheckpointStore::new(&params.output_dir);
        FluxCalibrator { params, store }
    }

    fn pairs_checkpoint_name(&self) -> String {
        format!("{}_onoff_list.checkpoint", self.params.continuum_source)
    }

    fn factors_checkpoint_name(&self) -> String {
        format!(
            "{}_{}_factors.checkpoint",
            self.params.pulsar, self.params.continuum_source
        )
    }

    /// The ON/OFF pair list: cached from a previous run when available,
    /// otherwise matched fresh and checkpointed.
    fn calibrator_pairs(&self, catalogue: &Catalogue) -> Result<Vec<CalibratorPair>, FluxCalError> {
        let name = self.pairs_checkpoint_name();
        if let Some(cached) = self.store.read_versioned::<PairsCheckpoint>(&name)? {
            debug!("Loaded {} cached calibrator pair(s)", cached.pairs.len());
            return Ok(cached.pairs);
        }
        let target = catalogue.position(&self.params.continuum_source)?;
        let pairs = match_calibrator_pairs(
            &self.params.continuum_dir,
            target,
            self.params.angular_tolerance_arcmin,
        )?;
        info!("Matched {} calibrator pair(s)", pairs.len());
        self.store.write(
            &name,
            &PairsCheckpoint {
                version: CHECKPOINT_VERSION,
                pairs: pairs.clone(),
            },
        )?;
        Ok(pairs)
    }

    /// Expected continuum flux per channel \[Jy\] for an archive's band.
    fn expected_flux(
        &self,
        catalogue: &Catalogue,
        archive: &Archive,
    ) -> Result<Array1<f64>, FluxCalError> {
        archive
            .channel_freqs()
            .iter()
            .map(|&mhz| {
                catalogue
                    .flux(&self.params.continuum_source, mhz / 1000.0)
                    .map_err(FluxCalError::from)
            })
            .collect::<Result<Vec<f64>, _>>()
            .map(Array1::from_vec)
    }

    /// Jy-per-count for one pulsar cal scan, via its nearest calibrator pair.
    fn factor_from_cal_scan(
        &self,
        catalogue: &Catalogue,
        pairs: &[CalibratorPair],
        cal_archive: Archive,
    ) -> Result<Option<Array2<f64>>, FluxCalError> {
        let mjd = cal_archive.header.start_mjd;
        let Some(pair) = nearest_calibrator_pair(
            pairs,
            mjd,
            &cal_archive.header.frontend,
            self.params.epoch_tolerance_days,
        ) else {
            warn!("No calibrator pair within tolerance of MJD {mjd}");
            return Ok(None);
        };
        debug!(
            "MJD {mjd}: using calibrator pair at MJD {} ({})",
            pair.mjd, pair.frontend
        );

        let on = Archive::load(&pair.on)?;
        let off = Archive::load(&pair.off)?;
        let cal_freqs = on.channel_freqs();
        let expected = self.expected_flux(catalogue, &on)?;
        let target_freqs = cal_archive.channel_freqs();

        let on_means = cal_state_means(on)?;
        let off_means = cal_state_means(off)?;
        let f_cal = derive_conversion_factor(&on_means, &off_means, &expected, self.params.gain);
        let psr_cal = cal_state_means(cal_archive)?;
        Ok(Some(jy_per_count(
            &f_cal,
            &cal_freqs,
            &psr_cal,
            &target_freqs,
        )?))
    }

    fn output_path(&self, input: &Path, archive: &Archive) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut name = format!(
            "{}_{}_{}_{}",
            self.params.pulsar,
            archive.header.start_mjd,
            archive.header.frontend,
            obs_number(&stem)
        );
        if let Some(ext) = input.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        self.params.output_dir.join(name)
    }

    fn candidate_files(&self) -> Result<Vec<PathBuf>, FluxCalError> {
        let mut files = vec![];
        for dir in &self.params.data_dirs {
            let pattern = dir.join("*.json");
            let paths = glob::glob(&pattern.to_string_lossy()).map_err(|source| {
                FluxCalError::Glob {
                    path: dir.clone(),
                    source,
                }
            })?;
            files.extend(paths.flatten());
        }
        files.sort();
        Ok(files)
    }

    /// Calibrate every science archive of the target pulsar. Pulsar cal
    /// scans encountered in file order establish the conversion factor for
    /// the science files that follow them; cached factors from an earlier run
    /// are replayed against the science epochs in order.
    pub fn run(&self) -> Result<FluxCalReport, FluxCalError> {
        let catalogue = Catalogue::load(&self.params.catalogue)?;
        let pairs = self.calibrator_pairs(&catalogue)?;

        let cached = self
            .store
            .read_versioned::<FactorsCheckpoint>(&self.factors_checkpoint_name())?;
        let mut cache_cursor = 0usize;

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
        pb.set_message("Calibrating");

        let mut report = FluxCalReport::default();
        let mut current: Option<Array2<f64>> = None;
        let mut derived_epochs: Vec<i64> = vec![];
        let mut derived_factors: Vec<Array2<f64>> = vec![];

        for path in files {
            pb.inc(1);
            let archive = match Archive::load(&path) {
                Ok(a) => a,
                Err(e) => {
                    debug!("{}: unreadable ({e}); skipping", path.display());
                    report.skipped += 1;
                    continue;
                }
            };
            if archive.header.source != self.params.pulsar {
                trace!("{}: not {}; skipping", path.display(), self.params.pulsar);
                report.skipped += 1;
                continue;
            }

            match archive.header.obs_mode {
                ObsMode::Cal => {
                    if cached.is_some() {
                        trace!(
                            "{}: cal scan ignored; replaying cached factors",
                            path.display()
                        );
                        continue;
                    }
                    let mjd = archive.header.start_mjd;
                    match self.factor_from_cal_scan(&catalogue, &pairs, archive)? {
                        Some(factor) => {
                            derived_epochs.push(mjd);
                            derived_factors.push(factor.clone());
                            current = Some(factor);
                        }
                        None => current = None,
                    }
                }
                ObsMode::Psr => {
                    let mut archive = archive;
                    // With a factor cache, walk this file's epoch against the
                    // cached epoch list in order; an exhausted cursor leaves
                    // the remaining files uncalibrated.
                    let factor = match &cached {
                        Some(cache) => {
                            let mjd = archive.header.start_mjd;
                            while cache_cursor < cache.epochs.len()
                                && cache.epochs[cache_cursor] != mjd
                            {
                                cache_cursor += 1;
                            }
                            cache.factors.get(cache_cursor)
                        }
                        None => current.as_ref(),
                    };
                    match factor {
                        Some(factor) => {
                            apply_conversion_factor(&mut archive, factor)?;
                            trace!("{}: calibrated", path.display());
                            archive.write(&self.output_path(&path, &archive))?;
                            report.calibrated += 1;
                        }
                        None => {
                            if self.params.skip_uncalibrated {
                                warn!("{}: no calibration available; skipping", path.display());
                                report.skipped += 1;
                            } else {
                                warn!(
                                    "{}: no calibration available; writing through uncalibrated",
                                    path.display()
                                );
                                archive.write(&self.output_path(&path, &archive))?;
                                report.uncalibrated += 1;
                            }
                        }
                    }
                }
            }
        }
        pb.finish_and_clear();

        if !derived_epochs.is_empty() {
            self.store.write(
                &self.factors_checkpoint_name(),
                &FactorsCheckpoint {
                    version: CHECKPOINT_VERSION,
                    epochs: derived_epochs,
                    factors: derived_factors,
                },
            )?;
        }

        info!(
            "Flux calibration of {}: {} calibrated, {} uncalibrated, {} skipped",
            self.params.pulsar, report.calibrated, report.uncalibrated, report.skipped
        );
        Ok(report)
    }
}
