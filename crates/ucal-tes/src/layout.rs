//! Raw and processed directory layout.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use ucal_core::errors::{ErrorInfo, UcalError};
use ucal_core::RunRecord;

fn default_raw_root() -> PathBuf {
    PathBuf::from("/nsls2/data/sst/legacy/ucal/raw")
}

fn default_processed_root() -> PathBuf {
    PathBuf::from("/nsls2/data/sst/legacy/ucal/processed")
}

fn default_line_names() -> Vec<String> {
    ["ck", "nk", "ok", "fela", "nila", "cula"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Directory roots and calibration line set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Root of the raw detector data tree.
    #[serde(default = "default_raw_root")]
    pub raw_root: PathBuf,
    /// Root of the processed output tree.
    #[serde(default = "default_processed_root")]
    pub processed_root: PathBuf,
    /// Spectral lines expected in calibration runs.
    #[serde(default = "default_line_names")]
    pub line_names: Vec<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            raw_root: default_raw_root(),
            processed_root: default_processed_root(),
            line_names: default_line_names(),
        }
    }
}

fn detector_error(run: &RunRecord) -> UcalError {
    UcalError::Instrument(
        ErrorInfo::new("layout.detector", "run carries no TES detector configuration")
            .with_context("uid", run.uid())
            .with_context("scan_id", run.scan_id().to_string()),
    )
}

/// Path construction for a run's inputs and outputs.
pub trait RunLayout {
    /// Directory holding the raw data of the run's acquisition day.
    fn raw_directory(&self, run: &RunRecord) -> Result<PathBuf, UcalError>;

    /// Raw detector file of the run, re-rooted under the local raw tree.
    fn source_file(&self, run: &RunRecord) -> Result<PathBuf, UcalError>;

    /// Directory processed outputs of the run land in.
    fn save_directory(&self, run: &RunRecord) -> Result<PathBuf, UcalError>;

    /// Array container written for the run's state.
    fn analyzed_file(&self, run: &RunRecord) -> Result<PathBuf, UcalError>;

    /// Spectral lines expected in a calibration run.
    fn line_names(&self, calibration: &RunRecord) -> Vec<String>;

    /// State label of the run inside its source file.
    fn state(&self, run: &RunRecord) -> Result<String, UcalError> {
        run.state_label().ok_or_else(|| detector_error(run))
    }

    /// Metadata sidecar written next to an array container.
    fn sidecar_file(&self, analyzed: &Path) -> PathBuf {
        analyzed.with_extension("yaml")
    }

    /// Calibration file for `state` of `source`, stored in `save_dir`.
    fn calibration_file(&self, source: &Path, state: &str, save_dir: &Path) -> PathBuf {
        save_dir.join(format!("{}_{state}_cal.hdf5", source_base(source)))
    }
}

/// Source file name with its trailing `_<segment>` removed (`run_chan1.off` → `run`).
pub fn source_base(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.rsplit_once('_') {
        Some((base, _)) if !base.is_empty() => base.to_string(),
        _ => source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or(name),
    }
}

/// Date-partitioned layout used at the beamline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacilityLayout {
    config: LayoutConfig,
}

impl FacilityLayout {
    /// Creates a layout over the configured roots.
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Underlying configuration.
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    fn date_dir(&self, root: &Path, run: &RunRecord) -> Result<PathBuf, UcalError> {
        let date = acquisition_date(run)?;
        Ok(root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day())))
    }
}

fn acquisition_date(run: &RunRecord) -> Result<DateTime<Utc>, UcalError> {
    let time = run.time().ok_or_else(|| {
        UcalError::Catalog(
            ErrorInfo::new("layout.time", "start document lacks an acquisition time")
                .with_context("uid", run.uid()),
        )
    })?;
    DateTime::<Utc>::from_timestamp(time.floor() as i64, 0).ok_or_else(|| {
        UcalError::Catalog(
            ErrorInfo::new("layout.time", "acquisition time out of range")
                .with_context("uid", run.uid())
                .with_context("time", time.to_string()),
        )
    })
}

impl RunLayout for FacilityLayout {
    fn raw_directory(&self, run: &RunRecord) -> Result<PathBuf, UcalError> {
        self.date_dir(&self.config.raw_root, run)
    }

    fn source_file(&self, run: &RunRecord) -> Result<PathBuf, UcalError> {
        let detector = run.detector().ok_or_else(|| detector_error(run))?;
        let recorded = &detector.tes_filename;
        let name = recorded.file_name().ok_or_else(|| {
            UcalError::Instrument(
                ErrorInfo::new("layout.source", "recorded TES filename has no file name")
                    .with_context("path", recorded.display().to_string()),
            )
        })?;
        let mut path = self.raw_directory(run)?;
        if let Some(run_dir) = recorded.parent().and_then(Path::file_name) {
            path.push(run_dir);
        }
        path.push(name);
        Ok(path)
    }

    fn save_directory(&self, run: &RunRecord) -> Result<PathBuf, UcalError> {
        self.date_dir(&self.config.processed_root, run)
    }

    fn analyzed_file(&self, run: &RunRecord) -> Result<PathBuf, UcalError> {
        let state = self.state(run)?;
        Ok(self
            .save_directory(run)?
            .join(format!("scan{:04}_{state}.npz", run.scan_id())))
    }

    fn line_names(&self, _calibration: &RunRecord) -> Vec<String> {
        self.config.line_names.clone()
    }
}
