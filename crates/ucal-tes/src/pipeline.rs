//! Drift correction, calibration and persistence of one run.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ucal_catalog::hash::stable_hash_string;
use ucal_catalog::serde::to_yaml_string;
use ucal_core::errors::{ErrorInfo, UcalError};
use ucal_core::{ProcessProvenance, SchemaVersion};

use crate::engine::{FitRequest, SharedDataset, ATTR_DRIFT_CORRECTED, ATTR_RAW};
use crate::layout::RunLayout;
use crate::loader::{CalibrationInfo, RawData};
use crate::npz::{write_npz, TesArrays};

/// Schema of the metadata sidecar.
pub const SIDECAR_SCHEMA: SchemaVersion = SchemaVersion::new(1, 0, 0);

fn io_error(code: &str, path: &Path, err: impl ToString) -> UcalError {
    UcalError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

fn default_true() -> bool {
    true
}

fn default_rms_cutoff() -> f64 {
    0.2
}

/// Pulse attribute the calibration is fitted on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Attribute {
    /// Drift-corrected values when available, raw filtered values otherwise.
    #[default]
    Auto,
    /// Explicit attribute name.
    Named(String),
}

impl Attribute {
    /// Concrete attribute name given the dataset's drift-correction state.
    pub fn resolve(&self, drift_corrected: bool) -> String {
        match self {
            Attribute::Auto if drift_corrected => ATTR_DRIFT_CORRECTED.to_string(),
            Attribute::Auto => ATTR_RAW.to_string(),
            Attribute::Named(name) => name.clone(),
        }
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        if value == "auto" {
            Attribute::Auto
        } else {
            Attribute::Named(value)
        }
    }
}

impl From<Attribute> for String {
    fn from(value: Attribute) -> Self {
        value.to_string()
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Auto => f.write_str("auto"),
            Attribute::Named(name) => f.write_str(name),
        }
    }
}

/// Knobs of the per-run pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Refit the calibration even when one is present.
    #[serde(default)]
    pub redo: bool,
    /// Rewrite outputs that already exist.
    #[serde(default)]
    pub overwrite: bool,
    /// Learn a drift correction before calibrating.
    #[serde(default = "default_true")]
    pub drift_correct: bool,
    /// Relearn the drift correction even when one is present.
    #[serde(default)]
    pub force_drift_correct: bool,
    /// Residual cutoff handed to the calibration fit.
    #[serde(default = "default_rms_cutoff")]
    pub rms_cutoff: f64,
    /// Attribute the calibration is fitted on.
    #[serde(default)]
    pub attribute: Attribute,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            redo: false,
            overwrite: false,
            drift_correct: true,
            force_drift_correct: false,
            rms_cutoff: default_rms_cutoff(),
            attribute: Attribute::Auto,
        }
    }
}

/// Channel bookkeeping of one persisted output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    /// Channels in the dataset.
    pub total: usize,
    /// Channels that failed extraction and were marked bad.
    pub bad: Vec<u32>,
}

/// Sidecar document written next to every array container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetadata {
    /// Sidecar schema.
    pub schema: SchemaVersion,
    /// State segment the arrays were extracted from.
    pub state: String,
    /// Raw detector file.
    pub source_file: PathBuf,
    /// State the calibration was fitted on.
    pub calibration_state: String,
    /// Calibration file applied.
    pub calibration_file: PathBuf,
    /// Attribute the calibration was fitted on.
    pub attribute: String,
    /// Residual cutoff of the fit.
    pub rms_cutoff: f64,
    /// Whether drift correction had been learned.
    pub drift_corrected: bool,
    /// Expected spectral lines.
    pub line_names: Vec<String>,
    /// Channel bookkeeping.
    pub channels: ChannelCounts,
    /// Number of persisted pulses.
    pub samples: usize,
    /// Parameter hash, creation time and tool versions.
    pub provenance: ProcessProvenance,
}

#[derive(Serialize)]
struct HashedParams<'p> {
    state: &'p str,
    source_file: &'p Path,
    calibration_state: &'p str,
    calibration_file: &'p Path,
    attribute: &'p str,
    rms_cutoff: f64,
    drift_corrected: bool,
    line_names: &'p [String],
}

/// Files and counts of one persisted output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistReport {
    /// Array container.
    pub save_file: PathBuf,
    /// Metadata sidecar.
    pub sidecar: PathBuf,
    /// Pulses written.
    pub samples: usize,
    /// Channels skipped after failing extraction.
    pub bad_channels: Vec<u32>,
}

/// What the pipeline did for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// A calibration fit ran for this run.
    pub calibrated: bool,
    /// Arrays of the calibration run, written right after a fit.
    pub calibration_arrays: Option<PersistReport>,
    /// Arrays of the run itself.
    pub arrays: PersistReport,
}

/// Result of [`ProcessingPipeline::process`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// The save file existed and overwriting was not requested.
    AlreadyDone {
        /// Existing array container.
        save_file: PathBuf,
    },
    /// The run was processed and persisted.
    Persisted(PipelineReport),
}

struct ArrayJob<'j> {
    dataset: &'j SharedDataset,
    state: &'j str,
    source_file: &'j Path,
    save_file: &'j Path,
}

/// Sequences the engine calls for one run against its calibration context.
pub struct ProcessingPipeline<'a> {
    options: &'a PipelineOptions,
    layout: &'a dyn RunLayout,
}

impl<'a> ProcessingPipeline<'a> {
    /// Creates a pipeline with the given options and layout.
    pub fn new(options: &'a PipelineOptions, layout: &'a dyn RunLayout) -> Self {
        Self { options, layout }
    }

    /// Runs drift correction, calibration and persistence for `raw`.
    pub fn process(
        &self,
        raw: &RawData,
        calibration: &CalibrationInfo,
    ) -> Result<PipelineOutcome, UcalError> {
        if raw.save_file().exists() && !self.options.overwrite {
            info!(save_file = %raw.save_file().display(), "already processed, not overwriting");
            return Ok(PipelineOutcome::AlreadyDone {
                save_file: raw.save_file().to_path_buf(),
            });
        }
        info!(source = %raw.source().display(), state = %raw.state(), "processing");

        if self.options.drift_correct {
            self.drift_correct(raw.dataset())?;
            if !Rc::ptr_eq(raw.dataset(), calibration.dataset()) {
                self.drift_correct(calibration.dataset())?;
            }
        }

        let (calibrated, calibration_arrays) = self.calibrate(raw, calibration)?;

        let arrays = match &calibration_arrays {
            // a calibration run processed against itself was just written
            Some(report) if report.save_file == raw.save_file() => report.clone(),
            _ => self.write_arrays(
                &ArrayJob {
                    dataset: raw.dataset(),
                    state: raw.state(),
                    source_file: raw.source(),
                    save_file: raw.save_file(),
                },
                calibration,
            )?,
        };
        Ok(PipelineOutcome::Persisted(PipelineReport {
            calibrated,
            calibration_arrays,
            arrays,
        }))
    }

    fn drift_correct(&self, dataset: &SharedDataset) -> Result<(), UcalError> {
        let mut group = dataset.borrow_mut();
        if group.is_drift_corrected() && !self.options.force_drift_correct {
            debug!("drift correction already learned");
            return Ok(());
        }
        info!("learning drift correction");
        group.learn_drift_correction()
    }

    fn calibrate(
        &self,
        raw: &RawData,
        calibration: &CalibrationInfo,
    ) -> Result<(bool, Option<PersistReport>), UcalError> {
        let mut fitted = false;
        let mut calibration_arrays = None;
        if !calibration.calibrated() || self.options.redo {
            let attribute = self.options.attribute.resolve(calibration.drift_corrected());
            info!(state = %calibration.state(), attribute = %attribute, "fitting calibration");
            let cal_file = calibration.calibration_file();
            {
                let mut group = calibration.dataset().borrow_mut();
                group.fit_calibration(&FitRequest {
                    state: calibration.state(),
                    line_names: calibration.line_names(),
                    attribute: &attribute,
                    rms_cutoff: self.options.rms_cutoff,
                })?;
                if let Some(parent) = cal_file.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|err| io_error("pipeline.cal_dir", parent, err))?;
                }
                group.save_calibration(cal_file)?;
            }
            fitted = true;
            calibration_arrays = self.persist_calibration_run(calibration)?;
        } else {
            debug!(state = %calibration.state(), "calibration already present");
        }

        if fitted || !raw.calibration_loaded(calibration) {
            info!(
                state = %raw.state(),
                calibration_file = %calibration.calibration_file().display(),
                "loading calibration"
            );
            raw.dataset()
                .borrow_mut()
                .load_calibration(calibration.calibration_file())?;
        } else {
            debug!(state = %raw.state(), "calibration already loaded");
        }
        Ok((fitted, calibration_arrays))
    }

    fn persist_calibration_run(
        &self,
        calibration: &CalibrationInfo,
    ) -> Result<Option<PersistReport>, UcalError> {
        if calibration.save_file().exists() && !self.options.overwrite {
            debug!(save_file = %calibration.save_file().display(), "calibration arrays already saved");
            return Ok(None);
        }
        self.write_arrays(
            &ArrayJob {
                dataset: calibration.dataset(),
                state: calibration.state(),
                source_file: calibration.source(),
                save_file: calibration.save_file(),
            },
            calibration,
        )
        .map(Some)
    }

    fn write_arrays(
        &self,
        job: &ArrayJob<'_>,
        calibration: &CalibrationInfo,
    ) -> Result<PersistReport, UcalError> {
        let (arrays, counts) = collect_sorted(job.dataset, job.state);
        if arrays.is_empty() {
            warn!(state = %job.state, "no samples extracted");
        }
        let drift_corrected = job.dataset.borrow().is_drift_corrected();
        let attribute = self.options.attribute.resolve(calibration.drift_corrected());
        let params = HashedParams {
            state: job.state,
            source_file: job.source_file,
            calibration_state: calibration.state(),
            calibration_file: calibration.calibration_file(),
            attribute: &attribute,
            rms_cutoff: self.options.rms_cutoff,
            drift_corrected,
            line_names: calibration.line_names(),
        };
        let params_hash = stable_hash_string(&params)?;
        let metadata = ProcessMetadata {
            schema: SIDECAR_SCHEMA,
            state: job.state.to_string(),
            source_file: job.source_file.to_path_buf(),
            calibration_state: calibration.state().to_string(),
            calibration_file: calibration.calibration_file().to_path_buf(),
            attribute,
            rms_cutoff: self.options.rms_cutoff,
            drift_corrected,
            line_names: calibration.line_names().to_vec(),
            channels: counts,
            samples: arrays.len(),
            provenance: ProcessProvenance {
                params_hash,
                created_at: Utc::now().to_rfc3339(),
                tool_versions: BTreeMap::from([(
                    env!("CARGO_PKG_NAME").to_string(),
                    env!("CARGO_PKG_VERSION").to_string(),
                )]),
            },
        };

        // sidecar before the array container; the container marks completion
        let sidecar = self.layout.sidecar_file(job.save_file);
        if let Some(parent) = sidecar.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error("pipeline.save_dir", parent, err))?;
        }
        fs::write(&sidecar, to_yaml_string(&metadata)?)
            .map_err(|err| io_error("pipeline.sidecar", &sidecar, err))?;
        write_npz(job.save_file, &arrays)?;
        info!(
            save_file = %job.save_file.display(),
            samples = arrays.len(),
            bad_channels = metadata.channels.bad.len(),
            "saved TES arrays"
        );
        Ok(PersistReport {
            save_file: job.save_file.to_path_buf(),
            sidecar,
            samples: arrays.len(),
            bad_channels: metadata.channels.bad,
        })
    }
}

/// Extracts every channel for `state`, marking failing channels bad, and
/// returns the pulses sorted by timestamp.
fn collect_sorted(dataset: &SharedDataset, state: &str) -> (TesArrays, ChannelCounts) {
    let mut group = dataset.borrow_mut();
    let channels = group.channels();
    let mut rows: Vec<(i64, f64, i64)> = Vec::new();
    let mut bad = Vec::new();
    for &channel in &channels {
        let extracted = group.extract(channel, state).and_then(|samples| {
            if samples.timestamps.len() == samples.energies.len() {
                Ok(samples)
            } else {
                Err(UcalError::Engine(
                    ErrorInfo::new("engine.extract_shape", "timestamps and energies differ in length")
                        .with_context("channel", channel.to_string()),
                ))
            }
        });
        match extracted {
            Ok(samples) => rows.extend(
                samples
                    .timestamps
                    .into_iter()
                    .zip(samples.energies)
                    .map(|(timestamp, energy)| (timestamp, energy, i64::from(channel))),
            ),
            Err(err) => {
                warn!(channel, state = %state, error = %err, "channel failed extraction, marking bad");
                group.mark_bad(channel, "failed to get energy");
                bad.push(channel);
            }
        }
    }
    rows.sort_by_key(|row| row.0);

    let mut arrays = TesArrays::default();
    for (timestamp, energy, channel) in rows {
        arrays.timestamps.push(timestamp);
        arrays.energies.push(energy);
        arrays.channels.push(channel);
    }
    (
        arrays,
        ChannelCounts {
            total: channels.len(),
            bad,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_attribute_follows_drift_state() {
        assert_eq!(Attribute::Auto.resolve(true), ATTR_DRIFT_CORRECTED);
        assert_eq!(Attribute::Auto.resolve(false), ATTR_RAW);
        assert_eq!(Attribute::Named("pulseRMS".into()).resolve(true), "pulseRMS");
    }

    #[test]
    fn options_fill_defaults_from_yaml() {
        let options: PipelineOptions = serde_yaml::from_str("redo: true\nattribute: filtValue\n").unwrap();
        assert!(options.redo);
        assert!(options.drift_correct);
        assert_eq!(options.rms_cutoff, 0.2);
        assert_eq!(options.attribute, Attribute::Named("filtValue".into()));
        let text = serde_yaml::to_string(&PipelineOptions::default()).unwrap();
        assert!(text.contains("attribute: auto"));
    }
}
