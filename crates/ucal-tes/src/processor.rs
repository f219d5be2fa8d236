//! Batch driver over a catalog.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use ucal_catalog::{CatalogSearch, CatalogView, ScanSpan};
use ucal_core::errors::{ErrorInfo, UcalError};
use ucal_core::{MetaValue, RunRecord};

use crate::engine::DetectorEngine;
use crate::layout::RunLayout;
use crate::loader::{AnalysisLoader, LoaderStats};
use crate::pipeline::{PipelineOptions, PipelineOutcome, PipelineReport, ProcessingPipeline};

/// Baseline sensor read by the ADR health check.
pub const ADR_SENSOR: &str = "adr_heater";

fn default_true() -> bool {
    true
}

fn default_adr_threshold() -> f64 {
    0.1
}

fn default_adr_sensor() -> String {
    ADR_SENSOR.to_string()
}

/// Batch-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Skip runs whose last ADR reading is below `adr_threshold`.
    #[serde(default = "default_true")]
    pub skip_bad_adr: bool,
    /// Minimum last ADR reading for a run to be processed.
    #[serde(default = "default_adr_threshold")]
    pub adr_threshold: f64,
    /// Baseline sensor holding the ADR readings.
    #[serde(default = "default_adr_sensor")]
    pub adr_sensor: String,
    /// Per-run pipeline options.
    #[serde(default)]
    pub pipeline: PipelineOptions,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            skip_bad_adr: true,
            adr_threshold: default_adr_threshold(),
            adr_sensor: default_adr_sensor(),
            pipeline: PipelineOptions::default(),
        }
    }
}

/// What happened to one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Processed and persisted.
    Processed(PipelineReport),
    /// Output existed and overwriting was not requested; nothing was loaded.
    AlreadyDone {
        /// Existing array container.
        save_file: PathBuf,
    },
    /// Skipped because the ADR was not regulating.
    SkippedAdr {
        /// Last ADR reading.
        value: f64,
    },
}

/// Outcome of one run in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run uid.
    pub uid: String,
    /// Run scan id.
    pub scan_id: i64,
    /// What happened.
    pub outcome: RunOutcome,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Per-run outcomes in processing order.
    pub runs: Vec<RunReport>,
    /// Loader cache counters at the end of the batch.
    pub loader: LoaderStats,
}

impl BatchReport {
    fn count(&self, predicate: impl Fn(&RunOutcome) -> bool) -> usize {
        self.runs.iter().filter(|run| predicate(&run.outcome)).count()
    }

    /// Runs processed and persisted.
    pub fn processed(&self) -> usize {
        self.count(|outcome| matches!(outcome, RunOutcome::Processed(_)))
    }

    /// Runs whose output already existed.
    pub fn already_done(&self) -> usize {
        self.count(|outcome| matches!(outcome, RunOutcome::AlreadyDone { .. }))
    }

    /// Runs skipped by the ADR check.
    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, RunOutcome::SkippedAdr { .. }))
    }
}

/// Calibration id applied to runs of a noise partition that record no `last_cal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultCalibration {
    /// No run in the partition references a calibration.
    None,
    /// Every referencing run points at the same calibration.
    Unique(String),
    /// Runs reference several calibrations; no default can be chosen.
    Ambiguous(Vec<String>),
}

impl DefaultCalibration {
    /// Derives the default from the distinct `last_cal` values of `catalog`.
    pub fn of<C: CatalogSearch>(catalog: &C) -> Self {
        let mut ids: Vec<String> = catalog
            .list_distinct_values("last_cal")
            .into_iter()
            .filter_map(|value| match value {
                MetaValue::Str(id) => Some(id),
                _ => None,
            })
            .collect();
        match ids.len() {
            0 => DefaultCalibration::None,
            1 => DefaultCalibration::Unique(ids.remove(0)),
            _ => DefaultCalibration::Ambiguous(ids),
        }
    }
}

/// Per-run processed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedStatus {
    /// Run uid.
    pub uid: String,
    /// Run scan id.
    pub scan_id: i64,
    /// Expected array container.
    pub save_file: PathBuf,
    /// Whether the container exists.
    pub processed: bool,
}

/// Reports, per run, whether its array container exists.
pub fn check_processed(
    catalog: &CatalogView,
    layout: &dyn RunLayout,
) -> Result<Vec<ProcessedStatus>, UcalError> {
    catalog
        .runs()
        .map(|run| {
            let save_file = layout.analyzed_file(run)?;
            Ok(ProcessedStatus {
                uid: run.uid().to_string(),
                scan_id: run.scan_id(),
                processed: save_file.exists(),
                save_file,
            })
        })
        .collect()
}

/// Drives the pipeline over catalogs with one engine and layout.
pub struct CatalogProcessor<'a> {
    engine: &'a dyn DetectorEngine,
    layout: &'a dyn RunLayout,
    config: ProcessorConfig,
}

impl<'a> CatalogProcessor<'a> {
    /// Creates a processor.
    pub fn new(
        engine: &'a dyn DetectorEngine,
        layout: &'a dyn RunLayout,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            engine,
            layout,
            config,
        }
    }

    /// Batch settings.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Loader suitable for [`CatalogProcessor::process_run`].
    pub fn loader(&self) -> AnalysisLoader<'a> {
        AnalysisLoader::new(self.engine, self.layout)
    }

    /// Processes one run with `loader`.
    ///
    /// When the run's output already exists and overwriting is off, the run
    /// is reported done without touching the loader.
    pub fn process_run(
        &self,
        loader: &mut AnalysisLoader<'_>,
        run: &Arc<RunRecord>,
        calibration: Option<&Arc<RunRecord>>,
    ) -> Result<RunOutcome, UcalError> {
        let options = &self.config.pipeline;
        let save_file = self.layout.analyzed_file(run)?;
        if save_file.exists() && !options.overwrite {
            info!(scan_id = run.scan_id(), save_file = %save_file.display(), "already processed");
            return Ok(RunOutcome::AlreadyDone { save_file });
        }
        let (raw, calibration) = loader.get_objects(run, calibration)?;
        let pipeline = ProcessingPipeline::new(options, self.layout);
        Ok(match pipeline.process(raw, calibration)? {
            PipelineOutcome::Persisted(report) => RunOutcome::Processed(report),
            PipelineOutcome::AlreadyDone { save_file } => RunOutcome::AlreadyDone { save_file },
        })
    }

    /// Processes every run of `catalog`, one noise environment at a time.
    ///
    /// Calibration runs are looked up in `parent_catalog` when given, else in
    /// `catalog` itself; a calibration filtered out of `catalog` is never used
    /// implicitly. Fatal errors abort the batch; outputs already written stay
    /// in place.
    pub fn process_catalog(
        &self,
        catalog: &CatalogView,
        parent_catalog: Option<&CatalogView>,
    ) -> Result<BatchReport, UcalError> {
        let lookup = parent_catalog.unwrap_or(catalog);
        let mut loader = self.loader();
        let mut report = BatchReport::default();

        for noise_catalog in catalog.get_noise_catalogs()? {
            if let Some(span) = ScanSpan::of(&noise_catalog) {
                info!(first = span.first, last = span.last, runs = noise_catalog.len(), "processing noise partition");
            }
            let default = DefaultCalibration::of(&noise_catalog);
            for run in noise_catalog.runs() {
                if let Some(value) = self.check_adr(run)? {
                    report.runs.push(RunReport {
                        uid: run.uid().to_string(),
                        scan_id: run.scan_id(),
                        outcome: RunOutcome::SkippedAdr { value },
                    });
                    continue;
                }
                let calibration = resolve_calibration(run, &default, lookup)?;
                let outcome = self.process_run(&mut loader, run, calibration.as_ref())?;
                report.runs.push(RunReport {
                    uid: run.uid().to_string(),
                    scan_id: run.scan_id(),
                    outcome,
                });
            }
        }
        report.loader = loader.stats();
        info!(
            processed = report.processed(),
            already_done = report.already_done(),
            skipped = report.skipped(),
            loads = report.loader.loads(),
            "batch finished"
        );
        Ok(report)
    }

    /// Returns the ADR reading when the run must be skipped.
    fn check_adr(&self, run: &RunRecord) -> Result<Option<f64>, UcalError> {
        if !self.config.skip_bad_adr {
            return Ok(None);
        }
        let Some(value) = run.last_baseline_value(&self.config.adr_sensor) else {
            error!(
                scan_id = run.scan_id(),
                sensor = %self.config.adr_sensor,
                "run has no ADR data in baseline but the ADR check was requested, aborting"
            );
            return Err(UcalError::Instrument(
                ErrorInfo::new("processor.adr_missing", "baseline lacks the ADR series")
                    .with_context("uid", run.uid())
                    .with_context("scan_id", run.scan_id().to_string())
                    .with_context("sensor", self.config.adr_sensor.clone())
                    .with_hint("disable skip_bad_adr to process runs without ADR data"),
            ));
        };
        if value < self.config.adr_threshold {
            warn!(scan_id = run.scan_id(), value, "last ADR value below threshold, skipping");
            return Ok(Some(value));
        }
        Ok(None)
    }
}

/// Calibration run for `run` within a batch.
///
/// `None` leaves resolution to the loader, which treats calibration runs as
/// their own calibration and fails for anything else. A calibration run is
/// fitted on its own lines even when it records the previous `last_cal`.
fn resolve_calibration(
    run: &RunRecord,
    default: &DefaultCalibration,
    lookup: &CatalogView,
) -> Result<Option<Arc<RunRecord>>, UcalError> {
    if run.is_calibration() {
        return Ok(None);
    }
    let cal_id = match (run.last_cal(), default) {
        (Some(id), _) => id,
        (None, DefaultCalibration::Unique(id)) => id.as_str(),
        (None, DefaultCalibration::None) => return Ok(None),
        (None, DefaultCalibration::Ambiguous(ids)) => {
            return Err(UcalError::Lookup(
                ErrorInfo::new(
                    "calibration.ambiguous_default",
                    "run records no last_cal and its noise partition references several calibrations",
                )
                .with_context("uid", run.uid())
                .with_context("scan_id", run.scan_id().to_string())
                .with_context("candidates", ids.join(",")),
            ))
        }
    };
    lookup.lookup(cal_id).map(|found| Some(Arc::clone(found)))
}
