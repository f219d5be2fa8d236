//! Cached resolution of a run into its raw dataset and calibration context.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ucal_catalog::CatalogView;
use ucal_core::errors::UcalError;
use ucal_core::RunRecord;

use crate::cache::{CacheOutcome, CacheStats, SlotCache};
use crate::engine::{share, DetectorEngine, SharedDataset};
use crate::layout::RunLayout;
use crate::resolver::CalibrationResolver;

/// Raw dataset of the run currently being processed.
#[derive(Clone)]
pub struct RawData {
    source: PathBuf,
    state: String,
    save_file: PathBuf,
    dataset: SharedDataset,
}

impl RawData {
    /// Raw detector file the dataset was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// State segment of the current run.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Array container the current run is persisted to.
    pub fn save_file(&self) -> &Path {
        &self.save_file
    }

    /// Loaded dataset.
    pub fn dataset(&self) -> &SharedDataset {
        &self.dataset
    }

    /// True once drift correction has been learned on the dataset.
    pub fn drift_corrected(&self) -> bool {
        self.dataset.borrow().is_drift_corrected()
    }

    /// True when `calibration`'s calibration file is the one applied to the dataset.
    pub fn calibration_loaded(&self, calibration: &CalibrationInfo) -> bool {
        self.dataset.borrow().loaded_calibration() == Some(calibration.calibration_file())
    }

    fn update(&mut self, state: String, save_file: PathBuf) {
        self.state = state;
        self.save_file = save_file;
    }
}

/// Calibration run context bound to an already loaded dataset.
#[derive(Clone)]
pub struct CalibrationInfo {
    source: PathBuf,
    state: String,
    save_file: PathBuf,
    save_dir: PathBuf,
    line_names: Vec<String>,
    calibration_file: PathBuf,
    dataset: SharedDataset,
    dataset_source: PathBuf,
}

impl CalibrationInfo {
    /// Raw detector file of the calibration run.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// State segment holding the calibration lines.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Array container of the calibration run itself.
    pub fn save_file(&self) -> &Path {
        &self.save_file
    }

    /// Directory calibration artefacts are written to.
    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Expected spectral lines, in order.
    pub fn line_names(&self) -> &[String] {
        &self.line_names
    }

    /// File the fitted calibration is saved to and loaded from.
    pub fn calibration_file(&self) -> &Path {
        &self.calibration_file
    }

    /// Dataset the calibration is fitted on.
    pub fn dataset(&self) -> &SharedDataset {
        &self.dataset
    }

    /// True when the dataset holds a calibration for this state.
    pub fn calibrated(&self) -> bool {
        self.dataset.borrow().has_calibration(&self.state)
    }

    /// True once drift correction has been learned on the dataset.
    pub fn drift_corrected(&self) -> bool {
        self.dataset.borrow().is_drift_corrected()
    }

    /// Raw file the bound dataset was loaded from.
    pub fn dataset_source(&self) -> &Path {
        &self.dataset_source
    }

    fn rebind(&mut self, raw: &RawData) {
        self.dataset = Rc::clone(&raw.dataset);
        self.dataset_source = raw.source.clone();
    }
}

struct CalibrationTarget {
    state: String,
    save_file: PathBuf,
    save_dir: PathBuf,
    line_names: Vec<String>,
    calibration_file: PathBuf,
}

impl CalibrationInfo {
    fn apply(&mut self, target: CalibrationTarget) {
        self.state = target.state;
        self.save_file = target.save_file;
        self.save_dir = target.save_dir;
        self.line_names = target.line_names;
        self.calibration_file = target.calibration_file;
    }
}

/// Cache counters of one loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    /// Raw dataset slot.
    pub raw: CacheStats,
    /// Calibration context slot.
    pub calibration: CacheStats,
    /// Raw slot misses served by the dataset the calibration context held.
    #[serde(default)]
    pub shared: usize,
}

impl LoaderStats {
    /// Number of full dataset loads performed.
    pub fn loads(&self) -> usize {
        self.raw.misses - self.shared
    }
}

/// Keeps the most recently loaded dataset and calibration context, keyed by
/// source file, so consecutive runs from one file share a single load.
pub struct AnalysisLoader<'a> {
    engine: &'a dyn DetectorEngine,
    layout: &'a dyn RunLayout,
    resolver: CalibrationResolver<'a>,
    raw: SlotCache<PathBuf, RawData>,
    calibration: SlotCache<PathBuf, CalibrationInfo>,
    shared: usize,
}

impl<'a> AnalysisLoader<'a> {
    /// Creates an empty loader.
    pub fn new(engine: &'a dyn DetectorEngine, layout: &'a dyn RunLayout) -> Self {
        Self {
            engine,
            layout,
            resolver: CalibrationResolver::detached(),
            raw: SlotCache::new(),
            calibration: SlotCache::new(),
            shared: 0,
        }
    }

    /// Looks `last_cal` references up in `catalog` when no override is given.
    pub fn with_catalog(mut self, catalog: &'a CatalogView) -> Self {
        self.resolver = CalibrationResolver::new(catalog);
        self
    }

    /// Layout used for path construction.
    pub fn layout(&self) -> &'a dyn RunLayout {
        self.layout
    }

    /// Cache counters so far.
    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            raw: self.raw.stats(),
            calibration: self.calibration.stats(),
            shared: self.shared,
        }
    }

    /// Resolves `run` into its raw dataset and calibration context.
    ///
    /// The dataset is loaded only when the run's source file differs from the
    /// cached one and the calibration context does not already hold it. A new
    /// calibration context is bound to the current dataset handle; when the
    /// calibration source is unchanged the held context is updated in place
    /// and rebound if its file is the one just loaded, so one file never has
    /// two live loads.
    pub fn get_objects(
        &mut self,
        run: &Arc<RunRecord>,
        calibration_override: Option<&Arc<RunRecord>>,
    ) -> Result<(&RawData, &CalibrationInfo), UcalError> {
        let source = self.layout.source_file(run)?;
        let state = self.layout.state(run)?;
        let save_file = self.layout.analyzed_file(run)?;

        let held = self
            .calibration
            .value()
            .filter(|info| info.dataset_source == source)
            .map(|info| Rc::clone(&info.dataset));
        let engine = self.engine;
        let mut reused = false;
        let (raw, outcome) = self.raw.get_or_try_insert_with(source, |source| {
            let dataset = match held {
                Some(dataset) => {
                    debug!(source = %source.display(), "reusing dataset held for calibration");
                    reused = true;
                    dataset
                }
                None => {
                    info!(source = %source.display(), state = %state, "loading raw detector data");
                    share(engine.open(source)?)
                }
            };
            Ok::<_, UcalError>(RawData {
                source: source.clone(),
                state: state.clone(),
                save_file: save_file.clone(),
                dataset,
            })
        })?;
        if reused {
            self.shared += 1;
        }
        if outcome == CacheOutcome::Hit {
            debug!(source = %raw.source.display(), state = %state, "reusing loaded dataset");
            raw.update(state, save_file);
        }

        let calibration = self.resolver.resolve(run, calibration_override)?;
        let cal_source = self.layout.source_file(&calibration)?;
        let cal_state = self.layout.state(&calibration)?;
        let cal_save_dir = self.layout.save_directory(&calibration)?;
        let target = CalibrationTarget {
            calibration_file: self
                .layout
                .calibration_file(&cal_source, &cal_state, &cal_save_dir),
            save_file: self.layout.analyzed_file(&calibration)?,
            line_names: self.layout.line_names(&calibration),
            save_dir: cal_save_dir,
            state: cal_state,
        };

        let dataset = &raw.dataset;
        let (info, outcome) = self.calibration.get_or_try_insert_with(cal_source, |source| {
            debug!(source = %source.display(), state = %target.state, "binding calibration context");
            Ok::<_, UcalError>(CalibrationInfo {
                source: source.clone(),
                state: target.state.clone(),
                save_file: target.save_file.clone(),
                save_dir: target.save_dir.clone(),
                line_names: target.line_names.clone(),
                calibration_file: target.calibration_file.clone(),
                dataset: Rc::clone(dataset),
                dataset_source: raw.source.clone(),
            })
        })?;
        if outcome == CacheOutcome::Hit {
            info.apply(target);
            if info.source == raw.source && !Rc::ptr_eq(&info.dataset, &raw.dataset) {
                debug!(source = %info.source.display(), "rebinding calibration context to the loaded dataset");
                info.rebind(raw);
            }
        }
        Ok((raw, info))
    }
}
