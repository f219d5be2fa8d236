//! Detector-analysis engine seam.
//!
//! The numerical work (drift correction, line fitting, attribute extraction)
//! lives behind these traits; the pipeline only sequences calls and records
//! which steps already ran.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use ucal_core::errors::UcalError;

/// Attribute fitted when drift correction has been learned.
pub const ATTR_DRIFT_CORRECTED: &str = "filtValueDC";

/// Attribute fitted on uncorrected data.
pub const ATTR_RAW: &str = "filtValue";

/// Parameters of one calibration fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitRequest<'a> {
    /// State segment holding the calibration lines.
    pub state: &'a str,
    /// Expected spectral lines, in order.
    pub line_names: &'a [String],
    /// Pulse attribute to calibrate.
    pub attribute: &'a str,
    /// Residual cutoff; channels fitting worse are rejected by the engine.
    pub rms_cutoff: f64,
}

/// Per-pulse samples of one channel within one state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSamples {
    /// Pulse arrival times in unix nanoseconds.
    pub timestamps: Vec<i64>,
    /// Calibrated pulse energies in eV.
    pub energies: Vec<f64>,
}

/// Loaded multi-channel detector dataset.
pub trait ChannelGroup {
    /// Channel numbers in engine order.
    fn channels(&self) -> Vec<u32>;

    /// True once a drift correction has been learned for the dataset.
    fn is_drift_corrected(&self) -> bool;

    /// Learns a drift correction over every state in the dataset.
    fn learn_drift_correction(&mut self) -> Result<(), UcalError>;

    /// Fits an energy calibration from the lines in `request.state`.
    fn fit_calibration(&mut self, request: &FitRequest<'_>) -> Result<(), UcalError>;

    /// True when a calibration for `state` is present in memory.
    fn has_calibration(&self, state: &str) -> bool;

    /// Writes the in-memory calibration to `path`.
    fn save_calibration(&self, path: &Path) -> Result<(), UcalError>;

    /// Applies a calibration previously written to `path`.
    fn load_calibration(&mut self, path: &Path) -> Result<(), UcalError>;

    /// File of the calibration currently applied, if any.
    fn loaded_calibration(&self) -> Option<&Path>;

    /// Extracts timestamp and energy samples of `channel` for `state`.
    fn extract(&self, channel: u32, state: &str) -> Result<ChannelSamples, UcalError>;

    /// Excludes a channel from further analysis.
    fn mark_bad(&mut self, channel: u32, reason: &str);
}

/// Opens raw detector files into channel groups.
pub trait DetectorEngine {
    /// Performs the full (expensive) load of a raw source file.
    fn open(&self, source: &Path) -> Result<Box<dyn ChannelGroup>, UcalError>;
}

/// Dataset handle shared by the raw-data and calibration views of one load.
pub type SharedDataset = Rc<RefCell<Box<dyn ChannelGroup>>>;

/// Wraps a freshly opened channel group in a shared handle.
pub fn share(group: Box<dyn ChannelGroup>) -> SharedDataset {
    Rc::new(RefCell::new(group))
}
