//! Immutable run records as read from the catalog backend.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ErrorInfo, UcalError};
use crate::value::MetaValue;

/// Exit status recorded in the stop document of a completed scan.
pub const EXIT_SUCCESS: &str = "success";

/// Scan type marking a run as a calibration run.
pub const SCANTYPE_CALIBRATION: &str = "calibration";

/// Detector (TES) configuration captured with a run's primary stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Raw data file as recorded by the acquisition host.
    pub tes_filename: PathBuf,
    /// Whether the detector flagged this scan as a calibration segment.
    #[serde(default)]
    pub tes_cal_flag: bool,
    /// Scan counter maintained by the detector server.
    pub tes_scan_num: u32,
    /// Explicit state label, when the detector server recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tes_scan_str: Option<String>,
}

impl DetectorConfig {
    /// Label of the state segment inside the raw file that holds this run.
    pub fn state_label(&self) -> String {
        match &self.tes_scan_str {
            Some(label) => label.clone(),
            None => {
                let prefix = if self.tes_cal_flag { "CAL" } else { "SCAN" };
                format!("{prefix}{}", self.tes_scan_num)
            }
        }
    }
}

#[derive(Deserialize)]
struct RawRunRecord {
    uid: String,
    start: Map<String, Value>,
    #[serde(default)]
    stop: Option<Map<String, Value>>,
    #[serde(default)]
    baseline: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    detector: Option<DetectorConfig>,
}

/// One experiment scan: metadata documents, baseline readings and detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRunRecord")]
pub struct RunRecord {
    uid: String,
    #[serde(skip_serializing)]
    scan_id: i64,
    start: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    baseline: BTreeMap<String, Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detector: Option<DetectorConfig>,
}

impl TryFrom<RawRunRecord> for RunRecord {
    type Error = UcalError;

    fn try_from(raw: RawRunRecord) -> Result<Self, Self::Error> {
        let mut record = RunRecord::new(raw.uid, raw.start)?;
        record.stop = raw.stop;
        record.baseline = raw.baseline;
        record.detector = raw.detector;
        Ok(record)
    }
}

impl RunRecord {
    /// Creates a record from its start document, which must carry an integer `scan_id`.
    pub fn new(uid: impl Into<String>, start: Map<String, Value>) -> Result<Self, UcalError> {
        let uid = uid.into();
        if uid.is_empty() {
            return Err(UcalError::Catalog(ErrorInfo::new(
                "record.uid",
                "run record has an empty uid",
            )));
        }
        let scan_id = start
            .get("scan_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                UcalError::Catalog(
                    ErrorInfo::new("record.scan_id", "start document lacks an integer scan_id")
                        .with_context("uid", uid.clone()),
                )
            })?;
        Ok(Self {
            uid,
            scan_id,
            start,
            stop: None,
            baseline: BTreeMap::new(),
            detector: None,
        })
    }

    /// Attaches a stop document with the given exit status.
    pub fn with_exit_status(mut self, status: impl Into<String>) -> Self {
        let mut stop = Map::new();
        stop.insert("exit_status".into(), Value::String(status.into()));
        self.stop = Some(stop);
        self
    }

    /// Attaches a full stop document.
    pub fn with_stop(mut self, stop: Map<String, Value>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Attaches a baseline sensor series.
    pub fn with_baseline(mut self, sensor: impl Into<String>, series: Vec<f64>) -> Self {
        self.baseline.insert(sensor.into(), series);
        self
    }

    /// Attaches the detector configuration.
    pub fn with_detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Globally unique identifier of the run.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Scan counter from the start document.
    pub fn scan_id(&self) -> i64 {
        self.scan_id
    }

    /// Start document.
    pub fn start(&self) -> &Map<String, Value> {
        &self.start
    }

    /// Stop document, absent when the scan was aborted before completing.
    pub fn stop(&self) -> Option<&Map<String, Value>> {
        self.stop.as_ref()
    }

    /// Exit status recorded in the stop document.
    pub fn exit_status(&self) -> Option<&str> {
        self.stop.as_ref()?.get("exit_status")?.as_str()
    }

    /// True when the scan completed with a successful exit status.
    pub fn succeeded(&self) -> bool {
        self.exit_status() == Some(EXIT_SUCCESS)
    }

    /// Resolves a dotted path (`sample_args.sample_name.value`) inside the start document.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.start.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Resolves a dotted path to a defined scalar value.
    pub fn meta_value(&self, path: &str) -> Option<MetaValue> {
        self.lookup(path).and_then(MetaValue::from_json)
    }

    fn start_str(&self, path: &str) -> Option<&str> {
        self.lookup(path)?.as_str()
    }

    /// Acquisition time in unix seconds.
    pub fn time(&self) -> Option<f64> {
        self.lookup("time")?.as_f64()
    }

    /// Scan type (`xas`, `calibration`, ...).
    pub fn scantype(&self) -> Option<&str> {
        self.start_str("scantype")
    }

    /// True when the run is itself a calibration run.
    pub fn is_calibration(&self) -> bool {
        self.scantype() == Some(SCANTYPE_CALIBRATION)
    }

    /// Identifier of the calibration run recorded before this run.
    pub fn last_cal(&self) -> Option<&str> {
        self.start_str("last_cal")
    }

    /// Noise environment identifier.
    pub fn last_noise(&self) -> Option<&str> {
        self.start_str("last_noise")
    }

    /// Sample name, reading the legacy `sample_args` layout when needed.
    pub fn sample_name(&self) -> Option<&str> {
        self.start_str("sample_name")
            .or_else(|| self.start_str("sample_args.sample_name.value"))
    }

    /// Group name across the current and legacy metadata layouts.
    pub fn group(&self) -> Option<&str> {
        self.start_str("group")
            .or_else(|| self.start_str("group_name"))
            .or_else(|| self.start_str("group_md.name"))
    }

    /// Absorption edge measured by the scan.
    pub fn edge(&self) -> Option<&str> {
        self.start_str("edge")
    }

    /// Start of the beamtime the run belongs to.
    pub fn beamtime_start(&self) -> Option<&str> {
        self.start_str("beamtime_start")
    }

    /// Baseline readings for one sensor.
    pub fn baseline_series(&self, sensor: &str) -> Option<&[f64]> {
        self.baseline.get(sensor).map(Vec::as_slice)
    }

    /// Last recorded baseline reading for one sensor.
    pub fn last_baseline_value(&self, sensor: &str) -> Option<f64> {
        self.baseline_series(sensor)?.last().copied()
    }

    /// Detector configuration, present for TES runs.
    pub fn detector(&self) -> Option<&DetectorConfig> {
        self.detector.as_ref()
    }

    /// State label of this run inside its raw detector file.
    pub fn state_label(&self) -> Option<String> {
        self.detector.as_ref().map(DetectorConfig::state_label)
    }

    /// Shortened uid for log output.
    pub fn short_uid(&self) -> &str {
        let end = self
            .uid
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.uid.len());
        &self.uid[..end]
    }
}
