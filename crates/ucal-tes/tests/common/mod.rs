#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tempfile::TempDir;
use ucal_catalog::{CatalogView, KeyMap};
use ucal_core::errors::{ErrorInfo, UcalError};
use ucal_core::{DetectorConfig, RunRecord};
use ucal_tes::{
    ChannelGroup, ChannelSamples, DetectorEngine, FacilityLayout, FitRequest, LayoutConfig,
};

/// 2024-03-01T00:00:00Z
pub const MARCH_FIRST: f64 = 1_709_251_200.0;

/// Run directory recorded by the acquisition host.
pub const RUN_DIR: &str = "0001";

#[derive(Debug, Default)]
pub struct Counters {
    pub opens: Cell<usize>,
    pub drift: Cell<usize>,
    pub fits: Cell<usize>,
    pub saves: Cell<usize>,
    pub cal_loads: Cell<usize>,
    pub fit_attributes: RefCell<Vec<String>>,
}

fn bump(cell: &Cell<usize>) {
    cell.set(cell.get() + 1);
}

/// Per-channel, per-state pulses of one raw file.
#[derive(Debug, Clone, Default)]
pub struct FakeFile {
    channels: BTreeMap<u32, BTreeMap<String, Vec<(i64, f64)>>>,
    failing: BTreeSet<u32>,
}

impl FakeFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulses(mut self, channel: u32, state: &str, pulses: &[(i64, f64)]) -> Self {
        self.channels
            .entry(channel)
            .or_default()
            .insert(state.to_string(), pulses.to_vec());
        self
    }

    pub fn failing(mut self, channel: u32) -> Self {
        self.channels.entry(channel).or_default();
        self.failing.insert(channel);
        self
    }
}

pub struct FakeGroup {
    file: FakeFile,
    counters: Rc<Counters>,
    drift_corrected: bool,
    calibrations: BTreeSet<String>,
    loaded: Option<PathBuf>,
    bad: BTreeSet<u32>,
}

impl ChannelGroup for FakeGroup {
    fn channels(&self) -> Vec<u32> {
        self.file
            .channels
            .keys()
            .copied()
            .filter(|channel| !self.bad.contains(channel))
            .collect()
    }

    fn is_drift_corrected(&self) -> bool {
        self.drift_corrected
    }

    fn learn_drift_correction(&mut self) -> Result<(), UcalError> {
        bump(&self.counters.drift);
        self.drift_corrected = true;
        Ok(())
    }

    fn fit_calibration(&mut self, request: &FitRequest<'_>) -> Result<(), UcalError> {
        bump(&self.counters.fits);
        self.counters
            .fit_attributes
            .borrow_mut()
            .push(request.attribute.to_string());
        self.calibrations.insert(request.state.to_string());
        Ok(())
    }

    fn has_calibration(&self, state: &str) -> bool {
        self.calibrations.contains(state)
    }

    fn save_calibration(&self, path: &Path) -> Result<(), UcalError> {
        bump(&self.counters.saves);
        let states: Vec<&str> = self.calibrations.iter().map(String::as_str).collect();
        fs::write(path, states.join("\n"))
            .map_err(|err| UcalError::Io(ErrorInfo::new("fake.save", err.to_string())))
    }

    fn load_calibration(&mut self, path: &Path) -> Result<(), UcalError> {
        bump(&self.counters.cal_loads);
        if !path.exists() {
            return Err(UcalError::Io(ErrorInfo::new("fake.load", "no calibration file")));
        }
        self.loaded = Some(path.to_path_buf());
        Ok(())
    }

    fn loaded_calibration(&self) -> Option<&Path> {
        self.loaded.as_deref()
    }

    fn extract(&self, channel: u32, state: &str) -> Result<ChannelSamples, UcalError> {
        if self.file.failing.contains(&channel) {
            return Err(UcalError::Engine(ErrorInfo::new(
                "fake.extract",
                "energy attribute missing",
            )));
        }
        let pulses = self
            .file
            .channels
            .get(&channel)
            .and_then(|states| states.get(state))
            .cloned()
            .unwrap_or_default();
        Ok(ChannelSamples {
            timestamps: pulses.iter().map(|(t, _)| *t).collect(),
            energies: pulses.iter().map(|(_, e)| *e).collect(),
        })
    }

    fn mark_bad(&mut self, channel: u32, _reason: &str) {
        self.bad.insert(channel);
    }
}

/// In-memory engine keyed by local source path.
#[derive(Default)]
pub struct FakeEngine {
    files: BTreeMap<PathBuf, FakeFile>,
    pub counters: Rc<Counters>,
}

impl DetectorEngine for FakeEngine {
    fn open(&self, source: &Path) -> Result<Box<dyn ChannelGroup>, UcalError> {
        bump(&self.counters.opens);
        let file = self.files.get(source).cloned().ok_or_else(|| {
            UcalError::Engine(
                ErrorInfo::new("fake.open", "unknown source file")
                    .with_context("path", source.display().to_string()),
            )
        })?;
        Ok(Box::new(FakeGroup {
            file,
            counters: Rc::clone(&self.counters),
            drift_corrected: false,
            calibrations: BTreeSet::new(),
            loaded: None,
            bad: BTreeSet::new(),
        }))
    }
}

/// Temporary raw/processed tree with a fake engine over it.
pub struct Bench {
    pub dir: TempDir,
    pub layout: FacilityLayout,
    pub engine: FakeEngine,
}

impl Bench {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = FacilityLayout::new(LayoutConfig {
            raw_root: dir.path().join("raw"),
            processed_root: dir.path().join("processed"),
            ..LayoutConfig::default()
        });
        Self {
            dir,
            layout,
            engine: FakeEngine::default(),
        }
    }

    pub fn source(&self, name: &str) -> PathBuf {
        self.dir
            .path()
            .join("raw/2024/03/01")
            .join(RUN_DIR)
            .join(name)
    }

    pub fn processed(&self, name: &str) -> PathBuf {
        self.dir.path().join("processed/2024/03/01").join(name)
    }

    pub fn add_file(&mut self, name: &str, file: FakeFile) {
        let path = self.source(name);
        self.engine.files.insert(path, file);
    }

    pub fn counters(&self) -> &Counters {
        &self.engine.counters
    }
}

pub struct RunSpec<'s> {
    pub uid: &'s str,
    pub scan_id: i64,
    pub file: &'s str,
    pub state_num: u32,
    pub calibration: bool,
    pub last_cal: Option<&'s str>,
    pub noise: &'s str,
    pub adr: Option<Vec<f64>>,
}

impl<'s> RunSpec<'s> {
    pub fn data(uid: &'s str, scan_id: i64, file: &'s str, state_num: u32) -> Self {
        Self {
            uid,
            scan_id,
            file,
            state_num,
            calibration: false,
            last_cal: None,
            noise: "noise-a",
            adr: Some(vec![1.0, 0.5]),
        }
    }

    pub fn calibration(uid: &'s str, scan_id: i64, file: &'s str, state_num: u32) -> Self {
        Self {
            calibration: true,
            ..Self::data(uid, scan_id, file, state_num)
        }
    }

    pub fn cal(mut self, last_cal: &'s str) -> Self {
        self.last_cal = Some(last_cal);
        self
    }

    pub fn noise(mut self, noise: &'s str) -> Self {
        self.noise = noise;
        self
    }

    pub fn adr(mut self, series: Option<Vec<f64>>) -> Self {
        self.adr = series;
        self
    }

    pub fn build(self) -> RunRecord {
        let mut start: Map<String, Value> = Map::new();
        start.insert("scan_id".into(), json!(self.scan_id));
        start.insert("uid".into(), json!(self.uid));
        start.insert("time".into(), json!(MARCH_FIRST + self.scan_id as f64 * 60.0));
        start.insert("last_noise".into(), json!(self.noise));
        start.insert(
            "scantype".into(),
            json!(if self.calibration { "calibration" } else { "xas" }),
        );
        if let Some(cal) = self.last_cal {
            start.insert("last_cal".into(), json!(cal));
        }
        let mut record = RunRecord::new(self.uid, start)
            .expect("record")
            .with_exit_status("success")
            .with_detector(DetectorConfig {
                tes_filename: PathBuf::from("/acq/tes").join(RUN_DIR).join(self.file),
                tes_cal_flag: self.calibration,
                tes_scan_num: self.state_num,
                tes_scan_str: None,
            });
        if let Some(series) = self.adr {
            record = record.with_baseline("adr_heater", series);
        }
        record
    }
}

pub fn catalog(runs: Vec<RunRecord>) -> CatalogView {
    CatalogView::from_records(runs, KeyMap::current()).expect("catalog")
}

pub fn shared(run: RunRecord) -> Arc<RunRecord> {
    Arc::new(run)
}

/// Channel 7 and 9 pulses for `CAL0` and `SCAN1`, plus a failing channel 3.
pub fn standard_file() -> FakeFile {
    FakeFile::new()
        .pulses(7, "CAL0", &[(20, 277.0), (10, 392.0)])
        .pulses(9, "CAL0", &[(15, 525.0)])
        .pulses(7, "SCAN1", &[(5, 50.0), (1, 10.0), (3, 30.0)])
        .pulses(9, "SCAN1", &[(2, 20.0), (4, 40.0)])
        .pulses(7, "SCAN2", &[(8, 80.0)])
        .pulses(9, "SCAN3", &[(9, 90.0)])
        .pulses(7, "SCAN4", &[(11, 110.0)])
}
