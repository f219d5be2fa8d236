use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use ucal_core::errors::{ErrorInfo, UcalError};
use ucal_core::RunRecord;

use crate::keymap::KeyMapSpec;
use crate::serde::{from_json_slice, from_yaml_slice};
use crate::view::{CatalogSearch, CatalogView};

fn io_error(code: &str, path: &Path, err: impl ToString) -> UcalError {
    UcalError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Source of run records, in backend order.
pub trait CatalogBackend {
    /// Fetches every run record the backend exposes.
    fn fetch(&self) -> Result<Vec<RunRecord>, UcalError>;

    /// Short description used in log output.
    fn describe(&self) -> String;
}

/// Records held in memory, mainly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Vec<RunRecord>,
}

impl MemoryBackend {
    /// Wraps an ordered list of records.
    pub fn new(records: Vec<RunRecord>) -> Self {
        Self { records }
    }
}

impl CatalogBackend for MemoryBackend {
    fn fetch(&self) -> Result<Vec<RunRecord>, UcalError> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        format!("memory ({} runs)", self.records.len())
    }
}

/// Catalog export on disk: a JSON or YAML list of run records.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Creates a backend reading `path`; `.yaml`/`.yml` selects YAML, anything else JSON.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the export.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogBackend for FileBackend {
    fn fetch(&self) -> Result<Vec<RunRecord>, UcalError> {
        let bytes = fs::read(&self.path).map_err(|err| io_error("backend.read", &self.path, err))?;
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => from_yaml_slice(&bytes),
            _ => from_json_slice(&bytes),
        }
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Named backend location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSpec {
    /// Catalog export file; relative paths resolve against the config file.
    pub path: PathBuf,
}

/// Catalog selection passed explicitly to drivers instead of a process-wide default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Profile to open.
    pub backend_profile: String,
    /// Known profiles by name.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileSpec>,
    /// Dimension to metadata-path mapping.
    #[serde(default)]
    pub key_map: KeyMapSpec,
    /// Drop runs without a successful stop document when opening.
    #[serde(default)]
    pub prefilter: bool,
    /// Directory containing the configuration on disk (ignored when serializing).
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl CatalogConfig {
    /// Config for a single catalog file registered under `profile`.
    pub fn for_file(profile: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let profile = profile.into();
        let mut profiles = BTreeMap::new();
        profiles.insert(profile.clone(), ProfileSpec { path: path.into() });
        Self {
            backend_profile: profile,
            profiles,
            key_map: KeyMapSpec::default(),
            prefilter: false,
            base_dir: PathBuf::new(),
        }
    }

    /// Backend for the selected profile.
    pub fn backend(&self) -> Result<FileBackend, UcalError> {
        let profile = self.profiles.get(&self.backend_profile).ok_or_else(|| {
            UcalError::Config(
                ErrorInfo::new("catalog.profile", "backend profile is not defined")
                    .with_context("profile", self.backend_profile.clone())
                    .with_hint(format!(
                        "known profiles: {}",
                        self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
                    )),
            )
        })?;
        let path = if profile.path.is_absolute() {
            profile.path.clone()
        } else {
            self.base_dir.join(&profile.path)
        };
        Ok(FileBackend::new(path))
    }

    /// Opens the selected profile as a root catalog view.
    pub fn open(&self) -> Result<CatalogView, UcalError> {
        open_catalog(&self.backend()?, self)
    }
}

/// Builds a root view from any backend using the config's key map and prefilter.
pub fn open_catalog<B: CatalogBackend + ?Sized>(
    backend: &B,
    config: &CatalogConfig,
) -> Result<CatalogView, UcalError> {
    let records = backend.fetch()?;
    let catalog = CatalogView::from_records(records, config.key_map.resolve()?)?;
    let catalog = if config.prefilter {
        catalog.filter_by_stop()
    } else {
        catalog
    };
    info!(
        backend = %backend.describe(),
        profile = %config.backend_profile,
        runs = catalog.len(),
        "opened catalog"
    );
    Ok(catalog)
}
