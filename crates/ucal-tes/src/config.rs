use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use ucal_catalog::serde::from_yaml_slice;
use ucal_catalog::CatalogConfig;
use ucal_core::errors::{ErrorInfo, UcalError};

use crate::layout::LayoutConfig;
use crate::processor::ProcessorConfig;

/// Top-level configuration file: catalog selection, directory layout and batch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UcalConfig {
    /// Catalog profile and key map.
    pub catalog: CatalogConfig,
    /// Raw and processed directory roots.
    #[serde(default)]
    pub layout: LayoutConfig,
    /// Batch settings.
    #[serde(default)]
    pub processor: ProcessorConfig,
}

impl UcalConfig {
    /// Loads a YAML configuration; relative catalog paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, UcalError> {
        let bytes = fs::read(path).map_err(|err| {
            UcalError::Config(
                ErrorInfo::new("config.read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        let mut config: UcalConfig = from_yaml_slice(&bytes)?;
        config.catalog.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn minimal_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ucal.yaml");
        fs::write(
            &path,
            "catalog:\n  backend_profile: local\n  profiles:\n    local:\n      path: runs.json\n",
        )
        .unwrap();
        let config = UcalConfig::load(&path).unwrap();
        assert_eq!(config.catalog.base_dir, dir.path());
        assert!(config.processor.skip_bad_adr);
        assert_eq!(config.processor.adr_threshold, 0.1);
        assert_eq!(config.layout.line_names.len(), 6);
        assert_eq!(
            config.catalog.backend().unwrap().path(),
            dir.path().join(PathBuf::from("runs.json"))
        );
    }
}
