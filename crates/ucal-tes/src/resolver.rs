use std::sync::Arc;

use ucal_catalog::CatalogView;
use ucal_core::errors::{ErrorInfo, UcalError};
use ucal_core::RunRecord;

/// Finds the calibration run a data run is analysed against.
///
/// Resolution order: explicit override, the run itself for calibration runs,
/// then the `last_cal` reference looked up in the bound catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationResolver<'c> {
    catalog: Option<&'c CatalogView>,
}

impl<'c> CalibrationResolver<'c> {
    /// Resolver that can only use overrides and self-calibration.
    pub fn detached() -> Self {
        Self { catalog: None }
    }

    /// Resolver looking `last_cal` references up in `catalog`.
    pub fn new(catalog: &'c CatalogView) -> Self {
        Self {
            catalog: Some(catalog),
        }
    }

    /// Resolves the calibration run for `run`.
    pub fn resolve(
        &self,
        run: &Arc<RunRecord>,
        calibration_override: Option<&Arc<RunRecord>>,
    ) -> Result<Arc<RunRecord>, UcalError> {
        if let Some(calibration) = calibration_override {
            return Ok(Arc::clone(calibration));
        }
        if run.is_calibration() {
            return Ok(Arc::clone(run));
        }
        let Some(cal_id) = run.last_cal() else {
            return Err(UcalError::Lookup(
                ErrorInfo::new(
                    "calibration.unresolved",
                    "run is not a calibration and records no last_cal",
                )
                .with_context("uid", run.uid())
                .with_context("scan_id", run.scan_id().to_string())
                .with_hint("pass an explicit calibration run"),
            ));
        };
        let catalog = self.catalog.ok_or_else(|| {
            UcalError::Lookup(
                ErrorInfo::new("calibration.no_catalog", "no catalog bound to look up last_cal")
                    .with_context("uid", run.uid())
                    .with_context("last_cal", cal_id),
            )
        })?;
        catalog.lookup(cal_id).map(Arc::clone)
    }
}
