use serde::Serialize;
use ucal_catalog::serde::to_canonical_json_pretty;
use ucal_catalog::CatalogView;
use ucal_core::errors::UcalError;
use ucal_tes::{check_processed, FacilityLayout, ProcessedStatus, UcalConfig};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub processed: usize,
    pub pending: usize,
    pub runs: Vec<ProcessedStatus>,
}

pub fn report(config: &UcalConfig, catalog: &CatalogView) -> Result<StatusReport, UcalError> {
    let layout = FacilityLayout::new(config.layout.clone());
    let runs = check_processed(catalog, &layout)?;
    let processed = runs.iter().filter(|run| run.processed).count();
    Ok(StatusReport {
        processed,
        pending: runs.len() - processed,
        runs,
    })
}

pub fn run(config: &UcalConfig, catalog: &CatalogView) -> Result<String, UcalError> {
    to_canonical_json_pretty(&report(config, catalog)?)
}
