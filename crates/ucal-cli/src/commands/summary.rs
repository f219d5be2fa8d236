use ucal_catalog::serde::to_canonical_json_pretty;
use ucal_catalog::CatalogView;
use ucal_core::errors::UcalError;

pub fn run(catalog: &CatalogView) -> Result<String, UcalError> {
    to_canonical_json_pretty(&catalog.summary()?)
}
