#![deny(missing_docs)]
#![doc = "Core error and run-record types shared by the ucal catalog and TES pipeline crates."]

pub mod errors;
pub mod provenance;
pub mod record;
pub mod value;

pub use errors::{ErrorInfo, UcalError};
pub use provenance::{ProcessProvenance, SchemaVersion};
pub use record::{DetectorConfig, RunRecord, EXIT_SUCCESS, SCANTYPE_CALIBRATION};
pub use value::MetaValue;
