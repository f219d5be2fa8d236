#![deny(missing_docs)]
#![doc = "TES calibration pipeline: cached dataset loading, calibration resolution, idempotent persistence and the batch driver."]

/// Single-slot cache with hit/miss counters.
pub mod cache;
/// YAML configuration file.
pub mod config;
/// Detector-analysis engine traits.
pub mod engine;
/// Directory and file naming.
pub mod layout;
/// Cached dataset and calibration context resolution.
pub mod loader;
/// NumPy `.npz` array container.
pub mod npz;
/// Per-run drift correction, calibration and persistence.
pub mod pipeline;
/// Batch driver.
pub mod processor;
/// Calibration run resolution.
pub mod resolver;

pub use cache::{CacheOutcome, CacheStats, SlotCache};
pub use config::UcalConfig;
pub use engine::{ChannelGroup, ChannelSamples, DetectorEngine, FitRequest, SharedDataset};
pub use layout::{FacilityLayout, LayoutConfig, RunLayout};
pub use loader::{AnalysisLoader, CalibrationInfo, LoaderStats, RawData};
pub use npz::{read_npz, write_npz, TesArrays};
pub use pipeline::{
    Attribute, PersistReport, PipelineOptions, PipelineOutcome, PipelineReport, ProcessMetadata,
    ProcessingPipeline,
};
pub use processor::{
    check_processed, BatchReport, CatalogProcessor, DefaultCalibration, ProcessedStatus,
    ProcessorConfig, RunOutcome, RunReport,
};
pub use resolver::CalibrationResolver;
