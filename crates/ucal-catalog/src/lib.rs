#![deny(missing_docs)]
#![doc = "Run catalog views: metadata predicates, key maps and hierarchical partitioning."]

/// Catalog backends and explicit catalog configuration.
pub mod backend;
/// Canonical hashing helpers.
pub mod hash;
/// Dimension to metadata-path mapping.
pub mod keymap;
/// Recursive partitioning over searchable catalogs.
pub mod partition;
/// Metadata predicates.
pub mod query;
/// Canonical JSON and YAML serde helpers.
pub mod serde;
/// Structured catalog overviews.
pub mod summary;
/// Catalog views and the search contract.
pub mod view;

pub use backend::{open_catalog, CatalogBackend, CatalogConfig, FileBackend, MemoryBackend, ProfileSpec};
pub use keymap::{Dimension, KeyMap, KeyMapSpec};
pub use partition::{partition, partition_labeled, PartitionLabel};
pub use query::{Query, TimeRange};
pub use summary::{CatalogSummary, GroupSummary, NoiseSummary, ScanSpan, TimeSpan};
pub use view::{CatalogSearch, CatalogView, FilterArgs, SubcatalogLevels};
