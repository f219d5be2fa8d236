use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ucal_core::errors::UcalError;
use ucal_core::MetaValue;

use crate::keymap::Dimension;
use crate::partition::partition_labeled;
use crate::view::{CatalogSearch, CatalogView};

/// Inclusive scan-id range covered by a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSpan {
    /// Smallest scan id.
    pub first: i64,
    /// Largest scan id.
    pub last: i64,
}

impl ScanSpan {
    /// Scan-id span of a catalog, `None` when it is empty.
    pub fn of<C: CatalogSearch>(catalog: &C) -> Option<Self> {
        let mut ids = catalog.runs().map(|run| run.scan_id());
        let first = ids.next()?;
        let (first, last) = ids.fold((first, first), |(lo, hi), id| (lo.min(id), hi.max(id)));
        Some(Self { first, last })
    }
}

/// Acquisition time range covered by a catalog, as ISO-8601 UTC strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSpan {
    /// Earliest acquisition time.
    pub start: String,
    /// Latest acquisition time.
    pub stop: String,
}

impl TimeSpan {
    /// Time span of a catalog, `None` when no run records a time.
    pub fn of<C: CatalogSearch>(catalog: &C) -> Option<Self> {
        let mut times = catalog.runs().filter_map(|run| run.time());
        let first = times.next()?;
        let (lo, hi) = times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
        Some(Self {
            start: iso_timestamp(lo),
            stop: iso_timestamp(hi),
        })
    }
}

fn iso_timestamp(seconds: f64) -> String {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos)
        .map(|datetime| datetime.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| seconds.to_string())
}

fn names(values: impl IntoIterator<Item = MetaValue>) -> Vec<String> {
    values.into_iter().map(|value| value.to_string()).collect()
}

/// Per-group overview inside one noise environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    /// Group name.
    pub group: String,
    /// Number of runs in the group.
    pub runs: usize,
    /// Acquisition time span.
    pub time_span: Option<TimeSpan>,
    /// Samples measured.
    pub samples: Vec<String>,
    /// Edges measured.
    pub edges: Vec<String>,
}

/// Overview of one noise environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseSummary {
    /// Noise environment identifier.
    pub noise: String,
    /// Number of runs taken in this environment.
    pub runs: usize,
    /// Scan-id span.
    pub scan_span: Option<ScanSpan>,
    /// Acquisition time span.
    pub time_span: Option<TimeSpan>,
    /// Group breakdown.
    pub groups: Vec<GroupSummary>,
}

/// Structured overview of a catalog's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSummary {
    /// Number of runs.
    pub runs: usize,
    /// Acquisition time span.
    pub time_span: Option<TimeSpan>,
    /// Scan-id span.
    pub scan_span: Option<ScanSpan>,
    /// Groups present.
    pub groups: Vec<String>,
    /// Samples present.
    pub samples: Vec<String>,
    /// Noise environments, ordered by their first acquisition time.
    pub noise: Vec<NoiseSummary>,
}

impl CatalogSummary {
    /// Summarises a catalog view.
    pub fn build(catalog: &CatalogView) -> Result<Self, UcalError> {
        let mut noise = Vec::new();
        for (label, noise_catalog) in partition_labeled(catalog.clone(), &[Dimension::Noise])? {
            let mut groups = Vec::new();
            for (group_label, group_catalog) in
                partition_labeled(noise_catalog.clone(), &[Dimension::Groups])?
            {
                groups.push(GroupSummary {
                    group: label_value(&group_label),
                    runs: group_catalog.len(),
                    time_span: TimeSpan::of(&group_catalog),
                    samples: names(group_catalog.list_samples()?),
                    edges: names(group_catalog.list_edges()?),
                });
            }
            noise.push(NoiseSummary {
                noise: label_value(&label),
                runs: noise_catalog.len(),
                scan_span: ScanSpan::of(&noise_catalog),
                time_span: TimeSpan::of(&noise_catalog),
                groups,
            });
        }
        noise.sort_by(|a, b| a.time_span.cmp(&b.time_span));
        Ok(Self {
            runs: catalog.len(),
            time_span: TimeSpan::of(catalog),
            scan_span: ScanSpan::of(catalog),
            groups: names(catalog.list_groups()?),
            samples: names(catalog.list_samples()?),
            noise,
        })
    }
}

fn label_value(label: &[(Dimension, MetaValue)]) -> String {
    label
        .last()
        .map(|(_, value)| value.to_string())
        .unwrap_or_default()
}
