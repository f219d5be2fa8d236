use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use ucal_core::errors::{ErrorInfo, UcalError};
use ucal_core::{MetaValue, RunRecord};

use crate::keymap::{Dimension, KeyMap};
use crate::partition::partition;
use crate::query::{one_day_after, Query, TimeRange};
use crate::summary::CatalogSummary;

/// Contract shared by every searchable catalog.
///
/// Partitioning and the batch driver only rely on this trait, so test doubles
/// and alternative backends can stand in for [`CatalogView`].
pub trait CatalogSearch: Sized {
    /// Returns a catalog containing only runs matching `query`, in the same order.
    fn search(&self, query: &Query) -> Self;

    /// Iterates over member runs in backend order.
    fn runs(&self) -> Box<dyn Iterator<Item = &Arc<RunRecord>> + '_>;

    /// Key map used to translate dimensions into metadata paths.
    fn key_map(&self) -> &KeyMap;

    /// Number of member runs.
    fn len(&self) -> usize {
        self.runs().count()
    }

    /// True when the catalog holds no runs.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct defined values of a dotted path across member runs.
    fn list_distinct_values(&self, path: &str) -> BTreeSet<MetaValue> {
        self.runs().filter_map(|run| run.meta_value(path)).collect()
    }
}

/// Ordered view over run records, produced by searching a backend or another view.
#[derive(Debug, Clone)]
pub struct CatalogView {
    runs: IndexMap<String, Arc<RunRecord>>,
    key_map: Arc<KeyMap>,
    parent: Option<Weak<CatalogView>>,
}

/// Composite filter over the common grouping keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
    /// Keep only runs that completed successfully.
    pub stop: bool,
    /// Accepted sample names.
    pub samples: Option<Vec<String>>,
    /// Accepted group names.
    pub groups: Option<Vec<String>>,
    /// Accepted scan types.
    pub scantype: Option<Vec<String>>,
    /// Accepted edges.
    pub edges: Option<Vec<String>>,
}

/// Which dimensions [`CatalogView::get_subcatalogs`] splits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubcatalogLevels {
    /// Split by noise environment.
    pub noise: bool,
    /// Split by group.
    pub groups: bool,
    /// Split by sample.
    pub samples: bool,
    /// Split by edge.
    pub edges: bool,
}

impl Default for SubcatalogLevels {
    fn default() -> Self {
        Self {
            noise: true,
            groups: true,
            samples: true,
            edges: true,
        }
    }
}

impl SubcatalogLevels {
    /// Enabled dimensions in hierarchy order.
    pub fn dimensions(&self) -> Vec<Dimension> {
        let flags = [self.noise, self.groups, self.samples, self.edges];
        Dimension::HIERARCHY
            .iter()
            .zip(flags)
            .filter(|(_, enabled)| *enabled)
            .map(|(dim, _)| *dim)
            .collect()
    }
}

impl CatalogView {
    /// Builds a root view from records in backend order; uids must be unique.
    pub fn from_records(
        records: impl IntoIterator<Item = RunRecord>,
        key_map: KeyMap,
    ) -> Result<Self, UcalError> {
        let mut runs = IndexMap::new();
        for record in records {
            let uid = record.uid().to_string();
            if runs.insert(uid.clone(), Arc::new(record)).is_some() {
                return Err(UcalError::Catalog(
                    ErrorInfo::new("catalog.duplicate_uid", "run uid appears twice")
                        .with_context("uid", uid),
                ));
            }
        }
        Ok(Self {
            runs,
            key_map: Arc::new(key_map),
            parent: None,
        })
    }

    fn derive(&self, runs: IndexMap<String, Arc<RunRecord>>) -> Self {
        Self {
            runs,
            key_map: Arc::clone(&self.key_map),
            parent: self.parent.clone(),
        }
    }

    /// Searches a shared view, recording it as the parent of the result.
    pub fn narrow(self: &Arc<Self>, query: &Query) -> Self {
        let mut child = self.search(query);
        child.parent = Some(Arc::downgrade(self));
        child
    }

    /// Catalog this view was narrowed from, while it is still alive.
    pub fn parent(&self) -> Option<Arc<CatalogView>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Run by exact uid.
    pub fn get(&self, uid: &str) -> Option<&Arc<RunRecord>> {
        self.runs.get(uid)
    }

    /// Run by exact uid, reporting a lookup failure when absent.
    pub fn lookup(&self, uid: &str) -> Result<&Arc<RunRecord>, UcalError> {
        self.get(uid).ok_or_else(|| {
            UcalError::Lookup(
                ErrorInfo::new("catalog.lookup", "run not present in catalog")
                    .with_context("uid", uid)
                    .with_context("catalog_size", self.runs.len().to_string()),
            )
        })
    }

    /// Iterates over `(uid, run)` pairs in backend order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<RunRecord>)> {
        self.runs.iter().map(|(uid, run)| (uid.as_str(), run))
    }

    /// Uids in backend order.
    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.runs.keys().map(String::as_str)
    }

    /// Keeps only runs that completed successfully.
    pub fn filter_by_stop(&self) -> Self {
        self.search(&Query::Success)
    }

    /// Keeps runs acquired in `[since, until)`; either bound may be omitted.
    pub fn filter_by_time(&self, since: Option<&str>, until: Option<&str>) -> Result<Self, UcalError> {
        let range = TimeRange::parse(since, until)?;
        Ok(self.search(&Query::TimeRange(range)))
    }

    /// Keeps runs with `start <= scan_id <= end`.
    pub fn filter_by_scan_id(&self, start: i64, end: i64) -> Self {
        self.search(&Query::at_least("scan_id", start))
            .search(&Query::at_most("scan_id", end))
    }

    /// Keeps runs whose value for `dimension` is one of `values`.
    pub fn filter_by_key<V: Into<MetaValue>>(
        &self,
        dimension: Dimension,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self, UcalError> {
        let path = self.key_map.path(dimension)?;
        Ok(self.search(&Query::one_of(path, values)))
    }

    /// Composite filter over success status, samples, groups, scan type and edges.
    pub fn filter(&self, args: &FilterArgs) -> Result<Self, UcalError> {
        let mut catalog = if args.stop {
            self.filter_by_stop()
        } else {
            self.clone()
        };
        let keyed = [
            (Dimension::Samples, &args.samples),
            (Dimension::Groups, &args.groups),
            (Dimension::Scantype, &args.scantype),
            (Dimension::Edges, &args.edges),
        ];
        for (dimension, values) in keyed {
            if let Some(values) = values {
                catalog = catalog.filter_by_key(dimension, values.iter().map(String::as_str))?;
            }
        }
        Ok(catalog)
    }

    /// Runs belonging to beamtimes that started strictly between `since` and `until`.
    ///
    /// `until` defaults to one day after `since`. Every run sharing one of the
    /// matching `beamtime_start` values is returned, including runs acquired
    /// after the window closed.
    pub fn beamtime(&self, since: &str, until: Option<&str>) -> Result<Self, UcalError> {
        let until = match until {
            Some(until) => until.to_string(),
            None => one_day_after(since)?,
        };
        let path = self.key_map.path(Dimension::BeamtimeStart)?;
        let starts = self
            .search(&Query::greater_than(path, since))
            .search(&Query::less_than(path, until.as_str()))
            .list_distinct_values(path);
        Ok(self.search(&Query::In {
            key: path.to_string(),
            values: starts.into_iter().collect(),
        }))
    }

    /// Distinct values of a dotted path (alias kept for callers using dotted keys).
    pub fn list_meta_key_vals(&self, path: &str) -> BTreeSet<MetaValue> {
        self.list_distinct_values(path)
    }

    /// Distinct values for a dimension.
    pub fn list_dimension(&self, dimension: Dimension) -> Result<BTreeSet<MetaValue>, UcalError> {
        Ok(self.list_distinct_values(self.key_map.path(dimension)?))
    }

    /// Distinct group names.
    pub fn list_groups(&self) -> Result<BTreeSet<MetaValue>, UcalError> {
        self.list_dimension(Dimension::Groups)
    }

    /// Distinct sample names.
    pub fn list_samples(&self) -> Result<BTreeSet<MetaValue>, UcalError> {
        self.list_dimension(Dimension::Samples)
    }

    /// Distinct edges.
    pub fn list_edges(&self) -> Result<BTreeSet<MetaValue>, UcalError> {
        self.list_dimension(Dimension::Edges)
    }

    /// Distinct noise environments.
    pub fn list_noise(&self) -> Result<BTreeSet<MetaValue>, UcalError> {
        self.list_dimension(Dimension::Noise)
    }

    /// Splits the catalog along the enabled hierarchy levels.
    pub fn get_subcatalogs(&self, levels: SubcatalogLevels) -> Result<Vec<Self>, UcalError> {
        partition(self.clone(), &levels.dimensions())
    }

    /// One sub-catalog per noise environment.
    pub fn get_noise_catalogs(&self) -> Result<Vec<Self>, UcalError> {
        partition(self.clone(), &[Dimension::Noise])
    }

    /// Calibration id for `run`: its own `last_cal`, else `default`.
    pub fn resolve_calibration_id<'a>(run: &'a RunRecord, default: Option<&'a str>) -> Option<&'a str> {
        run.last_cal().or(default)
    }

    /// Structured overview of the catalog contents.
    pub fn summary(&self) -> Result<CatalogSummary, UcalError> {
        CatalogSummary::build(self)
    }
}

impl CatalogSearch for CatalogView {
    fn search(&self, query: &Query) -> Self {
        let runs = self
            .runs
            .iter()
            .filter(|(_, run)| query.matches(run))
            .map(|(uid, run)| (uid.clone(), Arc::clone(run)))
            .collect();
        self.derive(runs)
    }

    fn runs(&self) -> Box<dyn Iterator<Item = &Arc<RunRecord>> + '_> {
        Box::new(self.runs.values())
    }

    fn key_map(&self) -> &KeyMap {
        &self.key_map
    }

    fn len(&self) -> usize {
        self.runs.len()
    }
}

impl PartialEq for CatalogView {
    fn eq(&self, other: &Self) -> bool {
        self.runs.len() == other.runs.len() && self.runs.keys().eq(other.runs.keys())
    }
}
