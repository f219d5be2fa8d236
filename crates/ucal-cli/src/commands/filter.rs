use clap::Args;
use serde::Serialize;
use ucal_catalog::serde::to_canonical_json_pretty;
use ucal_catalog::{CatalogView, FilterArgs as CatalogFilter};
use ucal_core::errors::UcalError;

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Keep only runs that completed successfully.
    #[arg(long)]
    pub success: bool,
    /// Accepted sample names.
    #[arg(long = "sample")]
    pub samples: Vec<String>,
    /// Accepted group names.
    #[arg(long = "group")]
    pub groups: Vec<String>,
    /// Accepted edges.
    #[arg(long = "edge")]
    pub edges: Vec<String>,
    /// Accepted scan types.
    #[arg(long = "scantype")]
    pub scantypes: Vec<String>,
    /// Smallest scan id (inclusive).
    #[arg(long)]
    pub scan_min: Option<i64>,
    /// Largest scan id (inclusive).
    #[arg(long)]
    pub scan_max: Option<i64>,
    /// Earliest acquisition time (inclusive), e.g. 2024-03-01 or 2024-03-01T08:00:00.
    #[arg(long)]
    pub since: Option<String>,
    /// Latest acquisition time (exclusive).
    #[arg(long)]
    pub until: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunRow {
    pub uid: String,
    pub scan_id: i64,
    pub time: Option<f64>,
    pub sample: Option<String>,
    pub group: Option<String>,
    pub scantype: Option<String>,
    pub exit_status: Option<String>,
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

pub fn select(args: &FilterArgs, catalog: &CatalogView) -> Result<CatalogView, UcalError> {
    let mut selected = catalog.filter(&CatalogFilter {
        stop: args.success,
        samples: non_empty(&args.samples),
        groups: non_empty(&args.groups),
        scantype: non_empty(&args.scantypes),
        edges: non_empty(&args.edges),
    })?;
    if args.scan_min.is_some() || args.scan_max.is_some() {
        selected = selected.filter_by_scan_id(
            args.scan_min.unwrap_or(i64::MIN),
            args.scan_max.unwrap_or(i64::MAX),
        );
    }
    if args.since.is_some() || args.until.is_some() {
        selected = selected.filter_by_time(args.since.as_deref(), args.until.as_deref())?;
    }
    Ok(selected)
}

pub fn run(args: &FilterArgs, catalog: &CatalogView) -> Result<String, UcalError> {
    let rows: Vec<RunRow> = select(args, catalog)?
        .iter()
        .map(|(uid, run)| RunRow {
            uid: uid.to_string(),
            scan_id: run.scan_id(),
            time: run.time(),
            sample: run.sample_name().map(str::to_string),
            group: run.group().map(str::to_string),
            scantype: run.scantype().map(str::to_string),
            exit_status: run.exit_status().map(str::to_string),
        })
        .collect();
    to_canonical_json_pretty(&rows)
}
