mod common;

use std::sync::Arc;

use common::{catalog, shared, standard_file, Bench, RunSpec};
use ucal_catalog::Query;
use ucal_core::errors::UcalError;
use ucal_tes::{CalibrationResolver, CatalogProcessor, ProcessorConfig};

#[test]
fn calibration_runs_resolve_to_themselves() {
    let cal = shared(RunSpec::calibration("cal-1", 1, "f_chan1.off", 0).build());
    let resolved = CalibrationResolver::detached()
        .resolve(&cal, None)
        .expect("self calibration");
    assert!(Arc::ptr_eq(&resolved, &cal));
}

#[test]
fn last_cal_reference_is_looked_up() {
    let runs = catalog(vec![
        RunSpec::calibration("abc123", 1, "f_chan1.off", 0).build(),
        RunSpec::data("data-2", 2, "f_chan1.off", 1).cal("abc123").build(),
    ]);
    let data = Arc::clone(runs.lookup("data-2").expect("run"));
    let resolved = CalibrationResolver::new(&runs)
        .resolve(&data, None)
        .expect("lookup");
    assert_eq!(resolved.uid(), "abc123");
}

#[test]
fn data_run_without_reference_fails_lookup() {
    let runs = catalog(Vec::new());
    let data = shared(RunSpec::data("data-2", 2, "f_chan1.off", 1).build());
    let err = CalibrationResolver::new(&runs)
        .resolve(&data, None)
        .expect_err("unresolved");
    assert!(matches!(err, UcalError::Lookup(_)));
    assert_eq!(err.code(), "calibration.unresolved");
}

#[test]
fn narrowed_view_without_parent_resolves_only_its_own_runs() {
    let mut bench = Bench::new();
    bench.add_file("day_chan1.off", standard_file());
    let full = Arc::new(catalog(vec![
        RunSpec::calibration("cal-1", 1, "day_chan1.off", 0).build(),
        RunSpec::data("data-2", 2, "day_chan1.off", 1).cal("cal-1").build(),
    ]));
    let narrowed = full.narrow(&Query::eq("scantype", "xas"));
    assert!(narrowed.parent().is_some());

    let processor = CatalogProcessor::new(&bench.engine, &bench.layout, ProcessorConfig::default());
    let err = processor
        .process_catalog(&narrowed, None)
        .expect_err("calibration filtered out of the view");
    assert_eq!(err.code(), "catalog.lookup");
    assert_eq!(bench.counters().opens.get(), 0);
    assert!(!bench.processed("scan0002_SCAN1.npz").exists());

    let report = processor
        .process_catalog(&narrowed, Some(&full))
        .expect("explicit parent");
    assert_eq!(report.processed(), 1);
}
