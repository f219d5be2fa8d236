mod common;

use std::fs;

use common::{catalog, standard_file, Bench, RunSpec};
use ucal_tes::{
    read_npz, CatalogProcessor, PipelineOptions, PipelineOutcome, ProcessMetadata,
    ProcessingPipeline, ProcessorConfig, RunOutcome,
};

fn processor_config(options: PipelineOptions) -> ProcessorConfig {
    ProcessorConfig {
        pipeline: options,
        ..ProcessorConfig::default()
    }
}

#[test]
fn persisted_arrays_are_sorted_by_timestamp() {
    let mut bench = Bench::new();
    bench.add_file("day_chan1.off", standard_file().failing(3));
    let runs = catalog(vec![
        RunSpec::calibration("cal-1", 1, "day_chan1.off", 0).build(),
        RunSpec::data("data-2", 2, "day_chan1.off", 1).cal("cal-1").build(),
    ]);
    let processor = CatalogProcessor::new(&bench.engine, &bench.layout, ProcessorConfig::default());
    let mut loader = processor.loader().with_catalog(&runs);
    let outcome = processor
        .process_run(&mut loader, runs.lookup("data-2").expect("run"), None)
        .expect("process");

    let RunOutcome::Processed(report) = outcome else {
        panic!("expected processed outcome");
    };
    assert!(report.calibrated);
    assert_eq!(report.arrays.bad_channels, vec![3]);

    let arrays = read_npz(&bench.processed("scan0002_SCAN1.npz")).expect("arrays");
    assert_eq!(arrays.timestamps, vec![1, 2, 3, 4, 5]);
    assert_eq!(arrays.energies, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
    assert_eq!(arrays.channels, vec![7, 9, 7, 9, 7]);
}

#[test]
fn fitting_a_calibration_also_saves_the_calibration_run() {
    let mut bench = Bench::new();
    bench.add_file("day_chan1.off", standard_file());
    let runs = catalog(vec![
        RunSpec::calibration("cal-1", 1, "day_chan1.off", 0).build(),
        RunSpec::data("data-2", 2, "day_chan1.off", 1).cal("cal-1").build(),
    ]);
    let processor = CatalogProcessor::new(&bench.engine, &bench.layout, ProcessorConfig::default());
    let mut loader = processor.loader().with_catalog(&runs);
    processor
        .process_run(&mut loader, runs.lookup("data-2").expect("run"), None)
        .expect("process");

    assert!(bench.processed("day_CAL0_cal.hdf5").exists());
    let cal_arrays = read_npz(&bench.processed("scan0001_CAL0.npz")).expect("calibration arrays");
    assert_eq!(cal_arrays.timestamps, vec![10, 15, 20]);
    assert_eq!(cal_arrays.channels, vec![7, 9, 7]);
    assert_eq!(bench.counters().fits.get(), 1);
    assert_eq!(bench.counters().cal_loads.get(), 1);
}

#[test]
fn sidecar_describes_the_processing() {
    let mut bench = Bench::new();
    bench.add_file("day_chan1.off", standard_file());
    let runs = catalog(vec![
        RunSpec::calibration("cal-1", 1, "day_chan1.off", 0).build(),
        RunSpec::data("data-2", 2, "day_chan1.off", 1).cal("cal-1").build(),
    ]);
    let processor = CatalogProcessor::new(&bench.engine, &bench.layout, ProcessorConfig::default());
    let mut loader = processor.loader().with_catalog(&runs);
    processor
        .process_run(&mut loader, runs.lookup("data-2").expect("run"), None)
        .expect("process");

    let text = fs::read_to_string(bench.processed("scan0002_SCAN1.yaml")).expect("sidecar");
    let metadata: ProcessMetadata = serde_yaml::from_str(&text).expect("metadata");
    assert_eq!(metadata.state, "SCAN1");
    assert_eq!(metadata.calibration_state, "CAL0");
    assert_eq!(metadata.attribute, "filtValueDC");
    assert!(metadata.drift_corrected);
    assert_eq!(metadata.samples, 5);
    assert_eq!(metadata.channels.total, 2);
    assert_eq!(metadata.rms_cutoff, 0.2);
    assert_eq!(metadata.source_file, bench.source("day_chan1.off"));
    assert_eq!(metadata.provenance.params_hash.len(), 64);
    assert!(metadata.provenance.tool_versions.contains_key("ucal-tes"));
}

#[test]
fn existing_output_short_circuits_before_loading() {
    let mut bench = Bench::new();
    bench.add_file("day_chan1.off", standard_file());
    let runs = catalog(vec![
        RunSpec::calibration("cal-1", 1, "day_chan1.off", 0).build(),
        RunSpec::data("data-2", 2, "day_chan1.off", 1).cal("cal-1").build(),
    ]);
    let data = runs.lookup("data-2").expect("run");
    let processor = CatalogProcessor::new(&bench.engine, &bench.layout, ProcessorConfig::default());
    processor
        .process_run(&mut processor.loader().with_catalog(&runs), data, None)
        .expect("first pass");
    let opens = bench.counters().opens.get();

    let outcome = processor
        .process_run(&mut processor.loader().with_catalog(&runs), data, None)
        .expect("second pass");
    assert!(matches!(outcome, RunOutcome::AlreadyDone { .. }));
    assert_eq!(bench.counters().opens.get(), opens);
    assert_eq!(bench.counters().fits.get(), 1);
}

#[test]
fn drift_correction_is_learned_once_per_dataset() {
    let mut bench = Bench::new();
    bench.add_file("day_chan1.off", standard_file());
    let runs = catalog(vec![
        RunSpec::calibration("cal-1", 1, "day_chan1.off", 0).build(),
        RunSpec::data("data-2", 2, "day_chan1.off", 1).cal("cal-1").build(),
        RunSpec::data("data-3", 3, "day_chan1.off", 2).cal("cal-1").build(),
    ]);
    let processor = CatalogProcessor::new(&bench.engine, &bench.layout, ProcessorConfig::default());
    let mut loader = processor.loader().with_catalog(&runs);
    for uid in ["data-2", "data-3"] {
        processor
            .process_run(&mut loader, runs.lookup(uid).expect("run"), None)
            .expect("process");
    }
    assert_eq!(bench.counters().drift.get(), 1);
    assert_eq!(bench.counters().fits.get(), 1);
    assert_eq!(bench.counters().cal_loads.get(), 1);

    let forced = CatalogProcessor::new(
        &bench.engine,
        &bench.layout,
        processor_config(PipelineOptions {
            overwrite: true,
            force_drift_correct: true,
            ..PipelineOptions::default()
        }),
    );
    forced
        .process_run(&mut loader, runs.lookup("data-3").expect("run"), None)
        .expect("forced");
    assert_eq!(bench.counters().drift.get(), 2);
    assert_eq!(bench.counters().fits.get(), 1);
}

#[test]
fn redo_refits_and_overwrite_rewrites() {
    let mut bench = Bench::new();
    bench.add_file("day_chan1.off", standard_file());
    let runs = catalog(vec![
        RunSpec::calibration("cal-1", 1, "day_chan1.off", 0).build(),
        RunSpec::data("data-2", 2, "day_chan1.off", 1).cal("cal-1").build(),
    ]);
    let data = runs.lookup("data-2").expect("run");
    let plain = CatalogProcessor::new(&bench.engine, &bench.layout, ProcessorConfig::default());
    let mut loader = plain.loader().with_catalog(&runs);
    plain.process_run(&mut loader, data, None).expect("first");

    let redo = CatalogProcessor::new(
        &bench.engine,
        &bench.layout,
        processor_config(PipelineOptions {
            redo: true,
            overwrite: true,
            ..PipelineOptions::default()
        }),
    );
    let outcome = redo.process_run(&mut loader, data, None).expect("redo");
    let RunOutcome::Processed(report) = outcome else {
        panic!("expected processed outcome");
    };
    assert!(report.calibrated);
    assert_eq!(bench.counters().fits.get(), 2);
    assert_eq!(bench.counters().saves.get(), 2);
    assert_eq!(bench.counters().opens.get(), 1);
}

#[test]
fn disabled_drift_correction_fits_raw_values() {
    let mut bench = Bench::new();
    bench.add_file("day_chan1.off", standard_file());
    let runs = catalog(vec![RunSpec::calibration("cal-1", 1, "day_chan1.off", 0).build()]);
    let options = PipelineOptions {
        drift_correct: false,
        rms_cutoff: 1.5,
        ..PipelineOptions::default()
    };
    let mut loader = ucal_tes::AnalysisLoader::new(&bench.engine, &bench.layout);
    let (raw, calibration) = loader
        .get_objects(runs.lookup("cal-1").expect("run"), None)
        .expect("objects");
    let outcome = ProcessingPipeline::new(&options, &bench.layout)
        .process(raw, calibration)
        .expect("process");

    let PipelineOutcome::Persisted(report) = outcome else {
        panic!("expected persisted outcome");
    };
    assert_eq!(
        report.calibration_arrays.as_ref().map(|r| &r.save_file),
        Some(&report.arrays.save_file)
    );
    assert_eq!(bench.counters().drift.get(), 0);
    assert_eq!(*bench.counters().fit_attributes.borrow(), vec!["filtValue".to_string()]);
    let arrays = read_npz(&bench.processed("scan0001_CAL0.npz")).expect("arrays");
    assert_eq!(arrays.len(), 3);
}
