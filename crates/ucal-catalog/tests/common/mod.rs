#![allow(dead_code)]

use serde_json::{json, Map, Value};
use ucal_catalog::{CatalogView, KeyMap};
use ucal_core::RunRecord;

/// 2024-03-01T00:00:00Z
pub const MARCH_FIRST: f64 = 1_709_251_200.0;

pub fn start_doc(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("start document object")
}

pub fn run(uid: &str, scan_id: i64, fields: Value) -> RunRecord {
    let mut start = start_doc(fields);
    start.insert("scan_id".into(), json!(scan_id));
    start.insert("uid".into(), json!(uid));
    RunRecord::new(uid, start)
        .expect("valid record")
        .with_exit_status("success")
}

/// Ten runs over two noise environments, three groups and two edges.
pub fn sample_records() -> Vec<RunRecord> {
    let mut records = Vec::new();
    for scan in 1..=10i64 {
        let noise = if scan <= 5 { "noise-a" } else { "noise-b" };
        let group = ["oxides", "nitrides", "metals"][(scan % 3) as usize];
        let edge = if scan % 2 == 0 { "O K" } else { "N K" };
        let mut record = run(
            &format!("uid-{scan:02}"),
            scan,
            json!({
                "time": MARCH_FIRST + scan as f64 * 3600.0,
                "last_noise": noise,
                "group_name": group,
                "sample_name": format!("s{}", scan % 4),
                "edge": edge,
                "scantype": if scan == 1 || scan == 6 { "calibration" } else { "xas" },
                "beamtime_start": if scan <= 7 { "2024-03-01T08:00:00" } else { "2024-03-05T08:00:00" },
            }),
        );
        if scan == 4 {
            record = record.with_exit_status("abort");
        }
        records.push(record);
    }
    // no stop document and no noise environment
    let mut start = start_doc(json!({"scan_id": 11, "time": MARCH_FIRST + 11.0 * 3600.0, "group_name": "oxides"}));
    start.insert("uid".into(), json!("uid-11"));
    records.push(RunRecord::new("uid-11", start).expect("valid record"));
    records
}

pub fn sample_catalog() -> CatalogView {
    CatalogView::from_records(sample_records(), KeyMap::current()).expect("catalog")
}

pub fn uids(catalog: &CatalogView) -> Vec<String> {
    catalog.uids().map(str::to_string).collect()
}
