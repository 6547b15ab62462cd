// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::torctl::CircuitRecord;

const FP_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const FP_B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

fn circuit(id: u64, fingerprints: &[&str]) -> CircuitRecord {
    CircuitRecord {
        circuit_id: id,
        unix_ts_start: 100.0,
        unix_ts_end: 160.0,
        buildtime_seconds: None,
        build_timeout: None,
        build_quantile: None,
        failure_reason_local: None,
        failure_reason_remote: None,
        transitions: Vec::new(),
        path: fingerprints
            .iter()
            .enumerate()
            .map(|(i, fp)| (format!("${fp}~relay{i}"), 101.0 + i as f64))
            .collect(),
        filtered_out: None,
    }
}

fn analysis_with_circuits(circuits: Vec<CircuitRecord>) -> Analysis {
    let mut tor = crate::torctl::TorData::default();
    for c in circuits {
        tor.circuits.insert(c.circuit_id, c);
    }
    let mut analysis = Analysis::new(None, None);
    analysis.doc_mut().data.insert(
        "cyan".to_string(),
        crate::doc::NodeData {
            measurement_ip: "unknown".to_string(),
            tgen: None,
            tor: Some(tor),
        },
    );
    analysis
}

fn write_list(dir: &Path, name: &str, fingerprints: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = String::new();
    for fp in fingerprints {
        body.push_str(fp);
        body.push('\n');
    }
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn include_list_marks_foreign_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let list = write_list(dir.path(), "include.txt", &[FP_A]);

    let mut filtering = Filtering::new();
    filtering.include_fingerprints(&list).unwrap();

    let mut analysis =
        analysis_with_circuits(vec![circuit(1, &[FP_A, FP_A, FP_A]), circuit(2, &[FP_A, FP_B])]);
    filtering.apply(&mut analysis);

    let doc = analysis.doc();
    assert_eq!(doc.version, "4.0");
    let circuits = &doc.data["cyan"].tor.as_ref().unwrap().circuits;
    assert_eq!(circuits[&1].filtered_out, None);
    assert_eq!(circuits[&2].filtered_out, Some(true));

    let filters = doc.filters.as_ref().unwrap();
    assert_eq!(filters["tor/circuits"][0].name, "include_fingerprints");
}

#[test]
fn exclude_list_marks_matching_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let list = write_list(dir.path(), "exclude.txt", &[FP_B]);

    let mut filtering = Filtering::new();
    filtering.exclude_fingerprints(&list).unwrap();

    let mut analysis =
        analysis_with_circuits(vec![circuit(1, &[FP_A]), circuit(2, &[FP_A, FP_B])]);
    filtering.apply(&mut analysis);

    let circuits = &analysis.doc().data["cyan"].tor.as_ref().unwrap().circuits;
    assert_eq!(circuits[&1].filtered_out, None);
    assert_eq!(circuits[&2].filtered_out, Some(true));
}

#[test]
fn pathless_circuits_are_always_marked() {
    let dir = tempfile::tempdir().unwrap();
    let list = write_list(dir.path(), "include.txt", &[FP_A]);

    let mut filtering = Filtering::new();
    filtering.include_fingerprints(&list).unwrap();

    let mut analysis = analysis_with_circuits(vec![circuit(7, &[])]);
    filtering.apply(&mut analysis);
    let circuits = &analysis.doc().data["cyan"].tor.as_ref().unwrap().circuits;
    assert_eq!(circuits[&7].filtered_out, Some(true));
}

#[test]
fn no_lists_is_a_no_op() {
    let filtering = Filtering::new();
    let mut analysis = analysis_with_circuits(vec![circuit(1, &[FP_A])]);
    filtering.apply(&mut analysis);

    let doc = analysis.doc();
    assert_eq!(doc.version, "2.0");
    assert!(doc.filters.is_none());
}

#[test]
fn fingerprints_load_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let lower = FP_A.to_lowercase();
    let list = write_list(dir.path(), "include.txt", &[&lower, "not a fingerprint"]);
    let loaded = load_fingerprints(&list).unwrap();
    assert_eq!(loaded, vec![FP_A.to_string()]);
}
