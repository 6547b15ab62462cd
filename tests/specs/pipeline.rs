// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw logs → parsers → document → disk and back.

use super::fixtures;
use operf_analysis::{Analysis, AnalysisError};
use std::path::{Path, PathBuf};

fn write_day_logs(dir: &Path) -> (PathBuf, PathBuf) {
    let tgen = dir.join("2020-06-01.onionperf.tgen.log");
    let torctl = dir.join("2020-06-01.onionperf.torctl.log");
    std::fs::write(&tgen, fixtures::tgen_log()).unwrap();
    std::fs::write(&torctl, fixtures::torctl_log()).unwrap();
    (tgen, torctl)
}

fn full_analysis(dir: &Path) -> Analysis {
    let (tgen, torctl) = write_day_logs(dir);
    let mut analysis = Analysis::new(None, Some("203.0.113.9".to_string()));
    analysis.add_tgen_file(tgen);
    analysis.add_torctl_file(torctl);
    analysis.analyze(true, None).unwrap();
    analysis
}

#[test]
fn document_shape_and_invariants() {
    let dir = tempfile::tempdir().unwrap();
    let analysis = full_analysis(dir.path());
    let doc = analysis.doc();

    assert_eq!(doc.doc_type, "onionperf");
    assert_eq!(doc.version, "2.0");
    let node = &doc.data["cyan"];
    assert_eq!(node.measurement_ip, "203.0.113.9");

    let tgen = node.tgen.as_ref().unwrap();
    let transfer = &tgen.transfers["transfer5m:1"];
    assert!(transfer.is_success);

    // recorded byte thresholds stay within the transfer window, and the
    // decile series is non-decreasing
    for ts in transfer.payload_bytes.values().flatten() {
        assert!(transfer.unix_ts_start <= *ts && *ts <= transfer.unix_ts_end);
    }
    let mut previous = f64::MIN;
    for decile in ["0.0", "0.1", "0.2", "0.3", "0.4", "0.5", "0.6", "0.7", "0.8", "0.9", "1.0"] {
        if let Some(ts) = transfer.payload_progress[decile] {
            assert!(ts >= previous);
            previous = ts;
        }
    }

    // every summary second appears as some transfer's end second
    for seconds in tgen.transfers_summary.time_to_last_byte.values() {
        for second in seconds.keys() {
            assert!(tgen
                .transfers
                .values()
                .any(|t| t.is_success && t.unix_ts_end as i64 == *second));
        }
    }

    // the failed transfer landed in the error summary with its file size
    assert_eq!(
        tgen.transfers_summary.errors["PROXY"][&(fixtures::DAY_START as i64 + 400)],
        vec![5242880]
    );

    let tor = node.tor.as_ref().unwrap();
    let circuit = &tor.circuits[&9];
    assert_eq!(circuit.build_timeout, Some(1500));
    for (_, hop_ts) in &circuit.path {
        assert!(circuit.unix_ts_start <= *hop_ts && *hop_ts <= circuit.unix_ts_end);
    }
    if let Some(built) = circuit.buildtime_seconds {
        assert!(circuit.unix_ts_start <= built && built <= circuit.unix_ts_end);
    }
    assert_eq!(tor.circuits_summary.buildtimes.len(), 1);
    assert_eq!(tor.circuits_summary.lifetimes.len(), 1);
    assert_eq!(tor.streams_summary.lifetimes["USER"], vec![30.0]);
    assert_eq!(tor.bandwidth_summary.bytes_read.len(), 2);
}

#[test]
fn save_load_round_trip_preserves_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let analysis = full_analysis(dir.path());

    let path = analysis.save(dir.path(), None, true, None).unwrap();
    let loaded = Analysis::load(&path).unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(loaded.doc()).unwrap(),
        serde_json::to_value(analysis.doc()).unwrap()
    );
}

#[test]
fn merging_same_node_twice_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut left = full_analysis(dir.path());
    let right = full_analysis(dir.path());
    match left.merge(right) {
        Err(AnalysisError::MergeCollision(nick)) => assert_eq!(nick, "cyan"),
        other => panic!("expected a merge collision, got {other:?}"),
    }
}

#[test]
fn reprocessing_pairs_produces_dated_documents() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let (tgen, torctl) = write_day_logs(dir.path());

    let pairs = operf_analysis::pair_logs(&[tgen], &[torctl], None);
    assert_eq!(pairs.len(), 1);
    let done = operf_analysis::reprocess_pairs(&pairs, &out, Some("cyan"), true);
    assert_eq!(done, 1);

    let saved = out.join("2020-06-01.onionperf.analysis.json.xz");
    let loaded = Analysis::load(&saved).unwrap().unwrap();
    assert!(loaded.doc().data.contains_key("cyan"));
}
