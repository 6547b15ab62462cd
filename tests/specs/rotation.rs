// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Midnight rotation: archive naming, content split, nightly document.

use super::fixtures;
use chrono::{TimeZone, Utc};
use operf_core::FakeClock;
use operf_daemon::rotator::Rotator;
use operf_daemon::LineSink;
use std::io::Read;
use std::path::Path;

fn gunzip(path: &Path) -> String {
    let mut decoder = flate2::read::GzDecoder::new(std::fs::File::open(path).unwrap());
    let mut out = String::new();
    decoder.read_to_string(&mut out).unwrap();
    out
}

#[test]
fn rotation_splits_lines_exactly_at_the_rotate_call() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logfile");
    let sink = LineSink::file(&path).unwrap();

    for line in ["line 1", "line 2", "line 3"] {
        sink.write_line(line);
    }
    let instant = Utc.with_ymd_and_hms(2020, 6, 1, 23, 59, 59).unwrap();
    let archive = sink.rotate(instant).unwrap().unwrap();
    for line in ["line 4", "line 5"] {
        sink.write_line(line);
    }
    sink.close();

    assert_eq!(
        archive,
        dir.path().join("log_archive").join("logfile_2020-06-01_23:59:59.gz")
    );
    assert_eq!(gunzip(&archive), "line 1\nline 2\nline 3\n");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "line 4\nline 5\n");
}

#[tokio::test]
async fn nightly_pass_publishes_the_day_and_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let docroot = dir.path().join("htdocs");

    let tgen_path = dir.path().join("onionperf.tgen.log");
    let torctl_path = dir.path().join("onionperf.torctl.log");
    std::fs::write(&tgen_path, fixtures::tgen_log()).unwrap();
    std::fs::write(&torctl_path, fixtures::torctl_log()).unwrap();

    let mut rotator = Rotator::new(&docroot, Some("cyan".to_string()), FakeClock::new());
    rotator.watch_tgen(LineSink::file(&tgen_path).unwrap());
    rotator.watch_torctl(LineSink::file(&torctl_path).unwrap());

    let instant = Utc.with_ymd_and_hms(2020, 6, 1, 23, 59, 59).unwrap();
    rotator.rotate_pass(instant).await;

    // the published document parses back from its gzip-fed archives
    let saved = docroot.join("2020-06-01.onionperf.analysis.json.xz");
    let loaded = operf_analysis::Analysis::load(&saved).unwrap().unwrap();
    let node = &loaded.doc().data["cyan"];
    let tgen = node.tgen.as_ref().unwrap();

    // the nightly pass runs in summaries-only mode
    assert!(tgen.transfers.is_empty());
    assert!(!tgen.transfers_summary.time_to_last_byte.is_empty());
    let tor = node.tor.as_ref().unwrap();
    assert_eq!(tor.bandwidth_summary.bytes_read.len(), 2);
    assert!(tor.circuits.is_empty());

    // the index lists the document but not itself
    let index = std::fs::read_to_string(docroot.join("index.xml")).unwrap();
    assert!(index.contains("2020-06-01.onionperf.analysis.json.xz"));
    assert!(!index.contains("name=\"index.xml\""));

    // a second pass with an empty day still succeeds and keeps the index
    let next = Utc.with_ymd_and_hms(2020, 6, 2, 23, 59, 59).unwrap();
    rotator.rotate_pass(next).await;
    assert!(docroot.join("index.xml").exists());
}
