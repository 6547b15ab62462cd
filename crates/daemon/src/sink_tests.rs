// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use std::io::Read;

fn gunzip(path: &Path) -> String {
    let mut decoder = flate2::read::GzDecoder::new(File::open(path).unwrap());
    let mut out = String::new();
    decoder.read_to_string(&mut out).unwrap();
    out
}

#[test]
fn file_sink_appends_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("operf.tgen.log");
    let sink = LineSink::file(&path).unwrap();
    sink.write_line("one");
    sink.write_line("two");
    sink.close();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
}

#[test]
fn writes_after_close_reopen_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("operf.tor.log");
    let sink = LineSink::file(&path).unwrap();
    sink.write_line("before");
    sink.close();
    sink.write_line("after");

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "before\nafter\n");
}

#[test]
fn rotation_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logfile");
    let sink = LineSink::file(&path).unwrap();
    for line in ["a", "b", "c"] {
        sink.write_line(line);
    }

    let instant = Utc.with_ymd_and_hms(2020, 6, 1, 23, 59, 59).unwrap();
    let archive = sink.rotate(instant).unwrap().unwrap();

    for line in ["d", "e"] {
        sink.write_line(line);
    }
    sink.close();

    assert_eq!(
        archive,
        dir.path().join("log_archive/logfile_2020-06-01_23:59:59.gz")
    );
    assert_eq!(gunzip(&archive), "a\nb\nc\n");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "d\ne\n");
}

#[test]
fn rotate_leaves_live_file_empty_when_nothing_follows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("operf.torctl.log");
    let sink = LineSink::file(&path).unwrap();
    sink.write_line("only");

    let instant = Utc.with_ymd_and_hms(2020, 6, 1, 23, 59, 59).unwrap();
    sink.rotate(instant).unwrap().unwrap();

    assert!(path.exists());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}

#[test]
fn stdout_sink_rotate_is_a_noop() {
    let sink = LineSink::stdout();
    let instant = Utc.with_ymd_and_hms(2020, 6, 1, 23, 59, 59).unwrap();
    assert!(sink.rotate(instant).unwrap().is_none());
    assert!(sink.path().is_none());
}

#[test]
fn compressed_sink_gains_xz_suffix_and_decompresses() {
    let dir = tempfile::tempdir().unwrap();
    let sink = LineSink::compressed(dir.path().join("events.log")).unwrap();
    let path = sink.path().unwrap();
    assert!(path.to_string_lossy().ends_with("events.log.xz"));

    sink.write_line("compressed line");
    sink.close();

    let mut decoder = xz2::read::XzDecoder::new(File::open(&path).unwrap());
    let mut out = String::new();
    decoder.read_to_string(&mut out).unwrap();
    assert_eq!(out, "compressed line\n");
}

#[test]
fn concurrent_writers_interleave_whole_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.log");
    let sink = LineSink::file(&path).unwrap();

    let mut handles = Vec::new();
    for worker in 0..4 {
        let sink = sink.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..50 {
                sink.write_line(&format!("w{worker}-{i}"));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    sink.close();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 200);
    for line in content.lines() {
        assert!(line.starts_with('w') && line.contains('-'));
    }
}
