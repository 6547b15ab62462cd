// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const TRANSPORT: &str =
    "TCP,12,localhost:127.0.0.1:46878,localhost:127.0.0.1:43735,host:0.0.0.0:8080,state=SUCCESS,error=NONE";

fn transfer_tuple(seq: u32, method: &str, error: &str) -> String {
    format!("transfer5m,{seq},cyan,{method},5242880,(null),0,state=DONE,error={error}")
}

fn status_line(ts: f64, seq: u32, payload: u64) -> String {
    format!(
        "2019-04-22 14:41:20 {ts} [message] [shd-tgen-transfer.c:803] [_tgentransfer_log] \
         [transfer-status] transport {TRANSPORT} transfer {tuple} total-bytes-read={payload} \
         total-bytes-write=23 read-bytes={payload}/5242880 write-bytes=23/23",
        tuple = transfer_tuple(seq, "GET", "NONE"),
    )
}

fn complete_line(ts: f64, seq: u32) -> String {
    format!(
        "2019-04-22 14:41:20 {ts} [message] [shd-tgen-transfer.c:1133] [_tgentransfer_log] \
         [transfer-complete] transport {TRANSPORT} transfer {tuple} total-bytes-read=5242880 \
         total-bytes-write=23 read-bytes=5242880/5242880 write-bytes=23/23 \
         usecs-to-socket-create=11 usecs-to-socket-connect=210 usecs-to-proxy-init=283 \
         usecs-to-proxy-choice=348 usecs-to-proxy-request=412 usecs-to-proxy-response=500 \
         usecs-to-command=600 usecs-to-response=700 usecs-to-first-byte=800 \
         usecs-to-last-byte=1000000 usecs-to-checksum=1000100",
        tuple = transfer_tuple(seq, "GET", "NONE"),
    )
}

fn error_line(ts: f64, seq: u32) -> String {
    format!(
        "2019-04-22 14:41:20 {ts} [message] [shd-tgen-transfer.c:1133] [_tgentransfer_log] \
         [transfer-error] transport {TRANSPORT} transfer {tuple} total-bytes-read=0 \
         total-bytes-write=0 read-bytes=0/5242880 write-bytes=0/0 \
         usecs-to-socket-create=11 usecs-to-socket-connect=210 usecs-to-proxy-init=283 \
         usecs-to-proxy-choice=348 usecs-to-proxy-request=412 usecs-to-proxy-response=-1 \
         usecs-to-command=-1 usecs-to-response=-1 usecs-to-first-byte=-1 \
         usecs-to-last-byte=-1 usecs-to-checksum=-1",
        tuple = transfer_tuple(seq, "GET", "PROXY"),
    )
}

fn parser_with_lines(lines: &[String], do_complete: bool) -> TGenParser {
    let mut parser = TGenParser::new(None);
    parser.do_complete = do_complete;
    for line in lines {
        parser.parse_line(line).unwrap();
    }
    parser
}

#[test]
fn complete_transfer_milestones_and_summary() {
    let parser = parser_with_lines(&[complete_line(1555940480.647663, 4)], true);
    let data = parser.into_data();

    let record = &data.transfers["transfer5m:4"];
    assert!(record.is_success);
    assert!(!record.is_error);
    assert_eq!(record.method, "GET");
    assert_eq!(record.filesize_bytes, 5242880);
    assert_eq!(record.endpoint_local, "localhost:127.0.0.1:46878");
    assert_eq!(record.endpoint_remote, "host:0.0.0.0:8080");
    assert!(record.is_commander);
    assert_eq!(record.elapsed_seconds["last_byte"], 1.0);
    assert_eq!(record.elapsed_seconds["command"], 0.0006);
    // start time derives from the last reached milestone (checksum)
    assert!((record.unix_ts_start - (record.unix_ts_end - 1.0001)).abs() < 1e-9);

    let ttfb = &data.transfers_summary.time_to_first_byte[&5242880][&1555940480];
    assert!((ttfb[0] - (0.0008 - 0.0006)).abs() < 1e-9);
    let ttlb = &data.transfers_summary.time_to_last_byte[&5242880][&1555940480];
    assert!((ttlb[0] - 0.9994).abs() < 1e-9);
}

#[test]
fn error_transfer_start_time_and_error_summary() {
    let parser = parser_with_lines(&[error_line(1555940480.647663, 5)], true);
    let data = parser.into_data();

    let record = &data.transfers["transfer5m:5"];
    assert!(record.is_error);
    assert!(!record.is_success);
    assert_eq!(record.error_code, "PROXY");
    // proxy_request is the last milestone with a non-negative value
    assert!((record.unix_ts_start - (record.unix_ts_end - 0.000412)).abs() < 1e-9);
    assert!(!record.elapsed_seconds.contains_key("first_byte"));

    assert_eq!(data.transfers_summary.errors["PROXY"][&1555940480], vec![5242880]);
    assert!(data.transfers_summary.time_to_first_byte.is_empty());
}

#[test]
fn status_events_fill_deciles_and_thresholds_monotonically() {
    let lines = vec![
        status_line(101.0, 1, 524288),  // 10%
        status_line(101.5, 1, 2621440), // 50%
        complete_line(102.0, 1),        // 100%
    ];
    let data = parser_with_lines(&lines, true).into_data();
    let record = &data.transfers["transfer5m:1"];

    assert_eq!(record.payload_progress["0.0"], Some(101.0));
    assert_eq!(record.payload_progress["0.1"], Some(101.0));
    assert_eq!(record.payload_progress["0.2"], Some(101.5));
    assert_eq!(record.payload_progress["0.5"], Some(101.5));
    assert_eq!(record.payload_progress["0.6"], Some(102.0));
    assert_eq!(record.payload_progress["1.0"], Some(102.0));

    assert_eq!(record.payload_bytes["10240"], Some(101.0));
    assert_eq!(record.payload_bytes["2097152"], Some(101.5));
    assert_eq!(record.payload_bytes["5242880"], Some(102.0));

    // deciles are non-decreasing in the decile key, and bounded by the
    // transfer window
    let mut previous = f64::MIN;
    for decile in DECILES {
        let ts = record.payload_progress[&format!("{decile:.1}")].unwrap();
        assert!(ts >= previous);
        assert!(record.unix_ts_start <= ts && ts <= record.unix_ts_end);
        previous = ts;
    }
}

#[test]
fn date_filter_skips_other_days() {
    let filter = chrono::NaiveDate::from_ymd_opt(2019, 4, 22).unwrap();
    let mut parser = TGenParser::new(Some(filter));
    parser.do_complete = true;
    // 1555940480 is on 2019-04-22 UTC; one day later is filtered out
    parser.parse_line(&complete_line(1555940480.0, 1)).unwrap();
    parser.parse_line(&complete_line(1556026880.0, 2)).unwrap();

    let data = parser.into_data();
    assert!(data.transfers.contains_key("transfer5m:1"));
    assert!(!data.transfers.contains_key("transfer5m:2"));
}

#[test]
fn counter_restart_drops_stale_in_flight() {
    let mut parser = TGenParser::new(None);
    parser.do_complete = true;
    parser.parse_line(&status_line(100.0, 1, 524288)).unwrap();
    assert_eq!(parser.in_flight.len(), 1);

    let restart = format!(
        "2019-04-22 14:41:25 105.0 [info] [shd-tgen-transfer.c:544] [_tgentransfer_changeState] \
         transfer {} moving from state RESPONSE to state PAYLOAD",
        transfer_tuple(1, "GET", "NONE"),
    );
    parser.parse_line(&restart).unwrap();
    assert!(parser.in_flight.is_empty());
}

#[test]
fn summaries_only_mode_skips_status_and_completed_table() {
    let lines = vec![status_line(100.0, 1, 524288), complete_line(102.0, 1)];
    let parser = parser_with_lines(&lines, false);
    assert!(parser.in_flight.is_empty());

    let data = parser.into_data();
    assert!(data.transfers.is_empty());
    assert_eq!(data.transfers_summary.time_to_last_byte[&5242880][&102].len(), 1);
}

#[test]
fn captures_node_name_from_init_banner() {
    let mut parser = TGenParser::new(None);
    parser
        .parse_line(
            "2019-04-22 14:41:20 1555940480.0 [message] [tgen-main.c:98] [main] \
             Initializing traffic generator on host cyan process id 12345",
        )
        .unwrap();
    assert_eq!(parser.name(), Some("cyan"));
}

#[test]
fn short_line_is_a_field_count_error() {
    let mut parser = TGenParser::new(None);
    parser.do_complete = true;
    let err = parser
        .parse_line("2019-04-22 14:41:20 100.0 [message] [transfer-status] too short")
        .unwrap_err();
    assert!(matches!(err, TGenParseError::FieldCount { .. }));
}

#[test]
fn parse_survives_garbage_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tgen.log");
    let content = format!("not a log line at all\n{}\n\n", complete_line(100.0, 1));
    std::fs::write(&path, content).unwrap();

    let mut parser = TGenParser::new(None);
    parser.parse(DataSource::open(&path).unwrap(), true);
    assert_eq!(parser.into_data().transfers.len(), 1);
}
