// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared log fixtures: one simulated measurement day on host "cyan",
//! 2020-06-01 UTC (unix 1590969600..1591055999).

/// Midnight of the simulated day.
pub const DAY_START: f64 = 1_590_969_600.0;

pub fn tgen_transfer_complete(ts: f64, seq: u32, filesize: u64) -> String {
    format!(
        "2020-06-01 12:00:00 {ts} [message] [shd-tgen-transfer.c:1133] [_tgentransfer_log] \
         [transfer-complete] transport TCP,12,localhost:127.0.0.1:46878,localhost:127.0.0.1:43735,\
         server1:0.0.0.0:8080,state=SUCCESS,error=NONE transfer transfer5m,{seq},cyan,GET,{filesize},\
         (null),0,state=DONE,error=NONE total-bytes-read={filesize} total-bytes-write=23 \
         read-bytes={filesize}/{filesize} write-bytes=23/23 usecs-to-socket-create=11 \
         usecs-to-socket-connect=210 usecs-to-proxy-init=283 usecs-to-proxy-choice=348 \
         usecs-to-proxy-request=412 usecs-to-proxy-response=500 usecs-to-command=600 \
         usecs-to-response=700 usecs-to-first-byte=900000 usecs-to-last-byte=2500000 \
         usecs-to-checksum=2500100"
    )
}

pub fn tgen_transfer_error(ts: f64, seq: u32, filesize: u64) -> String {
    format!(
        "2020-06-01 12:05:00 {ts} [message] [shd-tgen-transfer.c:1133] [_tgentransfer_log] \
         [transfer-error] transport TCP,12,localhost:127.0.0.1:46878,localhost:127.0.0.1:43735,\
         server1:0.0.0.0:8080,state=ERROR,error=READ transfer transfer5m,{seq},cyan,GET,{filesize},\
         (null),0,state=ERROR,error=PROXY total-bytes-read=0 total-bytes-write=0 \
         read-bytes=0/{filesize} write-bytes=0/0 usecs-to-socket-create=11 \
         usecs-to-socket-connect=210 usecs-to-proxy-init=283 usecs-to-proxy-choice=348 \
         usecs-to-proxy-request=412 usecs-to-proxy-response=-1 usecs-to-command=-1 \
         usecs-to-response=-1 usecs-to-first-byte=-1 usecs-to-last-byte=-1 usecs-to-checksum=-1"
    )
}

pub fn tgen_status(ts: f64, seq: u32, filesize: u64, payload: u64) -> String {
    format!(
        "2020-06-01 12:00:00 {ts} [message] [shd-tgen-transfer.c:803] [_tgentransfer_log] \
         [transfer-status] transport TCP,12,localhost:127.0.0.1:46878,localhost:127.0.0.1:43735,\
         server1:0.0.0.0:8080,state=SUCCESS,error=NONE transfer transfer5m,{seq},cyan,GET,{filesize},\
         (null),0,state=DONE,error=NONE total-bytes-read={payload} total-bytes-write=23 \
         read-bytes={payload}/{filesize} write-bytes=23/23"
    )
}

pub fn tgen_log() -> String {
    let mut lines = vec![format!(
        "2020-06-01 00:00:05 {} [message] [tgen-main.c:98] [main] \
         Initializing traffic generator on host cyan process id 12345",
        DAY_START + 5.0
    )];
    // one successful transfer with progress, one error
    lines.push(tgen_status(DAY_START + 100.0, 1, 5242880, 524288));
    lines.push(tgen_status(DAY_START + 101.0, 1, 5242880, 2621440));
    lines.push(tgen_transfer_complete(DAY_START + 102.5, 1, 5242880));
    lines.push(tgen_transfer_error(DAY_START + 400.0, 2, 5242880));
    lines.join("\n") + "\n"
}

pub fn torctl_log() -> String {
    const FP1: &str = "1111111111111111111111111111111111111111";
    const FP2: &str = "2222222222222222222222222222222222222222";
    const FP3: &str = "3333333333333333333333333333333333333333";
    let ctl = |ts: f64, body: String| format!("2020-06-01 00:10:00 {ts} 650 {body}");
    let t = DAY_START;
    let lines = vec![
        format!(
            "2020-06-01 00:00:01 {} Starting torctl program on host cyan \
             using Tor version 0.4.2.7 status=recommended",
            t + 1.0
        ),
        format!("2020-06-01 00:00:02 {} Bootstrapped 100 (done): Done", t + 2.0),
        ctl(
            t + 500.0,
            "BUILDTIMEOUT_SET COMPUTED TOTAL_TIMES=124 TIMEOUT_MS=1500 XM=450 ALPHA=1.8 \
             CUTOFF_QUANTILE=0.800000 TIMEOUT_RATE=0.02 CLOSE_MS=60000 CLOSE_RATE=0.01"
                .to_string(),
        ),
        ctl(t + 600.0, "CIRC 9 LAUNCHED BUILD_FLAGS=NEED_CAPACITY PURPOSE=GENERAL".to_string()),
        ctl(t + 601.0, format!("CIRC 9 EXTENDED ${FP1}~guard PURPOSE=GENERAL")),
        ctl(t + 602.0, format!("CIRC 9 EXTENDED ${FP1}~guard,${FP2}~middle PURPOSE=GENERAL")),
        ctl(
            t + 603.0,
            format!("CIRC 9 EXTENDED ${FP1}~guard,${FP2}~middle,${FP3}~exit PURPOSE=GENERAL"),
        ),
        ctl(
            t + 604.0,
            format!("CIRC 9 BUILT ${FP1}~guard,${FP2}~middle,${FP3}~exit PURPOSE=GENERAL"),
        ),
        ctl(
            t + 610.0,
            "STREAM 22 NEW 0 server1:8080 SOURCE_ADDR=127.0.0.1:41000 PURPOSE=USER".to_string(),
        ),
        ctl(t + 611.0, "STREAM 22 SENTCONNECT 9 server1:8080".to_string()),
        ctl(t + 640.0, "STREAM 22 CLOSED 9 server1:8080 REASON=DONE".to_string()),
        ctl(t + 700.0, "BW 4096 1024".to_string()),
        ctl(t + 701.0, "BW 8192 2048".to_string()),
        ctl(
            t + 900.0,
            format!(
                "CIRC 9 CLOSED ${FP1}~guard,${FP2}~middle,${FP3}~exit PURPOSE=GENERAL \
                 REASON=FINISHED"
            ),
        ),
    ];
    lines.join("\n") + "\n"
}
