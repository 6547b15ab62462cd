// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateful parser for control-port monitor logs.
//!
//! Monitor lines are `<date> <time> <unix_ts> <payload>`. A payload is an
//! asynchronous event iff it carries the ` 650 ` separator; everything
//! else is banner or routine output. The logged timestamp is
//! authoritative, not arrival order. Nothing past the banner is inspected
//! until the daemon reports bootstrap completion.

use crate::source::DataSource;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Purposes that mark a circuit as serving an onion service.
const HS_PURPOSES: [&str; 4] =
    ["HS_CLIENT_INTRO", "HS_CLIENT_REND", "HS_SERVICE_INTRO", "HS_SERVICE_REND"];

#[derive(Debug, thiserror::Error)]
pub enum CtlParseError {
    #[error("event body is empty")]
    Empty,
    #[error("event {kind} has {found} fields, expected at least {expected}")]
    FieldCount { kind: String, expected: usize, found: usize },
    #[error("field {index} is not a number: {value}")]
    BadNumber { index: usize, value: String },
    #[error("line carries no unix timestamp")]
    BadTimestamp,
}

/// One hop of a circuit path: fingerprint and nickname.
#[derive(Debug, Clone)]
struct PathHop {
    fingerprint: String,
    nickname: Option<String>,
}

impl PathHop {
    fn long_name(&self) -> String {
        match &self.nickname {
            Some(nick) => format!("${}~{}", self.fingerprint, nick),
            None => format!("${}", self.fingerprint),
        }
    }
}

/// Key=value arguments trailing an event body.
fn split_args<'a>(tokens: &[&'a str]) -> (Vec<&'a str>, HashMap<&'a str, &'a str>) {
    let mut positional = Vec::new();
    let mut args = HashMap::new();
    for token in tokens {
        match token.split_once('=') {
            Some((k, v)) => {
                args.insert(k, v);
            }
            None => positional.push(*token),
        }
    }
    (positional, args)
}

fn parse_path(token: &str) -> Vec<PathHop> {
    token
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let entry = entry.strip_prefix('$').unwrap_or(entry);
            match entry.split_once(['~', '=']) {
                Some((fp, nick)) => PathHop {
                    fingerprint: fp.to_string(),
                    nickname: Some(nick.to_string()),
                },
                None => PathHop { fingerprint: entry.to_string(), nickname: None },
            }
        })
        .collect()
}

fn parse_id(tokens: &[&str], kind: &str, index: usize) -> Result<u64, CtlParseError> {
    let value = tokens.get(index).ok_or_else(|| CtlParseError::FieldCount {
        kind: kind.to_string(),
        expected: index + 1,
        found: tokens.len(),
    })?;
    value
        .parse()
        .map_err(|_| CtlParseError::BadNumber { index, value: (*value).to_string() })
}

/// A decoded asynchronous control event.
#[derive(Debug)]
enum ControlEvent {
    Circuit {
        id: u64,
        status: String,
        path: Vec<PathHop>,
        purpose: Option<String>,
        hs_state: Option<String>,
        rend_query: Option<String>,
        reason: Option<String>,
        remote_reason: Option<String>,
    },
    CircMinor {
        id: u64,
        event: String,
        purpose: Option<String>,
        old_purpose: Option<String>,
        hs_state: Option<String>,
        rend_query: Option<String>,
    },
    Stream {
        id: u64,
        status: String,
        circuit_id: u64,
        target: String,
        source_addr: Option<String>,
        purpose: Option<String>,
        reason: Option<String>,
        remote_reason: Option<String>,
    },
    Bandwidth {
        read: u64,
        written: u64,
    },
    BuildTimeoutSet {
        timeout_ms: Option<i64>,
        quantile: Option<f64>,
    },
    /// A subscribed event kind this parser has no use for.
    Other,
}

impl ControlEvent {
    /// Decode a raw event body (everything after the `650 ` code).
    fn parse(body: &str) -> Result<Self, CtlParseError> {
        let tokens: Vec<&str> = body.split_whitespace().collect();
        let kind = *tokens.first().ok_or(CtlParseError::Empty)?;
        match kind {
            "CIRC" => {
                let id = parse_id(&tokens, kind, 1)?;
                let status = tokens
                    .get(2)
                    .ok_or_else(|| CtlParseError::FieldCount {
                        kind: kind.to_string(),
                        expected: 3,
                        found: tokens.len(),
                    })?
                    .to_string();
                let (positional, args) = split_args(&tokens[3..]);
                let path = positional.first().map(|p| parse_path(p)).unwrap_or_default();
                Ok(Self::Circuit {
                    id,
                    status,
                    path,
                    purpose: args.get("PURPOSE").map(|v| v.to_string()),
                    hs_state: args.get("HS_STATE").map(|v| v.to_string()),
                    rend_query: args.get("REND_QUERY").map(|v| v.to_string()),
                    reason: args.get("REASON").map(|v| v.to_string()),
                    remote_reason: args.get("REMOTE_REASON").map(|v| v.to_string()),
                })
            }
            "CIRC_MINOR" => {
                let id = parse_id(&tokens, kind, 1)?;
                let event = tokens
                    .get(2)
                    .ok_or_else(|| CtlParseError::FieldCount {
                        kind: kind.to_string(),
                        expected: 3,
                        found: tokens.len(),
                    })?
                    .to_string();
                let (_, args) = split_args(&tokens[3..]);
                Ok(Self::CircMinor {
                    id,
                    event,
                    purpose: args.get("PURPOSE").map(|v| v.to_string()),
                    old_purpose: args.get("OLD_PURPOSE").map(|v| v.to_string()),
                    hs_state: args.get("HS_STATE").map(|v| v.to_string()),
                    rend_query: args.get("REND_QUERY").map(|v| v.to_string()),
                })
            }
            "STREAM" => {
                if tokens.len() < 5 {
                    return Err(CtlParseError::FieldCount {
                        kind: kind.to_string(),
                        expected: 5,
                        found: tokens.len(),
                    });
                }
                let id = parse_id(&tokens, kind, 1)?;
                let circuit_id = parse_id(&tokens, kind, 3)?;
                let (_, args) = split_args(&tokens[5..]);
                Ok(Self::Stream {
                    id,
                    status: tokens[2].to_string(),
                    circuit_id,
                    target: tokens[4].to_string(),
                    source_addr: args.get("SOURCE_ADDR").map(|v| v.to_string()),
                    purpose: args.get("PURPOSE").map(|v| v.to_string()),
                    reason: args.get("REASON").map(|v| v.to_string()),
                    remote_reason: args.get("REMOTE_REASON").map(|v| v.to_string()),
                })
            }
            "BW" => {
                let read = parse_id(&tokens, kind, 1)?;
                let written = parse_id(&tokens, kind, 2)?;
                Ok(Self::Bandwidth { read, written })
            }
            "BUILDTIMEOUT_SET" => {
                let (_, args) = split_args(&tokens[1..]);
                let timeout_ms = args.get("TIMEOUT_MS").and_then(|v| v.parse().ok());
                let quantile = args.get("CUTOFF_QUANTILE").and_then(|v| v.parse().ok());
                Ok(Self::BuildTimeoutSet { timeout_ms, quantile })
            }
            _ => Ok(Self::Other),
        }
    }
}

/// In-flight circuit state.
#[derive(Debug, Default)]
struct TorCircuit {
    unix_ts_start: Option<f64>,
    unix_ts_end: Option<f64>,
    buildtime: Option<f64>,
    build_timeout: Option<i64>,
    build_quantile: Option<f64>,
    failure_reason_local: Option<String>,
    failure_reason_remote: Option<String>,
    transitions: Vec<(String, f64)>,
    path: Vec<(String, f64)>,
}

impl TorCircuit {
    fn set_launched(&mut self, ts: f64, timeout: Option<i64>, quantile: Option<f64>) {
        if self.unix_ts_start.is_none() {
            self.unix_ts_start = Some(ts);
        }
        self.build_timeout = timeout;
        self.build_quantile = quantile;
    }

    fn add_transition(&mut self, key: String, ts: f64) {
        self.transitions.push((key, ts));
    }

    fn add_hop(&mut self, hop: &PathHop, ts: f64) {
        self.path.push((hop.long_name(), ts));
    }

    fn set_build_time(&mut self, ts: f64) {
        if self.buildtime.is_none() {
            self.buildtime = Some(ts);
        }
    }

    fn into_record(self, circuit_id: u64) -> Option<CircuitRecord> {
        let unix_ts_start = self.unix_ts_start?;
        let unix_ts_end = self.unix_ts_end?;
        Some(CircuitRecord {
            circuit_id,
            unix_ts_start,
            unix_ts_end,
            buildtime_seconds: self.buildtime,
            build_timeout: self.build_timeout,
            build_quantile: self.build_quantile,
            failure_reason_local: self.failure_reason_local,
            failure_reason_remote: self.failure_reason_remote,
            transitions: self.transitions,
            path: self.path,
            filtered_out: None,
        })
    }
}

/// In-flight stream state.
#[derive(Debug, Default)]
struct TorStream {
    circuit_id: Option<u64>,
    unix_ts_start: Option<f64>,
    unix_ts_end: Option<f64>,
    failure_reason_local: Option<String>,
    failure_reason_remote: Option<String>,
    source: Option<String>,
    target: Option<String>,
    last_purpose: Option<String>,
    transitions: Vec<(String, f64)>,
}

impl TorStream {
    fn add_transition(&mut self, purpose: Option<String>, status: &str, ts: f64) {
        if purpose.is_some() {
            self.last_purpose = purpose;
        }
        let key = format!("{}:{}", self.last_purpose.as_deref().unwrap_or("None"), status);
        self.transitions.push((key, ts));
    }

    fn into_record(self, stream_id: u64) -> Option<StreamRecord> {
        let unix_ts_start = self.unix_ts_start?;
        let unix_ts_end = self.unix_ts_end?;
        Some(StreamRecord {
            stream_id,
            circuit_id: self.circuit_id,
            unix_ts_start,
            unix_ts_end,
            failure_reason_local: self.failure_reason_local,
            failure_reason_remote: self.failure_reason_remote,
            source: self.source,
            target: self.target,
            transitions: self.transitions,
        })
    }
}

/// A completed circuit, as published in the analysis document.
/// `buildtime_seconds` is the build-completion timestamp; path hops and
/// transitions carry the timestamps they arrived at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub circuit_id: u64,
    pub unix_ts_start: f64,
    pub unix_ts_end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildtime_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_quantile: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason_local: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason_remote: Option<String>,
    pub transitions: Vec<(String, f64)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<(String, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_out: Option<bool>,
}

/// A completed stream, as published in the analysis document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_id: Option<u64>,
    pub unix_ts_start: f64,
    pub unix_ts_end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason_local: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason_remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub transitions: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitsSummary {
    pub buildtimes: Vec<f64>,
    pub lifetimes: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamsSummary {
    pub lifetimes: BTreeMap<String, Vec<f64>>,
}

/// Bytes read/written per wall-clock second; a later report for the same
/// second overwrites the earlier one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BandwidthSummary {
    pub bytes_read: BTreeMap<i64, u64>,
    pub bytes_written: BTreeMap<i64, u64>,
}

/// The tor half of a node's analysis data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorData {
    pub circuits: BTreeMap<u64, CircuitRecord>,
    pub circuits_summary: CircuitsSummary,
    pub streams: BTreeMap<u64, StreamRecord>,
    pub streams_summary: StreamsSummary,
    pub bandwidth_summary: BandwidthSummary,
}

/// Stateful control-log parser.
pub struct TorCtlParser {
    circuits_state: HashMap<u64, TorCircuit>,
    streams_state: HashMap<u64, TorStream>,
    data: TorData,
    name: Option<String>,
    boot_succeeded: bool,
    build_timeout_last: Option<i64>,
    build_quantile_last: Option<f64>,
    date_filter: Option<NaiveDate>,
    do_complete: bool,
}

impl TorCtlParser {
    pub fn new(date_filter: Option<NaiveDate>) -> Self {
        Self {
            circuits_state: HashMap::new(),
            streams_state: HashMap::new(),
            data: TorData::default(),
            name: None,
            boot_succeeded: false,
            build_timeout_last: None,
            build_quantile_last: None,
            date_filter,
            do_complete: false,
        }
    }

    /// Run the parser over one log source. Lines that fail to decode are
    /// logged and skipped.
    pub fn parse(&mut self, source: DataSource, do_complete: bool) {
        self.do_complete = do_complete;
        for line in source.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "stopping torctl parse on read error");
                    break;
                }
            };
            if let Err(e) = self.parse_line(&line) {
                debug!(error = %e, line = %line, "skipping unparseable torctl line");
            }
        }
    }

    /// The node name captured from the monitor banner.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn into_data(self) -> TorData {
        self.data
    }

    fn parse_line(&mut self, line: &str) -> Result<(), CtlParseError> {
        if !self.boot_succeeded {
            if line.contains("Starting torctl program on host") {
                let mut tokens = line.split_whitespace();
                while let Some(token) = tokens.next() {
                    if token == "host" {
                        self.name = tokens.next().map(str::to_string);
                        break;
                    }
                }
            }
            if line.contains("Bootstrapped 100")
                || (line.contains("BOOTSTRAP") && line.contains("PROGRESS=100"))
            {
                self.boot_succeeded = true;
            }
            return Ok(());
        }

        if !self.do_complete && !line.contains(" 650 BW ") {
            return Ok(());
        }

        let Some((timestamps, body)) = line.split_once(" 650 ") else {
            return Ok(());
        };
        let unix_ts: f64 = timestamps
            .split_whitespace()
            .nth(2)
            .and_then(|t| t.parse().ok())
            .ok_or(CtlParseError::BadTimestamp)?;

        if let Some(filter) = self.date_filter {
            if operf_core::utc_date_of(unix_ts) != Some(filter) {
                return Ok(());
            }
        }

        match ControlEvent::parse(body)? {
            ControlEvent::Circuit {
                id,
                status,
                path,
                purpose,
                hs_state,
                rend_query,
                reason,
                remote_reason,
            } => {
                self.handle_circuit(
                    id,
                    &status,
                    &path,
                    purpose,
                    hs_state,
                    rend_query,
                    reason,
                    remote_reason,
                    unix_ts,
                );
            }
            ControlEvent::CircMinor { id, event, purpose, old_purpose, hs_state, rend_query } => {
                self.handle_circ_minor(id, &event, purpose, old_purpose, hs_state, rend_query, unix_ts);
            }
            ControlEvent::Stream {
                id,
                status,
                circuit_id,
                target,
                source_addr,
                purpose,
                reason,
                remote_reason,
            } => {
                self.handle_stream(
                    id,
                    &status,
                    circuit_id,
                    target,
                    source_addr,
                    purpose,
                    reason,
                    remote_reason,
                    unix_ts,
                );
            }
            ControlEvent::Bandwidth { read, written } => {
                let second = unix_ts as i64;
                self.data.bandwidth_summary.bytes_read.insert(second, read);
                self.data.bandwidth_summary.bytes_written.insert(second, written);
            }
            ControlEvent::BuildTimeoutSet { timeout_ms, quantile } => {
                self.build_timeout_last = timeout_ms;
                self.build_quantile_last = quantile;
            }
            ControlEvent::Other => {}
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_circuit(
        &mut self,
        id: u64,
        status: &str,
        path: &[PathHop],
        purpose: Option<String>,
        hs_state: Option<String>,
        rend_query: Option<String>,
        reason: Option<String>,
        remote_reason: Option<String>,
        ts: f64,
    ) {
        let is_hs = purpose.as_deref().is_some_and(|p| HS_PURPOSES.contains(&p));
        let circ = self.circuits_state.entry(id).or_default();

        if status == "LAUNCHED" {
            circ.set_launched(ts, self.build_timeout_last, self.build_quantile_last);
        }

        circ.add_transition(
            format!("{}:{}", purpose.as_deref().unwrap_or("NONE"), status),
            ts,
        );

        match status {
            "EXTENDED" => {
                if let Some(hop) = path.last() {
                    circ.add_hop(hop, ts);
                }
            }
            "FAILED" => {
                circ.failure_reason_local = reason;
                if let Some(remote) = remote_reason.filter(|r| !r.is_empty()) {
                    circ.failure_reason_remote = Some(remote);
                }
            }
            "BUILT" => {
                circ.set_build_time(ts);
                if is_hs {
                    if let Some(state) = hs_state {
                        let key = match rend_query.filter(|q| !q.is_empty()) {
                            Some(query) => format!("{state}:{query}"),
                            None => state,
                        };
                        circ.add_transition(key, ts);
                    }
                }
            }
            _ => {}
        }

        if status == "CLOSED" || status == "FAILED" {
            circ.unix_ts_end = Some(ts);
            let hops = circ.path.len();
            if let Some(circ) = self.circuits_state.remove(&id) {
                let (started, built) = (circ.unix_ts_start, circ.buildtime);
                if let Some(record) = circ.into_record(id) {
                    if hops == 3 {
                        if let (Some(start), Some(built)) = (started, built) {
                            self.data.circuits_summary.buildtimes.push(built - start);
                        }
                    }
                    self.data
                        .circuits_summary
                        .lifetimes
                        .push(record.unix_ts_end - record.unix_ts_start);
                    if self.do_complete {
                        self.data.circuits.insert(id, record);
                    }
                }
            }
        }
    }

    fn handle_circ_minor(
        &mut self,
        id: u64,
        event: &str,
        purpose: Option<String>,
        old_purpose: Option<String>,
        hs_state: Option<String>,
        rend_query: Option<String>,
        ts: f64,
    ) {
        if !self.do_complete {
            return;
        }
        let is_hs = purpose.as_deref().is_some_and(|p| HS_PURPOSES.contains(&p));
        let circ = self.circuits_state.entry(id).or_default();

        if purpose != old_purpose || event != "PURPOSE_CHANGED" {
            circ.add_transition(
                format!("{}:{}", event, purpose.as_deref().unwrap_or("NONE")),
                ts,
            );
        }
        if is_hs {
            if let Some(state) = hs_state {
                let key = match rend_query.filter(|q| !q.is_empty()) {
                    Some(query) => format!("{state}:{query}"),
                    None => state,
                };
                circ.add_transition(key, ts);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_stream(
        &mut self,
        id: u64,
        status: &str,
        circuit_id: u64,
        target: String,
        source_addr: Option<String>,
        purpose: Option<String>,
        reason: Option<String>,
        remote_reason: Option<String>,
        ts: f64,
    ) {
        let strm = self.streams_state.entry(id).or_default();
        strm.circuit_id = Some(circuit_id);
        strm.add_transition(purpose, status, ts);
        strm.target = Some(target);

        match status {
            "NEW" | "NEWRESOLVE" => {
                if strm.unix_ts_start.is_none() {
                    strm.unix_ts_start = Some(ts);
                }
                strm.source = source_addr;
            }
            "FAILED" => {
                strm.failure_reason_local = reason;
                if let Some(remote) = remote_reason.filter(|r| !r.is_empty()) {
                    strm.failure_reason_remote = Some(remote);
                }
            }
            _ => {}
        }

        if status == "CLOSED" || status == "FAILED" {
            strm.unix_ts_end = Some(ts);
            if let Some(strm) = self.streams_state.remove(&id) {
                let purpose_key =
                    strm.last_purpose.clone().unwrap_or_else(|| "None".to_string());
                if let Some(record) = strm.into_record(id) {
                    self.data
                        .streams_summary
                        .lifetimes
                        .entry(purpose_key)
                        .or_default()
                        .push(record.unix_ts_end - record.unix_ts_start);
                    if self.do_complete {
                        self.data.streams.insert(id, record);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "torctl_tests.rs"]
mod tests;
