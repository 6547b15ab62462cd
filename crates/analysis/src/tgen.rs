// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateful parser for traffic-generator transfer logs.
//!
//! The transfer schema is positional: fields are addressed by constant
//! index and a field-count mismatch is a parse error, never a guess.
//! In-flight transfers are keyed by `<vertex>:<count>`; a terminal
//! `transfer-complete` / `transfer-error` line closes the entry out and
//! feeds the summary series.

use crate::source::DataSource;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Payload-progress deciles tracked per transfer.
const DECILES: [f64; 11] = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

/// Cumulative byte thresholds tracked per transfer.
const BYTE_THRESHOLDS: [u64; 9] =
    [10240, 20480, 51200, 102400, 204800, 512000, 1048576, 2097152, 5242880];

/// Milestone keys, in the fixed order they appear on terminal lines.
const MILESTONES: [&str; 11] = [
    "socket_create",
    "socket_connect",
    "proxy_init",
    "proxy_choice",
    "proxy_request",
    "proxy_response",
    "command",
    "response",
    "first_byte",
    "last_byte",
    "checksum",
];

/// Errors raised while decoding a single log line. The parser logs these
/// and moves on; they never propagate.
#[derive(Debug, thiserror::Error)]
pub enum TGenParseError {
    #[error("line has {found} fields, expected at least {expected}")]
    FieldCount { expected: usize, found: usize },
    #[error("tuple field {index} has {found} entries, expected at least {expected}")]
    TupleArity { index: usize, expected: usize, found: usize },
    #[error("field {index} is not a number: {value}")]
    BadNumber { index: usize, value: String },
    #[error("field {index} is not a key=value token: {value}")]
    BadToken { index: usize, value: String },
}

/// One parsed status/terminal event line.
#[derive(Debug, Clone)]
struct TransferEvent {
    is_success: bool,
    is_error: bool,
    is_complete: bool,
    unix_ts_end: f64,
    unix_ts_start: Option<f64>,
    endpoint_local: String,
    endpoint_proxy: String,
    endpoint_remote: String,
    transfer_id: String,
    endpoint_name: String,
    method: String,
    filesize_bytes: u64,
    error_code: String,
    total_bytes_read: u64,
    total_bytes_write: u64,
    is_commander: bool,
    payload_bytes_status: u64,
    elapsed_seconds: BTreeMap<String, f64>,
}

fn split_eq<'a>(token: &'a str, index: usize) -> Result<&'a str, TGenParseError> {
    token
        .split_once('=')
        .map(|(_, v)| v)
        .ok_or_else(|| TGenParseError::BadToken { index, value: token.to_string() })
}

fn parse_u64(value: &str, index: usize) -> Result<u64, TGenParseError> {
    value
        .parse()
        .map_err(|_| TGenParseError::BadNumber { index, value: value.to_string() })
}

fn parse_f64(value: &str, index: usize) -> Result<f64, TGenParseError> {
    value
        .parse()
        .map_err(|_| TGenParseError::BadNumber { index, value: value.to_string() })
}

impl TransferEvent {
    /// Decode the common (status) portion of a transfer line.
    fn from_status_parts(parts: &[&str]) -> Result<Self, TGenParseError> {
        if parts.len() < 14 {
            return Err(TGenParseError::FieldCount { expected: 14, found: parts.len() });
        }

        let unix_ts_end = parse_f64(parts[2], 2)?;

        let transport: Vec<&str> = parts[8].split(',').collect();
        if transport.len() < 5 {
            return Err(TGenParseError::TupleArity {
                index: 8,
                expected: 5,
                found: transport.len(),
            });
        }

        let transfer: Vec<&str> = parts[10].split(',').collect();
        if transfer.len() < 9 {
            return Err(TGenParseError::TupleArity {
                index: 10,
                expected: 9,
                found: transfer.len(),
            });
        }

        let method = transfer[3].to_string();
        let progress_token = parts[13];
        // The commander is the side that sent the command, i.e. the side
        // driving the transfer.
        let is_commander = (method == "GET" && progress_token.contains("read"))
            || (method == "PUT" && progress_token.contains("write"));
        let payload = split_eq(progress_token, 13)?;
        let payload_done = payload
            .split_once('/')
            .map(|(done, _)| done)
            .unwrap_or(payload);

        Ok(Self {
            is_success: false,
            is_error: false,
            is_complete: false,
            unix_ts_end,
            unix_ts_start: None,
            endpoint_local: transport[2].to_string(),
            endpoint_proxy: transport[3].to_string(),
            endpoint_remote: transport[4].to_string(),
            transfer_id: format!("{}:{}", transfer[0], transfer[1]),
            endpoint_name: transfer[2].to_string(),
            method,
            filesize_bytes: parse_u64(transfer[4], 10)?,
            error_code: split_eq(transfer[8], 10)?.to_string(),
            total_bytes_read: parse_u64(split_eq(parts[11], 11)?, 11)?,
            total_bytes_write: parse_u64(split_eq(parts[12], 12)?, 12)?,
            is_commander,
            payload_bytes_status: parse_u64(payload_done, 13)?,
            elapsed_seconds: BTreeMap::new(),
        })
    }

    /// Decode a terminal line: the status portion plus the 11 milestone
    /// tokens. Negative milestone values mean "not reached"; the start
    /// time derives from the last reached milestone in fixed order.
    fn from_terminal_parts(parts: &[&str], success: bool) -> Result<Self, TGenParseError> {
        let mut event = Self::from_status_parts(parts)?;
        if parts.len() < 15 + MILESTONES.len() {
            return Err(TGenParseError::FieldCount {
                expected: 15 + MILESTONES.len(),
                found: parts.len(),
            });
        }

        let mut last_elapsed = 0.0_f64;
        for (i, key) in MILESTONES.iter().enumerate() {
            let index = 15 + i;
            let usecs: i64 = split_eq(parts[index], index)?
                .parse()
                .map_err(|_| TGenParseError::BadNumber {
                    index,
                    value: parts[index].to_string(),
                })?;
            if usecs >= 0 {
                last_elapsed = usecs as f64 / 1_000_000.0;
                event.elapsed_seconds.entry((*key).to_string()).or_insert(last_elapsed);
            }
        }

        event.is_complete = true;
        event.is_success = success;
        event.is_error = !success;
        event.unix_ts_start = Some(event.unix_ts_end - last_elapsed);
        Ok(event)
    }
}

/// In-flight transfer state: decile/threshold crossings accumulate across
/// status events until a terminal event closes the transfer.
#[derive(Debug)]
struct Transfer {
    deciles: [Option<f64>; DECILES.len()],
    byte_thresholds: [Option<f64>; BYTE_THRESHOLDS.len()],
    last_event: Option<TransferEvent>,
}

impl Transfer {
    fn new() -> Self {
        Self {
            deciles: [None; DECILES.len()],
            byte_thresholds: [None; BYTE_THRESHOLDS.len()],
            last_event: None,
        }
    }

    fn add_event(&mut self, event: TransferEvent) {
        if event.filesize_bytes > 0 {
            let frac = event.payload_bytes_status as f64 / event.filesize_bytes as f64;
            for (i, decile) in DECILES.iter().enumerate() {
                if frac >= *decile && self.deciles[i].is_none() {
                    self.deciles[i] = Some(event.unix_ts_end);
                }
            }
        }
        for (i, threshold) in BYTE_THRESHOLDS.iter().enumerate() {
            if event.payload_bytes_status >= *threshold && self.byte_thresholds[i].is_none() {
                self.byte_thresholds[i] = Some(event.unix_ts_end);
            }
        }
        self.last_event = Some(event);
    }

    /// Completed record, or `None` if no terminal event arrived.
    fn into_record(self) -> Option<TransferRecord> {
        let event = self.last_event?;
        if !event.is_complete {
            return None;
        }
        let payload_progress = DECILES
            .iter()
            .zip(self.deciles.iter())
            .map(|(decile, ts)| (format!("{decile:.1}"), *ts))
            .collect();
        let payload_bytes = BYTE_THRESHOLDS
            .iter()
            .zip(self.byte_thresholds.iter())
            .map(|(threshold, ts)| (threshold.to_string(), *ts))
            .collect();
        Some(TransferRecord {
            is_success: event.is_success,
            is_error: event.is_error,
            is_complete: event.is_complete,
            unix_ts_start: event.unix_ts_start.unwrap_or(event.unix_ts_end),
            unix_ts_end: event.unix_ts_end,
            endpoint_local: event.endpoint_local,
            endpoint_proxy: event.endpoint_proxy,
            endpoint_remote: event.endpoint_remote,
            endpoint_name: event.endpoint_name,
            transfer_id: event.transfer_id,
            method: event.method,
            filesize_bytes: event.filesize_bytes,
            error_code: event.error_code,
            total_bytes_read: event.total_bytes_read,
            total_bytes_write: event.total_bytes_write,
            is_commander: event.is_commander,
            payload_bytes_status: event.payload_bytes_status,
            elapsed_seconds: event.elapsed_seconds,
            payload_progress,
            payload_bytes,
        })
    }
}

/// A completed transfer, as published in the analysis document.
///
/// `payload_progress` / `payload_bytes` hold the first wall-clock
/// timestamp at which each decile / byte threshold was crossed, `None`
/// when the transfer never got there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub is_success: bool,
    pub is_error: bool,
    pub is_complete: bool,
    pub unix_ts_start: f64,
    pub unix_ts_end: f64,
    pub endpoint_local: String,
    pub endpoint_proxy: String,
    pub endpoint_remote: String,
    pub endpoint_name: String,
    pub transfer_id: String,
    pub method: String,
    pub filesize_bytes: u64,
    pub error_code: String,
    pub total_bytes_read: u64,
    pub total_bytes_write: u64,
    pub is_commander: bool,
    pub payload_bytes_status: u64,
    pub elapsed_seconds: BTreeMap<String, f64>,
    pub payload_progress: BTreeMap<String, Option<f64>>,
    pub payload_bytes: BTreeMap<String, Option<f64>>,
}

/// Summary series keyed by file size (first/last byte) or error code.
/// Inner maps are keyed by the integer second the transfer ended on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransfersSummary {
    pub time_to_first_byte: BTreeMap<u64, BTreeMap<i64, Vec<f64>>>,
    pub time_to_last_byte: BTreeMap<u64, BTreeMap<i64, Vec<f64>>>,
    pub errors: BTreeMap<String, BTreeMap<i64, Vec<u64>>>,
}

/// The tgen half of a node's analysis data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TGenData {
    pub transfers: BTreeMap<String, TransferRecord>,
    pub transfers_summary: TransfersSummary,
}

/// Stateful transfer-log parser.
pub struct TGenParser {
    in_flight: HashMap<String, Transfer>,
    data: TGenData,
    name: Option<String>,
    date_filter: Option<NaiveDate>,
    do_complete: bool,
}

impl TGenParser {
    pub fn new(date_filter: Option<NaiveDate>) -> Self {
        Self {
            in_flight: HashMap::new(),
            data: TGenData::default(),
            name: None,
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
                    warn!(error = %e, "stopping tgen parse on read error");
                    break;
                }
            };
            if let Err(e) = self.parse_line(&line) {
                debug!(error = %e, line = %line, "skipping unparseable tgen line");
            }
        }
    }

    /// The node name captured from the generator's init banner.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn into_data(self) -> TGenData {
        if !self.in_flight.is_empty() {
            info!(open = self.in_flight.len(), "dropping transfers that never completed");
        }
        self.data
    }

    fn date_matches(&self, parts: &[&str]) -> bool {
        let Some(filter) = self.date_filter else {
            return true;
        };
        let Some(ts) = parts.get(2).and_then(|p| p.parse::<f64>().ok()) else {
            return false;
        };
        operf_core::utc_date_of(ts) == Some(filter)
    }

    fn parse_line(&mut self, line: &str) -> Result<(), TGenParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();

        if self.name.is_none() && line.contains("Initializing traffic generator on host") {
            if let Some(name) = parts.get(11) {
                self.name = Some((*name).to_string());
            }
            return Ok(());
        }

        if !self.date_matches(&parts) {
            return Ok(());
        }

        if line.contains("state RESPONSE to state PAYLOAD") {
            // Another generator run restarts the sequence counter from 1.
            // A stale in-flight entry under the same identity can never
            // complete, so drop it now.
            if let Some(tuple) = parts.get(7) {
                let mut fields = tuple.split(',');
                if let (Some(vertex), Some(count)) = (fields.next(), fields.next()) {
                    self.in_flight.remove(&format!("{vertex}:{count}"));
                }
            }
        } else if line.contains("transfer-status") {
            if self.do_complete {
                let event = TransferEvent::from_status_parts(&parts)?;
                self.in_flight
                    .entry(event.transfer_id.clone())
                    .or_insert_with(Transfer::new)
                    .add_event(event);
            }
        } else if line.contains("transfer-complete") {
            let event = TransferEvent::from_terminal_parts(&parts, true)?;
            self.finish_transfer(event);
        } else if line.contains("transfer-error") {
            let event = TransferEvent::from_terminal_parts(&parts, false)?;
            self.finish_transfer(event);
        }
        Ok(())
    }

    /// Single emission point for terminal events: the completed table is
    /// gated by `do_complete`, the summaries never are.
    fn finish_transfer(&mut self, event: TransferEvent) {
        let id = event.transfer_id.clone();
        let filesize = event.filesize_bytes;
        let second = event.unix_ts_end as i64;
        let is_error = event.is_error;
        let error_code = event.error_code.clone();
        let elapsed = event.elapsed_seconds.clone();

        let mut transfer = self.in_flight.remove(&id).unwrap_or_else(Transfer::new);
        transfer.add_event(event);

        if self.do_complete {
            if let Some(record) = transfer.into_record() {
                self.data.transfers.insert(id, record);
            }
        }

        if is_error {
            self.data
                .transfers_summary
                .errors
                .entry(error_code)
                .or_default()
                .entry(second)
                .or_default()
                .push(filesize);
        } else if let (Some(command), Some(first), Some(last)) = (
            elapsed.get("command"),
            elapsed.get("first_byte"),
            elapsed.get("last_byte"),
        ) {
            self.data
                .transfers_summary
                .time_to_first_byte
                .entry(filesize)
                .or_default()
                .entry(second)
                .or_default()
                .push(first - command);
            self.data
                .transfers_summary
                .time_to_last_byte
                .entry(filesize)
                .or_default()
                .entry(second)
                .or_default()
                .push(last - command);
        }
    }
}

#[cfg(test)]
#[path = "tgen_tests.rs"]
mod tests;
