// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UTC date helpers shared by the parsers and the log rotation naming.

use chrono::{DateTime, NaiveDate, Utc};

/// Format a date as `YYYY-MM-DD`, or empty when absent.
///
/// Used for analysis file prefixes, where a missing date filter means no
/// prefix at all.
pub fn date_to_string(date: Option<NaiveDate>) -> String {
    match date {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}

/// The UTC calendar date a fractional unix timestamp falls on.
///
/// Returns `None` for timestamps outside the representable range.
pub fn utc_date_of(unix_ts: f64) -> Option<NaiveDate> {
    let secs = unix_ts.floor() as i64;
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.date_naive())
}

/// Timestamp suffix embedded in rotated archive names.
pub fn archive_stamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d_%H:%M:%S").to_string()
}

#[cfg(test)]
#[path = "dates_tests.rs"]
mod tests;
