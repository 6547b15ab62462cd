// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline reprocessing: pair archived tgen/torctl logs by embedded date
//! and fan one analysis job per pair out across worker threads.

use crate::doc::Analysis;
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// One day's worth of logs for one node.
#[derive(Debug, Clone)]
pub struct LogPair {
    pub tgen: PathBuf,
    pub torctl: PathBuf,
    pub date: NaiveDate,
}

/// Recursively collect files under `dirpath` matching `pattern`, sorted
/// by path so pairing is deterministic.
pub fn collect_logs(dirpath: &Path, pattern: &str) -> Vec<PathBuf> {
    let Ok(regex) = Regex::new(pattern) else {
        warn!(pattern, "invalid log pattern");
        return Vec::new();
    };
    let mut logs = operf_core::find_file_paths(dirpath, std::slice::from_ref(&regex));
    logs.sort();
    logs
}

/// Pair tgen logs with torctl logs via the `YYYY-MM-DD` embedded in their
/// file names. Unmatched or undated files are logged and dropped.
pub fn pair_logs(
    tgen_logs: &[PathBuf],
    torctl_logs: &[PathBuf],
    date_filter: Option<NaiveDate>,
) -> Vec<LogPair> {
    #[allow(clippy::unwrap_used)] // pattern is a literal
    let date_re = Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap();

    let mut pairs = Vec::new();
    for tgen in tgen_logs {
        let name = tgen.to_string_lossy();
        let Some(found) = date_re.find(&name) else {
            warn!(file = %tgen.display(), "file name does not contain a date");
            continue;
        };
        let date_str = found.as_str();
        let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            warn!(file = %tgen.display(), "file name date does not parse");
            continue;
        };
        if let Some(filter) = date_filter {
            if date != filter {
                continue;
            }
        }
        match torctl_logs
            .iter()
            .find(|t| t.to_string_lossy().contains(date_str))
        {
            Some(torctl) => pairs.push(LogPair {
                tgen: tgen.clone(),
                torctl: torctl.clone(),
                date,
            }),
            None => warn!(file = %tgen.display(), "no matching torctl log, skipping"),
        }
    }
    if pairs.is_empty() {
        warn!("no log pairs found, nothing to reprocess");
    }
    pairs
}

/// Run one analysis per pair, saving each result into `output_dir` with
/// its date prefix. Jobs are spread across all available cores; per-pair
/// failures are logged and do not stop the batch. Returns the number of
/// pairs that completed.
pub fn reprocess_pairs(
    pairs: &[LogPair],
    output_dir: &Path,
    nickname: Option<&str>,
    do_complete: bool,
) -> usize {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(pairs.len().max(1));
    let next = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(pair) = pairs.get(index) else {
                    break;
                };
                info!(date = %pair.date, "analyzing log pair");
                match run_pair(pair, output_dir, nickname, do_complete) {
                    Ok(()) => {
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!(date = %pair.date, error = %e, "log pair analysis failed");
                    }
                }
            });
        }
    });

    completed.into_inner()
}

fn run_pair(
    pair: &LogPair,
    output_dir: &Path,
    nickname: Option<&str>,
    do_complete: bool,
) -> Result<(), crate::doc::AnalysisError> {
    let mut analysis = Analysis::new(nickname.map(str::to_string), None);
    analysis.add_tgen_file(&pair.tgen);
    analysis.add_torctl_file(&pair.torctl);
    analysis.analyze(do_complete, Some(pair.date))?;
    analysis.save(output_dir, None, true, Some(pair.date))?;
    Ok(())
}

#[cfg(test)]
#[path = "reprocess_tests.rs"]
mod tests;
