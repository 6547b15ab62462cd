// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay-fingerprint filtering over finished documents.
//!
//! Filtering never deletes a circuit: non-matching entries are annotated
//! with `filtered_out` so downstream consumers can tell "measured but
//! excluded" from "never measured". A filtered document is stamped
//! version 4.0 and records which filters ran under a top-level map.

use crate::doc::{Analysis, AnalysisError, FilterSpec};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Document version written after filtering.
const FILTERED_VERSION: &str = "4.0";

#[allow(clippy::unwrap_used)] // pattern is a literal
fn fingerprint_pattern() -> Regex {
    Regex::new(r"^\$?([0-9a-fA-F]{40})").unwrap()
}

/// Fingerprint include/exclude lists and their application.
#[derive(Default)]
pub struct Filtering {
    include: Option<Vec<String>>,
    include_path: Option<PathBuf>,
    exclude: Option<Vec<String>>,
    exclude_path: Option<PathBuf>,
}

impl Filtering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the allow-list: circuits must consist entirely of these relays.
    pub fn include_fingerprints(&mut self, path: &Path) -> io::Result<()> {
        self.include = Some(load_fingerprints(path)?);
        self.include_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Load the deny-list: circuits touching any of these relays are out.
    pub fn exclude_fingerprints(&mut self, path: &Path) -> io::Result<()> {
        self.exclude = Some(load_fingerprints(path)?);
        self.exclude_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Annotate every circuit in the document and stamp it as filtered.
    /// A no-op when neither list is loaded.
    pub fn apply(&self, analysis: &mut Analysis) {
        if self.include.is_none() && self.exclude.is_none() {
            return;
        }

        let pattern = fingerprint_pattern();
        let doc = analysis.doc_mut();
        for node in doc.data.values_mut() {
            let Some(tor) = node.tor.as_mut() else { continue };
            for circuit in tor.circuits.values_mut() {
                if !self.keep_circuit(&pattern, circuit) {
                    circuit.filtered_out = Some(true);
                }
            }
        }

        let mut specs = Vec::new();
        if let (Some(_), Some(path)) = (&self.include, &self.include_path) {
            specs.push(FilterSpec {
                name: "include_fingerprints".to_string(),
                filepath: path.display().to_string(),
            });
        }
        if let (Some(_), Some(path)) = (&self.exclude, &self.exclude_path) {
            specs.push(FilterSpec {
                name: "exclude_fingerprints".to_string(),
                filepath: path.display().to_string(),
            });
        }
        let mut filters = BTreeMap::new();
        filters.insert("tor/circuits".to_string(), specs);
        doc.filters = Some(filters);
        doc.version = FILTERED_VERSION.to_string();
    }

    fn keep_circuit(&self, pattern: &Regex, circuit: &crate::torctl::CircuitRecord) -> bool {
        if circuit.path.is_empty() {
            return false;
        }
        for (long_name, _) in &circuit.path {
            let Some(captures) = pattern.captures(long_name) else {
                continue;
            };
            let fingerprint = captures[1].to_uppercase();
            if let Some(include) = &self.include {
                if !include.contains(&fingerprint) {
                    return false;
                }
            }
            if let Some(exclude) = &self.exclude {
                if exclude.contains(&fingerprint) {
                    return false;
                }
            }
        }
        true
    }

    /// Load a saved document, filter it, and write the filtered copy.
    /// Returns `None` when the input could not be loaded.
    pub fn apply_to_file(
        &self,
        input: &Path,
        output_dir: &Path,
        output_file: &str,
    ) -> Result<Option<PathBuf>, AnalysisError> {
        let Some(mut analysis) = Analysis::load(input)? else {
            return Ok(None);
        };
        self.apply(&mut analysis);
        let path = analysis.save(output_dir, Some(output_file), true, None)?;
        Ok(Some(path))
    }
}

fn load_fingerprints(path: &Path) -> io::Result<Vec<String>> {
    let pattern = fingerprint_pattern();
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut fingerprints = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Some(captures) = pattern.captures(&line) {
            fingerprints.push(captures[1].to_uppercase());
        }
    }
    Ok(fingerprints)
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod tests;
