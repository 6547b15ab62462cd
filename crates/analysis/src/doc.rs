// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The canonical analysis document: one JSON file per measurement day,
//! keyed by node nickname, wrapping the tgen and tor parser outputs.

use crate::source::DataSource;
use crate::tgen::{TGenData, TGenParser};
use crate::torctl::{TorCtlParser, TorData};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Document type tag. Kept stable so downstream consumers can dispatch.
pub const DOC_TYPE: &str = "onionperf";
/// Version written by a fresh analysis.
pub const DOC_VERSION: &str = "2.0";
/// Base name for published documents.
pub const BASE_FILENAME: &str = "onionperf.analysis.json";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("results for node {0} are already present; aggregate same-node files first")]
    MergeCollision(String),
}

/// One filter applied to a document (name + source file), recorded under
/// the top-level `filters` map of version-4.0 documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub name: String,
    pub filepath: String,
}

/// Per-node results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub measurement_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tgen: Option<TGenData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tor: Option<TorData>,
}

/// The serialized document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDoc {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub version: String,
    pub data: BTreeMap<String, NodeData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<BTreeMap<String, Vec<FilterSpec>>>,
}

impl Default for AnalysisDoc {
    fn default() -> Self {
        Self {
            doc_type: DOC_TYPE.to_string(),
            version: DOC_VERSION.to_string(),
            data: BTreeMap::new(),
            filters: None,
        }
    }
}

/// Collects log files, runs the parsers, and owns the result document.
pub struct Analysis {
    nickname: Option<String>,
    measurement_ip: Option<String>,
    tgen_paths: Vec<PathBuf>,
    torctl_paths: Vec<PathBuf>,
    date_filter: Option<NaiveDate>,
    doc: AnalysisDoc,
    analyzed: bool,
}

impl Analysis {
    pub fn new(nickname: Option<String>, measurement_ip: Option<String>) -> Self {
        Self {
            nickname,
            measurement_ip,
            tgen_paths: Vec::new(),
            torctl_paths: Vec::new(),
            date_filter: None,
            doc: AnalysisDoc::default(),
            analyzed: false,
        }
    }

    pub fn add_tgen_file(&mut self, path: impl Into<PathBuf>) {
        self.tgen_paths.push(path.into());
    }

    pub fn add_torctl_file(&mut self, path: impl Into<PathBuf>) {
        self.torctl_paths.push(path.into());
    }

    pub fn doc(&self) -> &AnalysisDoc {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut AnalysisDoc {
        &mut self.doc
    }

    /// Parse every collected file into the document. Idempotent: a second
    /// call returns without re-parsing.
    pub fn analyze(
        &mut self,
        do_complete: bool,
        date_filter: Option<NaiveDate>,
    ) -> Result<(), AnalysisError> {
        if self.analyzed {
            return Ok(());
        }
        self.date_filter = date_filter;

        let mut tgen_data: Option<TGenData> = None;
        let mut torctl_data: Option<TorData> = None;

        if !self.tgen_paths.is_empty() {
            let mut parser = TGenParser::new(date_filter);
            for path in &self.tgen_paths {
                info!(path = %path.display(), "parsing tgen log file");
                parser.parse(DataSource::open(path)?, do_complete);
            }
            self.resolve_nickname(parser.name());
            tgen_data = Some(parser.into_data());
        }

        if !self.torctl_paths.is_empty() {
            let mut parser = TorCtlParser::new(date_filter);
            for path in &self.torctl_paths {
                info!(path = %path.display(), "parsing torctl log file");
                parser.parse(DataSource::open(path)?, do_complete);
            }
            self.resolve_nickname(parser.name());
            torctl_data = Some(parser.into_data());
        }

        if self.nickname.is_none() {
            self.nickname = operf_core::local_hostname();
        }

        if tgen_data.is_some() || torctl_data.is_some() {
            let nickname = self
                .nickname
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let measurement_ip = self
                .measurement_ip
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let node = self.doc.data.entry(nickname).or_insert(NodeData {
                measurement_ip,
                tgen: None,
                tor: None,
            });
            if node.tgen.is_none() {
                node.tgen = tgen_data;
            }
            if node.tor.is_none() {
                node.tor = torctl_data;
            }
        }

        self.analyzed = true;
        Ok(())
    }

    /// Fill the nickname from the first parser that produced one.
    fn resolve_nickname(&mut self, parsed: Option<&str>) {
        if self.nickname.is_none() {
            self.nickname = parsed.map(str::to_string);
        }
    }

    /// Union another analysis into this one by nickname. Refuses to
    /// combine results for a node that is already present.
    pub fn merge(&mut self, other: Analysis) -> Result<(), AnalysisError> {
        for nickname in other.doc.data.keys() {
            if self.doc.data.contains_key(nickname) {
                return Err(AnalysisError::MergeCollision(nickname.clone()));
            }
        }
        self.doc.data.extend(other.doc.data);
        Ok(())
    }

    /// Write the document under `output_dir` and return the path.
    ///
    /// With compression on, the file name gains an `.xz` suffix and the
    /// body is LZMA-encoded. The date prefix (or the analyze-time date
    /// filter) prepends `YYYY-MM-DD.` to the base name.
    pub fn save(
        &self,
        output_dir: &Path,
        filename: Option<&str>,
        compress: bool,
        date_prefix: Option<NaiveDate>,
    ) -> Result<PathBuf, AnalysisError> {
        let mut name = match filename {
            Some(name) => name.to_string(),
            None => match date_prefix.or(self.date_filter) {
                Some(date) => {
                    format!("{}.{}", operf_core::date_to_string(Some(date)), BASE_FILENAME)
                }
                None => BASE_FILENAME.to_string(),
            },
        };
        if compress && !name.ends_with(".xz") {
            name.push_str(".xz");
        }

        operf_core::make_dir_path(output_dir)?;
        let path = output_dir.join(name);
        info!(path = %path.display(), "saving analysis results");

        // Round-trip through a Value so every object gets sorted keys,
        // struct fields included.
        let value = serde_json::to_value(&self.doc)?;
        let file = File::create(&path)?;
        if compress {
            let mut encoder = xz2::write::XzEncoder::new(file, 6);
            serde_json::to_writer_pretty(&mut encoder, &value)?;
            encoder.finish()?;
        } else {
            let mut writer = std::io::BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &value)?;
            writer.flush()?;
        }
        Ok(path)
    }

    /// Load a previously saved document. Returns `None` (not an error) for
    /// missing files and for documents this version does not support.
    pub fn load(path: &Path) -> Result<Option<Analysis>, AnalysisError> {
        if !path.exists() {
            warn!(path = %path.display(), "analysis file does not exist");
            return Ok(None);
        }

        let raw = DataSource::open(path)?.read_to_string()?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;

        let (Some(doc_type), Some(version)) = (
            value.get("type").and_then(|t| t.as_str()),
            value.get("version").map(version_string),
        ) else {
            warn!("document is missing its type or version");
            return Ok(None);
        };
        if doc_type != DOC_TYPE || version.as_str() >= "3." {
            warn!(doc_type, version = %version, "unsupported document type or version");
            return Ok(None);
        }

        let doc: AnalysisDoc = serde_json::from_value(value)?;
        Ok(Some(Analysis {
            nickname: None,
            measurement_ip: None,
            tgen_paths: Vec::new(),
            torctl_paths: Vec::new(),
            date_filter: None,
            doc,
            analyzed: true,
        }))
    }
}

/// Versions are compared as strings; older writers stored them as numbers.
fn version_string(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
#[path = "doc_tests.rs"]
mod tests;
