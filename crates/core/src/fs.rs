// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem helpers: directory creation, recursive log search, port probe.

use regex::Regex;
use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

/// Create a directory path, parents included. Succeeds if it already exists.
pub fn make_dir_path(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Walk `searchpath` recursively and return every file whose base name
/// matches at least one of `patterns`. Order follows directory traversal;
/// callers that need determinism sort the result.
pub fn find_file_paths(searchpath: &Path, patterns: &[Regex]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    walk(searchpath, patterns, &mut paths);
    paths
}

fn walk(dir: &Path, patterns: &[Regex], out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, patterns, out);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if patterns.iter().any(|p| p.is_match(name)) {
                out.push(path);
            }
        }
    }
}

/// Ask the kernel for a free TCP port on the loopback interface.
///
/// The listener is dropped before returning, so the port is only
/// probably-free; callers bind it immediately.
pub fn random_free_port() -> io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
#[path = "fs_tests.rs"]
mod tests;
