// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented log input with transparent decompression.
//!
//! Rotated live logs come back as `.gz`, published analysis files as
//! `.xz`; operators also feed plain files and stdin (`-`) through the
//! reprocessing path. All four look the same to the parsers.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use xz2::read::XzDecoder;

/// A buffered reader over a possibly-compressed log file.
pub struct DataSource {
    reader: Box<dyn BufRead + Send>,
}

impl DataSource {
    /// Open `path`, picking the decoder from the file extension.
    /// The special path `-` reads from stdin.
    pub fn open(path: &Path) -> io::Result<Self> {
        if path == Path::new("-") {
            return Ok(Self { reader: Box::new(BufReader::new(io::stdin())) });
        }
        let file = File::open(path)?;
        let reader: Box<dyn BufRead + Send> = match path.extension().and_then(|e| e.to_str()) {
            Some("xz") => Box::new(BufReader::new(XzDecoder::new(file))),
            Some("gz") => Box::new(BufReader::new(GzDecoder::new(file))),
            _ => Box::new(BufReader::new(file)),
        };
        Ok(Self { reader })
    }

    /// Iterate lines, trailing newline stripped.
    pub fn lines(self) -> impl Iterator<Item = io::Result<String>> {
        self.reader.lines()
    }

    /// Read the whole source into memory (used by the document loader).
    pub fn read_to_string(mut self) -> io::Result<String> {
        let mut buf = String::new();
        self.reader.read_to_string(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
