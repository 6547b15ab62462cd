// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thread-safe append sinks for child process output.
//!
//! A sink is shared between the task that writes lines into it and the
//! rotator that swaps the file out at midnight; one mutex serializes
//! `write`, `rotate`, and `close`. Rotation is atomic with respect to
//! writes: no line lands in both the archive and the truncated live file.

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use xz2::write::XzEncoder;

/// Directory rotated archives land in, next to the live file.
const ARCHIVE_DIR: &str = "log_archive";

enum Target {
    Stdout,
    File { path: PathBuf, writer: Option<BufWriter<File>> },
    Compressed { path: PathBuf, encoder: Option<XzEncoder<File>> },
}

/// A shared, internally synchronized line sink.
#[derive(Clone)]
pub struct LineSink {
    target: Arc<Mutex<Target>>,
}

impl LineSink {
    /// Append to `path`, creating it if needed.
    pub fn file(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let writer = open_append(&path)?;
        Ok(Self {
            target: Arc::new(Mutex::new(Target::File { path, writer: Some(writer) })),
        })
    }

    /// LZMA-compress everything written. The file name gains an `.xz`
    /// suffix if it does not carry one; the file is truncated on open
    /// (an xz stream cannot be appended to).
    pub fn compressed(path: impl Into<PathBuf>) -> io::Result<Self> {
        let mut path = path.into();
        if path.extension().and_then(|e| e.to_str()) != Some("xz") {
            let mut name = path.file_name().unwrap_or_default().to_os_string();
            name.push(".xz");
            path.set_file_name(name);
        }
        let encoder = XzEncoder::new(File::create(&path)?, 6);
        Ok(Self {
            target: Arc::new(Mutex::new(Target::Compressed { path, encoder: Some(encoder) })),
        })
    }

    /// Write to the daemon's own stdout. `rotate` is a no-op here.
    pub fn stdout() -> Self {
        Self { target: Arc::new(Mutex::new(Target::Stdout)) }
    }

    /// Path of the live file, if this sink writes to one.
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.target.lock() {
            Target::Stdout => None,
            Target::File { path, .. } | Target::Compressed { path, .. } => Some(path.clone()),
        }
    }

    /// Append bytes. Errors are logged, not propagated: a sink that has
    /// gone bad must not take its watchdog down with it.
    pub fn write(&self, bytes: &[u8]) {
        if let Err(e) = self.try_write(bytes) {
            warn!(error = %e, "sink write failed");
        }
    }

    /// Append a line, adding the trailing newline.
    pub fn write_line(&self, line: &str) {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write(&bytes);
    }

    fn try_write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut target = self.target.lock();
        match &mut *target {
            Target::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(bytes)?;
                out.flush()
            }
            Target::File { path, writer } => {
                if writer.is_none() {
                    *writer = Some(open_append(path)?);
                }
                if let Some(w) = writer {
                    w.write_all(bytes)?;
                    w.flush()?;
                }
                Ok(())
            }
            Target::Compressed { encoder, .. } => {
                if let Some(enc) = encoder {
                    enc.write_all(bytes)?;
                }
                Ok(())
            }
        }
    }

    /// Atomically archive the live file and reopen it empty.
    ///
    /// The current content moves to
    /// `<dir>/log_archive/<base>_<yyyy-mm-dd_HH:MM:SS>.gz`; the live file
    /// is truncated and reopened for append. Returns the archive path,
    /// or `None` for sinks without a rotatable file.
    pub fn rotate(&self, instant: DateTime<Utc>) -> io::Result<Option<PathBuf>> {
        let mut target = self.target.lock();
        let Target::File { path, writer } = &mut *target else {
            return Ok(None);
        };

        if let Some(mut w) = writer.take() {
            w.flush()?;
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let archive_dir = dir.join(ARCHIVE_DIR);
        operf_core::make_dir_path(&archive_dir)?;

        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log".to_string());
        let stamp = operf_core::archive_stamp(instant);
        let archive_path = archive_dir.join(format!("{base}_{stamp}.gz"));

        {
            let mut source = File::open(&*path)?;
            let mut encoder =
                GzEncoder::new(File::create(&archive_path)?, Compression::default());
            io::copy(&mut source, &mut encoder)?;
            encoder.finish()?;
        }

        // Truncate, then reopen for append.
        File::create(&*path)?;
        *writer = Some(open_append(path)?);

        Ok(Some(archive_path))
    }

    /// Flush and finalize. Further writes reopen file sinks; compressed
    /// sinks stay closed (the xz stream has been finished).
    pub fn close(&self) {
        let mut target = self.target.lock();
        match &mut *target {
            Target::Stdout => {}
            Target::File { writer, .. } => {
                if let Some(mut w) = writer.take() {
                    let _ = w.flush();
                }
            }
            Target::Compressed { encoder, .. } => {
                if let Some(enc) = encoder.take() {
                    if let Err(e) = enc.finish() {
                        warn!(error = %e, "finishing xz sink failed");
                    }
                }
            }
        }
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        operf_core::make_dir_path(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;
