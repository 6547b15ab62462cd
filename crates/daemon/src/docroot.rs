// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Document-root index: an XML inventory of the published artifacts so
//! collectors can mirror the docroot without directory listings.

use base64::Engine;
use chrono::{DateTime, Local};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

/// The index file name; the index never lists itself.
pub const INDEX_NAME: &str = "index.xml";

/// One listed artifact.
#[derive(Debug)]
struct IndexEntry {
    name: String,
    size: u64,
    last_modified: String,
    sha256: String,
}

/// Regenerate `<docroot>/index.xml` from the files currently present.
pub fn generate_index(docroot: &Path) -> std::io::Result<()> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(docroot)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == INDEX_NAME || !entry.file_type()?.is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        let modified: DateTime<Local> = metadata.modified()?.into();
        let bytes = std::fs::read(entry.path())?;
        let digest = Sha256::digest(&bytes);
        entries.push(IndexEntry {
            name,
            size: metadata.len(),
            last_modified: modified.format("%Y-%m-%d %H:%M:%S").to_string(),
            sha256: base64::engine::general_purpose::STANDARD.encode(digest),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("files")))?;
    for entry in &entries {
        let mut file = BytesStart::new("file");
        file.push_attribute(("name", entry.name.as_str()));
        file.push_attribute(("size", entry.size.to_string().as_str()));
        file.push_attribute(("last_modified", entry.last_modified.as_str()));
        file.push_attribute(("sha256", entry.sha256.as_str()));
        writer.write_event(Event::Empty(file))?;
    }
    writer.write_event(Event::End(BytesEnd::new("files")))?;

    let bytes = writer.into_inner().into_inner();
    std::fs::write(docroot.join(INDEX_NAME), bytes)
}

#[cfg(test)]
#[path = "docroot_tests.rs"]
mod tests;
