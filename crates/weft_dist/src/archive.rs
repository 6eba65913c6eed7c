//! Deterministic `.tar.gz` archives.
//!
//! Entries are written in path order with zeroed timestamps and owners, so
//! the same inputs always produce byte-identical archives.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Header;
use weft_patch::SourceTree;

use crate::error::DistError;

/// Collects files and writes them as a gzip-compressed tar archive.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    name: String,
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveBuilder {
    /// Starts an archive; `name` is only used in error messages.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Adds one file. A later entry with the same path replaces the earlier.
    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.insert(path.to_string(), data.into());
        self
    }

    /// Adds every file of `tree` below `prefix`.
    pub fn add_tree(&mut self, prefix: &str, tree: &SourceTree) -> &mut Self {
        for (path, content) in tree.iter() {
            self.entries
                .insert(format!("{prefix}/{path}"), content.to_vec());
        }
        self
    }

    /// Number of files added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no file was added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the archive.
    pub fn finish(&self) -> Result<Vec<u8>, DistError> {
        let fail = |e: std::io::Error| DistError::Archive {
            artifact: self.name.clone(),
            reason: e.to_string(),
        };
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in &self.entries {
            let mut header = Header::new_gnu();
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            builder
                .append_data(&mut header, Path::new(path), data.as_slice())
                .map_err(fail)?;
        }
        let mut encoder = builder.into_inner().map_err(fail)?;
        encoder.flush().map_err(fail)?;
        encoder.finish().map_err(fail)
    }
}

/// Decodes a `.tar.gz` archive into `path -> content`.
pub fn read_archive(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, DistError> {
    let fail = |e: std::io::Error| DistError::Archive {
        artifact: "archive".to_string(),
        reason: e.to_string(),
    };
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut files = BTreeMap::new();
    for entry in archive.entries().map_err(fail)? {
        let mut entry = entry.map_err(fail)?;
        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }
        let path = entry
            .path()
            .map_err(fail)?
            .to_string_lossy()
            .replace('\\', "/");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(fail)?;
        files.insert(path, content);
    }
    Ok(files)
}
