//! Archive assembly.
//!
//! Outputs accumulate in insertion order under unique names and are
//! serialized into a single zip once both phases are done.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike};
use indexmap::IndexMap;
use stickerbatch_common::config::ArchiveCompression;
use stickerbatch_media_model::{Blob, ProcessedOutput};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

/// Incrementally built archive.
///
/// Only the orchestrating task mutates it, so it needs no locking.
#[derive(Debug, Clone, Default)]
pub struct ArchiveAssembler {
    entries: IndexMap<String, Blob>,
    compression: ArchiveCompression,
}

/// A serialized archive, ready to hand to the user.
#[derive(Debug, Clone)]
pub struct FinishedArchive {
    /// Suggested download name.
    pub file_name: String,
    /// Zip bytes.
    pub bytes: Vec<u8>,
    /// Entry names, in archive order.
    pub entries: Vec<String>,
}

impl ArchiveAssembler {
    pub fn new(compression: ArchiveCompression) -> Self {
        Self {
            entries: IndexMap::new(),
            compression,
        }
    }

    /// Add an entry. Re-adding a name replaces the earlier blob in place.
    /// Returns `true` when an entry was replaced.
    pub fn add_file(&mut self, name: impl Into<String>, blob: impl Into<Blob>) -> bool {
        let name = name.into();
        let replaced = self.entries.insert(name.clone(), blob.into()).is_some();
        if replaced {
            tracing::debug!(entry = %name, "Replaced archive entry");
        }
        replaced
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entry names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Copy of the current entries, for handing to another context.
    /// Blobs are shared, not duplicated.
    pub fn snapshot(&self) -> Vec<ProcessedOutput> {
        self.entries
            .iter()
            .map(|(name, blob)| ProcessedOutput::new(name.as_str(), blob.clone()))
            .collect()
    }

    /// Serialize to zip bytes. Consumes the assembler, so it runs once.
    ///
    /// Entries that were never added are simply absent.
    pub fn finalize(self) -> Result<Vec<u8>, ArchiveError> {
        let method = match self.compression {
            ArchiveCompression::Stored => CompressionMethod::Stored,
            ArchiveCompression::Deflated => CompressionMethod::Deflated,
        };
        let modified = zip_timestamp(chrono::Local::now());

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, blob) in &self.entries {
            let options = SimpleFileOptions::default()
                .compression_method(method)
                .last_modified_time(modified);
            writer
                .start_file(name.as_str(), options)
                .map_err(|source| ArchiveError::Entry {
                    name: name.clone(),
                    source,
                })?;
            writer
                .write_all(blob)
                .map_err(|source| ArchiveError::Write {
                    name: name.clone(),
                    source,
                })?;
        }

        let bytes = writer.finish().map_err(ArchiveError::Finish)?.into_inner();
        tracing::info!(
            entries = self.entries.len(),
            bytes = bytes.len(),
            compression = ?self.compression,
            "Archive finalized"
        );
        Ok(bytes)
    }
}

impl FinishedArchive {
    /// Write the archive into `dir` under its file name.
    pub fn save_into(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

fn zip_timestamp<Tz: chrono::TimeZone>(now: chrono::DateTime<Tz>) -> zip::DateTime {
    let year = u16::try_from(now.year()).unwrap_or(1980);
    zip::DateTime::from_date_and_time(
        year,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    )
    .unwrap_or_default()
}
