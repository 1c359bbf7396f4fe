// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use encoding_rs::{Encoding, GBK, UTF_8};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::formats;
use crate::store::Store;

/// Candidate entry-name encodings, probed in order. Archives produced by
/// standard tooling use UTF-8; GBK covers archives compressed on localized
/// systems that wrote legacy entry names.
const CANDIDATE_ENCODINGS: &[&Encoding] = &[UTF_8, GBK];

/// The store key holding the per-archive entry-name encoding records.
const CHARSET_RECORDS_KEY: &str = "zip_charset";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unknown entry name encoding in archive {0}; re-compressing the archive may fix it")]
    UnknownEncoding(String),
    #[error("entry name in archive {archive} is not valid {encoding}")]
    EntryName {
        archive: String,
        encoding: &'static str,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Reads music entries out of zip archives. The entry-name encoding that
/// first works for an archive is recorded in the store and reused for every
/// later operation on that archive; an archive is assumed to never change
/// encoding.
pub struct ArchiveReader {
    /// Persists the per-archive encoding records.
    store: Arc<dyn Store>,
    /// Counts encoding probe attempts.
    probes: AtomicUsize,
}

impl ArchiveReader {
    /// Creates a new archive reader backed by the given store.
    pub fn new(store: Arc<dyn Store>) -> ArchiveReader {
        ArchiveReader {
            store,
            probes: AtomicUsize::new(0),
        }
    }

    /// The number of encoding probes attempted so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }

    /// Lists the music-format entries inside the archive. If the archive has
    /// a recorded encoding it is used directly; otherwise each candidate
    /// encoding is probed in order and the first one that enumerates every
    /// entry name without error is recorded for future calls.
    pub fn list_music_entries(&self, archive: &Path) -> Result<Vec<String>, ArchiveError> {
        if let Some(encoding) = self.recorded_encoding(archive) {
            return self.entries_with(archive, encoding);
        }

        for &encoding in CANDIDATE_ENCODINGS {
            self.probes.fetch_add(1, Ordering::Relaxed);
            match self.entries_with(archive, encoding) {
                Ok(entries) => {
                    self.record_encoding(archive, encoding)?;
                    return Ok(entries);
                }
                Err(e) => {
                    warn!(
                        archive = archive.display().to_string(),
                        encoding = encoding.name(),
                        err = e.to_string(),
                        "Failed to list entries with candidate encoding."
                    );
                }
            }
        }

        Err(ArchiveError::UnknownEncoding(
            archive.display().to_string(),
        ))
    }

    /// Extracts the named entry to a file under the destination directory,
    /// returning the extracted path or None if no entry matches. Matching is
    /// exact and case sensitive.
    pub fn extract_entry(
        &self,
        archive: &Path,
        entry: &str,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>, ArchiveError> {
        let encoding = match self.recorded_encoding(archive) {
            Some(encoding) => encoding,
            None => {
                // Listing probes and records the archive's encoding.
                self.list_music_entries(archive)?;
                self.recorded_encoding(archive)
                    .ok_or_else(|| ArchiveError::UnknownEncoding(archive.display().to_string()))?
            }
        };

        let mut zip = ZipArchive::new(File::open(archive)?)?;
        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            let name = match decode_name(file.name_raw(), encoding) {
                Some(name) => name,
                None => continue,
            };
            if name != entry {
                continue;
            }

            let dest = dest_dir.join(&name);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest)?;
            io::copy(&mut file, &mut out)?;
            debug!(
                archive = archive.display().to_string(),
                entry, "Extracted archive entry."
            );
            return Ok(Some(dest));
        }

        Ok(None)
    }

    /// The encoding previously recorded for the archive, if any.
    fn recorded_encoding(&self, archive: &Path) -> Option<&'static Encoding> {
        let records = self.store.get(CHARSET_RECORDS_KEY)?;
        let label = records.get(archive.display().to_string())?.as_str()?;
        Encoding::for_label(label.as_bytes())
    }

    /// Records the working encoding for the archive.
    fn record_encoding(&self, archive: &Path, encoding: &'static Encoding) -> Result<(), io::Error> {
        let mut records = match self.store.get(CHARSET_RECORDS_KEY) {
            Some(Value::Object(records)) => records,
            _ => Map::new(),
        };
        records.insert(
            archive.display().to_string(),
            Value::String(encoding.name().to_string()),
        );
        self.store.set(CHARSET_RECORDS_KEY, &Value::Object(records))
    }

    /// Enumerates the archive's music entries using the given encoding,
    /// failing if any entry name doesn't decode cleanly.
    fn entries_with(
        &self,
        archive: &Path,
        encoding: &'static Encoding,
    ) -> Result<Vec<String>, ArchiveError> {
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        let mut entries = Vec::new();
        for index in 0..zip.len() {
            let file = zip.by_index_raw(index)?;
            let raw = file.name_raw();
            let is_dir = raw.ends_with(b"/");
            let name = decode_name(raw, encoding).ok_or_else(|| ArchiveError::EntryName {
                archive: archive.display().to_string(),
                encoding: encoding.name(),
            })?;
            if !is_dir && formats::is_music_file(&name) {
                entries.push(name);
            }
        }
        Ok(entries)
    }
}

/// Decodes raw entry name bytes with the given encoding, or None if the bytes
/// are not valid in that encoding.
fn decode_name(raw: &[u8], encoding: &'static Encoding) -> Option<String> {
    let (name, had_errors) = encoding.decode_without_bom_handling(raw);
    if had_errors {
        return None;
    }
    Some(name.into_owned())
}
