//! Reading downloaded patch archives.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

use zip::result::ZipError;
use zip::ZipArchive;

use super::metadata::{PatchEntry, PatchMetadata};
use super::{content_path, METADATA_FILE};
use crate::error::{UpdateError, UpdateResult};

/// An opened version archive.
///
/// Metadata is parsed eagerly on open. New file contents are exposed through
/// a single-pass [`EntryCursor`]; reading them again requires reopening the
/// archive.
pub struct PatchArchiveReader<R> {
    version: String,
    archive: ZipArchive<R>,
    metadata: PatchMetadata,
}

impl PatchArchiveReader<BufReader<File>> {
    /// Open the archive of `version` stored at `path`.
    pub fn open(version: &str, path: &Path) -> UpdateResult<Self> {
        let file = File::open(path).map_err(|e| UpdateError::read(path, e))?;
        Self::from_reader(version, BufReader::new(file))
    }
}

impl<R: Read + Seek> PatchArchiveReader<R> {
    /// Read an archive from any seekable source.
    pub fn from_reader(version: &str, reader: R) -> UpdateResult<Self> {
        let mut archive = ZipArchive::new(reader).map_err(|e| malformed(version, e))?;

        let mut raw = Vec::new();
        match archive.by_name(METADATA_FILE) {
            Ok(mut file) => {
                file.read_to_end(&mut raw).map_err(|e| UpdateError::MalformedArchive {
                    version: version.to_string(),
                    reason: format!("failed to read {}: {}", METADATA_FILE, e),
                })?;
            }
            Err(ZipError::FileNotFound) => {
                return Err(UpdateError::MissingMetadata {
                    version: version.to_string(),
                })
            }
            Err(e) => return Err(malformed(version, e)),
        }

        let metadata = PatchMetadata::parse(version, &raw)?;

        Ok(Self {
            version: version.to_string(),
            archive,
            metadata,
        })
    }

    pub fn metadata(&self) -> &PatchMetadata {
        &self.metadata
    }

    /// Mutable metadata, for filtering before application.
    pub fn metadata_mut(&mut self) -> &mut PatchMetadata {
        &mut self.metadata
    }

    /// Start a pass over the new files in metadata order.
    pub fn entries(&mut self) -> EntryCursor<'_, R> {
        EntryCursor {
            version: &self.version,
            archive: &mut self.archive,
            entries: &self.metadata.new_files,
            next: 0,
        }
    }
}

/// Single-pass cursor over the new files of an archive.
///
/// Each [`PendingEntry`] borrows the cursor, so its content stream must be
/// dropped before the cursor can advance.
pub struct EntryCursor<'a, R> {
    version: &'a str,
    archive: &'a mut ZipArchive<R>,
    entries: &'a [PatchEntry],
    next: usize,
}

impl<'a, R: Read + Seek> EntryCursor<'a, R> {
    /// Move to the next entry, or `None` once all entries were visited.
    pub fn advance(&mut self) -> Option<PendingEntry<'_, R>> {
        let entry = self.entries.get(self.next)?;
        self.next += 1;
        Some(PendingEntry {
            version: self.version,
            archive: &mut *self.archive,
            entry,
        })
    }

    /// Entries not yet visited.
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.next
    }
}

/// An entry whose content has not been opened yet.
pub struct PendingEntry<'c, R> {
    version: &'c str,
    archive: &'c mut ZipArchive<R>,
    entry: &'c PatchEntry,
}

impl<'c, R: Read + Seek + 'c> PendingEntry<'c, R> {
    pub fn entry(&self) -> &'c PatchEntry {
        self.entry
    }

    /// Open the content blob. Entries without content yield an empty stream.
    pub fn open(self) -> UpdateResult<ContentStream<'c>> {
        let Self {
            version,
            archive,
            entry,
        } = self;

        if !entry.mode.has_content() {
            return Ok(ContentStream {
                inner: Box::new(io::empty()),
            });
        }

        match archive.by_name(&content_path(&entry.path)) {
            Ok(file) => Ok(ContentStream {
                inner: Box::new(file),
            }),
            Err(ZipError::FileNotFound) => Err(UpdateError::MalformedArchive {
                version: version.to_string(),
                reason: format!("no content stored for {}", entry.path),
            }),
            Err(e) => Err(malformed(version, e)),
        }
    }
}

/// Lazily decompressed content of one entry.
pub struct ContentStream<'c> {
    inner: Box<dyn Read + 'c>,
}

impl<'c> ContentStream<'c> {
    /// Wrap an arbitrary reader.
    pub fn from_reader<R: Read + 'c>(reader: R) -> Self {
        Self {
            inner: Box::new(reader),
        }
    }
}

impl Read for ContentStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

fn malformed(version: &str, e: ZipError) -> UpdateError {
    UpdateError::MalformedArchive {
        version: version.to_string(),
        reason: e.to_string(),
    }
}
