//! Per-entry content materialization and the deferred merge.
//!
//! Fill and Modify entries are written to a sibling staging file and
//! verified there. Staged files are moved over their targets only after
//! every entry of the version has materialized.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::archive::{ContentStream, ModificationMode, PatchEntry};
use crate::cancel::CancelToken;
use crate::checksum::{calculate_file_checksum, file_matches};
use crate::error::{UpdateError, UpdateResult};

/// Suffix of staging files next to their targets.
pub const STAGED_SUFFIX: &str = ".patchup-staged";

/// Copy buffer for content streams (64KB).
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound on the patch output buffer reserved from `raw_length` (64MB).
const MAX_PATCH_PREALLOC: u64 = 64 * 1024 * 1024;

/// What happened to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Replaced by a zero-length file.
    Emptied,
    /// Verified content waits in a staging file.
    Staged,
    /// Left untouched.
    Skipped(SkipReason),
}

/// Why an entry was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fill target already has the expected content.
    AlreadyCurrent,
    /// Modify target does not exist.
    MissingBase,
    /// Modify target does not match the expected pre-image.
    BaseMismatch,
}

impl SkipReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::AlreadyCurrent => "already up to date",
            Self::MissingBase => "old file not found",
            Self::BaseMismatch => "old file hash does not match",
        }
    }
}

/// Staging file for `target`: `<name>.patchup-staged` in the same directory.
pub fn staged_path(target: &Path) -> PathBuf {
    let mut name: OsString = target.file_name().map(OsString::from).unwrap_or_default();
    name.push(STAGED_SUFFIX);
    target.with_file_name(name)
}

/// Staged files awaiting the merge pass.
///
/// Anything not merged is deleted when the set is dropped, so a failed
/// version never leaves staging files behind.
#[derive(Debug, Default)]
pub struct StagedFiles {
    pending: Vec<(PathBuf, PathBuf)>,
}

impl StagedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a verified staging file for `target`.
    pub fn push(&mut self, staged: PathBuf, target: PathBuf) {
        self.pending.push((staged, target));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Move every staged file over its target, in registration order.
    ///
    /// Cancellation is checked before each move. Files merged before a
    /// failure stay merged.
    pub fn merge(&mut self, cancel: &CancelToken) -> UpdateResult<usize> {
        let mut merged = 0;
        while !self.pending.is_empty() {
            cancel.check()?;
            let (staged, target) = self.pending.remove(0);
            fs::rename(&staged, &target).map_err(|e| {
                remove_quietly(&staged);
                UpdateError::write(&target, e)
            })?;
            debug!(path = %target.display(), "Merged");
            merged += 1;
        }
        Ok(merged)
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for (staged, _) in self.pending.drain(..) {
            remove_quietly(&staged);
        }
    }
}

/// Produce the content of one entry.
///
/// `open` is only called when the entry's content is actually needed.
pub fn materialize_entry<'c, F>(
    version: &str,
    entry: &PatchEntry,
    target: &Path,
    open: F,
    staged: &mut StagedFiles,
    cancel: &CancelToken,
) -> UpdateResult<EntryOutcome>
where
    F: FnOnce() -> UpdateResult<ContentStream<'c>>,
{
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| UpdateError::create_dir(parent, e))?;
    }

    match entry.mode {
        ModificationMode::Empty => {
            info!(path = %entry.path, "Empty");
            remove_if_exists(target)?;
            File::create(target).map_err(|e| UpdateError::write(target, e))?;
            Ok(EntryOutcome::Emptied)
        }

        ModificationMode::Fill => {
            if file_matches(target, &entry.new_hash)? {
                info!(path = %entry.path, "Fill skipped, already up to date");
                return Ok(EntryOutcome::Skipped(SkipReason::AlreadyCurrent));
            }
            info!(path = %entry.path, "Fill");

            let temp = staged_path(target);
            let mut content = open()?;
            copy_to_file(&mut content, &temp, cancel)?;
            stage_verified(version, entry, temp, target, staged)
        }

        ModificationMode::Modify => {
            if !target.is_file() {
                info!(path = %entry.path, "Modify skipped, old file not found");
                return Ok(EntryOutcome::Skipped(SkipReason::MissingBase));
            }
            if !file_matches(target, &entry.old_hash)? {
                info!(path = %entry.path, "Modify skipped, old file hash does not match");
                return Ok(EntryOutcome::Skipped(SkipReason::BaseMismatch));
            }
            info!(path = %entry.path, "Modify");

            let old = fs::read(target).map_err(|e| UpdateError::read(target, e))?;
            let mut delta = open()?;
            let reserve = entry.raw_length.min(MAX_PATCH_PREALLOC) as usize;
            let mut patched = Vec::with_capacity(reserve);
            bsdiff::patch(&old, &mut delta, &mut patched).map_err(|e| {
                UpdateError::MalformedArchive {
                    version: version.to_string(),
                    reason: format!("invalid delta for {}: {}", entry.path, e),
                }
            })?;
            cancel.check()?;

            let temp = staged_path(target);
            fs::write(&temp, &patched).map_err(|e| {
                remove_quietly(&temp);
                UpdateError::write(&temp, e)
            })?;
            stage_verified(version, entry, temp, target, staged)
        }
    }
}

/// Verify a staging file against the entry hash and register it.
fn stage_verified(
    version: &str,
    entry: &PatchEntry,
    temp: PathBuf,
    target: &Path,
    staged: &mut StagedFiles,
) -> UpdateResult<EntryOutcome> {
    let actual = match calculate_file_checksum(&temp) {
        Ok(actual) => actual,
        Err(e) => {
            remove_quietly(&temp);
            return Err(e);
        }
    };

    if !actual.eq_ignore_ascii_case(&entry.new_hash) {
        remove_quietly(&temp);
        return Err(UpdateError::PatchCorrupted {
            version: version.to_string(),
            path: entry.path.clone(),
            mode: entry.mode.to_string(),
            expected: entry.new_hash.clone(),
            actual,
        });
    }

    staged.push(temp, target.to_path_buf());
    Ok(EntryOutcome::Staged)
}

fn copy_to_file<R: Read>(reader: &mut R, dest: &Path, cancel: &CancelToken) -> UpdateResult<u64> {
    let result: UpdateResult<u64> = (|| {
        let file = File::create(dest).map_err(|e| UpdateError::write(dest, e))?;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;

        loop {
            cancel.check()?;
            let n = reader
                .read(&mut buffer)
                .map_err(|e| UpdateError::read(dest, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .map_err(|e| UpdateError::write(dest, e))?;
            copied += n as u64;
        }

        writer.flush().map_err(|e| UpdateError::write(dest, e))?;
        Ok(copied)
    })();

    if result.is_err() {
        remove_quietly(dest);
    }
    result
}

/// Delete a file, treating "not found" as success.
pub fn remove_if_exists(path: &Path) -> UpdateResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdateError::write(path, e)),
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}
