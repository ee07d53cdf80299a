//! Local version marker and missing-version computation.
//!
//! The marker file holds the id of the last fully applied version, either
//! as plain text or as `:` followed by the base64 of the id. The marker is
//! only ever replaced atomically (temp file in the same directory, then
//! rename), so a crash leaves either the old or the new value.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{UpdateError, UpdateResult};

/// Leading byte of an obfuscated marker.
const OBFUSCATION_SENTINEL: char = ':';

/// Decoded contents of the marker file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMarker {
    pub version: String,
    /// Whether the file was stored obfuscated.
    pub obfuscated: bool,
}

/// Versions that still have to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingVersions {
    /// Ordered suffix of the server list.
    pub versions: Vec<String>,
    /// Last entry of the server list.
    pub newest: String,
    /// The local marker was unknown and every version was scheduled.
    pub restarted: bool,
}

impl MissingVersions {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Split a newline-delimited version list, dropping blank lines.
pub fn parse_version_list(text: &str) -> Vec<String> {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Determine which versions of `all` come after `current`.
///
/// Versions are compared by list position only. An absent marker schedules
/// every version. A marker missing from the list is an error unless
/// `allow_restart` is set, in which case every version is scheduled again.
pub fn compute_missing(
    all: &[String],
    current: Option<&str>,
    allow_restart: bool,
) -> UpdateResult<MissingVersions> {
    let newest = all.last().ok_or(UpdateError::EmptyVersionList)?.clone();

    let Some(current) = current else {
        return Ok(MissingVersions {
            versions: all.to_vec(),
            newest,
            restarted: false,
        });
    };

    if current == newest {
        return Ok(MissingVersions {
            versions: Vec::new(),
            newest,
            restarted: false,
        });
    }

    match all.iter().position(|v| v == current) {
        Some(position) => Ok(MissingVersions {
            versions: all[position + 1..].to_vec(),
            newest,
            restarted: false,
        }),
        None if allow_restart => {
            warn!(
                current,
                "Local version is not in the server list, applying every version again"
            );
            Ok(MissingVersions {
                versions: all.to_vec(),
                newest,
                restarted: true,
            })
        }
        None => Err(UpdateError::UnrecognizedVersion {
            version: current.to_string(),
        }),
    }
}

/// Encode a marker value for storage.
pub fn encode_marker(version: &str, obfuscated: bool) -> String {
    if obfuscated {
        format!("{}{}", OBFUSCATION_SENTINEL, BASE64.encode(version.as_bytes()))
    } else {
        version.to_string()
    }
}

/// Decode stored marker text into `(version, obfuscated)`.
pub fn decode_marker(text: &str) -> Result<(String, bool), String> {
    let Some(encoded) = text.strip_prefix(OBFUSCATION_SENTINEL) else {
        return Ok((text.to_string(), false));
    };

    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    let version = String::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {}", e))?;
    Ok((version, true))
}

/// Reads and persists the local version marker.
#[derive(Debug, Clone)]
pub struct VersionLedger {
    path: PathBuf,
}

impl VersionLedger {
    /// Ledger backed by the marker file at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker; `None` when the file is missing or blank.
    pub fn read_marker(&self) -> UpdateResult<Option<VersionMarker>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No version marker");
                return Ok(None);
            }
            Err(e) => return Err(UpdateError::read(&self.path, e)),
        };

        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let (version, obfuscated) = decode_marker(text).map_err(|reason| {
            UpdateError::InvalidMarker {
                path: self.path.clone(),
                reason,
            }
        })?;

        Ok(Some(VersionMarker {
            version,
            obfuscated,
        }))
    }

    /// Atomically replace the marker with `version`.
    pub fn write_marker(&self, version: &str, obfuscated: bool) -> UpdateResult<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| UpdateError::create_dir(&parent, e))?;

        let mut temp = NamedTempFile::new_in(&parent).map_err(|e| UpdateError::write(&parent, e))?;
        temp.write_all(encode_marker(version, obfuscated).as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| UpdateError::write(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| UpdateError::write(&self.path, e.error))?;

        info!(version, path = %self.path.display(), "Version marker updated");
        Ok(())
    }
}
