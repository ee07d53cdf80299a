//! Version metadata carried by a patch archive.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{UpdateError, UpdateResult};

/// How a new file is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationMode {
    /// Truncate or create as a zero-length file.
    Empty,
    /// Write the stored content in full.
    Fill,
    /// Apply a binary delta to the existing file.
    Modify,
}

impl ModificationMode {
    /// Lowercase name, as used in metadata and error reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Fill => "fill",
            Self::Modify => "modify",
        }
    }

    /// Whether the archive stores a content blob for this mode.
    pub fn has_content(&self) -> bool {
        !matches!(self, Self::Empty)
    }
}

impl fmt::Display for ModificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A file rename inside the update root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEntry {
    pub from: String,
    pub to: String,
}

/// One file's change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEntry {
    /// Path relative to the update root.
    pub path: String,
    pub mode: ModificationMode,
    /// Expected hash before a `Modify`; unused otherwise.
    #[serde(default)]
    pub old_hash: String,
    /// Expected hash of the materialized file.
    #[serde(default)]
    pub new_hash: String,
    /// Uncompressed length of the new file.
    #[serde(default)]
    pub raw_length: u64,
}

/// Mutation plan of one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchMetadata {
    #[serde(default)]
    pub move_files: Vec<MoveEntry>,
    #[serde(default)]
    pub old_files: Vec<String>,
    #[serde(default)]
    pub old_folders: Vec<String>,
    #[serde(default)]
    pub new_files: Vec<PatchEntry>,
    #[serde(default)]
    pub new_folders: Vec<String>,
    #[serde(default)]
    pub changelogs: String,
}

impl PatchMetadata {
    /// Parse the JSON descriptor of `version`.
    pub fn parse(version: &str, bytes: &[u8]) -> UpdateResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| UpdateError::MalformedArchive {
            version: version.to_string(),
            reason: format!("invalid metadata: {}", e),
        })
    }

    /// Every path the metadata refers to, in declaration order.
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        self.move_files
            .iter()
            .flat_map(|m| [m.from.as_str(), m.to.as_str()])
            .chain(self.old_files.iter().map(String::as_str))
            .chain(self.old_folders.iter().map(String::as_str))
            .chain(self.new_files.iter().map(|e| e.path.as_str()))
            .chain(self.new_folders.iter().map(String::as_str))
    }

    /// Drop every operation touching a path matching `excluded`.
    ///
    /// Applies to moves (either side), file and folder deletions and new
    /// files. Returns the paths that were removed.
    pub fn exclude_files<F>(&mut self, excluded: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut removed = Vec::new();

        self.move_files.retain(|m| {
            let hit = excluded(&m.from) || excluded(&m.to);
            if hit {
                removed.push(format!("{} -> {}", m.from, m.to));
            }
            !hit
        });
        self.old_files.retain(|p| {
            let hit = excluded(p);
            if hit {
                removed.push(p.clone());
            }
            !hit
        });
        self.old_folders.retain(|p| {
            let hit = excluded(p);
            if hit {
                removed.push(p.clone());
            }
            !hit
        });
        self.new_files.retain(|e| {
            let hit = excluded(&e.path);
            if hit {
                removed.push(e.path.clone());
            }
            !hit
        });

        removed
    }

    /// Whether the version changes nothing on disk.
    pub fn is_noop(&self) -> bool {
        self.move_files.is_empty()
            && self.old_files.is_empty()
            && self.old_folders.is_empty()
            && self.new_files.is_empty()
            && self.new_folders.is_empty()
    }
}
