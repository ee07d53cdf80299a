//! Pipeline stages of a single version.

use std::fmt;

/// Stage of the per-version state machine.
///
/// ```text
/// Fetching → Parsing → Mutating → Materializing → Merging → MarkerUpdate → Cleanup → Done
///     └──────────┴──────────┴────────────┴─────────────┴──────────┴──────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    /// Downloading the version archive.
    Fetching,
    /// Reading archive metadata.
    Parsing,
    /// Moving, deleting, and creating paths.
    Mutating,
    /// Producing staged files for every new entry.
    Materializing,
    /// Moving staged files into place.
    Merging,
    /// Persisting the version marker.
    MarkerUpdate,
    /// Removing the downloaded archive.
    Cleanup,
    /// Version fully applied.
    Done,
    /// Version aborted.
    Failed,
}

impl ApplyStage {
    /// Get a human-readable name for the stage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fetching => "Downloading",
            Self::Parsing => "Reading metadata",
            Self::Mutating => "Updating file layout",
            Self::Materializing => "Unpacking files",
            Self::Merging => "Merging files",
            Self::MarkerUpdate => "Updating version",
            Self::Cleanup => "Cleaning up",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    /// Whether the stage ends the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Changelog of one applied version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changelog {
    /// Version id.
    pub title: String,
    pub body: String,
}

impl Changelog {
    /// Build from raw metadata text; blank text becomes "updated".
    pub fn new(version: &str, text: &str) -> Self {
        let body = text.trim();
        Self {
            title: version.to_string(),
            body: if body.is_empty() {
                "updated".to_string()
            } else {
                body.to_string()
            },
        }
    }
}
