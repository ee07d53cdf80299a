//! Patch archive format.
//!
//! A version archive is a ZIP file:
//!
//! ```text
//! v2.patch-archive
//! ├── patch-metadata.json      PatchMetadata (moves, deletions, new files)
//! └── content/
//!     ├── mods/x.jar           Fill: the new bytes
//!     └── bin/game             Modify: a bsdiff delta against the old file
//! ```
//!
//! `Empty` entries have no content blob.

mod metadata;
mod reader;

pub use metadata::{ModificationMode, MoveEntry, PatchEntry, PatchMetadata};
pub use reader::{ContentStream, EntryCursor, PatchArchiveReader, PendingEntry};

/// Name of the metadata descriptor inside an archive.
pub const METADATA_FILE: &str = "patch-metadata.json";

/// Archive member holding the content of `path`.
pub fn content_path(path: &str) -> String {
    format!("content/{}", path.trim_start_matches('/'))
}
