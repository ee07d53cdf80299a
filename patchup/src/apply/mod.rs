//! Incremental patch application.
//!
//! # Architecture
//!
//! ```text
//! Updater (config → servers → applier)
//!     │
//!     └── PatchApplier::run
//!             ├── VersionLedger: marker + missing versions
//!             └── per version (tracing span "version")
//!                     ├── ServerSource::download_file  → temp archive
//!                     ├── PatchArchiveReader           → metadata
//!                     ├── guard: unsafe paths, protected files
//!                     ├── mutate: move → delete → mkdir
//!                     ├── materialize: Empty | Fill | Modify → staged files
//!                     ├── StagedFiles::merge
//!                     └── VersionLedger::write_marker
//! ```

mod applier;
mod guard;
mod materialize;
mod stage;
mod worker;

pub use applier::{PatchApplier, UpdateReport, UpdateStatus};
pub use guard::{lexical_normalize, resolve_relative, validate_paths, ProtectedPaths};
pub use materialize::{
    materialize_entry, staged_path, EntryOutcome, SkipReason, StagedFiles, STAGED_SUFFIX,
};
pub use stage::{ApplyStage, Changelog};
pub use worker::{UpdateHandle, UpdateWorker, Updater};
