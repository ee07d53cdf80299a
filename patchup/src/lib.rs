//! Patchup - incremental update client
//!
//! Given a local version marker and the ordered version list published by an
//! update server, this library downloads every missing version's patch
//! archive and applies it to a local directory tree, advancing the marker
//! only once a version is fully and verifiably applied.
//!
//! # Modules
//!
//! - [`download`]: range-aware concurrent downloader
//! - [`server`]: server endpoints with ordered failover
//! - [`archive`]: patch archive format and reader
//! - [`ledger`]: version marker and missing-version computation
//! - [`apply`]: per-version application pipeline and worker thread

pub mod apply;
pub mod archive;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod download;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod progress;
pub mod server;

pub use apply::{
    ApplyStage, Changelog, PatchApplier, UpdateHandle, UpdateReport, UpdateStatus, UpdateWorker,
    Updater,
};
pub use cancel::CancelToken;
pub use config::{DownloadSettings, HttpSettings, UpdaterConfig};
pub use error::{UpdateError, UpdateResult};
pub use progress::{NullObserver, UpdateObserver};
pub use server::{MultipleServers, ServerSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
