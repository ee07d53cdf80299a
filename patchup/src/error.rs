//! Error types for the update client.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Errors that can occur while downloading and applying versions.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The server actively refused the connection.
    #[error("connection refused by {url}: {reason}")]
    ConnectionRefused { url: String, reason: String },

    /// The connection was reset or dropped mid-transfer.
    #[error("connection to {url} was reset: {reason}")]
    ConnectionReset { url: String, reason: String },

    /// Connect or read timed out.
    #[error("request to {url} timed out: {reason}")]
    Timeout { url: String, reason: String },

    /// Any other transport failure.
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// The server answered with a status code outside the expected range.
    #[error("unexpected status {status} from {url} (expected {expected}): {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        expected: String,
        body: String,
    },

    /// A block arrived with a different size than its byte range.
    #[error("block {index} size mismatch: expected {expected} bytes, got {actual}")]
    BlockSizeMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },

    /// Some blocks were never recorded after all workers finished.
    #[error("download incomplete: expected {expected} blocks, received {received}; missing {missing:?}{details}")]
    IncompleteBlocks {
        expected: usize,
        received: usize,
        missing: Vec<usize>,
        details: String,
    },

    /// The reassembled byte count differs from the declared length.
    #[error("byte count mismatch: expected {expected} bytes, got {actual}")]
    ByteCountMismatch { expected: u64, actual: u64 },

    /// The concurrent download did not finish within the overall deadline.
    #[error("download of {url} did not finish within {secs}s")]
    DeadlineExceeded { url: String, secs: u64 },

    /// The server returned no versions.
    #[error("invalid version list: the server returned no versions")]
    EmptyVersionList,

    /// The local marker is not in the server's version list.
    #[error("version {version} is not recognized by the server; cannot determine update order")]
    UnrecognizedVersion { version: String },

    /// The marker file could not be decoded.
    #[error("version marker {path} is not valid: {reason}")]
    InvalidMarker { path: PathBuf, reason: String },

    /// A materialized file does not hash to the expected value.
    #[error("version {version} is corrupted: {path} ({mode}) expected hash {expected}, got {actual}")]
    PatchCorrupted {
        version: String,
        path: String,
        mode: String,
        expected: String,
        actual: String,
    },

    /// The archive is structurally invalid.
    #[error("archive for version {version} is malformed: {reason}")]
    MalformedArchive { version: String, reason: String },

    /// The archive has no metadata descriptor.
    #[error("archive for version {version} has no metadata")]
    MissingMetadata { version: String },

    /// A metadata path escapes the update root.
    #[error("archive for version {version} references unsafe path {path}")]
    UnsafePath { version: String, path: String },

    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file or directory.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The update worker thread panicked.
    #[error("update worker panicked: {0}")]
    WorkerPanicked(String),

    /// The run was cancelled by the user.
    #[error("interrupted by user")]
    Interrupted,
}

impl UpdateError {
    /// Whether this error is a user-initiated cancellation.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Whether a fresh attempt of the same request may succeed.
    ///
    /// Integrity and hash faults are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. }
                | Self::ConnectionReset { .. }
                | Self::Timeout { .. }
                | Self::Transport { .. }
                | Self::UnexpectedStatus { .. }
        )
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::ReadFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::WriteFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn create_dir(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::CreateDirFailed {
            path: path.into(),
            source,
        }
    }
}
