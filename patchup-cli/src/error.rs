//! CLI error type and exit codes.

use patchup::UpdateError;
use thiserror::Error;

/// Exit code for a run cancelled with Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Update(#[from] UpdateError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Update(e) if e.is_interrupted() => EXIT_INTERRUPTED,
            _ => 1,
        }
    }
}
