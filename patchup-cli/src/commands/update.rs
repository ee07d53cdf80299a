//! Update command - apply every missing version.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use patchup::{CancelToken, Updater};
use tracing::info;

use super::GlobalArgs;
use crate::error::CliError;
use crate::observer::ConsoleObserver;

/// Run the update command.
pub fn run(global: &GlobalArgs, log_file: Option<PathBuf>) -> Result<(), CliError> {
    let config = global.resolve_config()?;
    let cancel = CancelToken::new();

    let signal = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, stopping update...");
        signal.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let observer = Arc::new(ConsoleObserver::new());
    let updater = Updater::new(config)
        .with_observer(observer.clone())
        .with_cancel_token(cancel)
        .with_log_file(log_file);

    info!(update_dir = %updater.config().update_dir.display(), "Starting update");
    let result = updater.spawn().and_then(|handle| handle.join());
    observer.finish();

    let report = result?;
    if report.has_updates() {
        println!(
            "{} Updated to {} ({} version{} applied)",
            style("✓").green().bold(),
            report.newest,
            report.applied.len(),
            if report.applied.len() == 1 { "" } else { "s" }
        );
    } else {
        println!("{} Already up to date ({})", style("✓").green().bold(), report.newest);
    }
    Ok(())
}
