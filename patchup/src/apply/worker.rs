//! Running an update off the host thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::info;

use super::applier::{PatchApplier, UpdateReport, UpdateStatus};
use super::guard::ProtectedPaths;
use crate::cancel::CancelToken;
use crate::config::UpdaterConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::progress::{NullObserver, UpdateObserver};
use crate::server::{HttpServerSource, MultipleServers, ServerSource};

/// Name of the dedicated update thread.
const WORKER_THREAD_NAME: &str = "patchup-update";

/// Spawns an applier on its own thread.
pub struct UpdateWorker;

impl UpdateWorker {
    /// Start `applier.run()` on a dedicated thread.
    pub fn spawn(applier: PatchApplier) -> UpdateResult<UpdateHandle> {
        let cancel = applier.cancel_token().clone();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || applier.run())
            .map_err(|e| UpdateError::WorkerPanicked(format!("failed to spawn: {}", e)))?;

        Ok(UpdateHandle { cancel, handle })
    }
}

/// Handle to a running update.
pub struct UpdateHandle {
    cancel: CancelToken,
    handle: JoinHandle<UpdateResult<UpdateReport>>,
}

impl UpdateHandle {
    /// Token that interrupts the run when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end.
    pub fn join(self) -> UpdateResult<UpdateReport> {
        self.handle.join().unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(UpdateError::WorkerPanicked(message))
        })
    }
}

/// Entry point wiring configuration, servers, and protection together.
///
/// # Example
///
/// ```ignore
/// use patchup::{Updater, UpdaterConfig};
///
/// let config = UpdaterConfig::new("./game".into())
///     .with_server("https://mirror.example.com/patches/");
/// let report = Updater::new(config).run()?;
/// println!("applied {:?}", report.applied);
/// ```
pub struct Updater {
    config: UpdaterConfig,
    observer: Arc<dyn UpdateObserver>,
    cancel: CancelToken,
    log_file: Option<PathBuf>,
}

impl Updater {
    pub fn new(config: UpdaterConfig) -> Self {
        Self {
            config,
            observer: Arc::new(NullObserver),
            cancel: CancelToken::new(),
            log_file: None,
        }
    }

    /// Report progress to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn UpdateObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Protect the active log file from modification.
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Build an applier over HTTP servers with failover.
    pub fn build_applier(&self) -> UpdateResult<PatchApplier> {
        self.config.validate()?;

        let sources = self
            .config
            .servers
            .iter()
            .map(|url| {
                HttpServerSource::new(
                    url,
                    &self.config.http,
                    self.config.download.clone(),
                    self.cancel.clone(),
                )
                .map(|s| Box::new(s) as Box<dyn ServerSource>)
            })
            .collect::<UpdateResult<Vec<_>>>()?;
        let servers = MultipleServers::new(sources)?;

        info!(
            servers = servers.len(),
            update_dir = %self.config.update_dir.display(),
            "Updater ready"
        );

        Ok(self.applier_with(Box::new(servers)))
    }

    /// Build an applier over a custom server source.
    pub fn applier_with(&self, server: Box<dyn ServerSource>) -> PatchApplier {
        PatchApplier::new(self.config.clone(), server, self.cancel.clone())
            .with_observer(Arc::clone(&self.observer))
            .with_protected(ProtectedPaths::for_current_process(self.log_file.as_deref()))
    }

    /// Apply every missing version on the calling thread.
    pub fn run(&self) -> UpdateResult<UpdateReport> {
        self.build_applier()?.run()
    }

    /// Apply every missing version on a dedicated thread.
    pub fn spawn(&self) -> UpdateResult<UpdateHandle> {
        UpdateWorker::spawn(self.build_applier()?)
    }

    /// Compare local and server versions without applying anything.
    pub fn status(&self) -> UpdateResult<UpdateStatus> {
        self.build_applier()?.status()
    }
}
