//! Applies every missing version, in server order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use tracing::{debug, error, info, info_span, warn};

use super::guard::{resolve_relative, validate_paths, ProtectedPaths};
use super::materialize::{materialize_entry, remove_if_exists, EntryOutcome, StagedFiles};
use super::stage::{ApplyStage, Changelog};
use crate::archive::{PatchArchiveReader, PatchMetadata};
use crate::cancel::CancelToken;
use crate::config::UpdaterConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::ledger::{compute_missing, parse_version_list, MissingVersions, VersionLedger};
use crate::progress::{NullObserver, UpdateObserver};
use crate::server::ServerSource;

/// Result of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Marker value before the run.
    pub previous: Option<String>,
    /// Newest version advertised by the server.
    pub newest: String,
    /// Versions applied in this run, in order.
    pub applied: Vec<String>,
    /// Changelogs of the applied versions.
    pub changelogs: Vec<Changelog>,
    /// The local marker was unknown and every version was applied again.
    pub restarted: bool,
}

impl UpdateReport {
    pub fn has_updates(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Local state compared with the server, without applying anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatus {
    /// Decoded marker, if any.
    pub current: Option<String>,
    /// Whether the marker is stored obfuscated.
    pub obfuscated: bool,
    /// Versions a run would apply.
    pub missing: MissingVersions,
}

/// Per-entry counters of one version.
#[derive(Debug, Clone, Copy, Default)]
struct EntryStats {
    emptied: usize,
    staged: usize,
    skipped: usize,
}

/// Drives the per-version pipeline.
pub struct PatchApplier {
    config: UpdaterConfig,
    server: Box<dyn ServerSource>,
    ledger: VersionLedger,
    protected: ProtectedPaths,
    observer: Arc<dyn UpdateObserver>,
    cancel: CancelToken,
}

impl PatchApplier {
    /// Create an applier fetching from `server`.
    pub fn new(config: UpdaterConfig, server: Box<dyn ServerSource>, cancel: CancelToken) -> Self {
        let ledger = VersionLedger::new(config.marker_path());
        Self {
            config,
            server,
            ledger,
            protected: ProtectedPaths::default(),
            observer: Arc::new(NullObserver),
            cancel,
        }
    }

    /// Report progress to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn UpdateObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Never touch the given paths.
    pub fn with_protected(mut self, protected: ProtectedPaths) -> Self {
        self.protected = protected;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Compare the local marker with the server list.
    pub fn status(&self) -> UpdateResult<UpdateStatus> {
        let all = self.fetch_versions()?;
        let marker = self.ledger.read_marker()?;
        let current = marker.as_ref().map(|m| m.version.clone());
        let missing = compute_missing(
            &all,
            current.as_deref(),
            self.config.restart_on_unknown_version,
        )?;

        Ok(UpdateStatus {
            current,
            obfuscated: marker.map(|m| m.obfuscated).unwrap_or(false),
            missing,
        })
    }

    /// Apply every missing version.
    ///
    /// Versions applied before a failure stay applied and their changelogs
    /// are still delivered to the observer.
    pub fn run(&self) -> UpdateResult<UpdateReport> {
        self.checkpoint()?;
        self.observer.on_label("Checking for updates");

        let status = self.status()?;
        let obfuscated = status.obfuscated || self.config.obfuscate_marker;
        let MissingVersions {
            versions,
            newest,
            restarted,
        } = status.missing;

        info!(
            current = status.current.as_deref().unwrap_or("<none>"),
            newest = %newest,
            missing = ?versions,
            "Version check complete"
        );

        let mut report = UpdateReport {
            previous: status.current,
            newest,
            restarted,
            ..Default::default()
        };

        if versions.is_empty() {
            info!("All files are up to date");
            self.observer.on_finished(false);
            return Ok(report);
        }

        let result = self.apply_all(&versions, obfuscated, &mut report);

        if !report.changelogs.is_empty() {
            self.observer.on_changelogs(&report.changelogs);
        }

        match result {
            Ok(()) => {
                info!(applied = ?report.applied, "Update complete");
                self.observer.on_finished(true);
                Ok(report)
            }
            Err(e) => {
                if e.is_interrupted() {
                    info!(applied = ?report.applied, "Update interrupted");
                } else {
                    error!(applied = ?report.applied, error = %e, "Update failed");
                }
                Err(e)
            }
        }
    }

    fn apply_all(
        &self,
        versions: &[String],
        obfuscated: bool,
        report: &mut UpdateReport,
    ) -> UpdateResult<()> {
        for version in versions {
            let changelog = self.apply_version(version, obfuscated)?;
            report.applied.push(version.clone());
            report.changelogs.push(changelog);
        }

        // Align with the list head even if it moved during a long run.
        self.checkpoint()?;
        self.ledger.write_marker(&report.newest, obfuscated)
    }

    /// Run the full pipeline for one version.
    pub fn apply_version(&self, version: &str, obfuscated: bool) -> UpdateResult<Changelog> {
        let span = info_span!("version", version = %version);
        let _enter = span.enter();

        match self.pipeline(version, obfuscated) {
            Ok(changelog) => {
                self.enter(version, ApplyStage::Done);
                Ok(changelog)
            }
            Err(e) => {
                self.enter(version, ApplyStage::Failed);
                if !e.is_interrupted() {
                    error!(error = %e, "Version failed");
                }
                Err(e)
            }
        }
    }

    fn pipeline(&self, version: &str, obfuscated: bool) -> UpdateResult<Changelog> {
        let root = self.config.update_dir.as_path();

        self.enter(version, ApplyStage::Fetching);
        let archive_path = self.fetch_archive(version)?;

        self.enter(version, ApplyStage::Parsing);
        let mut reader = PatchArchiveReader::open(version, &archive_path)?;
        validate_paths(version, root, reader.metadata())?;
        self.strip_protected(reader.metadata_mut());
        log_metadata(reader.metadata());
        if reader.metadata().is_noop() {
            info!("Version changes no files");
        }
        let notes = reader.metadata().changelogs.clone();

        self.enter(version, ApplyStage::Mutating);
        self.mutate(version, reader.metadata())?;

        self.enter(version, ApplyStage::Materializing);
        let mut staged = StagedFiles::new();
        let mut stats = EntryStats::default();
        let mut cursor = reader.entries();
        while let Some(pending) = cursor.advance() {
            self.checkpoint()?;
            let entry = pending.entry();
            let target = self.resolve(version, &entry.path)?;
            self.observer.on_label(&format!("{}: {}", version, entry.path));

            let outcome = materialize_entry(
                version,
                entry,
                &target,
                || pending.open(),
                &mut staged,
                &self.cancel,
            )?;
            match outcome {
                EntryOutcome::Emptied => stats.emptied += 1,
                EntryOutcome::Staged => stats.staged += 1,
                EntryOutcome::Skipped(reason) => {
                    debug!(path = %entry.path, reason = reason.describe(), "Entry skipped");
                    stats.skipped += 1;
                }
            }
        }

        self.enter(version, ApplyStage::Merging);
        let merged = staged.merge(&self.cancel)?;
        info!(
            merged,
            emptied = stats.emptied,
            skipped = stats.skipped,
            "Files merged"
        );

        self.enter(version, ApplyStage::MarkerUpdate);
        self.ledger.write_marker(version, obfuscated)?;

        self.enter(version, ApplyStage::Cleanup);
        drop(cursor);
        drop(reader);
        if let Err(e) = archive_path.close() {
            warn!(error = %e, "Failed to remove downloaded archive");
        }

        Ok(Changelog::new(version, &notes))
    }

    /// Download the archive into the temp directory; it is deleted on drop.
    fn fetch_archive(&self, version: &str) -> UpdateResult<TempPath> {
        let temp_dir = &self.config.temp_dir;
        fs::create_dir_all(temp_dir).map_err(|e| UpdateError::create_dir(temp_dir, e))?;

        let name = format!("{}{}", version, self.config.archive_suffix);
        let path = tempfile::Builder::new()
            .prefix("patchup-")
            .suffix(&self.config.archive_suffix)
            .tempfile_in(temp_dir)
            .map_err(|e| UpdateError::write(temp_dir, e))?
            .into_temp_path();
        self.observer.on_label(&format!("Downloading {}", version));

        let observer = self.observer.as_ref();
        let cancel = &self.cancel;
        let on_progress = move |delta: u64, so_far: u64, total: u64| {
            observer.on_progress(delta, so_far, total);
            if observer.should_interrupt() {
                cancel.cancel();
            }
        };

        let bytes = self.server.download_file(&name, &path, &on_progress)?;
        debug!(bytes, path = %path.display(), "Archive downloaded");
        Ok(path)
    }

    /// Remove every operation on the executable, the log file or a folder
    /// holding either.
    fn strip_protected(&self, metadata: &mut PatchMetadata) {
        if self.protected.is_empty() {
            return;
        }
        let root = self.config.update_dir.as_path();
        for path in metadata.exclude_files(|p| self.protected.is_protected(root, p)) {
            warn!(path = %path, "Skipped an operation on a protected file");
        }
    }

    /// Moves, then deletions, then new folders.
    fn mutate(&self, version: &str, metadata: &PatchMetadata) -> UpdateResult<()> {
        for entry in &metadata.move_files {
            self.checkpoint()?;
            let from = self.resolve(version, &entry.from)?;
            let to = self.resolve(version, &entry.to)?;
            if !from.exists() {
                debug!(from = %entry.from, "Move source missing, skipped");
                continue;
            }
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| UpdateError::create_dir(parent, e))?;
            }
            if to.is_file() {
                remove_if_exists(&to)?;
            }
            fs::rename(&from, &to).map_err(|e| UpdateError::write(&to, e))?;
            debug!(from = %entry.from, to = %entry.to, "Moved");
        }

        for path in &metadata.old_files {
            let target = self.resolve(version, path)?;
            remove_if_exists(&target)?;
            debug!(path = %path, "Deleted file");
        }

        for path in &metadata.old_folders {
            let target = self.resolve(version, path)?;
            match fs::remove_dir_all(&target) {
                Ok(()) => debug!(path = %path, "Deleted folder"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(UpdateError::write(&target, e)),
            }
        }

        for path in &metadata.new_folders {
            let target = self.resolve(version, path)?;
            fs::create_dir_all(&target).map_err(|e| UpdateError::create_dir(&target, e))?;
        }

        Ok(())
    }

    fn resolve(&self, version: &str, relative: &str) -> UpdateResult<PathBuf> {
        resolve_relative(&self.config.update_dir, relative).ok_or_else(|| UpdateError::UnsafePath {
            version: version.to_string(),
            path: relative.to_string(),
        })
    }

    fn enter(&self, version: &str, stage: ApplyStage) {
        debug!(stage = stage.name(), "Stage");
        self.observer.on_stage(version, stage);
    }

    /// Poll the observer and fail with `Interrupted` once cancelled.
    fn checkpoint(&self) -> UpdateResult<()> {
        if self.observer.should_interrupt() {
            self.cancel.cancel();
        }
        self.cancel.check()
    }

    fn fetch_versions(&self) -> UpdateResult<Vec<String>> {
        let text = self.server.fetch_text(&self.config.version_list_file)?;
        let versions = parse_version_list(&text);
        debug!(count = versions.len(), "Fetched version list");
        Ok(versions)
    }

    /// Root of the updated tree.
    pub fn update_dir(&self) -> &Path {
        &self.config.update_dir
    }
}

fn log_metadata(metadata: &PatchMetadata) {
    for entry in &metadata.move_files {
        debug!(from = %entry.from, to = %entry.to, "move");
    }
    for path in &metadata.old_files {
        debug!(path = %path, "old file");
    }
    for path in &metadata.old_folders {
        debug!(path = %path, "old folder");
    }
    for entry in &metadata.new_files {
        debug!(path = %entry.path, mode = %entry.mode, "new file");
    }
    for path in &metadata.new_folders {
        debug!(path = %path, "new folder");
    }
}
