//! End-to-end tests of the update pipeline against a directory-backed server.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use patchup::apply::ProtectedPaths;
use patchup::archive::{content_path, ModificationMode, MoveEntry, PatchEntry, PatchMetadata, METADATA_FILE};
use patchup::checksum::hash_bytes;
use patchup::ledger::{encode_marker, VersionLedger};
use patchup::progress::DownloadCallback;
use patchup::{
    ApplyStage, CancelToken, Changelog, MultipleServers, PatchApplier, ServerSource, UpdateError,
    UpdateObserver, UpdateResult, UpdaterConfig,
};

const MARKER: &str = "config/version.txt";

// ============================================================================
// Test fixtures
// ============================================================================

/// Serves files from a local directory.
struct DirSource {
    root: PathBuf,
    downloads: Arc<AtomicUsize>,
    dests: Arc<Mutex<Vec<PathBuf>>>,
}

impl DirSource {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            downloads: Arc::new(AtomicUsize::new(0)),
            dests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ServerSource for DirSource {
    fn fetch_text(&self, path: &str) -> UpdateResult<String> {
        fs::read_to_string(self.root.join(path)).map_err(|e| UpdateError::Transport {
            url: self.build_uri(path),
            reason: e.to_string(),
        })
    }

    fn download_file(
        &self,
        path: &str,
        dest: &Path,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.dests.lock().unwrap().push(dest.to_path_buf());
        let data = fs::read(self.root.join(path)).map_err(|e| UpdateError::Transport {
            url: self.build_uri(path),
            reason: e.to_string(),
        })?;
        fs::write(dest, &data).map_err(|e| UpdateError::WriteFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;
        on_progress(data.len() as u64, data.len() as u64, data.len() as u64);
        Ok(data.len() as u64)
    }

    fn build_uri(&self, path: &str) -> String {
        format!("file://{}/{}", self.root.display(), path)
    }
}

/// A server that is always down.
struct DeadSource;

impl ServerSource for DeadSource {
    fn fetch_text(&self, path: &str) -> UpdateResult<String> {
        Err(UpdateError::ConnectionRefused {
            url: self.build_uri(path),
            reason: "down".to_string(),
        })
    }

    fn download_file(&self, path: &str, _: &Path, _: &DownloadCallback<'_>) -> UpdateResult<u64> {
        Err(UpdateError::ConnectionRefused {
            url: self.build_uri(path),
            reason: "down".to_string(),
        })
    }

    fn build_uri(&self, path: &str) -> String {
        format!("http://dead/{}", path)
    }
}

#[derive(Default)]
struct RecordingObserver {
    stages: Mutex<Vec<(String, ApplyStage)>>,
    changelogs: Mutex<Vec<Changelog>>,
    finished: Mutex<Vec<bool>>,
}

impl RecordingObserver {
    fn completed_versions(&self) -> Vec<String> {
        self.stages
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, stage)| *stage == ApplyStage::Done)
            .map(|(version, _)| version.clone())
            .collect()
    }
}

impl UpdateObserver for RecordingObserver {
    fn on_stage(&self, version: &str, stage: ApplyStage) {
        self.stages.lock().unwrap().push((version.to_string(), stage));
    }

    fn on_changelogs(&self, changelogs: &[Changelog]) {
        self.changelogs.lock().unwrap().extend_from_slice(changelogs);
    }

    fn on_finished(&self, has_updates: bool) {
        self.finished.lock().unwrap().push(has_updates);
    }
}

/// Builds version archives into the server directory.
struct ArchiveBuilder {
    metadata: PatchMetadata,
    blobs: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    fn new(changelog: &str) -> Self {
        Self {
            metadata: PatchMetadata {
                changelogs: changelog.to_string(),
                ..Default::default()
            },
            blobs: Vec::new(),
        }
    }

    fn fill(mut self, path: &str, content: &[u8]) -> Self {
        self.metadata.new_files.push(PatchEntry {
            path: path.to_string(),
            mode: ModificationMode::Fill,
            old_hash: String::new(),
            new_hash: hash_bytes(content),
            raw_length: content.len() as u64,
        });
        self.blobs.push((path.to_string(), content.to_vec()));
        self
    }

    fn fill_corrupted(mut self, path: &str, declared: &[u8], stored: &[u8]) -> Self {
        self.metadata.new_files.push(PatchEntry {
            path: path.to_string(),
            mode: ModificationMode::Fill,
            old_hash: String::new(),
            new_hash: hash_bytes(declared),
            raw_length: declared.len() as u64,
        });
        self.blobs.push((path.to_string(), stored.to_vec()));
        self
    }

    fn modify(mut self, path: &str, old: &[u8], new: &[u8]) -> Self {
        let mut delta = Vec::new();
        bsdiff::diff(old, new, &mut delta).unwrap();
        self.metadata.new_files.push(PatchEntry {
            path: path.to_string(),
            mode: ModificationMode::Modify,
            old_hash: hash_bytes(old),
            new_hash: hash_bytes(new),
            raw_length: new.len() as u64,
        });
        self.blobs.push((path.to_string(), delta));
        self
    }

    fn empty(mut self, path: &str) -> Self {
        self.metadata.new_files.push(PatchEntry {
            path: path.to_string(),
            mode: ModificationMode::Empty,
            old_hash: String::new(),
            new_hash: hash_bytes(b""),
            raw_length: 0,
        });
        self
    }

    fn moved(mut self, from: &str, to: &str) -> Self {
        self.metadata.move_files.push(MoveEntry {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    fn delete_file(mut self, path: &str) -> Self {
        self.metadata.old_files.push(path.to_string());
        self
    }

    fn delete_folder(mut self, path: &str) -> Self {
        self.metadata.old_folders.push(path.to_string());
        self
    }

    fn new_folder(mut self, path: &str) -> Self {
        self.metadata.new_folders.push(path.to_string());
        self
    }

    fn write(self, server_dir: &Path, version: &str) {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        writer.start_file(METADATA_FILE, options).unwrap();
        writer
            .write_all(&serde_json::to_vec_pretty(&self.metadata).unwrap())
            .unwrap();
        for (path, data) in &self.blobs {
            writer.start_file(content_path(path), options).unwrap();
            writer.write_all(data).unwrap();
        }

        let bytes = writer.finish().unwrap().into_inner();
        fs::write(server_dir.join(format!("{}.patch-archive", version)), bytes).unwrap();
    }
}

struct Fixture {
    _temp: TempDir,
    server: PathBuf,
    root: PathBuf,
    scratch: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let server = temp.path().join("server");
        let root = temp.path().join("game");
        let scratch = temp.path().join("scratch");
        fs::create_dir_all(&server).unwrap();
        fs::create_dir_all(&root).unwrap();
        Self {
            _temp: temp,
            server,
            root,
            scratch,
        }
    }

    fn versions(&self, list: &str) {
        fs::write(self.server.join("versions.txt"), list).unwrap();
    }

    fn file(&self, path: &str, content: &[u8]) {
        let path = self.root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(&self, path: &str) -> Vec<u8> {
        fs::read(self.root.join(path)).unwrap()
    }

    fn marker(&self) -> Option<String> {
        VersionLedger::new(self.root.join(MARKER))
            .read_marker()
            .unwrap()
            .map(|m| m.version)
    }

    fn set_marker(&self, version: &str) {
        VersionLedger::new(self.root.join(MARKER))
            .write_marker(version, false)
            .unwrap();
    }

    fn config(&self) -> UpdaterConfig {
        UpdaterConfig::new(self.root.clone())
            .with_temp_dir(self.scratch.clone())
            .with_version_file(MARKER)
    }

    fn applier(&self, config: UpdaterConfig) -> PatchApplier {
        PatchApplier::new(config, Box::new(DirSource::new(&self.server)), CancelToken::new())
    }

    /// Every file under the update root with its contents.
    fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        fn walk(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, root, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                    out.insert(rel, fs::read(&path).unwrap());
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(&self.root, &self.root, &mut out);
        out
    }
}

const GAME_V1: &[u8] = b"game binary version one, with some padding to make the delta meaningful";
const GAME_V2: &[u8] = b"game binary version two, with some padding to make the delta meaningful!";
const GAME_V3: &[u8] = b"game binary version three, with more padding to make the delta meaningful!!";

/// Server with `[v1, v2, v3]` and a local tree at v1.
fn three_version_fixture() -> Fixture {
    let fx = Fixture::new();
    fx.versions("v1\nv2\nv3\n");

    fx.file("a.txt", b"one");
    fx.file("bin/game", GAME_V1);
    fx.file("readme.txt", b"read me");
    fx.file("obsolete.dat", b"old");
    fx.file("legacy/stuff.bin", b"legacy");
    fx.set_marker("v1");

    ArchiveBuilder::new("Second release")
        .moved("readme.txt", "docs/readme.txt")
        .delete_file("obsolete.dat")
        .new_folder("mods")
        .fill("a.txt", b"two")
        .modify("bin/game", GAME_V1, GAME_V2)
        .empty("cfg/empty.ini")
        .write(&fx.server, "v2");

    ArchiveBuilder::new("Third release")
        .delete_folder("legacy")
        .fill("mods/x.jar", b"jar contents")
        .modify("bin/game", GAME_V2, GAME_V3)
        .write(&fx.server, "v3");

    fx
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_applies_missing_versions_in_order() {
    let fx = three_version_fixture();
    let observer = Arc::new(RecordingObserver::default());

    let report = fx
        .applier(fx.config())
        .with_observer(observer.clone())
        .run()
        .unwrap();

    assert_eq!(report.previous.as_deref(), Some("v1"));
    assert_eq!(report.applied, vec!["v2", "v3"]);
    assert_eq!(observer.completed_versions(), vec!["v2", "v3"]);
    assert_eq!(fx.marker().as_deref(), Some("v3"));

    assert_eq!(fx.read("a.txt"), b"two");
    assert_eq!(fx.read("bin/game"), GAME_V3);
    assert_eq!(fx.read("docs/readme.txt"), b"read me");
    assert_eq!(fx.read("mods/x.jar"), b"jar contents");
    assert!(fx.read("cfg/empty.ini").is_empty());
    assert!(!fx.root.join("readme.txt").exists());
    assert!(!fx.root.join("obsolete.dat").exists());
    assert!(!fx.root.join("legacy").exists());

    // Downloaded archives are cleaned up.
    assert_eq!(fs::read_dir(&fx.scratch).unwrap().count(), 0);

    let changelogs = observer.changelogs.lock().unwrap().clone();
    assert_eq!(
        changelogs,
        vec![
            Changelog::new("v2", "Second release"),
            Changelog::new("v3", "Third release"),
        ]
    );
    assert_eq!(*observer.finished.lock().unwrap(), vec![true]);
}

#[test]
fn test_stages_follow_pipeline_order() {
    let fx = three_version_fixture();
    fx.versions("v1\nv2\n");
    let observer = Arc::new(RecordingObserver::default());

    fx.applier(fx.config())
        .with_observer(observer.clone())
        .run()
        .unwrap();

    let stages: Vec<ApplyStage> = observer
        .stages
        .lock()
        .unwrap()
        .iter()
        .map(|(_, stage)| *stage)
        .collect();
    assert_eq!(
        stages,
        vec![
            ApplyStage::Fetching,
            ApplyStage::Parsing,
            ApplyStage::Mutating,
            ApplyStage::Materializing,
            ApplyStage::Merging,
            ApplyStage::MarkerUpdate,
            ApplyStage::Cleanup,
            ApplyStage::Done,
        ]
    );
}

#[test]
fn test_rerun_is_idempotent() {
    let fx = three_version_fixture();
    fx.applier(fx.config()).run().unwrap();
    let before = fx.snapshot();

    let source = DirSource::new(&fx.server);
    let downloads = source.downloads.clone();
    let observer = Arc::new(RecordingObserver::default());
    let report = PatchApplier::new(fx.config(), Box::new(source), CancelToken::new())
        .with_observer(observer.clone())
        .run()
        .unwrap();

    assert!(!report.has_updates());
    assert_eq!(downloads.load(Ordering::SeqCst), 0);
    assert_eq!(fx.snapshot(), before);
    assert_eq!(*observer.finished.lock().unwrap(), vec![false]);
}

#[test]
fn test_empty_version_list_is_fatal() {
    let fx = three_version_fixture();
    fx.versions("\n\n");
    let before = fx.snapshot();

    let err = fx.applier(fx.config()).run().unwrap_err();

    assert!(matches!(err, UpdateError::EmptyVersionList));
    assert_eq!(fx.marker().as_deref(), Some("v1"));
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn test_unknown_marker_without_restart_is_fatal() {
    let fx = three_version_fixture();
    fx.set_marker("vX");

    let config = fx.config().with_restart_on_unknown_version(false);
    let err = fx.applier(config).run().unwrap_err();

    match err {
        UpdateError::UnrecognizedVersion { version } => assert_eq!(version, "vX"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fx.marker().as_deref(), Some("vX"));
}

#[test]
fn test_unknown_marker_with_restart_applies_everything() {
    let fx = three_version_fixture();
    fx.versions("v2\nv3\n");
    fx.set_marker("vX");

    let report = fx.applier(fx.config()).run().unwrap();

    assert!(report.restarted);
    assert_eq!(report.applied, vec!["v2", "v3"]);
    assert_eq!(fx.read("bin/game"), GAME_V3);
    assert_eq!(fx.marker().as_deref(), Some("v3"));
}

#[test]
fn test_fill_skips_file_already_current() {
    let fx = three_version_fixture();
    fx.versions("v1\nv2\n");
    fx.file("a.txt", b"two");
    let before = fs::metadata(fx.root.join("a.txt")).unwrap().modified().unwrap();

    fx.applier(fx.config()).run().unwrap();

    assert_eq!(fx.read("a.txt"), b"two");
    let after = fs::metadata(fx.root.join("a.txt")).unwrap().modified().unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_modify_leaves_diverged_file_untouched() {
    let fx = three_version_fixture();
    fx.versions("v1\nv2\n");
    fx.file("bin/game", b"locally patched binary");

    let report = fx.applier(fx.config()).run().unwrap();

    assert_eq!(report.applied, vec!["v2"]);
    assert_eq!(fx.read("bin/game"), b"locally patched binary");
    assert_eq!(fx.read("a.txt"), b"two");
    assert_eq!(fx.marker().as_deref(), Some("v2"));
}

#[test]
fn test_self_protection_skips_executable() {
    let fx = Fixture::new();
    fx.versions("v1\nv2\n");
    fx.set_marker("v1");
    fx.file("bin/patchup", b"running updater");
    fx.file("logs/update.log", b"log line");

    ArchiveBuilder::new("")
        .delete_file("bin/patchup")
        .moved("logs/update.log", "logs/old.log")
        .fill("bin/patchup", b"replacement updater")
        .fill("data.txt", b"payload")
        .write(&fx.server, "v2");

    let protected = ProtectedPaths::new([
        fx.root.join("bin/patchup"),
        fx.root.join("logs/update.log"),
    ]);
    let report = fx
        .applier(fx.config())
        .with_protected(protected)
        .run()
        .unwrap();

    assert_eq!(report.applied, vec!["v2"]);
    assert_eq!(fx.read("bin/patchup"), b"running updater");
    assert_eq!(fx.read("logs/update.log"), b"log line");
    assert!(!fx.root.join("logs/old.log").exists());
    assert_eq!(fx.read("data.txt"), b"payload");
    assert_eq!(report.changelogs[0].body, "updated");
}

#[test]
fn test_self_protection_skips_folder_deletion() {
    let fx = Fixture::new();
    fx.versions("v1\nv2\n");
    fx.set_marker("v1");
    fx.file("bin/patchup", b"running updater");
    fx.file("bin/helper.dat", b"helper");
    fx.file("cache/blob.bin", b"cached");

    ArchiveBuilder::new("")
        .delete_folder("bin")
        .delete_folder("cache")
        .fill("data.txt", b"payload")
        .write(&fx.server, "v2");

    let protected = ProtectedPaths::new([fx.root.join("bin/patchup")]);
    let report = fx
        .applier(fx.config())
        .with_protected(protected)
        .run()
        .unwrap();

    assert_eq!(report.applied, vec!["v2"]);
    assert_eq!(fx.read("bin/patchup"), b"running updater");
    assert_eq!(fx.read("bin/helper.dat"), b"helper");
    assert!(!fx.root.join("cache").exists());
    assert_eq!(fx.read("data.txt"), b"payload");
    assert_eq!(fx.marker().as_deref(), Some("v2"));
}

#[test]
fn test_self_protection_skips_folder_move() {
    let fx = Fixture::new();
    fx.versions("v1\nv2\n");
    fx.set_marker("v1");
    fx.file("bin/patchup", b"running updater");
    fx.file("assets/a.png", b"png");

    ArchiveBuilder::new("")
        .moved("bin", "old-bin")
        .moved("assets", "media")
        .write(&fx.server, "v2");

    let protected = ProtectedPaths::new([fx.root.join("bin/patchup")]);
    fx.applier(fx.config())
        .with_protected(protected)
        .run()
        .unwrap();

    assert_eq!(fx.read("bin/patchup"), b"running updater");
    assert!(!fx.root.join("old-bin").exists());
    assert_eq!(fx.read("media/a.png"), b"png");
    assert_eq!(fx.marker().as_deref(), Some("v2"));
}

#[test]
fn test_archive_download_stays_in_temp_dir() {
    let fx = Fixture::new();
    fx.versions("v1\n../v2\n");
    fx.set_marker("v1");
    ArchiveBuilder::new("Escaping name")
        .fill("a.txt", b"two")
        .write(&fx.server, "../v2");
    let published = fs::read(fx.server.join("../v2.patch-archive")).unwrap();

    let source = DirSource::new(&fx.server);
    let dests = source.dests.clone();
    let report = PatchApplier::new(fx.config(), Box::new(source), CancelToken::new())
        .run()
        .unwrap();

    assert_eq!(report.applied, vec!["../v2"]);
    assert_eq!(fx.read("a.txt"), b"two");

    let dests = dests.lock().unwrap().clone();
    assert_eq!(dests.len(), 1);
    assert_eq!(dests[0].parent(), Some(fx.scratch.as_path()));
    let name = dests[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(!name.contains(".."));
    assert!(name.ends_with(".patch-archive"));

    // The archive beside the server directory was not overwritten or removed.
    assert_eq!(fs::read(fx.server.join("../v2.patch-archive")).unwrap(), published);
    assert_eq!(fs::read_dir(&fx.scratch).unwrap().count(), 0);
}

#[test]
fn test_corrupted_fill_aborts_version() {
    let fx = three_version_fixture();
    fx.versions("v1\nv2\n");
    ArchiveBuilder::new("broken")
        .fill("a.txt", b"two")
        .fill_corrupted("mods/x.jar", b"declared", b"tampered")
        .write(&fx.server, "v2");

    let err = fx.applier(fx.config()).run().unwrap_err();

    match err {
        UpdateError::PatchCorrupted {
            version, path, mode, ..
        } => {
            assert_eq!(version, "v2");
            assert_eq!(path, "mods/x.jar");
            assert_eq!(mode, "fill");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // Nothing was merged and no staging files remain.
    assert_eq!(fx.read("a.txt"), b"one");
    assert!(!fx.root.join("a.txt.patchup-staged").exists());
    assert!(!fx.root.join("mods").exists() || fs::read_dir(fx.root.join("mods")).unwrap().count() == 0);
    assert_eq!(fx.marker().as_deref(), Some("v1"));
}

#[test]
fn test_failure_keeps_earlier_versions_applied() {
    let fx = three_version_fixture();
    ArchiveBuilder::new("broken")
        .fill_corrupted("mods/x.jar", b"declared", b"tampered")
        .write(&fx.server, "v3");
    let observer = Arc::new(RecordingObserver::default());

    let err = fx
        .applier(fx.config())
        .with_observer(observer.clone())
        .run()
        .unwrap_err();

    assert!(matches!(err, UpdateError::PatchCorrupted { .. }));
    assert_eq!(fx.marker().as_deref(), Some("v2"));
    assert_eq!(fx.read("bin/game"), GAME_V2);
    // The changelog of the applied version is still delivered.
    assert_eq!(
        *observer.changelogs.lock().unwrap(),
        vec![Changelog::new("v2", "Second release")]
    );
    assert!(observer.finished.lock().unwrap().is_empty());
}

#[test]
fn test_rerun_after_lost_marker_write_reaches_same_state() {
    let fx = three_version_fixture();
    fx.versions("v1\nv2\n");
    fx.applier(fx.config()).run().unwrap();
    let expected = fx.snapshot();

    // Crash after the merge but before the marker write.
    fx.set_marker("v1");

    let report = fx.applier(fx.config()).run().unwrap();
    assert_eq!(report.applied, vec!["v2"]);
    assert_eq!(fx.snapshot(), expected);
}

#[test]
fn test_unsafe_path_is_rejected_before_mutation() {
    let fx = three_version_fixture();
    fx.versions("v1\nv2\n");
    ArchiveBuilder::new("")
        .delete_file("a.txt")
        .fill("../escape.txt", b"outside")
        .write(&fx.server, "v2");

    let err = fx.applier(fx.config()).run().unwrap_err();

    assert!(matches!(err, UpdateError::UnsafePath { ref path, .. } if path == "../escape.txt"));
    assert_eq!(fx.read("a.txt"), b"one");
    assert!(!fx.root.parent().unwrap().join("escape.txt").exists());
}

#[test]
fn test_obfuscated_marker_stays_obfuscated() {
    let fx = three_version_fixture();
    fs::write(fx.root.join(MARKER), encode_marker("v1", true)).unwrap();

    fx.applier(fx.config()).run().unwrap();

    let raw = fs::read_to_string(fx.root.join(MARKER)).unwrap();
    assert_eq!(raw, encode_marker("v3", true));
    assert_eq!(fx.marker().as_deref(), Some("v3"));
}

#[test]
fn test_obfuscation_enabled_by_config() {
    let fx = three_version_fixture();
    fx.versions("v1\nv2\n");

    fx.applier(fx.config().with_obfuscate_marker(true)).run().unwrap();

    let raw = fs::read_to_string(fx.root.join(MARKER)).unwrap();
    assert!(raw.starts_with(':'));
    assert_eq!(fx.marker().as_deref(), Some("v2"));
}

#[test]
fn test_missing_marker_applies_every_version() {
    let fx = Fixture::new();
    fx.versions("v1\n");
    ArchiveBuilder::new("Initial")
        .new_folder("mods")
        .fill("a.txt", b"first")
        .write(&fx.server, "v1");

    let report = fx.applier(fx.config()).run().unwrap();

    assert_eq!(report.previous, None);
    assert_eq!(report.applied, vec!["v1"]);
    assert_eq!(fx.read("a.txt"), b"first");
    assert!(fx.root.join("mods").is_dir());
    assert_eq!(fx.marker().as_deref(), Some("v1"));
}

#[test]
fn test_changelog_only_version_advances_marker() {
    let fx = three_version_fixture();
    fx.versions("v1\nv2\n");
    ArchiveBuilder::new("Notes only").write(&fx.server, "v2");
    let before = fx.snapshot();

    let report = fx.applier(fx.config()).run().unwrap();

    assert_eq!(report.applied, vec!["v2"]);
    assert_eq!(report.changelogs, vec![Changelog::new("v2", "Notes only")]);
    assert_eq!(fx.marker().as_deref(), Some("v2"));
    let mut after = fx.snapshot();
    after.remove(MARKER);
    let mut expected = before;
    expected.remove(MARKER);
    assert_eq!(after, expected);
}

#[test]
fn test_failover_to_second_server() {
    let fx = three_version_fixture();
    let sources: Vec<Box<dyn ServerSource>> = vec![
        Box::new(DeadSource),
        Box::new(DirSource::new(&fx.server)),
    ];
    let servers = MultipleServers::new(sources).unwrap();

    let report = PatchApplier::new(fx.config(), Box::new(servers), CancelToken::new())
        .run()
        .unwrap();

    assert_eq!(report.applied, vec!["v2", "v3"]);
    assert_eq!(fx.marker().as_deref(), Some("v3"));
}

#[test]
fn test_status_does_not_mutate() {
    let fx = three_version_fixture();
    let before = fx.snapshot();

    let status = fx.applier(fx.config()).status().unwrap();

    assert_eq!(status.current.as_deref(), Some("v1"));
    assert_eq!(status.missing.versions, vec!["v2", "v3"]);
    assert_eq!(status.missing.newest, "v3");
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn test_observer_interrupt_cancels_run() {
    struct Interrupting;
    impl UpdateObserver for Interrupting {
        fn should_interrupt(&self) -> bool {
            true
        }
    }

    let fx = three_version_fixture();
    let before = fx.snapshot();

    let err = fx
        .applier(fx.config())
        .with_observer(Arc::new(Interrupting))
        .run()
        .unwrap_err();

    assert!(err.is_interrupted());
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn test_spawned_worker_applies_updates() {
    let fx = three_version_fixture();
    let handle = patchup::UpdateWorker::spawn(fx.applier(fx.config())).unwrap();

    let report = handle.join().unwrap();
    assert_eq!(report.applied, vec!["v2", "v3"]);
}
