//! Path safety for archive metadata.
//!
//! Two rules apply before any file is touched:
//! - every metadata path must stay inside the update root, and
//! - the running executable and the active log file are never moved,
//!   deleted, or rewritten.

use std::path::{Component, Path, PathBuf};

use crate::archive::PatchMetadata;
use crate::error::{UpdateError, UpdateResult};

/// Resolve `.` and `..` without touching the filesystem.
///
/// A `..` at the root of an absolute path is dropped; on a relative path it
/// is kept.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join a metadata path onto `root`, rejecting anything that escapes it.
pub fn resolve_relative(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let mut depth = 0usize;

    for component in relative.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1)?,
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if depth == 0 {
        return None;
    }
    Some(root.join(lexical_normalize(relative)))
}

/// Reject metadata whose paths are absolute or escape the update root.
pub fn validate_paths(version: &str, root: &Path, metadata: &PatchMetadata) -> UpdateResult<()> {
    match metadata
        .all_paths()
        .find(|p| resolve_relative(root, p).is_none())
    {
        Some(path) => Err(UpdateError::UnsafePath {
            version: version.to_string(),
            path: path.to_string(),
        }),
        None => Ok(()),
    }
}

/// Files the updater must never touch.
#[derive(Debug, Clone, Default)]
pub struct ProtectedPaths {
    paths: Vec<PathBuf>,
}

impl ProtectedPaths {
    /// Protect the given absolute or working-directory-relative paths.
    pub fn new<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(|p| comparable(&p)).collect(),
        }
    }

    /// Protect the running executable and, if given, the log file.
    pub fn for_current_process(log_file: Option<&Path>) -> Self {
        let exe = std::env::current_exe().ok();
        Self::new(exe.into_iter().chain(log_file.map(Path::to_path_buf)))
    }

    /// Add another protected path.
    pub fn with(mut self, path: &Path) -> Self {
        self.paths.push(comparable(path));
        self
    }

    /// Whether `relative` under `root` names a protected file or a folder
    /// containing one.
    pub fn is_protected(&self, root: &Path, relative: &str) -> bool {
        if self.paths.is_empty() {
            return false;
        }
        let candidate = comparable(&root.join(relative));
        self.paths.iter().any(|p| p.starts_with(&candidate))
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Absolute, normalized form of `path` with its parent directory resolved
/// through symlinks when it exists.
fn comparable(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let normalized = lexical_normalize(&absolute);

    match (normalized.parent(), normalized.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => normalized,
        },
        _ => normalized,
    }
}
