// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! probe-workspace
#![deny(unsafe_code)]
//!
//! Scratch filesystem utilities.
//!
//! Two rules matter:
//! - one workspace per test, exclusively owned by that test's execution;
//! - the backing directory is removed on every exit path (drop-based).

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

/// Errors raised by scratch-workspace operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// The backing temp directory could not be created.
    #[error("failed to create scratch root: {0}")]
    Create(#[source] std::io::Error),

    /// A read/write/copy inside the workspace failed.
    #[error("workspace io error at {path}: {source}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The fetched bucket does not satisfy the required layout.
    #[error("workspace layout invalid: {}", issues.join("; "))]
    Layout {
        /// Individual layout violations.
        issues: Vec<String>,
    },
}

/// Relative paths a bucket must populate inside the workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    /// Feature-file directory, relative to the root.
    pub features_path: String,
    /// Topic-directive manifest, relative to the root.
    pub manifest_path: String,
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self {
            features_path: "features".into(),
            manifest_path: "topic-directives.yaml".into(),
        }
    }
}

/// Name of the directory the scenario runtime writes evidence into.
pub const EVIDENCE_DIR: &str = "evidence";

/// A per-test scratch root, removed when this value is dropped.
///
/// The workspace is created empty; the storage port populates it, the
/// execution validates it, and the scenario runtime writes `evidence/`.
#[derive(Debug)]
pub struct ScratchWorkspace {
    test_id: Uuid,
    layout: WorkspaceLayout,
    root: PathBuf,
    _temp: TempDir,
}

impl ScratchWorkspace {
    /// Create a fresh scratch root for `test_id`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Create`] when the temp directory cannot be
    /// made.
    pub fn create(test_id: Uuid, layout: WorkspaceLayout) -> Result<Self, WorkspaceError> {
        let temp = tempfile::Builder::new()
            .prefix(&format!("probe-{test_id}-"))
            .tempdir()
            .map_err(WorkspaceError::Create)?;
        let root = temp.path().to_path_buf();
        debug!(target: "probe.workspace", test_id = %test_id, root = %root.display(), "scratch root created");
        Ok(Self {
            test_id,
            layout,
            root,
            _temp: temp,
        })
    }

    /// The test this workspace belongs to.
    #[must_use]
    pub fn test_id(&self) -> Uuid {
        self.test_id
    }

    /// Root path of the workspace.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The feature-file directory.
    #[must_use]
    pub fn features_dir(&self) -> PathBuf {
        self.root.join(&self.layout.features_path)
    }

    /// The topic-directive manifest path.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.layout.manifest_path)
    }

    /// The evidence directory (`evidence/` under the root).
    #[must_use]
    pub fn evidence_dir(&self) -> PathBuf {
        self.root.join(EVIDENCE_DIR)
    }

    /// Create the evidence directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] when creation fails.
    pub fn ensure_evidence_dir(&self) -> Result<PathBuf, WorkspaceError> {
        let dir = self.evidence_dir();
        fs::create_dir_all(&dir).map_err(|e| WorkspaceError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    /// Write a file under the root, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] on any filesystem failure.
    pub fn write_file(&self, relative: &str, bytes: &[u8]) -> Result<(), WorkspaceError> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| WorkspaceError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(&path, bytes).map_err(|e| WorkspaceError::Io { path, source: e })
    }

    /// Read a file under the root.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] when the file cannot be read.
    pub fn read_file(&self, relative: &str) -> Result<Vec<u8>, WorkspaceError> {
        let path = self.root.join(relative);
        fs::read(&path).map_err(|e| WorkspaceError::Io { path, source: e })
    }

    /// List the feature files currently present (regular files under the
    /// features directory, any depth).
    #[must_use]
    pub fn list_features(&self) -> Vec<PathBuf> {
        let dir = self.features_dir();
        if !dir.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    /// Check the invariants a fetched bucket must satisfy: the features
    /// directory exists and is non-empty, and the manifest file exists.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Layout`] listing every violation.
    pub fn validate_layout(&self) -> Result<(), WorkspaceError> {
        let mut issues = Vec::new();

        let features = self.features_dir();
        if !features.is_dir() {
            issues.push(format!(
                "features directory missing: {}",
                self.layout.features_path
            ));
        } else if self.list_features().is_empty() {
            issues.push(format!(
                "features directory is empty: {}",
                self.layout.features_path
            ));
        }

        if !self.manifest_path().is_file() {
            issues.push(format!("manifest missing: {}", self.layout.manifest_path));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(WorkspaceError::Layout { issues })
        }
    }

    /// Read the manifest file as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] when the manifest cannot be read or is
    /// not UTF-8.
    pub fn read_manifest(&self) -> Result<String, WorkspaceError> {
        let path = self.manifest_path();
        fs::read_to_string(&path).map_err(|e| WorkspaceError::Io { path, source: e })
    }
}

/// Copy a directory tree into `dest_root`, creating directories as needed.
///
/// Symlinks are not followed. Used by storage adapters to materialise a
/// bucket into a workspace and to upload an evidence tree back out.
///
/// # Errors
///
/// Returns [`WorkspaceError::Io`] on the first filesystem failure.
pub fn copy_tree(src_root: &Path, dest_root: &Path) -> Result<(), WorkspaceError> {
    debug!(target: "probe.workspace", "copying tree from {} to {}", src_root.display(), dest_root.display());

    for entry in WalkDir::new(src_root).follow_links(false) {
        let entry = entry.map_err(|e| WorkspaceError::Io {
            path: src_root.to_path_buf(),
            source: e.into(),
        })?;
        let path = entry.path();

        let rel = path.strip_prefix(src_root).unwrap_or(path);
        if rel.as_os_str().is_empty() {
            continue;
        }

        let dest_path = dest_root.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| WorkspaceError::Io {
                path: dest_path.clone(),
                source: e,
            })?;
            continue;
        }

        if entry.file_type().is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent).map_err(|e| WorkspaceError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            fs::copy(path, &dest_path).map_err(|e| WorkspaceError::Io {
                path: dest_path.clone(),
                source: e,
            })?;
        }
    }

    Ok(())
}
