// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! In-memory storage adapter for tests.
//!
//! Buckets are seeded as `(relative path, bytes)` file sets; uploads are
//! captured so tests can assert on what would have left the process.

use crate::{ArtifactStore, StorageError};
use async_trait::async_trait;
use probe_core::TestId;
use probe_workspace::{ScratchWorkspace, WorkspaceLayout};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use walkdir::WalkDir;

type FileSet = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct StoreState {
    buckets: HashMap<String, FileSet>,
    uploads: HashMap<TestId, FileSet>,
    fail_uploads: bool,
}

/// Seeded in-memory bucket store; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or replace) a bucket with the given files.
    pub async fn put_bucket(
        &self,
        bucket: impl Into<String>,
        files: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) {
        let set: FileSet = files.into_iter().collect();
        self.state.lock().await.buckets.insert(bucket.into(), set);
    }

    /// Seed a bucket that satisfies the default layout with one feature file
    /// and the given manifest.
    pub async fn put_standard_bucket(&self, bucket: impl Into<String>, manifest_yaml: &str) {
        self.put_bucket(
            bucket,
            [
                (
                    "features/basic.feature".to_string(),
                    b"Feature: basic\n  Scenario: roundtrip\n".to_vec(),
                ),
                (
                    "topic-directives.yaml".to_string(),
                    manifest_yaml.as_bytes().to_vec(),
                ),
            ],
        )
        .await;
    }

    /// Make subsequent uploads fail (to exercise the non-fatal upload path).
    pub async fn fail_uploads(&self, fail: bool) {
        self.state.lock().await.fail_uploads = fail;
    }

    /// Files captured by the last upload for `test_id`, if any.
    pub async fn uploaded(&self, test_id: TestId) -> Option<BTreeMap<String, Vec<u8>>> {
        self.state.lock().await.uploads.get(&test_id).cloned()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn fetch(
        &self,
        test_id: TestId,
        bucket: &str,
        layout: WorkspaceLayout,
    ) -> Result<ScratchWorkspace, StorageError> {
        let state = self.state.lock().await;
        let files = state
            .buckets
            .get(bucket)
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
            })?
            .clone();
        drop(state);

        let workspace =
            ScratchWorkspace::create(test_id, layout).map_err(StorageError::Layout)?;
        for (relative, bytes) in &files {
            workspace
                .write_file(relative, bytes)
                .map_err(StorageError::Layout)?;
        }
        workspace.validate_layout().map_err(StorageError::Layout)?;
        Ok(workspace)
    }

    async fn upload(
        &self,
        test_id: TestId,
        _bucket: &str,
        evidence_dir: &Path,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.fail_uploads {
            return Err(StorageError::Upload {
                reason: "upload target unavailable".into(),
            });
        }

        let mut captured = FileSet::new();
        if evidence_dir.is_dir() {
            for entry in WalkDir::new(evidence_dir)
                .follow_links(false)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let relative = entry
                    .path()
                    .strip_prefix(evidence_dir)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .to_string();
                let bytes = std::fs::read(entry.path()).map_err(|e| StorageError::Upload {
                    reason: e.to_string(),
                })?;
                captured.insert(relative, bytes);
            }
        }
        state.uploads.insert(test_id, captured);
        Ok(())
    }
}
