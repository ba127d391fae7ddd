// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Local-filesystem storage adapter.
//!
//! A bucket is a directory: either a `file://` URI, an absolute path, or a
//! path relative to the configured root. Evidence uploads land under
//! `<bucket>/evidence/<test-id>/`.

use crate::{ArtifactStore, StorageError};
use async_trait::async_trait;
use probe_core::TestId;
use probe_workspace::{ScratchWorkspace, WorkspaceLayout, copy_tree};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// Directory-backed bucket store.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    root: Option<PathBuf>,
}

impl LocalStore {
    /// A store resolving relative buckets under `root`.
    #[must_use]
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        let path = if let Ok(url) = Url::parse(bucket) {
            if url.scheme() == "file" {
                url.to_file_path().map_err(|()| StorageError::Fetch {
                    reason: format!("bucket URI has no file path: {bucket}"),
                })?
            } else if url.scheme().len() > 1 {
                return Err(StorageError::Fetch {
                    reason: format!("unsupported bucket scheme '{}'", url.scheme()),
                });
            } else {
                // Single-letter schemes are Windows drive prefixes, treat as
                // a plain path.
                PathBuf::from(bucket)
            }
        } else {
            PathBuf::from(bucket)
        };

        if path.is_absolute() {
            return Ok(path);
        }
        match &self.root {
            Some(root) => Ok(root.join(path)),
            None => Ok(path),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn fetch(
        &self,
        test_id: TestId,
        bucket: &str,
        layout: WorkspaceLayout,
    ) -> Result<ScratchWorkspace, StorageError> {
        let source = self.resolve(bucket)?;
        if !source.is_dir() {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
            });
        }

        let workspace =
            ScratchWorkspace::create(test_id, layout).map_err(StorageError::Layout)?;

        debug!(
            target: "probe.storage",
            test_id = %test_id,
            bucket,
            source = %source.display(),
            "fetching bucket"
        );

        let dest = workspace.root().to_path_buf();
        let copy_source = source.clone();
        tokio::task::spawn_blocking(move || copy_tree(&copy_source, &dest))
            .await
            .map_err(|e| StorageError::Fetch {
                reason: format!("copy task failed: {e}"),
            })?
            .map_err(StorageError::Layout)?;

        // The workspace (and with it the scratch root) is dropped on the
        // error path, so a failed fetch leaves nothing behind.
        workspace.validate_layout().map_err(StorageError::Layout)?;

        info!(target: "probe.storage", test_id = %test_id, bucket, "bucket fetched");
        Ok(workspace)
    }

    async fn upload(
        &self,
        test_id: TestId,
        bucket: &str,
        evidence_dir: &Path,
    ) -> Result<(), StorageError> {
        let target = self.resolve(bucket)?.join("evidence").join(test_id.to_string());
        if !evidence_dir.is_dir() {
            // Nothing to upload; uploads are idempotent and empty evidence
            // is legal on the cancel path.
            debug!(target: "probe.storage", test_id = %test_id, "no evidence directory, skipping upload");
            return Ok(());
        }

        let source = evidence_dir.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(|e| StorageError::Upload {
                reason: format!("upload task failed: {e}"),
            })?
            .map_err(|e| StorageError::Upload {
                reason: e.to_string(),
            })?;

        info!(target: "probe.storage", test_id = %test_id, bucket, "evidence uploaded");
        Ok(())
    }
}
