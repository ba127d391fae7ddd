// SPDX-License-Identifier: MIT OR Apache-2.0
//! Artifact storage port: fetch a bucket into a scratch workspace, upload an
//! evidence tree back.
//!
//! Cloud blob adapters plug in behind [`ArtifactStore`]; in-repo adapters
//! cover the local filesystem and an in-memory store for tests. A successful
//! `fetch` guarantees the workspace layout (non-empty features directory,
//! manifest present); on any failure the scratch root is gone by the time
//! the error is returned.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Local-filesystem adapter.
pub mod local;
/// In-memory adapter for tests.
pub mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use probe_core::TestId;
use probe_workspace::{ScratchWorkspace, WorkspaceError, WorkspaceLayout};
use std::path::Path;

/// Errors raised by storage adapters.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The bucket does not exist or is not reachable.
    #[error("bucket not found: {bucket}")]
    NotFound {
        /// Bucket URI as given.
        bucket: String,
    },

    /// The bucket was reachable but could not be fetched.
    #[error("bucket fetch failed: {reason}")]
    Fetch {
        /// Human-readable failure detail.
        reason: String,
    },

    /// The fetched content does not satisfy the workspace layout.
    #[error(transparent)]
    Layout(#[from] WorkspaceError),

    /// Evidence upload failed.
    #[error("evidence upload failed: {reason}")]
    Upload {
        /// Human-readable failure detail.
        reason: String,
    },
}

/// Fetches buckets and uploads evidence.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch `bucket` into a fresh scratch workspace for `test_id`.
    ///
    /// The returned workspace satisfies [`ScratchWorkspace::validate_layout`].
    ///
    /// # Errors
    ///
    /// On any error the scratch root has already been removed. Layout
    /// violations surface as [`StorageError::Layout`].
    async fn fetch(
        &self,
        test_id: TestId,
        bucket: &str,
        layout: WorkspaceLayout,
    ) -> Result<ScratchWorkspace, StorageError>;

    /// Upload the evidence tree for `test_id` back to `bucket`.
    ///
    /// Idempotent: retrying a completed upload must succeed and leave the
    /// same result.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Upload`] on failure; callers treat this as
    /// non-fatal to the test result.
    async fn upload(
        &self,
        test_id: TestId,
        bucket: &str,
        evidence_dir: &Path,
    ) -> Result<(), StorageError>;
}
