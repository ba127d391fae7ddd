// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! probe-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for Test-Probe.
//!
//! If you only take one dependency, take this one.

/// Event envelopes, decoded keys, and credentials.
pub mod envelope;
/// Topic directives and bucket manifest parsing/validation.
pub mod manifest;
/// Scenario result records.
pub mod report;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use envelope::{ConsumedRecord, Credentials, Envelope, EventKey};
pub use manifest::{EventFilter, ManifestError, TopicDirective, TopicManifest, TopicRole};
pub use report::{ScenarioCounts, ScenarioReport};

/// Current contract version string reported by the health endpoint.
///
/// # Examples
///
/// ```
/// assert_eq!(probe_core::CONTRACT_VERSION, "probe/v0.1");
/// ```
pub const CONTRACT_VERSION: &str = "probe/v0.1";

/// Identifier of one test. Stable for the life of the test, never reassigned.
pub type TestId = Uuid;

// ---------------------------------------------------------------------------
// Test lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a test record.
///
/// Transitions follow a fixed DAG; see [`TestState::can_transition_to`].
/// `Completed`, `Exception`, and `Cancelled` are terminal: no further
/// transitions and no further resource use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    /// Record exists; `start` has not been accepted yet.
    Setup,
    /// Accepted; waiting for admission or fetching artifacts/credentials.
    Loading,
    /// Artifacts and credentials fetched.
    Loaded,
    /// Streams up, scenarios executing.
    Testing,
    /// Ran to completion and all scenarios passed.
    Completed,
    /// Failed at any phase, or ran to completion with failures.
    Exception,
    /// Cancelled by user request.
    Cancelled,
}

impl TestState {
    /// Whether this state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Exception | Self::Cancelled)
    }

    /// Whether the lifecycle DAG permits a transition from `self` to `next`.
    ///
    /// Any non-terminal state may transition to `Cancelled`; otherwise
    /// progression is strictly forward:
    /// `Setup → Loading → Loaded → Testing → {Completed, Exception}`.
    /// `Exception` is additionally reachable from every non-terminal state,
    /// since artifact and credential fetch can fail before `Loaded`.
    #[must_use]
    pub fn can_transition_to(&self, next: TestState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, TestState::Cancelled) | (_, TestState::Exception) => true,
            (TestState::Setup, TestState::Loading) => true,
            (TestState::Loading, TestState::Loaded) => true,
            (TestState::Loaded, TestState::Testing) => true,
            (TestState::Testing, TestState::Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Setup => "setup",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Testing => "testing",
            Self::Completed => "completed",
            Self::Exception => "exception",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Status snapshots
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of a single test, as served by `status`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestStatus {
    /// Test identifier.
    pub test_id: TestId,

    /// Current lifecycle state.
    pub state: TestState,

    /// Bucket URI the test was started with (absent before `start`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Optional test-type tag passed through to the scenario runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,

    /// When the test was accepted for execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the test reached a terminal state. Set iff state is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Whether all scenarios passed. Present only once a result exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// Terminal error description, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Scenario result summary, if the runtime produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScenarioReport>,
}

/// Per-state record counts plus the ids currently in `Testing`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Records in `Setup`.
    pub setup: usize,
    /// Records in `Loading`.
    pub loading: usize,
    /// Records in `Loaded`.
    pub loaded: usize,
    /// Records in `Testing`.
    pub testing: usize,
    /// Records in `Completed`.
    pub completed: usize,
    /// Records in `Exception`.
    pub exception: usize,
    /// Records in `Cancelled`.
    pub cancelled: usize,

    /// All ids currently in `Testing` (empty when none).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub currently_testing: Vec<TestId>,

    /// Record summary for the id the caller asked about, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<TestStatus>,
}

impl QueueStatus {
    /// Total number of known records.
    #[must_use]
    pub fn total(&self) -> usize {
        self.setup
            + self.loading
            + self.loaded
            + self.testing
            + self.completed
            + self.exception
            + self.cancelled
    }

    /// Number of records occupying (or eligible for) an admission slot:
    /// non-terminal and past `Setup`.
    #[must_use]
    pub fn active(&self) -> usize {
        self.loading + self.loaded + self.testing
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
