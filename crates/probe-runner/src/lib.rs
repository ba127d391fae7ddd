// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scenario runtime port.
//!
//! The behavior-driven runner itself is an external routine: from the
//! execution's viewpoint it is a blocking call that takes a prepared
//! workspace plus the test's stream handles and returns a result record.
//! The execution runs it on the blocking worker pool and pipes the result
//! back to itself as a message.
//!
//! Three adapters ship here: an external-process runner (production), a
//! no-op runner (dry runs), and a scripted runner (tests).

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// External-process adapter.
pub mod process;
/// Scripted adapter for tests.
pub mod scripted;

pub use process::ProcessRunner;
pub use scripted::ScriptedRuntime;

use probe_core::{ScenarioReport, TestId};
use probe_streams::StreamSet;
use std::path::PathBuf;

/// File name of the machine-readable scenario result inside `evidence/`.
pub const REPORT_FILE: &str = "report.json";

/// Errors raised by a scenario runtime invocation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The runner could not be launched at all.
    #[error("scenario runner launch failed: {reason}")]
    Launch {
        /// Human-readable failure detail.
        reason: String,
    },

    /// The runner started but aborted without producing a result.
    #[error("scenario runtime failed: {reason}")]
    Failed {
        /// Human-readable failure detail.
        reason: String,
    },

    /// The result record is missing or unreadable.
    #[error("scenario report unreadable: {reason}")]
    Report {
        /// Human-readable failure detail.
        reason: String,
    },
}

/// Everything a scenario run needs from the execution.
#[derive(Clone)]
pub struct ScenarioContext {
    /// Test this run belongs to.
    pub test_id: TestId,
    /// Workspace root.
    pub workspace_root: PathBuf,
    /// Directory of discovered feature files.
    pub features_dir: PathBuf,
    /// Directory the runtime writes evidence into (already created).
    pub evidence_dir: PathBuf,
    /// Optional test-type tag from `start`.
    pub test_type: Option<String>,
    /// Producer/consumer handles for the test's topics.
    pub streams: StreamSet,
}

/// A discovered scenario set executed against a workspace.
///
/// Implementations block; callers are responsible for dispatching onto the
/// blocking worker pool.
pub trait ScenarioRuntime: Send + Sync {
    /// Run all scenarios and return the result record.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] when the runtime cannot start, aborts, or
    /// produces no readable report. A run that completes with failing
    /// scenarios is *not* an error; it returns a report with
    /// `passed = false`.
    fn run(&self, ctx: &ScenarioContext) -> Result<ScenarioReport, RunnerError>;
}

/// Runner that executes nothing and reports one passed scenario.
///
/// Selected when no runner command is configured; useful for wiring checks
/// and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunner;

impl ScenarioRuntime for NoopRunner {
    fn run(&self, ctx: &ScenarioContext) -> Result<ScenarioReport, RunnerError> {
        let report = ScenarioReport::passing(1, 1);
        write_report(&ctx.evidence_dir, &report)?;
        Ok(report)
    }
}

/// Serialize a report into `evidence/report.json`.
///
/// # Errors
///
/// Returns [`RunnerError::Report`] when the file cannot be written.
pub fn write_report(evidence_dir: &std::path::Path, report: &ScenarioReport) -> Result<(), RunnerError> {
    let path = evidence_dir.join(REPORT_FILE);
    let bytes = serde_json::to_vec_pretty(report).map_err(|e| RunnerError::Report {
        reason: e.to_string(),
    })?;
    std::fs::write(&path, bytes).map_err(|e| RunnerError::Report {
        reason: format!("cannot write {}: {e}", path.display()),
    })
}

/// Read the report the runner left in `evidence/report.json`.
///
/// # Errors
///
/// Returns [`RunnerError::Report`] when the file is absent or malformed.
pub fn read_report(evidence_dir: &std::path::Path) -> Result<ScenarioReport, RunnerError> {
    let path = evidence_dir.join(REPORT_FILE);
    let bytes = std::fs::read(&path).map_err(|e| RunnerError::Report {
        reason: format!("cannot read {}: {e}", path.display()),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| RunnerError::Report {
        reason: format!("report does not parse: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_streams::StreamSet;
    use uuid::Uuid;

    fn context(evidence: &std::path::Path) -> ScenarioContext {
        ScenarioContext {
            test_id: Uuid::new_v4(),
            workspace_root: evidence.parent().unwrap().to_path_buf(),
            features_dir: evidence.parent().unwrap().join("features"),
            evidence_dir: evidence.to_path_buf(),
            test_type: None,
            streams: StreamSet::new(),
        }
    }

    #[test]
    fn noop_runner_writes_a_passing_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = NoopRunner.run(&context(dir.path())).unwrap();
        assert!(report.passed);
        let back = read_report(dir.path()).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn read_report_missing_file_is_report_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_report(dir.path()).unwrap_err();
        assert!(matches!(err, RunnerError::Report { .. }));
    }

    #[test]
    fn read_report_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REPORT_FILE), b"not json").unwrap();
        let err = read_report(dir.path()).unwrap_err();
        assert!(matches!(err, RunnerError::Report { .. }));
    }
}
