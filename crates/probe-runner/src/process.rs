// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! External-process scenario runner.
//!
//! Spawns the configured command against the workspace and waits for it to
//! exit. The contract with the child is environment-based:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `PROBE_TEST_ID` | Test id |
//! | `PROBE_WORKSPACE` | Workspace root |
//! | `PROBE_FEATURES_DIR` | Feature files |
//! | `PROBE_EVIDENCE_DIR` | Where to write evidence |
//! | `PROBE_TEST_TYPE` | Optional test-type tag |
//!
//! The child writes `evidence/report.json`; a present report wins over the
//! exit code (a failing scenario set exits non-zero *and* reports), a
//! missing report is a runtime failure.

use crate::{RunnerError, ScenarioContext, ScenarioRuntime, read_report};
use probe_core::ScenarioReport;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Spawns an external runner command per scenario run.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: String,
    args: Vec<String>,
}

impl ProcessRunner {
    /// Runner invoking `command` with `args`.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl ScenarioRuntime for ProcessRunner {
    fn run(&self, ctx: &ScenarioContext) -> Result<ScenarioReport, RunnerError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&ctx.workspace_root)
            .env("PROBE_TEST_ID", ctx.test_id.to_string())
            .env("PROBE_WORKSPACE", &ctx.workspace_root)
            .env("PROBE_FEATURES_DIR", &ctx.features_dir)
            .env("PROBE_EVIDENCE_DIR", &ctx.evidence_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(test_type) = &ctx.test_type {
            cmd.env("PROBE_TEST_TYPE", test_type);
        }

        debug!(
            target: "probe.runner",
            test_id = %ctx.test_id,
            command = %self.command,
            "launching scenario runner"
        );

        let output = cmd.output().map_err(|e| RunnerError::Launch {
            reason: format!("cannot spawn '{}': {e}", self.command),
        })?;

        info!(
            target: "probe.runner",
            test_id = %ctx.test_id,
            status = ?output.status.code(),
            "scenario runner exited"
        );

        match read_report(&ctx.evidence_dir) {
            Ok(report) => Ok(report),
            Err(report_err) => {
                if output.status.success() {
                    // Exited clean but left nothing to read.
                    Err(report_err)
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(RunnerError::Failed {
                        reason: format!(
                            "runner exited with {:?}: {}",
                            output.status.code(),
                            stderr.trim()
                        ),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_streams::StreamSet;
    use uuid::Uuid;

    fn context(root: &std::path::Path) -> ScenarioContext {
        let evidence = root.join("evidence");
        std::fs::create_dir_all(&evidence).unwrap();
        ScenarioContext {
            test_id: Uuid::new_v4(),
            workspace_root: root.to_path_buf(),
            features_dir: root.join("features"),
            evidence_dir: evidence,
            test_type: Some("integration".into()),
            streams: StreamSet::new(),
        }
    }

    #[test]
    fn runner_report_wins_over_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        // A runner that writes a failing report and exits non-zero.
        let runner = ProcessRunner::new(
            "sh",
            vec![
                "-c".into(),
                r#"echo '{"scenarios":{"total":2,"passed":1,"failed":1,"skipped":0},"steps":{"total":5,"passed":4,"failed":1,"skipped":0},"passed":false,"error":"1 scenario failed"}' > "$PROBE_EVIDENCE_DIR/report.json"; exit 1"#.into(),
            ],
        );
        let report = runner.run(&ctx).unwrap();
        assert!(!report.passed);
        assert_eq!(report.scenarios.failed, 1);
    }

    #[test]
    fn clean_exit_without_report_is_report_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = ProcessRunner::new("true", vec![]);
        let err = runner.run(&ctx).unwrap_err();
        assert!(matches!(err, RunnerError::Report { .. }));
    }

    #[test]
    fn dirty_exit_without_report_is_runtime_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = ProcessRunner::new("sh", vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        let err = runner.run(&ctx).unwrap_err();
        match err {
            RunnerError::Failed { reason } => assert!(reason.contains("boom")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = ProcessRunner::new("/nonexistent/probe-bdd-runner", vec![]);
        let err = runner.run(&ctx).unwrap_err();
        assert!(matches!(err, RunnerError::Launch { .. }));
    }

    #[test]
    fn environment_contract_reaches_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        // The child proves it saw the env by writing the report where
        // PROBE_EVIDENCE_DIR points.
        let runner = ProcessRunner::new(
            "sh",
            vec![
                "-c".into(),
                r#"test -n "$PROBE_TEST_ID" && test "$PROBE_TEST_TYPE" = integration && echo '{"scenarios":{"total":1,"passed":1,"failed":0,"skipped":0},"steps":{"total":1,"passed":1,"failed":0,"skipped":0},"passed":true}' > "$PROBE_EVIDENCE_DIR/report.json""#.into(),
            ],
        );
        let report = runner.run(&ctx).unwrap();
        assert!(report.passed);
    }
}
