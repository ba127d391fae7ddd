// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Scripted scenario runner for tests.
//!
//! Wraps a closure so integration tests can produce events, fetch from
//! consumer registries, block to simulate long runs, or fail on demand,
//! all without an external process.

use crate::{RunnerError, ScenarioContext, ScenarioRuntime, write_report};
use probe_core::ScenarioReport;
use std::sync::Arc;

type Script =
    dyn Fn(&ScenarioContext) -> Result<ScenarioReport, RunnerError> + Send + Sync + 'static;

/// Closure-backed runtime.
#[derive(Clone)]
pub struct ScriptedRuntime {
    script: Arc<Script>,
}

impl ScriptedRuntime {
    /// Runtime that runs `script` for every invocation.
    pub fn new(
        script: impl Fn(&ScenarioContext) -> Result<ScenarioReport, RunnerError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            script: Arc::new(script),
        }
    }

    /// Runtime that immediately reports `scenarios` passed scenarios and
    /// writes the report file.
    #[must_use]
    pub fn passing(scenarios: u32) -> Self {
        Self::new(move |ctx| {
            let report = ScenarioReport::passing(scenarios, scenarios * 3);
            write_report(&ctx.evidence_dir, &report)?;
            Ok(report)
        })
    }

    /// Runtime whose scenarios fail.
    #[must_use]
    pub fn failing(error: &str) -> Self {
        let error = error.to_string();
        Self::new(move |ctx| {
            let report = ScenarioReport::failing(1, 1, error.clone());
            write_report(&ctx.evidence_dir, &report)?;
            Ok(report)
        })
    }

    /// Runtime that aborts without a result.
    #[must_use]
    pub fn aborting(reason: &str) -> Self {
        let reason = reason.to_string();
        Self::new(move |_| {
            Err(RunnerError::Failed {
                reason: reason.clone(),
            })
        })
    }
}

impl ScenarioRuntime for ScriptedRuntime {
    fn run(&self, ctx: &ScenarioContext) -> Result<ScenarioReport, RunnerError> {
        (self.script)(ctx)
    }
}
