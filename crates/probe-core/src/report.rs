// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Scenario result records.
//!
//! The scenario runtime writes its result as `evidence/report.json`; this
//! module is the canonical shape of that file and of the summary attached
//! to a terminal test record.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Passed/failed/skipped counts for scenarios or steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScenarioCounts {
    /// Total number seen.
    pub total: u32,
    /// Number that passed.
    pub passed: u32,
    /// Number that failed.
    pub failed: u32,
    /// Number that were skipped.
    pub skipped: u32,
}

/// The result record produced by one scenario-runtime invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScenarioReport {
    /// Per-scenario counts.
    pub scenarios: ScenarioCounts,
    /// Per-step counts.
    pub steps: ScenarioCounts,
    /// Whether the whole run passed (no failed scenarios).
    pub passed: bool,
    /// Error description when the run failed or aborted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioReport {
    /// A report for a run where every scenario passed.
    #[must_use]
    pub fn passing(scenarios: u32, steps: u32) -> Self {
        Self {
            scenarios: ScenarioCounts {
                total: scenarios,
                passed: scenarios,
                failed: 0,
                skipped: 0,
            },
            steps: ScenarioCounts {
                total: steps,
                passed: steps,
                failed: 0,
                skipped: 0,
            },
            passed: true,
            error: None,
        }
    }

    /// A report for a run with failures.
    #[must_use]
    pub fn failing(scenarios: u32, failed: u32, error: impl Into<String>) -> Self {
        Self {
            scenarios: ScenarioCounts {
                total: scenarios,
                passed: scenarios.saturating_sub(failed),
                failed,
                skipped: 0,
            },
            steps: ScenarioCounts::default(),
            passed: false,
            error: Some(error.into()),
        }
    }
}
