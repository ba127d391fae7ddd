// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Test records, owned exclusively by the scheduler actor.

use chrono::{DateTime, Utc};
use probe_core::{ScenarioReport, TestId, TestState, TestStatus};
use tracing::error;

/// Everything the scheduler knows about one test.
#[derive(Debug, Clone)]
pub(crate) struct TestRecord {
    pub state: TestState,
    pub bucket: Option<String>,
    pub test_type: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<ScenarioReport>,
    pub error: Option<String>,
}

impl TestRecord {
    /// Fresh record in `Setup`.
    pub fn new() -> Self {
        Self {
            state: TestState::Setup,
            bucket: None,
            test_type: None,
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
        }
    }

    /// Apply a state transition, enforcing the lifecycle DAG.
    ///
    /// Returns `false` (and logs) when the DAG forbids the edge; the record
    /// is left untouched. Terminal transitions stamp `ended_at`.
    pub fn transition(&mut self, test_id: TestId, next: TestState) -> bool {
        if !self.state.can_transition_to(next) {
            error!(
                target: "probe.scheduler",
                test_id = %test_id,
                from = %self.state,
                to = %next,
                "illegal state transition refused"
            );
            return false;
        }
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        true
    }

    /// Append an error message (keeps an earlier one, separated).
    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        match &mut self.error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(&message);
            }
            None => self.error = Some(message),
        }
    }

    /// Point-in-time snapshot served by `status`.
    pub fn snapshot(&self, test_id: TestId) -> TestStatus {
        TestStatus {
            test_id,
            state: self.state,
            bucket: self.bucket.clone(),
            test_type: self.test_type.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            success: self.result.as_ref().map(|r| r.passed),
            error: self.error.clone(),
            result: self.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_setup() {
        let record = TestRecord::new();
        assert_eq!(record.state, TestState::Setup);
        assert!(record.ended_at.is_none());
    }

    #[test]
    fn legal_transition_applies() {
        let mut record = TestRecord::new();
        assert!(record.transition(TestId::new_v4(), TestState::Loading));
        assert_eq!(record.state, TestState::Loading);
        assert!(record.ended_at.is_none());
    }

    #[test]
    fn illegal_transition_is_refused() {
        let mut record = TestRecord::new();
        assert!(!record.transition(TestId::new_v4(), TestState::Testing));
        assert_eq!(record.state, TestState::Setup);
    }

    #[test]
    fn terminal_transition_stamps_ended_at() {
        let mut record = TestRecord::new();
        let id = TestId::new_v4();
        record.transition(id, TestState::Loading);
        record.transition(id, TestState::Cancelled);
        assert!(record.ended_at.is_some());
    }

    #[test]
    fn terminal_records_refuse_everything() {
        let mut record = TestRecord::new();
        let id = TestId::new_v4();
        record.transition(id, TestState::Loading);
        record.transition(id, TestState::Exception);
        let stamped = record.ended_at;
        assert!(!record.transition(id, TestState::Cancelled));
        assert!(!record.transition(id, TestState::Loaded));
        assert_eq!(record.ended_at, stamped, "ended_at must not move");
    }

    #[test]
    fn push_error_concatenates() {
        let mut record = TestRecord::new();
        record.push_error("first");
        record.push_error("second");
        assert_eq!(record.error.as_deref(), Some("first; second"));
    }

    #[test]
    fn snapshot_reflects_result() {
        let mut record = TestRecord::new();
        record.result = Some(ScenarioReport::passing(1, 2));
        let status = record.snapshot(TestId::new_v4());
        assert_eq!(status.success, Some(true));
        assert!(status.result.is_some());
    }
}
