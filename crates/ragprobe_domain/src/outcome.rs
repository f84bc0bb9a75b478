use chrono::{DateTime, Utc};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single comprehensive test run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TestExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
    Skipped,
}

/// Common envelope shared by every comprehensive test result.
///
/// The comprehensive entry points never return an error: connectivity and
/// aggregation failures are normalised into an outcome with
/// `status == Failed` and the message stored in `error`.
#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into, strip_option)]
pub struct TestOutcome {
    pub test_id: String,
    pub test_name: String,
    pub category: String,
    pub status: TestExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl TestOutcome {
    /// Starts a new outcome envelope in the `Running` state.
    pub fn started(
        test_id: impl Into<String>,
        test_name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            test_id: test_id.into(),
            test_name: test_name.into(),
            category: category.into(),
            status: TestExecutionStatus::Running,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            success: false,
            error: None,
        }
    }

    /// Closes the envelope with a pass/fail verdict.
    pub fn finish(mut self, success: bool) -> Self {
        self.finished_at = Utc::now();
        self.duration_ms = self.elapsed_ms();
        self.success = success;
        self.status = if success {
            TestExecutionStatus::Completed
        } else {
            TestExecutionStatus::Failed
        };
        self
    }

    /// Closes the envelope as failed, recording the error message.
    pub fn fail(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self.finish(false)
    }

    fn elapsed_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_status_serialization() {
        let actual = serde_json::to_string(&TestExecutionStatus::Completed).unwrap();
        assert_eq!(actual, "\"COMPLETED\"");

        let actual: TestExecutionStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(actual, TestExecutionStatus::Failed);
    }

    #[test]
    fn test_outcome_finish_success() {
        let fixture = TestOutcome::started("t-001", "sample", "vector-search");
        let actual = fixture.finish(true);

        assert_eq!(actual.status, TestExecutionStatus::Completed);
        assert_eq!(actual.success, true);
        assert_eq!(actual.error, None);
        assert!(actual.finished_at >= actual.started_at);
    }

    #[test]
    fn test_outcome_fail_records_error() {
        let fixture = TestOutcome::started("t-002", "sample", "vector-search");
        let actual = fixture.fail("backend unreachable");

        assert_eq!(actual.status, TestExecutionStatus::Failed);
        assert_eq!(actual.success, false);
        assert_eq!(actual.error, Some("backend unreachable".to_string()));
    }
}
