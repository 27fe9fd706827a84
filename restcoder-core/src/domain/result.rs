//! Result domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overall verdict of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestOutcome {
    Pass,
    Fail,
    Error,
}

/// State of a single test as reported by the test runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Pending,
    Pass,
    Fail,
}

/// Result of one named test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultEntry {
    pub name: String,
    pub result: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TestResultEntry {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: TestStatus::Pending,
            user_error_message: None,
            finished_at: None,
        }
    }

    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: TestStatus::Pass,
            user_error_message: None,
            finished_at: Some(chrono::Utc::now()),
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: TestStatus::Fail,
            user_error_message: Some(message.into()),
            finished_at: Some(chrono::Utc::now()),
        }
    }
}

/// Summary of a whole test suite run
///
/// Serialized as `{"passed": bool, "<test name>": {...}, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitTestResult {
    pub passed: bool,
    #[serde(flatten)]
    pub tests: BTreeMap<String, TestResultEntry>,
}

/// Final record of a pipeline run, submitted to the grading API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub result: TestOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_log_url: Option<String>,
    pub unit_test_result: Option<UnitTestResult>,
}

impl PipelineResult {
    /// Verdict derived from a completed test suite
    pub fn from_tests(unit_test_result: UnitTestResult) -> Self {
        let result = if unit_test_result.passed {
            TestOutcome::Pass
        } else {
            TestOutcome::Fail
        };
        Self {
            result,
            error_message: None,
            test_log_url: None,
            unit_test_result: Some(unit_test_result),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result: TestOutcome::Fail,
            error_message: Some(message.into()),
            test_log_url: None,
            unit_test_result: None,
        }
    }

    pub fn error(message: Option<String>) -> Self {
        Self {
            result: TestOutcome::Error,
            error_message: message,
            test_log_url: None,
            unit_test_result: None,
        }
    }

    pub fn with_log_url(mut self, url: Option<String>) -> Self {
        self.test_log_url = url;
        self
    }
}
