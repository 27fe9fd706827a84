//! Progress notification DTOs
//!
//! One [`ProgressEvent`] is pushed to the grading API per pipeline event,
//! strictly in the order the events occur.

use serde::{Deserialize, Serialize};

use crate::domain::result::TestStatus;

/// A progress event, serialized as `{"type": "<EVENT>", ...fields}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ProgressEvent {
    Preparing,
    Install,
    InstallOk,
    InstallLog {
        msg: String,
    },
    Ready,
    ReadyOk,
    ReadyTimeout,
    BeforeStart,
    Start {
        total_tests: usize,
    },
    TestResult {
        name: String,
        result: TestStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_error_message: Option<String>,
    },
    End {
        passed: bool,
    },
    OperationError {
        msg: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        refer_id: String,
    },
    Error {
        refer_id: String,
    },
}

impl ProgressEvent {
    /// Wire name of the event, e.g. `INSTALL_OK`
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Preparing => "PREPARING",
            ProgressEvent::Install => "INSTALL",
            ProgressEvent::InstallOk => "INSTALL_OK",
            ProgressEvent::InstallLog { .. } => "INSTALL_LOG",
            ProgressEvent::Ready => "READY",
            ProgressEvent::ReadyOk => "READY_OK",
            ProgressEvent::ReadyTimeout => "READY_TIMEOUT",
            ProgressEvent::BeforeStart => "BEFORE_START",
            ProgressEvent::Start { .. } => "START",
            ProgressEvent::TestResult { .. } => "TEST_RESULT",
            ProgressEvent::End { .. } => "END",
            ProgressEvent::OperationError { .. } => "OPERATION_ERROR",
            ProgressEvent::Error { .. } => "ERROR",
        }
    }
}
