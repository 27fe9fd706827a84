//! Pipeline error taxonomy
//!
//! - [`PipelineError::Validation`]: malformed job input, nothing provisioned
//! - [`PipelineError::Operation`]: a named step failed; reported to the
//!   candidate with references to the captured logs
//! - [`PipelineError::TestRunner`] / [`PipelineError::Internal`]: anything
//!   else; reported generically, details only go to the operator log

use restcoder_core::ValidationError;
use std::time::Duration;
use thiserror::Error;

/// Why an operation failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The step exceeded its time budget and was killed
    Timeout(Duration),
    /// The process exited with a nonzero code
    Exit(i32),
    /// The process could not be spawned or waited on
    Spawn(String),
    /// A user process did not print "READY" in time
    ReadinessTimeout,
    Other,
}

/// A named, identifiable step failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OperationError {
    /// Step name, e.g. "install dependencies"
    pub step: String,
    pub message: String,
    pub cause: FailureCause,
    /// URL of the captured stdout, if any was uploaded
    pub stdout: Option<String>,
    /// URL of the captured stderr, if any was uploaded
    pub stderr: Option<String>,
}

impl OperationError {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            cause: FailureCause::Other,
            stdout: None,
            stderr: None,
        }
    }

    pub fn timeout(step: &str, after: Duration) -> Self {
        Self {
            cause: FailureCause::Timeout(after),
            ..Self::new(
                step,
                format!("{} timed out after {}", step, format_duration(after)),
            )
        }
    }

    pub fn exit(step: &str, code: i32, detail: &str) -> Self {
        let detail = detail.trim();
        let message = if detail.is_empty() {
            format!("{} failed with exit code {}", step, code)
        } else {
            format!(
                "{} failed with exit code {}: {}",
                step,
                code,
                truncate(detail, 500)
            )
        };
        Self {
            cause: FailureCause::Exit(code),
            ..Self::new(step, message)
        }
    }

    pub fn spawn(step: &str, err: &std::io::Error) -> Self {
        Self {
            cause: FailureCause::Spawn(err.to_string()),
            ..Self::new(step, format!("{} could not be started: {}", step, err))
        }
    }

    /// A user process missed the "READY" output contract
    pub fn readiness_timeout(process: &str, timeout: Duration) -> Self {
        let limit = format_duration(timeout);
        Self {
            cause: FailureCause::ReadinessTimeout,
            ..Self::new(
                format!("start {}", process),
                format!(
                    "Process \"{}\" did not start in time. Every process must print the line \
                     \"READY\" to stdout within {} after it is started.",
                    process, limit
                ),
            )
        }
    }

    pub fn with_logs(mut self, stdout: Option<String>, stderr: Option<String>) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn is_readiness_timeout(&self) -> bool {
        self.cause == FailureCause::ReadinessTimeout
    }
}

/// Any failure that ends a pipeline run early
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    /// The test runner reported a fault of its own
    #[error("test runner failed: {0}")]
    TestRunner(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn is_readiness_timeout(&self) -> bool {
        matches!(self, PipelineError::Operation(e) if e.is_readiness_timeout())
    }
}

/// "3 seconds", "1 second", "1.5 seconds", "3 minutes"
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis >= 60_000 && millis % 60_000 == 0 {
        let minutes = millis / 60_000;
        return format!("{} minute{}", minutes, if minutes == 1 { "" } else { "s" });
    }
    if millis % 1000 == 0 {
        let secs = millis / 1000;
        return format!("{} second{}", secs, if secs == 1 { "" } else { "s" });
    }
    format!("{:.1} seconds", d.as_secs_f64())
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
