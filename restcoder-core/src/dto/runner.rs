//! Test-runner child protocol
//!
//! The worker writes one [`SpawnMessage`] as a JSON line to the child's
//! stdin; the child answers with a stream of [`RunnerMessage`] JSON lines on
//! its stdout, ending with either `END` or `ERROR`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::domain::result::{TestResultEntry, UnitTestResult};

/// Initial message sent to the test-runner child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnMessage {
    /// Test files to execute, in order
    pub files: Vec<PathBuf>,
    /// Resolved environment of the application under test
    pub test_env: BTreeMap<String, String>,
}

/// Message emitted by the test-runner child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum RunnerMessage {
    Start { total_tests: usize },
    TestResult { data: TestResultEntry },
    End { result: UnitTestResult },
    Error { data: String },
}

impl RunnerMessage {
    /// Encodes the message as a single protocol line (without newline)
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes one protocol line
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}
