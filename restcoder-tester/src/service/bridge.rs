//! Test runner bridge
//!
//! Spawns the isolated test-runner child, hands it the test files and the
//! resolved environment, and relays its message stream as progress events.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use restcoder_core::domain::result::UnitTestResult;
use restcoder_core::dto::progress::ProgressEvent;
use restcoder_core::dto::runner::{RunnerMessage, SpawnMessage};

use crate::config::Config;
use crate::error::{PipelineError, format_duration};
use crate::service::relay::ProgressRelay;
use crate::service::run_log::RunLog;
use crate::suite::definition;

/// Runs a test case against a started application
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs the test case and relays its progress
    ///
    /// # Arguments
    /// * `test_case` - Test case directory name
    /// * `test_env` - Environment the tests resolve placeholders from
    /// * `relay` - Where START, TEST_RESULT and END go
    /// * `log` - Operator log of the run
    async fn run(
        &self,
        test_case: &str,
        test_env: &BTreeMap<String, String>,
        relay: &ProgressRelay,
        log: &RunLog,
    ) -> Result<UnitTestResult, PipelineError>;
}

/// [`TestRunner`] backed by a child process speaking the runner protocol
pub struct TestRunnerBridge {
    program: PathBuf,
    args: Vec<String>,
    test_cases_dir: PathBuf,
    timeout: Duration,
}

impl TestRunnerBridge {
    pub fn new(program: PathBuf, args: Vec<String>, test_cases_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            program,
            args,
            test_cases_dir,
            timeout,
        }
    }

    /// Bridge re-executing the current binary in `run-tests` mode
    pub fn current_exe(config: &Config) -> std::io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            vec![
                "run-tests".to_string(),
                "--test-timeout-ms".to_string(),
                config.timeouts.test.as_millis().to_string(),
            ],
            config.test_cases_dir.clone(),
            config.timeouts.test_run,
        ))
    }

    /// Reads runner messages until the run resolves
    async fn relay_messages<R>(
        lines: &mut tokio::io::Lines<R>,
        relay: &ProgressRelay,
        log: &RunLog,
    ) -> Result<UnitTestResult, PipelineError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(PipelineError::TestRunner(
                        "test runner exited without a result".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(PipelineError::TestRunner(format!(
                        "failed to read test runner output: {}",
                        e
                    )));
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match RunnerMessage::from_line(&line) {
                Ok(RunnerMessage::Start { total_tests }) => {
                    log.log_info(format!("Running {} test(s)", total_tests));
                    relay.send(ProgressEvent::Start { total_tests });
                }
                Ok(RunnerMessage::TestResult { data }) => {
                    log.log_debug(format!("{}: {:?}", data.name, data.result));
                    relay.send(ProgressEvent::TestResult {
                        name: data.name,
                        result: data.result,
                        user_error_message: data.user_error_message,
                    });
                }
                Ok(RunnerMessage::End { result }) => {
                    log.log_info(format!("Test run finished, passed={}", result.passed));
                    relay.send(ProgressEvent::End {
                        passed: result.passed,
                    });
                    return Ok(result);
                }
                Ok(RunnerMessage::Error { data }) => {
                    return Err(PipelineError::TestRunner(data));
                }
                Err(_) => {
                    log.log_debug(format!("test runner: {}", line));
                }
            }
        }
    }
}

#[async_trait]
impl TestRunner for TestRunnerBridge {
    async fn run(
        &self,
        test_case: &str,
        test_env: &BTreeMap<String, String>,
        relay: &ProgressRelay,
        log: &RunLog,
    ) -> Result<UnitTestResult, PipelineError> {
        let dir = self.test_cases_dir.join(test_case);
        let files = definition::case_files(&dir).map_err(|e| {
            PipelineError::TestRunner(format!("test case {} not found: {}", dir.display(), e))
        })?;
        log.log_info(format!("Test case {} has {} file(s)", test_case, files.len()));

        let spawn = SpawnMessage {
            files,
            test_env: test_env.clone(),
        };
        let mut payload = serde_json::to_string(&spawn)
            .map_err(|e| PipelineError::Internal(anyhow::anyhow!("failed to encode spawn message: {}", e)))?;
        payload.push('\n');

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::TestRunner(format!("failed to spawn test runner: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| PipelineError::TestRunner(format!("failed to send spawn message: {}", e)))?;
        }

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut captured = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    captured.push(line);
                }
                captured
            })
        });

        let stdout = child.stdout.take().ok_or_else(|| {
            PipelineError::TestRunner("test runner stdout unavailable".to_string())
        })?;
        let mut lines = BufReader::new(stdout).lines();

        let outcome = match tokio::time::timeout(
            self.timeout,
            Self::relay_messages(&mut lines, relay, log),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(PipelineError::TestRunner(format!(
                "test run timed out after {}",
                format_duration(self.timeout)
            ))),
        };

        let _ = child.kill().await;
        if let Some(task) = stderr_task {
            if let Ok(Ok(captured)) = tokio::time::timeout(Duration::from_secs(1), task).await {
                for line in captured {
                    log.log_debug(format!("test runner stderr: {}", line));
                }
            }
        }

        outcome
    }
}
