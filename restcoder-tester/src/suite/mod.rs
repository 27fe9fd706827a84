//! Isolated test-runner child
//!
//! The worker re-executes its own binary in `run-tests` mode for every
//! submission, so arbitrary or crashing test code can never take the worker
//! down. The child reads one spawn message line from stdin and writes
//! protocol lines to stdout until `END` or `ERROR`.

pub mod definition;
pub mod executor;

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use restcoder_core::dto::runner::{RunnerMessage, SpawnMessage};

use self::executor::SuiteExecutor;

/// Runs the suite described by a spawn message
///
/// Every protocol message, including the final `END` or `ERROR`, goes into
/// `messages`.
pub async fn run_suite(
    spawn: SpawnMessage,
    test_timeout: Duration,
    messages: mpsc::UnboundedSender<RunnerMessage>,
) {
    let tests = match definition::load(&spawn.files)
        .and_then(|tests| definition::resolve(tests, &spawn.test_env))
    {
        Ok(tests) => tests,
        Err(e) => {
            let _ = messages.send(RunnerMessage::Error { data: e.to_string() });
            return;
        }
    };

    let summary = SuiteExecutor::new(test_timeout).run(tests, &messages).await;
    let _ = messages.send(RunnerMessage::End { result: summary });
}

/// Entry point of the `run-tests` mode
pub async fn run_child(test_timeout: Duration) -> Result<()> {
    let mut input = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut input)
        .await
        .context("Failed to read spawn message")?;

    let (tx, mut rx) = mpsc::unbounded_channel();

    match serde_json::from_str::<SpawnMessage>(input.trim()) {
        Ok(spawn) => {
            tokio::spawn(run_suite(spawn, test_timeout, tx));
        }
        Err(e) => {
            let _ = tx.send(RunnerMessage::Error {
                data: format!("invalid spawn message: {}", e),
            });
            drop(tx);
        }
    }

    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        let mut line = message.to_line().context("Failed to encode message")?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use restcoder_core::domain::result::TestStatus;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn write_case(dir: &std::path::Path, name: &str, body: serde_json::Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    async fn collect(spawn: SpawnMessage) -> Vec<RunnerMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        run_suite(spawn, Duration::from_secs(5), tx).await;
        let mut messages = Vec::new();
        while let Some(msg) = rx.recv().await {
            messages.push(msg);
        }
        messages
    }

    #[tokio::test]
    async fn test_suite_ends_with_summary() {
        let base = executor::tests::spawn_app().await;
        let dir = std::env::temp_dir().join(format!("restcoder-suite-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = write_case(
            &dir,
            "test.json",
            json!({"tests": [{
                "name": "TEST 1",
                "operations": [{"url": "${API_URL}/hello", "expect": {"status": 200, "text": "world"}}]
            }]}),
        );

        let mut test_env = BTreeMap::new();
        test_env.insert("API_URL".to_string(), base);
        let messages = collect(SpawnMessage {
            files: vec![file],
            test_env,
        })
        .await;

        assert_eq!(messages.first(), Some(&RunnerMessage::Start { total_tests: 1 }));
        match messages.last() {
            Some(RunnerMessage::End { result }) => {
                assert!(result.passed);
                assert_eq!(result.tests["TEST 1"].result, TestStatus::Pass);
            }
            other => panic!("unexpected {:?}", other),
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_unresolved_variable_is_framework_error() {
        let dir = std::env::temp_dir().join(format!("restcoder-suite-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = write_case(
            &dir,
            "test.json",
            json!({"tests": [{"name": "TEST 1", "operations": [{"url": "${API_URL_1}/x"}]}]}),
        );

        let messages = collect(SpawnMessage {
            files: vec![file],
            test_env: BTreeMap::new(),
        })
        .await;

        assert_eq!(
            messages,
            vec![RunnerMessage::Error {
                data: "API_URL_1 is not configured".to_string()
            }]
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_framework_error() {
        let messages = collect(SpawnMessage {
            files: vec![PathBuf::from("/nonexistent/restcoder/test.json")],
            test_env: BTreeMap::new(),
        })
        .await;

        assert!(matches!(messages.as_slice(), [RunnerMessage::Error { .. }]));
    }
}
