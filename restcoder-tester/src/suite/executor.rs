//! Test suite executor
//!
//! Runs resolved tests one after another against the application under
//! test. Each test gets its own time budget; the first failing test stops
//! the suite.

use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use restcoder_core::domain::result::{TestResultEntry, TestStatus, UnitTestResult};
use restcoder_core::dto::runner::RunnerMessage;

use super::definition::{Operation, TestDefinition};

/// Message shown for failures that are not the candidate's fault
const INTERNAL_FAILURE: &str = "Internal server error";

/// Why a test failed
#[derive(Debug, Clone, PartialEq, Eq)]
enum TestFailure {
    /// Failure attributable to the code under test
    User(String),
    /// Failure of the test machinery itself
    Internal(String),
}

pub struct SuiteExecutor {
    client: reqwest::Client,
    test_timeout: Duration,
}

impl SuiteExecutor {
    pub fn new(test_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            test_timeout,
        }
    }

    /// Runs the suite, streaming protocol messages into `messages`
    ///
    /// Sends `START`, then `PENDING` and a final `PASS`/`FAIL` per test, and
    /// returns the summary that goes into `END`.
    pub async fn run(
        &self,
        tests: Vec<TestDefinition>,
        messages: &mpsc::UnboundedSender<RunnerMessage>,
    ) -> UnitTestResult {
        let _ = messages.send(RunnerMessage::Start {
            total_tests: tests.len(),
        });

        let mut summary = UnitTestResult {
            passed: true,
            tests: BTreeMap::new(),
        };

        for test in tests {
            let _ = messages.send(RunnerMessage::TestResult {
                data: TestResultEntry::pending(&test.name),
            });

            let entry = match tokio::time::timeout(self.test_timeout, self.run_test(&test)).await {
                Ok(Ok(())) => TestResultEntry::passed(&test.name),
                Ok(Err(TestFailure::User(message))) => TestResultEntry::failed(&test.name, message),
                Ok(Err(TestFailure::Internal(detail))) => {
                    debug!("{} failed internally: {}", test.name, detail);
                    TestResultEntry::failed(&test.name, INTERNAL_FAILURE)
                }
                Err(_) => TestResultEntry::failed(
                    &test.name,
                    format!("Timeout of {}ms exceeded", self.test_timeout.as_millis()),
                ),
            };

            let failed = entry.result == TestStatus::Fail;
            let _ = messages.send(RunnerMessage::TestResult { data: entry.clone() });
            summary.tests.insert(test.name.clone(), entry);

            if failed {
                summary.passed = false;
                debug!("Stopping suite after failed test {}", test.name);
                break;
            }
        }

        summary
    }

    async fn run_test(&self, test: &TestDefinition) -> Result<(), TestFailure> {
        let mut operation = 0;
        let mut assertion = 0;

        for op in &test.operations {
            for _ in 0..op.repeat {
                operation += 1;
                self.run_operation(op, operation, &mut assertion).await?;
            }
        }

        Ok(())
    }

    async fn run_operation(
        &self,
        op: &Operation,
        operation: usize,
        assertion: &mut usize,
    ) -> Result<(), TestFailure> {
        let method = Method::from_bytes(op.method.to_uppercase().as_bytes())
            .map_err(|e| TestFailure::Internal(format!("invalid method {}: {}", op.method, e)))?;

        let mut request = self.client.request(method, &op.url);
        for (name, value) in &op.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &op.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|_| TestFailure::User(format!("Connection refused in operation {}", operation)))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|_| TestFailure::User(format!("Connection refused in operation {}", operation)))?;

        let expect = &op.expect;
        let mut check = |ok: bool| {
            *assertion += 1;
            if ok {
                Ok(())
            } else {
                Err(TestFailure::User(format!(
                    "Assert {} failed in operation {}",
                    assertion, operation
                )))
            }
        };

        if let Some(expected) = expect.status {
            check(status == expected)?;
        }
        if let Some(expected) = &expect.text {
            check(&text == expected)?;
        }
        if let Some(expected) = &expect.json {
            let actual = serde_json::from_str::<Value>(&text).ok();
            check(actual.as_ref() == Some(expected))?;
        }
        if let Some(expected) = &expect.contains {
            check(text.contains(expected.as_str()))?;
        }

        Ok(())
    }
}

impl Default for SuiteExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::suite::definition::Expectation;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    /// Serves a tiny todo API on an ephemeral port
    pub(crate) async fn spawn_app() -> String {
        let app = Router::new()
            .route("/hello", get(|| async { "world" }))
            .route(
                "/todos",
                post(|Json(body): Json<Value>| async move {
                    (
                        axum::http::StatusCode::CREATED,
                        Json(json!({"id": 1, "name": body["name"], "done": false})),
                    )
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn op(url: String, expect: Expectation) -> Operation {
        Operation {
            method: "GET".to_string(),
            url,
            headers: BTreeMap::new(),
            body: None,
            repeat: 1,
            expect,
        }
    }

    fn test(name: &str, operations: Vec<Operation>) -> TestDefinition {
        TestDefinition {
            name: name.to_string(),
            operations,
        }
    }

    async fn run(executor: &SuiteExecutor, tests: Vec<TestDefinition>) -> (UnitTestResult, Vec<RunnerMessage>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = executor.run(tests, &tx).await;
        drop(tx);
        let mut messages = Vec::new();
        while let Some(msg) = rx.recv().await {
            messages.push(msg);
        }
        (summary, messages)
    }

    #[tokio::test]
    async fn test_passing_suite() {
        let base = spawn_app().await;
        let mut create = op(
            format!("{}/todos", base),
            Expectation {
                status: Some(201),
                json: Some(json!({"id": 1, "name": "item 1", "done": false})),
                ..Default::default()
            },
        );
        create.method = "post".to_string();
        create.body = Some(json!({"name": "item 1"}));

        let tests = vec![
            test(
                "TEST 1",
                vec![op(
                    format!("{}/hello", base),
                    Expectation {
                        status: Some(200),
                        text: Some("world".to_string()),
                        contains: Some("orl".to_string()),
                        ..Default::default()
                    },
                )],
            ),
            test("TEST 2", vec![create]),
        ];

        let (summary, messages) = run(&SuiteExecutor::default(), tests).await;
        assert!(summary.passed);
        assert_eq!(summary.tests.len(), 2);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], RunnerMessage::Start { total_tests: 2 });
        match &messages[1] {
            RunnerMessage::TestResult { data } => assert_eq!(data.result, TestStatus::Pending),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_assertion_is_numbered_and_stops_suite() {
        let base = spawn_app().await;
        let mut first = op(
            format!("{}/hello", base),
            Expectation {
                status: Some(200),
                text: Some("mars".to_string()),
                ..Default::default()
            },
        );
        first.repeat = 2;
        let tests = vec![
            test("TEST 1", vec![op(format!("{}/hello", base), Expectation::default()), first]),
            test("TEST 2", vec![op(format!("{}/hello", base), Expectation::default())]),
        ];

        let (summary, messages) = run(&SuiteExecutor::default(), tests).await;
        assert!(!summary.passed);
        assert_eq!(summary.tests.len(), 1);
        let entry = &summary.tests["TEST 1"];
        assert_eq!(
            entry.user_error_message.as_deref(),
            Some("Assert 2 failed in operation 2")
        );
        // START, PENDING, FAIL
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let tests = vec![test(
            "TEST 1",
            vec![op(format!("http://{}/hello", addr), Expectation::default())],
        )];
        let (summary, _) = run(&SuiteExecutor::default(), tests).await;
        assert_eq!(
            summary.tests["TEST 1"].user_error_message.as_deref(),
            Some("Connection refused in operation 1")
        );
    }

    #[tokio::test]
    async fn test_timeout_is_reported_distinctly() {
        let base = spawn_app().await;
        let tests = vec![test(
            "TEST 1",
            vec![op(format!("{}/slow", base), Expectation::default())],
        )];

        let executor = SuiteExecutor::new(Duration::from_millis(200));
        let (summary, _) = run(&executor, tests).await;
        assert!(!summary.passed);
        assert_eq!(
            summary.tests["TEST 1"].user_error_message.as_deref(),
            Some("Timeout of 200ms exceeded")
        );
    }

    #[tokio::test]
    async fn test_invalid_method_is_internal() {
        let mut bad = op("http://127.0.0.1:1/".to_string(), Expectation::default());
        bad.method = "NOT A METHOD".to_string();

        let (summary, _) = run(&SuiteExecutor::default(), vec![test("TEST 1", vec![bad])]).await;
        assert_eq!(
            summary.tests["TEST 1"].user_error_message.as_deref(),
            Some(INTERNAL_FAILURE)
        );
    }
}
