//! Submission pipeline
//!
//! Turns one submission into a running multi-container application, tests
//! it, and tears everything down again. Stages run strictly in sequence:
//!
//! 1. Prepare: validate the job and derive the resource name prefix
//! 2. InitializeContainer: download, install and commit the source image
//! 3. StartServices: start auxiliary service containers
//! 4. PrepareUserContainers: start idle containers for every process instance
//! 5. DisableInternetConnection: isolate user containers
//! 6. LinkContainers: open the declared process -> service links
//! 7. StartContainers: run the user processes and wait for "READY"
//! 8. StartUnitTests: run the test case through the test-runner bridge
//!
//! Whatever happens, the rollback ledger is replayed at the end of the run,
//! the outcome is classified and the result is submitted.

pub mod fan_out;
pub mod rollback;
mod stages;


use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::error;

use restcoder_core::domain::result::{PipelineResult, UnitTestResult};
use restcoder_core::domain::submission::SubmissionRequest;
use restcoder_core::dto::progress::ProgressEvent;

use crate::config::Config;
use crate::error::PipelineError;
use crate::naming;
use crate::repository::{LogStorage, ProgressNotifier};
use crate::runtime::{ContainerRuntime, PortAllocator};
use crate::service::bridge::TestRunner;
use crate::service::launcher::RunningProcess;
use crate::service::log_collector::LogPair;
use crate::service::relay::ProgressRelay;
use crate::service::run_log::RunLog;

use self::fan_out::Stragglers;
use self::rollback::RollbackLedger;

/// Length of the reference id shown to users on internal failures
const REFER_ID_LENGTH: usize = 20;

/// Executes submissions end to end
pub struct SubmissionPipeline {
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    notifier: Arc<dyn ProgressNotifier>,
    storage: Arc<dyn LogStorage>,
    ports: Arc<dyn PortAllocator>,
    tests: Arc<dyn TestRunner>,
}

impl SubmissionPipeline {
    pub fn new(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
        notifier: Arc<dyn ProgressNotifier>,
        storage: Arc<dyn LogStorage>,
        ports: Arc<dyn PortAllocator>,
        tests: Arc<dyn TestRunner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            runtime,
            notifier,
            storage,
            ports,
            tests,
        }
    }

    /// Runs one submission and submits its result
    ///
    /// Never fails: every error is classified into the returned result.
    pub async fn run(&self, raw: Value) -> PipelineResult {
        let log = Arc::new(RunLog::new(
            naming::unique_string(REFER_ID_LENGTH),
            self.config.run_log_max_bytes,
        ));

        // Read before validation so even a rejected job gets an answer
        let notify_key = raw
            .get("notifyKey")
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        let relay = Arc::new(match &notify_key {
            Some(key) => ProgressRelay::start(Arc::clone(&self.notifier), key.clone()),
            None => ProgressRelay::disabled(),
        });

        let outcome = match SubmissionRequest::from_value(raw) {
            Ok(request) => {
                log.log_info(format!(
                    "Running submission {} ({}, test case {})",
                    request.submission_id, request.language, request.test_case
                ));

                let run = Arc::new(Run {
                    config: Arc::clone(&self.config),
                    runtime: Arc::clone(&self.runtime),
                    storage: Arc::clone(&self.storage),
                    ports: Arc::clone(&self.ports),
                    tests: Arc::clone(&self.tests),
                    relay: Arc::clone(&relay),
                    log: Arc::clone(&log),
                    ledger: RollbackLedger::new(),
                    stragglers: Stragglers::new(),
                    processes: Mutex::new(Vec::new()),
                    prefix: naming::name_prefix(&request.submission_id),
                });

                let outcome = run.execute(request).await;
                run.teardown().await;
                outcome
            }
            Err(e) => Err(PipelineError::Validation(e)),
        };

        let result = classify(outcome, &relay, &log);
        if notify_key.is_none() {
            log.log_warning("Submission has no notifyKey, result not submitted");
        }

        // The run log is sealed here; later failures only reach tracing
        let log_url = log.upload(self.storage.as_ref()).await;
        relay.close().await;
        let result = result.with_log_url(log_url);

        if let Some(key) = &notify_key {
            if let Err(e) = self.notifier.submit_result(key, &result).await {
                error!(refer_id = %log.refer_id(), "Failed to submit result: {:#}", e);
            }
        }

        result
    }
}

/// Maps the outcome of a run onto the result record
///
/// Operation failures are the candidate's to fix and surface with their
/// message; anything else surfaces only as a reference id.
fn classify(
    outcome: Result<UnitTestResult, PipelineError>,
    relay: &ProgressRelay,
    log: &RunLog,
) -> PipelineResult {
    match outcome {
        Ok(summary) => {
            log.log_info(format!("Submission finished, passed={}", summary.passed));
            PipelineResult::from_tests(summary)
        }
        Err(PipelineError::Validation(e)) => {
            log.log_warning(format!("Submission rejected: {}", e));
            PipelineResult::error(Some(e.message))
        }
        Err(PipelineError::Operation(e)) => {
            log.log_warning(format!("Operation '{}' failed: {}", e.step, e.message));
            relay.send(ProgressEvent::OperationError {
                msg: e.message.clone(),
                stdout: e.stdout.clone(),
                stderr: e.stderr.clone(),
                refer_id: log.refer_id().to_string(),
            });
            PipelineResult::failed(e.message)
        }
        Err(e) => {
            log.log_error(format!("Submission errored: {:?}", e));
            relay.send(ProgressEvent::Error {
                refer_id: log.refer_id().to_string(),
            });
            PipelineResult::error(None)
        }
    }
}

/// State of one run, shared by the units of every stage
pub(crate) struct Run {
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    storage: Arc<dyn LogStorage>,
    ports: Arc<dyn PortAllocator>,
    tests: Arc<dyn TestRunner>,
    relay: Arc<ProgressRelay>,
    log: Arc<RunLog>,
    ledger: RollbackLedger,
    stragglers: Stragglers,
    /// User processes started in stage 7, alive until teardown
    processes: Mutex<Vec<(RunningProcess, LogPair)>>,
    prefix: String,
}

impl Run {
    /// Stops everything the run started and replays the rollback ledger
    async fn teardown(&self) {
        self.stragglers.wait().await;

        let processes = std::mem::take(&mut *self.processes.lock().unwrap());
        if !processes.is_empty() {
            self.log
                .log_info(format!("Stopping {} process(es)", processes.len()));
        }
        futures_util::future::join_all(processes.into_iter().map(|(process, logs)| async move {
            self.log
                .log_debug(format!("Stopping {} ({:?})", process.label(), process.state()));
            process.stop().await;
            logs.discard().await;
        }))
        .await;

        if self.ledger.is_empty() {
            return;
        }
        let failures = self
            .ledger
            .replay(self.config.cleanup_order, self.runtime.as_ref(), &self.log)
            .await;
        if failures > 0 {
            self.log
                .log_warning(format!("{} rollback step(s) failed", failures));
        }
    }
}
