//! Job poller
//!
//! Polls the submission queue and runs each submission through the
//! pipeline. Every submission runs in its own task; at most
//! `max_parallel_tests` run at once.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, error, info};

use restcoder_core::domain::result::TestOutcome;

use crate::config::Config;
use crate::pipeline::SubmissionPipeline;
use crate::repository::SubmissionSource;

/// Job poller that continuously polls for and executes submissions
pub struct JobPoller {
    config: Config,
    source: Arc<dyn SubmissionSource>,
    pipeline: Arc<SubmissionPipeline>,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    /// Creates a new job poller
    pub fn new(config: Config, source: Arc<dyn SubmissionSource>, pipeline: Arc<SubmissionPipeline>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_tests));
        Self {
            config,
            source,
            pipeline,
            semaphore,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting job poller (interval: {:?}, parallel: {})",
            self.config.poll_interval, self.config.max_parallel_tests
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for submissions");

            match self.poll_once().await {
                Ok(started) => {
                    if started > 0 {
                        info!("Started {} submission(s) this cycle", started);
                    }
                }
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                }
            }
        }
    }

    /// Takes submissions while there is free capacity
    ///
    /// # Returns
    /// Number of submissions started
    async fn poll_once(&self) -> Result<usize> {
        let mut started = 0;

        loop {
            // Only take a job we can run right away
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max parallel tests reached");
                break;
            };

            let Some(raw) = self
                .source
                .next_submission()
                .await
                .context("Failed to fetch next submission")?
            else {
                debug!("No submissions available");
                break;
            };

            self.spawn_submission(raw, permit);
            started += 1;
        }

        Ok(started)
    }

    /// Spawns a task running a single submission
    fn spawn_submission(&self, raw: serde_json::Value, permit: OwnedSemaphorePermit) {
        let pipeline = Arc::clone(&self.pipeline);

        tokio::spawn(async move {
            let result = pipeline.run(raw).await;
            match result.result {
                TestOutcome::Error => error!(
                    "Submission ended with ERROR: {}",
                    result.error_message.as_deref().unwrap_or("see run log")
                ),
                outcome => info!("Submission ended with {:?}", outcome),
            }
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::pipeline::tests::{FakeRuntime, Script, ScriptedRunner};
    use crate::runtime::RotatingPortAllocator;
    use crate::service::log_collector::tests::MemoryStorage;
    use crate::service::relay::tests::RecordingNotifier;

    struct QueueSource {
        queue: Mutex<VecDeque<Value>>,
        fail: bool,
    }

    #[async_trait]
    impl SubmissionSource for QueueSource {
        async fn next_submission(&self) -> Result<Option<Value>> {
            if self.fail {
                anyhow::bail!("queue unavailable");
            }
            Ok(self.queue.lock().unwrap().pop_front())
        }
    }

    fn poller(source: QueueSource, notifier: Arc<RecordingNotifier>, parallel: usize) -> JobPoller {
        let mut config = Config::default();
        config.max_parallel_tests = parallel;
        let pipeline = SubmissionPipeline::new(
            config.clone(),
            Arc::new(FakeRuntime::default()),
            notifier,
            Arc::new(MemoryStorage::default()),
            Arc::new(RotatingPortAllocator::new(40_000)),
            Arc::new(ScriptedRunner::new(Script::Pass)),
        );
        JobPoller::new(config, Arc::new(source), Arc::new(pipeline))
    }

    fn invalid_job(key: &str) -> Value {
        json!({"notifyKey": key})
    }

    #[tokio::test]
    async fn test_poll_stops_at_capacity() {
        let source = QueueSource {
            queue: Mutex::new((0..3).map(|i| invalid_job(&format!("k{}", i))).collect()),
            fail: false,
        };
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(source, notifier.clone(), 2);

        assert_eq!(poller.poll_once().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_poll_runs_submissions() {
        let source = QueueSource {
            queue: Mutex::new(VecDeque::from(vec![invalid_job("k1")])),
            fail: false,
        };
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(source, notifier.clone(), 1);

        assert_eq!(poller.poll_once().await.unwrap(), 1);

        // The permit comes back once the run has finished
        let permit = poller.semaphore.clone().acquire_owned().await.unwrap();
        drop(permit);

        let results = notifier.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result, TestOutcome::Error);
    }

    #[tokio::test]
    async fn test_poll_reports_source_errors() {
        let source = QueueSource {
            queue: Mutex::new(VecDeque::new()),
            fail: true,
        };
        let poller = poller(source, Arc::new(RecordingNotifier::default()), 1);

        let err = poller.poll_once().await.unwrap_err();
        assert!(format!("{:#}", err).contains("queue unavailable"));
    }
}
