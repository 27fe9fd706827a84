//! Notifications repository
//!
//! Pushes progress events and final results to the grading API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use restcoder_client::ApiClient;
use restcoder_core::domain::result::PipelineResult;
use restcoder_core::dto::progress::ProgressEvent;

/// Repository trait for reporting on a submission
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    /// Sends one progress event
    ///
    /// # Arguments
    /// * `notify_key` - The submission's notification key
    /// * `event` - The event to report
    async fn notify_progress(&self, notify_key: &str, event: &ProgressEvent) -> Result<()>;

    /// Submits the final result of a run
    async fn submit_result(&self, notify_key: &str, result: &PipelineResult) -> Result<()>;
}

#[async_trait]
impl ProgressNotifier for ApiClient {
    async fn notify_progress(&self, notify_key: &str, event: &ProgressEvent) -> Result<()> {
        ApiClient::notify_progress(self, notify_key, event)
            .await
            .with_context(|| format!("Failed to send {} notification", event.kind()))
    }

    async fn submit_result(&self, notify_key: &str, result: &PipelineResult) -> Result<()> {
        ApiClient::submit_result(self, notify_key, result)
            .await
            .context("Failed to submit result")
    }
}
