//! Submissions repository
//!
//! Source of the jobs the worker executes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use restcoder_client::ApiClient;

/// Repository trait for the submission queue
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Takes the next queued job, undecoded
    ///
    /// # Returns
    /// `None` when nothing is queued
    async fn next_submission(&self) -> Result<Option<serde_json::Value>>;
}

#[async_trait]
impl SubmissionSource for ApiClient {
    async fn next_submission(&self) -> Result<Option<serde_json::Value>> {
        ApiClient::next_submission(self)
            .await
            .context("Failed to fetch next submission")
    }
}
