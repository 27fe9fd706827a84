//! Log storage repository
//!
//! Persists captured logs and returns a durable URL for them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use restcoder_client::StorageClient;

/// Repository trait for storing captured logs
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Stores a log under the given key
    ///
    /// # Returns
    /// The public read URL of the stored log
    async fn put_text(&self, key: &str, body: Vec<u8>) -> Result<String>;
}

#[async_trait]
impl LogStorage for StorageClient {
    async fn put_text(&self, key: &str, body: Vec<u8>) -> Result<String> {
        StorageClient::put_text(self, key, body)
            .await
            .with_context(|| format!("Failed to upload log {}", key))
    }
}
