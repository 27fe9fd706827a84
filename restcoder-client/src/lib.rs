//! RestCoder HTTP Client
//!
//! A small, type-safe HTTP client for the collaborators of the grading
//! worker:
//! - the grading API (submission queue, progress notifications, results)
//! - the object storage bucket that keeps captured logs
//!
//! # Example
//!
//! ```no_run
//! use restcoder_client::ApiClient;
//! use restcoder_core::dto::progress::ProgressEvent;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::new("http://localhost:3500");
//!     client.notify_progress("notify-key", &ProgressEvent::Preparing).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod progress;
mod storage;
mod submissions;

pub use error::{ClientError, Result};
pub use storage::StorageClient;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the grading API
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Base URL of the API (e.g., "http://localhost:3500")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the grading API
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new API client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is ignored
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(())
    }
}

/// Builds an [`ClientError::ApiError`] from a non-success response
pub(crate) async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    ClientError::api_error(status.as_u16(), error_text)
}
