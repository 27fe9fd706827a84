//! Object storage client
//!
//! Uploads captured logs to an S3-compatible bucket and hands back the
//! public read URL.

use crate::error::Result;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Client for a single log bucket
#[derive(Debug, Clone)]
pub struct StorageClient {
    /// Endpoint the objects are written to (e.g., "http://minio:9000")
    endpoint: String,
    bucket: String,
    /// Base URL under which stored objects are publicly readable
    public_url: String,
    client: Client,
}

impl StorageClient {
    /// Creates a storage client
    ///
    /// # Arguments
    /// * `endpoint` - Write endpoint of the object store
    /// * `bucket` - Bucket receiving the logs
    /// * `public_url` - Public base URL of the bucket
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Public URL of an object, without any query string
    pub fn public_url(&self, key: &str) -> String {
        let url = format!("{}/{}", self.public_url, key);
        match url.split_once('?') {
            Some((base, _)) => base.to_string(),
            None => url,
        }
    }

    /// Stores a text object and returns its public URL
    ///
    /// # Arguments
    /// * `key` - Object key, e.g. `2016-03-01/abc.log`
    /// * `body` - Object content
    pub async fn put_text(&self, key: &str, body: Vec<u8>) -> Result<String> {
        let url = format!("{}/{}/{}", self.endpoint, self.bucket, key);
        debug!("Uploading {} bytes to {}", body.len(), url);

        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::error_from_response(response).await);
        }

        Ok(self.public_url(key))
    }
}
