//! Submission queue endpoint

use crate::ApiClient;
use crate::error::Result;
use reqwest::StatusCode;

impl ApiClient {
    // =============================================================================
    // Submission Queue
    // =============================================================================

    /// Take the next queued submission, if any
    ///
    /// The payload is returned undecoded: validating it against the job
    /// shape is the first stage of the pipeline.
    ///
    /// # Returns
    /// `None` when the queue is empty (HTTP 204)
    pub async fn next_submission(&self) -> Result<Option<serde_json::Value>> {
        let url = format!("{}/api/v1/submissions/next", self.base_url);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        self.handle_response(response).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::get;
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let app = Router::new().route(
            "/api/v1/submissions/next",
            get(|| async { HttpStatus::NO_CONTENT }),
        );
        let client = ApiClient::new(serve(app).await);

        assert_eq!(client.next_submission().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_queued_submission() {
        let app = Router::new().route(
            "/api/v1/submissions/next",
            get(|| async { axum::Json(json!({"submissionId": "42"})) }),
        );
        let client = ApiClient::new(serve(app).await);

        let job = client.next_submission().await.unwrap().unwrap();
        assert_eq!(job["submissionId"], "42");
    }
}
