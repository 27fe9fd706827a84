//! Progress and result endpoints

use crate::ApiClient;
use crate::error::Result;
use restcoder_core::domain::result::PipelineResult;
use restcoder_core::dto::progress::ProgressEvent;
use tracing::debug;

impl ApiClient {
    // =============================================================================
    // Submission Progress
    // =============================================================================

    /// Push one progress event for a submission
    ///
    /// # Arguments
    /// * `notify_key` - The submission's notification key
    /// * `event` - The event to report
    pub async fn notify_progress(&self, notify_key: &str, event: &ProgressEvent) -> Result<()> {
        let url = format!("{}/api/v1/notify-progress/{}", self.base_url, notify_key);
        debug!("Notifying {} for {}", event.kind(), notify_key);

        let response = self.client.post(&url).json(event).send().await?;

        self.handle_empty_response(response).await
    }

    /// Submit the final result of a submission run
    ///
    /// # Arguments
    /// * `notify_key` - The submission's notification key
    /// * `result` - The verdict, log URL and test summary
    pub async fn submit_result(&self, notify_key: &str, result: &PipelineResult) -> Result<()> {
        let url = format!("{}/api/v1/submit-result/{}", self.base_url, notify_key);
        let response = self.client.post(&url).json(result).send().await?;

        self.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<(String, Value)>>>;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn record(
        State(received): State<Received>,
        Path(key): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        received.lock().unwrap().push((key, body));
        StatusCode::OK
    }

    #[tokio::test]
    async fn test_notify_progress_posts_event() {
        let received: Received = Arc::default();
        let app = Router::new()
            .route("/api/v1/notify-progress/{key}", post(record))
            .with_state(received.clone());
        let client = ApiClient::new(serve(app).await);

        client
            .notify_progress("key-1", &ProgressEvent::Start { total_tests: 2 })
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "key-1");
        assert_eq!(received[0].1["type"], "START");
        assert_eq!(received[0].1["totalTests"], 2);
    }

    #[tokio::test]
    async fn test_submit_result_posts_body() {
        let received: Received = Arc::default();
        let app = Router::new()
            .route("/api/v1/submit-result/{key}", post(record))
            .with_state(received.clone());
        let client = ApiClient::new(serve(app).await);

        client
            .submit_result("key-2", &PipelineResult::failed("Install failed"))
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received[0].1["result"], "FAIL");
        assert_eq!(received[0].1["errorMessage"], "Install failed");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let app = Router::new().route(
            "/api/v1/notify-progress/{key}",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let client = ApiClient::new(serve(app).await);

        let err = client
            .notify_progress("key", &ProgressEvent::Preparing)
            .await
            .unwrap_err();
        assert!(err.is_server_error());
    }
}
