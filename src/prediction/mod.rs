//! Placement prediction client
//!
//! The prediction service receives a task id plus string metadata and may
//! answer with a recommended worker. An empty recommendation means the
//! service has no opinion.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::models::{PredictionRequest, PredictionResponse};

/// Result type for prediction calls
pub type PredictionResult<T> = Result<T, PredictionError>;

/// Prediction errors
#[derive(Debug, Error)]
pub enum PredictionError {
    /// HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    /// Request failed or timed out
    #[error("Prediction request failed: {0}")]
    Request(String),

    /// Service returned a non-success status
    #[error("Prediction service error: {status} - {body}")]
    Status { status: u16, body: String },

    /// Response body did not parse
    #[error("Failed to decode prediction response: {0}")]
    Decode(String),
}

/// Prediction collaborator
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, request: &PredictionRequest) -> PredictionResult<PredictionResponse>;
}

/// Predictor with no opinion about any task
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPredictor;

#[async_trait]
impl Predictor for NoopPredictor {
    async fn predict(&self, _request: &PredictionRequest) -> PredictionResult<PredictionResponse> {
        Ok(PredictionResponse::default())
    }
}

/// HTTP prediction client
///
/// Posts the request as JSON to the configured URL.
pub struct HttpPredictor {
    client: Client,
    url: String,
}

impl HttpPredictor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> PredictionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PredictionError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, request: &PredictionRequest) -> PredictionResult<PredictionResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| PredictionError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PredictionError::Status { status, body });
        }

        response
            .json::<PredictionResponse>()
            .await
            .map_err(|e| PredictionError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> PredictionRequest {
        PredictionRequest::for_task(&Task::new("email", "{}").with_id("T1"))
    }

    #[tokio::test]
    async fn test_noop_has_no_opinion() {
        let response = NoopPredictor.predict(&request()).await.unwrap();
        assert!(response.recommendation().is_none());
    }

    #[tokio::test]
    async fn test_http_predictor_parses_recommendation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(body_partial_json(serde_json::json!({ "task_id": "T1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "priority": 2,
                "estimated_time": 1.5,
                "recommended_worker": "w2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let predictor =
            HttpPredictor::new(format!("{}/predict", server.uri()), Duration::from_secs(2))
                .unwrap();
        let response = predictor.predict(&request()).await.unwrap();

        assert_eq!(response.recommendation(), Some("w2"));
        assert_eq!(response.priority, 2);
    }

    #[tokio::test]
    async fn test_http_predictor_accepts_partial_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let predictor = HttpPredictor::new(server.uri(), Duration::from_secs(2)).unwrap();
        let response = predictor.predict(&request()).await.unwrap();
        assert!(response.recommendation().is_none());
    }

    #[tokio::test]
    async fn test_http_predictor_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let predictor = HttpPredictor::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = predictor.predict(&request()).await.unwrap_err();
        assert!(matches!(err, PredictionError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_http_predictor_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let predictor = HttpPredictor::new(server.uri(), Duration::from_millis(100)).unwrap();
        let err = predictor.predict(&request()).await.unwrap_err();
        assert!(matches!(err, PredictionError::Request(_)));
    }
}
