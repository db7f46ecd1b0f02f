//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::batcher::{BatcherError, RequestBatcher};
use crate::core::{InferenceError, TimingReport};
use crate::pipelines::{InferenceEngine, InferenceResult, SentimentLabel};

/// Shared application state
pub struct AppState {
    pub engine: Arc<dyn InferenceEngine>,
    pub batcher: Option<RequestBatcher>,
}

impl AppState {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            engine,
            batcher: None,
        }
    }

    /// Route `/predict` through a request batcher.
    pub fn with_batcher(mut self, batcher: RequestBatcher) -> Self {
        self.batcher = Some(batcher);
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metrics {
    pub token_time: u64,
    pub inference_time: u64,
    pub total_time: u64,
    pub model_load_time: u64,
}

impl From<TimingReport> for Metrics {
    fn from(timings: TimingReport) -> Self {
        Self {
            token_time: timings.tokenize_ms,
            inference_time: timings.inference_ms,
            total_time: timings.total_ms,
            model_load_time: timings.model_load_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub metrics: Metrics,
    pub predictions: Vec<SentimentLabel>,
}

impl From<InferenceResult> for PredictionResponse {
    fn from(result: InferenceResult) -> Self {
        Self {
            metrics: result.timings.into(),
            predictions: result.predictions,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
}

/// Errors a prediction handler can answer with.
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    Inference(InferenceError),
    Batcher(BatcherError),
    Internal(String),
}

impl From<InferenceError> for ApiError {
    fn from(e: InferenceError) -> Self {
        ApiError::Inference(e)
    }
}

impl From<BatcherError> for ApiError {
    fn from(e: BatcherError) -> Self {
        ApiError::Batcher(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", message)
            }
            ApiError::Inference(InferenceError::EmptyBatch) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                InferenceError::EmptyBatch.to_string(),
            ),
            ApiError::Inference(e) => {
                tracing::error!("inference failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "inference_error", e.to_string())
            }
            ApiError::Batcher(BatcherError::EmptyRequest) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                BatcherError::EmptyRequest.to_string(),
            ),
            ApiError::Batcher(BatcherError::Timeout) => (
                StatusCode::REQUEST_TIMEOUT,
                "timeout_error",
                BatcherError::Timeout.to_string(),
            ),
            ApiError::Batcher(BatcherError::Closed) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable_error",
                BatcherError::Closed.to_string(),
            ),
            ApiError::Batcher(e) => {
                tracing::error!("batched prediction failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "inference_error", e.to_string())
            }
            ApiError::Internal(message) => {
                tracing::error!("internal error: {message}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorDetail {
                    message,
                    r#type: kind.to_string(),
                },
            }),
        )
            .into_response()
    }
}

/// Greeting / health endpoint
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "Hello": "World" }))
}

/// Batched prediction endpoint; goes through the request batcher when enabled.
pub async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    validate(&request)?;

    let result = match &state.batcher {
        Some(batcher) => batcher.submit(request.queries).await?,
        None => run_inference(Arc::clone(&state.engine), request.queries).await?,
    };
    Ok(Json(result.into()))
}

/// Prediction endpoint that always calls the engine directly.
pub async fn predict_no_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    validate(&request)?;

    let result = run_inference(Arc::clone(&state.engine), request.queries).await?;
    Ok(Json(result.into()))
}

fn validate(request: &PredictionRequest) -> Result<(), ApiError> {
    if request.queries.is_empty() {
        return Err(ApiError::InvalidRequest(
            "`queries` must contain at least one string".to_string(),
        ));
    }
    Ok(())
}

/// Run the CPU-bound forward pass off the async executor.
async fn run_inference(
    engine: Arc<dyn InferenceEngine>,
    queries: Vec<String>,
) -> Result<InferenceResult, ApiError> {
    tokio::task::spawn_blocking(move || engine.infer(&queries))
        .await
        .map_err(|e| ApiError::Internal(format!("inference task failed: {e}")))?
        .map_err(ApiError::from)
}
