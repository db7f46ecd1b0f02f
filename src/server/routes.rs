//! Route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{predict, predict_no_batch, root, AppState};

/// Create the API router
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Greeting / health check
        .route("/", get(root))
        // Batched predictions
        .route("/predict", post(predict))
        // Direct engine calls, never batched across requests
        .route("/predictNoBatcher", post(predict_no_batch))
        .route("/predict_no_batch", post(predict_no_batch))
}
