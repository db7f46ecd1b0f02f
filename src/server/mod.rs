//! HTTP server for sentiment predictions
//!
//! Exposes the inference engine over a small JSON API.

mod handlers;
mod routes;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

pub use handlers::{
    ApiError, AppState, ErrorDetail, ErrorResponse, Metrics, PredictionRequest,
    PredictionResponse,
};
pub use routes::api_routes;

/// Build the full application router with middleware applied
pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let mut app = Router::new()
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(TraceLayer::new_for_http());

    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app.with_state(state)
}

/// Start the HTTP server and run until `shutdown` resolves
pub async fn start<F>(state: Arc<AppState>, config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, &config);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  / - Greeting");
    tracing::info!("  POST /predict - Batched sentiment prediction");
    tracing::info!("  POST /predictNoBatcher - Direct sentiment prediction");
    tracing::info!("  POST /predict_no_batch - Direct sentiment prediction");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
