//! HTTP server command

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::batcher::RequestBatcher;
use crate::config::{ArtifactPaths, BatcherConfig, ServerConfig};
use crate::pipelines::utils::DeviceSelectable;
use crate::pipelines::{InferenceEngine, SentimentAnalysisPipelineBuilder};
use crate::server::{self, AppState};

/// Everything `serve` needs, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub artifacts: ArtifactPaths,
    pub server: ServerConfig,
    pub batcher: BatcherConfig,
    pub cpu: bool,
}

/// Load the engine, then serve until Ctrl-C or SIGTERM
pub async fn serve(options: ServeOptions) -> Result<()> {
    // Fail on bad batcher flags before spending time on the model.
    if options.batcher.enabled {
        options.batcher.validate()?;
    }

    let mut builder = SentimentAnalysisPipelineBuilder::from_artifacts(&options.artifacts);
    if options.cpu {
        builder = builder.cpu();
    }

    tracing::info!(data_dir = %options.artifacts.data_dir().display(), "Loading sentiment model");
    let pipeline = tokio::task::spawn_blocking(move || builder.build())
        .await
        .context("model loading task failed")?
        .context("failed to load sentiment model")?;

    let engine: Arc<dyn InferenceEngine> = Arc::new(pipeline);
    let mut state = AppState::new(Arc::clone(&engine));
    let batcher = if options.batcher.enabled {
        let batcher = RequestBatcher::spawn(engine, &options.batcher)?;
        state = state.with_batcher(batcher.clone());
        Some(batcher)
    } else {
        tracing::info!("Request batching disabled");
        None
    };

    let shutdown = async move {
        shutdown_signal().await;
        if let Some(batcher) = batcher {
            batcher.shutdown();
        }
    };

    tracing::info!("Starting server at http://{}", options.server.addr());
    server::start(Arc::new(state), options.server, shutdown).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received shutdown signal, draining connections");
}
