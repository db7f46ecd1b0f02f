use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentiment_serve::cli::{Cli, Commands, ServeOptions};
use sentiment_serve::config::{ArtifactPaths, BatcherConfig, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentiment_serve=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            data_dir,
            port,
            host,
            cpu,
            no_batching,
            max_batch_size,
            max_latency_ms,
            idle_timeout_ms,
            request_timeout_secs,
        } => {
            let options = ServeOptions {
                artifacts: ArtifactPaths::new(data_dir),
                server: ServerConfig {
                    port,
                    host,
                    request_timeout_secs,
                    ..Default::default()
                },
                batcher: BatcherConfig {
                    enabled: !no_batching,
                    max_batch_size,
                    max_latency_ms,
                    idle_timeout_ms,
                },
                cpu,
            };
            sentiment_serve::cli::serve(options).await?;
        }
        Commands::Download {
            data_dir,
            repo,
            revision,
        } => {
            sentiment_serve::cli::download(data_dir, repo, revision).await?;
        }
        Commands::Predict {
            texts,
            data_dir,
            cpu,
        } => {
            sentiment_serve::cli::predict(texts, data_dir, cpu).await?;
        }
    }

    Ok(())
}
