//! CLI commands

mod download;
mod predict;
mod serve;

pub use download::download;
pub use predict::predict;
pub use serve::{serve, ServeOptions};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_MODEL_REPO;

/// Sentiment classification server
#[derive(Parser)]
#[command(name = "sentiment-serve")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load the model and serve predictions over HTTP
    Serve {
        /// Directory holding model_sentiment.pt/ and tokenizer_sentiment.pt/
        #[arg(long, env = "DATA_DIR", default_value = "data")]
        data_dir: PathBuf,

        /// Port to listen on
        #[arg(long, env = "PORT", default_value = "8000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Use CPU instead of GPU
        #[arg(long)]
        cpu: bool,

        /// Call the engine directly on /predict instead of batching requests
        #[arg(long)]
        no_batching: bool,

        /// Flush a batch once it holds this many queries
        #[arg(long, default_value = "32")]
        max_batch_size: usize,

        /// Flush a partial batch after this many milliseconds
        #[arg(long, default_value = "2000")]
        max_latency_ms: u64,

        /// Fail a queued request after this many milliseconds
        #[arg(long, default_value = "30000")]
        idle_timeout_ms: u64,

        /// Abort any request running longer than this many seconds
        #[arg(long, default_value = "300")]
        request_timeout_secs: u64,
    },

    /// Download the model and tokenizer from the Hugging Face Hub
    Download {
        /// Directory to write model_sentiment.pt/ and tokenizer_sentiment.pt/ into
        #[arg(long, env = "DATA_DIR", default_value = "data")]
        data_dir: PathBuf,

        /// Hub repository to fetch
        #[arg(long, default_value = DEFAULT_MODEL_REPO)]
        repo: String,

        /// Git revision (branch, tag or commit)
        #[arg(long, default_value = "main")]
        revision: String,
    },

    /// Classify texts once and print the JSON response
    Predict {
        /// Texts to classify
        #[arg(required = true)]
        texts: Vec<String>,

        /// Directory holding model_sentiment.pt/ and tokenizer_sentiment.pt/
        #[arg(long, env = "DATA_DIR", default_value = "data")]
        data_dir: PathBuf,

        /// Use CPU instead of GPU
        #[arg(long)]
        cpu: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_batches_by_default() {
        let cli = Cli::try_parse_from(["sentiment-serve", "serve", "--data-dir", "d"]).unwrap();
        match cli.command {
            Commands::Serve {
                max_batch_size,
                max_latency_ms,
                idle_timeout_ms,
                no_batching,
                ..
            } => {
                assert_eq!(max_batch_size, 32);
                assert_eq!(max_latency_ms, 2000);
                assert_eq!(idle_timeout_ms, 30000);
                assert!(!no_batching);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn predict_requires_text() {
        assert!(Cli::try_parse_from(["sentiment-serve", "predict"]).is_err());
    }
}
