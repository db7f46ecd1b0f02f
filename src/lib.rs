pub mod batcher;
pub mod cli;
pub mod config;
pub mod core;
pub mod loaders;
pub mod models;
pub mod pipelines;
pub mod server;

// Re-export core types
pub use crate::core::{DecodeInvariantError, InferenceError, ModelLoadError, TimingReport};

// Re-export the engine surface for easier access
pub use models::implementations::BertSentimentModel;
pub use pipelines::{
    InferenceEngine, InferenceResult, SentimentAnalysisPipeline, SentimentAnalysisPipelineBuilder,
    SentimentLabel,
};
