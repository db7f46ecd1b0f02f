pub mod sentiment_analysis_pipeline;
pub mod utils;

use crate::core::InferenceError;

pub use sentiment_analysis_pipeline::*;

/// Object-safe view of a loaded pipeline, shared by the server and batcher.
pub trait InferenceEngine: Send + Sync {
    fn infer(&self, queries: &[String]) -> Result<InferenceResult, InferenceError>;

    fn model_load_ms(&self) -> u64;
}

impl<M: SentimentAnalysisModel> InferenceEngine for SentimentAnalysisPipeline<M> {
    fn infer(&self, queries: &[String]) -> Result<InferenceResult, InferenceError> {
        SentimentAnalysisPipeline::infer(self, queries)
    }

    fn model_load_ms(&self) -> u64 {
        SentimentAnalysisPipeline::model_load_ms(self)
    }
}
