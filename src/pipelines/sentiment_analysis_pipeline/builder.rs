use std::path::PathBuf;
use std::time::Instant;

use super::pipeline::SentimentAnalysisPipeline;
use crate::config::ArtifactPaths;
use crate::core::ModelLoadError;
use crate::loaders::TokenizerLoader;
use crate::models::implementations::bert::BertSentimentModel;
use crate::pipelines::utils::{DeviceRequest, DeviceSelectable};

/// Builder for a BERT sentiment pipeline read from local artifact directories.
///
/// Start with [`bert`](Self::bert) or [`from_artifacts`](Self::from_artifacts),
/// optionally pick a device (`.cpu()`, `.cuda_device(i)`, `.device(d)`), then
/// call `.build()`.
#[derive(Debug, Clone)]
pub struct SentimentAnalysisPipelineBuilder {
    model_dir: PathBuf,
    tokenizer_dir: PathBuf,
    device_request: DeviceRequest,
}

impl SentimentAnalysisPipelineBuilder {
    pub fn bert(model_dir: impl Into<PathBuf>, tokenizer_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            tokenizer_dir: tokenizer_dir.into(),
            device_request: DeviceRequest::Default,
        }
    }

    /// Use `model_sentiment.pt/` and `tokenizer_sentiment.pt/` under the data dir.
    pub fn from_artifacts(paths: &ArtifactPaths) -> Self {
        Self::bert(paths.model_dir(), paths.tokenizer_dir())
    }

    /// Load model and tokenizer once. The elapsed time becomes the reported
    /// model load time for the lifetime of the pipeline.
    pub fn build(self) -> Result<SentimentAnalysisPipeline<BertSentimentModel>, ModelLoadError> {
        let start = Instant::now();

        let device = self.device_request.resolve()?;
        let model = BertSentimentModel::load(&self.model_dir, device)?;
        let tokenizer = TokenizerLoader::new(&self.tokenizer_dir).load()?;
        let pipeline = SentimentAnalysisPipeline::from_parts(model, tokenizer, start.elapsed())?;

        tracing::info!(
            model = %self.model_dir.display(),
            tokenizer = %self.tokenizer_dir.display(),
            device = ?pipeline.device(),
            model_load_ms = pipeline.model_load_ms(),
            "sentiment model loaded"
        );

        Ok(pipeline)
    }
}

impl DeviceSelectable for SentimentAnalysisPipelineBuilder {
    fn device_request_mut(&mut self) -> &mut DeviceRequest {
        &mut self.device_request
    }
}
