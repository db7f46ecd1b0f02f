//! One-shot local prediction

use std::path::PathBuf;

use anyhow::Result;

use crate::config::ArtifactPaths;
use crate::pipelines::utils::DeviceSelectable;
use crate::pipelines::SentimentAnalysisPipelineBuilder;
use crate::server::PredictionResponse;

/// Classify `texts` and print the same JSON body `/predict` would return
pub async fn predict(texts: Vec<String>, data_dir: PathBuf, cpu: bool) -> Result<()> {
    let paths = ArtifactPaths::new(data_dir);

    let response = tokio::task::spawn_blocking(move || -> Result<PredictionResponse> {
        let mut builder = SentimentAnalysisPipelineBuilder::from_artifacts(&paths);
        if cpu {
            builder = builder.cpu();
        }
        let pipeline = builder.build()?;
        let result = pipeline.infer(&texts)?;
        Ok(result.into())
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
