//! Pull the sentiment model from the Hugging Face Hub

use std::path::PathBuf;

use anyhow::Result;

use crate::config::ArtifactPaths;
use crate::loaders::ArtifactDownloader;

/// Fetch model and tokenizer into `<data_dir>/model_sentiment.pt` and
/// `<data_dir>/tokenizer_sentiment.pt`
pub async fn download(data_dir: PathBuf, repo: String, revision: String) -> Result<()> {
    let paths = ArtifactPaths::new(data_dir);

    println!("Downloading from: {}", repo);

    let (model_dir, tokenizer_dir) = ArtifactDownloader::new(&repo)
        .revision(revision)
        .download(&paths)
        .await?;

    println!("\nModel downloaded to: {}", model_dir.display());
    println!("Tokenizer downloaded to: {}", tokenizer_dir.display());

    Ok(())
}
