//! On-disk layout of the model and tokenizer artifacts

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming the artifact base directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Hub repository the artifacts are fetched from.
pub const DEFAULT_MODEL_REPO: &str = "nlptown/bert-base-multilingual-uncased-sentiment";

const DEFAULT_DATA_DIR: &str = "data";
const MODEL_DIR_NAME: &str = "model_sentiment.pt";
const TOKENIZER_DIR_NAME: &str = "tokenizer_sentiment.pt";

/// Locations of the model and tokenizer directories under one base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub data_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Resolve the base directory from `DATA_DIR`, falling back to `data`.
    pub fn from_env() -> Self {
        let data_dir = std::env::var(DATA_DIR_ENV)
            .ok()
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        Self::new(data_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn model_dir(&self) -> PathBuf {
        self.data_dir.join(MODEL_DIR_NAME)
    }

    pub fn tokenizer_dir(&self) -> PathBuf {
        self.data_dir.join(TOKENIZER_DIR_NAME)
    }
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_dirs_live_under_data_dir() {
        let paths = ArtifactPaths::new("/srv/models");
        assert_eq!(paths.model_dir(), PathBuf::from("/srv/models/model_sentiment.pt"));
        assert_eq!(
            paths.tokenizer_dir(),
            PathBuf::from("/srv/models/tokenizer_sentiment.pt")
        );
    }

    #[test]
    fn default_data_dir_is_relative() {
        assert_eq!(ArtifactPaths::default().data_dir(), Path::new("data"));
    }
}
