//! Artifact loading for the sentiment model and tokenizer.
//!
//! This module covers both ends of the artifact store:
//! - [`ArtifactDownloader`] - fetches a model repository from the Hugging Face Hub
//!   once and lays it out as `model_sentiment.pt/` and `tokenizer_sentiment.pt/`
//! - [`TokenizerLoader`] - loads the tokenizer back from its local directory,
//!   preferring `tokenizer.json` and falling back to a BERT WordPiece tokenizer
//!   assembled from `vocab.txt`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use sentiment_serve::config::{ArtifactPaths, DEFAULT_MODEL_REPO};
//! use sentiment_serve::loaders::{ArtifactDownloader, TokenizerLoader};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let paths = ArtifactPaths::from_env();
//! ArtifactDownloader::new(DEFAULT_MODEL_REPO).download(&paths).await?;
//! let tokenizer = TokenizerLoader::new(paths.tokenizer_dir()).load()?;
//! # Ok(())
//! # }
//! ```
//!
//! Hub downloads include retry logic for temporary lock acquisition failures.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use tokenizers::decoders::wordpiece::WordPiece as WordPieceDecoder;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::Tokenizer;

use crate::config::ArtifactPaths;
use crate::core::ModelLoadError;
use crate::models::implementations::bert::{CONFIG_FILE, WEIGHT_FILES};

pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const VOCAB_FILE: &str = "vocab.txt";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
const SPECIAL_TOKENS_FILE: &str = "special_tokens_map.json";

#[derive(Debug, Clone)]
pub struct HfLoader {
    pub repo: String,
    pub revision: String,
    pub filename: String,
}

impl HfLoader {
    pub fn new(repo: &str, revision: &str, filename: &str) -> Self {
        Self {
            repo: repo.into(),
            revision: revision.into(),
            filename: filename.into(),
        }
    }

    pub async fn load(&self) -> anyhow::Result<PathBuf> {
        let hf_api = hf_hub::api::tokio::ApiBuilder::new()
            .with_chunk_size(None)
            .build()?;
        let hf_repo = hf_hub::Repo::with_revision(
            self.repo.clone(),
            hf_hub::RepoType::Model,
            self.revision.clone(),
        );
        let hf_api = hf_api.repo(hf_repo);

        // Retry logic for lock acquisition failures
        let max_retries = 3;
        let mut last_error = None;

        for attempt in 0..max_retries {
            match hf_api.get(self.filename.as_str()).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    let error_msg = e.to_string();
                    if error_msg.contains("Lock acquisition failed") && attempt < max_retries - 1 {
                        let wait_time = std::time::Duration::from_millis(100 * (1 << attempt));
                        tracing::warn!(
                            file = %self.filename,
                            attempt,
                            "hub lock busy, retrying in {:?}",
                            wait_time
                        );
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => bail!("no download attempt was made for {}", self.filename),
        }
    }
}

/// Fetches the model and tokenizer files of one hub repository into the
/// local artifact layout.
#[derive(Debug, Clone)]
pub struct ArtifactDownloader {
    pub repo: String,
    pub revision: String,
}

impl ArtifactDownloader {
    pub fn new(repo: &str) -> Self {
        Self {
            repo: repo.into(),
            revision: "main".into(),
        }
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    fn loader(&self, filename: &str) -> HfLoader {
        HfLoader::new(&self.repo, &self.revision, filename)
    }

    /// Download into `paths`, returning the model and tokenizer directories.
    pub async fn download(&self, paths: &ArtifactPaths) -> anyhow::Result<(PathBuf, PathBuf)> {
        let model_dir = paths.model_dir();
        let tokenizer_dir = paths.tokenizer_dir();
        std::fs::create_dir_all(&model_dir)
            .with_context(|| format!("creating {}", model_dir.display()))?;
        std::fs::create_dir_all(&tokenizer_dir)
            .with_context(|| format!("creating {}", tokenizer_dir.display()))?;

        tracing::info!(repo = %self.repo, revision = %self.revision, "downloading model artifacts");

        let config = self.loader(CONFIG_FILE).load().await?;
        copy_into(&config, &model_dir, CONFIG_FILE)?;

        let mut weights_found = false;
        for weights in WEIGHT_FILES {
            match self.loader(weights).load().await {
                Ok(path) => {
                    copy_into(&path, &model_dir, weights)?;
                    weights_found = true;
                    break;
                }
                Err(e) => tracing::debug!(file = weights, "not available: {e}"),
            }
        }
        if !weights_found {
            bail!(
                "model weights not found in {}. Expected one of {:?}",
                self.repo,
                WEIGHT_FILES
            );
        }

        let mut tokenizer_found = false;
        for filename in [
            TOKENIZER_FILE,
            VOCAB_FILE,
            TOKENIZER_CONFIG_FILE,
            SPECIAL_TOKENS_FILE,
        ] {
            match self.loader(filename).load().await {
                Ok(path) => {
                    copy_into(&path, &tokenizer_dir, filename)?;
                    tokenizer_found |= filename == TOKENIZER_FILE || filename == VOCAB_FILE;
                }
                Err(e) => tracing::debug!(file = filename, "not available: {e}"),
            }
        }
        if !tokenizer_found {
            bail!(
                "tokenizer not found in {}. Expected `{TOKENIZER_FILE}` or `{VOCAB_FILE}`",
                self.repo
            );
        }

        tracing::info!(
            model = %model_dir.display(),
            tokenizer = %tokenizer_dir.display(),
            "artifacts ready"
        );
        Ok((model_dir, tokenizer_dir))
    }
}

fn copy_into(source: &Path, dir: &Path, filename: &str) -> anyhow::Result<()> {
    let dest = dir.join(filename);
    std::fs::copy(source, &dest)
        .with_context(|| format!("copying {} to {}", source.display(), dest.display()))?;
    tracing::info!("  downloaded: {filename}");
    Ok(())
}

#[derive(Deserialize)]
struct RawTokenizerConfig {
    #[serde(default = "default_lowercase")]
    do_lower_case: bool,
}

fn default_lowercase() -> bool {
    true
}

/// Loads a tokenizer from a local tokenizer directory.
#[derive(Debug, Clone)]
pub struct TokenizerLoader {
    pub tokenizer_dir: PathBuf,
}

impl TokenizerLoader {
    pub fn new(tokenizer_dir: impl Into<PathBuf>) -> Self {
        Self {
            tokenizer_dir: tokenizer_dir.into(),
        }
    }

    pub fn load(&self) -> Result<Tokenizer, ModelLoadError> {
        let dir = &self.tokenizer_dir;
        if !dir.is_dir() {
            return Err(ModelLoadError::MissingArtifact(dir.clone()));
        }

        let tokenizer_file = dir.join(TOKENIZER_FILE);
        if tokenizer_file.is_file() {
            return Tokenizer::from_file(&tokenizer_file).map_err(|e| {
                ModelLoadError::Tokenizer(format!("{}: {e}", tokenizer_file.display()))
            });
        }

        let vocab_file = dir.join(VOCAB_FILE);
        if vocab_file.is_file() {
            let lowercase = self.read_lowercase()?;
            return bert_wordpiece_tokenizer(&vocab_file, lowercase);
        }

        Err(ModelLoadError::MissingArtifact(tokenizer_file))
    }

    fn read_lowercase(&self) -> Result<bool, ModelLoadError> {
        let path = self.tokenizer_dir.join(TOKENIZER_CONFIG_FILE);
        if !path.is_file() {
            return Ok(default_lowercase());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ModelLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let raw: RawTokenizerConfig = serde_json::from_str(&content)
            .map_err(|source| ModelLoadError::Config { path, source })?;
        Ok(raw.do_lower_case)
    }
}

/// Assemble the standard BERT WordPiece pipeline around a `vocab.txt`.
pub fn bert_wordpiece_tokenizer(
    vocab_file: &Path,
    lowercase: bool,
) -> Result<Tokenizer, ModelLoadError> {
    let vocab = vocab_file
        .to_str()
        .ok_or_else(|| ModelLoadError::Tokenizer(format!("non UTF-8 path {vocab_file:?}")))?;
    let wordpiece = WordPiece::from_file(vocab)
        .unk_token("[UNK]".to_string())
        .build()
        .map_err(|e| ModelLoadError::Tokenizer(format!("{}: {e}", vocab_file.display())))?;

    let mut tokenizer = Tokenizer::new(wordpiece);
    let special_id = |token: &str| {
        tokenizer.token_to_id(token).ok_or_else(|| {
            ModelLoadError::Tokenizer(format!("vocabulary has no `{token}` token"))
        })
    };
    let cls_id = special_id("[CLS]")?;
    let sep_id = special_id("[SEP]")?;

    tokenizer
        .with_normalizer(Some(BertNormalizer::new(
            true,
            true,
            Some(lowercase),
            lowercase,
        )))
        .with_pre_tokenizer(Some(BertPreTokenizer))
        .with_post_processor(Some(BertProcessing::new(
            ("[SEP]".to_string(), sep_id),
            ("[CLS]".to_string(), cls_id),
        )))
        .with_decoder(Some(WordPieceDecoder::default()));

    Ok(tokenizer)
}
