use std::path::PathBuf;

use thiserror::Error;

/// Failure while acquiring the model or tokenizer at engine construction.
///
/// Always fatal: an engine that failed to load never serves a request.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    /// A required file or directory does not exist.
    #[error("missing artifact: {0}")]
    MissingArtifact(PathBuf),

    /// The artifact exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `config.json` is not valid JSON or lacks required fields.
    #[error("invalid model config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The weight file is corrupt or does not match the architecture.
    #[error("failed to load model weights: {0}")]
    Weights(#[from] candle_core::Error),

    /// The tokenizer file is corrupt or could not be assembled.
    #[error("failed to load tokenizer: {0}")]
    Tokenizer(String),

    /// Model and tokenizer load fine on their own but cannot be paired.
    #[error("incompatible artifacts: {0}")]
    Incompatible(String),

    /// The requested compute device is unavailable.
    #[error("device unavailable: {0}")]
    Device(String),
}

/// A logits row could not be decoded into one of the fixed labels.
///
/// Cannot happen with a correctly shaped classifier output; surfaces as an
/// internal error and is never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeInvariantError {
    #[error("logits row {row} has {width} classes, expected {expected}")]
    Width {
        row: usize,
        width: usize,
        expected: usize,
    },

    #[error("model returned {rows} logits rows for {expected} queries")]
    Rows { rows: usize, expected: usize },

    #[error("logits row {row} contains NaN")]
    NonFinite { row: usize },

    #[error("class id {class_id} has no label")]
    UnknownClass { class_id: usize },
}

/// Failure during a single `infer` call. No partial results are returned.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("cannot run inference on an empty batch")]
    EmptyBatch,

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("forward pass failed: {0}")]
    Forward(#[from] candle_core::Error),

    #[error("decode invariant violated: {0}")]
    Decode(#[from] DecodeInvariantError),
}
