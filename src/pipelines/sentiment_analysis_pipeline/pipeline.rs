use std::time::Duration;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::labels::{decode_logits, SentimentLabel};
use super::model::SentimentAnalysisModel;
use crate::core::timing::PhaseClock;
use crate::core::{duration_to_ms, DecodeInvariantError, InferenceError, ModelLoadError, TimingReport};

/// Token ids and attention mask for one request, both `(batch, max_len)`.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
}

impl EncodedBatch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.dims().get(1).copied().unwrap_or(0)
    }
}

/// Labels for every query, in input order, plus the latency breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub predictions: Vec<SentimentLabel>,
    pub timings: TimingReport,
}

/// Owns a classifier and its tokenizer and turns batches of raw text into labels.
///
/// Immutable once built; share it across request handlers behind an `Arc`.
pub struct SentimentAnalysisPipeline<M: SentimentAnalysisModel> {
    pub(crate) model: M,
    pub(crate) tokenizer: Tokenizer,
    pub(crate) model_load_ms: u64,
}

impl<M: SentimentAnalysisModel> SentimentAnalysisPipeline<M> {
    /// Pair an already loaded model and tokenizer.
    ///
    /// Configures batch-longest padding and truncation to the model's maximum
    /// sequence length, and checks the two can work together.
    pub fn from_parts(
        model: M,
        mut tokenizer: Tokenizer,
        model_load_time: Duration,
    ) -> Result<Self, ModelLoadError> {
        if model.num_labels() != SentimentLabel::COUNT {
            return Err(ModelLoadError::Incompatible(format!(
                "classifier has {} labels, expected {}",
                model.num_labels(),
                SentimentLabel::COUNT
            )));
        }

        let tokenizer_vocab = tokenizer.get_vocab_size(true);
        if tokenizer_vocab > model.vocab_size() {
            return Err(ModelLoadError::Incompatible(format!(
                "tokenizer vocabulary ({tokenizer_vocab}) exceeds model vocabulary ({})",
                model.vocab_size()
            )));
        }

        let max_length = model.max_sequence_length();
        if max_length == 0 {
            return Err(ModelLoadError::Incompatible(
                "model accepts no input tokens".to_string(),
            ));
        }

        let pad_id = model.pad_token_id();
        let pp = PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            pad_id,
            pad_token: tokenizer
                .id_to_token(pad_id)
                .unwrap_or_else(|| "[PAD]".to_string()),
            ..Default::default()
        };
        tokenizer.with_padding(Some(pp));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| ModelLoadError::Tokenizer(e.to_string()))?;

        Ok(Self {
            model,
            tokenizer,
            model_load_ms: duration_to_ms(model_load_time),
        })
    }

    /// Tokenize a batch into rectangular id and mask tensors.
    pub fn encode<S: AsRef<str>>(&self, queries: &[S]) -> Result<EncodedBatch, InferenceError> {
        let inputs: Vec<&str> = queries.iter().map(AsRef::as_ref).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| InferenceError::Tokenization(e.to_string()))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map_or(0, |e| e.len());
        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            if encoding.len() != seq_len {
                return Err(InferenceError::Tokenization(format!(
                    "ragged batch: expected {seq_len} tokens, got {}",
                    encoding.len()
                )));
            }
            input_ids.extend_from_slice(encoding.get_ids());
            attention_mask.extend_from_slice(encoding.get_attention_mask());
        }

        let device = self.model.device();
        Ok(EncodedBatch {
            input_ids: Tensor::from_vec(input_ids, (batch_size, seq_len), device)?,
            attention_mask: Tensor::from_vec(attention_mask, (batch_size, seq_len), device)?,
        })
    }

    /// Classify every query; `predictions[i]` belongs to `queries[i]`.
    pub fn infer<S: AsRef<str>>(&self, queries: &[S]) -> Result<InferenceResult, InferenceError> {
        if queries.is_empty() {
            return Err(InferenceError::EmptyBatch);
        }

        let mut clock = PhaseClock::start();
        let batch = self.encode(queries)?;
        clock.mark_tokenized();

        let logits = self
            .model
            .forward(&batch.input_ids, &batch.attention_mask)?
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?;
        let timings = clock.finish(self.model_load_ms);

        if logits.len() != queries.len() {
            return Err(DecodeInvariantError::Rows {
                rows: logits.len(),
                expected: queries.len(),
            }
            .into());
        }
        let predictions = decode_logits(&logits)?;

        tracing::debug!(
            batch_size = batch.batch_size(),
            seq_len = batch.seq_len(),
            tokenize_ms = timings.tokenize_ms,
            inference_ms = timings.inference_ms,
            total_ms = timings.total_ms,
            "inference complete"
        );

        Ok(InferenceResult {
            predictions,
            timings,
        })
    }

    /// Wall-clock time spent building the pipeline, in milliseconds.
    pub fn model_load_ms(&self) -> u64 {
        self.model_load_ms
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn device(&self) -> &Device {
        self.model.device()
    }
}
