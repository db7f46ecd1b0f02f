use candle_core::{Device, Tensor};

/// A sequence classifier the sentiment pipeline can drive.
///
/// Implementations are immutable after loading and must tolerate concurrent
/// `forward` calls from several request threads.
pub trait SentimentAnalysisModel: Send + Sync {
    /// Map `input_ids` and `attention_mask`, both `(batch, seq)` `u32`, to
    /// logits of shape `(batch, num_labels)`.
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor>;

    fn num_labels(&self) -> usize;

    /// Longest token sequence the model accepts; longer inputs are truncated.
    fn max_sequence_length(&self) -> usize;

    fn vocab_size(&self) -> usize;

    fn pad_token_id(&self) -> u32;

    fn device(&self) -> &Device;
}
