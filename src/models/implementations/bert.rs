//! BERT encoder with a sequence-classification head.
//!
//! Loads Hugging Face `BertForSequenceClassification` checkpoints such as
//! `nlptown/bert-base-multilingual-uncased-sentiment`:
//! - Learned absolute position embeddings and token type embeddings
//! - Post-norm transformer layers with full bidirectional attention
//! - Tanh pooler over the `[CLS]` token followed by a linear classifier
//!
//! # Quick Start
//! ```rust,no_run
//! use sentiment_serve::models::implementations::bert::BertSentimentModel;
//!
//! let model = BertSentimentModel::load("data/model_sentiment.pt", candle_core::Device::Cpu)?;
//! // let logits = model.forward(&input_ids, &attention_mask)?; // [batch, num_labels]
//! # Ok::<(), sentiment_serve::ModelLoadError>(())
//! ```

use candle_core::{DType, Device, IndexOp, Result, Tensor, D};
use candle_nn::{embedding, linear, ops::softmax, Embedding, LayerNorm, Linear, Module, VarBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::ModelLoadError;
use crate::pipelines::sentiment_analysis_pipeline::SentimentAnalysisModel;

const MIN_VALUE_F64: f64 = f32::MIN as f64;

/// Weight files accepted in a model directory, in order of preference.
pub const WEIGHT_FILES: [&str; 2] = ["model.safetensors", "pytorch_model.bin"];
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    #[default]
    Gelu,
    GeluNew,
    GeluPytorchTanh,
    Relu,
}

impl Module for HiddenAct {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            HiddenAct::Gelu => xs.gelu_erf(),
            HiddenAct::GeluNew | HiddenAct::GeluPytorchTanh => xs.gelu(),
            HiddenAct::Relu => xs.relu(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: u32,
    #[serde(default)]
    pub id2label: HashMap<String, String>,
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl Config {
    /// Number of classifier outputs; `id2label` is authoritative when present.
    pub fn num_labels(&self) -> usize {
        if self.id2label.is_empty() {
            2
        } else {
            self.id2label.len()
        }
    }

    pub fn from_file(path: &Path) -> std::result::Result<Self, ModelLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ModelLoadError::Config {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Older checkpoints name layer norm parameters `gamma`/`beta`.
fn layer_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    let (weight, bias) = match (vb.get(size, "weight"), vb.get(size, "bias")) {
        (Ok(weight), Ok(bias)) => (weight, bias),
        (Err(err), _) | (_, Err(err)) => match (vb.get(size, "gamma"), vb.get(size, "beta")) {
            (Ok(weight), Ok(bias)) => (weight, bias),
            _ => return Err(err),
        },
    };
    Ok(LayerNorm::new(weight, bias, eps))
}

#[derive(Debug, Clone)]
struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    norm: LayerNorm,
    span: tracing::Span,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let word_embeddings = embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("word_embeddings"),
        )?;
        let position_embeddings = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let norm = layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            norm,
            span: tracing::span!(tracing::Level::TRACE, "embeddings"),
        })
    }

    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let seq_len = input_ids.dim(1)?;

        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;
        let token_types = input_ids.zeros_like()?;

        let words = input_ids.apply(&self.word_embeddings)?;
        let positions = positions.apply(&self.position_embeddings)?;
        let token_types = token_types.apply(&self.token_type_embeddings)?;

        words
            .broadcast_add(&positions)?
            .add(&token_types)?
            .apply(&self.norm)
    }
}

#[derive(Debug, Clone)]
struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
    num_attention_heads: usize,
    attention_head_size: usize,
    span: tracing::Span,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let hidden = config.hidden_size;
        let attention_head_size = hidden / config.num_attention_heads;

        Ok(Self {
            query: linear(hidden, hidden, vb.pp("self.query"))?,
            key: linear(hidden, hidden, vb.pp("self.key"))?,
            value: linear(hidden, hidden, vb.pp("self.value"))?,
            output: linear(hidden, hidden, vb.pp("output.dense"))?,
            norm: layer_norm(hidden, config.layer_norm_eps, vb.pp("output.LayerNorm"))?,
            num_attention_heads: config.num_attention_heads,
            attention_head_size,
            span: tracing::span!(tracing::Level::TRACE, "attention"),
        })
    }

    /// (batch, seq, hidden) -> (batch, heads, seq, head_size)
    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        xs.reshape((
            batch,
            seq_len,
            self.num_attention_heads,
            self.attention_head_size,
        ))?
        .transpose(1, 2)?
        .contiguous()
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (batch, seq_len, hidden_size) = hidden_states.dims3()?;

        let q = self.split_heads(&hidden_states.apply(&self.query)?)?;
        let k = self.split_heads(&hidden_states.apply(&self.key)?)?;
        let v = self.split_heads(&hidden_states.apply(&self.value)?)?;

        let scale = (self.attention_head_size as f64).powf(-0.5);
        let q = (q * scale)?;

        let attention_scores = q.matmul(&k.transpose(D::Minus2, D::Minus1)?.contiguous()?)?;
        let attention_scores = attention_scores.broadcast_add(attention_mask)?;
        let attention_probs = softmax(&attention_scores, D::Minus1)?;

        let context = attention_probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, hidden_size))?;

        (context.apply(&self.output)? + hidden_states)?.apply(&self.norm)
    }
}

/// Feed-forward block: intermediate projection, activation, output projection.
#[derive(Debug, Clone)]
struct FeedForward {
    intermediate: Linear,
    output: Linear,
    norm: LayerNorm,
    act: HiddenAct,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        Ok(Self {
            intermediate: linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate.dense"),
            )?,
            output: linear(
                config.intermediate_size,
                config.hidden_size,
                vb.pp("output.dense"),
            )?,
            norm: layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("output.LayerNorm"),
            )?,
            act: config.hidden_act,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let hidden = xs
            .apply(&self.intermediate)?
            .apply(&self.act)?
            .apply(&self.output)?;
        (hidden + xs)?.apply(&self.norm)
    }
}

#[derive(Debug, Clone)]
struct TransformerLayer {
    attention: SelfAttention,
    feed_forward: FeedForward,
    span: tracing::Span,
}

impl TransformerLayer {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        Ok(Self {
            attention: SelfAttention::load(vb.pp("attention"), config)?,
            feed_forward: FeedForward::load(vb, config)?,
            span: tracing::span!(tracing::Level::TRACE, "layer"),
        })
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        self.attention
            .forward(hidden_states, attention_mask)?
            .apply(&self.feed_forward)
    }
}

/// Bare BERT encoder.
#[derive(Debug, Clone)]
pub struct BertModel {
    embeddings: Embeddings,
    layers: Vec<TransformerLayer>,
    dtype: DType,
}

impl BertModel {
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let embeddings = Embeddings::load(vb.pp("embeddings"), config)?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for layer_idx in 0..config.num_hidden_layers {
            layers.push(TransformerLayer::load(
                vb.pp(format!("encoder.layer.{layer_idx}")),
                config,
            )?);
        }

        Ok(Self {
            embeddings,
            layers,
            dtype: vb.dtype(),
        })
    }

    /// Turn a `(batch, seq)` padding mask into an additive `(batch, 1, 1, seq)` bias.
    fn extended_attention_mask(&self, mask: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len) = mask.dims2()?;
        let mask = mask.to_dtype(self.dtype)?.reshape((batch_size, 1, 1, seq_len))?;
        ((1.0 - mask)? * MIN_VALUE_F64)?.to_dtype(self.dtype)
    }

    /// Hidden states with shape `(batch_size, sequence_length, hidden_size)`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let attention_mask = self.extended_attention_mask(attention_mask)?;
        let mut hidden_states = self.embeddings.forward(input_ids)?;
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, &attention_mask)?;
        }
        Ok(hidden_states)
    }
}

/// BERT with pooler and linear classifier on top.
#[derive(Debug, Clone)]
pub struct BertForSequenceClassification {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
}

impl BertForSequenceClassification {
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let bert = BertModel::load(vb.pp("bert"), config)?;
        let pooler = linear(
            config.hidden_size,
            config.hidden_size,
            vb.pp("bert.pooler.dense"),
        )?;
        let classifier = linear(config.hidden_size, config.num_labels(), vb.pp("classifier"))?;
        Ok(Self {
            bert,
            pooler,
            classifier,
        })
    }

    /// Logits with shape `(batch_size, num_labels)`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let hidden_states = self.bert.forward(input_ids, attention_mask)?;
        hidden_states
            .i((.., 0, ..))?
            .apply(&self.pooler)?
            .tanh()?
            .apply(&self.classifier)
    }
}

/// Locate the weights inside a model directory.
pub fn find_weights(model_dir: &Path) -> std::result::Result<PathBuf, ModelLoadError> {
    WEIGHT_FILES
        .iter()
        .map(|name| model_dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| ModelLoadError::MissingArtifact(model_dir.join(WEIGHT_FILES[0])))
}

/// Sentiment classifier loaded from a local `BertForSequenceClassification` directory.
#[derive(Debug, Clone)]
pub struct BertSentimentModel {
    model: BertForSequenceClassification,
    config: Config,
    device: Device,
}

impl BertSentimentModel {
    /// Load `config.json` and the weights from `model_dir` onto `device`.
    pub fn load(
        model_dir: impl AsRef<Path>,
        device: Device,
    ) -> std::result::Result<Self, ModelLoadError> {
        let model_dir = model_dir.as_ref();
        if !model_dir.is_dir() {
            return Err(ModelLoadError::MissingArtifact(model_dir.to_path_buf()));
        }

        let config_path = model_dir.join(CONFIG_FILE);
        if !config_path.is_file() {
            return Err(ModelLoadError::MissingArtifact(config_path));
        }
        let config = Config::from_file(&config_path)?;

        if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0
        {
            return Err(ModelLoadError::Incompatible(format!(
                "hidden size {} is not divisible by {} attention heads",
                config.hidden_size, config.num_attention_heads
            )));
        }

        let weights_path = find_weights(model_dir)?;
        let dtype = DType::F32;
        let vb = if weights_path
            .extension()
            .is_some_and(|ext| ext == "safetensors")
        {
            unsafe { VarBuilder::from_mmaped_safetensors(&[&weights_path], dtype, &device)? }
        } else {
            VarBuilder::from_pth(&weights_path, dtype, &device)?
        };

        let model = BertForSequenceClassification::load(vb, &config)?;

        Ok(Self {
            model,
            config,
            device,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl SentimentAnalysisModel for BertSentimentModel {
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        self.model.forward(input_ids, attention_mask)
    }

    fn num_labels(&self) -> usize {
        self.config.num_labels()
    }

    fn max_sequence_length(&self) -> usize {
        self.config.max_position_embeddings
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn pad_token_id(&self) -> u32 {
        self.config.pad_token_id
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NLPTOWN_CONFIG: &str = r#"{
        "architectures": ["BertForSequenceClassification"],
        "attention_probs_dropout_prob": 0.1,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "hidden_size": 768,
        "id2label": {"0": "1 star", "1": "2 stars", "2": "3 stars", "3": "4 stars", "4": "5 stars"},
        "initializer_range": 0.02,
        "intermediate_size": 3072,
        "layer_norm_eps": 1e-12,
        "max_position_embeddings": 512,
        "model_type": "bert",
        "num_attention_heads": 12,
        "num_hidden_layers": 12,
        "pad_token_id": 0,
        "type_vocab_size": 2,
        "vocab_size": 105879
    }"#;

    #[test]
    fn parses_reference_config() {
        let config: Config = serde_json::from_str(NLPTOWN_CONFIG).unwrap();
        assert_eq!(config.num_labels(), 5);
        assert_eq!(config.max_position_embeddings, 512);
        assert_eq!(config.hidden_act, HiddenAct::Gelu);
        assert_eq!(config.vocab_size, 105879);
    }

    #[test]
    fn config_without_labels_defaults_to_binary() {
        let config: Config = serde_json::from_str(
            r#"{"vocab_size": 10, "hidden_size": 4, "num_hidden_layers": 1,
                "num_attention_heads": 2, "intermediate_size": 8,
                "max_position_embeddings": 16}"#,
        )
        .unwrap();
        assert_eq!(config.num_labels(), 2);
        assert_eq!(config.type_vocab_size, 2);
        assert_eq!(config.pad_token_id, 0);
    }

    #[test]
    fn extended_mask_blocks_padding() -> Result<()> {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let config: Config = serde_json::from_str(
            r#"{"vocab_size": 10, "hidden_size": 4, "num_hidden_layers": 1,
                "num_attention_heads": 2, "intermediate_size": 8,
                "max_position_embeddings": 16}"#,
        )
        .unwrap();
        let model = BertModel::load(vb, &config)?;

        let mask = Tensor::new(&[[1u32, 1, 0]], &device)?;
        let bias = model.extended_attention_mask(&mask)?;
        assert_eq!(bias.dims(), &[1, 1, 1, 3]);

        let values = bias.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], 0.0);
        assert!(values[2] < -1e30);
        Ok(())
    }

    #[test]
    fn missing_directory_is_a_load_error() {
        let err = BertSentimentModel::load("/nonexistent/model_sentiment.pt", Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, ModelLoadError::MissingArtifact(_)));
    }
}
