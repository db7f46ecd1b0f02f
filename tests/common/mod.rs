// Shared fixtures for integration tests: a tiny BERT checkpoint written to a
// temp data dir in the same layout the server loads from.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use sentiment_serve::config::ArtifactPaths;
use tempfile::TempDir;

pub const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "the", "movie", "was", "great", "terrible",
    "food", "service", "i", "love", "hate", "it", "ok", "not", "very", "good", "bad", "and",
    "slow", "fast", ".", "!", ",", "?",
];

pub const HIDDEN_SIZE: usize = 8;
pub const INTERMEDIATE_SIZE: usize = 16;
pub const NUM_LAYERS: usize = 2;
pub const NUM_HEADS: usize = 2;
pub const MAX_POSITIONS: usize = 32;
pub const MODEL_VOCAB_SIZE: usize = 40;

/// Shape of the checkpoint written by [`write_model`].
#[derive(Debug, Clone, Copy)]
pub struct TinyBert {
    pub vocab_size: usize,
    pub num_labels: usize,
    /// Name layer norm parameters `gamma`/`beta` like old TF-converted checkpoints.
    pub legacy_layer_norm: bool,
}

impl Default for TinyBert {
    fn default() -> Self {
        Self {
            vocab_size: MODEL_VOCAB_SIZE,
            num_labels: 5,
            legacy_layer_norm: false,
        }
    }
}

/// A temp data dir holding `model_sentiment.pt/` and `tokenizer_sentiment.pt/`.
pub struct Artifacts {
    _dir: TempDir,
    pub paths: ArtifactPaths,
}

pub fn tiny_artifacts() -> anyhow::Result<Artifacts> {
    artifacts_with(TinyBert::default())
}

pub fn artifacts_with(shape: TinyBert) -> anyhow::Result<Artifacts> {
    let dir = tempfile::tempdir()?;
    let paths = ArtifactPaths::new(dir.path());
    write_model(&paths.model_dir(), shape)?;
    write_vocab(&paths.tokenizer_dir(), VOCAB)?;
    Ok(Artifacts { _dir: dir, paths })
}

pub fn write_vocab(dir: &Path, tokens: &[&str]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = std::fs::File::create(dir.join("vocab.txt"))?;
    for token in tokens {
        writeln!(file, "{token}")?;
    }
    std::fs::write(
        dir.join("tokenizer_config.json"),
        r#"{"do_lower_case": true}"#,
    )?;
    Ok(())
}

pub fn write_model(dir: &Path, shape: TinyBert) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;

    let id2label: serde_json::Map<String, serde_json::Value> = (0..shape.num_labels)
        .map(|i| (i.to_string(), serde_json::json!(format!("{} stars", i + 1))))
        .collect();
    let config = serde_json::json!({
        "architectures": ["BertForSequenceClassification"],
        "model_type": "bert",
        "vocab_size": shape.vocab_size,
        "hidden_size": HIDDEN_SIZE,
        "num_hidden_layers": NUM_LAYERS,
        "num_attention_heads": NUM_HEADS,
        "intermediate_size": INTERMEDIATE_SIZE,
        "hidden_act": "gelu",
        "max_position_embeddings": MAX_POSITIONS,
        "type_vocab_size": 2,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "id2label": id2label,
    });
    std::fs::write(
        dir.join("config.json"),
        serde_json::to_string_pretty(&config)?,
    )?;

    let mut weights = Weights {
        legacy_layer_norm: shape.legacy_layer_norm,
        ..Default::default()
    };
    weights.embedding("bert.embeddings.word_embeddings", shape.vocab_size, HIDDEN_SIZE)?;
    weights.embedding("bert.embeddings.position_embeddings", MAX_POSITIONS, HIDDEN_SIZE)?;
    weights.embedding("bert.embeddings.token_type_embeddings", 2, HIDDEN_SIZE)?;
    weights.layer_norm("bert.embeddings.LayerNorm", HIDDEN_SIZE)?;

    for layer in 0..NUM_LAYERS {
        let prefix = format!("bert.encoder.layer.{layer}");
        for name in ["query", "key", "value"] {
            weights.linear(
                &format!("{prefix}.attention.self.{name}"),
                HIDDEN_SIZE,
                HIDDEN_SIZE,
            )?;
        }
        weights.linear(
            &format!("{prefix}.attention.output.dense"),
            HIDDEN_SIZE,
            HIDDEN_SIZE,
        )?;
        weights.layer_norm(&format!("{prefix}.attention.output.LayerNorm"), HIDDEN_SIZE)?;
        weights.linear(
            &format!("{prefix}.intermediate.dense"),
            HIDDEN_SIZE,
            INTERMEDIATE_SIZE,
        )?;
        weights.linear(
            &format!("{prefix}.output.dense"),
            INTERMEDIATE_SIZE,
            HIDDEN_SIZE,
        )?;
        weights.layer_norm(&format!("{prefix}.output.LayerNorm"), HIDDEN_SIZE)?;
    }

    weights.linear("bert.pooler.dense", HIDDEN_SIZE, HIDDEN_SIZE)?;
    weights.linear("classifier", HIDDEN_SIZE, shape.num_labels)?;

    candle_core::safetensors::save(&weights.tensors, dir.join("model.safetensors"))?;
    Ok(())
}

/// Deterministic, non-trivial parameters keyed by their checkpoint names.
#[derive(Default)]
struct Weights {
    tensors: HashMap<String, Tensor>,
    legacy_layer_norm: bool,
}

impl Weights {
    fn filled(&mut self, name: String, shape: Vec<usize>) -> candle_core::Result<()> {
        let seed = self.tensors.len();
        let len: usize = shape.iter().product();
        let values: Vec<f32> = (0..len)
            .map(|i| ((i * 7 + seed * 13 + 1) as f32 * 0.61).sin() * 0.4)
            .collect();
        let tensor = Tensor::from_vec(values, shape, &Device::Cpu)?;
        self.tensors.insert(name, tensor);
        Ok(())
    }

    fn embedding(&mut self, prefix: &str, rows: usize, dim: usize) -> candle_core::Result<()> {
        self.filled(format!("{prefix}.weight"), vec![rows, dim])
    }

    fn linear(&mut self, prefix: &str, in_dim: usize, out_dim: usize) -> candle_core::Result<()> {
        self.filled(format!("{prefix}.weight"), vec![out_dim, in_dim])?;
        self.filled(format!("{prefix}.bias"), vec![out_dim])
    }

    fn layer_norm(&mut self, prefix: &str, size: usize) -> candle_core::Result<()> {
        let (weight, bias) = if self.legacy_layer_norm {
            ("gamma", "beta")
        } else {
            ("weight", "bias")
        };
        self.tensors.insert(
            format!("{prefix}.{weight}"),
            Tensor::ones(size, DType::F32, &Device::Cpu)?,
        );
        self.tensors.insert(
            format!("{prefix}.{bias}"),
            Tensor::zeros(size, DType::F32, &Device::Cpu)?,
        );
        Ok(())
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `n` space separated in-vocabulary words.
pub fn words(n: usize) -> String {
    let pool = ["the", "movie", "was", "great", "and", "the", "food", "not", "slow"];
    (0..n)
        .map(|i| pool[i % pool.len()])
        .collect::<Vec<_>>()
        .join(" ")
}
