// embeddings/ — Utterance → vector, on top of local BERT models (candle, pure Rust).
//
// Provides:
// - Model download + SHA256 verification
// - A layered BERT encoder exposing every hidden state
// - A sentence-transformers encoder (mean pooled, L2 normalized)
// - Pooling strategies reducing layered hidden states to one sentence vector

pub mod bert_layers;
pub mod download;
pub mod engine;
pub mod pooling;
pub mod text_prep;

use std::path::Path;

use anyhow::{bail, Context};
use candle_core::{DType, Tensor};
use tokenizers::{Tokenizer, TruncationParams};

use crate::config;
use pooling::PoolingStrategy;

/// Hidden states of one utterance: `[num_layers, 1, num_tokens, hidden_dim]`.
///
/// Layer 0 is the embedding output, layer `n` the output of encoder block `n`.
#[derive(Debug, Clone)]
pub struct RawEmbedding {
    hidden_states: Tensor,
    num_layers: usize,
    num_tokens: usize,
    hidden_dim: usize,
}

impl RawEmbedding {
    pub fn new(hidden_states: Tensor) -> anyhow::Result<Self> {
        let (num_layers, batch, num_tokens, hidden_dim) = hidden_states
            .dims4()
            .context("hidden states must be [layers, 1, tokens, hidden]")?;
        if batch != 1 {
            bail!("expected a batch of 1 utterance, got {batch}");
        }
        if num_layers == 0 || num_tokens == 0 || hidden_dim == 0 {
            bail!("empty hidden states: layers={num_layers}, tokens={num_tokens}, hidden={hidden_dim}");
        }
        Ok(Self {
            hidden_states: hidden_states.to_dtype(DType::F32)?,
            num_layers,
            num_tokens,
            hidden_dim,
        })
    }

    /// Stack per-layer outputs, each `[1, num_tokens, hidden_dim]`.
    pub fn from_layers(layers: &[Tensor]) -> anyhow::Result<Self> {
        if layers.is_empty() {
            bail!("no hidden layers to stack");
        }
        let stacked = Tensor::stack(layers, 0).context("stack hidden layers")?;
        Self::new(stacked)
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Token embeddings of layer `idx`: `[num_tokens, hidden_dim]`.
    pub fn layer(&self, idx: usize) -> anyhow::Result<Tensor> {
        if idx >= self.num_layers {
            bail!("layer {idx} out of range ({} layers)", self.num_layers);
        }
        Ok(self.hidden_states.get(idx)?.squeeze(0)?)
    }

    /// The full tensor, batch dimension dropped: `[num_layers, num_tokens, hidden_dim]`.
    pub fn layers_by_token(&self) -> anyhow::Result<Tensor> {
        Ok(self.hidden_states.squeeze(1)?)
    }
}

/// A fixed-length sentence vector, only ever used for similarity scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledVector(Vec<f32>);

impl PooledVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Flatten a 1-d tensor.
    pub fn from_tensor(tensor: &Tensor) -> anyhow::Result<Self> {
        let values: Vec<f32> = tensor.to_dtype(DType::F32)?.to_vec1().context("sentence vector must be 1-d")?;
        Ok(Self(values))
    }
}

impl From<Vec<f32>> for PooledVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Encoder returning every hidden layer for an utterance.
pub trait TokenEncoder {
    fn encode_tokens(&self, utterance: &str) -> anyhow::Result<RawEmbedding>;
}

/// Encoder returning a ready-made sentence vector.
pub trait SentenceEncoder {
    fn encode_sentence(&self, utterance: &str) -> anyhow::Result<PooledVector>;
}

/// Turns an utterance into the vector that gets scored.
pub enum Embedder<'a> {
    Layered {
        encoder: &'a dyn TokenEncoder,
        strategy: PoolingStrategy,
    },
    Sentence(&'a dyn SentenceEncoder),
}

impl Embedder<'_> {
    pub fn embed(&self, utterance: &str) -> anyhow::Result<PooledVector> {
        match self {
            Embedder::Layered { encoder, strategy } => {
                let raw = encoder.encode_tokens(utterance)?;
                strategy.pool(&raw)
            }
            Embedder::Sentence(encoder) => encoder.encode_sentence(utterance),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Embedder::Layered { strategy, .. } => format!("layered BERT, {} pooling", strategy.name()),
            Embedder::Sentence(_) => "sentence encoder".to_string(),
        }
    }
}

/// Load `tokenizer.json` with truncation capped at `max_tokens`.
///
/// Truncation happens inside the tokenizer so [CLS]/[SEP] survive on long input.
/// A shorter limit already configured in the file is kept.
pub fn load_tokenizer(model_dir: &Path, max_tokens: usize) -> anyhow::Result<Tokenizer> {
    let tokenizer_path = model_dir.join(config::model::TOKENIZER_FILE);
    let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow::anyhow!("load tokenizer {}: {e}", tokenizer_path.display()))?;

    if let Some(truncation) = tokenizer.get_truncation_mut() {
        truncation.max_length = truncation.max_length.min(max_tokens);
    } else {
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("configure tokenizer truncation: {e}"))?;
    }
    Ok(tokenizer)
}

/// Read and parse `config.json` from a model directory.
pub fn load_model_config<T: serde::de::DeserializeOwned>(model_dir: &Path) -> anyhow::Result<T> {
    let config_path = model_dir.join(config::model::CONFIG_FILE);
    let config_str = std::fs::read_to_string(&config_path)
        .with_context(|| format!("read {}", config_path.display()))?;
    serde_json::from_str(&config_str).with_context(|| format!("parse {}", config_path.display()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use candle_core::{Device, Tensor};

    use super::RawEmbedding;

    /// Build a RawEmbedding where `values[layer][token]` is the token vector.
    pub fn raw(values: &[Vec<Vec<f32>>]) -> RawEmbedding {
        let layers = values.len();
        let tokens = values[0].len();
        let hidden = values[0][0].len();
        let flat: Vec<f32> = values.iter().flatten().flatten().copied().collect();
        let tensor = Tensor::from_vec(flat, (layers, 1, tokens, hidden), &Device::Cpu).unwrap();
        RawEmbedding::new(tensor).unwrap()
    }
}
