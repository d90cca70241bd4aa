// engine.rs — Candle BERT sentence encoder with attention-mask-aware mean pooling.
//
// Loads a sentence-transformers checkpoint (all-MiniLM-L6-v2 by default) from
// safetensors and produces one L2-normalized vector per utterance. Mean pooling
// runs over non-padding tokens, matching the sentence-transformers reference.

use std::path::Path;

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use super::text_prep::normalize_utterance;
use super::{load_model_config, load_tokenizer, PooledVector, SentenceEncoder};
use crate::config;

/// Holds the loaded sentence model and its tokenizer.
pub struct SentenceEmbeddingEngine {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dims: usize,
}

#[derive(serde::Deserialize)]
struct PositionLimit {
    #[serde(default = "default_max_position_embeddings")]
    max_position_embeddings: usize,
}

fn default_max_position_embeddings() -> usize {
    config::model::DEFAULT_MAX_POSITION_EMBEDDINGS
}

impl SentenceEmbeddingEngine {
    /// Load the model from a local directory containing model.safetensors,
    /// tokenizer.json, and config.json.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let device = Device::Cpu;

        let config: BertConfig = load_model_config(model_dir)?;
        let limit: PositionLimit = load_model_config(model_dir)?;

        log::info!(
            "Loading sentence model: hidden_size={}, layers={}, heads={}",
            config.hidden_size,
            config.num_hidden_layers,
            config.num_attention_heads,
        );

        let weights_path = model_dir.join(config::model::WEIGHTS_FILE);
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.clone()], DType::F32, &device)
                .with_context(|| format!("load weights from {}", weights_path.display()))?
        };

        let model = BertModel::load(vb, &config).context("load BERT model")?;
        let tokenizer = load_tokenizer(model_dir, limit.max_position_embeddings)?;

        log::info!("Sentence model loaded successfully (dims={})", config.hidden_size);

        Ok(Self {
            model,
            tokenizer,
            device,
            dims: config.hidden_size,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

impl SentenceEncoder for SentenceEmbeddingEngine {
    fn encode_sentence(&self, utterance: &str) -> anyhow::Result<PooledVector> {
        let text = normalize_utterance(utterance).context("cannot encode an empty utterance")?;

        let encoding = self
            .tokenizer
            .encode(text.as_str(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let token_ids = encoding.get_ids();
        let attention_mask = encoding.get_attention_mask();
        if !encoding.get_overflowing().is_empty() {
            log::warn!("Utterance truncated to {} tokens: '{}'", token_ids.len(), text);
        }

        // Create tensors [1, seq_len]
        let token_ids_t = Tensor::new(
            token_ids.iter().map(|&id| id as i64).collect::<Vec<_>>().as_slice(),
            &self.device,
        )?
        .unsqueeze(0)?;

        let attention_mask_t = Tensor::new(
            attention_mask.iter().map(|&m| m as i64).collect::<Vec<_>>().as_slice(),
            &self.device,
        )?
        .unsqueeze(0)?;

        let token_type_ids = token_ids_t.zeros_like()?;

        // Forward pass → [1, seq_len, hidden_size]
        let output = self
            .model
            .forward(&token_ids_t, &token_type_ids, Some(&attention_mask_t))?;

        let embedding = mean_pooling(&output, &attention_mask_t)?;
        let embedding = l2_normalize(&embedding)?;

        let vector = PooledVector::from_tensor(&embedding.squeeze(0)?)?;
        if vector.len() != self.dims {
            bail!("unexpected embedding dims: got {}, expected {}", vector.len(), self.dims);
        }
        Ok(vector)
    }
}

/// Attention-mask-aware mean pooling.
///
/// input_embeds: [batch, seq_len, hidden_size]
/// attention_mask: [batch, seq_len] (1 for real tokens, 0 for padding)
/// output: [batch, hidden_size]
fn mean_pooling(input_embeds: &Tensor, attention_mask: &Tensor) -> anyhow::Result<Tensor> {
    // [batch, seq_len] → [batch, seq_len, hidden]
    let mask_expanded = attention_mask
        .to_dtype(DType::F32)?
        .unsqueeze(2)?
        .broadcast_as(input_embeds.shape())?;

    let sum_embeddings = (input_embeds * &mask_expanded)?.sum(1)?;
    let sum_mask = mask_expanded.sum(1)?.clamp(config::model::MASK_SUM_FLOOR, f64::MAX)?;

    Ok((sum_embeddings / sum_mask)?)
}

/// L2 normalize a tensor along the last dimension.
fn l2_normalize(tensor: &Tensor) -> anyhow::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norm = norm.clamp(config::model::NORM_FLOOR, f64::MAX)?;
    Ok(tensor.broadcast_div(&norm)?)
}
