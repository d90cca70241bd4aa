// bert_layers.rs — BERT forward pass that keeps every hidden state.
//
// candle-transformers' BertModel only returns the last layer, but the pooling
// strategies need all of them (embedding output + each encoder block), so the
// encoder stack is assembled here from candle-nn building blocks. Weight names
// follow the Hugging Face BERT checkpoints, with or without the `bert.` prefix
// and with either `weight/bias` or `gamma/beta` LayerNorm parameters.

use std::path::Path;

use anyhow::{bail, Context};
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{embedding, linear, Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;
use tokenizers::Tokenizer;

use super::text_prep::normalize_utterance;
use super::{load_model_config, load_tokenizer, RawEmbedding, TokenEncoder};
use crate::config;

#[derive(Debug, Clone, Deserialize)]
pub struct LayeredBertConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}

fn default_max_position_embeddings() -> usize {
    config::model::DEFAULT_MAX_POSITION_EMBEDDINGS
}

fn default_type_vocab_size() -> usize {
    config::model::DEFAULT_TYPE_VOCAB_SIZE
}

fn default_layer_norm_eps() -> f64 {
    config::model::DEFAULT_LAYER_NORM_EPS
}

#[derive(Debug, Clone, Copy)]
enum Activation {
    GeluErf,
    GeluTanh,
    Relu,
}

impl Activation {
    fn from_name(name: &str) -> anyhow::Result<Self> {
        match name {
            "gelu" => Ok(Activation::GeluErf),
            "gelu_new" | "gelu_pytorch_tanh" => Ok(Activation::GeluTanh),
            "relu" => Ok(Activation::Relu),
            other => bail!("unsupported hidden_act '{other}'"),
        }
    }

    fn apply(self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Activation::GeluErf => xs.gelu_erf(),
            Activation::GeluTanh => xs.gelu(),
            Activation::Relu => xs.relu(),
        }
    }
}

fn layer_norm(size: usize, eps: f64, vb: VarBuilder) -> candle_core::Result<LayerNorm> {
    let (weight, bias) = match (vb.get(size, "weight"), vb.get(size, "bias")) {
        (Ok(weight), Ok(bias)) => (weight, bias),
        (Err(err), _) | (_, Err(err)) => match (vb.get(size, "gamma"), vb.get(size, "beta")) {
            (Ok(weight), Ok(bias)) => (weight, bias),
            _ => return Err(err),
        },
    };
    Ok(LayerNorm::new(weight, bias, eps))
}

struct Embeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    norm: LayerNorm,
}

impl Embeddings {
    fn load(vb: VarBuilder, cfg: &LayeredBertConfig) -> candle_core::Result<Self> {
        Ok(Self {
            word: embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("word_embeddings"))?,
            position: embedding(cfg.max_position_embeddings, cfg.hidden_size, vb.pp("position_embeddings"))?,
            token_type: embedding(cfg.type_vocab_size, cfg.hidden_size, vb.pp("token_type_embeddings"))?,
            norm: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let xs = self.word.forward(input_ids)?;
        let xs = (xs + self.position.forward(&position_ids)?)?;
        let xs = (xs + self.token_type.forward(&token_type_ids)?)?;
        self.norm.forward(&xs)
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, cfg: &LayeredBertConfig) -> candle_core::Result<Self> {
        let h = cfg.hidden_size;
        let self_vb = vb.pp("self");
        let out_vb = vb.pp("output");
        Ok(Self {
            query: linear(h, h, self_vb.pp("query"))?,
            key: linear(h, h, self_vb.pp("key"))?,
            value: linear(h, h, self_vb.pp("value"))?,
            output: linear(h, h, out_vb.pp("dense"))?,
            norm: layer_norm(h, cfg.layer_norm_eps, out_vb.pp("LayerNorm"))?,
            num_heads: cfg.num_attention_heads,
            head_dim: h / cfg.num_attention_heads,
        })
    }

    // [b, t, h] → [b, heads, t, head_dim]
    fn split_heads(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b, t, _) = xs.dims3()?;
        xs.reshape((b, t, self.num_heads, self.head_dim))?.transpose(1, 2)?.contiguous()
    }

    // A single unpadded utterance: every position attends to every other, no mask.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b, t, h) = xs.dims3()?;
        let q = self.split_heads(&self.query.forward(xs)?)?;
        let k = self.split_heads(&self.key.forward(xs)?)?;
        let v = self.split_heads(&self.value.forward(xs)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q.matmul(&k.t()?)?.affine(scale, 0.0)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let context = probs.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((b, t, h))?;

        let projected = self.output.forward(&context)?;
        self.norm.forward(&(projected + xs)?)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    intermediate: Linear,
    output: Linear,
    norm: LayerNorm,
    activation: Activation,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, cfg: &LayeredBertConfig, activation: Activation) -> candle_core::Result<Self> {
        Ok(Self {
            attention: SelfAttention::load(vb.pp("attention"), cfg)?,
            intermediate: linear(cfg.hidden_size, cfg.intermediate_size, vb.pp("intermediate").pp("dense"))?,
            output: linear(cfg.intermediate_size, cfg.hidden_size, vb.pp("output").pp("dense"))?,
            norm: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("output").pp("LayerNorm"))?,
            activation,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let attended = self.attention.forward(xs)?;
        let inner = self.activation.apply(&self.intermediate.forward(&attended)?)?;
        let out = self.output.forward(&inner)?;
        self.norm.forward(&(out + attended)?)
    }
}

/// BERT encoder returning `num_hidden_layers + 1` hidden states per utterance.
pub struct LayeredBertEncoder {
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
    tokenizer: Tokenizer,
    hidden_size: usize,
    device: Device,
}

impl LayeredBertEncoder {
    /// Load from a directory containing model.safetensors, tokenizer.json and config.json.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let device = Device::Cpu;

        let cfg: LayeredBertConfig = load_model_config(model_dir)?;
        if cfg.num_attention_heads == 0 || cfg.hidden_size % cfg.num_attention_heads != 0 {
            bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                cfg.hidden_size,
                cfg.num_attention_heads
            );
        }
        let activation = Activation::from_name(&cfg.hidden_act)?;

        log::info!(
            "Loading layered BERT: hidden_size={}, layers={}, heads={}, act={}",
            cfg.hidden_size,
            cfg.num_hidden_layers,
            cfg.num_attention_heads,
            cfg.hidden_act,
        );

        let weights_path = model_dir.join(config::model::WEIGHTS_FILE);
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.clone()], DType::F32, &device)
                .with_context(|| format!("load weights from {}", weights_path.display()))?
        };
        // Pre-training checkpoints (e.g. bert-base-uncased) nest everything under `bert.`.
        let vb = if vb.contains_tensor("embeddings.word_embeddings.weight") {
            vb
        } else {
            vb.pp("bert")
        };

        let embeddings = Embeddings::load(vb.pp("embeddings"), &cfg).context("load embedding layer")?;
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| {
                EncoderLayer::load(vb.pp("encoder").pp("layer").pp(i), &cfg, activation)
                    .with_context(|| format!("load encoder layer {i}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let tokenizer = load_tokenizer(model_dir, cfg.max_position_embeddings)?;

        log::info!("Layered BERT loaded ({} hidden states per utterance)", layers.len() + 1);

        Ok(Self {
            embeddings,
            layers,
            tokenizer,
            hidden_size: cfg.hidden_size,
            device,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

impl TokenEncoder for LayeredBertEncoder {
    fn encode_tokens(&self, utterance: &str) -> anyhow::Result<RawEmbedding> {
        let text = normalize_utterance(utterance).context("cannot encode an empty utterance")?;

        // [CLS] ... [SEP]
        let encoding = self
            .tokenizer
            .encode(text.as_str(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        if !encoding.get_overflowing().is_empty() {
            log::warn!("Utterance truncated to {} tokens: '{}'", encoding.len(), text);
        }

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;

        let mut hidden = self.embeddings.forward(&input_ids).context("embedding layer forward")?;
        let mut states = Vec::with_capacity(self.layers.len() + 1);
        states.push(hidden.clone());
        for (i, layer) in self.layers.iter().enumerate() {
            hidden = layer.forward(&hidden).with_context(|| format!("encoder layer {i} forward"))?;
            states.push(hidden.clone());
        }

        RawEmbedding::from_layers(&states)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use candle_transformers::models::bert::{BertModel, Config as BertConfig};

    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg: LayeredBertConfig = serde_json::from_str(
            r#"{"vocab_size": 30522, "hidden_size": 768, "num_hidden_layers": 12,
                "num_attention_heads": 12, "intermediate_size": 3072}"#,
        )
        .unwrap();
        assert_eq!(cfg.hidden_act, "gelu");
        assert_eq!(cfg.max_position_embeddings, 512);
        assert_eq!(cfg.type_vocab_size, 2);
        assert_eq!(cfg.layer_norm_eps, 1e-12);
    }

    #[test]
    fn test_activation_names() {
        assert!(matches!(Activation::from_name("gelu").unwrap(), Activation::GeluErf));
        assert!(matches!(Activation::from_name("gelu_new").unwrap(), Activation::GeluTanh));
        assert!(Activation::from_name("swish").is_err());
    }

    // Checkpoint-shaped tensors for `cfg`, LayerNorm parameters named `norm[0]`/`norm[1]`.
    fn checkpoint(
        cfg: &LayeredBertConfig,
        norm: [&str; 2],
        init: impl Fn(&str, &[usize]) -> Tensor,
    ) -> HashMap<String, Tensor> {
        let (h, i) = (cfg.hidden_size, cfg.intermediate_size);
        let mut shapes: Vec<(String, Vec<usize>)> = vec![
            ("embeddings.word_embeddings.weight".into(), vec![cfg.vocab_size, h]),
            ("embeddings.position_embeddings.weight".into(), vec![cfg.max_position_embeddings, h]),
            ("embeddings.token_type_embeddings.weight".into(), vec![cfg.type_vocab_size, h]),
        ];
        let mut norms = vec!["embeddings.LayerNorm".to_string()];
        for l in 0..cfg.num_hidden_layers {
            let p = format!("encoder.layer.{l}");
            for name in ["query", "key", "value"] {
                shapes.push((format!("{p}.attention.self.{name}.weight"), vec![h, h]));
                shapes.push((format!("{p}.attention.self.{name}.bias"), vec![h]));
            }
            shapes.push((format!("{p}.attention.output.dense.weight"), vec![h, h]));
            shapes.push((format!("{p}.attention.output.dense.bias"), vec![h]));
            shapes.push((format!("{p}.intermediate.dense.weight"), vec![i, h]));
            shapes.push((format!("{p}.intermediate.dense.bias"), vec![i]));
            shapes.push((format!("{p}.output.dense.weight"), vec![h, i]));
            shapes.push((format!("{p}.output.dense.bias"), vec![h]));
            norms.push(format!("{p}.attention.output.LayerNorm"));
            norms.push(format!("{p}.output.LayerNorm"));
        }
        for n in &norms {
            for param in norm {
                shapes.push((format!("{n}.{param}"), vec![h]));
            }
        }
        shapes
            .into_iter()
            .map(|(name, shape)| {
                let t = init(&name, &shape);
                (name, t)
            })
            .collect()
    }

    // Every hidden state, embedding output first.
    fn forward_all(cfg: &LayeredBertConfig, tensors: HashMap<String, Tensor>, ids: &Tensor) -> Vec<Tensor> {
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu);
        let embeddings = Embeddings::load(vb.pp("embeddings"), cfg).unwrap();
        let activation = Activation::from_name(&cfg.hidden_act).unwrap();
        let mut hidden = embeddings.forward(ids).unwrap();
        let mut states = vec![hidden.clone()];
        for l in 0..cfg.num_hidden_layers {
            let layer = EncoderLayer::load(vb.pp("encoder").pp("layer").pp(l), cfg, activation).unwrap();
            hidden = layer.forward(&hidden).unwrap();
            states.push(hidden.clone());
        }
        states
    }

    #[test]
    fn test_forward_shapes_with_gamma_beta_norms() {
        let cfg = LayeredBertConfig {
            vocab_size: 10,
            hidden_size: 4,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 8,
            hidden_act: "gelu".into(),
            max_position_embeddings: 16,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        };
        // All weights zero and gamma one: every state is the LayerNorm of zero, i.e. beta.
        let tensors = checkpoint(&cfg, ["gamma", "beta"], |name, shape| {
            let t = Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap();
            if name.ends_with(".gamma") {
                t.ones_like().unwrap()
            } else {
                t
            }
        });
        let ids = Tensor::new(&[1u32, 5, 2], &Device::Cpu).unwrap().unsqueeze(0).unwrap();

        let states = forward_all(&cfg, tensors, &ids);
        assert_eq!(states[0].dims(), &[1, 3, 4]);
        let raw = RawEmbedding::from_layers(&states).unwrap();
        assert_eq!(raw.num_layers(), 3);
        assert_eq!(raw.num_tokens(), 3);
        assert_eq!(raw.hidden_dim(), 4);

        let last: Vec<Vec<f32>> = raw.layer(2).unwrap().to_vec2().unwrap();
        assert!(last.iter().flatten().all(|x| x.abs() < 1e-4));
    }

    #[test]
    fn test_last_state_matches_candle_transformers_bert() {
        let json = r#"{"vocab_size": 20, "hidden_size": 8, "num_hidden_layers": 2,
            "num_attention_heads": 2, "intermediate_size": 16, "hidden_act": "gelu",
            "hidden_dropout_prob": 0.0, "max_position_embeddings": 16, "type_vocab_size": 2,
            "initializer_range": 0.02, "layer_norm_eps": 1e-12, "pad_token_id": 0,
            "position_embedding_type": "absolute", "use_cache": false,
            "classifier_dropout": null, "model_type": "bert"}"#;
        let cfg: LayeredBertConfig = serde_json::from_str(json).unwrap();
        let reference_cfg: BertConfig = serde_json::from_str(json).unwrap();
        let dev = Device::Cpu;
        let tensors = checkpoint(&cfg, ["weight", "bias"], |_, shape| {
            Tensor::randn(0f32, 0.5, shape, &dev).unwrap()
        });
        let ids = Tensor::new(&[[1u32, 7, 3, 12, 2]], &dev).unwrap();

        let states = forward_all(&cfg, tensors.clone(), &ids);
        assert_eq!(states.len(), 3);

        let reference = BertModel::load(VarBuilder::from_tensors(tensors, DType::F32, &dev), &reference_cfg)
            .unwrap()
            .forward(&ids, &ids.zeros_like().unwrap(), None)
            .unwrap();
        assert_eq!(reference.dims(), &[1, 5, 8]);
        let diff = (&states[2] - &reference)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-4, "max abs diff {diff}");
    }
}
