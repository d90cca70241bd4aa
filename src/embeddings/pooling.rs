// pooling.rs — Reduce layered BERT hidden states to one sentence vector.
//
// Token-level strategies (last-4 concat, last-4 sum, last layer) give one vector
// per token and need a follow-up token reduction (sum or mean). Sentence-level
// strategies (second-to-last mean, mean of layer means) give the vector directly.
//
// Boundary tokens ([CLS]/[SEP]) are dropped by last-4 sum only; every other
// strategy keeps all tokens.

use anyhow::bail;
use candle_core::Tensor;

use super::{PooledVector, RawEmbedding};
use crate::config::filter::LAST_LAYERS;

/// Per-token vectors: `[num_tokens, width]`.
#[derive(Debug, Clone)]
pub struct TokenVectors(Tensor);

impl TokenVectors {
    pub fn new(vectors: Tensor) -> anyhow::Result<Self> {
        let (tokens, width) = vectors.dims2()?;
        if tokens == 0 || width == 0 {
            bail!("no token vectors to pool (tokens={tokens}, width={width})");
        }
        Ok(Self(vectors))
    }

    pub fn num_tokens(&self) -> usize {
        self.0.dims()[0]
    }

    pub fn width(&self) -> usize {
        self.0.dims()[1]
    }

    pub fn as_tensor(&self) -> &Tensor {
        &self.0
    }
}

/// Per token: last, 2nd-last, 3rd-last and 4th-last layer concatenated → `4 × hidden_dim`.
pub fn last_four_concat(raw: &RawEmbedding) -> anyhow::Result<TokenVectors> {
    let layers = raw.num_layers();
    if layers < LAST_LAYERS {
        bail!("last-4 concat needs at least {LAST_LAYERS} layers, got {layers}");
    }
    let picked = (1..=LAST_LAYERS)
        .map(|back| raw.layer(layers - back))
        .collect::<anyhow::Result<Vec<_>>>()?;
    TokenVectors::new(Tensor::cat(&picked, 1)?)
}

/// Per inner token: sum of the last four layers → `hidden_dim`. First and last token dropped.
pub fn last_four_sum(raw: &RawEmbedding) -> anyhow::Result<TokenVectors> {
    let layers = raw.num_layers();
    let tokens = raw.num_tokens();
    if layers < LAST_LAYERS {
        bail!("last-4 sum needs at least {LAST_LAYERS} layers, got {layers}");
    }
    if tokens < 3 {
        bail!("last-4 sum drops boundary tokens and needs at least 3 tokens, got {tokens}");
    }
    let summed = raw
        .layers_by_token()?
        .narrow(0, layers - LAST_LAYERS, LAST_LAYERS)?
        .sum(0)?;
    TokenVectors::new(summed.narrow(0, 1, tokens - 2)?)
}

/// Final layer token embeddings (the encoder's `last_hidden_state`).
pub fn last_layer_tokens(raw: &RawEmbedding) -> anyhow::Result<TokenVectors> {
    TokenVectors::new(raw.layer(raw.num_layers() - 1)?)
}

/// Mean over all tokens of the second-to-last layer.
pub fn second_to_last_mean(raw: &RawEmbedding) -> anyhow::Result<PooledVector> {
    let layers = raw.num_layers();
    if layers < 2 {
        bail!("second-to-last layer mean needs at least 2 layers, got {layers}");
    }
    PooledVector::from_tensor(&raw.layer(layers - 2)?.mean(0)?)
}

/// Token mean of each layer, then the mean of those layer means.
pub fn layer_mean_of_means(raw: &RawEmbedding) -> anyhow::Result<PooledVector> {
    let layer_means = raw.layers_by_token()?.mean(1)?;
    PooledVector::from_tensor(&layer_means.mean(0)?)
}

pub fn token_vector_sum(tokens: &TokenVectors) -> anyhow::Result<PooledVector> {
    PooledVector::from_tensor(&tokens.as_tensor().sum(0)?)
}

pub fn token_vector_mean(tokens: &TokenVectors) -> anyhow::Result<PooledVector> {
    PooledVector::from_tensor(&tokens.as_tensor().mean(0)?)
}

/// How token vectors are reduced to one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenReduction {
    Sum,
    Mean,
}

impl TokenReduction {
    pub fn reduce(self, tokens: &TokenVectors) -> anyhow::Result<PooledVector> {
        log::trace!("{:?} over {} token vectors of width {}", self, tokens.num_tokens(), tokens.width());
        match self {
            TokenReduction::Sum => token_vector_sum(tokens),
            TokenReduction::Mean => token_vector_mean(tokens),
        }
    }
}

/// Sentence pooling policy applied to every utterance of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PoolingStrategy {
    #[default]
    #[value(name = "second-to-last-mean")]
    SecondToLastMean,
    #[value(name = "layer-mean-of-means")]
    LayerMeanOfMeans,
    #[value(name = "last4-concat-sum")]
    Last4ConcatSum,
    #[value(name = "last4-concat-mean")]
    Last4ConcatMean,
    #[value(name = "last4-sum-sum")]
    Last4SumSum,
    #[value(name = "last4-sum-mean")]
    Last4SumMean,
    #[value(name = "last-layer-sum")]
    LastLayerSum,
    #[value(name = "last-layer-mean")]
    LastLayerMean,
}

impl PoolingStrategy {
    pub fn pool(self, raw: &RawEmbedding) -> anyhow::Result<PooledVector> {
        use PoolingStrategy::*;
        let pooled = match self {
            SecondToLastMean => second_to_last_mean(raw),
            LayerMeanOfMeans => layer_mean_of_means(raw),
            Last4ConcatSum => TokenReduction::Sum.reduce(&last_four_concat(raw)?),
            Last4ConcatMean => TokenReduction::Mean.reduce(&last_four_concat(raw)?),
            Last4SumSum => TokenReduction::Sum.reduce(&last_four_sum(raw)?),
            Last4SumMean => TokenReduction::Mean.reduce(&last_four_sum(raw)?),
            LastLayerSum => TokenReduction::Sum.reduce(&last_layer_tokens(raw)?),
            LastLayerMean => TokenReduction::Mean.reduce(&last_layer_tokens(raw)?),
        }?;
        let expected = self.output_len(raw.hidden_dim());
        if pooled.len() != expected {
            bail!("{} produced {} values, expected {}", self.name(), pooled.len(), expected);
        }
        Ok(pooled)
    }

    /// Length of the pooled vector for a model with `hidden_dim` features.
    pub fn output_len(self, hidden_dim: usize) -> usize {
        match self {
            PoolingStrategy::Last4ConcatSum | PoolingStrategy::Last4ConcatMean => LAST_LAYERS * hidden_dim,
            _ => hidden_dim,
        }
    }

    pub fn name(self) -> &'static str {
        use PoolingStrategy::*;
        match self {
            SecondToLastMean => "second-to-last-mean",
            LayerMeanOfMeans => "layer-mean-of-means",
            Last4ConcatSum => "last4-concat-sum",
            Last4ConcatMean => "last4-concat-mean",
            Last4SumSum => "last4-sum-sum",
            Last4SumMean => "last4-sum-mean",
            LastLayerSum => "last-layer-sum",
            LastLayerMean => "last-layer-mean",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;
    use crate::embeddings::test_support::raw;

    // 5 layers, 3 tokens, hidden 2. Token t of layer l = [l, 10 * t].
    fn layered() -> RawEmbedding {
        let layers: Vec<Vec<Vec<f32>>> = (0..5)
            .map(|l| (0..3).map(|t| vec![l as f32, 10.0 * t as f32]).collect())
            .collect();
        raw(&layers)
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn test_last_four_concat_orders_layers_from_last() {
        let tokens = last_four_concat(&layered()).unwrap();
        assert_eq!(tokens.num_tokens(), 3);
        assert_eq!(tokens.width(), 8);
        let rows: Vec<Vec<f32>> = tokens.as_tensor().to_vec2().unwrap();
        assert_eq!(rows[1], vec![4.0, 10.0, 3.0, 10.0, 2.0, 10.0, 1.0, 10.0]);
    }

    #[test]
    fn test_last_four_sum_drops_boundary_tokens() {
        let tokens = last_four_sum(&layered()).unwrap();
        assert_eq!(tokens.num_tokens(), 1);
        assert_eq!(tokens.width(), 2);
        let rows: Vec<Vec<f32>> = tokens.as_tensor().to_vec2().unwrap();
        // layers 1..=4 summed → 10; token 1 → 4 * 10
        assert_eq!(rows, vec![vec![10.0, 40.0]]);
    }

    #[test]
    fn test_last_four_requires_enough_layers_and_tokens() {
        let shallow = raw(&vec![vec![vec![1.0, 1.0]; 3]; 3]);
        assert!(last_four_concat(&shallow).is_err());
        assert!(last_four_sum(&shallow).is_err());

        let short = raw(&vec![vec![vec![1.0, 1.0]; 2]; 4]);
        assert!(last_four_sum(&short).is_err());
        assert!(last_four_concat(&short).is_ok());
    }

    #[test]
    fn test_second_to_last_mean() {
        let v = second_to_last_mean(&layered()).unwrap();
        assert_close(v.as_slice(), &[3.0, 10.0]);

        let single = raw(&[vec![vec![1.0, 2.0]]]);
        assert!(second_to_last_mean(&single).is_err());
    }

    #[test]
    fn test_layer_mean_of_means_uses_every_layer() {
        let v = layer_mean_of_means(&layered()).unwrap();
        // layer means: [l, 10]; mean over l = 0..5 → 2
        assert_close(v.as_slice(), &[2.0, 10.0]);

        let uneven = raw(&[
            vec![vec![0.0, 0.0], vec![2.0, 4.0]],
            vec![vec![4.0, 8.0], vec![6.0, 8.0]],
        ]);
        let v = layer_mean_of_means(&uneven).unwrap();
        assert_close(v.as_slice(), &[3.0, 5.0]);
    }

    #[test]
    fn test_token_vector_sum_and_mean() {
        let tokens = last_layer_tokens(&layered()).unwrap();
        assert_close(token_vector_sum(&tokens).unwrap().as_slice(), &[12.0, 30.0]);
        assert_close(token_vector_mean(&tokens).unwrap().as_slice(), &[4.0, 10.0]);
    }

    #[test]
    fn test_output_lengths_match_strategy() {
        let raw = layered();
        for strategy in PoolingStrategy::value_variants() {
            let v = strategy.pool(&raw).unwrap();
            assert_eq!(v.len(), strategy.output_len(raw.hidden_dim()), "{}", strategy.name());
        }
        assert_eq!(PoolingStrategy::Last4ConcatMean.output_len(768), 3072);
        assert_eq!(PoolingStrategy::SecondToLastMean.output_len(768), 768);
    }

    #[test]
    fn test_pooling_is_deterministic() {
        let raw = layered();
        for strategy in PoolingStrategy::value_variants() {
            assert_eq!(strategy.pool(&raw).unwrap(), strategy.pool(&raw).unwrap());
        }
    }

    #[test]
    fn test_cli_names_match_display_names() {
        for strategy in PoolingStrategy::value_variants() {
            let value = strategy.to_possible_value().unwrap();
            assert_eq!(value.get_name(), strategy.name());
        }
    }
}
