use attention::masks::build_causal_mask;
use attention::{AttentionMode, LayerCache};
use candle_core::{DType, Error, Result, Tensor};
use candle_nn::{loss, Dropout};
use embedding::{
    PositionEmbedding, PositionEmbeddingConfig, TokenEmbedding, TokenEmbeddingConfig,
};
use layers::{norm::LayerNorm, PrecisionPolicy};

use crate::{
    block::{build_norm, DecoderBlock},
    config::ModelConfig,
};

/// Decoder-only transformer assembled from the shared crates.
///
/// The per-layer key/value cache is an implementation detail of
/// [`Gpt::forward`]: it is created empty for each pass, threaded through the
/// blocks in layer order under reflex mode, and dropped when the pass ends.
pub struct Gpt {
    config: ModelConfig,
    token_embedding: TokenEmbedding,
    position_embedding: PositionEmbedding,
    embed_dropout: Dropout,
    blocks: Vec<DecoderBlock>,
    final_norm: LayerNorm,
    policy: PrecisionPolicy,
}

impl Gpt {
    /// Builds the model and its component blocks according to `config`.
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let policy = PrecisionPolicy::from_parameter_dtype(config.dtype);

        let token_embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size: config.vocab_size,
            hidden_dim: config.n_embd,
            dtype: config.dtype,
            device: config.device.clone(),
        })?;
        let position_embedding = PositionEmbedding::new(PositionEmbeddingConfig {
            max_positions: config.block_size,
            hidden_dim: config.n_embd,
            dtype: config.dtype,
            device: config.device.clone(),
        })?;
        let embed_dropout = Dropout::new(config.dropout);

        let mut blocks = Vec::with_capacity(config.n_layer);
        for _ in 0..config.n_layer {
            blocks.push(DecoderBlock::new(&config)?);
        }

        let final_norm = build_norm(&config)?;

        let model = Self {
            config,
            token_embedding,
            position_embedding,
            embed_dropout,
            blocks,
            final_norm,
            policy,
        };
        log::info!(
            "model initialised: {:.2}M parameters ({:.2}M non-embedding)",
            model.num_parameters(false) as f64 / 1e6,
            model.num_parameters(true) as f64 / 1e6
        );
        Ok(model)
    }

    /// Returns the model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of parameters in the model.
    ///
    /// The readout is tied to the token table, so its weights are counted
    /// once. With `non_embedding` set, the position table is excluded; the
    /// token table stays included because the tie makes it double as the
    /// output projection.
    pub fn num_parameters(&self, non_embedding: bool) -> usize {
        let cfg = &self.config;
        let bias = |features: usize| if cfg.bias { features } else { 0 };
        let norm = cfg.n_embd + bias(cfg.n_embd);

        let token_table = cfg.vocab_size * cfg.n_embd;
        let position_table = cfg.block_size * cfg.n_embd;

        let qkv = cfg.n_embd * 3 * cfg.n_embd + bias(3 * cfg.n_embd);
        let out_proj = cfg.n_embd * cfg.n_embd + bias(cfg.n_embd);
        let mlp = cfg.n_embd * 4 * cfg.n_embd
            + bias(4 * cfg.n_embd)
            + 4 * cfg.n_embd * cfg.n_embd
            + bias(cfg.n_embd);
        let per_block = 2 * norm + qkv + out_proj + mlp;

        let mut total = token_table + position_table + cfg.n_layer * per_block + norm;
        if non_embedding {
            total -= position_table;
        }
        total
    }

    /// Produces logits shaped `(batch, seq, vocab)` and, when `targets` is
    /// supplied, the mean cross-entropy loss over every position.
    ///
    /// `train` gates every dropout site; with it unset the pass is
    /// deterministic.
    pub fn forward(
        &self,
        token_ids: &Tensor,
        targets: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (batch, seq) = token_ids.dims2()?;
        if seq > self.config.block_size {
            return Err(Error::Msg(format!(
                "cannot forward sequence of length {seq}, block size is only {}",
                self.config.block_size
            )));
        }

        let tok_emb = self.token_embedding.forward(token_ids)?;
        let pos_emb = self.position_embedding.forward(seq)?;
        let pos_emb = pos_emb.unsqueeze(0)?.broadcast_as(tok_emb.shape())?;
        let summed = tok_emb.add(&pos_emb)?;
        let mut hidden = if train && self.config.dropout > 0.0 {
            self.embed_dropout.forward(&summed, train)?
        } else {
            summed
        };

        let mask = build_causal_mask(&self.config.device, batch, 1, seq, seq)?;

        // The cache lives exactly as long as this pass. Each block reads the
        // window its predecessors filled, then contributes its own pair;
        // `push` evicts the oldest entry once two layers are held.
        let mut cache = LayerCache::new();
        let reflex = matches!(self.config.attention_mode, AttentionMode::Reflex);
        for block in &self.blocks {
            let (next, kv) = block.forward(&hidden, &cache, Some(&mask), train)?;
            hidden = next;
            if reflex {
                cache.push(kv);
            }
        }

        let normalized = self.final_norm.forward(&hidden, &self.policy)?;
        let logits = self.token_embedding.linear_out(&normalized)?;

        let loss = match targets {
            Some(targets) => {
                let logits_flat =
                    logits.reshape((batch * seq, self.config.vocab_size))?;
                let targets_flat = targets.reshape(batch * seq)?.to_dtype(DType::U32)?;
                Some(loss::cross_entropy(&logits_flat, &targets_flat)?)
            }
            None => None,
        };

        Ok((logits, loss))
    }

    /// Completes `context` by `max_new_tokens` sampled tokens using default
    /// sampling parameters (temperature 1.0, unrestricted distribution).
    pub fn generate(&self, context: &Tensor, max_new_tokens: usize) -> Result<Tensor> {
        self.generate_with_sampling(context, max_new_tokens, 1.0, None, None)
    }

    /// Completes `context` token by token, feeding each prediction back in.
    ///
    /// The context is cropped to the last `block_size` tokens before every
    /// step. Logits are scaled by `temperature`, optionally restricted to the
    /// `top_k` highest-scoring tokens and the smallest nucleus exceeding
    /// `top_p`, then sampled. Dropout is always disabled here.
    pub fn generate_with_sampling(
        &self,
        context: &Tensor,
        max_new_tokens: usize,
        temperature: f64,
        top_k: Option<usize>,
        top_p: Option<f64>,
    ) -> Result<Tensor> {
        let mut sequence = context.clone();

        for _ in 0..max_new_tokens {
            let (_, seq_len) = sequence.dims2()?;
            let model_input = if seq_len > self.config.block_size {
                let start = seq_len - self.config.block_size;
                sequence.narrow(1, start, self.config.block_size)?
            } else {
                sequence.clone()
            };

            let (logits, _) = self.forward(&model_input, None, false)?;
            let last_logits = logits.narrow(1, logits.dim(1)? - 1, 1)?.squeeze(1)?;

            let next_token = sample_next_token(&last_logits, temperature, top_k, top_p)?;
            sequence = Tensor::cat(&[sequence, next_token], 1)?;
        }

        Ok(sequence)
    }
}

fn sample_next_token(
    logits: &Tensor,
    temperature: f64,
    top_k: Option<usize>,
    top_p: Option<f64>,
) -> Result<Tensor> {
    let (batch, _) = logits.dims2()?;
    let device = logits.device();
    let rows = logits.to_dtype(DType::F32)?.to_vec2::<f32>()?;

    let mut sampled = Vec::with_capacity(batch);
    for row in rows.iter() {
        let index = sample_from_logits_row(row, temperature, top_k, top_p);
        sampled.push(index as u32);
    }

    Tensor::from_vec(sampled, (batch, 1), device)
}

fn sample_from_logits_row(
    logits: &[f32],
    temperature: f64,
    top_k: Option<usize>,
    top_p: Option<f64>,
) -> usize {
    if logits.is_empty() {
        return 0;
    }

    // Zero temperature degenerates to greedy decoding.
    if temperature <= 0.0 {
        return argmax(logits);
    }

    let inv_temp = (1.0 / temperature.max(1e-4)) as f32;
    let mut adjusted: Vec<f32> = logits.iter().map(|&logit| logit * inv_temp).collect();

    if let Some(mut k) = top_k {
        if k == 0 {
            k = 1;
        }
        if k < adjusted.len() {
            let mut indices: Vec<usize> = (0..adjusted.len()).collect();
            indices.sort_unstable_by(|a, b| {
                adjusted[*b]
                    .partial_cmp(&adjusted[*a])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for &index in indices.iter().skip(k) {
                adjusted[index] = f32::NEG_INFINITY;
            }
        }
    }

    let max_logit = adjusted.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut exp_values = Vec::with_capacity(adjusted.len());
    let mut sum = 0.0f32;
    for &logit in &adjusted {
        let value = if logit.is_finite() {
            (logit - max_logit).exp()
        } else {
            0.0
        };
        exp_values.push(value);
        sum += value;
    }

    if sum <= f32::EPSILON {
        return fastrand::usize(0..adjusted.len());
    }

    let mut probabilities: Vec<f32> = exp_values.iter().map(|value| value / sum).collect();

    if let Some(p_threshold) = top_p {
        let mut pairs: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let mut cumulative = 0.0f32;
        let mut allowed = vec![false; probabilities.len()];
        for (index, prob) in pairs {
            cumulative += prob;
            allowed[index] = true;
            if cumulative >= p_threshold as f32 {
                break;
            }
        }

        for (index, prob) in probabilities.iter_mut().enumerate() {
            if !allowed[index] {
                *prob = 0.0;
            }
        }

        let renorm: f32 = probabilities.iter().sum();
        if renorm > f32::EPSILON {
            for prob in probabilities.iter_mut() {
                *prob /= renorm;
            }
        }
    }

    let sample = fastrand::f32();
    let mut cumulative = 0.0f32;
    for (index, prob) in probabilities.iter().enumerate() {
        cumulative += *prob;
        if sample <= cumulative {
            return index;
        }
    }

    argmax(&probabilities)
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(index, _)| index)
        .unwrap_or(0)
}
