use attention::{KvPair, LayerCache};
use candle_core::{Result, Tensor};
use layers::{
    mlp::{FeedForward, FeedForwardConfig},
    norm::{LayerNorm, NormConfig},
    ActivationKind,
    LinearInit,
    PrecisionPolicy,
};

use crate::{attention::ReflexAttention, config::ModelConfig};

pub(crate) fn build_norm(model_cfg: &ModelConfig) -> Result<LayerNorm> {
    let config = NormConfig::new(model_cfg.n_embd);
    let weight = Tensor::ones(model_cfg.n_embd, model_cfg.dtype, &model_cfg.device)?;
    if model_cfg.bias {
        let bias = Tensor::zeros(model_cfg.n_embd, model_cfg.dtype, &model_cfg.device)?;
        LayerNorm::new(weight, bias, config)
    } else {
        LayerNorm::with_scale(weight, config)
    }
}

/// Decoder block implementing the pre-norm residual layout.
///
/// Attention and feed-forward each run on a normalised view of the running
/// hidden state and are added back residually. The block hands its attention
/// sublayer the cache the stack driver maintains and passes the resulting
/// key/value pair straight back up.
#[derive(Debug)]
pub struct DecoderBlock {
    ln_1: LayerNorm,
    attn: ReflexAttention,
    ln_2: LayerNorm,
    mlp: FeedForward,
    policy: PrecisionPolicy,
}

impl DecoderBlock {
    /// Construct a decoder block from the shared [`ModelConfig`].
    pub fn new(model_cfg: &ModelConfig) -> Result<Self> {
        let ln_1 = build_norm(model_cfg)?;
        let attn = ReflexAttention::new(model_cfg)?;
        let ln_2 = build_norm(model_cfg)?;

        let mut ff_config = FeedForwardConfig::new(
            model_cfg.n_embd,
            4 * model_cfg.n_embd,
            ActivationKind::Gelu,
        );
        ff_config.bias = model_cfg.bias;
        ff_config.dropout_p = model_cfg.dropout;
        let residual_scale = 1.0 / (2.0 * model_cfg.n_layer as f64).sqrt();
        let mlp = FeedForward::with_init(
            ff_config,
            &LinearInit::Normal { std: 0.02 },
            &LinearInit::scaled(LinearInit::Normal { std: 0.02 }, residual_scale),
            &model_cfg.device,
            model_cfg.dtype,
        )?;

        Ok(Self {
            ln_1,
            attn,
            ln_2,
            mlp,
            policy: PrecisionPolicy::from_parameter_dtype(model_cfg.dtype),
        })
    }

    /// Forward pass through the decoder block.
    ///
    /// Returns the transformed hidden state together with the key/value pair
    /// this block's attention projected, for the driver to cache.
    pub fn forward(
        &self,
        hidden: &Tensor,
        cache: &LayerCache,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, KvPair)> {
        let normed = self.ln_1.forward(hidden, &self.policy)?;
        let (attn_out, kv) = self.attn.forward(&normed, cache, mask, train)?;
        let hidden = hidden.add(&attn_out)?;

        let normed = self.ln_2.forward(&hidden, &self.policy)?;
        let mlp_out = self.mlp.forward(&normed, train, &self.policy)?;
        let hidden = hidden.add(&mlp_out)?;

        Ok((hidden, kv))
    }
}
