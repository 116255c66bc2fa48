//! Multi-head attention with optional cross-layer head groups.
//!
//! The module owns the fused QKV projection and the output projection for one
//! decoder block and orchestrates the attention kernel once per head group.
//! Under [`AttentionMode::Standard`], or while the layer cache is still
//! warming up, every head attends over the block's own projections. Once two
//! earlier layers are cached under [`AttentionMode::Reflex`], the configured
//! head partition routes a minority of heads to those layers' keys and
//! values instead. The causal mask applies positionally to every group —
//! reading an older layer never widens the visible prefix.

use attention::reference::ExactAttention;
use attention::{
    Attention, AttentionError, AttentionMode, Config as KernelConfig, HeadPartition, KvPair,
    KvSource, LayerCache,
};
use candle_core::{bail, Error, Result, Tensor};
use candle_nn::ops::dropout;
use layers::{
    checks,
    linear::{Linear, LinearConfig, LinearInit},
    PrecisionPolicy,
};

use crate::config::ModelConfig;

/// Attention core for one decoder block.
///
/// Every forward call returns the block's output together with the full
/// head-range key/value pair it projected, for the stack driver to offer to
/// the layer cache.
pub struct ReflexAttention {
    n_embd: usize,
    n_head: usize,
    head_dim: usize,
    mode: AttentionMode,
    partition: Option<HeadPartition>,
    qkv_proj: Linear,
    out_proj: Linear,
    kernel: ExactAttention,
    dropout_p: f32,
    policy: PrecisionPolicy,
}

impl std::fmt::Debug for ReflexAttention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflexAttention")
            .field("n_embd", &self.n_embd)
            .field("n_head", &self.n_head)
            .field("head_dim", &self.head_dim)
            .field("mode", &self.mode)
            .finish()
    }
}

impl ReflexAttention {
    /// Construct the attention core from the shared [`ModelConfig`].
    ///
    /// Under reflex mode the head partition is resolved here, so a head count
    /// without a table entry fails construction rather than a later forward.
    pub fn new(model_cfg: &ModelConfig) -> Result<Self> {
        let partition = match model_cfg.attention_mode {
            AttentionMode::Standard => None,
            AttentionMode::Reflex => Some(
                HeadPartition::new(model_cfg.partition_variant, model_cfg.n_head)
                    .map_err(|e| Error::Msg(e.to_string()))?,
            ),
        };

        let mut qkv_config = LinearConfig::new(model_cfg.n_embd, model_cfg.n_embd);
        qkv_config.bias = model_cfg.bias;
        qkv_config.fused_projections = 3;
        let qkv_proj = Linear::with_init(
            qkv_config,
            &LinearInit::Normal { std: 0.02 },
            &model_cfg.device,
            model_cfg.dtype,
        )?;

        let mut out_config = LinearConfig::new(model_cfg.n_embd, model_cfg.n_embd);
        out_config.bias = model_cfg.bias;
        let residual_scale = 1.0 / (2.0 * model_cfg.n_layer as f64).sqrt();
        let out_proj = Linear::with_init(
            out_config,
            &LinearInit::scaled(LinearInit::Normal { std: 0.02 }, residual_scale),
            &model_cfg.device,
            model_cfg.dtype,
        )?;

        Ok(Self {
            n_embd: model_cfg.n_embd,
            n_head: model_cfg.n_head,
            head_dim: model_cfg.head_dim(),
            mode: model_cfg.attention_mode,
            partition,
            qkv_proj,
            out_proj,
            kernel: ExactAttention::new(),
            dropout_p: model_cfg.dropout,
            policy: PrecisionPolicy::from_parameter_dtype(model_cfg.dtype),
        })
    }

    /// The mode this core was configured with.
    pub fn mode(&self) -> AttentionMode {
        self.mode
    }

    fn expand_to_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = tensor.dims3()?;
        let reshaped = tensor
            .contiguous()?
            .reshape((batch, seq, self.n_head, self.head_dim))?;
        reshaped.permute((0, 2, 1, 3))?.contiguous()
    }

    fn merge_from_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let dims = tensor.dims();
        if dims.len() != 4 {
            bail!(
                "attention output expected [batch, heads, seq, head_dim] got {:?}",
                dims
            );
        }
        let batch = dims[0];
        let seq = dims[2];
        let permuted = tensor.permute((0, 2, 1, 3))?.contiguous()?;
        permuted.reshape((batch, seq, self.n_embd))
    }

    /// Forward pass for one block's attention sublayer.
    ///
    /// `x` is the normalised block input, `cache` the window of earlier
    /// layers' pairs maintained by the stack driver, and `mask` the shared
    /// additive causal mask (head axis 1, broadcast over every group).
    /// Dropout runs only when `train` is set.
    pub fn forward(
        &self,
        x: &Tensor,
        cache: &LayerCache,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, KvPair)> {
        checks::expect_batch_seq_hidden("attention.input", x, self.n_embd)?;

        let qkv = self.qkv_proj.forward(x, &self.policy)?;
        let q = qkv.narrow(2, 0, self.n_embd)?;
        let k = qkv.narrow(2, self.n_embd, self.n_embd)?;
        let v = qkv.narrow(2, 2 * self.n_embd, self.n_embd)?;

        let q_heads = self.expand_to_heads(&q)?;
        let k_heads = self.expand_to_heads(&k)?;
        let v_heads = self.expand_to_heads(&v)?;

        // The pair offered to the cache spans the full head range, before any
        // group split.
        let kv = KvPair::new(k_heads.clone(), v_heads.clone())
            .map_err(|e| Error::Msg(e.to_string()))?;

        let groups = match &self.partition {
            Some(partition) => partition.plan(cache.len()),
            None => vec![attention::HeadGroup {
                start: 0,
                end: self.n_head,
                source: KvSource::Current,
            }],
        };

        let kernel_config = KernelConfig {
            dropout_p: if train && self.dropout_p > 0.0 {
                Some(self.dropout_p)
            } else {
                None
            },
        };

        let mut group_outputs = Vec::with_capacity(groups.len());
        for group in &groups {
            let q_group = q_heads.narrow(1, group.start, group.len())?.contiguous()?;
            let (k_source, v_source) = match group.source {
                KvSource::Current => (&k_heads, &v_heads),
                source => {
                    let pair =
                        cached_pair(cache, source).map_err(|e| Error::Msg(e.to_string()))?;
                    (pair.key(), pair.value())
                }
            };
            let k_group = k_source.narrow(1, group.start, group.len())?.contiguous()?;
            let v_group = v_source.narrow(1, group.start, group.len())?.contiguous()?;

            let output = self
                .kernel
                .attend(&q_group, &k_group, &v_group, mask, &kernel_config)
                .map_err(|e| Error::Msg(e.to_string()))?;
            group_outputs.push(output);
        }

        let merged = if group_outputs.len() == 1 {
            group_outputs.remove(0)
        } else {
            Tensor::cat(&group_outputs, 1)?
        };

        let output = self.merge_from_heads(&merged)?;
        let output = self.out_proj.forward(&output, &self.policy)?;
        let output = if train && self.dropout_p > 0.0 {
            dropout(&output, self.dropout_p)?
        } else {
            output
        };

        Ok((output, kv))
    }
}

/// Resolve the cached pair a cross-attention group reads.
///
/// A miss here is a defect in the partition policy or the driver's cache
/// maintenance, never a recoverable condition.
fn cached_pair(cache: &LayerCache, source: KvSource) -> std::result::Result<&KvPair, AttentionError> {
    match source {
        KvSource::Previous => cache.most_recent().ok_or_else(|| {
            AttentionError::CacheConsistency {
                context: "a head group targets the most recent cached layer but none is cached"
                    .to_string(),
            }
        }),
        KvSource::Penultimate => {
            cache
                .penultimate()
                .ok_or_else(|| AttentionError::CacheConsistency {
                    context: "a head group targets the second most recent cached layer but \
                              fewer than two are cached"
                        .to_string(),
                })
        }
        KvSource::Current => Err(AttentionError::CacheConsistency {
            context: "self-attention groups do not read cached state".to_string(),
        }),
    }
}
