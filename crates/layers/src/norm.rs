//! Layer normalisation with unified shape and dtype handling.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Normalisation happens
//! along the last axis while preserving the original layout; statistics are
//! promoted to [`PrecisionPolicy::reduction`] before the output is cast back.
//! The bias term is optional so callers can mirror a configuration-level
//! bias switch without a separate type.

use candle_core::{DType, Error, Result, Tensor, D};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration shared by normalisation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser applied to the variance computation.
    pub epsilon: f64,
}

impl NormConfig {
    /// Creates a configuration using the stack's default epsilon.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-6,
        }
    }
}

/// Standard LayerNorm with a learnable scale and optional bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl LayerNorm {
    /// Constructs a LayerNorm with learnable scale and bias parameters.
    pub fn new(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        Self::build(config, weight, Some(bias))
    }

    /// Constructs a LayerNorm with an affine scale but no bias.
    pub fn with_scale(weight: Tensor, config: NormConfig) -> Result<Self> {
        Self::build(config, weight, None)
    }

    fn build(config: NormConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if config.hidden_size == 0 {
            return Err(Error::Msg("norm hidden size must be non-zero".into()));
        }
        let allowed = [DType::F16, DType::BF16, DType::F32];
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_dtype_in("norm.weight", &weight, &allowed)?;
        checks::expect_contiguous("norm.weight", &weight)?;
        if let Some(bias) = &bias {
            checks::expect_shape("norm.bias", bias, &[config.hidden_size])?;
            checks::expect_dtype_in("norm.bias", bias, &allowed)?;
            checks::expect_contiguous("norm.bias", bias)?;
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Returns the configuration so callers can check shape compatibility.
    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    /// Whether the layer applies a learnable offset after normalisation.
    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Applies the normalisation to a hidden state tensor.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;

        let mean = (compute.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let mut normalized = centered.broadcast_div(&denom)?;

        if normalized.dtype() != policy.compute() {
            normalized = normalized.to_dtype(policy.compute())?;
        }

        let weight = self.weight.to_dtype(normalized.dtype())?;
        normalized = normalized.broadcast_mul(&weight)?;
        if let Some(bias) = &self.bias {
            let bias = bias.to_dtype(normalized.dtype())?;
            normalized = normalized.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&normalized)
    }
}
