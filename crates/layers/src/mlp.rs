//! Position-wise feed-forward blocks built on top of projections and
//! activations.
//!
//! MLPs operate on hidden states shaped `(batch, seq, hidden)` and return the
//! same layout. The first projection expands the hidden dimension to
//! `config.intermediate_size`, an activation is applied, and the second
//! projection contracts back to the model hidden size. Dropout on the
//! contracted output is a train-only concern gated by an explicit flag.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::Dropout;

use crate::{
    activations::ActivationKind,
    checks,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
};

/// Configuration shared by transformer feed-forward networks.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation applied between projections.
    pub activation: ActivationKind,
    /// Whether the projections carry bias vectors.
    pub bias: bool,
    /// Train-only dropout probability on the contracted output.
    pub dropout_p: f32,
}

impl FeedForwardConfig {
    /// Creates a standard two-projection MLP configuration.
    pub fn new(hidden_size: usize, intermediate_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation,
            bias: true,
            dropout_p: 0.0,
        }
    }
}

/// Two-projection feed-forward stack with a train-gated dropout tail.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    c_fc: Linear,
    c_proj: Linear,
    dropout: Dropout,
}

impl FeedForward {
    /// Builds the MLP, sampling both projections with the supplied policies.
    ///
    /// The expansion and contraction projections take separate initialisers
    /// so residual output projections can be rescaled for deep stacks.
    pub fn with_init(
        config: FeedForwardConfig,
        fc_init: &LinearInit,
        proj_init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let mut fc_config = LinearConfig::new(config.hidden_size, config.intermediate_size);
        fc_config.bias = config.bias;
        let c_fc = Linear::with_init(fc_config, fc_init, device, dtype)?;

        let mut proj_config = LinearConfig::new(config.intermediate_size, config.hidden_size);
        proj_config.bias = config.bias;
        let c_proj = Linear::with_init(proj_config, proj_init, device, dtype)?;

        let dropout = Dropout::new(config.dropout_p);

        Ok(Self {
            config,
            c_fc,
            c_proj,
            dropout,
        })
    }

    /// Configuration metadata used during block assembly.
    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    /// Performs the forward pass through the MLP.
    pub fn forward(&self, hidden: &Tensor, train: bool, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("mlp.input", hidden, self.config.hidden_size)?;
        let expanded = self.c_fc.forward(hidden, policy)?;
        let activated = self.config.activation.apply(&expanded, policy)?;
        let contracted = self.c_proj.forward(&activated, policy)?;
        if train && self.config.dropout_p > 0.0 {
            self.dropout.forward(&contracted, train)
        } else {
            Ok(contracted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_mlp(hidden: usize, dropout_p: f32) -> Result<FeedForward> {
        let mut config = FeedForwardConfig::new(hidden, 4 * hidden, ActivationKind::Gelu);
        config.dropout_p = dropout_p;
        FeedForward::with_init(
            config,
            &LinearInit::Normal { std: 0.02 },
            &LinearInit::Normal { std: 0.02 },
            &Device::Cpu,
            DType::F32,
        )
    }

    #[test]
    fn forward_preserves_the_input_layout() -> Result<()> {
        let mlp = build_mlp(16, 0.0)?;
        assert_eq!(mlp.config().intermediate_size, 64);
        let input = Tensor::randn(0f32, 1.0, (2, 5, 16), &Device::Cpu)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let output = mlp.forward(&input, false, &policy)?;
        assert_eq!(output.dims(), input.dims());
        assert_eq!(output.dtype(), input.dtype());
        Ok(())
    }

    #[test]
    fn evaluation_mode_is_deterministic_despite_dropout() -> Result<()> {
        let mlp = build_mlp(8, 0.5)?;
        let input = Tensor::randn(0f32, 1.0, (1, 4, 8), &Device::Cpu)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let first = mlp.forward(&input, false, &policy)?;
        let second = mlp.forward(&input, false, &policy)?;
        let diff = first
            .sub(&second)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn training_mode_keeps_the_shape() -> Result<()> {
        let mlp = build_mlp(8, 0.5)?;
        let input = Tensor::randn(0f32, 1.0, (2, 3, 8), &Device::Cpu)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let output = mlp.forward(&input, true, &policy)?;
        assert_eq!(output.dims(), input.dims());
        Ok(())
    }

    #[test]
    fn rejects_inputs_with_the_wrong_hidden_size() -> Result<()> {
        let mlp = build_mlp(8, 0.0)?;
        let input = Tensor::randn(0f32, 1.0, (1, 4, 6), &Device::Cpu)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        assert!(mlp.forward(&input, false, &policy).is_err());
        Ok(())
    }
}
