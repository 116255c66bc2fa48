use attention::{AttentionMode, PartitionVariant};
use candle_core::{DType, Device, Error, Result};

/// High-level configuration for assembling the decoder-only transformer.
///
/// All fields are fixed at construction; violations surface from
/// [`ModelConfig::validate`] before any forward pass can run.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub vocab_size: usize,
    /// Maximum number of positions a sequence may occupy.
    pub block_size: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
    /// Train-only dropout probability shared by embeddings, attention
    /// weights, and residual branches. `0.0` disables dropout entirely.
    pub dropout: f32,
    /// Whether linear projections and layer norms carry bias terms.
    pub bias: bool,
    pub attention_mode: AttentionMode,
    /// Cross-layer head allocation used once the cache is warm. Only
    /// consulted under [`AttentionMode::Reflex`].
    pub partition_variant: PartitionVariant,
    pub dtype: DType,
    pub device: Device,
}

impl ModelConfig {
    /// Validate structural invariants before any parameter is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(Error::Msg("vocab_size must be greater than zero".into()));
        }
        if self.block_size == 0 {
            return Err(Error::Msg("block_size must be greater than zero".into()));
        }
        if self.n_layer == 0 {
            return Err(Error::Msg("n_layer must be greater than zero".into()));
        }
        if self.n_head == 0 {
            return Err(Error::Msg("n_head must be greater than zero".into()));
        }
        if self.n_embd == 0 {
            return Err(Error::Msg("n_embd must be greater than zero".into()));
        }
        if self.n_embd % self.n_head != 0 {
            return Err(Error::Msg(format!(
                "n_embd ({}) must be divisible by n_head ({})",
                self.n_embd, self.n_head
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Msg("dropout must be in [0, 1)".into()));
        }
        Ok(())
    }

    /// Width of a single attention head.
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ModelConfig {
        ModelConfig {
            vocab_size: 32,
            block_size: 16,
            n_layer: 2,
            n_head: 8,
            n_embd: 32,
            dropout: 0.0,
            bias: true,
            attention_mode: AttentionMode::Reflex,
            partition_variant: PartitionVariant::FiveTwoOne,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    #[test]
    fn valid_configuration_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn indivisible_head_count_is_fatal() {
        let mut config = base_config();
        config.n_embd = 30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn zero_sized_fields_are_fatal() {
        for field in ["vocab", "block", "layer", "head", "embd"] {
            let mut config = base_config();
            match field {
                "vocab" => config.vocab_size = 0,
                "block" => config.block_size = 0,
                "layer" => config.n_layer = 0,
                "head" => config.n_head = 0,
                _ => config.n_embd = 0,
            }
            assert!(config.validate().is_err(), "{field} = 0 should fail");
        }
    }

    #[test]
    fn dropout_outside_the_unit_interval_is_fatal() {
        let mut config = base_config();
        config.dropout = 1.0;
        assert!(config.validate().is_err());
        config.dropout = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn head_dim_divides_the_embedding() {
        let config = base_config();
        assert_eq!(config.head_dim(), 4);
    }
}
