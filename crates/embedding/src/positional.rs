//! Learned absolute position embeddings.
//!
//! The table holds one row per position up to the configured maximum; the
//! forward pass hands back the leading `seq_len` rows for the caller to
//! broadcast over the batch axis. Requests beyond the table are the
//! sequence-length violation surface and fail rather than truncate.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};

/// Standard deviation for freshly sampled position tables.
const INIT_STD: f64 = 0.02;

/// Configuration for building a learned position table.
#[derive(Debug, Clone)]
pub struct PositionEmbeddingConfig {
    /// Largest number of positions a sequence may occupy.
    pub max_positions: usize,
    /// Dimensionality of each position vector.
    pub hidden_dim: usize,
    /// Storage dtype used for the underlying parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

/// Learnable absolute position table.
#[derive(Debug, Clone)]
pub struct PositionEmbedding {
    config: PositionEmbeddingConfig,
    weight: Var,
}

impl PositionEmbedding {
    /// Builds a new position table sampled from `N(0, 0.02)`.
    pub fn new(config: PositionEmbeddingConfig) -> Result<Self> {
        if config.max_positions == 0 {
            bail!("position embedding requires max_positions > 0");
        }
        if config.hidden_dim == 0 {
            bail!("position embedding requires hidden_dim > 0");
        }

        let shape = (config.max_positions, config.hidden_dim);
        let initial = Var::randn(0f32, INIT_STD as f32, shape, &config.device)?;
        let weight = if initial.dtype() == config.dtype {
            initial
        } else {
            let cast = initial.to_dtype(config.dtype)?;
            Var::from_tensor(&cast)?
        };

        Ok(Self { config, weight })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &PositionEmbeddingConfig {
        &self.config
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Rows for positions `0..seq_len`, shaped `(seq_len, hidden)`.
    pub fn forward(&self, seq_len: usize) -> Result<Tensor> {
        if seq_len == 0 {
            return Err(Error::Msg("sequence length must be non-zero".into()));
        }
        if seq_len > self.config.max_positions {
            return Err(Error::Msg(format!(
                "cannot embed {seq_len} positions, table holds {}",
                self.config.max_positions
            )));
        }
        self.weight.as_tensor().narrow(0, 0, seq_len)
    }

    /// Returns the trainable parameters for this embedding with an optional
    /// scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let prefix = if scope.is_empty() { "wpe" } else { scope };
        vec![(format!("{prefix}.weight"), self.weight.clone())]
    }
}
