//! Token embedding layer and tied readout head.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};
use layers::PrecisionPolicy;

/// Standard deviation for freshly sampled embedding tables.
const INIT_STD: f64 = 0.02;

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Storage dtype used for the underlying parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

impl TokenEmbeddingConfig {
    fn policy(&self) -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(self.dtype)
    }
}

/// Learnable token embedding table with a tied projection head.
///
/// The same weight matrix serves both the lookup on the way in and, via
/// [`TokenEmbedding::linear_out`], the logit projection on the way out.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Var,
    policy: PrecisionPolicy,
}

impl TokenEmbedding {
    /// Builds a new token embedding table sampled from `N(0, 0.02)`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }

        let policy = config.policy();
        let shape = (config.vocab_size, config.hidden_dim);
        let initial = Var::randn(0f32, INIT_STD as f32, shape, &config.device)?;
        let weight = if initial.dtype() == config.dtype {
            initial
        } else {
            let cast = initial.to_dtype(config.dtype)?;
            Var::from_tensor(&cast)?
        };

        Ok(Self {
            config,
            weight,
            policy,
        })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype. Outputs
    /// follow the `(batch, seq, hidden)` layout using the configured storage
    /// dtype.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.validate_token_ids(token_ids)?;
        let dims = token_ids.dims();

        let ids = token_ids.to_dtype(DType::I64)?;
        let flat = ids.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let weight = self.weight.as_tensor();
        let gathered = weight.index_select(&flat, 0)?;
        let mut output_dims = dims.to_vec();
        output_dims.push(self.config.hidden_dim);
        gathered.reshape(output_dims)
    }

    /// Returns the trainable parameters for this embedding with an optional
    /// scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let prefix = if scope.is_empty() { "wte" } else { scope };
        vec![(format!("{prefix}.weight"), self.weight.clone())]
    }

    /// Applies a tied linear projection using the transpose of the embedding
    /// weight.
    pub fn linear_out(&self, hidden: &Tensor) -> Result<Tensor> {
        let (batch, seq, hidden_dim) = match hidden.dims() {
            [batch, seq, hidden_dim] => (*batch, *seq, *hidden_dim),
            dims => {
                return Err(Error::Msg(format!(
                    "linear_out expects input shaped [batch, seq, hidden], got {dims:?}"
                )))
            }
        };

        if hidden_dim != self.config.hidden_dim {
            return Err(Error::Msg(format!(
                "linear_out expected hidden dim {} but received {hidden_dim}",
                self.config.hidden_dim
            )));
        }

        let policy = &self.policy;
        let input = policy.cast_for_matmul(hidden)?;
        let weight = policy.cast_for_matmul(self.weight.as_tensor())?;
        let weight_t = weight.t()?;

        let flat = input.reshape((batch * seq, hidden_dim))?;
        let logits = flat.matmul(&weight_t)?;
        let logits = logits.reshape((batch, seq, self.config.vocab_size))?;
        policy.cast_to_storage(&logits)
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<()> {
        match token_ids.dims() {
            [batch, seq] => {
                if *batch == 0 || *seq == 0 {
                    return Err(Error::Msg(
                        "token_ids must have non-zero batch and seq dimensions".into(),
                    ));
                }
            }
            _ => return Err(Error::Msg("token_ids must be shaped [batch, seq]".into())),
        }

        if !is_integer_dtype(token_ids.dtype()) {
            Err(Error::Msg(format!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            )))
        } else {
            Ok(())
        }
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let max_id = flat_ids.max(0)?.to_vec0::<i64>()?;
        let min_id = flat_ids.min(0)?.to_vec0::<i64>()?;
        if min_id < 0 || max_id >= self.config.vocab_size as i64 {
            return Err(Error::Msg(format!(
                "token id out of range: ids span [{min_id}, {max_id}] but vocab_size is {}",
                self.config.vocab_size
            )));
        }
        Ok(())
    }
}

fn is_integer_dtype(dtype: DType) -> bool {
    matches!(dtype, DType::U8 | DType::U32 | DType::I64)
}
