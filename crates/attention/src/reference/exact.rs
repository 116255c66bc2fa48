//! Reference CPU-friendly attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::{dropout, softmax_last_dim};

use crate::core::{Attention, AttentionError, Config};
use crate::masks::MASK_DTYPE;

/// Numerically stable, portable attention kernel.
///
/// Scores are accumulated in `f32` regardless of the input dtype, and the
/// output is cast back so callers never observe the promotion.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

impl ExactAttention {
    /// Construct a reference attention kernel.
    pub fn new() -> Self {
        Self {
            first_call: OnceLock::new(),
        }
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init dropout_p={:?} masked={}",
                config.dropout_p,
                mask.is_some()
            );
        }

        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must reside on the same device".to_string(),
            });
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must share the same dtype".to_string(),
            });
        }

        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        if !q.is_contiguous() || !k.is_contiguous() || !v.is_contiguous() {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must be contiguous in memory".to_string(),
            });
        }

        let (batch, heads, q_len, head_dim) =
            q.dims4().map_err(|_| AttentionError::InvalidShape {
                context: "q must have shape [batch, heads, seq_len, head_dim]".to_string(),
            })?;
        let (kb, kh, k_len, kd) = k.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "k must have shape [batch, heads, seq_len, head_dim]".to_string(),
        })?;
        let (vb, vh, vk, vd) = v.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "v must have shape [batch, heads, seq_len, head_dim]".to_string(),
        })?;

        if kb != batch || kh != heads || kd != head_dim || k_len < q_len {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "k shape mismatch: expected [{batch}, {heads}, >={q_len}, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
                ),
            });
        }
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] got [{vb}, {vh}, {vk}, {vd}]"
                ),
            });
        }

        let q_work = q.to_dtype(DType::F32)?;
        let k_work = k.to_dtype(DType::F32)?;
        let v_work = v.to_dtype(DType::F32)?;

        let merged = batch * heads;
        let q_view = q_work.reshape((merged, q_len, head_dim))?;
        let k_view = k_work.reshape((merged, k_len, head_dim))?;
        let k_t = k_view.transpose(1, 2)?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let scores = q_view.matmul(&k_t)?.affine(scale, 0.0)?;
        let mut scores = scores.reshape((batch, heads, q_len, k_len))?;

        if let Some(mask) = mask {
            if !device.same_device(mask.device()) {
                return Err(AttentionError::InvalidShape {
                    context: "mask must reside on the same device as q".to_string(),
                });
            }
            if mask.dtype() != MASK_DTYPE {
                return Err(AttentionError::UnsupportedDType {
                    requested: format!("mask expects dtype {MASK_DTYPE:?}, got {:?}", mask.dtype()),
                });
            }
            let (mb, mh, mq, mk) = mask.dims4().map_err(|_| AttentionError::InvalidShape {
                context: "mask must have shape [batch, heads|1, q_len, k_len]".to_string(),
            })?;
            if mb != batch || mq != q_len || mk != k_len {
                return Err(AttentionError::InvalidShape {
                    context: format!(
                        "mask shape mismatch: expected [{batch}, 1|{heads}, {q_len}, {k_len}] got [{mb}, {mh}, {mq}, {mk}]"
                    ),
                });
            }
            if mh != 1 && mh != heads {
                return Err(AttentionError::InvalidShape {
                    context: format!("mask head dimension must be 1 or {heads}, got {mh}"),
                });
            }
            let mask_applied = if mh == heads {
                mask.clone()
            } else {
                mask.broadcast_as((batch, heads, q_len, k_len))?
            };
            scores = scores.add(&mask_applied)?;
        }

        let scores_2d = scores.reshape((merged, q_len, k_len))?;
        let probs = softmax_last_dim(&scores_2d)?;
        let probs = probs.reshape((batch, heads, q_len, k_len))?;

        let probs = if let Some(dropout_p) = config.dropout_p {
            if !(0.0..1.0).contains(&dropout_p) {
                return Err(AttentionError::InvalidShape {
                    context: format!("dropout probability must be in [0, 1), got {dropout_p}"),
                });
            }
            if dropout_p > 0.0 {
                dropout(&probs, dropout_p)?
            } else {
                probs
            }
        } else {
            probs
        };

        let probs_2d = probs.reshape((merged, q_len, k_len))?;
        let v_view = v_work.reshape((merged, k_len, head_dim))?;
        let output = probs_2d.matmul(&v_view)?;
        let output = output.reshape((batch, heads, q_len, head_dim))?;

        Ok(output.to_dtype(dtype)?)
    }
}
