//! Error types emitted by attention implementations.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape for {context}")]
    InvalidShape { context: String },

    /// The kernel does not support the requested data type.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType { requested: String },

    /// No partition table row exists for the configured head count.
    #[error("no {variant} head partition is defined for {n_heads} heads")]
    UnsupportedHeadCount {
        variant: &'static str,
        n_heads: usize,
    },

    /// A cross-attention group was scheduled against a cache slot that does
    /// not exist. Unreachable under the documented layer gating; reaching it
    /// means the partition policy or the stack driver is defective.
    #[error("layer cache inconsistency: {context}")]
    CacheConsistency { context: String },

    /// A backend-specific failure propagated to the caller.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}
