//! Causal attention primitives for the reflex transformer project.
//!
//! The crate defines a portable API for computing causal attention over
//! tensors with layout `[batch, n_heads, seq_len, head_dim]`. The inputs `Q`,
//! `K`, and `V` share the same layout and dtype (bf16, f16, or f32). Reductions
//! are performed internally in `f32`, and the output tensor matches the input
//! dtype and shape.
//!
//! On top of the kernel, the crate carries the two pieces of state that
//! cross-layer ("reflex") attention threads through a decoder stack during a
//! single forward pass:
//!
//! * [`partition`] — the head partition policy deciding which heads attend
//!   within their own layer and which read an earlier layer's projections;
//! * [`kv_cache`] — the bounded window of prior layers' key/value pairs those
//!   cross-attending heads consume.
//!
//! Dropout is an optional, train-only concern controlled via the public
//! configuration. Callers should disable it for evaluation or when
//! deterministic outputs are required.
//!
//! Causal masks are always enforced positionally, for cross-layer groups as
//! much as for ordinary self-attention: reading an earlier layer's keys and
//! values never widens the set of positions a query may see.

pub mod core;
pub mod kv_cache;
pub mod masks;
pub mod partition;
pub mod reference;

pub use crate::core::{Attention, AttentionError, Config};
pub use kv_cache::{KvPair, LayerCache, CACHE_DEPTH};
pub use partition::{AttentionMode, HeadGroup, HeadPartition, KvSource, PartitionVariant};
