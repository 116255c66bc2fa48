//! Building blocks for the reflex transformer's decoder layers.
//!
//! The crate hosts the dense projections, normalisation, activations and the
//! feed-forward stack assembled from Candle primitives, together with the
//! shape/dtype validation helpers and the precision policy the rest of the
//! workspace shares. Everything operates on the `(batch, seq, hidden)` layout
//! and promotes reductions to `f32` when parameters live in a reduced format.

pub mod activations;
pub mod checks;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;

pub use activations::ActivationKind;
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
