//! Decoder-only language model with cross-layer ("reflex") attention.
//!
//! The crate assembles the shared workspace crates into a GPT-style stack:
//! token and position embeddings, pre-norm decoder blocks whose attention
//! heads may read one or two earlier blocks' key/value projections, a final
//! normalisation, and a readout tied to the token table. The per-layer cache
//! that threads attention state across blocks is private to each forward
//! pass; callers only ever see `(batch, seq)` token ids in and
//! `(batch, seq, vocab)` logits out.

pub mod attention;
pub mod block;
pub mod config;
pub mod model;

pub use crate::attention::ReflexAttention;
pub use block::DecoderBlock;
pub use config::ModelConfig;
pub use model::Gpt;
