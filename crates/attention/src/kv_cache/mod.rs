//! Per-layer key/value cache threaded across a decoder stack.
//!
//! Unlike a decode-time cache that accumulates positions across sampling
//! steps, this cache holds whole layers: at most the last
//! [`CACHE_DEPTH`] blocks' full key/value tensors, alive for the duration of
//! one forward pass. Each block pushes its own pair after running; once the
//! window is full the oldest layer is evicted first. The cache is an explicit
//! value owned by the driver of a single pass — it is never shared between
//! concurrent passes and never survives one.

use std::collections::VecDeque;

use candle_core::Tensor;

use crate::core::AttentionError;

/// Number of prior layers whose projections stay visible to later blocks.
pub const CACHE_DEPTH: usize = 2;

/// The `(key, value)` tensor pair one layer's attention produced.
///
/// Both tensors carry the full head range with layout
/// `[batch, heads, seq_len, head_dim]` and must agree on every dimension.
#[derive(Debug, Clone)]
pub struct KvPair {
    key: Tensor,
    value: Tensor,
}

impl KvPair {
    /// Validate and wrap a layer's key/value projections.
    pub fn new(key: Tensor, value: Tensor) -> Result<Self, AttentionError> {
        let key_dims = key.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "cached key must have shape [batch, heads, seq_len, head_dim]".to_string(),
        })?;
        let value_dims = value.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "cached value must have shape [batch, heads, seq_len, head_dim]".to_string(),
        })?;
        if key_dims != value_dims {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "cached key/value shapes must match, got {key_dims:?} and {value_dims:?}"
                ),
            });
        }
        Ok(Self { key, value })
    }

    /// The cached key tensor.
    pub fn key(&self) -> &Tensor {
        &self.key
    }

    /// The cached value tensor.
    pub fn value(&self) -> &Tensor {
        &self.value
    }
}

/// Sliding window over the most recent layers' [`KvPair`]s.
#[derive(Debug, Default, Clone)]
pub struct LayerCache {
    entries: VecDeque<KvPair>,
}

impl LayerCache {
    /// An empty cache, as every forward pass starts with.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(CACHE_DEPTH),
        }
    }

    /// Append a layer's pair, evicting the oldest entry once the window
    /// would exceed [`CACHE_DEPTH`].
    pub fn push(&mut self, pair: KvPair) {
        if self.entries.len() == CACHE_DEPTH {
            self.entries.pop_front();
        }
        self.entries.push_back(pair);
    }

    /// Number of cached layers, at most [`CACHE_DEPTH`].
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no layer has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all cached layers, returning the cache to its start-of-pass state.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The most recently cached layer's pair.
    pub fn most_recent(&self) -> Option<&KvPair> {
        self.entries.back()
    }

    /// The layer cached immediately before [`LayerCache::most_recent`].
    pub fn penultimate(&self) -> Option<&KvPair> {
        let len = self.entries.len();
        if len < 2 {
            None
        } else {
            self.entries.get(len - 2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Result};

    fn pair_filled(value: f32) -> Result<KvPair> {
        let device = Device::Cpu;
        let key = Tensor::full(value, (1, 2, 3, 4), &device)?;
        let val = Tensor::full(-value, (1, 2, 3, 4), &device)?;
        Ok(KvPair::new(key, val).unwrap())
    }

    fn fill_value(pair: &KvPair) -> Result<f32> {
        pair.key().flatten_all()?.to_vec1::<f32>().map(|v| v[0])
    }

    #[test]
    fn window_grows_to_depth_then_slides() -> Result<()> {
        let mut cache = LayerCache::new();
        assert!(cache.is_empty());

        for layer in 0..5 {
            cache.push(pair_filled(layer as f32)?);
            assert_eq!(cache.len(), (layer + 1).min(CACHE_DEPTH));
        }
        Ok(())
    }

    #[test]
    fn eviction_is_oldest_first() -> Result<()> {
        let mut cache = LayerCache::new();
        cache.push(pair_filled(0.0)?);
        cache.push(pair_filled(1.0)?);
        cache.push(pair_filled(2.0)?);

        let recent = cache.most_recent().unwrap();
        let older = cache.penultimate().unwrap();
        assert_eq!(fill_value(recent)?, 2.0);
        assert_eq!(fill_value(older)?, 1.0);
        Ok(())
    }

    #[test]
    fn recency_accessors_track_insertion_order() -> Result<()> {
        let mut cache = LayerCache::new();
        assert!(cache.most_recent().is_none());
        assert!(cache.penultimate().is_none());

        cache.push(pair_filled(7.0)?);
        assert_eq!(fill_value(cache.most_recent().unwrap())?, 7.0);
        assert!(cache.penultimate().is_none());

        cache.push(pair_filled(8.0)?);
        assert_eq!(fill_value(cache.most_recent().unwrap())?, 8.0);
        assert_eq!(fill_value(cache.penultimate().unwrap())?, 7.0);
        Ok(())
    }

    #[test]
    fn clear_restores_the_start_of_pass_state() -> Result<()> {
        let mut cache = LayerCache::new();
        cache.push(pair_filled(1.0)?);
        cache.push(pair_filled(2.0)?);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.most_recent().is_none());
        Ok(())
    }

    #[test]
    fn mismatched_key_value_shapes_are_rejected() -> Result<()> {
        let device = Device::Cpu;
        let key = Tensor::zeros((1, 2, 3, 4), DType::F32, &device)?;
        let value = Tensor::zeros((1, 2, 4, 4), DType::F32, &device)?;
        let err = KvPair::new(key, value).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }

    #[test]
    fn non_four_axis_tensors_are_rejected() -> Result<()> {
        let device = Device::Cpu;
        let key = Tensor::zeros((2, 3, 4), DType::F32, &device)?;
        let value = Tensor::zeros((2, 3, 4), DType::F32, &device)?;
        let err = KvPair::new(key, value).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }
}
