//! Head partition policy for cross-layer ("reflex") attention.
//!
//! A decoder block running in reflex mode splits its attention heads into
//! contiguous groups: a majority that attend within their own layer, and a
//! minority that read the key/value tensors one or two earlier blocks
//! produced. The split is a fixed, validated table keyed by head count, not
//! derived arithmetically; head counts without a table row are rejected at
//! construction rather than silently falling back to self-attention.
//!
//! The first two blocks of a stack can never see two cached layers, so
//! [`HeadPartition::plan`] degenerates to a single all-heads self-attention
//! group until the cache is warm. This bootstrap guarantees every
//! cross-attention group a later block schedules has valid state to read.

use crate::core::AttentionError;

/// Whether a decoder stack threads cross-layer attention state at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionMode {
    /// Every head self-attends in every block; no cache is maintained.
    Standard,
    /// Later blocks split their heads across their own and cached layers.
    Reflex,
}

/// Which layer's keys and values a head group reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvSource {
    /// The current layer's own projections.
    Current,
    /// The most recently cached layer.
    Previous,
    /// The layer cached before [`KvSource::Previous`].
    Penultimate,
}

/// A contiguous, axis-aligned run of attention heads sharing one KV source.
///
/// `start` is inclusive, `end` exclusive, both in head-axis units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadGroup {
    pub start: usize,
    pub end: usize,
    pub source: KvSource,
}

impl HeadGroup {
    /// Number of heads in the group.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the group covers no heads at all.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Named cross-layer head allocations.
///
/// Each variant is a fixed `(self, previous, penultimate)` row validated for
/// specific head counts only; see [`HeadPartition::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionVariant {
    /// Five self heads, two on the previous layer, one on the layer before.
    FiveTwoOne,
    /// Three self heads, three on the previous layer, two on the layer before.
    ThreeThreeTwo,
}

impl PartitionVariant {
    /// Short display name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            PartitionVariant::FiveTwoOne => "5/2/1",
            PartitionVariant::ThreeThreeTwo => "3/3/2",
        }
    }

    /// The `(self, previous, penultimate)` head counts for `n_heads`, if the
    /// table defines a row for it.
    fn allocation(&self, n_heads: usize) -> Option<(usize, usize, usize)> {
        match (self, n_heads) {
            (PartitionVariant::FiveTwoOne, 8) => Some((5, 2, 1)),
            (PartitionVariant::ThreeThreeTwo, 8) => Some((3, 3, 2)),
            _ => None,
        }
    }
}

/// Validated partition of a block's heads into self- and cross-attention
/// groups.
#[derive(Debug, Clone)]
pub struct HeadPartition {
    variant: PartitionVariant,
    n_heads: usize,
    self_heads: usize,
    previous_heads: usize,
    penultimate_heads: usize,
}

impl HeadPartition {
    /// Look up the table row for `variant` at `n_heads`.
    ///
    /// Fails with [`AttentionError::UnsupportedHeadCount`] when the table has
    /// no entry; extrapolating a split to untested head counts is not
    /// supported.
    pub fn new(variant: PartitionVariant, n_heads: usize) -> Result<Self, AttentionError> {
        let (self_heads, previous_heads, penultimate_heads) = variant
            .allocation(n_heads)
            .ok_or(AttentionError::UnsupportedHeadCount {
                variant: variant.name(),
                n_heads,
            })?;
        debug_assert_eq!(self_heads + previous_heads + penultimate_heads, n_heads);
        Ok(Self {
            variant,
            n_heads,
            self_heads,
            previous_heads,
            penultimate_heads,
        })
    }

    /// The variant this partition was built from.
    pub fn variant(&self) -> PartitionVariant {
        self.variant
    }

    /// Total number of heads covered by the partition.
    pub fn n_heads(&self) -> usize {
        self.n_heads
    }

    /// Head groups for a block that can see `cached_layers` earlier layers.
    ///
    /// With fewer than two cached layers every head self-attends (the
    /// bootstrap case covering the first two blocks of a stack). Otherwise
    /// the table row is materialized as one self group followed by the
    /// cross-attention groups in head-index order. The returned groups always
    /// cover `[0, n_heads)` exactly once.
    pub fn plan(&self, cached_layers: usize) -> Vec<HeadGroup> {
        if cached_layers < 2 {
            return vec![HeadGroup {
                start: 0,
                end: self.n_heads,
                source: KvSource::Current,
            }];
        }

        let previous_end = self.self_heads + self.previous_heads;
        let mut groups = vec![
            HeadGroup {
                start: 0,
                end: self.self_heads,
                source: KvSource::Current,
            },
            HeadGroup {
                start: self.self_heads,
                end: previous_end,
                source: KvSource::Previous,
            },
            HeadGroup {
                start: previous_end,
                end: previous_end + self.penultimate_heads,
                source: KvSource::Penultimate,
            },
        ];
        groups.retain(|group| !group.is_empty());
        groups
    }
}
