//! BigMap configuration: degree bounds and size constants.
//!
//! An explicit, validated-at-construction builder type, rather than
//! loosely-typed keyword arguments threaded through constructors.

use serde::{Deserialize, Serialize};

use crate::compare::NativeOrder;
use crate::error::{Error, Result};
use crate::size::EncodedSize;

use super::BigMap;

/// Minimum children an inner node may hold (except the root, which is
/// exempt from the lower bound).
pub const INNER_MIN_DEGREE: u64 = 4;
/// Minimum entries a leaf may hold (except the root).
pub const LEAF_MIN_DEGREE: u64 = 3;
/// Hard ceiling on any node's degree, at either level.
pub const MAX_DEGREE: u64 = 4096;
/// Per-node serialized size budget.
pub const MAX_NODE_BYTES: u64 = 400 * 1024;
/// Target node size used to pick a degree from observed entry sizes.
pub const DEFAULT_TARGET_NODE_SIZE: u64 = 4096;
/// Assumed worst-case key-or-value size the default (auto) configuration
/// guarantees acceptance of.
pub const DEFAULT_MAX_KEY_OR_VALUE_SIZE: u64 = 5 * 1024;
/// Cap used when computing a degree from explicit size hints
/// (`new_with_type_size_hints`).
pub const HINT_MAX_NODE_BYTES: u64 = 128 * 1024;

/// Builder for [`BigMap`] construction options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BigMapConfig {
    pub reuse_slots: bool,
    /// 0 = auto (deferred to first insert, or computed eagerly for
    /// constant-size types), else must be in `[INNER_MIN_DEGREE, MAX_DEGREE]`.
    pub inner_max_degree: u64,
    /// 0 = auto, else must be in `[LEAF_MIN_DEGREE, MAX_DEGREE]`.
    pub leaf_max_degree: u64,
}

impl Default for BigMapConfig {
    fn default() -> Self {
        BigMapConfig {
            reuse_slots: false,
            inner_max_degree: 0,
            leaf_max_degree: 0,
        }
    }
}

impl BigMapConfig {
    pub fn reuse_slots(mut self, reuse: bool) -> Self {
        self.reuse_slots = reuse;
        self
    }

    pub fn inner_max_degree(mut self, degree: u64) -> Self {
        self.inner_max_degree = degree;
        self
    }

    pub fn leaf_max_degree(mut self, degree: u64) -> Self {
        self.leaf_max_degree = degree;
        self
    }

    /// Build a [`BigMap`] with the default [`NativeOrder`] comparator.
    pub fn build<K, V>(self) -> Result<BigMap<K, V, NativeOrder>>
    where
        K: EncodedSize,
        V: EncodedSize,
    {
        BigMap::new_with_config(self.inner_max_degree, self.leaf_max_degree, self.reuse_slots, NativeOrder)
    }

    /// Build a [`BigMap`] with an explicitly supplied comparator.
    pub fn build_with_comparator<K, V, C>(self, cmp: C) -> Result<BigMap<K, V, C>>
    where
        K: EncodedSize,
        V: EncodedSize,
    {
        BigMap::new_with_config(self.inner_max_degree, self.leaf_max_degree, self.reuse_slots, cmp)
    }
}

pub(crate) fn validate_degree(degree: u64, min: u64) -> Result<()> {
    if degree == 0 {
        return Ok(());
    }
    if degree < min || degree > MAX_DEGREE {
        return Err(Error::InvalidConfigParameter(
            "degree must be 0 (auto) or within [MIN, MAX_DEGREE]",
        ));
    }
    Ok(())
}

/// Degree auto-selected for the inner level from an observed key size.
pub(crate) fn auto_inner_degree(key_size: usize) -> u64 {
    let cap = MAX_DEGREE.min(MAX_NODE_BYTES / DEFAULT_MAX_KEY_OR_VALUE_SIZE);
    let by_target = if key_size == 0 {
        MAX_DEGREE
    } else {
        DEFAULT_TARGET_NODE_SIZE / key_size as u64
    };
    cap.min(by_target).max(INNER_MIN_DEGREE)
}

/// Degree auto-selected for the leaf level from an observed (key, value)
/// entry size.
///
/// The cap (not the `TARGET`-derived term) is chosen so that
/// `DEFAULT_MAX_KEY_OR_VALUE_SIZE * cap == MAX_NODE_BYTES` exactly: together
/// with [`BigMap::check_entry_size`](super::BigMap)'s per-insert
/// re-assertion against the *actual* chosen degree, this is what gives the
/// default configuration its "accepts any single key or value up to 5 KiB"
/// guarantee, independent of how small the first inserted entry happened to
/// be.
pub(crate) fn auto_leaf_degree(entry_size: usize) -> u64 {
    let cap = MAX_DEGREE.min(MAX_NODE_BYTES / DEFAULT_MAX_KEY_OR_VALUE_SIZE);
    let by_target = if entry_size == 0 {
        MAX_DEGREE
    } else {
        DEFAULT_TARGET_NODE_SIZE / entry_size as u64
    };
    cap.min(by_target).max(LEAF_MIN_DEGREE)
}

/// Only the max-size-derived bound is a rejection criterion (spec.md
/// §4.3.1): the avg-size-derived estimate is clamped up to `min` rather than
/// allowed to drag the combined degree below it, since an average smaller
/// than the target node size's per-entry share is expected, not an error.
fn hint_degree(avg_size: u64, max_size: u64, min: u64) -> Result<u64> {
    let by_max = HINT_MAX_NODE_BYTES / max_size.max(1);
    if by_max < min {
        return Err(Error::InvalidConfigParameter(
            "size hints imply a degree below the level minimum",
        ));
    }
    let by_avg = (DEFAULT_TARGET_NODE_SIZE / avg_size.max(1)).max(min);
    Ok(by_avg.min(by_max).min(MAX_DEGREE))
}

/// Compute `(inner_max_degree, leaf_max_degree)` from type size hints,
/// for `new_with_type_size_hints`.
pub(crate) fn degrees_from_hints(
    avg_key: u64,
    max_key: u64,
    avg_value: u64,
    max_value: u64,
) -> Result<(u64, u64)> {
    if max_key < avg_key || max_value < avg_value {
        return Err(Error::InvalidConfigParameter(
            "max size hint must be >= the average size hint",
        ));
    }
    let inner = hint_degree(avg_key, max_key, INNER_MIN_DEGREE)?;
    let leaf = hint_degree(avg_key + avg_value, max_key + max_value, LEAF_MIN_DEGREE)?;
    Ok((inner, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `avg_size == max_size == 10_000` drives `by_avg` to `0` (an
    /// entry larger than `DEFAULT_TARGET_NODE_SIZE`), but `by_max` (13)
    /// clears `INNER_MIN_DEGREE`; only `by_max` is a rejection criterion,
    /// so this must succeed rather than fail on the combined `min(by_avg,
    /// by_max)`.
    #[test]
    fn hint_degree_accepts_when_only_avg_bound_is_below_min() {
        let degree = hint_degree(10_000, 10_000, INNER_MIN_DEGREE).unwrap();
        assert!(degree >= INNER_MIN_DEGREE);
        assert_eq!(degree, INNER_MIN_DEGREE);
    }

    /// A `max_size` large enough to push `by_max` itself below `min` must
    /// still be rejected.
    #[test]
    fn hint_degree_rejects_when_max_bound_is_below_min() {
        let huge_max = HINT_MAX_NODE_BYTES / (INNER_MIN_DEGREE - 1);
        assert_eq!(
            hint_degree(1, huge_max, INNER_MIN_DEGREE),
            Err(Error::InvalidConfigParameter(
                "size hints imply a degree below the level minimum"
            ))
        );
    }

    #[test]
    fn degrees_from_hints_succeeds_on_the_same_boundary() {
        let (inner, leaf) = degrees_from_hints(10_000, 10_000, 10_000, 10_000).unwrap();
        assert_eq!(inner, INNER_MIN_DEGREE);
        assert_eq!(leaf, LEAF_MIN_DEGREE);
    }
}
