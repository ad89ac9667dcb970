//! Cross-leaf iteration over a [`BigMap`](super::BigMap).
//!
//! A cursor is a leaf's slot index plus a cursor local to that leaf's
//! `SortedMap`. Crossing a leaf boundary follows the doubly-linked leaf
//! list rather than re-descending from the root, so forward/backward scans
//! never revisit inner nodes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::slot::{is_null, ROOT};
use crate::sorted_map::SortedMapCursor;

use super::BigMap;

/// A position inside a [`BigMap`]'s leaf chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigMapIter {
    pub(crate) leaf: u64,
    pub(crate) cursor: SortedMapCursor,
}

impl<K, V, C> BigMap<K, V, C> {
    /// Iterator positioned at the smallest key, or the end sentinel if empty.
    pub fn iter_begin(&self) -> BigMapIter {
        let leaf = self.min_leaf;
        let cursor = self.node_ref(leaf).children.begin();
        BigMapIter { leaf, cursor }
    }

    /// The end sentinel: one past the greatest key.
    pub fn iter_end(&self) -> BigMapIter {
        let leaf = self.max_leaf;
        let cursor = self.node_ref(leaf).children.end();
        BigMapIter { leaf, cursor }
    }

    pub fn iter_is_end(&self, it: BigMapIter) -> bool {
        is_null(self.node_ref(it.leaf).next) && self.node_ref(it.leaf).children.iter_is_end(it.cursor)
    }

    pub fn iter_is_begin(&self, it: BigMapIter) -> bool {
        it.leaf == self.min_leaf && self.node_ref(it.leaf).children.iter_is_begin(it.cursor)
    }

    pub fn iter_next(&self, it: BigMapIter) -> Result<BigMapIter> {
        let node = self.node_ref(it.leaf);
        if !node.children.iter_is_end(it.cursor) {
            let advanced = node.children.iter_next(it.cursor)?;
            if !node.children.iter_is_end(advanced) || is_null(node.next) {
                return Ok(BigMapIter {
                    leaf: it.leaf,
                    cursor: advanced,
                });
            }
        }
        if is_null(node.next) {
            return Err(Error::IterOutOfBounds);
        }
        let next_leaf = node.next;
        Ok(BigMapIter {
            leaf: next_leaf,
            cursor: self.node_ref(next_leaf).children.begin(),
        })
    }

    pub fn iter_prev(&self, it: BigMapIter) -> Result<BigMapIter> {
        let node = self.node_ref(it.leaf);
        if !node.children.iter_is_begin(it.cursor) {
            let back = node.children.iter_prev(it.cursor)?;
            return Ok(BigMapIter {
                leaf: it.leaf,
                cursor: back,
            });
        }
        if is_null(node.prev) {
            return Err(Error::IterOutOfBounds);
        }
        let prev_leaf = node.prev;
        let prev_node = self.node_ref(prev_leaf);
        let last = prev_node.children.iter_prev(prev_node.children.end())?;
        Ok(BigMapIter {
            leaf: prev_leaf,
            cursor: last,
        })
    }

    pub fn iter_borrow_key<'a>(&'a self, it: BigMapIter) -> Result<&'a K> {
        self.node_ref(it.leaf).children.iter_borrow_key(it.cursor)
    }

    pub fn iter_borrow_value<'a>(&'a self, it: BigMapIter) -> Result<&'a V> {
        let (_, child) = self.node_ref(it.leaf).children.iter_borrow(it.cursor)?;
        child.as_leaf_value().ok_or(Error::InternalInvariantBroken(
            "iter_borrow_value: cursor on non-leaf child",
        ))
    }

    /// A cursor positioned at the smallest key `>= key`.
    pub(crate) fn leaf_lower_bound(&self, leaf: u64, key: &K) -> BigMapIter
    where
        C: crate::compare::KeyOrder<K>,
    {
        let cursor = self.node_ref(leaf).children.internal_lower_bound(&self.cmp, key);
        if self.node_ref(leaf).children.iter_is_end(cursor) && !is_null(self.node_ref(leaf).next) {
            let next = self.node_ref(leaf).next;
            return BigMapIter {
                leaf: next,
                cursor: self.node_ref(next).children.begin(),
            };
        }
        BigMapIter { leaf, cursor }
    }

    #[allow(dead_code)]
    pub(crate) fn is_root_leaf(&self, leaf: u64) -> bool {
        leaf == ROOT
    }

    /// Iterator to the smallest key `>= key`, or the end iterator. A single
    /// root-to-leaf descent followed by a `SortedMap` lower-bound at the
    /// leaf.
    pub fn internal_lower_bound(&self, key: &K) -> BigMapIter
    where
        C: crate::compare::KeyOrder<K>,
    {
        let leaf = self.find_leaf(&self.cmp, key);
        self.leaf_lower_bound(leaf, key)
    }

    /// Iterator to `key` exactly, or the end iterator.
    pub fn internal_find(&self, key: &K) -> BigMapIter
    where
        C: crate::compare::KeyOrder<K>,
    {
        let it = self.internal_lower_bound(key);
        if !self.iter_is_end(it) {
            if let Ok(k) = self.iter_borrow_key(it) {
                if self.cmp.compare(k, key) == std::cmp::Ordering::Equal {
                    return it;
                }
            }
        }
        self.iter_end()
    }
}
