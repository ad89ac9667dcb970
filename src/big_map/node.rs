//! B+tree node representation.

use serde::{Deserialize, Serialize};

use crate::slot::NULL;
use crate::sorted_map::SortedMap;

/// Either a pointer to a child node living in the allocator (inner level),
/// or an owned leaf value (leaf level). The variant itself carries the
/// information callers need instead of an `is_leaf` flag paired with an
/// `Option`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Child<V> {
    Inner(u64),
    Leaf(V),
}

impl<V> Child<V> {
    pub(crate) fn as_inner_index(&self) -> Option<u64> {
        match self {
            Child::Inner(idx) => Some(*idx),
            Child::Leaf(_) => None,
        }
    }

    pub(crate) fn into_leaf_value(self) -> Option<V> {
        match self {
            Child::Leaf(v) => Some(v),
            Child::Inner(_) => None,
        }
    }

    pub(crate) fn as_leaf_value(&self) -> Option<&V> {
        match self {
            Child::Leaf(v) => Some(v),
            Child::Inner(_) => None,
        }
    }

    pub(crate) fn as_leaf_value_mut(&mut self) -> Option<&mut V> {
        match self {
            Child::Leaf(v) => Some(v),
            Child::Inner(_) => None,
        }
    }
}

/// A single tree node: either an inner node (children are `Child::Inner`
/// pointers) or a leaf (children are `Child::Leaf` values). `prev`/`next`
/// are only meaningful (and only maintained) at the leaf level, forming the
/// doubly-linked leaf list; at the inner level they must not be relied upon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Node<K, V> {
    pub(crate) is_leaf: bool,
    pub(crate) children: SortedMap<K, Child<V>>,
    pub(crate) prev: u64,
    pub(crate) next: u64,
}

impl<K, V> Node<K, V> {
    pub(crate) fn empty_leaf() -> Self {
        Node {
            is_leaf: true,
            children: SortedMap::new(),
            prev: NULL,
            next: NULL,
        }
    }

    pub(crate) fn empty_inner() -> Self {
        Node {
            is_leaf: false,
            children: SortedMap::new(),
            prev: NULL,
            next: NULL,
        }
    }

    pub(crate) fn degree(&self) -> usize {
        self.children.length()
    }
}
