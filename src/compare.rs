//! Injected key ordering.
//!
//! Whether byte-lex order agrees with a type's "natural" `Ord` order depends
//! on the canonical serialization chosen by whatever embeds this engine, not
//! on the engine itself. Rather than guessing, the comparator is taken as an
//! explicit, injected policy — the same spirit as a generic container taking
//! its merge or hashing policy as a type parameter instead of hard-coding
//! one.

use std::cmp::Ordering;

/// A total order over `K`, supplied by the caller.
pub trait KeyOrder<K: ?Sized> {
    /// Compare two keys. Must be a strict total order and must be consistent
    /// across the lifetime of a single `BigMap`/`SortedMap` instance.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// The common case: order keys by their `Ord` implementation.
///
/// This is what every doctest and the reference-model property tests use;
/// it is correct whenever `Ord` already reflects the intended key order
/// (true for all integer keys and for byte strings compared in the
/// conventional lexicographic sense).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NativeOrder;

impl<K: Ord + ?Sized> KeyOrder<K> for NativeOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Orders `Vec<u8>`/`[u8]`-shaped keys by byte-lexicographic comparison of
/// their canonical serialization, for callers whose substrate defines key
/// order that way rather than via `Ord`. For `Vec<u8>` keys the two
/// coincide, but this type documents the distinction at the API surface
/// rather than silently assuming it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteLexOrder;

impl KeyOrder<Vec<u8>> for ByteLexOrder {
    fn compare(&self, a: &Vec<u8>, b: &Vec<u8>) -> Ordering {
        a.as_slice().cmp(b.as_slice())
    }
}

impl KeyOrder<[u8]> for ByteLexOrder {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
