//! A slotted B+tree ordered-map engine.
//!
//! Three layers, leaves-first:
//!
//! - [`slot`]: a storage-slot allocator (arena + typed handle) backing tree
//!   nodes with stable `u64` identities and optional free-list recycling.
//! - [`sorted_map`]: a sorted-vector ordered map with binary-search lookup
//!   and cursor-style iteration, used for both leaf contents and inner-node
//!   child indexes.
//! - [`big_map`]: the B+tree itself, built on the two layers above, with an
//!   inline root, leaf-level linked lists, split/merge/borrow rebalancing
//!   and dynamic degree selection.
//!
//! [`compare`] and [`size`] hold the two policy traits ([`compare::KeyOrder`]
//! and [`size::EncodedSize`]) that callers inject rather than deriving from
//! `Ord`/serialization, since whether a type's natural order or its
//! canonical-serialization order is the one that matters is a property of
//! the embedding substrate, not of this engine.

pub mod big_map;
pub mod compare;
pub mod error;
pub mod size;
pub mod slot;
pub mod sorted_map;

pub use big_map::{BigMap, BigMapConfig, BigMapIter};
pub use compare::{ByteLexOrder, KeyOrder, NativeOrder};
pub use error::{Error, Result};
pub use size::EncodedSize;
pub use slot::{ReservedSlot, SlotAllocator, StoredSlot, FIRST, NULL, ROOT};
pub use sorted_map::{SortedMap, SortedMapCursor};

/// Initialize `env_logger` from the environment, if the `init_env_logger`
/// feature is enabled. Intended for tests and examples; library callers
/// embedding this crate in a larger substrate should initialize logging
/// themselves.
#[cfg(feature = "init_env_logger")]
pub fn init_logger() {
    let _ = env_logger::try_init();
}
