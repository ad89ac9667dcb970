//! Crate-wide error type.
//!
//! Every failure mode named in the component tables is a distinct variant so
//! that callers can match on kind rather than parse free-text messages.

use thiserror::Error;

/// Errors produced by the slot allocator, the sorted map, and the B+tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // -- argument errors --------------------------------------------------
    #[error("key already exists")]
    KeyAlreadyExists,
    #[error("key not found")]
    KeyNotFound,
    #[error("iterator out of bounds")]
    IterOutOfBounds,
    #[error("invalid config parameter: {0}")]
    InvalidConfigParameter(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("new key is not in order with its neighbors")]
    NewKeyNotInOrder,
    #[error("key bytes exceed the per-node size budget")]
    KeyBytesTooLarge,
    #[error("value bytes exceed the per-node size budget")]
    ArgumentBytesTooLarge,
    #[error("borrow_mut requires a constant-serialized-size value type")]
    BorrowMutRequiresConstantValueSize,
    #[error("new()/new_with_reusable() require constant-serialized-size key and value types")]
    CannotUseNewWithVariableSizedTypes,
    #[error("allocate_spare requires a reusable allocator")]
    CannotHaveSparesWithoutReuse,

    // -- state errors -------------------------------------------------------
    #[error("destroy_empty called on a non-empty map")]
    MapNotEmpty,

    // -- internal invariant errors -------------------------------------------
    #[error("internal invariant broken: {0}")]
    InternalInvariantBroken(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
