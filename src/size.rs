//! Canonical size accounting.
//!
//! The B+tree needs two numbers about every key and value: whether its
//! serialized size is a compile-time constant, and what its serialized size
//! actually is for a given instance. Splitting those into a const and a
//! method (rather than always measuring at runtime) lets fixed-width types
//! skip serialization entirely to answer both questions.

use std::mem::size_of;

/// Types whose canonical serialized size the engine can account for.
///
/// `CONSTANT_SIZE` must be `Some(n)` iff every value of `Self` encodes to
/// exactly `n` bytes; the engine uses this to decide whether `borrow_mut` is
/// safe (§4.3.5) and whether `new()`/`new_with_reusable()` may be used
/// without size hints (§4.3.1).
pub trait EncodedSize {
    /// `Some(n)` if every instance encodes to exactly `n` bytes, else `None`.
    const CONSTANT_SIZE: Option<usize>;

    /// The serialized size of this particular instance, in bytes.
    fn encoded_size(&self) -> usize;

    /// Convenience: whether this type has a constant serialized size.
    fn is_constant_size() -> bool {
        Self::CONSTANT_SIZE.is_some()
    }
}

macro_rules! impl_encoded_size_for_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl EncodedSize for $t {
                const CONSTANT_SIZE: Option<usize> = Some(size_of::<$t>());

                fn encoded_size(&self) -> usize {
                    size_of::<$t>()
                }
            }
        )*
    };
}

impl_encoded_size_for_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, bool, char, f32, f64);

impl EncodedSize for () {
    const CONSTANT_SIZE: Option<usize> = Some(0);

    fn encoded_size(&self) -> usize {
        0
    }
}

/// `Vec<u8>` is the canonical variable-sized key/value type used throughout
/// the tests: its canonical encoding is its raw bytes, no length prefix,
/// since size accounting only needs `len()` and never needs to reconstruct a
/// `Vec<u8>` from bytes.
impl EncodedSize for Vec<u8> {
    const CONSTANT_SIZE: Option<usize> = None;

    fn encoded_size(&self) -> usize {
        self.len()
    }
}

impl EncodedSize for String {
    const CONSTANT_SIZE: Option<usize> = None;

    fn encoded_size(&self) -> usize {
        self.len()
    }
}

impl<const N: usize> EncodedSize for [u8; N] {
    const CONSTANT_SIZE: Option<usize> = Some(N);

    fn encoded_size(&self) -> usize {
        N
    }
}

/// Canonical byte size of a `serde`-serializable value, computed through
/// `bincode`. Types whose canonical encoding is *not* bincode's should
/// implement [`EncodedSize`] directly instead of going through this helper;
/// it exists for the common case of a type that already derives
/// `Serialize` and has no bespoke canonical form of its own.
pub fn bincode_encoded_size<T: serde::Serialize>(value: &T) -> usize {
    bincode::serialized_size(value).expect("bincode size computation is infallible for in-memory values") as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Pair {
        a: u32,
        b: u64,
    }

    #[test]
    fn bincode_encoded_size_matches_serialized_len() {
        let p = Pair { a: 1, b: 2 };
        let bytes = bincode::serialize(&p).unwrap();
        assert_eq!(bincode_encoded_size(&p), bytes.len());
    }
}
