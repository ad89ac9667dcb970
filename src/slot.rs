//! Storage-slot allocator.
//!
//! A classic arena-plus-typed-handle: [`SlotAllocator`] owns a `Vec<Slot<T>>`
//! addressed by `u64` index, and hands out [`StoredSlot`]/[`ReservedSlot`]
//! handles so that "this index is occupied" and "this index is claimed but
//! not yet filled" are distinct, unforgeable states instead of booleans
//! buried in the value type. Freed slots link onto an intrusive free-list
//! through their own `Vacant` variant rather than a side `Vec<u64>`, and a
//! handle stays a small `Copy` value distinct from the object it addresses.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved sentinel: never a valid allocated index.
pub const NULL: u64 = 0;
/// Logical alias for the map header's inline root node.
pub const ROOT: u64 = 1;
/// First index the allocator will ever hand out.
pub const FIRST: u64 = 10;

/// `true` iff `idx` is the null sentinel.
pub fn is_null(idx: u64) -> bool {
    idx == NULL
}

/// `true` iff `idx` falls in the reserved-but-unallocated range `[1, FIRST)`.
pub fn is_special_unused(idx: u64) -> bool {
    idx > NULL && idx < FIRST
}

/// A slot's contents: either a live value, or a cell in the free-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Slot<T> {
    Occupied(T),
    Vacant { next: u64 },
}

/// A unique, owning handle to a filled slot.
///
/// `remove`/`free_reserved_slot` are the only ways to give one up; there is
/// no `Clone`/`Copy` impl, so a slot cannot be freed twice through aliased
/// handles.
#[derive(Debug)]
pub struct StoredSlot {
    index: u64,
}

impl StoredSlot {
    /// The slot index this handle owns.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Reconstruct a handle from a raw index, bypassing the allocator.
    ///
    /// Safe only because the B+tree's own invariants (every non-root slot
    /// has exactly one inner-node parent pointing at it) guarantee the
    /// index is owned uniquely; `Child::Inner` stores a plain `u64` rather
    /// than a `StoredSlot` because `SortedMap` values must stay ordinary
    /// serializable data, so merge/split/remove must be able to rebuild the
    /// owning handle to call `remove`/`remove_and_reserve`.
    pub(crate) fn from_index_unchecked(index: u64) -> StoredSlot {
        StoredSlot { index }
    }
}

/// A non-owning, single-use handle asserting that `index` is claimed but not
/// yet filled. Must be consumed by exactly one of `fill_reserved_slot` or
/// `free_reserved_slot`.
#[derive(Debug)]
pub struct ReservedSlot {
    index: u64,
}

impl ReservedSlot {
    /// The slot index this reservation names.
    pub fn index(&self) -> u64 {
        self.index
    }
}

/// An arena of `Slot<T>` addressed by stable `u64` identities.
#[derive(Debug)]
pub struct SlotAllocator<T> {
    slots: Vec<Option<Slot<T>>>,
    free_head: u64,
    spare_len: u64,
    occupied_len: u64,
    reuse: bool,
}

impl<T> SlotAllocator<T> {
    /// A new, empty allocator. The backing store is not materialized until
    /// the first allocation.
    pub fn new(reuse: bool) -> Self {
        SlotAllocator {
            slots: Vec::new(),
            free_head: NULL,
            spare_len: 0,
            occupied_len: 0,
            reuse,
        }
    }

    /// Whether freed slots are recycled instead of dropped.
    pub fn is_reusable(&self) -> bool {
        self.reuse
    }

    /// Number of currently occupied slots.
    pub fn len(&self) -> u64 {
        self.occupied_len
    }

    pub fn is_empty(&self) -> bool {
        self.occupied_len == 0
    }

    /// Number of vacant slots sitting on the free-list, ready for O(1) reuse.
    pub fn spare_len(&self) -> u64 {
        self.spare_len
    }

    fn next_monotonic_index(&self) -> u64 {
        FIRST + self.slots.len() as u64
    }

    fn at(&self, idx: u64) -> Option<&Slot<T>> {
        let local = idx.checked_sub(FIRST)?;
        self.slots.get(local as usize)?.as_ref()
    }

    fn at_mut(&mut self, idx: u64) -> Option<&mut Slot<T>> {
        let local = idx.checked_sub(FIRST)?;
        self.slots.get_mut(local as usize)?.as_mut()
    }

    /// Push `n` freshly created `Vacant` cells onto the free-list so future
    /// `reserve_slot` calls are O(1) and storage-creation-cost-free.
    /// Requires a reusable allocator.
    pub fn allocate_spare(&mut self, n: u64) -> Result<()> {
        if !self.reuse {
            return Err(Error::CannotHaveSparesWithoutReuse);
        }
        for _ in 0..n {
            let idx = self.next_monotonic_index();
            self.slots.push(Some(Slot::Vacant {
                next: self.free_head,
            }));
            self.free_head = idx;
            self.spare_len += 1;
        }
        trace!("allocate_spare: pushed {} vacant slots, spare_len={}", n, self.spare_len);
        Ok(())
    }

    /// Pop a free-list head, if any, re-exposing its index for reservation.
    fn pop_free(&mut self) -> Option<u64> {
        if self.free_head == NULL {
            return None;
        }
        let idx = self.free_head;
        let next = match self.slots.get(idx.checked_sub(FIRST)? as usize)? {
            Some(Slot::Vacant { next }) => *next,
            _ => unreachable!("free-list head must be Vacant"),
        };
        self.free_head = next;
        self.spare_len -= 1;
        Some(idx)
    }

    /// Reserve a slot index without filling it. Reused index if the
    /// free-list is non-empty, else the next monotonic index.
    pub fn reserve_slot(&mut self) -> (StoredSlot, ReservedSlot) {
        let idx = match self.pop_free() {
            Some(idx) => idx,
            None => {
                let idx = self.next_monotonic_index();
                self.slots.push(None);
                idx
            }
        };
        (StoredSlot { index: idx }, ReservedSlot { index: idx })
    }

    /// Fill a reservation with a value, transitioning the slot to Occupied.
    pub fn fill_reserved_slot(&mut self, reservation: ReservedSlot, value: T) {
        let local = (reservation.index - FIRST) as usize;
        self.slots[local] = Some(Slot::Occupied(value));
        self.occupied_len += 1;
        // `reservation` is consumed by move; nothing further to release.
    }

    /// `reserve_slot` followed by `fill_reserved_slot`, in one call.
    pub fn add(&mut self, value: T) -> StoredSlot {
        let (stored, reserved) = self.reserve_slot();
        self.fill_reserved_slot(reserved, value);
        stored
    }

    /// Extract the value at `idx`, leaving behind a reservation on the same
    /// index so the caller may refill it with a different value. Used by
    /// split/merge to mutate two nodes without aliased mutable borrows.
    pub fn remove_and_reserve(&mut self, idx: u64) -> Result<(ReservedSlot, T)> {
        let local = idx
            .checked_sub(FIRST)
            .ok_or(Error::InternalInvariantBroken("remove_and_reserve: index below FIRST"))?;
        let slot = self
            .slots
            .get_mut(local as usize)
            .ok_or(Error::InternalInvariantBroken("remove_and_reserve: index out of range"))?;
        match slot.take() {
            Some(Slot::Occupied(value)) => {
                *slot = None;
                self.occupied_len -= 1;
                Ok((ReservedSlot { index: idx }, value))
            }
            other => {
                *slot = other;
                Err(Error::InternalInvariantBroken(
                    "remove_and_reserve: slot not occupied",
                ))
            }
        }
    }

    /// Remove an owned slot, returning its value. Recycles the index onto
    /// the free-list iff the allocator is reusable.
    pub fn remove(&mut self, slot: StoredSlot) -> Result<T> {
        let idx = slot.index;
        let local = (idx - FIRST) as usize;
        let value = match self.slots.get_mut(local).and_then(Option::take) {
            Some(Slot::Occupied(value)) => value,
            _ => return Err(Error::InternalInvariantBroken("remove: slot not occupied")),
        };
        self.occupied_len -= 1;
        if self.reuse {
            self.slots[local] = Some(Slot::Vacant {
                next: self.free_head,
            });
            self.free_head = idx;
            self.spare_len += 1;
            trace!("remove: recycled slot {idx} onto free-list, spare_len={}", self.spare_len);
        } else {
            self.slots[local] = None;
            trace!("remove: dropped slot {idx}, reuse disabled");
        }
        Ok(value)
    }

    /// Release a reservation together with the owning handle it is paired
    /// with, without ever having filled it. Both handles must name the same
    /// index.
    pub fn free_reserved_slot(&mut self, reservation: ReservedSlot, stored: StoredSlot) -> Result<()> {
        if reservation.index != stored.index {
            return Err(Error::InvalidArgument(
                "free_reserved_slot: reservation and stored handle index mismatch",
            ));
        }
        let idx = reservation.index;
        let local = (idx - FIRST) as usize;
        if self.reuse {
            self.slots[local] = Some(Slot::Vacant {
                next: self.free_head,
            });
            self.free_head = idx;
            self.spare_len += 1;
        } else {
            self.slots[local] = None;
        }
        Ok(())
    }

    /// Immutable access to an occupied slot's value.
    pub fn borrow(&self, idx: u64) -> Result<&T> {
        match self.at(idx) {
            Some(Slot::Occupied(value)) => Ok(value),
            _ => Err(Error::KeyNotFound),
        }
    }

    /// Mutable access to an occupied slot's value.
    pub fn borrow_mut(&mut self, idx: u64) -> Result<&mut T> {
        match self.at_mut(idx) {
            Some(Slot::Occupied(value)) => Ok(value),
            _ => Err(Error::KeyNotFound),
        }
    }

    /// Drain the free-list, assert no occupied slots remain, and drop the
    /// backing store.
    pub fn destroy_empty(mut self) -> Result<()> {
        if self.occupied_len != 0 {
            return Err(Error::MapNotEmpty);
        }
        self.slots.clear();
        self.free_head = NULL;
        self.spare_len = 0;
        Ok(())
    }
}
