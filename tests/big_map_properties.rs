//! Property-based tests for `BigMap`: ordering, completeness, model
//! equivalence against a reference map, round-trip idempotence, iterator
//! invariants, and structural invariants after every mutation.
//!
//! Drives a small op-sequence DSL through `quickcheck`, with
//! `std::collections::BTreeMap` standing in as the reference model.

use quickcheck::{Arbitrary, Gen, TestResult};
use quickcheck_macros::quickcheck;
use std::collections::BTreeMap;

use slotted_btree_stack::{BigMap, Error, NativeOrder};

#[derive(Debug, Clone)]
enum Op {
    Add(u16, u16),
    Upsert(u16, u16),
    Remove(u16),
    RemoveOrNone(u16),
    Get(u16),
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        let key = u16::arbitrary(g) % 64;
        let value = u16::arbitrary(g);
        match u8::arbitrary(g) % 5 {
            0 => Op::Add(key, value),
            1 => Op::Upsert(key, value),
            2 => Op::Remove(key),
            3 => Op::RemoveOrNone(key),
            _ => Op::Get(key),
        }
    }
}

fn ordered_model(model: &BTreeMap<u16, u16>) -> Vec<(u16, u16)> {
    model.iter().map(|(&k, &v)| (k, v)).collect()
}

/// Every op sequence keeps `BigMap` and a `BTreeMap` reference model
/// agreeing on lookups and full enumeration.
#[quickcheck]
fn op_sequence_matches_btreemap_reference_model(ops: Vec<Op>) -> TestResult {
    let mut m: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    let mut model: BTreeMap<u16, u16> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Add(k, v) => {
                let map_result = m.add(k, v);
                let model_had_it = model.contains_key(&k);
                if model_had_it {
                    assert_eq!(map_result, Err(Error::KeyAlreadyExists));
                } else {
                    assert!(map_result.is_ok());
                    model.insert(k, v);
                }
            }
            Op::Upsert(k, v) => {
                let old = m.upsert(k, v).unwrap();
                assert_eq!(old, model.insert(k, v));
            }
            Op::Remove(k) => {
                let result = m.remove(&k);
                match model.remove(&k) {
                    Some(v) => assert_eq!(result, Ok(v)),
                    None => assert_eq!(result, Err(Error::KeyNotFound)),
                }
            }
            Op::RemoveOrNone(k) => {
                let result = m.remove_or_none(&k);
                assert_eq!(result, model.remove(&k));
            }
            Op::Get(k) => {
                assert_eq!(m.get(&k), model.get(&k).copied());
                assert_eq!(m.contains(&k), model.contains_key(&k));
            }
        }
    }

    assert_eq!(m.to_ordered_map(), ordered_model(&model));
    assert_eq!(m.len() as usize, model.len());
    TestResult::passed()
}

/// Forward and reverse traversal visit every element exactly once, in
/// strictly increasing / decreasing order.
#[quickcheck]
fn forward_and_reverse_traversal_are_ordered_and_complete(keys: Vec<u16>) {
    let mut m: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    let mut inserted = std::collections::BTreeSet::new();
    for k in keys {
        if m.upsert(k, k).unwrap().is_none() {
            inserted.insert(k);
        }
    }

    let mut forward = Vec::new();
    let mut it = m.iter_begin();
    while !m.iter_is_end(it) {
        forward.push(*m.iter_borrow_key(it).unwrap());
        it = m.iter_next(it).unwrap();
    }
    assert_eq!(forward.len(), inserted.len());
    assert!(forward.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(forward, inserted.iter().copied().collect::<Vec<_>>());
    assert_eq!(forward.len() as u64, m.len());

    let mut backward = Vec::new();
    let mut it = m.iter_end();
    while !m.iter_is_begin(it) {
        it = m.iter_prev(it).unwrap();
        backward.push(*m.iter_borrow_key(it).unwrap());
    }
    assert_eq!(backward.len(), forward.len());
    assert!(backward.windows(2).all(|w| w[0] > w[1]));
}

/// Adding an absent key then removing it again leaves enumeration, length
/// and allocator footprint unchanged.
#[quickcheck]
fn insert_then_remove_round_trip_is_a_no_op(keys: Vec<u16>, k: u16) -> TestResult {
    let mut m: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    for key in &keys {
        let _ = m.upsert(*key, *key);
    }
    if m.contains(&k) {
        return TestResult::discard();
    }

    let before = m.to_ordered_map();
    let before_len = m.len();
    let before_nodes = m.allocated_node_count();

    m.add(k, k).unwrap();
    m.remove(&k).unwrap();

    assert_eq!(m.to_ordered_map(), before);
    assert_eq!(m.len(), before_len);
    assert_eq!(m.allocated_node_count(), before_nodes);
    TestResult::passed()
}

/// Reuse-mode variant: in reuse mode the round trip may leave one more
/// spare slot behind rather than shrinking the allocator back to baseline.
#[quickcheck]
fn insert_then_remove_round_trip_is_a_no_op_in_reuse_mode(keys: Vec<u16>, k: u16) -> TestResult {
    let mut m: BigMap<u16, u16> = BigMap::new_with_config(4, 4, true, NativeOrder).unwrap();
    for key in &keys {
        let _ = m.upsert(*key, *key);
    }
    if m.contains(&k) {
        return TestResult::discard();
    }

    let before = m.to_ordered_map();
    let before_len = m.len();
    let before_spare = m.spare_node_count();

    m.add(k, k).unwrap();
    m.remove(&k).unwrap();

    assert_eq!(m.to_ordered_map(), before);
    assert_eq!(m.len(), before_len);
    assert!(m.spare_node_count() >= before_spare);
    TestResult::passed()
}

/// On integer keys, where the successor of any key `k` is exactly `k + 1`.
#[quickcheck]
fn iter_next_matches_lower_bound_of_successor_key(keys: Vec<u16>) {
    let mut m: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    for k in &keys {
        let _ = m.upsert(*k, *k);
    }

    for k in keys {
        let found = m.internal_find(&k);
        if m.iter_is_end(found) {
            continue;
        }
        if let Some(succ) = k.checked_add(1) {
            let via_next = m.iter_next(found);
            let via_lower_bound = m.internal_lower_bound(&succ);
            match via_next {
                Ok(n) => assert_eq!(n, via_lower_bound),
                Err(_) => assert!(m.iter_is_end(via_lower_bound)),
            }
        }
    }
}

/// `iter_prev(end)` reaches the maximum key, `iter_next(end)` aborts, and
/// symmetrically at `begin`.
#[quickcheck]
fn iterator_end_and_begin_sentinels_behave_correctly(keys: Vec<u16>) -> TestResult {
    if keys.is_empty() {
        return TestResult::discard();
    }
    let mut m: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    let mut max_key = keys[0];
    let mut min_key = keys[0];
    for k in &keys {
        let _ = m.upsert(*k, *k);
        max_key = max_key.max(*k);
        min_key = min_key.min(*k);
    }

    let end = m.iter_end();
    assert!(m.iter_next(end).is_err());
    let last = m.iter_prev(end).unwrap();
    assert_eq!(*m.iter_borrow_key(last).unwrap(), max_key);

    let begin = m.iter_begin();
    assert!(m.iter_prev(begin).is_err());
    assert_eq!(*m.iter_borrow_key(begin).unwrap(), min_key);
    TestResult::passed()
}

/// Degree bounds, per-node size bounds and leaf linked-list integrity, asserted
/// via the full invariant walk after every mutation in the sequence.
#[quickcheck]
fn structural_invariants_hold_after_every_op(ops: Vec<Op>) {
    let mut m: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    m.check_invariants().unwrap();
    for op in ops {
        match op {
            Op::Add(k, v) => {
                let _ = m.add(k, v);
            }
            Op::Upsert(k, v) => {
                let _ = m.upsert(k, v);
            }
            Op::Remove(k) => {
                let _ = m.remove(&k);
            }
            Op::RemoveOrNone(k) => {
                let _ = m.remove_or_none(&k);
            }
            Op::Get(_) => {}
        }
        m.check_invariants().unwrap();
    }
}

/// A constant-size value type allows `borrow_mut`; a variable-size one is
/// rejected outright. (The mutation-doesn't-change-size half of the
/// guarantee is a type-level property of `u16`/fixed-width integers, not
/// something a test can falsify by construction.)
#[test]
fn borrow_mut_guard_rejects_variable_size_value() {
    let mut fixed: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    fixed.add(1, 1).unwrap();
    *fixed.borrow_mut(&1).unwrap() += 41;
    assert_eq!(fixed.get(&1), Some(42));

    let mut variable: BigMap<u16, Vec<u8>> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    variable.add(1, vec![0u8; 3]).unwrap();
    assert_eq!(
        variable.borrow_mut(&1).err(),
        Some(Error::BorrowMutRequiresConstantValueSize)
    );
}

/// Exercises `intersection_zip_for_each_ref` (itertools-style zipped
/// traversal over two maps restricted to shared keys) against a plain
/// `itertools::merge_join_by` computation of the same thing.
#[test]
fn intersection_zip_matches_merge_join_by_reference() {
    use itertools::{EitherOrBoth, Itertools};

    let mut a: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    let mut b: BigMap<u16, u16> = BigMap::new_with_config(4, 4, false, NativeOrder).unwrap();
    for k in [1u16, 2, 3, 5, 8, 13, 21] {
        a.add(k, k * 10).unwrap();
    }
    for k in [2u16, 3, 5, 7, 11, 13] {
        b.add(k, k * 100).unwrap();
    }

    let mut actual = Vec::new();
    a.intersection_zip_for_each_ref(&b, |k, av, bv| actual.push((*k, *av, *bv)));

    let expected: Vec<(u16, u16, u16)> = a
        .to_ordered_map()
        .into_iter()
        .merge_join_by(b.to_ordered_map(), |x, y| x.0.cmp(&y.0))
        .filter_map(|eob| match eob {
            EitherOrBoth::Both((k, av), (_, bv)) => Some((k, av, bv)),
            _ => None,
        })
        .collect();

    assert_eq!(actual, expected);
}
