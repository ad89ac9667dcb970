//! Concrete, deterministic scenario tests covering configuration reuse,
//! out-of-order insertion, duplicate rejection, the `borrow_mut` size guard,
//! a long randomized sequence checked against a reference map, and the
//! default degree-auto-selection size bounds.

use slotted_btree_stack::{BigMap, Error};

#[test]
fn config_with_reuse_recycles_slots_across_inserts_and_removes() {
    let mut m: BigMap<u64, u64> = BigMap::new_with_config(5, 3, true, slotted_btree_stack::NativeOrder).unwrap();
    m.allocate_spare(2).unwrap();
    m.add(1, 1).unwrap();
    m.add(2, 2).unwrap();
    assert_eq!(m.upsert(3, 3).unwrap(), None);
    m.add(4, 4).unwrap();
    assert_eq!(m.upsert(4, 8).unwrap(), Some(4));
    m.add(5, 5).unwrap();
    m.add(6, 6).unwrap();

    let expected = [(1u64, 1u64), (2, 2), (3, 3), (4, 8), (5, 5), (6, 6)];
    for (k, v) in expected {
        assert_eq!(m.get(&k), Some(v));
    }

    for k in [5u64, 4, 1, 3, 2, 6] {
        m.remove(&k).unwrap();
    }
    assert!(m.is_empty());
    m.destroy_empty().unwrap();
}

#[test]
fn out_of_order_insertion_yields_sorted_enumeration() {
    let mut m: BigMap<u64, u64> = BigMap::new_with_config(4, 3, false, slotted_btree_stack::NativeOrder).unwrap();
    for k in [1u64, 3, 6, 2, 9, 5, 7, 4, 8] {
        m.add(k, k).unwrap();
    }
    let all = m.to_ordered_map();
    let expected: Vec<(u64, u64)> = (1..=9).map(|k| (k, k)).collect();
    assert_eq!(all, expected);
}

#[test]
fn duplicate_add_aborts_with_key_already_exists() {
    let mut m: BigMap<u64, u64> = BigMap::new_with_config(4, 4, false, slotted_btree_stack::NativeOrder).unwrap();
    for k in 1..=9u64 {
        m.add(k, k).unwrap();
    }
    assert_eq!(m.add(3, 3), Err(Error::KeyAlreadyExists));
}

#[test]
fn borrow_mut_rejects_variable_sized_value() {
    let mut m: BigMap<u64, Vec<u8>> =
        BigMap::new_with_config(0, 0, false, slotted_btree_stack::NativeOrder).unwrap();
    m.add(1, vec![1u8]).unwrap();
    assert_eq!(
        m.borrow_mut(&1).err(),
        Some(Error::BorrowMutRequiresConstantValueSize)
    );
}

#[test]
fn large_random_sequence_matches_reference_model() {
    use std::collections::BTreeMap;

    let mut m: BigMap<u64, u64> = BigMap::new_with_config(0, 0, false, slotted_btree_stack::NativeOrder).unwrap();
    let mut model: BTreeMap<u64, u64> = BTreeMap::new();

    let mut x: u64 = 7;
    let mut inserted: Vec<u64> = Vec::new();

    for i in 0..500u64 {
        x = (x + 270_001) % 1_000_000;
        if i < 350 || i % 3 != 0 {
            // insert phase, with later deletions mixed in
            let _ = m.upsert(x, x);
            model.insert(x, x);
            inserted.push(x);
        } else if let Some(victim) = inserted.pop() {
            let _ = m.remove_or_none(&victim);
            model.remove(&victim);
        }

        if i % 50 == 0 {
            let forward: Vec<(u64, u64)> = m.to_ordered_map();
            let expected: Vec<(u64, u64)> = model.iter().map(|(&k, &v)| (k, v)).collect();
            assert_eq!(forward, expected, "divergence at iteration {i}");
        }
    }

    let forward: Vec<(u64, u64)> = m.to_ordered_map();
    let expected: Vec<(u64, u64)> = model.iter().map(|(&k, &v)| (k, v)).collect();
    assert_eq!(forward, expected);
    assert_eq!(m.len() as usize, model.len());
}

#[test]
fn default_sizing_bounds_reject_oversized_keys() {
    let mut m: BigMap<Vec<u8>, u64> =
        BigMap::new_with_config(0, 0, false, slotted_btree_stack::NativeOrder).unwrap();
    m.add(vec![1u8], 1).unwrap();
    m.add(vec![7u8; 5000], 1).unwrap();
    assert_eq!(m.add(vec![7u8; 5200], 1), Err(Error::KeyBytesTooLarge));
}
