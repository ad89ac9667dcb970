//! B+tree ordered map.
//!
//! Non-root nodes live in a [`SlotAllocator`]; the root is kept inline on
//! the struct under the `ROOT` alias so the common small-map case never
//! touches the allocator at all. Inner-node children are keyed by the max
//! key of the subtree they point at (so a lookup is a repeated
//! lower-bound descent), and leaves form a doubly-linked list via
//! `prev`/`next` for ordered range scans.

mod config;
mod iter;
mod node;

use std::cmp::Ordering;

use log::{debug, error, trace};

use crate::compare::{KeyOrder, NativeOrder};
use crate::error::{Error, Result};
use crate::size::EncodedSize;
use crate::slot::{is_null, SlotAllocator, StoredSlot, NULL, ROOT};
use crate::sorted_map::SortedMap;

use node::{Child, Node};

pub use config::{
    BigMapConfig, INNER_MIN_DEGREE, LEAF_MIN_DEGREE, MAX_DEGREE, MAX_NODE_BYTES,
};
pub use iter::BigMapIter;

use config::{auto_inner_degree, auto_leaf_degree, degrees_from_hints, validate_degree};

/// An ordered map backed by a B+tree of slot-allocated nodes.
///
/// `C` is the injected key comparator (see [`KeyOrder`]); it defaults to
/// [`NativeOrder`], which orders keys by their `Ord` implementation.
pub struct BigMap<K, V, C = NativeOrder> {
    root: Node<K, V>,
    nodes: SlotAllocator<Node<K, V>>,
    cmp: C,
    len: u64,
    inner_max_degree: u64,
    leaf_max_degree: u64,
    min_leaf: u64,
    max_leaf: u64,
}

impl<K, V> BigMap<K, V, NativeOrder>
where
    K: EncodedSize,
    V: EncodedSize,
{
    /// A new map with a non-reusing allocator, using `K`/`V`'s constant
    /// serialized sizes to pick both levels' degrees up front. Fails if
    /// either type has a variable serialized size (use
    /// [`Self::new_with_type_size_hints`] instead).
    pub fn new() -> Result<Self> {
        Self::new_with_reusable(false)
    }

    pub fn new_with_reusable(reuse: bool) -> Result<Self> {
        let key_size = K::CONSTANT_SIZE.ok_or(Error::CannotUseNewWithVariableSizedTypes)?;
        let value_size = V::CONSTANT_SIZE.ok_or(Error::CannotUseNewWithVariableSizedTypes)?;
        let inner_degree = auto_inner_degree(key_size);
        let leaf_degree = auto_leaf_degree(key_size + value_size);
        Self::new_with_config(inner_degree, leaf_degree, reuse, NativeOrder)
    }

    /// A new map for variable-sized `K`/`V`, choosing degrees from
    /// observed average/worst-case sizes instead of a compile-time
    /// constant.
    pub fn new_with_type_size_hints(
        avg_key_size: u64,
        max_key_size: u64,
        avg_value_size: u64,
        max_value_size: u64,
        reuse: bool,
    ) -> Result<Self> {
        let (inner_degree, leaf_degree) =
            degrees_from_hints(avg_key_size, max_key_size, avg_value_size, max_value_size)?;
        Self::new_with_config(inner_degree, leaf_degree, reuse, NativeOrder)
    }
}

impl<K, V, C> BigMap<K, V, C>
where
    C: KeyOrder<K>,
{
    /// Construct with explicit degrees (`0` = defer to the first insert)
    /// and an explicit comparator.
    pub fn new_with_config(
        inner_max_degree: u64,
        leaf_max_degree: u64,
        reuse: bool,
        cmp: C,
    ) -> Result<Self> {
        validate_degree(inner_max_degree, INNER_MIN_DEGREE)?;
        validate_degree(leaf_max_degree, LEAF_MIN_DEGREE)?;
        Ok(BigMap {
            root: Node::empty_leaf(),
            nodes: SlotAllocator::new(reuse),
            cmp,
            len: 0,
            inner_max_degree,
            leaf_max_degree,
            min_leaf: ROOT,
            max_leaf: ROOT,
        })
    }
}

impl<K, V, C> BigMap<K, V, C> {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_reusable(&self) -> bool {
        self.nodes.is_reusable()
    }

    /// Number of nodes in the allocator, excluding the inline root.
    pub fn allocated_node_count(&self) -> u64 {
        self.nodes.len()
    }

    /// Number of vacant slots available for O(1) reuse.
    pub fn spare_node_count(&self) -> u64 {
        self.nodes.spare_len()
    }

    /// Pre-allocate `n` vacant node slots onto the allocator's free-list so
    /// future splits/promotions reserve them for free. Requires a reusable
    /// map (`reuse_slots = true`); see [`SlotAllocator::allocate_spare`].
    pub fn allocate_spare(&mut self, n: u64) -> Result<()> {
        self.nodes.allocate_spare(n)
    }

    pub fn inner_max_degree(&self) -> u64 {
        self.inner_max_degree
    }

    pub fn leaf_max_degree(&self) -> u64 {
        self.leaf_max_degree
    }

    fn node_ref(&self, idx: u64) -> &Node<K, V> {
        if idx == ROOT {
            &self.root
        } else {
            self.nodes
                .borrow(idx)
                .expect("node index must name an occupied slot")
        }
    }

    fn node_mut(&mut self, idx: u64) -> &mut Node<K, V> {
        if idx == ROOT {
            &mut self.root
        } else {
            self.nodes
                .borrow_mut(idx)
                .expect("node index must name an occupied slot")
        }
    }

    /// `ceil(max_degree / 2)`, the non-root fill threshold from I3
    /// (`2k >= max_degree`). `INNER_MIN_DEGREE`/`LEAF_MIN_DEGREE` bound what
    /// `max_degree` itself may be configured as (enforced in
    /// `validate_degree`/`auto_inner_degree`/`auto_leaf_degree`); they are
    /// not an additional floor on top of this formula; applying one on top
    /// would force a merge to only fire when a sibling already sits at
    /// `max_degree`, letting the merged node exceed it (violating I4).
    fn min_fill(max_degree: u64) -> u64 {
        (max_degree + 1) / 2
    }

    fn min_fill_for(&self, idx: u64) -> u64 {
        if self.node_ref(idx).is_leaf {
            Self::min_fill(self.leaf_max_degree)
        } else {
            Self::min_fill(self.inner_max_degree)
        }
    }

    fn ensure_degrees_selected(&mut self, key: &K, value: &V)
    where
        K: EncodedSize,
        V: EncodedSize,
    {
        if self.inner_max_degree == 0 {
            self.inner_max_degree = auto_inner_degree(key.encoded_size());
            debug!("degree selection: inner_max_degree={} (from key size {})", self.inner_max_degree, key.encoded_size());
        }
        if self.leaf_max_degree == 0 {
            self.leaf_max_degree = auto_leaf_degree(key.encoded_size() + value.encoded_size());
            debug!("degree selection: leaf_max_degree={} (from entry size {})", self.leaf_max_degree, key.encoded_size() + value.encoded_size());
        }
    }

    /// Reject an entry that would blow the per-node byte budget once laid
    /// out at the currently selected degree. Checked against the
    /// degree actually in force rather than a flat constant, so the bound
    /// tightens or loosens with whatever `inner_max_degree`/`leaf_max_degree`
    /// turned out to be (auto-selected or explicit) instead of only ever
    /// catching absurdly large single values.
    fn check_entry_size(&self, key: &K, value: &V) -> Result<()>
    where
        K: EncodedSize,
        V: EncodedSize,
    {
        let key_size = key.encoded_size() as u64;
        let value_size = value.encoded_size() as u64;
        if self.inner_max_degree != 0 && key_size.saturating_mul(self.inner_max_degree) > MAX_NODE_BYTES {
            return Err(Error::KeyBytesTooLarge);
        }
        if self.leaf_max_degree != 0 {
            if key_size.saturating_mul(self.leaf_max_degree) > MAX_NODE_BYTES {
                return Err(Error::KeyBytesTooLarge);
            }
            if value_size.saturating_mul(self.leaf_max_degree) > MAX_NODE_BYTES {
                return Err(Error::ArgumentBytesTooLarge);
            }
        }
        Ok(())
    }

    /// Destroy an empty map, releasing its allocator. Fails if any entries
    /// remain.
    pub fn destroy_empty(self) -> Result<()> {
        if self.len != 0 {
            return Err(Error::MapNotEmpty);
        }
        self.nodes.destroy_empty()
    }
}

impl<K, V, C> BigMap<K, V, C>
where
    C: KeyOrder<K>,
{
    /// Descend to the leaf that would hold `key`, without recording the
    /// path. Used by read-only operations.
    fn find_leaf(&self, cmp: &C, key: &K) -> u64 {
        let mut idx = ROOT;
        loop {
            let node = self.node_ref(idx);
            if node.is_leaf {
                return idx;
            }
            let cursor = node.children.internal_lower_bound(cmp, key);
            let cursor = if node.children.iter_is_end(cursor) {
                node.children
                    .iter_prev(cursor)
                    .expect("inner node must have at least one child")
            } else {
                cursor
            };
            let (_, child) = node
                .children
                .iter_borrow(cursor)
                .expect("cursor from lower_bound/prev must be valid");
            idx = child
                .as_inner_index()
                .expect("inner node children must be Child::Inner");
        }
    }

    /// Descend to the leaf that would hold `key`, recording every node
    /// visited (root first, leaf last). Used by mutating operations that
    /// may need to split or rebalance along the way back up.
    fn find_leaf_path(&self, cmp: &C, key: &K) -> Vec<u64> {
        let mut path = vec![ROOT];
        loop {
            let idx = *path.last().expect("path is never empty");
            let node = self.node_ref(idx);
            if node.is_leaf {
                return path;
            }
            let cursor = node.children.internal_lower_bound(cmp, key);
            let cursor = if node.children.iter_is_end(cursor) {
                node.children
                    .iter_prev(cursor)
                    .expect("inner node must have at least one child")
            } else {
                cursor
            };
            let (_, child) = node
                .children
                .iter_borrow(cursor)
                .expect("cursor from lower_bound/prev must be valid");
            let next_idx = child
                .as_inner_index()
                .expect("inner node children must be Child::Inner");
            path.push(next_idx);
        }
    }

    fn locate_child_key(&self, parent_idx: u64, child_idx: u64) -> K
    where
        K: Clone,
    {
        self.node_ref(parent_idx)
            .children
            .iter()
            .find(|(_, c)| c.as_inner_index() == Some(child_idx))
            .map(|(k, _)| k.clone())
            .expect("parent node must reference its own child")
    }
}

// -- reads ---------------------------------------------------------------

impl<K, V, C> BigMap<K, V, C>
where
    C: KeyOrder<K>,
{
    pub fn contains(&self, key: &K) -> bool {
        let leaf = self.find_leaf(&self.cmp, key);
        self.node_ref(leaf).children.contains(&self.cmp, key)
    }

    pub fn borrow(&self, key: &K) -> Option<&V> {
        let leaf = self.find_leaf(&self.cmp, key);
        self.node_ref(leaf)
            .children
            .borrow(&self.cmp, key)
            .and_then(Child::as_leaf_value)
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.borrow(key).cloned()
    }

    /// Mutable access to `key`'s value. Requires `V` to have a constant
    /// serialized size, since a caller could otherwise grow the value
    /// beyond the node's size budget without the engine noticing (§4.3.5).
    pub fn borrow_mut(&mut self, key: &K) -> Result<&mut V>
    where
        V: EncodedSize,
        C: Clone,
    {
        if !V::is_constant_size() {
            return Err(Error::BorrowMutRequiresConstantValueSize);
        }
        let cmp = self.cmp.clone();
        let leaf_idx = self.find_leaf(&cmp, key);
        self.node_mut(leaf_idx)
            .children
            .borrow_mut(&cmp, key)
            .and_then(Child::as_leaf_value_mut)
            .ok_or(Error::KeyNotFound)
    }

    pub fn prev_key(&self, key: &K) -> Option<(&K, &V)> {
        let leaf = self.find_leaf(&self.cmp, key);
        let it = self.leaf_lower_bound(leaf, key);
        if self.iter_is_begin(it) {
            return None;
        }
        let prev = self.iter_prev(it).ok()?;
        Some((self.iter_borrow_key(prev).ok()?, self.iter_borrow_value(prev).ok()?))
    }

    pub fn next_key(&self, key: &K) -> Option<(&K, &V)> {
        let leaf = self.find_leaf(&self.cmp, key);
        let mut it = self.leaf_lower_bound(leaf, key);
        if !self.iter_is_end(it) {
            if let Ok(k) = self.iter_borrow_key(it) {
                if self.cmp.compare(k, key) == Ordering::Equal {
                    it = self.iter_next(it).ok()?;
                }
            }
        }
        if self.iter_is_end(it) {
            return None;
        }
        Some((self.iter_borrow_key(it).ok()?, self.iter_borrow_value(it).ok()?))
    }

    pub fn borrow_front(&self) -> Option<(&K, &V)> {
        let it = self.iter_begin();
        if self.iter_is_end(it) {
            return None;
        }
        Some((self.iter_borrow_key(it).ok()?, self.iter_borrow_value(it).ok()?))
    }

    pub fn borrow_back(&self) -> Option<(&K, &V)> {
        let it = self.iter_prev(self.iter_end()).ok()?;
        Some((self.iter_borrow_key(it).ok()?, self.iter_borrow_value(it).ok()?))
    }

    pub fn for_each_leaf_node_children_ref<F: FnMut(&K, &V)>(&self, mut f: F) {
        let mut it = self.iter_begin();
        while !self.iter_is_end(it) {
            if let (Ok(k), Ok(v)) = (self.iter_borrow_key(it), self.iter_borrow_value(it)) {
                f(k, v);
            }
            it = match self.iter_next(it) {
                Ok(n) => n,
                Err(_) => break,
            };
        }
    }

    pub fn to_ordered_map(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let mut out = Vec::with_capacity(self.len as usize);
        self.for_each_leaf_node_children_ref(|k, v| out.push((k.clone(), v.clone())));
        out
    }

    /// Walk both maps' key order in lockstep, invoking `f` for every key
    /// present in both.
    pub fn intersection_zip_for_each_ref<F: FnMut(&K, &V, &V)>(&self, other: &Self, mut f: F) {
        let mut a = self.iter_begin();
        let mut b = other.iter_begin();
        while !self.iter_is_end(a) && !other.iter_is_end(b) {
            let ka = match self.iter_borrow_key(a) {
                Ok(k) => k,
                Err(_) => break,
            };
            let kb = match other.iter_borrow_key(b) {
                Ok(k) => k,
                Err(_) => break,
            };
            match self.cmp.compare(ka, kb) {
                Ordering::Less => {
                    a = match self.iter_next(a) {
                        Ok(n) => n,
                        Err(_) => break,
                    };
                }
                Ordering::Greater => {
                    b = match other.iter_next(b) {
                        Ok(n) => n,
                        Err(_) => break,
                    };
                }
                Ordering::Equal => {
                    let va = self.iter_borrow_value(a).expect("key just matched");
                    let vb = other.iter_borrow_value(b).expect("key just matched");
                    f(ka, va, vb);
                    a = match self.iter_next(a) {
                        Ok(n) => n,
                        Err(_) => break,
                    };
                    b = match other.iter_next(b) {
                        Ok(n) => n,
                        Err(_) => break,
                    };
                }
            }
        }
    }
}

// -- mutation: insert ------------------------------------------------------

impl<K, V, C> BigMap<K, V, C>
where
    C: KeyOrder<K> + Clone,
{
    pub fn add(&mut self, key: K, value: V) -> Result<()>
    where
        K: Clone + EncodedSize,
        V: EncodedSize,
    {
        self.check_entry_size(&key, &value)?;
        self.ensure_degrees_selected(&key, &value);
        let cmp = self.cmp.clone();
        let path = self.find_leaf_path(&cmp, &key);
        let leaf_idx = *path.last().expect("path is never empty");
        if self.node_ref(leaf_idx).children.contains(&cmp, &key) {
            return Err(Error::KeyAlreadyExists);
        }
        self.insert_at(path, key, Child::Leaf(value), &cmp)?;
        self.len += 1;
        Ok(())
    }

    pub fn upsert(&mut self, key: K, value: V) -> Result<Option<V>>
    where
        K: Clone + EncodedSize,
        V: EncodedSize,
    {
        self.check_entry_size(&key, &value)?;
        self.ensure_degrees_selected(&key, &value);
        let cmp = self.cmp.clone();
        let path = self.find_leaf_path(&cmp, &key);
        let leaf_idx = *path.last().expect("path is never empty");
        if self.node_ref(leaf_idx).children.contains(&cmp, &key) {
            let old = self.node_mut(leaf_idx).children.upsert(&cmp, key, Child::Leaf(value));
            return Ok(old.and_then(Child::into_leaf_value));
        }
        self.insert_at(path, key, Child::Leaf(value), &cmp)?;
        self.len += 1;
        Ok(None)
    }

    /// Insert `(key, child)` at `path`'s last node, renaming ancestor
    /// pivots if this made `key` the node's new max (a rightmost-spine
    /// rewrite triggered by inserting past the previous max key), then
    /// split upward as needed.
    fn insert_at(&mut self, path: Vec<u64>, key: K, child: Child<V>, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        let idx = *path.last().expect("path is never empty");
        let old_max = self
            .node_ref(idx)
            .children
            .borrow_back()
            .map(|(k, _)| k.clone());
        self.node_mut(idx).children.add(cmp, key.clone(), child)?;
        if let Some(old_max) = old_max {
            if cmp.compare(&key, &old_max) == Ordering::Greater {
                self.update_key(&path, &old_max, &key, cmp)?;
            }
        }
        self.maybe_split(path, cmp)
    }

    fn maybe_split(&mut self, mut path: Vec<u64>, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        loop {
            let idx = match path.last() {
                Some(&i) => i,
                None => return Ok(()),
            };
            let max_degree = if self.node_ref(idx).is_leaf {
                self.leaf_max_degree
            } else {
                self.inner_max_degree
            };
            if self.node_ref(idx).degree() as u64 <= max_degree {
                return Ok(());
            }
            if idx == ROOT {
                return self.split_root(cmp);
            }
            path.pop();
            self.split_node(idx, &path, cmp)?;
        }
    }

    /// Split an overflowing root in two brand-new slots (the root has no
    /// existing external identity to preserve, unlike a non-root split).
    fn split_root(&mut self, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        trace!("split_root: root degree {} exceeds max, growing tree height", self.root.degree());
        let total = self.root.degree();
        let mid = total / 2;
        let right_children = self.root.children.trim(mid);
        let is_leaf = self.root.is_leaf;
        let left_children = std::mem::take(&mut self.root.children);

        let left_stored = self.nodes.add(Node {
            is_leaf,
            children: left_children,
            prev: NULL,
            next: NULL,
        });
        let left_idx = left_stored.index();
        let right_stored = self.nodes.add(Node {
            is_leaf,
            children: right_children,
            prev: NULL,
            next: NULL,
        });
        let right_idx = right_stored.index();

        if is_leaf {
            self.node_mut(left_idx).next = right_idx;
            self.node_mut(right_idx).prev = left_idx;
            self.min_leaf = left_idx;
            self.max_leaf = right_idx;
        }

        let left_max = self
            .node_ref(left_idx)
            .children
            .borrow_back()
            .expect("split half is non-empty")
            .0
            .clone();
        let right_max = self
            .node_ref(right_idx)
            .children
            .borrow_back()
            .expect("split half is non-empty")
            .0
            .clone();

        let mut new_root_children = SortedMap::new();
        new_root_children
            .add(cmp, left_max, Child::Inner(left_idx))
            .expect("fresh map insert cannot collide");
        new_root_children
            .add(cmp, right_max, Child::Inner(right_idx))
            .expect("fresh map insert cannot collide");

        self.root = Node {
            is_leaf: false,
            children: new_root_children,
            prev: NULL,
            next: NULL,
        };
        Ok(())
    }

    /// Split a non-root overflowing node: the right half keeps `idx`'s
    /// slot (and therefore the parent's existing pointer to it needs no
    /// update), the left half gets a freshly allocated slot and a new
    /// pivot entry in the parent.
    fn split_node(&mut self, idx: u64, parent_path: &[u64], cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        trace!("split_node: node {idx} overflowed, reserving a new left-half slot");
        let (reserved, mut node) = self.nodes.remove_and_reserve(idx)?;
        let total = node.degree();
        let mid = total / 2;
        let right_children = node.children.trim(mid);
        let is_leaf = node.is_leaf;
        let old_prev = node.prev;
        let old_next = node.next;
        let left_children = std::mem::take(&mut node.children);

        let left_stored = self.nodes.add(Node {
            is_leaf,
            children: left_children,
            prev: old_prev,
            next: if is_leaf { idx } else { NULL },
        });
        let left_idx = left_stored.index();

        self.nodes.fill_reserved_slot(
            reserved,
            Node {
                is_leaf,
                children: right_children,
                prev: if is_leaf { left_idx } else { NULL },
                next: old_next,
            },
        );

        if is_leaf {
            if !is_null(old_prev) {
                self.node_mut(old_prev).next = left_idx;
            }
            if self.min_leaf == idx {
                self.min_leaf = left_idx;
            }
        }

        let left_max = self
            .node_ref(left_idx)
            .children
            .borrow_back()
            .expect("split half is non-empty")
            .0
            .clone();

        let parent_idx = *parent_path.last().expect("non-root split must have a parent");
        self.node_mut(parent_idx)
            .children
            .add(cmp, left_max, Child::Inner(left_idx))?;
        Ok(())
    }

    /// Rename the pivot naming the node at `path`'s end from `old_key` to
    /// `new_key` in every ancestor for which that node is (transitively)
    /// the rightmost child, stopping at the first ancestor where it is
    /// not. `old_key`/`new_key` stay constant across the whole walk: the
    /// same renamed value propagates identically at each level of a
    /// rightmost spine.
    fn update_key(&mut self, path: &[u64], old_key: &K, new_key: &K, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        if path.len() < 2 {
            return Ok(());
        }
        for level in (0..path.len() - 1).rev() {
            let parent_idx = path[level];
            let parent = self.node_mut(parent_idx);
            parent.children.replace_key_inplace(cmp, old_key, new_key.clone())?;
            let is_rightmost = {
                let back = parent.children.borrow_back().expect("parent is non-empty");
                cmp.compare(&back.0, new_key) == Ordering::Equal
            };
            if !is_rightmost {
                return Ok(());
            }
        }
        Ok(())
    }
}

// -- mutation: remove -------------------------------------------------------

impl<K, V, C> BigMap<K, V, C>
where
    C: KeyOrder<K> + Clone,
{
    pub fn remove(&mut self, key: &K) -> Result<V>
    where
        K: Clone,
    {
        let cmp = self.cmp.clone();
        let path = self.find_leaf_path(&cmp, key);
        let leaf_idx = *path.last().expect("path is never empty");
        if !self.node_ref(leaf_idx).children.contains(&cmp, key) {
            return Err(Error::KeyNotFound);
        }
        self.remove_at(path, key, &cmp)
    }

    pub fn remove_or_none(&mut self, key: &K) -> Option<V>
    where
        K: Clone,
    {
        self.remove(key).ok()
    }

    pub fn pop_front(&mut self) -> Option<(K, V)>
    where
        K: Clone,
    {
        let it = self.iter_begin();
        if self.iter_is_end(it) {
            return None;
        }
        let key = self.iter_borrow_key(it).ok()?.clone();
        let value = self.remove(&key).ok()?;
        Some((key, value))
    }

    pub fn pop_back(&mut self) -> Option<(K, V)>
    where
        K: Clone,
    {
        let it = self.iter_prev(self.iter_end()).ok()?;
        let key = self.iter_borrow_key(it).ok()?.clone();
        let value = self.remove(&key).ok()?;
        Some((key, value))
    }

    fn remove_at(&mut self, path: Vec<u64>, key: &K, cmp: &C) -> Result<V>
    where
        K: Clone,
    {
        let idx = *path.last().expect("path is never empty");
        let old_max = self
            .node_ref(idx)
            .children
            .borrow_back()
            .map(|(k, _)| k.clone());
        let removed = self.node_mut(idx).children.remove(cmp, key)?;
        let value = removed
            .into_leaf_value()
            .expect("leaf removal must yield a Child::Leaf value");

        if let Some(old_max) = &old_max {
            if cmp.compare(key, old_max) == Ordering::Equal {
                if let Some((new_max, _)) = self.node_ref(idx).children.borrow_back() {
                    let new_max = new_max.clone();
                    self.update_key(&path, old_max, &new_max, cmp)?;
                }
                // else: node is now empty; its stale parent pivot is cleaned
                // up by rebalance's merge/promote, not by renaming.
            }
        }

        self.rebalance(path, cmp)?;
        self.len -= 1;
        Ok(value)
    }

    fn rebalance(&mut self, mut path: Vec<u64>, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        loop {
            let idx = match path.last() {
                Some(&i) => i,
                None => return Ok(()),
            };
            if idx == ROOT {
                return self.fix_root();
            }
            let min_degree = self.min_fill_for(idx);
            let degree = self.node_ref(idx).degree() as u64;
            if degree >= min_degree {
                return Ok(());
            }
            path.pop();
            let parent_idx = *path.last().expect("non-root underflow must have a parent");
            self.fix_underflow(idx, parent_idx, cmp)?;
        }
    }

    /// If the (inner) root has collapsed to a single child, promote that
    /// child in its place, shrinking the tree's height.
    fn fix_root(&mut self) -> Result<()> {
        loop {
            if self.root.is_leaf || self.root.degree() != 1 {
                return Ok(());
            }
            let (_, only_child) = self.root.children.pop_back().expect("degree is 1");
            let child_idx = only_child
                .as_inner_index()
                .expect("inner root children are Child::Inner");
            let child_node = self.nodes.remove(StoredSlot::from_index_unchecked(child_idx))?;
            let promoted_is_leaf = child_node.is_leaf;
            self.root = child_node;
            if promoted_is_leaf {
                self.root.prev = NULL;
                self.root.next = NULL;
                self.min_leaf = ROOT;
                self.max_leaf = ROOT;
            }
        }
    }

    fn fix_underflow(&mut self, idx: u64, parent_idx: u64, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        let my_key = self.locate_child_key(parent_idx, idx);
        let my_cursor = self.node_ref(parent_idx).children.internal_find(cmp, &my_key);
        let prev_cursor = if self.node_ref(parent_idx).children.iter_is_begin(my_cursor) {
            None
        } else {
            Some(
                self.node_ref(parent_idx)
                    .children
                    .iter_prev(my_cursor)
                    .expect("not begin"),
            )
        };
        let next_cursor = {
            let n = self
                .node_ref(parent_idx)
                .children
                .iter_next(my_cursor)
                .expect("cursor found by internal_find is not end");
            if self.node_ref(parent_idx).children.iter_is_end(n) {
                None
            } else {
                Some(n)
            }
        };

        let min_degree = self.min_fill_for(idx);

        if let Some(pc) = prev_cursor {
            let prev_idx = self
                .node_ref(parent_idx)
                .children
                .iter_borrow(pc)
                .expect("valid cursor")
                .1
                .as_inner_index()
                .expect("inner node children are Child::Inner");
            if self.node_ref(prev_idx).degree() as u64 > min_degree {
                trace!("fix_underflow: node {idx} borrowing from prev sibling {prev_idx}");
                return self.borrow_from_prev(idx, prev_idx, parent_idx, cmp);
            }
        }
        if let Some(nc) = next_cursor {
            let next_idx = self
                .node_ref(parent_idx)
                .children
                .iter_borrow(nc)
                .expect("valid cursor")
                .1
                .as_inner_index()
                .expect("inner node children are Child::Inner");
            if self.node_ref(next_idx).degree() as u64 > min_degree {
                trace!("fix_underflow: node {idx} borrowing from next sibling {next_idx}");
                return self.borrow_from_next(idx, next_idx, parent_idx, cmp);
            }
        }
        if let Some(pc) = prev_cursor {
            let prev_idx = self
                .node_ref(parent_idx)
                .children
                .iter_borrow(pc)
                .expect("valid cursor")
                .1
                .as_inner_index()
                .expect("inner node children are Child::Inner");
            trace!("fix_underflow: node {idx} merging with prev sibling {prev_idx}");
            return self.merge_siblings(idx, prev_idx, parent_idx, cmp);
        }
        if let Some(nc) = next_cursor {
            let next_idx = self
                .node_ref(parent_idx)
                .children
                .iter_borrow(nc)
                .expect("valid cursor")
                .1
                .as_inner_index()
                .expect("inner node children are Child::Inner");
            trace!("fix_underflow: node {idx} merging with next sibling {next_idx}");
            return self.merge_siblings(idx, next_idx, parent_idx, cmp);
        }
        // Only child of its parent: nothing to borrow or merge with; the
        // parent's own underflow (if any) is handled one level up.
        Ok(())
    }

    /// Move `prev_idx`'s largest entry onto the front of `idx`, renaming
    /// `prev_idx`'s pivot in `parent_idx`. `prev_idx` is never its
    /// parent's rightmost child (idx sits to its right), so the rename
    /// never needs to propagate past `parent_idx`.
    fn borrow_from_prev(&mut self, idx: u64, prev_idx: u64, parent_idx: u64, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        let old_prev_max = self
            .node_ref(prev_idx)
            .children
            .borrow_back()
            .map(|(k, _)| k.clone())
            .expect("sibling with spare capacity is non-empty");
        let (moved_key, moved_child) = self
            .node_mut(prev_idx)
            .children
            .pop_back()
            .expect("sibling with spare capacity is non-empty");
        self.node_mut(idx)
            .children
            .add(cmp, moved_key, moved_child)
            .expect("borrowed key precedes idx's own entries by construction");
        let new_prev_max = self
            .node_ref(prev_idx)
            .children
            .borrow_back()
            .map(|(k, _)| k.clone())
            .expect("sibling retains at least one entry after lending");
        self.update_key(&[parent_idx, prev_idx], &old_prev_max, &new_prev_max, cmp)
    }

    /// Move `next_idx`'s smallest entry onto the back of `idx`, renaming
    /// `idx`'s own pivot in `parent_idx`. `idx` is never its parent's
    /// rightmost child (next_idx sits to its right), so the rename never
    /// needs to propagate past `parent_idx`.
    fn borrow_from_next(&mut self, idx: u64, next_idx: u64, parent_idx: u64, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        let old_idx_key = self.locate_child_key(parent_idx, idx);
        let (moved_key, moved_child) = self
            .node_mut(next_idx)
            .children
            .pop_front()
            .expect("sibling with spare capacity is non-empty");
        self.node_mut(idx)
            .children
            .add(cmp, moved_key.clone(), moved_child)
            .expect("borrowed key follows idx's own entries by construction");
        self.update_key(&[parent_idx, idx], &old_idx_key, &moved_key, cmp)
    }

    /// Merge two sibling nodes. The side with the greater max key survives
    /// under its existing slot and parent pointer (so its own ancestor
    /// pivots need no update); the other is destroyed, its entries
    /// appended into the survivor and its parent pivot removed.
    fn merge_siblings(&mut self, a_idx: u64, b_idx: u64, parent_idx: u64, cmp: &C) -> Result<()>
    where
        K: Clone,
    {
        let a_max = self.node_ref(a_idx).children.borrow_back().map(|(k, _)| k.clone());
        let b_max = self.node_ref(b_idx).children.borrow_back().map(|(k, _)| k.clone());
        let (survivor_idx, victim_idx) = match (&a_max, &b_max) {
            (Some(am), Some(bm)) => {
                if cmp.compare(am, bm) == Ordering::Greater {
                    (a_idx, b_idx)
                } else {
                    (b_idx, a_idx)
                }
            }
            (Some(_), None) => (a_idx, b_idx),
            (None, Some(_)) => (b_idx, a_idx),
            (None, None) => (a_idx, b_idx),
        };

        let victim_key = self.locate_child_key(parent_idx, victim_idx);
        self.node_mut(parent_idx).children.remove(cmp, &victim_key)?;

        let victim_node = self.nodes.remove(StoredSlot::from_index_unchecked(victim_idx))?;
        let is_leaf = victim_node.is_leaf;
        let (victim_prev, victim_next) = (victim_node.prev, victim_node.next);

        self.node_mut(survivor_idx)
            .children
            .append_disjoint(cmp, victim_node.children)
            .map_err(|_| {
                Error::InternalInvariantBroken("merge_siblings: sibling key ranges overlap")
            })?;

        if is_leaf {
            if victim_next == survivor_idx {
                // victim was the left neighbor of survivor.
                self.node_mut(survivor_idx).prev = victim_prev;
                if !is_null(victim_prev) {
                    self.node_mut(victim_prev).next = survivor_idx;
                }
                if self.min_leaf == victim_idx {
                    self.min_leaf = survivor_idx;
                }
            } else {
                // victim was the right neighbor of survivor.
                self.node_mut(survivor_idx).next = victim_next;
                if !is_null(victim_next) {
                    self.node_mut(victim_next).prev = survivor_idx;
                }
                if self.max_leaf == victim_idx {
                    self.max_leaf = survivor_idx;
                }
            }
        }
        Ok(())
    }
}

// -- invariant checking (debug/test only) ----------------------------------

impl<K, V, C> BigMap<K, V, C>
where
    C: KeyOrder<K>,
    K: EncodedSize + Clone,
    V: EncodedSize,
{
    /// Walk every node and assert ordering, fill, size-budget and
    /// leaf-chain invariants. Expensive (a full tree walk); intended for
    /// tests and debugging, not for the hot path of production callers.
    pub fn check_invariants(&self) -> Result<()> {
        self.check_node_recursive(ROOT, true)?;
        self.check_leaf_chain()
    }

    fn check_node_recursive(&self, idx: u64, is_root: bool) -> Result<()> {
        let node = self.node_ref(idx);
        let max_degree = if node.is_leaf {
            self.leaf_max_degree
        } else {
            self.inner_max_degree
        };
        let min_degree = self.min_fill_for(idx);
        let degree = node.degree() as u64;

        if degree > max_degree {
            error!("node {idx} exceeds max degree: {degree} > {max_degree}");
            return Err(Error::InternalInvariantBroken("node exceeds max degree"));
        }
        if !is_root && degree < min_degree {
            error!("node {idx} below min fill: {degree} < {min_degree}");
            return Err(Error::InternalInvariantBroken("non-root node below min fill"));
        }
        if is_root && !node.is_leaf && degree == 1 {
            error!("root has a single child and was not promoted");
            return Err(Error::InternalInvariantBroken("root should have been promoted"));
        }

        let mut prev: Option<&K> = None;
        let mut approx_bytes = 0u64;
        for (k, child) in node.children.iter() {
            if let Some(p) = prev {
                if self.cmp.compare(p, k) != Ordering::Less {
                    error!("node {idx} has keys out of order");
                    return Err(Error::InternalInvariantBroken("keys not strictly increasing"));
                }
            }
            approx_bytes += k.encoded_size() as u64;
            if let Child::Leaf(v) = child {
                approx_bytes += v.encoded_size() as u64;
            }
            prev = Some(k);
        }
        if approx_bytes > MAX_NODE_BYTES {
            error!("node {idx} exceeds serialized byte budget: {approx_bytes} > {MAX_NODE_BYTES}");
            return Err(Error::InternalInvariantBroken("node exceeds serialized byte budget"));
        }

        for (_, child) in node.children.iter() {
            if let Child::Inner(child_idx) = child {
                self.check_node_recursive(*child_idx, false)?;
            }
        }
        Ok(())
    }

    fn check_leaf_chain(&self) -> Result<()> {
        let mut idx = self.min_leaf;
        let mut prev = NULL;
        let mut count = 0u64;
        loop {
            let node = self.node_ref(idx);
            if !node.is_leaf {
                return Err(Error::InternalInvariantBroken("min_leaf does not lead a leaf chain"));
            }
            if node.prev != prev {
                return Err(Error::InternalInvariantBroken("leaf chain prev pointer mismatch"));
            }
            count += 1;
            if node.next == NULL {
                if idx != self.max_leaf {
                    return Err(Error::InternalInvariantBroken("max_leaf does not match chain end"));
                }
                return Ok(());
            }
            prev = idx;
            idx = node.next;
            if count > self.nodes.len() + 2 {
                return Err(Error::InternalInvariantBroken("leaf chain does not terminate"));
            }
        }
    }
}
