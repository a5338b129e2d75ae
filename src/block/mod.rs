//! 16-lane SIMD block probed map and set.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::mem;

use crate::error::{Fallibility, Result, TableError};
use crate::layout::{Global, RawAlloc};
use crate::policy::{FibonacciPolicy, HashPolicy};
use crate::{make_hash, DefaultHashBuilder, RawPos};

cfg_if::cfg_if! {
    // Use the SSE2 implementation if possible: it compares all 16 metadata
    // bytes of a block with one instruction. We don't bother with AVX since
    // blocks are exactly 128 bits wide.
    if #[cfg(all(
        target_feature = "sse2",
        any(target_arch = "x86", target_arch = "x86_64"),
        not(miri)
    ))] {
        mod sse2;
        use sse2 as imp;
    } else {
        #[path = "generic.rs"]
        mod generic;
        use generic as imp;
    }
}

mod bitmask;
mod table;

use self::table::{RawBlock, BLOCK_LANES};

/// Hash map probing 16-slot blocks with one SIMD compare per block and
/// Robin-Hood displacement across blocks.
pub struct BlockMap<K, V, S = DefaultHashBuilder, P = FibonacciPolicy, A = Global>
where
    P: HashPolicy,
    A: RawAlloc,
{
    hash_builder: S,
    table: RawBlock<(K, V), P, A>,
}

impl<K, V, S, P, A> BlockMap<K, V, S, P, A>
where
    K: Hash + Eq,
    S: BuildHasher,
    P: HashPolicy,
    A: RawAlloc,
{
    pub fn with_capacity_and_hasher_and_policy_in(
        capacity: usize,
        hash_builder: S,
        policy: P,
        alloc: A,
    ) -> Self {
        let mut map = Self {
            hash_builder,
            table: RawBlock::new_in(policy, alloc),
        };
        if capacity > 0 {
            map.reserve(capacity);
        }
        map
    }

    pub fn with_capacity_and_hasher_and_policy(capacity: usize, hash_builder: S, policy: P) -> Self
    where
        A: Default,
    {
        Self::with_capacity_and_hasher_and_policy_in(capacity, hash_builder, policy, A::default())
    }

    pub fn with_hasher_and_policy(hash_builder: S, policy: P) -> Self
    where
        A: Default,
    {
        Self::with_capacity_and_hasher_and_policy(0, hash_builder, policy)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self
    where
        A: Default,
    {
        Self::with_capacity_and_hasher_and_policy(capacity, hash_builder, P::default())
    }

    pub fn with_hasher(hash_builder: S) -> Self
    where
        A: Default,
    {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    pub fn with_capacity(capacity: usize) -> Self
    where
        S: Default,
        A: Default,
    {
        Self::with_capacity_and_hasher(capacity, S::default())
    }

    pub fn new() -> Self
    where
        S: Default,
        A: Default,
    {
        Self::with_hasher(S::default())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    #[inline]
    pub fn load_factor(&self) -> f32 {
        self.table.load_factor()
    }

    #[inline]
    pub fn max_load_factor(&self) -> f32 {
        self.table.max_load_factor()
    }

    pub fn set_max_load_factor(&mut self, value: f32) {
        self.table.set_max_load_factor(value);
    }

    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    pub fn policy(&self) -> &P {
        &self.table.policy
    }

    #[inline]
    pub fn find<Q: ?Sized>(&self, key: &Q) -> Option<RawPos>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        self.table
            .find(hash, |entry| key.eq(entry.0.borrow()))
            .map(RawPos)
    }

    #[inline]
    pub fn contains_key<Q: ?Sized>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.find(key).is_some()
    }

    #[inline]
    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.get_key_value(key).map(|(_, v)| v)
    }

    #[inline]
    pub fn get_key_value<Q: ?Sized>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.find(key).map(|pos| self.entry_at(pos))
    }

    #[inline]
    pub fn get_mut<Q: ?Sized>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let pos = self.find(key)?;
        Some(unsafe { &mut self.table.value_mut(pos.0).1 })
    }

    pub fn at<Q: ?Sized>(&self, key: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.get(key).ok_or(TableError::MissingKey)
    }

    pub fn at_mut<Q: ?Sized>(&mut self, key: &Q) -> Result<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.get_mut(key).ok_or(TableError::MissingKey)
    }

    pub fn entry_at(&self, pos: RawPos) -> (&K, &V) {
        let entry = unsafe { self.table.value_ref(pos.0) };
        (&entry.0, &entry.1)
    }

    pub fn value_at_mut(&mut self, pos: RawPos) -> &mut V {
        unsafe { &mut self.table.value_mut(pos.0).1 }
    }

    /// Inserts `key`/`value`. If the key is already present the stored value
    /// is left untouched, the new pair is dropped, and the flag is false.
    pub fn insert(&mut self, key: K, value: V) -> (RawPos, bool) {
        let hash = make_hash(&self.hash_builder, &key);
        if let Some(index) = self.table.find(hash, |entry| key == entry.0) {
            return (RawPos(index), false);
        }
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        let index = table.insert_unique(hash, (key, value), |entry: &(K, V)| {
            make_hash(hash_builder, &entry.0)
        });
        (RawPos(index), true)
    }

    pub fn remove<Q: ?Sized>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let pos = self.find(key)?;
        Some(self.table.take_index(pos.0).1)
    }

    pub fn erase_at(&mut self, pos: RawPos) -> Option<RawPos> {
        self.table.erase_index(pos.0);
        self.table.next_occupied(pos.0).map(RawPos)
    }

    /// Removes every entry whose position at call time lies in `[from, to)`,
    /// then relocates trailing displaced lanes into the freed space.
    pub fn erase_range(&mut self, from: RawPos, to: RawPos) -> Option<RawPos> {
        let mut i = from.0;
        while let Some(j) = self.table.next_occupied(i) {
            if j >= to.0 {
                break;
            }
            self.table.destroy_at(j);
            i = j + 1;
        }
        self.repair_after_range_erase(to.0);
        self.table.next_occupied(from.0).map(RawPos)
    }

    // Walk the blocks after the erased window in order and pull back every
    // lane that is no longer reachable from its ideal block. Holes only
    // break probes that pass through a strictly earlier block, so one
    // left-to-right sweep restores every survivor.
    fn repair_after_range_erase(&mut self, to: usize) {
        let total_blocks = self.table.total_blocks();
        let mut block = to / BLOCK_LANES;
        while block < total_blocks {
            let mut lane = 0;
            while lane < BLOCK_LANES {
                let pos = block * BLOCK_LANES + lane;
                if !self.table.is_displaced(pos) {
                    lane += 1;
                    continue;
                }
                let hash = {
                    let entry = unsafe { self.table.value_ref(pos) };
                    make_hash(&self.hash_builder, &entry.0)
                };
                let reachable = {
                    let entry = unsafe { self.table.value_ref(pos) };
                    let key = &entry.0;
                    self.table.find(hash, |other| key.eq(&other.0)) == Some(pos)
                };
                if reachable {
                    lane += 1;
                    continue;
                }
                let value = self.table.take_raw(pos);
                let Self {
                    ref hash_builder,
                    ref mut table,
                } = *self;
                table.insert_unique(hash, value, |entry: &(K, V)| {
                    make_hash(hash_builder, &entry.0)
                });
                // The relocated element always lands in an earlier block, so
                // this lane is free now; re-examine it in case displacement
                // moved something in.
            }
            block += 1;
        }
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    pub fn reserve(&mut self, capacity: usize) {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        let _ = table.reserve(capacity, Fallibility::Infallible, &|entry: &(K, V)| {
            make_hash(hash_builder, &entry.0)
        });
    }

    pub fn try_reserve(&mut self, capacity: usize) -> Result<()> {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        table.reserve(capacity, Fallibility::Fallible, &|entry: &(K, V)| {
            make_hash(hash_builder, &entry.0)
        })
    }

    pub fn rehash(&mut self, bucket_count: usize) {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        let _ = table.rehash(bucket_count, Fallibility::Infallible, &|entry: &(K, V)| {
            make_hash(hash_builder, &entry.0)
        });
    }

    pub fn try_rehash(&mut self, bucket_count: usize) -> Result<()> {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        table.rehash(bucket_count, Fallibility::Fallible, &|entry: &(K, V)| {
            make_hash(hash_builder, &entry.0)
        })
    }

    /// How many candidate lanes a lookup of `key` examines.
    pub fn num_lookups<Q: ?Sized>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        self.table
            .num_lookups(hash, |entry| key.eq(entry.0.borrow()))
    }

    pub fn iter(&self) -> Iter<'_, K, V, P, A> {
        Iter {
            table: &self.table,
            index: 0,
        }
    }

    #[doc(hidden)]
    pub fn check_consistency(&self) {
        let Self {
            ref hash_builder,
            ref table,
        } = *self;
        table.check_consistency(|entry: &(K, V)| make_hash(hash_builder, &entry.0));
    }
}

impl<K, V, S, P, A> Default for BlockMap<K, V, S, P, A>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    P: HashPolicy,
    A: RawAlloc + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, P, A> PartialEq for BlockMap<K, V, S, P, A>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
    P: HashPolicy,
    A: RawAlloc,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).map_or(false, |ov| *ov == *v))
    }
}

impl<'a, K, V, S, P, A> IntoIterator for &'a BlockMap<K, V, S, P, A>
where
    K: Hash + Eq,
    S: BuildHasher,
    P: HashPolicy,
    A: RawAlloc,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, P, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`BlockMap`]'s entries in lane order.
pub struct Iter<'a, K, V, P, A>
where
    P: HashPolicy,
    A: RawAlloc,
{
    table: &'a RawBlock<(K, V), P, A>,
    index: usize,
}

impl<'a, K, V, P, A> Iterator for Iter<'a, K, V, P, A>
where
    P: HashPolicy,
    A: RawAlloc,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.table.next_occupied(self.index)?;
        self.index = i + 1;
        let entry = unsafe { self.table.value_ref(i) };
        Some((&entry.0, &entry.1))
    }
}

/// Hash set sharing the [`BlockMap`] core.
pub struct BlockSet<T, S = DefaultHashBuilder, P = FibonacciPolicy, A = Global>
where
    P: HashPolicy,
    A: RawAlloc,
{
    hash_builder: S,
    table: RawBlock<T, P, A>,
}

impl<T, S, P, A> BlockSet<T, S, P, A>
where
    T: Hash + Eq,
    S: BuildHasher,
    P: HashPolicy,
    A: RawAlloc,
{
    pub fn with_capacity_and_hasher_and_policy_in(
        capacity: usize,
        hash_builder: S,
        policy: P,
        alloc: A,
    ) -> Self {
        let mut set = Self {
            hash_builder,
            table: RawBlock::new_in(policy, alloc),
        };
        if capacity > 0 {
            set.reserve(capacity);
        }
        set
    }

    pub fn with_hasher(hash_builder: S) -> Self
    where
        A: Default,
    {
        Self::with_capacity_and_hasher_and_policy_in(0, hash_builder, P::default(), A::default())
    }

    pub fn with_capacity(capacity: usize) -> Self
    where
        S: Default,
        A: Default,
    {
        Self::with_capacity_and_hasher_and_policy_in(
            capacity,
            S::default(),
            P::default(),
            A::default(),
        )
    }

    pub fn new() -> Self
    where
        S: Default,
        A: Default,
    {
        Self::with_hasher(S::default())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    #[inline]
    pub fn load_factor(&self) -> f32 {
        self.table.load_factor()
    }

    #[inline]
    pub fn max_load_factor(&self) -> f32 {
        self.table.max_load_factor()
    }

    pub fn set_max_load_factor(&mut self, value: f32) {
        self.table.set_max_load_factor(value);
    }

    #[inline]
    pub fn find<Q: ?Sized>(&self, value: &Q) -> Option<RawPos>
    where
        T: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, value);
        self.table
            .find(hash, |stored| value.eq(stored.borrow()))
            .map(RawPos)
    }

    #[inline]
    pub fn contains<Q: ?Sized>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.find(value).is_some()
    }

    pub fn value_at(&self, pos: RawPos) -> &T {
        unsafe { self.table.value_ref(pos.0) }
    }

    pub fn insert(&mut self, value: T) -> (RawPos, bool) {
        let hash = make_hash(&self.hash_builder, &value);
        if let Some(index) = self.table.find(hash, |stored| value == *stored) {
            return (RawPos(index), false);
        }
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        let index = table.insert_unique(hash, value, |stored: &T| make_hash(hash_builder, stored));
        (RawPos(index), true)
    }

    pub fn remove<Q: ?Sized>(&mut self, value: &Q) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq,
    {
        let pos = self.find(value)?;
        Some(self.table.take_index(pos.0))
    }

    pub fn erase_at(&mut self, pos: RawPos) -> Option<RawPos> {
        self.table.erase_index(pos.0);
        self.table.next_occupied(pos.0).map(RawPos)
    }

    /// Removes every value whose position at call time lies in `[from, to)`,
    /// then relocates trailing displaced lanes into the freed space.
    pub fn erase_range(&mut self, from: RawPos, to: RawPos) -> Option<RawPos> {
        let mut i = from.0;
        while let Some(j) = self.table.next_occupied(i) {
            if j >= to.0 {
                break;
            }
            self.table.destroy_at(j);
            i = j + 1;
        }
        let total_blocks = self.table.total_blocks();
        let mut block = to.0 / BLOCK_LANES;
        while block < total_blocks {
            let mut lane = 0;
            while lane < BLOCK_LANES {
                let pos = block * BLOCK_LANES + lane;
                if !self.table.is_displaced(pos) {
                    lane += 1;
                    continue;
                }
                let hash = {
                    let stored = unsafe { self.table.value_ref(pos) };
                    make_hash(&self.hash_builder, stored)
                };
                let reachable = {
                    let stored = unsafe { self.table.value_ref(pos) };
                    self.table.find(hash, |other| stored.eq(other)) == Some(pos)
                };
                if reachable {
                    lane += 1;
                    continue;
                }
                let value = self.table.take_raw(pos);
                let Self {
                    ref hash_builder,
                    ref mut table,
                } = *self;
                table.insert_unique(hash, value, |stored: &T| make_hash(hash_builder, stored));
            }
            block += 1;
        }
        self.table.next_occupied(from.0).map(RawPos)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    pub fn reserve(&mut self, capacity: usize) {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        let _ = table.reserve(capacity, Fallibility::Infallible, &|stored: &T| {
            make_hash(hash_builder, stored)
        });
    }

    pub fn try_reserve(&mut self, capacity: usize) -> Result<()> {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        table.reserve(capacity, Fallibility::Fallible, &|stored: &T| {
            make_hash(hash_builder, stored)
        })
    }

    pub fn rehash(&mut self, bucket_count: usize) {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        let _ = table.rehash(bucket_count, Fallibility::Infallible, &|stored: &T| {
            make_hash(hash_builder, stored)
        });
    }

    pub fn try_rehash(&mut self, bucket_count: usize) -> Result<()> {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        table.rehash(bucket_count, Fallibility::Fallible, &|stored: &T| {
            make_hash(hash_builder, stored)
        })
    }

    pub fn iter(&self) -> SetIter<'_, T, P, A> {
        SetIter {
            table: &self.table,
            index: 0,
        }
    }

    #[doc(hidden)]
    pub fn check_consistency(&self) {
        let Self {
            ref hash_builder,
            ref table,
        } = *self;
        table.check_consistency(|stored: &T| make_hash(hash_builder, stored));
    }
}

impl<T, S, P, A> Default for BlockSet<T, S, P, A>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
    P: HashPolicy,
    A: RawAlloc + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [`BlockSet`]'s values in lane order.
pub struct SetIter<'a, T, P, A>
where
    P: HashPolicy,
    A: RawAlloc,
{
    table: &'a RawBlock<T, P, A>,
    index: usize,
}

impl<'a, T, P, A> Iterator for SetIter<'a, T, P, A>
where
    P: HashPolicy,
    A: RawAlloc,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.table.next_occupied(self.index)?;
        self.index = i + 1;
        Some(unsafe { self.table.value_ref(i) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PowerOfTwoPolicy;

    #[test]
    fn insert_get_remove() {
        let mut map: BlockMap<u64, u64> = BlockMap::new();
        let (_, inserted) = map.insert(7, 70);
        assert!(inserted);
        let (_, inserted) = map.insert(7, 999);
        assert!(!inserted);
        assert_eq!(map.get(&7), Some(&70));
        assert_eq!(map.remove(&7), Some(70));
        assert!(map.is_empty());
        map.check_consistency();
    }

    #[test]
    fn grows_and_stays_consistent() {
        let mut map: BlockMap<u32, u32> = BlockMap::new();
        for i in 0..5000 {
            map.insert(i, i ^ 0xdead);
        }
        assert_eq!(map.len(), 5000);
        for i in 0..5000 {
            assert_eq!(map.get(&i), Some(&(i ^ 0xdead)));
        }
        assert!(map.load_factor() <= map.max_load_factor());
        map.check_consistency();
    }

    #[test]
    fn erase_repairs_displacement() {
        let mut map: BlockMap<u64, u64, DefaultHashBuilder, PowerOfTwoPolicy> =
            BlockMap::with_hasher(DefaultHashBuilder::default());
        for i in 0..2000 {
            map.insert(i, i);
        }
        for i in (0..2000).step_by(3) {
            assert_eq!(map.remove(&i), Some(i));
        }
        for i in 0..2000 {
            if i % 3 == 0 {
                assert_eq!(map.get(&i), None);
            } else {
                assert_eq!(map.get(&i), Some(&i));
            }
        }
        map.check_consistency();
    }

    #[test]
    fn set_round_trip() {
        let mut set: BlockSet<u64> = BlockSet::new();
        for i in 0..100 {
            assert!(set.insert(i).1);
        }
        assert_eq!(set.len(), 100);
        for i in 0..100 {
            assert!(set.contains(&i));
        }
        set.check_consistency();
    }
}
