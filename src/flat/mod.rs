//! Robin-Hood linear probed map and set.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::mem;

use crate::error::{Fallibility, Result, TableError};
use crate::layout::{Global, RawAlloc};
use crate::policy::{FibonacciPolicy, HashPolicy};
use crate::{make_hash, DefaultHashBuilder, RawPos};

mod table;

pub(crate) use self::table::RawFlat;

/// Hash map built on Robin-Hood linear probing with per-slot probe
/// distances.
///
/// The `EAGER_EQ` parameter selects the lookup variant that compares keys on
/// every visited slot instead of only on exact distance matches.
pub struct FlatMap<
    K,
    V,
    S = DefaultHashBuilder,
    P = FibonacciPolicy,
    A = Global,
    const EAGER_EQ: bool = false,
> where
    P: HashPolicy,
    A: RawAlloc,
{
    hash_builder: S,
    table: RawFlat<(K, V), P, A, EAGER_EQ>,
}

impl<K, V, S, P, A, const EAGER_EQ: bool> FlatMap<K, V, S, P, A, EAGER_EQ>
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
            table: RawFlat::new_in(policy, alloc),
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

    /// Sets the load factor above which the next insert grows the table.
    /// `value` must be in `(0, 1]`.
    pub fn set_max_load_factor(&mut self, value: f32) {
        self.table.set_max_load_factor(value);
    }

    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    pub fn policy(&self) -> &P {
        &self.table.policy
    }

    /// Position of `key`'s entry, or `None` when absent. Never allocates.
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

    /// Like `get`, but an absent key is an error.
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

    /// Entry at a position previously returned by `find`, `insert` or
    /// iteration. See [`RawPos`](crate::RawPos) for invalidation rules.
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

    /// Removes `key`'s entry and returns its value.
    pub fn remove<Q: ?Sized>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let pos = self.find(key)?;
        Some(self.table.take_index(pos.0).1)
    }

    /// Removes the entry at `pos`, returning the following position.
    pub fn erase_at(&mut self, pos: RawPos) -> Option<RawPos> {
        self.table.erase_index(pos.0);
        self.table.next_occupied(pos.0).map(RawPos)
    }

    /// Removes every entry whose position at call time lies in
    /// `[from, to)`, returning the position after the removed range.
    pub fn erase_range(&mut self, from: RawPos, to: RawPos) -> Option<RawPos> {
        let mut remaining = 0;
        let mut i = from.0;
        while let Some(j) = self.table.next_occupied(i) {
            if j >= to.0 {
                break;
            }
            remaining += 1;
            i = j + 1;
        }
        let mut at = from.0;
        while remaining > 0 {
            match self.table.next_occupied(at) {
                Some(j) => {
                    self.table.erase_index(j);
                    at = j;
                    remaining -= 1;
                }
                None => break,
            }
        }
        self.table.next_occupied(at).map(RawPos)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    pub fn reserve(&mut self, additional_capacity: usize) {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        let _ = table.reserve(additional_capacity, Fallibility::Infallible, &|entry: &(K, V)| {
            make_hash(hash_builder, &entry.0)
        });
    }

    /// Fallible `reserve`; on error the table is unchanged.
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

    /// Fallible `rehash`; on error the table is unchanged.
    pub fn try_rehash(&mut self, bucket_count: usize) -> Result<()> {
        let Self {
            ref hash_builder,
            ref mut table,
        } = *self;
        table.rehash(bucket_count, Fallibility::Fallible, &|entry: &(K, V)| {
            make_hash(hash_builder, &entry.0)
        })
    }

    /// How many slots a lookup of `key` visits before concluding.
    pub fn num_lookups<Q: ?Sized>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        self.table
            .num_lookups(hash, |entry| key.eq(entry.0.borrow()))
    }

    pub fn iter(&self) -> Iter<'_, K, V, P, A, EAGER_EQ> {
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

impl<K, V, S, P, A, const EAGER_EQ: bool> Default for FlatMap<K, V, S, P, A, EAGER_EQ>
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

impl<K, V, S, P, A, const EAGER_EQ: bool> PartialEq for FlatMap<K, V, S, P, A, EAGER_EQ>
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

impl<'a, K, V, S, P, A, const EAGER_EQ: bool> IntoIterator for &'a FlatMap<K, V, S, P, A, EAGER_EQ>
where
    K: Hash + Eq,
    S: BuildHasher,
    P: HashPolicy,
    A: RawAlloc,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, P, A, EAGER_EQ>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`FlatMap`]'s entries in slot order.
pub struct Iter<'a, K, V, P, A, const EAGER_EQ: bool>
where
    P: HashPolicy,
    A: RawAlloc,
{
    table: &'a RawFlat<(K, V), P, A, EAGER_EQ>,
    index: usize,
}

impl<'a, K, V, P, A, const EAGER_EQ: bool> Iterator for Iter<'a, K, V, P, A, EAGER_EQ>
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

/// Hash set sharing the [`FlatMap`] core.
pub struct FlatSet<
    T,
    S = DefaultHashBuilder,
    P = FibonacciPolicy,
    A = Global,
    const EAGER_EQ: bool = false,
> where
    P: HashPolicy,
    A: RawAlloc,
{
    hash_builder: S,
    table: RawFlat<T, P, A, EAGER_EQ>,
}

impl<T, S, P, A, const EAGER_EQ: bool> FlatSet<T, S, P, A, EAGER_EQ>
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
            table: RawFlat::new_in(policy, alloc),
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

    /// Inserts `value`; an already-present value is left untouched and the
    /// flag is false.
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
    /// returning the position after the removed range.
    pub fn erase_range(&mut self, from: RawPos, to: RawPos) -> Option<RawPos> {
        let mut remaining = 0;
        let mut i = from.0;
        while let Some(j) = self.table.next_occupied(i) {
            if j >= to.0 {
                break;
            }
            remaining += 1;
            i = j + 1;
        }
        let mut at = from.0;
        while remaining > 0 {
            match self.table.next_occupied(at) {
                Some(j) => {
                    self.table.erase_index(j);
                    at = j;
                    remaining -= 1;
                }
                None => break,
            }
        }
        self.table.next_occupied(at).map(RawPos)
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

    pub fn num_lookups<Q: ?Sized>(&self, value: &Q) -> usize
    where
        T: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, value);
        self.table
            .num_lookups(hash, |stored| value.eq(stored.borrow()))
    }

    pub fn iter(&self) -> SetIter<'_, T, P, A, EAGER_EQ> {
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

impl<T, S, P, A, const EAGER_EQ: bool> Default for FlatSet<T, S, P, A, EAGER_EQ>
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

/// Iterator over a [`FlatSet`]'s values in slot order.
pub struct SetIter<'a, T, P, A, const EAGER_EQ: bool>
where
    P: HashPolicy,
    A: RawAlloc,
{
    table: &'a RawFlat<T, P, A, EAGER_EQ>,
    index: usize,
}

impl<'a, T, P, A, const EAGER_EQ: bool> Iterator for SetIter<'a, T, P, A, EAGER_EQ>
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
    use crate::policy::{PowerOfTwoPolicy, PrimePolicy};

    #[test]
    fn insert_get_remove() {
        let mut map: FlatMap<u64, u64> = FlatMap::new();
        assert!(map.is_empty());
        let (_, inserted) = map.insert(1, 10);
        assert!(inserted);
        let (_, inserted) = map.insert(1, 999);
        assert!(!inserted);
        assert_eq!(map.get(&1), Some(&10));
        assert_eq!(map.remove(&1), Some(10));
        assert_eq!(map.get(&1), None);
        assert!(map.is_empty());
        map.check_consistency();
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut map: FlatMap<u32, u32> = FlatMap::new();
        for i in 0..1000 {
            map.insert(i, i * 2);
        }
        assert_eq!(map.len(), 1000);
        for i in 0..1000 {
            assert_eq!(map.get(&i), Some(&(i * 2)));
        }
        assert!(map.load_factor() <= map.max_load_factor());
        map.check_consistency();
    }

    #[test]
    fn works_with_prime_policy() {
        let mut map: FlatMap<u64, u64, _, PrimePolicy> =
            FlatMap::with_hasher(DefaultHashBuilder::default());
        for i in 0..500 {
            map.insert(i, i + 1);
        }
        for i in 0..500 {
            assert_eq!(map.get(&i), Some(&(i + 1)));
        }
        map.check_consistency();
    }

    #[test]
    fn eager_eq_variant_behaves_the_same() {
        let mut map: FlatMap<u64, u64, DefaultHashBuilder, PowerOfTwoPolicy, Global, true> =
            FlatMap::with_hasher(DefaultHashBuilder::default());
        for i in 0..256 {
            map.insert(i, i);
        }
        for i in 0..256 {
            assert_eq!(map.get(&i), Some(&i));
        }
        assert_eq!(map.get(&9999), None);
        map.check_consistency();
    }

    #[test]
    fn set_round_trip() {
        let mut set: FlatSet<String> = FlatSet::new();
        assert!(set.insert("alpha".to_string()).1);
        assert!(!set.insert("alpha".to_string()).1);
        assert!(set.contains("alpha"));
        assert_eq!(set.remove("alpha"), Some("alpha".to_string()));
        assert!(!set.contains("alpha"));
    }

    #[test]
    fn erase_at_returns_next() {
        let mut map: FlatMap<u64, u64> = FlatMap::new();
        for i in 0..10 {
            map.insert(i, i);
        }
        let first = map.iter().next().map(|(k, _)| *k).unwrap();
        let pos = map.find(&first).unwrap();
        map.erase_at(pos);
        assert_eq!(map.len(), 9);
        assert!(map.get(&first).is_none());
        map.check_consistency();
    }
}
