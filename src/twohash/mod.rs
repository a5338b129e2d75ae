//! Two-choice twin-table map and set.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::mem;

use crate::error::{Fallibility, Result, TableError};
use crate::layout::{Global, RawAlloc};
use crate::{make_hash, DefaultHashBuilder, RawPos};

mod table;

use self::table::RawTwoHash;

/// Hash map spreading entries over two parallel Robin-Hood half-tables,
/// each addressed by its own Fibonacci multiplier; inserts take the side
/// with the shorter probe chain.
pub struct TwoHashMap<K, V, S = DefaultHashBuilder, A = Global>
where
    A: RawAlloc,
{
    hash_builder: S,
    table: RawTwoHash<(K, V), A>,
}

impl<K, V, S, A> TwoHashMap<K, V, S, A>
where
    K: Hash + Eq,
    S: BuildHasher,
    A: RawAlloc,
{
    pub fn with_capacity_and_hasher_in(capacity: usize, hash_builder: S, alloc: A) -> Self {
        let mut map = Self {
            hash_builder,
            table: RawTwoHash::new_in(alloc),
        };
        if capacity > 0 {
            map.reserve(capacity);
        }
        map
    }

    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self
    where
        A: Default,
    {
        Self::with_capacity_and_hasher_in(capacity, hash_builder, A::default())
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

    /// Removes the entry at `pos`, returning the following position.
    pub fn erase_at(&mut self, pos: RawPos) -> Option<RawPos> {
        self.table.erase_index(pos.0);
        self.table.next_occupied(pos.0).map(RawPos)
    }

    /// Removes every entry whose position at call time lies in `[from, to)`,
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

    /// How many slots a lookup of `key` visits across both halves.
    pub fn num_lookups<Q: ?Sized>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        self.table
            .num_lookups(hash, |entry| key.eq(entry.0.borrow()))
    }

    pub fn iter(&self) -> Iter<'_, K, V, A> {
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

impl<K, V, S, A> Default for TwoHashMap<K, V, S, A>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
    A: RawAlloc + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, A> PartialEq for TwoHashMap<K, V, S, A>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
    A: RawAlloc,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).map_or(false, |ov| *ov == *v))
    }
}

impl<'a, K, V, S, A> IntoIterator for &'a TwoHashMap<K, V, S, A>
where
    K: Hash + Eq,
    S: BuildHasher,
    A: RawAlloc,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`TwoHashMap`]'s entries, first half then second.
pub struct Iter<'a, K, V, A>
where
    A: RawAlloc,
{
    table: &'a RawTwoHash<(K, V), A>,
    index: usize,
}

impl<'a, K, V, A> Iterator for Iter<'a, K, V, A>
where
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

/// Hash set sharing the [`TwoHashMap`] core.
pub struct TwoHashSet<T, S = DefaultHashBuilder, A = Global>
where
    A: RawAlloc,
{
    hash_builder: S,
    table: RawTwoHash<T, A>,
}

impl<T, S, A> TwoHashSet<T, S, A>
where
    T: Hash + Eq,
    S: BuildHasher,
    A: RawAlloc,
{
    pub fn with_capacity_and_hasher_in(capacity: usize, hash_builder: S, alloc: A) -> Self {
        let mut set = Self {
            hash_builder,
            table: RawTwoHash::new_in(alloc),
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
        Self::with_capacity_and_hasher_in(0, hash_builder, A::default())
    }

    pub fn with_capacity(capacity: usize) -> Self
    where
        S: Default,
        A: Default,
    {
        Self::with_capacity_and_hasher_in(capacity, S::default(), A::default())
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

    pub fn iter(&self) -> SetIter<'_, T, A> {
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

impl<T, S, A> Default for TwoHashSet<T, S, A>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
    A: RawAlloc + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [`TwoHashSet`]'s values, first half then second.
pub struct SetIter<'a, T, A>
where
    A: RawAlloc,
{
    table: &'a RawTwoHash<T, A>,
    index: usize,
}

impl<'a, T, A> Iterator for SetIter<'a, T, A>
where
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

    #[test]
    fn insert_get_remove() {
        let mut map: TwoHashMap<u64, u64> = TwoHashMap::new();
        let (_, inserted) = map.insert(11, 110);
        assert!(inserted);
        let (_, inserted) = map.insert(11, 999);
        assert!(!inserted);
        assert_eq!(map.get(&11), Some(&110));
        assert_eq!(map.remove(&11), Some(110));
        assert!(map.is_empty());
        map.check_consistency();
    }

    #[test]
    fn spreads_between_halves() {
        let mut map: TwoHashMap<u32, u32> = TwoHashMap::new();
        for i in 0..3000 {
            map.insert(i, i + 7);
        }
        assert_eq!(map.len(), 3000);
        for i in 0..3000 {
            assert_eq!(map.get(&i), Some(&(i + 7)));
        }
        assert!(map.load_factor() <= map.max_load_factor());
        map.check_consistency();
    }

    #[test]
    fn erase_at_is_supported() {
        let mut map: TwoHashMap<u64, u64> = TwoHashMap::new();
        for i in 0..200 {
            map.insert(i, i);
        }
        while let Some((k, _)) = map.iter().next().map(|(k, v)| (*k, *v)) {
            let pos = map.find(&k).unwrap();
            map.erase_at(pos);
        }
        assert!(map.is_empty());
        map.check_consistency();
    }

    #[test]
    fn set_round_trip() {
        let mut set: TwoHashSet<u64> = TwoHashSet::new();
        for i in 0..500 {
            assert!(set.insert(i).1);
        }
        for i in 0..500 {
            assert!(set.contains(&i));
        }
        assert_eq!(set.len(), 500);
        set.check_consistency();
    }
}
