//! Two-choice hashing over twin Robin-Hood half-tables.
//!
//! Two half-tables of equal capacity are addressed by two independent
//! Fibonacci derivations of the same raw hash. Lookups probe both halves in
//! one interleaved loop; inserts scan both to their would-be positions and
//! take the side whose probe distance is shorter, which keeps the worst
//! chain length near O(log log n) instead of a single table's
//! O(log n / log log n). Each half keeps the Robin-Hood invariant on its
//! own.
//!
//! Positions below the first half's slot count address that half; higher
//! positions address the second half, offset by that count.

use crate::error::{Fallibility, Result};
use crate::flat::RawFlat;
use crate::layout::RawAlloc;
use crate::policy::{FibonacciPolicy, HashPolicy, FIB_MULTIPLIER_ALT};

type Half<T, A> = RawFlat<T, FibonacciPolicy, A, false>;

pub(crate) struct RawTwoHash<T, A: RawAlloc> {
    a: Half<T, A>,
    b: Half<T, A>,
}

impl<T, A: RawAlloc> RawTwoHash<T, A> {
    pub(crate) fn new_in(alloc: A) -> Self {
        Self {
            a: RawFlat::new_in(FibonacciPolicy::default(), alloc.clone()),
            b: RawFlat::new_in(
                FibonacciPolicy::with_multiplier(FIB_MULTIPLIER_ALT),
                alloc,
            ),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.a.len() + self.b.len()
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.a.bucket_count() + self.b.bucket_count()
    }

    #[inline]
    pub(crate) fn load_factor(&self) -> f32 {
        let buckets = self.bucket_count();
        if buckets == 0 {
            0.0
        } else {
            self.len() as f32 / buckets as f32
        }
    }

    #[inline]
    pub(crate) fn max_load_factor(&self) -> f32 {
        self.a.max_load_factor()
    }

    pub(crate) fn set_max_load_factor(&mut self, value: f32) {
        self.a.set_max_load_factor(value);
        self.b.set_max_load_factor(value);
    }

    #[inline]
    fn side_offset(&self) -> usize {
        self.a.total_slots()
    }

    #[inline]
    fn split(&self, pos: usize) -> (bool, usize) {
        let offset = self.side_offset();
        if pos < offset {
            (false, pos)
        } else {
            (true, pos - offset)
        }
    }

    #[inline]
    pub(crate) unsafe fn value_ref(&self, pos: usize) -> &T {
        match self.split(pos) {
            (false, i) => self.a.value_ref(i),
            (true, i) => self.b.value_ref(i),
        }
    }

    #[inline]
    pub(crate) unsafe fn value_mut(&mut self, pos: usize) -> &mut T {
        let (in_b, i) = self.split(pos);
        if in_b {
            self.b.value_mut(i)
        } else {
            self.a.value_mut(i)
        }
    }

    /// Probes both halves in lockstep; the first key match wins.
    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<usize> {
        let mut index_a = self.a.ideal_index(hash);
        let mut index_b = self.b.ideal_index(hash);
        let mut dist_a: i8 = 0;
        let mut dist_b: i8 = 0;
        let mut live_a = true;
        let mut live_b = true;
        loop {
            if live_a {
                let stored = unsafe { self.a.meta_at(index_a) }.0;
                if stored < dist_a {
                    live_a = false;
                } else if stored == dist_a && eq(unsafe { self.a.value_ref(index_a) }) {
                    return Some(index_a);
                }
                index_a += 1;
                dist_a += 1;
            }
            if live_b {
                let stored = unsafe { self.b.meta_at(index_b) }.0;
                if stored < dist_b {
                    live_b = false;
                } else if stored == dist_b && eq(unsafe { self.b.value_ref(index_b) }) {
                    return Some(self.side_offset() + index_b);
                }
                index_b += 1;
                dist_b += 1;
            }
            if !live_a && !live_b {
                return None;
            }
        }
    }

    /// Same walk as `find`, counting slots visited across both halves.
    pub(crate) fn num_lookups(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> usize {
        let mut index_a = self.a.ideal_index(hash);
        let mut index_b = self.b.ideal_index(hash);
        let mut dist_a: i8 = 0;
        let mut dist_b: i8 = 0;
        let mut live_a = true;
        let mut live_b = true;
        let mut visited = 0;
        loop {
            if live_a {
                visited += 1;
                let stored = unsafe { self.a.meta_at(index_a) }.0;
                if stored < dist_a {
                    live_a = false;
                } else if stored == dist_a && eq(unsafe { self.a.value_ref(index_a) }) {
                    return visited;
                }
                index_a += 1;
                dist_a += 1;
            }
            if live_b {
                visited += 1;
                let stored = unsafe { self.b.meta_at(index_b) }.0;
                if stored < dist_b {
                    live_b = false;
                } else if stored == dist_b && eq(unsafe { self.b.value_ref(index_b) }) {
                    return visited;
                }
                index_b += 1;
                dist_b += 1;
            }
            if !live_a && !live_b {
                return visited;
            }
        }
    }

    /// Scans both halves to their insertion points and places into the side
    /// with the shorter probe, ties going to the side with more guard room
    /// past the insertion slot.
    fn place_in_halves(
        a: &mut Half<T, A>,
        b: &mut Half<T, A>,
        hash: u64,
        value: T,
    ) -> std::result::Result<(bool, usize), T> {
        let (index_a, dist_a) = a.probe_for_insert(hash);
        let (index_b, dist_b) = b.probe_for_insert(hash);
        let use_a = if dist_a != dist_b {
            dist_a < dist_b
        } else {
            a.total_slots() - index_a >= b.total_slots() - index_b
        };
        if use_a {
            a.place(index_a, dist_a, value).map(|i| (false, i))
        } else {
            b.place(index_b, dist_b, value).map(|i| (true, i))
        }
    }

    #[inline]
    fn needs_growth(&self) -> bool {
        self.bucket_count() == 0
            || (self.len() + 1) as f64
                > self.bucket_count() as f64 * self.max_load_factor() as f64
    }

    pub(crate) fn insert_unique(&mut self, hash: u64, value: T, hasher: impl Fn(&T) -> u64) -> usize {
        let mut value = value;
        loop {
            if self.needs_growth() {
                self.grow(&hasher);
            }
            match Self::place_in_halves(&mut self.a, &mut self.b, hash, value) {
                Ok((false, i)) => return i,
                Ok((true, i)) => return self.side_offset() + i,
                Err(v) => {
                    value = v;
                    self.grow(&hasher);
                }
            }
        }
    }

    fn grow(&mut self, hasher: &impl Fn(&T) -> u64) {
        let target = self.bucket_count().saturating_mul(2).max(8);
        let _ = self.do_rehash(target, Fallibility::Infallible, hasher);
    }

    pub(crate) fn rehash(
        &mut self,
        num_items: usize,
        fallibility: Fallibility,
        hasher: &impl Fn(&T) -> u64,
    ) -> Result<()> {
        self.do_rehash(num_items, fallibility, hasher)
    }

    pub(crate) fn reserve(
        &mut self,
        num_elements: usize,
        fallibility: Fallibility,
        hasher: &impl Fn(&T) -> u64,
    ) -> Result<()> {
        let required = (num_elements as f64 / self.max_load_factor() as f64).ceil() as usize;
        if required > self.bucket_count() {
            self.do_rehash(required, fallibility, hasher)?;
        }
        Ok(())
    }

    fn do_rehash(
        &mut self,
        num_items: usize,
        fallibility: Fallibility,
        hasher: &impl Fn(&T) -> u64,
    ) -> Result<()> {
        let needed = (self.len() as f64 / self.max_load_factor() as f64).ceil() as usize;
        let num_items = num_items.max(needed);
        if num_items == 0 {
            self.a.rehash(0, fallibility, hasher)?;
            self.b.rehash(0, fallibility, hasher)?;
            return Ok(());
        }
        let per_half = (num_items + 1) / 2;
        let (mut capacity, mut token) = self
            .a
            .policy
            .next_size_over(per_half.max(4))
            .map_err(|_| fallibility.capacity_overflow())?;
        if self.a.bucket_count() == capacity {
            return Ok(());
        }
        loop {
            // Both halves share the capacity, so one token fits both
            // Fibonacci policies.
            let mut policy_a = self.a.policy.clone();
            policy_a.commit(token);
            let mut policy_b = self.b.policy.clone();
            policy_b.commit(token);
            let mut new_a = Half::<T, A>::new_buffer(
                capacity,
                fallibility,
                policy_a,
                self.a.alloc_handle(),
                self.max_load_factor(),
            )?;
            let mut new_b = Half::<T, A>::new_buffer(
                capacity,
                fallibility,
                policy_b,
                self.b.alloc_handle(),
                self.max_load_factor(),
            )?;
            if self.copy_into(&mut new_a, &mut new_b, hasher) {
                let old_a = std::mem::replace(&mut self.a, new_a);
                let old_b = std::mem::replace(&mut self.b, new_b);
                old_a.discard_without_drop();
                old_b.discard_without_drop();
                return Ok(());
            }
            new_a.discard_without_drop();
            new_b.discard_without_drop();
            let doubled = capacity
                .checked_mul(2)
                .ok_or_else(|| fallibility.capacity_overflow())?;
            let (c, t) = self
                .a
                .policy
                .next_size_over(doubled)
                .map_err(|_| fallibility.capacity_overflow())?;
            capacity = c;
            token = t;
        }
    }

    fn copy_into(
        &self,
        new_a: &mut Half<T, A>,
        new_b: &mut Half<T, A>,
        hasher: &impl Fn(&T) -> u64,
    ) -> bool {
        for half in &[&self.a, &self.b] {
            for i in 0..half.total_slots() {
                if !unsafe { half.meta_at(i) }.is_occupied() {
                    continue;
                }
                let value = unsafe { std::ptr::read(half.value_ptr(i)) };
                let hash = hasher(&value);
                match Self::place_in_halves(new_a, new_b, hash, value) {
                    Ok(_) => {}
                    Err(duplicate) => {
                        std::mem::forget(duplicate);
                        return false;
                    }
                }
            }
        }
        true
    }

    pub(crate) fn erase_index(&mut self, pos: usize) {
        let (in_b, i) = self.split(pos);
        if in_b {
            self.b.erase_index(i);
        } else {
            self.a.erase_index(i);
        }
    }

    pub(crate) fn take_index(&mut self, pos: usize) -> T {
        let (in_b, i) = self.split(pos);
        if in_b {
            self.b.take_index(i)
        } else {
            self.a.take_index(i)
        }
    }

    pub(crate) fn clear(&mut self) {
        self.a.clear();
        self.b.clear();
    }

    /// First occupied position at or after `from`, first half then second.
    pub(crate) fn next_occupied(&self, from: usize) -> Option<usize> {
        let offset = self.side_offset();
        if from < offset {
            if let Some(i) = self.a.next_occupied(from) {
                return Some(i);
            }
            return self.b.next_occupied(0).map(|i| offset + i);
        }
        self.b.next_occupied(from - offset).map(|i| offset + i)
    }

    /// Audits both halves' Robin-Hood invariants. Test support.
    pub(crate) fn check_consistency(&self, hasher: impl Fn(&T) -> u64) {
        self.a.check_consistency(&hasher);
        self.b.check_consistency(&hasher);
    }
}
