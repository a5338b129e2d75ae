//! Robin-Hood linear probing over structure-of-arrays storage.
//!
//! One allocation holds the value slots followed by one distance byte per
//! slot. An occupied slot's byte records how far the entry sits from its
//! ideal bucket; within a probe cluster those distances never decrease, so
//! the first slot whose distance drops below the probe's own distance proves
//! the key absent. A trailing guard of `max_lookups` slots, terminated by an
//! end sentinel, lets every probe walk off the logical end without bounds
//! checks.

use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};

use crate::error::{Fallibility, Result};
use crate::hint::{likely, unlikely};
use crate::layout::{sentinel_meta, soa_layout, DistByte, RawAlloc, SlotState};
use crate::policy::HashPolicy;

/// A raw Robin-Hood table. `EAGER_EQ` selects the lookup variant that runs
/// the key comparison on every visited slot instead of only on exact
/// distance matches; which one wins depends on how expensive the equality
/// check is relative to a mispredicted branch.
pub(crate) struct RawFlat<T, P: HashPolicy, A: RawAlloc, const EAGER_EQ: bool> {
    // Metadata and values share one allocation; values start at the base so
    // the base pointer doubles as the deallocation handle.
    meta: NonNull<DistByte>,
    values: NonNull<T>,
    num_slots_minus_one: usize,
    // 0 tags the unallocated singleton state.
    max_lookups: u8,
    num_elements: usize,
    max_load_factor: f32,
    pub(crate) policy: P,
    alloc: A,
    marker: PhantomData<T>,
}

unsafe impl<T: Send, P: HashPolicy, A: RawAlloc, const EAGER_EQ: bool> Send
    for RawFlat<T, P, A, EAGER_EQ>
{
}
unsafe impl<T: Sync, P: HashPolicy, A: RawAlloc, const EAGER_EQ: bool> Sync
    for RawFlat<T, P, A, EAGER_EQ>
{
}

impl<T, P: HashPolicy, A: RawAlloc, const EAGER_EQ: bool> RawFlat<T, P, A, EAGER_EQ> {
    /// Creates an empty table without allocating; the metadata points at the
    /// shared sentinel buffer.
    pub(crate) fn new_in(policy: P, alloc: A) -> Self {
        Self {
            meta: sentinel_meta(),
            values: NonNull::dangling(),
            num_slots_minus_one: 0,
            max_lookups: 0,
            num_elements: 0,
            max_load_factor: 0.9375,
            policy,
            alloc,
            marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.num_elements
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        if self.max_lookups == 0 {
            0
        } else {
            self.num_slots_minus_one + 1
        }
    }

    #[inline]
    pub(crate) fn load_factor(&self) -> f32 {
        if self.max_lookups == 0 {
            return 0.0;
        }
        self.num_elements as f32 / (self.num_slots_minus_one + 1) as f32
    }

    #[inline]
    pub(crate) fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    pub(crate) fn set_max_load_factor(&mut self, value: f32) {
        assert!(
            value > 0.0 && value <= 1.0,
            "max_load_factor must be in (0, 1]"
        );
        self.max_load_factor = value;
    }

    /// Slot count including the trailing guard region.
    #[inline]
    pub(crate) fn total_slots(&self) -> usize {
        if self.max_lookups == 0 {
            0
        } else {
            self.num_slots_minus_one + 1 + self.max_lookups as usize
        }
    }

    #[inline]
    pub(crate) unsafe fn meta_at(&self, index: usize) -> DistByte {
        *self.meta.as_ptr().add(index)
    }

    #[inline]
    unsafe fn set_meta(&mut self, index: usize, meta: DistByte) {
        *self.meta.as_ptr().add(index) = meta;
    }

    #[inline]
    pub(crate) fn value_ptr(&self, index: usize) -> *mut T {
        unsafe { self.values.as_ptr().add(index) }
    }

    #[inline]
    pub(crate) unsafe fn value_ref(&self, index: usize) -> &T {
        &*self.value_ptr(index)
    }

    #[inline]
    pub(crate) unsafe fn value_mut(&mut self, index: usize) -> &mut T {
        &mut *self.value_ptr(index)
    }

    fn compute_max_lookups(capacity: usize) -> u8 {
        let log2 = (mem::size_of::<usize>() * 8) as u32 - 1 - capacity.leading_zeros();
        (log2 / 2).max(4) as u8
    }

    /// Searches for an element, returning its slot index.
    #[inline]
    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<usize> {
        let mut index = self.policy.index_for_hash(hash, self.num_slots_minus_one);
        let mut distance: i8 = 0;
        loop {
            let stored = unsafe { self.meta_at(index) }.0;
            if stored < distance {
                return None;
            }
            if EAGER_EQ {
                if likely(eq(unsafe { self.value_ref(index) })) {
                    return Some(index);
                }
            } else if stored == distance && likely(eq(unsafe { self.value_ref(index) })) {
                return Some(index);
            }
            index += 1;
            distance += 1;
        }
    }

    /// Same walk as `find`, returning how many slots it visited.
    pub(crate) fn num_lookups(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> usize {
        let mut index = self.policy.index_for_hash(hash, self.num_slots_minus_one);
        let mut distance: i8 = 0;
        let mut visited = 0;
        loop {
            visited += 1;
            let stored = unsafe { self.meta_at(index) }.0;
            if stored < distance {
                return visited;
            }
            if stored == distance && eq(unsafe { self.value_ref(index) }) {
                return visited;
            }
            index += 1;
            distance += 1;
        }
    }

    /// Walks to the slot where an absent key would be placed.
    #[inline]
    pub(crate) fn probe_for_insert(&self, hash: u64) -> (usize, i8) {
        let mut index = self.policy.index_for_hash(hash, self.num_slots_minus_one);
        let mut distance: i8 = 0;
        loop {
            let stored = unsafe { self.meta_at(index) }.0;
            if stored < distance {
                return (index, distance);
            }
            index += 1;
            distance += 1;
        }
    }

    /// Places a value at the probe position from `probe_for_insert`,
    /// displacing richer occupants Robin-Hood style. Fails (handing the new
    /// element back) when a probe distance would reach `max_lookups`; the
    /// table then holds exactly its pre-call elements.
    pub(crate) fn place(&mut self, index: usize, distance: i8, value: T) -> std::result::Result<usize, T> {
        if distance as u8 >= self.max_lookups {
            return Err(value);
        }
        unsafe {
            if self.meta_at(index).0 == DistByte::EMPTY.0 {
                ptr::write(self.value_ptr(index), value);
                self.set_meta(index, DistByte::distance(distance));
                self.num_elements += 1;
                return Ok(index);
            }
            let result = index;
            let mut to_insert = value;
            let mut current = index;
            let mut dist = distance;
            mem::swap(&mut to_insert, &mut *self.value_ptr(current));
            let displaced = self.meta_at(current).0;
            self.set_meta(current, DistByte::distance(dist));
            dist = displaced + 1;
            current += 1;
            loop {
                let stored = self.meta_at(current).0;
                if stored == DistByte::EMPTY.0 {
                    ptr::write(self.value_ptr(current), to_insert);
                    self.set_meta(current, DistByte::distance(dist));
                    self.num_elements += 1;
                    return Ok(result);
                } else if stored < dist {
                    mem::swap(&mut to_insert, &mut *self.value_ptr(current));
                    let next_dist = stored + 1;
                    self.set_meta(current, DistByte::distance(dist));
                    dist = next_dist;
                    current += 1;
                } else {
                    dist += 1;
                    current += 1;
                    if dist as u8 == self.max_lookups {
                        // Park the carried occupant where the new element
                        // landed and hand the new element back; the caller
                        // grows and retries, which rebuilds all metadata.
                        mem::swap(&mut to_insert, &mut *self.value_ptr(result));
                        return Err(to_insert);
                    }
                }
            }
        }
    }

    #[inline]
    pub(crate) fn needs_growth(&self) -> bool {
        self.max_lookups == 0
            || (self.num_elements + 1) as f64
                > (self.num_slots_minus_one + 1) as f64 * self.max_load_factor as f64
    }

    /// Inserts a value that is known not to be in the table.
    pub(crate) fn insert_unique(&mut self, hash: u64, value: T, hasher: impl Fn(&T) -> u64) -> usize {
        let mut value = value;
        loop {
            if unlikely(self.needs_growth()) {
                self.grow(&hasher);
            }
            let (index, distance) = self.probe_for_insert(hash);
            match self.place(index, distance, value) {
                Ok(slot) => return slot,
                Err(v) => {
                    value = v;
                    self.grow(&hasher);
                }
            }
        }
    }

    pub(crate) fn grow(&mut self, hasher: &impl Fn(&T) -> u64) {
        let target = self.bucket_count().saturating_mul(2).max(4);
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
        let required = (num_elements as f64 / self.max_load_factor as f64).ceil() as usize;
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
        let needed = (self.num_elements as f64 / self.max_load_factor as f64).ceil() as usize;
        let num_items = num_items.max(needed);
        if num_items == 0 {
            self.reset_to_empty_state();
            return Ok(());
        }
        let (mut capacity, mut token) = self
            .policy
            .next_size_over(num_items)
            .map_err(|_| fallibility.capacity_overflow())?;
        if self.max_lookups != 0 && capacity == self.num_slots_minus_one + 1 {
            return Ok(());
        }
        loop {
            let mut policy = self.policy.clone();
            policy.commit(token);
            let mut new = Self::new_buffer(
                capacity,
                fallibility,
                policy,
                self.alloc.clone(),
                self.max_load_factor,
            )?;
            if self.copy_into(&mut new, hasher) {
                let old = mem::replace(self, new);
                old.discard_without_drop();
                return Ok(());
            }
            // A probe chain outgrew max_lookups in the new buffer; try the
            // next size up. The copies in `new` are duplicates, so the
            // buffer is dropped without running destructors.
            new.discard_without_drop();
            let doubled = capacity
                .checked_mul(2)
                .ok_or_else(|| fallibility.capacity_overflow())?;
            let (c, t) = self
                .policy
                .next_size_over(doubled)
                .map_err(|_| fallibility.capacity_overflow())?;
            capacity = c;
            token = t;
        }
    }

    /// Bucket a hash maps to under the current policy state.
    #[inline]
    pub(crate) fn ideal_index(&self, hash: u64) -> usize {
        self.policy.index_for_hash(hash, self.num_slots_minus_one)
    }

    #[inline]
    pub(crate) fn alloc_handle(&self) -> A {
        self.alloc.clone()
    }

    /// Allocates a zeroed table with the given capacity. The policy must
    /// already be committed for that capacity.
    pub(crate) fn new_buffer(
        capacity: usize,
        fallibility: Fallibility,
        policy: P,
        alloc: A,
        max_load_factor: f32,
    ) -> Result<Self> {
        let max_lookups = Self::compute_max_lookups(capacity);
        let total = capacity + max_lookups as usize;
        let (layout, meta_offset) =
            soa_layout::<T>(total).ok_or_else(|| fallibility.capacity_overflow())?;
        let base = unsafe { alloc.alloc(layout) }.ok_or_else(|| fallibility.alloc_err(layout))?;
        let values = base.cast::<T>();
        let meta =
            unsafe { NonNull::new_unchecked(base.as_ptr().add(meta_offset) as *mut DistByte) };
        unsafe {
            // -1 is 0xff in every byte.
            ptr::write_bytes(meta.as_ptr(), 0xff, total);
            *meta.as_ptr().add(total - 1) = DistByte::END;
        }
        Ok(Self {
            meta,
            values,
            num_slots_minus_one: capacity - 1,
            max_lookups,
            num_elements: 0,
            max_load_factor,
            policy,
            alloc,
            marker: PhantomData,
        })
    }

    /// Copies every live value into `new` by bit copy, leaving this table
    /// untouched. Returns false if `new` is too small to take the chains.
    fn copy_into(&self, new: &mut Self, hasher: &impl Fn(&T) -> u64) -> bool {
        for i in 0..self.total_slots() {
            if !unsafe { self.meta_at(i) }.is_occupied() {
                continue;
            }
            let value = unsafe { ptr::read(self.value_ptr(i)) };
            let hash = hasher(&value);
            let (index, distance) = new.probe_for_insert(hash);
            match new.place(index, distance, value) {
                Ok(_) => {}
                Err(duplicate) => {
                    mem::forget(duplicate);
                    return false;
                }
            }
        }
        true
    }

    /// Frees the buffer without dropping the values in it, for buffers whose
    /// values are bit copies owned elsewhere.
    pub(crate) fn discard_without_drop(self) {
        let this = mem::ManuallyDrop::new(self);
        unsafe {
            let alloc = ptr::read(&this.alloc);
            let policy = ptr::read(&this.policy);
            if this.max_lookups != 0 {
                let total = this.num_slots_minus_one + 1 + this.max_lookups as usize;
                if let Some((layout, _)) = soa_layout::<T>(total) {
                    alloc.dealloc(this.values.cast::<u8>(), layout);
                }
            }
            drop(policy);
            drop(alloc);
        }
    }

    unsafe fn dealloc_buffer(&mut self) {
        if self.max_lookups == 0 {
            return;
        }
        let total = self.total_slots();
        if let Some((layout, _)) = soa_layout::<T>(total) {
            self.alloc.dealloc(self.values.cast::<u8>(), layout);
        }
    }

    fn reset_to_empty_state(&mut self) {
        self.clear();
        unsafe {
            self.dealloc_buffer();
        }
        self.meta = sentinel_meta();
        self.values = NonNull::dangling();
        self.num_slots_minus_one = 0;
        self.max_lookups = 0;
        self.policy.reset();
    }

    /// Drops every live value and marks all slots empty; keeps the buffer.
    pub(crate) fn clear(&mut self) {
        if self.max_lookups == 0 {
            self.num_elements = 0;
            return;
        }
        unsafe {
            for i in 0..self.total_slots() {
                if self.meta_at(i).is_occupied() {
                    if mem::needs_drop::<T>() {
                        ptr::drop_in_place(self.value_ptr(i));
                    }
                    self.set_meta(i, DistByte::EMPTY);
                }
            }
        }
        self.num_elements = 0;
    }

    /// Removes the entry at `index`, dropping its value.
    pub(crate) fn erase_index(&mut self, index: usize) {
        unsafe {
            ptr::drop_in_place(self.value_ptr(index));
        }
        self.backshift(index);
    }

    /// Removes the entry at `index`, returning its value.
    pub(crate) fn take_index(&mut self, index: usize) -> T {
        let value = unsafe { ptr::read(self.value_ptr(index)) };
        self.backshift(index);
        value
    }

    // Shift the rest of the cluster back one slot, decrementing distances,
    // until an empty slot or an entry already at its ideal bucket.
    fn backshift(&mut self, index: usize) {
        self.num_elements -= 1;
        unsafe {
            let mut current = index;
            loop {
                let next = current + 1;
                let next_meta = self.meta_at(next).0;
                if next_meta <= 0 {
                    break;
                }
                ptr::copy_nonoverlapping(self.value_ptr(next), self.value_ptr(current), 1);
                self.set_meta(current, DistByte::distance(next_meta - 1));
                current = next;
            }
            self.set_meta(current, DistByte::EMPTY);
        }
    }

    /// First occupied slot at or after `from`.
    pub(crate) fn next_occupied(&self, from: usize) -> Option<usize> {
        let total = self.total_slots();
        let mut i = from;
        while i < total {
            if unsafe { self.meta_at(i) }.is_occupied() {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Audits every stored distance against the policy and the element
    /// count. Test support; panics on any violation.
    pub(crate) fn check_consistency(&self, hasher: impl Fn(&T) -> u64) {
        let total = self.total_slots();
        let mut live = 0;
        for i in 0..total {
            match unsafe { self.meta_at(i) }.state() {
                SlotState::Empty => {}
                SlotState::End => assert_eq!(i, total - 1, "end sentinel off the last slot"),
                SlotState::Distance(d) => {
                    live += 1;
                    assert!(d < self.max_lookups);
                    let value = unsafe { self.value_ref(i) };
                    let ideal = self
                        .policy
                        .index_for_hash(hasher(value), self.num_slots_minus_one);
                    assert_eq!(ideal + d as usize, i, "stored distance disagrees with policy");
                }
            }
        }
        assert_eq!(live, self.num_elements);
    }
}

impl<T, P: HashPolicy, A: RawAlloc, const EAGER_EQ: bool> Drop for RawFlat<T, P, A, EAGER_EQ> {
    fn drop(&mut self) {
        if self.max_lookups != 0 {
            unsafe {
                if mem::needs_drop::<T>() {
                    for i in 0..self.total_slots() {
                        if self.meta_at(i).is_occupied() {
                            ptr::drop_in_place(self.value_ptr(i));
                        }
                    }
                }
                self.dealloc_buffer();
            }
        }
    }
}
