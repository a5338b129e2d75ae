//! 16-lane block probing.
//!
//! Slots are grouped into blocks of sixteen: sixteen metadata bytes packed
//! into one 128-bit word followed by sixteen value slots. A metadata byte is
//! `0x80` for an empty lane, `0x81`/`0x82` for the end-of-table guard, or
//! `(distance << 5) | (extra & 0x1f)` for an occupied lane, where `distance`
//! counts blocks past the ideal block and `extra` is a tag recovered from
//! the hash. One 16-byte compare tests a whole block for candidate lanes;
//! one signed less-than over the same word is the Robin-Hood absence test,
//! because the empty and guard encodings sit below every occupied encoding
//! as signed bytes.

use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};
use std::alloc::Layout;

use crate::error::{Fallibility, Result};
use crate::layout::RawAlloc;
use crate::policy::HashPolicy;

use super::imp::Group;

pub(crate) const EMPTY: u8 = 0x80;
pub(crate) const END_ALIGNED: u8 = 0x81;
// Kept for metadata-format compatibility: the original layout shifted
// 8-aligned allocations and tagged the guard accordingly. Layout-based
// allocation always returns 16-aligned blocks, so this value is recognized
// but never written.
pub(crate) const END_MISALIGNED: u8 = 0x82;
pub(crate) const DISTANCE_START: u8 = 0xa0;
pub(crate) const DISTANCE_BIT: u8 = 0x20;
pub(crate) const EXTRA_BITS_MASK: u8 = 0x1f;

pub(crate) const BLOCK_LANES: usize = Group::WIDTH;

#[inline]
pub(crate) fn distance_of(meta: u8) -> i32 {
    ((meta as i8 as i32) - (DISTANCE_START as i8 as i32)) >> 5
}

#[inline]
pub(crate) fn is_end(meta: u8) -> bool {
    meta == END_ALIGNED || meta == END_MISALIGNED
}

#[inline]
pub(crate) fn is_occupied(meta: u8) -> bool {
    meta != EMPTY && !is_end(meta)
}

#[repr(C, align(16))]
pub(crate) struct Block<T> {
    meta: [u8; BLOCK_LANES],
    values: [MaybeUninit<T>; BLOCK_LANES],
}

fn uninit_values<T>() -> [MaybeUninit<T>; BLOCK_LANES] {
    // An array of MaybeUninit is always initialized.
    unsafe { MaybeUninit::<[MaybeUninit<T>; BLOCK_LANES]>::uninit().assume_init() }
}

impl<T> Block<T> {
    #[inline]
    fn group(&self) -> Group {
        unsafe { Group::load(self.meta.as_ptr()) }
    }

    #[inline]
    fn value_ptr(&self, lane: usize) -> *mut T {
        self.values[lane].as_ptr() as *mut T
    }

    #[inline]
    fn first_empty_lane(&self) -> Option<usize> {
        self.group()
            .match_group(Group::splat(EMPTY))
            .lowest_set_bit()
    }

    /// Lane whose distance is strictly below `distance_of(than)`, preferring
    /// the smallest such distance. Only called on blocks with no empty lane.
    fn lane_with_smallest_distance(&self, than: u8) -> Option<usize> {
        let mut lowest = None;
        let mut smallest = distance_of(than);
        for lane in 0..BLOCK_LANES {
            let d = distance_of(self.meta[lane]);
            if d < smallest {
                smallest = d;
                lowest = Some(lane);
            }
        }
        lowest
    }

    /// Lane with the largest positive distance, if any.
    fn lane_with_largest_distance(&self) -> Option<usize> {
        let mut index = None;
        let mut largest = 0;
        for lane in 0..BLOCK_LANES {
            let d = distance_of(self.meta[lane]);
            if d > largest {
                largest = d;
                index = Some(lane);
            }
        }
        index
    }
}

pub(crate) struct RawBlock<T, P: HashPolicy, A: RawAlloc> {
    blocks: NonNull<Block<T>>,
    num_blocks_minus_one: usize,
    // 0 tags the unallocated state.
    max_lookups: u8,
    max_load_factor: f32,
    num_elements: usize,
    pub(crate) policy: P,
    alloc: A,
    marker: PhantomData<T>,
}

unsafe impl<T: Send, P: HashPolicy, A: RawAlloc> Send for RawBlock<T, P, A> {}
unsafe impl<T: Sync, P: HashPolicy, A: RawAlloc> Sync for RawBlock<T, P, A> {}

impl<T, P: HashPolicy, A: RawAlloc> RawBlock<T, P, A> {
    pub(crate) fn new_in(policy: P, alloc: A) -> Self {
        Self {
            blocks: NonNull::dangling(),
            num_blocks_minus_one: 0,
            max_lookups: 0,
            max_load_factor: 0.9375,
            num_elements: 0,
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
            BLOCK_LANES * (self.num_blocks_minus_one + 1)
        }
    }

    #[inline]
    pub(crate) fn load_factor(&self) -> f32 {
        let buckets = self.bucket_count();
        if buckets == 0 {
            0.0
        } else {
            self.num_elements as f32 / buckets as f32
        }
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

    #[inline]
    pub(crate) fn total_blocks(&self) -> usize {
        if self.max_lookups == 0 {
            0
        } else {
            self.num_blocks_minus_one + 1 + self.max_lookups as usize
        }
    }

    #[inline]
    fn block_ptr(&self, index: usize) -> *mut Block<T> {
        unsafe { self.blocks.as_ptr().add(index) }
    }

    #[inline]
    pub(crate) unsafe fn meta_at(&self, pos: usize) -> u8 {
        (*self.block_ptr(pos / BLOCK_LANES)).meta[pos % BLOCK_LANES]
    }

    #[inline]
    pub(crate) fn value_ptr(&self, pos: usize) -> *mut T {
        unsafe { (*self.block_ptr(pos / BLOCK_LANES)).value_ptr(pos % BLOCK_LANES) }
    }

    #[inline]
    pub(crate) unsafe fn value_ref(&self, pos: usize) -> &T {
        &*self.value_ptr(pos)
    }

    #[inline]
    pub(crate) unsafe fn value_mut(&mut self, pos: usize) -> &mut T {
        &mut *self.value_ptr(pos)
    }

    fn compute_max_lookups(num_blocks: usize) -> u8 {
        let log2 = (mem::size_of::<usize>() * 8) as u32 - 1 - num_blocks.leading_zeros();
        (1 + log2 / 4).min(4).max(1) as u8
    }

    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<usize> {
        if self.max_lookups == 0 {
            return None;
        }
        let index = self.policy.index_for_hash(hash, self.num_blocks_minus_one);
        let extra = self.policy.extra_bits_for_hash(hash) & EXTRA_BITS_MASK;
        let ones = Group::splat(DISTANCE_BIT);
        let mut compare = Group::splat(DISTANCE_START | extra);
        let mut compare_distance = Group::splat(DISTANCE_START);
        let mut block_index = index;
        loop {
            let block = unsafe { &*self.block_ptr(block_index) };
            let group = block.group();
            for lane in group.match_group(compare) {
                if eq(unsafe { &*block.value_ptr(lane) }) {
                    return Some(block_index * BLOCK_LANES + lane);
                }
            }
            if group.any_lane_below(compare_distance) {
                return None;
            }
            compare = compare.add(ones);
            compare_distance = compare_distance.add(ones);
            block_index += 1;
        }
    }

    /// Same walk as `find`, counting candidate lanes examined.
    pub(crate) fn num_lookups(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> usize {
        if self.max_lookups == 0 {
            return 0;
        }
        let index = self.policy.index_for_hash(hash, self.num_blocks_minus_one);
        let extra = self.policy.extra_bits_for_hash(hash) & EXTRA_BITS_MASK;
        let ones = Group::splat(DISTANCE_BIT);
        let mut compare = Group::splat(DISTANCE_START | extra);
        let mut compare_distance = Group::splat(DISTANCE_START);
        let mut block_index = index;
        let mut visited = 0;
        loop {
            let block = unsafe { &*self.block_ptr(block_index) };
            let group = block.group();
            for lane in group.match_group(compare) {
                visited += 1;
                if eq(unsafe { &*block.value_ptr(lane) }) {
                    return visited;
                }
            }
            if group.any_lane_below(compare_distance) {
                return visited;
            }
            compare = compare.add(ones);
            compare_distance = compare_distance.add(ones);
            block_index += 1;
        }
    }

    /// Walks to the block where an absent key's probe would stop, returning
    /// the ideal block and the stop distance.
    fn probe_absence(&self, hash: u64) -> (usize, i32) {
        let index = self.policy.index_for_hash(hash, self.num_blocks_minus_one);
        let mut compare_distance = Group::splat(DISTANCE_START);
        let ones = Group::splat(DISTANCE_BIT);
        let mut distance = 0;
        loop {
            let block = unsafe { &*self.block_ptr(index + distance as usize) };
            if block.group().any_lane_below(compare_distance) {
                return (index, distance);
            }
            compare_distance = compare_distance.add(ones);
            distance += 1;
        }
    }

    /// Places a value known to be absent, starting from `probe_absence`
    /// output. Fails with the new element when a probe distance would reach
    /// `max_lookups`; the table then holds exactly its pre-call elements.
    fn place(
        &mut self,
        initial: usize,
        distance: i32,
        extra: u8,
        value: T,
    ) -> std::result::Result<usize, T> {
        enum Spot {
            Empty(usize, usize),
            Displace(usize, usize),
            Grow,
        }

        let mut current = initial + distance as usize;
        let mut dist = distance;
        let mut new_meta =
            (DISTANCE_START | extra).wrapping_add(DISTANCE_BIT.wrapping_mul(distance as u8));
        let spot = loop {
            if dist >= self.max_lookups as i32 {
                break Spot::Grow;
            }
            let block = unsafe { &*self.block_ptr(current) };
            if let Some(lane) = block.first_empty_lane() {
                break Spot::Empty(current, lane);
            }
            if let Some(lane) = block.lane_with_smallest_distance(new_meta) {
                break Spot::Displace(current, lane);
            }
            current += 1;
            dist += 1;
            new_meta = new_meta.wrapping_add(DISTANCE_BIT);
        };

        match spot {
            Spot::Grow => Err(value),
            Spot::Empty(block_index, lane) => {
                let block = unsafe { &mut *self.block_ptr(block_index) };
                unsafe {
                    ptr::write(block.value_ptr(lane), value);
                }
                block.meta[lane] = new_meta;
                self.num_elements += 1;
                Ok(block_index * BLOCK_LANES + lane)
            }
            Spot::Displace(block_index, lane) => {
                let mut to_insert = value;
                let mut current = block_index;
                unsafe {
                    let block = &mut *self.block_ptr(current);
                    mem::swap(&mut to_insert, &mut *block.value_ptr(lane));
                    mem::swap(&mut new_meta, &mut block.meta[lane]);
                }
                new_meta = new_meta.wrapping_add(DISTANCE_BIT);
                let mut dist = distance_of(new_meta);
                let result = current * BLOCK_LANES + lane;
                current += 1;
                loop {
                    let block = unsafe { &mut *self.block_ptr(current) };
                    if let Some(empty) = block.first_empty_lane() {
                        unsafe {
                            ptr::write(block.value_ptr(empty), to_insert);
                        }
                        block.meta[empty] = new_meta;
                        self.num_elements += 1;
                        return Ok(result);
                    }
                    if let Some(low) = block.lane_with_smallest_distance(new_meta) {
                        unsafe {
                            mem::swap(&mut to_insert, &mut *block.value_ptr(low));
                        }
                        mem::swap(&mut new_meta, &mut block.meta[low]);
                        new_meta = new_meta.wrapping_add(DISTANCE_BIT);
                        dist = distance_of(new_meta);
                    } else {
                        dist += 1;
                        if dist >= self.max_lookups as i32 {
                            // Park the carried occupant where the new element
                            // landed and hand the new element back; growth
                            // rebuilds all metadata from the values.
                            unsafe {
                                mem::swap(&mut to_insert, &mut *self.value_ptr(result));
                            }
                            return Err(to_insert);
                        }
                        new_meta = new_meta.wrapping_add(DISTANCE_BIT);
                    }
                    current += 1;
                }
            }
        }
    }

    #[inline]
    fn needs_growth(&self) -> bool {
        self.max_lookups == 0
            || (self.num_elements + 1) as f64
                > self.bucket_count() as f64 * self.max_load_factor as f64
    }

    pub(crate) fn insert_unique(&mut self, hash: u64, value: T, hasher: impl Fn(&T) -> u64) -> usize {
        let mut value = value;
        loop {
            if self.needs_growth() {
                self.grow(&hasher);
            }
            let (initial, distance) = self.probe_absence(hash);
            let extra = self.policy.extra_bits_for_hash(hash) & EXTRA_BITS_MASK;
            match self.place(initial, distance, extra, value) {
                Ok(pos) => return pos,
                Err(v) => {
                    value = v;
                    self.grow(&hasher);
                }
            }
        }
    }

    fn grow(&mut self, hasher: &impl Fn(&T) -> u64) {
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
        let num_blocks = (num_items + BLOCK_LANES - 1) / BLOCK_LANES;
        let (mut capacity, mut token) = self
            .policy
            .next_size_over(num_blocks.max(1))
            .map_err(|_| fallibility.capacity_overflow())?;
        if self.max_lookups != 0 && capacity == self.num_blocks_minus_one + 1 {
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

    fn new_buffer(
        num_blocks: usize,
        fallibility: Fallibility,
        policy: P,
        alloc: A,
        max_load_factor: f32,
    ) -> Result<Self> {
        let max_lookups = Self::compute_max_lookups(num_blocks);
        let total = num_blocks + max_lookups as usize;
        let layout = Layout::array::<Block<T>>(total)
            .map_err(|_| fallibility.capacity_overflow())?;
        let base = unsafe { alloc.alloc(layout) }.ok_or_else(|| fallibility.alloc_err(layout))?;
        let blocks = base.cast::<Block<T>>();
        unsafe {
            for b in 0..total - 1 {
                ptr::write(
                    blocks.as_ptr().add(b),
                    Block {
                        meta: [EMPTY; BLOCK_LANES],
                        values: uninit_values(),
                    },
                );
            }
            ptr::write(
                blocks.as_ptr().add(total - 1),
                Block {
                    meta: [END_ALIGNED; BLOCK_LANES],
                    values: uninit_values(),
                },
            );
        }
        Ok(Self {
            blocks,
            num_blocks_minus_one: num_blocks - 1,
            max_lookups,
            max_load_factor,
            num_elements: 0,
            policy,
            alloc,
            marker: PhantomData,
        })
    }

    fn copy_into(&self, new: &mut Self, hasher: &impl Fn(&T) -> u64) -> bool {
        let total = self.total_blocks() * BLOCK_LANES;
        let mut i = 0;
        while i < total {
            let meta = unsafe { self.meta_at(i) };
            if is_occupied(meta) {
                let value = unsafe { ptr::read(self.value_ptr(i)) };
                let hash = hasher(&value);
                let (initial, distance) = new.probe_absence(hash);
                let extra = new.policy.extra_bits_for_hash(hash) & EXTRA_BITS_MASK;
                match new.place(initial, distance, extra, value) {
                    Ok(_) => {}
                    Err(duplicate) => {
                        mem::forget(duplicate);
                        return false;
                    }
                }
            }
            i += 1;
        }
        true
    }

    fn discard_without_drop(self) {
        let this = mem::ManuallyDrop::new(self);
        unsafe {
            let alloc = ptr::read(&this.alloc);
            let policy = ptr::read(&this.policy);
            if this.max_lookups != 0 {
                let total = this.num_blocks_minus_one + 1 + this.max_lookups as usize;
                if let Ok(layout) = Layout::array::<Block<T>>(total) {
                    alloc.dealloc(this.blocks.cast::<u8>(), layout);
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
        if let Ok(layout) = Layout::array::<Block<T>>(self.total_blocks()) {
            self.alloc.dealloc(self.blocks.cast::<u8>(), layout);
        }
    }

    fn reset_to_empty_state(&mut self) {
        self.clear();
        unsafe {
            self.dealloc_buffer();
        }
        self.blocks = NonNull::dangling();
        self.num_blocks_minus_one = 0;
        self.max_lookups = 0;
        self.policy.reset();
    }

    pub(crate) fn clear(&mut self) {
        let total = self.total_blocks() * BLOCK_LANES;
        let mut i = 0;
        while i < total {
            let meta = unsafe { self.meta_at(i) };
            if is_occupied(meta) {
                unsafe {
                    if mem::needs_drop::<T>() {
                        ptr::drop_in_place(self.value_ptr(i));
                    }
                    (*self.block_ptr(i / BLOCK_LANES)).meta[i % BLOCK_LANES] = EMPTY;
                }
            }
            i += 1;
        }
        self.num_elements = 0;
    }

    /// Removes the lane at `pos`, dropping its value, then pulls trailing
    /// displaced lanes back one block at a time.
    pub(crate) fn erase_index(&mut self, pos: usize) {
        unsafe {
            ptr::drop_in_place(self.value_ptr(pos));
        }
        self.backshift(pos);
    }

    pub(crate) fn take_index(&mut self, pos: usize) -> T {
        let value = unsafe { ptr::read(self.value_ptr(pos)) };
        self.backshift(pos);
        value
    }

    fn backshift(&mut self, pos: usize) {
        self.num_elements -= 1;
        let mut current = pos / BLOCK_LANES;
        let mut lane = pos % BLOCK_LANES;
        unsafe {
            (*self.block_ptr(current)).meta[lane] = EMPTY;
        }
        let mut next = current + 1;
        loop {
            let next_ptr = self.block_ptr(next);
            let mover = match unsafe { (*next_ptr).lane_with_largest_distance() } {
                Some(m) => m,
                None => break,
            };
            unsafe {
                let current_ptr = self.block_ptr(current);
                ptr::copy_nonoverlapping(
                    (*next_ptr).value_ptr(mover),
                    (*current_ptr).value_ptr(lane),
                    1,
                );
                (*current_ptr).meta[lane] = (*next_ptr).meta[mover].wrapping_sub(DISTANCE_BIT);
                (*next_ptr).meta[mover] = EMPTY;
            }
            current = next;
            lane = mover;
            next += 1;
        }
    }

    /// Drops the value at `pos` and marks the lane empty without repairing
    /// displacement; the range-erase repair pass follows up.
    pub(crate) fn destroy_at(&mut self, pos: usize) {
        unsafe {
            ptr::drop_in_place(self.value_ptr(pos));
            (*self.block_ptr(pos / BLOCK_LANES)).meta[pos % BLOCK_LANES] = EMPTY;
        }
        self.num_elements -= 1;
    }

    /// Reads the value at `pos` out and marks the lane empty, without
    /// repairing displacement.
    pub(crate) fn take_raw(&mut self, pos: usize) -> T {
        let value = unsafe { ptr::read(self.value_ptr(pos)) };
        unsafe {
            (*self.block_ptr(pos / BLOCK_LANES)).meta[pos % BLOCK_LANES] = EMPTY;
        }
        self.num_elements -= 1;
        value
    }

    /// Whether `pos` holds an element living past its ideal block.
    pub(crate) fn is_displaced(&self, pos: usize) -> bool {
        let meta = unsafe { self.meta_at(pos) };
        is_occupied(meta) && distance_of(meta) > 0
    }

    pub(crate) fn next_occupied(&self, from: usize) -> Option<usize> {
        let total = self.total_blocks() * BLOCK_LANES;
        let mut i = from;
        while i < total {
            if is_occupied(unsafe { self.meta_at(i) }) {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Audits stored distances and tags against the policy. Test support;
    /// panics on any violation.
    pub(crate) fn check_consistency(&self, hasher: impl Fn(&T) -> u64) {
        let total = self.total_blocks() * BLOCK_LANES;
        let mut live = 0;
        let mut i = 0;
        while i < total {
            let meta = unsafe { self.meta_at(i) };
            if is_end(meta) {
                assert!(i / BLOCK_LANES == self.total_blocks() - 1);
            } else if meta != EMPTY {
                live += 1;
                let d = distance_of(meta);
                assert!(d >= 0 && d < self.max_lookups as i32);
                let hash = hasher(unsafe { self.value_ref(i) });
                let ideal = self.policy.index_for_hash(hash, self.num_blocks_minus_one);
                assert_eq!(ideal + d as usize, i / BLOCK_LANES);
                let extra = self.policy.extra_bits_for_hash(hash) & EXTRA_BITS_MASK;
                assert_eq!(meta & EXTRA_BITS_MASK, extra);
            }
            i += 1;
        }
        assert_eq!(live, self.num_elements);
    }
}

impl<T, P: HashPolicy, A: RawAlloc> Drop for RawBlock<T, P, A> {
    fn drop(&mut self) {
        if self.max_lookups != 0 {
            unsafe {
                if mem::needs_drop::<T>() {
                    let total = self.total_blocks() * BLOCK_LANES;
                    let mut i = 0;
                    while i < total {
                        if is_occupied(self.meta_at(i)) {
                            ptr::drop_in_place(self.value_ptr(i));
                        }
                        i += 1;
                    }
                }
                self.dealloc_buffer();
            }
        }
    }
}
