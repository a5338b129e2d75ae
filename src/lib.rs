#![cfg_attr(feature = "nightly", feature(core_intrinsics))]

//! Open-addressing hash table cores.
//!
//! Four single-threaded table designs sharing one hash-policy abstraction:
//!
//! * [`flat`]: Robin-Hood linear probing with a distance byte per slot.
//! * [`bytell`]: byte-per-slot jump-distance chaining.
//! * [`block`]: 16-slot SIMD block probing with Robin-Hood displacement
//!   across blocks.
//! * [`twohash`]: two parallel half-tables addressed by independent hash
//!   derivations, inserting into the shorter chain.
//!
//! The [`policy`] module maps a raw 64-bit hash onto a bucket index and owns
//! the growth schedule; every core is generic over it.

use std::hash::{BuildHasher, Hash, Hasher};

/// Hash distribution policies
pub mod policy;

/// Robin-Hood linear probing core
pub mod flat;
/// Byte-per-slot jump-distance chaining core
pub mod bytell;
/// 16-lane SIMD block probing core
pub mod block;
/// Two-choice twin-table core
pub mod twohash;

/// Buffer layout, allocator plumbing and slot metadata
mod layout;

/// Crate error types
mod error;
/// Set of compiler hints
mod hint;

pub use crate::error::{Result, TableError};
pub use crate::layout::{CountingAlloc, Global, RawAlloc};

pub use crate::block::{BlockMap, BlockSet};
pub use crate::bytell::{BytellMap, BytellSet};
pub use crate::flat::{FlatMap, FlatSet};
pub use crate::twohash::{TwoHashMap, TwoHashSet};

// Set FxHash to default as most keys tend to be small
pub type DefaultHashBuilder = fxhash::FxBuildHasher;

/// Position of an entry inside a table.
///
/// A `RawPos` is an index into the table's slot buffer, not a pointer; it is
/// only meaningful against the table that produced it and is invalidated by
/// any rehash (including growth triggered by `insert`) and by any erase.
/// Using a stale position with the `*_at` accessors may return an arbitrary
/// live entry or panic; it never touches unoccupied memory.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct RawPos(pub(crate) usize);

#[inline]
pub(crate) fn make_hash<K: Hash + ?Sized>(hash_builder: &impl BuildHasher, val: &K) -> u64 {
    let mut state = hash_builder.build_hasher();
    val.hash(&mut state);
    state.finish()
}
