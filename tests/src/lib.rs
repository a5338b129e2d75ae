//! Scenario tests run against every table core through its public API.
//!
//! One macro instantiates the shared suite per core; core-specific behavior
//! (probe-bound instrumentation, policy variants, range-erase exactness)
//! gets its own modules below.

#[cfg(test)]
mod support {
    use std::hash::{BuildHasher, Hasher};

    /// Passes 64-bit keys through unhashed, so bucket indices come straight
    /// from the key bits. Collision scenarios depend on it.
    #[derive(Default, Clone)]
    pub struct IdentityState;

    pub struct IdentityHasher(u64);

    impl BuildHasher for IdentityState {
        type Hasher = IdentityHasher;

        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | b as u64;
            }
        }

        fn write_u64(&mut self, v: u64) {
            self.0 = v;
        }

        fn write_i64(&mut self, v: i64) {
            self.0 = v as u64;
        }
    }

    /// Arithmetic progression of 160 keys anchored at two values known to
    /// cluster badly, kept as a regression input for interleaved insert and
    /// range-erase sequences.
    pub fn adversarial_keys() -> Vec<u64> {
        (0..160i64)
            .map(|i| (-16_774_656i64 + i * 33_065) as u64)
            .collect()
    }
}

#[cfg(test)]
macro_rules! map_suite {
    ($name:ident, $map:ty, $rc_map:ty, $counting_map:expr, $exact_range:expr) => {
        mod $name {
            use openhash::{CountingAlloc, TableError};
            use rand::rngs::StdRng;
            use rand::{Rng, SeedableRng};
            use std::collections::{HashMap, HashSet};
            use std::rc::Rc;

            use crate::support::adversarial_keys;

            type Map = $map;

            fn iteration_agrees_with_find(map: &Map) {
                let mut seen = 0;
                for (k, v) in map.iter() {
                    let pos = map.find(k).expect("iterated key must be findable");
                    let (fk, fv) = map.entry_at(pos);
                    assert_eq!(fk, k);
                    assert_eq!(fv, v);
                    seen += 1;
                }
                assert_eq!(seen, map.len());
                map.check_consistency();
            }

            #[test]
            fn consecutive_pairs() {
                let mut map: Map = Default::default();
                for i in 0..50u64 {
                    let (_, inserted) = map.insert(2 * i, 4 * i);
                    assert!(inserted);
                }
                assert_eq!(map.len(), 50);
                for i in 0..50u64 {
                    assert_eq!(map.get(&(2 * i)), Some(&(4 * i)));
                    assert_eq!(map.find(&(2 * i + 1)), None);
                }
                iteration_agrees_with_find(&map);
            }

            #[test]
            fn uniform_random_13k() {
                let mut rng = StdRng::seed_from_u64(5);
                let keys: Vec<u64> = (0..13_000).map(|_| rng.gen()).collect();
                let mut map: Map = Default::default();
                for (i, &k) in keys.iter().enumerate() {
                    map.insert(k, i as u64);
                }
                assert!(map.load_factor() <= map.max_load_factor());
                for (i, &k) in keys.iter().enumerate() {
                    assert_eq!(map.get(&k), Some(&(i as u64)));
                }
                map.check_consistency();
            }

            #[test]
            fn reinsert_reports_existing_and_keeps_value() {
                let mut map: Map = Default::default();
                let (first_pos, inserted) = map.insert(42, 1);
                assert!(inserted);
                let (pos, inserted) = map.insert(42, 2);
                assert!(!inserted);
                assert_eq!(pos, first_pos);
                assert_eq!(map.len(), 1);
                assert_eq!(map.get(&42), Some(&1));
            }

            #[test]
            fn size_tracks_distinct_keys() {
                let mut rng = StdRng::seed_from_u64(7);
                let mut map: Map = Default::default();
                let mut model: HashMap<u64, u64> = HashMap::new();
                for _ in 0..2_000 {
                    let key = rng.gen_range(0, 300u64);
                    if rng.gen::<bool>() {
                        let value = rng.gen::<u64>();
                        let (_, inserted) = map.insert(key, value);
                        assert_eq!(inserted, !model.contains_key(&key));
                        model.entry(key).or_insert(value);
                    } else {
                        assert_eq!(map.remove(&key), model.remove(&key));
                    }
                    assert_eq!(map.len(), model.len());
                }
                for (k, v) in &model {
                    assert_eq!(map.get(k), Some(v));
                }
                iteration_agrees_with_find(&map);
            }

            #[test]
            fn clear_drops_every_value() {
                let marker = Rc::new(0u8);
                let mut map: $rc_map = Default::default();
                for i in 0..50u64 {
                    map.insert(i, Rc::clone(&marker));
                }
                assert_eq!(Rc::strong_count(&marker), 51);
                map.clear();
                assert_eq!(map.len(), 0);
                assert!(map.iter().next().is_none());
                assert_eq!(Rc::strong_count(&marker), 1);
                // The buffer is reusable after clear.
                map.insert(1, Rc::clone(&marker));
                assert_eq!(map.len(), 1);
            }

            #[test]
            fn rehash_keeps_every_mapping() {
                let mut map: Map = Default::default();
                for i in 0..100u64 {
                    map.insert(i, i * i);
                }
                map.rehash(1024);
                assert!(map.bucket_count() >= 1024);
                for i in 0..100u64 {
                    assert_eq!(map.get(&i), Some(&(i * i)));
                }
                iteration_agrees_with_find(&map);
            }

            #[test]
            fn round_trip_in_shuffled_order() {
                let mut rng = StdRng::seed_from_u64(13);
                let mut keys: Vec<u64> = (0..1_000).map(|i| i * 7 + 1).collect();
                for i in (1..keys.len()).rev() {
                    keys.swap(i, rng.gen_range(0, i + 1));
                }
                let mut map: Map = Default::default();
                for &k in &keys {
                    map.insert(k, !k);
                }
                assert_eq!(map.len(), keys.len());
                for &k in &keys {
                    assert_eq!(map.get(&k), Some(&!k));
                }
            }

            #[test]
            fn permutation_cycle_chase() {
                let n = 1024;
                let mut rng = StdRng::seed_from_u64(11);
                let keys: Vec<u64> = {
                    let mut set = HashSet::new();
                    while set.len() < n {
                        set.insert(rng.gen::<u64>());
                    }
                    set.into_iter().collect()
                };
                let mut map: Map = Default::default();
                for i in 0..n {
                    map.insert(keys[i], keys[(i + n - 1) % n]);
                }
                let mut current = keys[0];
                let mut seen = HashSet::new();
                for _ in 0..n {
                    assert!(seen.insert(current));
                    current = *map.get(&current).unwrap();
                }
                assert_eq!(seen.len(), n);
                assert_eq!(current, keys[0]);
            }

            #[test]
            fn erase_middle_range() {
                let mut map: Map = Default::default();
                for i in 0..100u64 {
                    map.insert(i, i);
                }
                let order: Vec<u64> = map.iter().map(|(k, _)| *k).collect();
                let from = map.find(&order[10]).unwrap();
                let to = map.find(&order[90]).unwrap();
                map.erase_range(from, to);
                assert_eq!(map.len(), 20);
                if $exact_range {
                    for (i, k) in order.iter().enumerate() {
                        if i < 10 || i >= 90 {
                            assert_eq!(map.get(k), Some(k), "survivor went missing");
                        } else {
                            assert_eq!(map.get(k), None, "erased key still present");
                        }
                    }
                }
                iteration_agrees_with_find(&map);
            }

            #[test]
            fn adversarial_inserts_and_range_erases() {
                let keys = adversarial_keys();
                let mut map: Map = Default::default();
                for (i, &k) in keys.iter().enumerate() {
                    map.insert(k, i as u64);
                    if i % 40 == 0 {
                        iteration_agrees_with_find(&map);
                    }
                }
                assert_eq!(map.len(), keys.len());
                iteration_agrees_with_find(&map);
                while map.len() > 30 {
                    let order: Vec<u64> = map.iter().map(|(k, _)| *k).collect();
                    let from = map.find(&order[5]).unwrap();
                    let upto = order.len() - 5;
                    let to = map.find(&order[upto.min(25)]).unwrap();
                    map.erase_range(from, to);
                    iteration_agrees_with_find(&map);
                }
            }

            #[test]
            fn missing_key_is_an_error_only_for_at() {
                let mut map: Map = Default::default();
                map.insert(1, 10);
                assert_eq!(map.at(&1), Ok(&10));
                assert!(matches!(map.at(&2), Err(TableError::MissingKey)));
                assert_eq!(map.find(&2), None);
            }

            #[test]
            fn alloc_failure_leaves_table_unchanged() {
                let alloc = CountingAlloc::new();
                let mut map = ($counting_map)(alloc.clone());
                for i in 0..100u64 {
                    map.insert(i, i * 3);
                }
                let len = map.len();
                let buckets = map.bucket_count();
                alloc.fail_after(0);
                let result = map.try_rehash(buckets * 4);
                assert!(matches!(
                    result,
                    Err(TableError::AllocationFailed { .. })
                ));
                assert_eq!(map.len(), len);
                assert_eq!(map.bucket_count(), buckets);
                for i in 0..100u64 {
                    assert_eq!(map.get(&i), Some(&(i * 3)));
                }
                map.check_consistency();
                assert!(matches!(
                    map.try_reserve(buckets * 8),
                    Err(TableError::AllocationFailed { .. })
                ));
                assert_eq!(map.bucket_count(), buckets);
                alloc.unfail();
                map.try_rehash(buckets * 4).unwrap();
                assert!(map.bucket_count() >= buckets * 4);
                for i in 0..100u64 {
                    assert_eq!(map.get(&i), Some(&(i * 3)));
                }
                map.check_consistency();
            }

            #[test]
            fn swap_exchanges_contents() {
                let mut left: Map = Default::default();
                let mut right: Map = Default::default();
                left.insert(1, 100);
                right.insert(2, 200);
                right.insert(3, 300);
                left.swap(&mut right);
                assert_eq!(left.len(), 2);
                assert_eq!(right.len(), 1);
                assert_eq!(left.get(&2), Some(&200));
                assert_eq!(right.get(&1), Some(&100));
            }
        }
    };
}

#[cfg(test)]
map_suite!(
    flat,
    openhash::FlatMap<u64, u64>,
    openhash::FlatMap<u64, std::rc::Rc<u8>>,
    |alloc| openhash::FlatMap::<
        u64,
        u64,
        openhash::DefaultHashBuilder,
        openhash::policy::FibonacciPolicy,
        openhash::CountingAlloc,
    >::with_capacity_and_hasher_and_policy_in(
        0,
        Default::default(),
        Default::default(),
        alloc
    ),
    true
);

#[cfg(test)]
map_suite!(
    bytell,
    openhash::BytellMap<u64, u64>,
    openhash::BytellMap<u64, std::rc::Rc<u8>>,
    |alloc| openhash::BytellMap::<
        u64,
        u64,
        openhash::DefaultHashBuilder,
        openhash::policy::FibonacciPolicy,
        openhash::CountingAlloc,
    >::with_capacity_and_hasher_and_policy_in(
        0,
        Default::default(),
        Default::default(),
        alloc
    ),
    false
);

#[cfg(test)]
map_suite!(
    block,
    openhash::BlockMap<u64, u64>,
    openhash::BlockMap<u64, std::rc::Rc<u8>>,
    |alloc| openhash::BlockMap::<
        u64,
        u64,
        openhash::DefaultHashBuilder,
        openhash::policy::FibonacciPolicy,
        openhash::CountingAlloc,
    >::with_capacity_and_hasher_and_policy_in(
        0,
        Default::default(),
        Default::default(),
        alloc
    ),
    true
);

#[cfg(test)]
map_suite!(
    twohash,
    openhash::TwoHashMap<u64, u64>,
    openhash::TwoHashMap<u64, std::rc::Rc<u8>>,
    |alloc| openhash::TwoHashMap::<
        u64,
        u64,
        openhash::DefaultHashBuilder,
        openhash::CountingAlloc,
    >::with_capacity_and_hasher_in(0, Default::default(), alloc),
    true
);

#[cfg(test)]
mod probe_bounds {
    use crate::support::IdentityState;
    use openhash::policy::PowerOfTwoPolicy;
    use openhash::{BlockMap, FlatMap, TwoHashMap};

    fn flat_probe_ceiling(bucket_count: usize) -> usize {
        let log2 = (std::mem::size_of::<usize>() * 8) as u32 - 1 - bucket_count.leading_zeros();
        (log2 as usize / 2).max(4)
    }

    #[test]
    fn flat_bounds_probes_for_colliding_keys() {
        // Multiples of 16 all collide in the low bits a power-of-two mask
        // keeps; the identity hasher makes sure they reach the mask intact.
        let mut map: FlatMap<u64, u64, IdentityState, PowerOfTwoPolicy> =
            FlatMap::with_hasher(IdentityState);
        let items = 256_000u64;
        for i in 0..items {
            map.insert(i * 16, i);
        }
        assert_eq!(map.len(), items as usize);
        let ceiling = flat_probe_ceiling(map.bucket_count());
        for i in 0..items {
            assert_eq!(map.get(&(i * 16)), Some(&i));
            assert!(map.num_lookups(&(i * 16)) <= ceiling);
        }
        map.check_consistency();
    }

    #[test]
    fn block_handles_colliding_keys() {
        let mut map: BlockMap<u64, u64, IdentityState, PowerOfTwoPolicy> =
            BlockMap::with_hasher(IdentityState);
        for i in 0..100_000u64 {
            map.insert(i * 16, i);
        }
        for i in 0..100_000u64 {
            assert_eq!(map.get(&(i * 16)), Some(&i));
            // At most max_lookups blocks of sixteen candidate lanes each.
            assert!(map.num_lookups(&(i * 16)) <= 4 * 16);
        }
        map.check_consistency();
    }

    #[test]
    fn twohash_probes_stay_short() {
        let mut map: TwoHashMap<u64, u64> = TwoHashMap::new();
        for i in 0..50_000u64 {
            map.insert(i, i);
        }
        // Each half visits at most its probe ceiling plus the proving slot.
        let ceiling = 2 * (flat_probe_ceiling(map.bucket_count() / 2) + 1);
        for i in 0..50_000u64 {
            let lookups = map.num_lookups(&i);
            assert!(lookups >= 1 && lookups <= ceiling);
        }
        map.check_consistency();
    }
}

#[cfg(test)]
mod policy_variants {
    use openhash::policy::{
        Crc32Policy, FastPrimePolicy, FibonacciPolicy, PowerOfTwoOtherBitsPolicy,
        PowerOfTwoPolicy, PrimePolicy, SwitchPrimePolicy,
    };
    use openhash::{DefaultHashBuilder, FlatMap};

    macro_rules! policy_round_trip {
        ($name:ident, $policy:ty) => {
            #[test]
            fn $name() {
                let mut map: FlatMap<u64, u64, DefaultHashBuilder, $policy> =
                    FlatMap::with_hasher(DefaultHashBuilder::default());
                for i in 0..2_000u64 {
                    let (_, inserted) = map.insert(i, i + 1);
                    assert!(inserted);
                }
                assert_eq!(map.len(), 2_000);
                for i in 0..2_000u64 {
                    assert_eq!(map.get(&i), Some(&(i + 1)));
                    assert!(map.find(&(i + 10_000)).is_none());
                }
                for i in (0..2_000u64).step_by(3) {
                    assert_eq!(map.remove(&i), Some(i + 1));
                }
                map.check_consistency();
            }
        };
    }

    policy_round_trip!(power_of_two, PowerOfTwoPolicy);
    policy_round_trip!(power_of_two_other_bits, PowerOfTwoOtherBitsPolicy<(u64, u64)>);
    policy_round_trip!(prime, PrimePolicy);
    policy_round_trip!(fast_prime, FastPrimePolicy);
    policy_round_trip!(switch_prime, SwitchPrimePolicy);
    policy_round_trip!(fibonacci, FibonacciPolicy);
    policy_round_trip!(crc32, Crc32Policy);
}

#[cfg(test)]
mod sets {
    use openhash::{BlockSet, BytellSet, FlatSet, TwoHashSet};

    macro_rules! set_round_trip {
        ($name:ident, $set:ty) => {
            #[test]
            fn $name() {
                let mut set: $set = Default::default();
                for i in 0..1_000u64 {
                    assert!(set.insert(i).1);
                }
                for i in 0..1_000u64 {
                    assert!(!set.insert(i).1);
                    assert!(set.contains(&i));
                }
                assert_eq!(set.len(), 1_000);
                for i in (0..1_000u64).step_by(2) {
                    assert_eq!(set.remove(&i), Some(i));
                }
                assert_eq!(set.len(), 500);
                assert_eq!(set.iter().count(), 500);
                set.check_consistency();
            }
        };
    }

    set_round_trip!(flat, FlatSet<u64>);
    set_round_trip!(bytell, BytellSet<u64>);
    set_round_trip!(block, BlockSet<u64>);
    set_round_trip!(twohash, TwoHashSet<u64>);
}
