use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use itertools::Itertools;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use openhash::{BlockMap, BytellMap, FlatMap, TwoHashMap};
use std::collections::HashMap;

const TABLE_SIZES: [usize; 3] = [1_000, 10_000, 100_000];
const MAX_LOAD_FACTORS: [f32; 2] = [0.5, 0.9375];
const LOOKUPS: u64 = 1_000;

static KEYS: Lazy<Vec<u64>> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(17);
    (0..100_000).map(|_| rng.gen()).collect()
});

static MISSING: Lazy<Vec<u64>> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(18);
    (0..LOOKUPS).map(|_| rng.gen()).collect()
});

macro_rules! bench_map {
    ($group:expr, $name:expr, $map_ty:ty, $size:expr, $mlf:expr, $probe:expr) => {{
        let mut map: $map_ty = Default::default();
        map.set_max_load_factor($mlf);
        for &k in &KEYS[..$size] {
            map.insert(k, k);
        }
        let label = format!("{}, max_load_factor: {}", $name, $mlf);
        $group.bench_with_input(BenchmarkId::new(label, $size), $probe, |b, probe| {
            b.iter(|| {
                let mut hits = 0u64;
                for k in probe.iter() {
                    if map.get(k).is_some() {
                        hits += 1;
                    }
                }
                black_box(hits)
            })
        });
    }};
}

fn successful_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("successful_lookup");
    group.throughput(Throughput::Elements(LOOKUPS));

    for (&size, &mlf) in TABLE_SIZES.iter().cartesian_product(MAX_LOAD_FACTORS.iter()) {
        let probe: Vec<u64> = KEYS[..size]
            .iter()
            .cycle()
            .take(LOOKUPS as usize)
            .cloned()
            .collect();
        bench_map!(group, "flat", FlatMap<u64, u64>, size, mlf, &probe);
        bench_map!(group, "bytell", BytellMap<u64, u64>, size, mlf, &probe);
        bench_map!(group, "block", BlockMap<u64, u64>, size, mlf, &probe);
        bench_map!(group, "twohash", TwoHashMap<u64, u64>, size, mlf, &probe);

        let mut std_map: HashMap<u64, u64> = HashMap::new();
        for &k in &KEYS[..size] {
            std_map.insert(k, k);
        }
        group.bench_with_input(
            BenchmarkId::new(format!("std, max_load_factor: {}", mlf), size),
            &probe,
            |b, probe| {
                b.iter(|| {
                    let mut hits = 0u64;
                    for k in probe.iter() {
                        if std_map.get(k).is_some() {
                            hits += 1;
                        }
                    }
                    black_box(hits)
                })
            },
        );
    }
    group.finish();
}

fn missing_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("missing_lookup");
    group.throughput(Throughput::Elements(LOOKUPS));

    for &size in TABLE_SIZES.iter() {
        bench_map!(group, "flat", FlatMap<u64, u64>, size, 0.9375, &*MISSING);
        bench_map!(group, "bytell", BytellMap<u64, u64>, size, 0.9375, &*MISSING);
        bench_map!(group, "block", BlockMap<u64, u64>, size, 0.9375, &*MISSING);
        bench_map!(group, "twohash", TwoHashMap<u64, u64>, size, 0.9375, &*MISSING);
    }
    group.finish();
}

criterion_group!(benches, successful_lookup, missing_lookup);
criterion_main!(benches);
