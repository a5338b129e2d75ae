use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use openhash::{BlockMap, BytellMap, FlatMap, TwoHashMap};
use std::collections::HashMap;

const SIZES: [usize; 2] = [1_000, 50_000];

static KEYS: Lazy<Vec<u64>> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(23);
    (0..50_000).map(|_| rng.gen()).collect()
});

macro_rules! bench_churn {
    ($group:expr, $name:expr, $map_ty:ty, $size:expr) => {
        $group.bench_with_input(BenchmarkId::new($name, $size), &$size, |b, &size| {
            b.iter(|| {
                let mut map: $map_ty = Default::default();
                for &k in &KEYS[..size] {
                    map.insert(k, k);
                }
                // Erase every other key, then look everything up once.
                for &k in KEYS[..size].iter().step_by(2) {
                    map.remove(&k);
                }
                let mut hits = 0u64;
                for &k in &KEYS[..size] {
                    if map.get(&k).is_some() {
                        hits += 1;
                    }
                }
                black_box(hits)
            })
        });
    };
}

fn insert_erase_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_erase_lookup");
    for &size in SIZES.iter() {
        group.throughput(Throughput::Elements(size as u64 * 2));
        bench_churn!(group, "flat", FlatMap<u64, u64>, size);
        bench_churn!(group, "bytell", BytellMap<u64, u64>, size);
        bench_churn!(group, "block", BlockMap<u64, u64>, size);
        bench_churn!(group, "twohash", TwoHashMap<u64, u64>, size);
        bench_churn!(group, "std", HashMap<u64, u64>, size);
    }
    group.finish();
}

criterion_group!(benches, insert_erase_lookup);
criterion_main!(benches);
