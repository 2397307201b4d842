use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use warren_cache::{Cache, CacheConfig};

fn bench_hit_path(c: &mut Criterion) {
    let cache = Cache::new(CacheConfig::default()).unwrap();
    cache
        .set("hot", b"value", &["org:1:user:42"], None)
        .unwrap();

    c.bench_function("get_hit", |b| {
        b.iter(|| black_box(cache.get("hot").unwrap()))
    });
}

fn bench_hit_with_sibling_noise(c: &mut Criterion) {
    // After a sibling invalidation the first read repairs the witness in
    // place; subsequent reads take the single-comparison path again.
    let cache = Cache::new(CacheConfig::default()).unwrap();
    cache.set("hot", b"value", &["org:1:user:42"], None).unwrap();
    cache.invalidate("org:1:user:43").unwrap();

    c.bench_function("get_hit_after_sibling_noise", |b| {
        b.iter(|| black_box(cache.get("hot").unwrap()))
    });
}

fn bench_deep_hierarchy(c: &mut Criterion) {
    let mut group = c.benchmark_group("deep_hierarchy_get");
    for depth in [2usize, 8, 15] {
        let cache = Cache::new(CacheConfig::default()).unwrap();
        let tag = (0..depth)
            .map(|i| format!("l{i}"))
            .collect::<Vec<_>>()
            .join(":");
        cache.set("k", b"v", &[tag.as_str()], None).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| black_box(cache.get("k").unwrap()))
        });
    }
    group.finish();
}

fn bench_set(c: &mut Criterion) {
    let cache = Cache::new(CacheConfig::default()).unwrap();
    c.bench_function("set_with_two_tags", |b| {
        b.iter(|| {
            cache
                .set("k", black_box(b"value"), &["org:1", "user:42"], None)
                .unwrap()
        })
    });
}

fn bench_invalidate(c: &mut Criterion) {
    let cache = Cache::new(CacheConfig::default()).unwrap();
    c.bench_function("invalidate", |b| {
        b.iter(|| cache.invalidate(black_box("org:1:user:42")).unwrap())
    });
}

criterion_group!(
    benches,
    bench_hit_path,
    bench_hit_with_sibling_noise,
    bench_deep_hierarchy,
    bench_set,
    bench_invalidate
);
criterion_main!(benches);
