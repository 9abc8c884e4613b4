//! Benchmarks the image cache directory (C1): repeated `lookup_or_create`
//! against both a warm (already-present) key and a stream of cold keys.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use strata::config::TrimapPolicy;
use strata::geom::RectI;
use strata::node::NodeGraph;
use strata::test_support::GeneratorNode;
use strata::{ImageCache, ImageKey};

fn fake_holder() -> strata::NodeId {
    let mut graph = NodeGraph::new();
    graph.add_node("n", Box::new(GeneratorNode::new(strata::geom::RectD::new(0.0, 0.0, 10.0, 10.0))))
}

fn warm_lookup(c: &mut Criterion) {
    let cache = ImageCache::new(1 << 30, TrimapPolicy::Full);
    let holder = fake_holder();
    let key = ImageKey::new(holder, 1, 1.0, 0, 0, 4);
    let bounds = RectI::new(0, 0, 256, 256);
    cache.lookup_or_create(key, bounds, 4);

    c.bench_function("image_cache_warm_lookup_or_create", |b| {
        b.iter(|| {
            let (image, created) = cache.lookup_or_create(black_box(key), bounds, 4);
            assert!(!created);
            black_box(image.bounds)
        });
    });
}

fn cold_inserts(c: &mut Criterion) {
    let cache = ImageCache::new(1 << 30, TrimapPolicy::Full);
    let holder = fake_holder();
    let bounds = RectI::new(0, 0, 64, 64);
    let mut next_time = 0u64;

    c.bench_function("image_cache_cold_insert", |b| {
        b.iter(|| {
            next_time += 1;
            let key = ImageKey::new(holder, 1, next_time as f64, 0, 0, 4);
            let (image, created) = cache.lookup_or_create(black_box(key), bounds, 4);
            assert!(created);
            black_box(image.bounds)
        });
    });
}

criterion_group!(benches, warm_lookup, cold_inserts);
criterion_main!(benches);
