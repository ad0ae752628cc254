//! Reference counting benchmarks using criterion.
//!
//! Run with: cargo bench --bench refcount_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rc_ptr::{dynamic_pointer_cast, make_unique, LocalShared, Shared, Unique};
use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");

    group.bench_function("shared_new_inline", |b| {
        b.iter(|| black_box(Shared::new(black_box(42u64))));
    });

    group.bench_function("shared_from_box", |b| {
        b.iter(|| black_box(Shared::from_box(Box::new(black_box(42u64)))));
    });

    group.bench_function("arc_new", |b| {
        b.iter(|| black_box(Arc::new(black_box(42u64))));
    });

    group.bench_function("unique_new", |b| {
        b.iter(|| black_box(make_unique(black_box(42u64))));
    });

    group.finish();
}

fn bench_clone_drop(c: &mut Criterion) {
    let mut group = c.benchmark_group("clone_drop");

    let shared = Shared::new(42u64);
    group.bench_function("shared_thread_safe", |b| {
        b.iter(|| black_box(shared.clone()));
    });

    let local = LocalShared::new(42u64);
    group.bench_function("shared_local", |b| {
        b.iter(|| black_box(local.clone()));
    });

    let arc = Arc::new(42u64);
    group.bench_function("arc", |b| {
        b.iter(|| black_box(arc.clone()));
    });

    let rc = Rc::new(42u64);
    group.bench_function("rc", |b| {
        b.iter(|| black_box(rc.clone()));
    });

    group.finish();
}

fn bench_weak_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("weak_lock");

    let live = Shared::new(42u64);
    let weak = live.downgrade();
    group.bench_function("lock_live", |b| {
        b.iter(|| black_box(weak.lock()));
    });

    let expired = Shared::new(0u64).downgrade();
    group.bench_function("lock_expired", |b| {
        b.iter(|| black_box(expired.lock()));
    });

    group.finish();
}

fn bench_many_handles(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_handles");

    for count in [10, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("clone_all", count), &count, |b, &count| {
            let shared = Shared::new(vec![0u8; 64]);
            b.iter(|| {
                let handles: Vec<_> = (0..count).map(|_| shared.clone()).collect();
                black_box(handles)
            });
        });
    }

    group.finish();
}

fn bench_casts(c: &mut Criterion) {
    let mut group = c.benchmark_group("casts");

    let any: Shared<dyn Any + Send + Sync> = Shared::from_box(Box::new(7u32));
    group.bench_function("dynamic_hit", |b| {
        b.iter(|| black_box(dynamic_pointer_cast::<u32, _, _>(&any)));
    });
    group.bench_function("dynamic_miss", |b| {
        b.iter(|| black_box(dynamic_pointer_cast::<u64, _, _>(&any)));
    });

    let pair = Shared::new((1u32, 2u32));
    group.bench_function("map_field", |b| {
        b.iter(|| black_box(pair.map(|p| &p.1)));
    });

    group.bench_function("unique_into_shared", |b| {
        b.iter(|| {
            let unique: Unique<u64> = make_unique(black_box(5));
            let shared: Shared<u64> = Shared::from(unique);
            black_box(shared)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_construction,
    bench_clone_drop,
    bench_weak_lock,
    bench_many_handles,
    bench_casts,
);
criterion_main!(benches);
