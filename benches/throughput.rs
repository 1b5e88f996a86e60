//! Transaction throughput benchmarks.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use kidem::{TCell, read_tx, tm_delete, tm_new, update_tx};

fn bench_plain_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("plain_access");
    let cell = TCell::new(0u64);

    group.bench_function("load", |b| {
        b.iter(|| black_box(cell.load()));
    });
    group.bench_function("store", |b| {
        b.iter(|| cell.store(black_box(1)));
    });

    group.finish();
}

fn bench_update_tx(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_tx");
    group.throughput(Throughput::Elements(1));
    let cell = TCell::new(0u64);

    group.bench_function("increment", |b| {
        b.iter(|| {
            update_tx(|| {
                let v = cell.load();
                cell.store(v + 1);
            });
        });
    });

    group.finish();
}

fn bench_read_tx(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_tx");
    group.throughput(Throughput::Elements(1));
    let cell = TCell::new(42u64);

    group.bench_function("single_load", |b| {
        b.iter(|| black_box(read_tx(|| cell.load())));
    });

    group.finish();
}

fn bench_alloc_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_cycle");
    group.throughput(Throughput::Elements(1));

    group.bench_function("tm_new_tm_delete", |b| {
        b.iter(|| {
            update_tx(|| {
                let p = tm_new(black_box(7u64));
                unsafe { tm_delete(p) };
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_plain_access,
    bench_update_tx,
    bench_read_tx,
    bench_alloc_cycle
);
criterion_main!(benches);
