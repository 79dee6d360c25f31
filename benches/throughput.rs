//! Throughput benchmarks for operator chains and the hub.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rivulet::{ErrorPolicy, FlatMapConfig, FlowError, Flux, Publisher, TestSubscriber};

/// Benchmark a map/filter chain with varying batch sizes
fn bench_map_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_filter");
    let items = 10_000u64;

    for batch in [1u64, 32, 1024] {
        group.bench_with_input(BenchmarkId::new("batch", batch), &batch, |b, &batch| {
            b.iter(|| {
                let subscriber = TestSubscriber::<u64>::new(0);
                Flux::range(0, items)
                    .map(|n| n * 3)
                    .filter(|n| n % 2 == 0)
                    .subscribe(subscriber.clone());
                while !subscriber.is_completed() {
                    subscriber.request(batch).unwrap();
                }
                black_box(subscriber.item_count());
            });
        });
    }

    group.finish();
}

/// Benchmark skipping failures against propagating none
fn bench_error_policy(c: &mut Criterion) {
    let mut group = c.benchmark_group("error_policy");

    for every in [2u64, 10, 1000] {
        group.bench_with_input(BenchmarkId::new("fail_every", every), &every, |b, &every| {
            b.iter(|| {
                let subscriber = TestSubscriber::<u64>::unbounded();
                Flux::range(0, 10_000)
                    .try_map_with(
                        move |n| if n % every == 0 { Err("bad") } else { Ok(n) },
                        ErrorPolicy::skip_with(|_: &str, _: &FlowError| {}),
                    )
                    .subscribe(subscriber.clone());
                black_box(subscriber.item_count());
            });
        });
    }

    group.finish();
}

/// Benchmark flat_map fan-in with varying concurrency
fn bench_flat_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_map");

    for concurrency in [1usize, 4, 64] {
        group.bench_with_input(
            BenchmarkId::new("concurrency", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    let subscriber = TestSubscriber::<u64>::unbounded();
                    Flux::range(0, 100)
                        .flat_map_with(
                            |n| Ok::<_, FlowError>(Flux::range(n * 100, 100)),
                            FlatMapConfig::max_concurrency(concurrency),
                            ErrorPolicy::Propagate,
                        )
                        .subscribe(subscriber.clone());
                    black_box(subscriber.item_count());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark hub broadcast with varying subscriber counts
fn bench_hub_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_broadcast");

    for subscribers in [1usize, 8, 64] {
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &count| {
                b.iter(|| {
                    let hub = Flux::range(0, 1_000).publish();
                    let attached: Vec<_> = (0..count)
                        .map(|_| {
                            let subscriber = TestSubscriber::<u64>::unbounded();
                            hub.subscribe(subscriber.clone());
                            subscriber
                        })
                        .collect();
                    hub.connect();
                    black_box(attached.iter().map(|s| s.item_count()).sum::<usize>());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_map_filter,
    bench_error_policy,
    bench_flat_map,
    bench_hub_broadcast,
);

criterion_main!(benches);
