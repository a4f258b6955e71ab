//! Benchmarks for dispatchlb components.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use dispatchlb::backend::algorithms::{LoadBalancer, PowerOfTwo, RoundRobin, Weight, Weighted};
use dispatchlb::backend::{Backend, Registry};
use dispatchlb::metrics::MetricsCollector;
use dispatchlb::util::{ConnectionId, RequestId};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn create_registry(num_backends: u16) -> (Registry, Vec<Arc<Backend>>) {
    let registry = Registry::new();
    let backends: Vec<Arc<Backend>> = (0..num_backends)
        .map(|i| {
            let backend = Arc::new(Backend::new(&format!("127.0.0.1:{}", 9000 + i)).unwrap());
            registry.register(Arc::clone(&backend)).unwrap();
            backend
        })
        .collect();
    (registry, backends)
}

fn benchmark_round_robin(c: &mut Criterion) {
    let (registry, _) = create_registry(10);
    let rr = RoundRobin::new();
    let pool = registry.snapshot();

    c.bench_function("round_robin_select", |b| {
        b.iter(|| {
            black_box(rr.select(&pool).unwrap());
        })
    });
}

fn benchmark_weighted(c: &mut Criterion) {
    let mut group = c.benchmark_group("weighted_select");

    for count in [10u16, 100] {
        let (registry, backends) = create_registry(count);
        let wrr = Weighted::new();
        for (i, backend) in backends.iter().enumerate() {
            wrr.on_register(backend, Weight::new((i % 5 + 1) as f64).unwrap());
        }
        // A few unhealthy backends force skips
        registry.mark_unhealthy(backends[0].id());
        registry.mark_unhealthy(backends[1].id());
        let pool = registry.snapshot();

        group.bench_with_input(BenchmarkId::from_parameter(count), &pool, |b, pool| {
            b.iter(|| {
                black_box(wrr.select(pool).unwrap());
            })
        });
    }

    group.finish();
}

fn benchmark_power_of_two(c: &mut Criterion) {
    let (registry, backends) = create_registry(10);
    let p2c = PowerOfTwo::new();

    // Uneven load so the comparison matters
    let _guards: Vec<_> = backends
        .iter()
        .enumerate()
        .flat_map(|(i, backend)| (0..i).map(|_| backend.acquire()).collect::<Vec<_>>())
        .collect();
    let pool = registry.snapshot();

    c.bench_function("power_of_two_select", |b| {
        b.iter(|| {
            black_box(p2c.select(&pool).unwrap());
        })
    });
}

fn benchmark_registry(c: &mut Criterion) {
    let (registry, _) = create_registry(100);
    let id = "http://127.0.0.1:9050";

    let mut group = c.benchmark_group("registry");

    group.bench_function("snapshot", |b| {
        b.iter(|| {
            black_box(registry.snapshot());
        })
    });

    group.bench_function("is_healthy", |b| {
        b.iter(|| {
            black_box(registry.snapshot().is_healthy(id));
        })
    });

    group.bench_function("health_toggle", |b| {
        b.iter(|| {
            registry.mark_unhealthy(id);
            registry.mark_healthy(id);
        })
    });

    group.bench_function("mark_healthy_unchanged", |b| {
        b.iter(|| {
            black_box(registry.mark_healthy(id));
        })
    });

    group.finish();
}

fn benchmark_metrics(c: &mut Criterion) {
    let collector = MetricsCollector::new();

    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_request", |b| {
        b.iter(|| {
            collector.record_request(
                black_box("http://127.0.0.1:9000"),
                black_box(200),
                black_box(Duration::from_millis(10)),
            );
        })
    });

    group.bench_function("connection_opened", |b| {
        b.iter(|| {
            collector.connection_opened();
        })
    });

    group.bench_function("connection_closed", |b| {
        b.iter(|| {
            collector.connection_closed();
        })
    });

    group.finish();
}

fn benchmark_request_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_id");

    group.bench_function("uuid", |b| {
        b.iter(|| {
            black_box(RequestId::new());
        })
    });

    group.bench_function("connection", |b| {
        b.iter(|| {
            black_box(ConnectionId::next());
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_round_robin,
    benchmark_weighted,
    benchmark_power_of_two,
    benchmark_registry,
    benchmark_metrics,
    benchmark_request_id,
);

criterion_main!(benches);
