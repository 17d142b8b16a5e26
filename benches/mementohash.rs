use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use mementohash::{ConsistentEngine, Upstream};

fn bench(c: &mut Criterion) {
    const WORKING_SET_SIZES: &[usize] = &[3, 100, 1_000];

    let mut group = c.benchmark_group("ConsistentEngine");

    for &size in WORKING_SET_SIZES {
        {
            let engine = new(size);
            group.bench_with_input(
                BenchmarkId::new("get_node", format!("nodes={size}")),
                &engine,
                |b, e| b.iter(|| black_box(e.get_node(&"k"))),
            );
        }

        {
            group.bench_function(BenchmarkId::new("add_node", format!("nodes={size}")), move |b| {
                b.iter_batched(
                    || new(size),
                    |e| e.add_node(up(size + 1)).unwrap(),
                    BatchSize::SmallInput,
                )
            });
        }

        {
            group.bench_function(
                BenchmarkId::new("remove_node", format!("nodes={size}")),
                move |b| {
                    b.iter_batched(
                        || new(size),
                        |e| e.remove_node(&up(0)).unwrap(),
                        BatchSize::SmallInput,
                    )
                },
            );
        }
    }
}

fn up(i: usize) -> Upstream {
    Upstream::new(format!("host-{i}")).unwrap()
}

fn new(size: usize) -> ConsistentEngine {
    let engine = ConsistentEngine::new();
    for i in 0..size {
        engine.add_node(up(i)).unwrap();
    }
    engine
}

criterion_group!(benches, bench);
criterion_main!(benches);
