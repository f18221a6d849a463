#[macro_use]
extern crate criterion;

use criterion::{BenchmarkId, Criterion};
use dig::{Container, InvokeOptions, ProvideOptions};
use std::sync::Arc;

criterion::criterion_group!(resolution, resolve_cached_chain, resolve_chain_depth, provide_many);
criterion::criterion_main!(resolution);

fn chained_container(depth: usize) -> Container {
    let container = Container::new();
    container.provide::<(), _, Arc<u64>>(|| Arc::new(0), ProvideOptions::new()).unwrap();
    for _ in 1..depth {
        container
            .provide::<(Arc<u64>,), _, Arc<u64>>(|prev| Arc::new(*prev + 1), ProvideOptions::new())
            .unwrap();
    }
    container
}

fn resolve_cached_chain(c: &mut Criterion) {
    let container = chained_container(8);
    let _ = container.invoke::<(Arc<u64>,), _, Arc<u64>>(|v| v, InvokeOptions::new());
    c.bench_function("resolve 8-deep chain, warm cache", |b| {
        b.iter(|| container.invoke::<(Arc<u64>,), _, Arc<u64>>(|v| v, InvokeOptions::new()))
    });
}

fn resolve_chain_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_chain_depth");
    for depth in &[1usize, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
            b.iter(|| {
                let container = chained_container(depth);
                container.invoke::<(Arc<u64>,), _, Arc<u64>>(|v| v, InvokeOptions::new())
            });
        });
    }
    group.finish();
}

const NAMES: [&str; 32] = [
    "n00", "n01", "n02", "n03", "n04", "n05", "n06", "n07", "n08", "n09", "n10", "n11", "n12",
    "n13", "n14", "n15", "n16", "n17", "n18", "n19", "n20", "n21", "n22", "n23", "n24", "n25",
    "n26", "n27", "n28", "n29", "n30", "n31",
];

fn provide_many(c: &mut Criterion) {
    c.bench_function("provide 32 named producers of the same type", |b| {
        b.iter(|| {
            let container = Container::new();
            for name in NAMES {
                container
                    .provide::<(), _, Arc<u32>>(|| Arc::new(1), ProvideOptions::new().name(name))
                    .unwrap();
            }
            container
        })
    });
}
