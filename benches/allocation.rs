use blockfile::{BlockFile, MemMapper};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Benchmark a burst of fresh allocations (every call extends the file).
fn bench_allocate_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_burst");

    for count in [100usize, 1_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let mut bf =
                    BlockFile::create_in_mapper_with_block_size(MemMapper::new(), 4096).unwrap();
                for _ in 0..count {
                    black_box(bf.allocate().unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark the hot path: freeing and reallocating through the root stack.
fn bench_lifo_reuse_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifo_reuse_cycle");

    group.bench_function("free_alloc_pairs", |b| {
        let mut bf = BlockFile::create_in_mapper_with_block_size(MemMapper::new(), 4096).unwrap();
        let block = bf.allocate().unwrap();
        b.iter(|| {
            bf.free(black_box(block)).unwrap();
            black_box(bf.allocate().unwrap());
        });
    });

    group.finish();
}

/// Benchmark filling and draining a deep overflow chain. Small blocks keep
/// the per-node capacity at 3, so most frees recruit chain nodes and most
/// allocations walk them.
fn bench_overflow_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("overflow_chain");

    group.bench_function("free_all_then_drain", |b| {
        b.iter(|| {
            let mut bf =
                BlockFile::create_in_mapper_with_block_size(MemMapper::new(), 32).unwrap();
            let blocks = bf.allocate_blocks(200).unwrap();
            bf.free_blocks(&blocks).unwrap();
            for _ in 0..blocks.len() {
                black_box(bf.allocate().unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_allocate_burst,
    bench_lifo_reuse_cycle,
    bench_overflow_chain
);
criterion_main!(benches);
