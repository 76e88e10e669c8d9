//! Replay Buffer and Optimizer Benchmarks
//!
//! Sum-tree sampling and reprioritization cost across buffer sizes, plus a
//! single AdamW step over a small network.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ruvector_rl::{
    AdamWConfig, AdamWOptimizer, BufferConfig, Experience, LayerSpec, LayerType, ParamSet,
    PrioritizedReplayBuffer, WeightInitializer, FEATURE_DIM,
};

fn filled_buffer(capacity: usize) -> PrioritizedReplayBuffer {
    let mut buffer = PrioritizedReplayBuffer::new(BufferConfig {
        capacity,
        seed: Some(42),
        ..BufferConfig::default()
    })
    .expect("valid config");
    for i in 0..capacity {
        let x = i as f64 * 1e-3;
        buffer
            .add(Experience::new(
                vec![x; FEATURE_DIM],
                i % 3,
                0.0,
                vec![x; FEATURE_DIM],
                false,
            ))
            .expect("consistent features");
    }
    buffer
}

// ============================================================================
// Replay Buffer Benchmarks
// ============================================================================

fn bench_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_sample");

    for capacity in [1_000usize, 10_000, 100_000] {
        let mut buffer = filled_buffer(capacity);
        group.throughput(Throughput::Elements(64));
        group.bench_with_input(BenchmarkId::new("batch_64", capacity), &capacity, |bench, _| {
            bench.iter(|| black_box(buffer.sample(64).expect("enough samples")));
        });
    }

    group.finish();
}

fn bench_update_priorities(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_update_priorities");

    for capacity in [1_000usize, 10_000, 100_000] {
        let mut buffer = filled_buffer(capacity);
        let slots: Vec<usize> = (0..64).map(|i| (i * 7919) % capacity).collect();
        let tds: Vec<f64> = (0..64).map(|i| (i as f64 * 0.37).sin()).collect();
        group.throughput(Throughput::Elements(64));
        group.bench_with_input(BenchmarkId::new("batch_64", capacity), &capacity, |bench, _| {
            bench.iter(|| {
                buffer
                    .update_priorities(black_box(&slots), black_box(&tds))
                    .expect("valid slots")
            });
        });
    }

    group.finish();
}

// ============================================================================
// Optimizer Benchmarks
// ============================================================================

fn bench_adamw_step(c: &mut Criterion) {
    let mut init = WeightInitializer::with_seed(1);
    let mut params = init
        .initialize_network(&[
            LayerSpec::new(LayerType::Dense, FEATURE_DIM, 64),
            LayerSpec::new(LayerType::Recurrent, 64, 64),
            LayerSpec::new(LayerType::Dense, 64, 3),
        ])
        .expect("valid layers");
    let grads = ParamSet::zeros_like(&params);
    let optimizer = AdamWOptimizer::new(AdamWConfig::default()).expect("default config");
    let mut state = optimizer.initialize_state(&params);

    c.bench_function("adamw_step", |bench| {
        bench.iter(|| {
            optimizer
                .step(&mut params, black_box(&grads), &mut state)
                .expect("matching shapes")
        });
    });
}

criterion_group!(benches, bench_sample, bench_update_priorities, bench_adamw_step);
criterion_main!(benches);
