//! Throughput benchmark for a linear stage chain.
//!
//! Measures end-to-end batches per second when the caller keeps the
//! chain saturated, for a few chain depths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stagepipe::{DependencyConfig, FnStage, PipelineExecutor, StageModule, Tensor};

const BATCHES: usize = 64;
const TENSOR_LEN: usize = 1024;

fn scale_stage(name: &str, factor: f32) -> Box<dyn StageModule> {
    Box::new(FnStage::new(name, 1, 1, move |inputs| {
        let out: Vec<f32> = inputs[0].data().iter().map(|v| v * factor).collect();
        Ok(vec![Tensor::from_vec(out)])
    }))
}

fn linear_chain(depth: usize) -> PipelineExecutor {
    let modules: Vec<Box<dyn StageModule>> = (0..depth)
        .map(|i| scale_stage(&format!("scale_{}", i), 1.0001))
        .collect();
    let mut config = DependencyConfig::new();
    for i in 0..depth - 1 {
        config = config.depend(i, 0, i + 1, 0);
    }
    match PipelineExecutor::new(modules, config) {
        Ok(p) => p,
        Err(e) => panic!("bench setup failed: {}", e),
    }
}

fn bench_throughput(c: &mut Criterion) {
    let input: Vec<f32> = (0..TENSOR_LEN).map(|i| i as f32).collect();

    let mut group = c.benchmark_group("pipeline_throughput");
    group.throughput(Throughput::Elements(BATCHES as u64));
    for depth in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("stages", depth), &depth, |b, &depth| {
            let pipeline = linear_chain(depth);
            b.iter(|| {
                for _ in 0..BATCHES {
                    pipeline
                        .set_input(0, Tensor::from_vec(input.clone()))
                        .unwrap();
                    pipeline.run().unwrap();
                }
                for _ in 0..BATCHES {
                    pipeline.get_output(true).unwrap().unwrap();
                }
            });
            pipeline.stop();
        });
    }
    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
