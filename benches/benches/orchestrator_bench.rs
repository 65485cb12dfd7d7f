//! # Orchestrator Benchmarks
//!
//! Measures the harness overhead around the simulator: a full scripted
//! pipeline run (build, run, compare, publish) and pipeline bookkeeping.
//!
//! Run: `cargo bench --bench orchestrator_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parity_core::process::mock::{self, ScriptedRunner};
use parity_core::HarnessConfig;
use parity_orchestration::{Orchestrator, Pipeline};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

/// Snapshot of `bodies` bodies, one comma separated record each
fn snapshot(bodies: usize, skew: f64) -> String {
    let mut text = String::new();
    for i in 0..bodies {
        let x = i as f64 * 0.01;
        let _ = writeln!(text, "{:.12}, {:.12}, {:.12}", x + skew, x * 2.0, -x);
    }
    text
}

fn scripted_runner(dir: &Path, bodies: usize) -> ScriptedRunner {
    let binary = dir.join("bin/milkyway_nbody");
    let gpu = snapshot(bodies, 0.0);
    let cpu = snapshot(bodies, 1e-9);
    ScriptedRunner::new()
        .on("cmake", move |_| {
            mock::touch(&binary);
            mock::exit(0)
        })
        .on("milkyway_nbody", move |inv| {
            let is_cpu = inv.value_of("-o").is_some_and(|out| out.ends_with("CPUBRUTE.out"));
            mock::write_output(inv, if is_cpu { &cpu } else { &gpu })
        })
}

/// Benchmark a complete scripted parity run
fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("parity_run");

    for bodies in [100, 1_000, 10_000] {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = HarnessConfig::default();
        config.build.build_dir = dir.path().to_path_buf();
        config.parameters.gpu_output = dir.path().join("GPUBRUTE.out");
        config.parameters.cpu_output = dir.path().join("CPUBRUTE.out");
        config.plot.enabled = false;
        let runner = scripted_runner(dir.path(), bodies);

        group.bench_with_input(BenchmarkId::from_parameter(bodies), &config, |b, config| {
            b.iter(|| {
                let mut orch = Orchestrator::new(config.clone(), &runner).expect("valid config");
                black_box(orch.run().expect("scripted run"))
            })
        });
    }

    group.finish();
}

/// Benchmark pipeline stage transitions
fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    group.bench_function("create_default", |b| b.iter(|| black_box(Pipeline::new())));

    group.bench_function("walk_all_stages", |b| {
        let mut pipeline = Pipeline::new();
        b.iter(|| {
            pipeline.start();
            while let Some(stage) = pipeline.current_stage() {
                pipeline.complete(stage, Duration::ZERO);
            }
            black_box(pipeline.is_finished())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_full_run, bench_pipeline);
criterion_main!(benches);
