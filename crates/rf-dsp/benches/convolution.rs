//! Convolution Benchmarks
//!
//! Block processing cost against a 2 second IR, and the cost of a full
//! preparation run at each host block size.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rf_dsp::{ConvolutionEngine, IrPreparer, IrSource, PrepareTarget};

const SAMPLE_RATE: u32 = 48000;
const BLOCK_SIZES: &[usize] = &[64, 256, 1024];

/// Exponentially decaying noise-like IR
fn generate_ir(frames: usize, channels: usize) -> Vec<f32> {
    (0..frames * channels)
        .map(|i| {
            let n = (i / channels) as f32;
            let hash = ((i as u32).wrapping_mul(2654435761) >> 8) as f32 / (1u32 << 24) as f32;
            (hash * 2.0 - 1.0) * (-n / (SAMPLE_RATE as f32 * 0.4)).exp()
        })
        .collect()
}

fn bench_process_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("Partitioned Convolution");
    let ir = generate_ir(SAMPLE_RATE as usize * 2, 2);
    let source = IrSource::new(&ir, SAMPLE_RATE as usize * 2, 2, SAMPLE_RATE);

    for &block_size in BLOCK_SIZES {
        group.bench_with_input(
            BenchmarkId::new("stereo block", block_size),
            &block_size,
            |b, &size| {
                let prepared = IrPreparer::default()
                    .prepare(&source, PrepareTarget::new(2, size, SAMPLE_RATE))
                    .unwrap();
                let mut engine = ConvolutionEngine::new(prepared).unwrap();
                let input: Vec<f32> = (0..size * 2).map(|i| (i as f32 * 0.01).sin()).collect();
                let mut output = vec![0.0; size * 2];

                b.iter(|| {
                    engine.process_block(black_box(&input), 2, &mut output, 2);
                    black_box(output[0])
                });
            },
        );
    }

    group.finish();
}

fn bench_prepare(c: &mut Criterion) {
    let mut group = c.benchmark_group("IR Preparation");
    group.sample_size(10);
    let ir = generate_ir(44100 * 2, 2);
    let source = IrSource::new(&ir, 44100 * 2, 2, 44100);

    for &block_size in BLOCK_SIZES {
        group.bench_with_input(
            BenchmarkId::new("resample + partition", block_size),
            &block_size,
            |b, &size| {
                let preparer = IrPreparer::default();
                b.iter(|| {
                    preparer
                        .prepare(black_box(&source), PrepareTarget::new(2, size, SAMPLE_RATE))
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_process_block, bench_prepare);
criterion_main!(benches);
