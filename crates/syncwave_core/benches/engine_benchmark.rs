//! Fan-out pipeline benchmarks
//!
//! Measures the per-block gain + delay path the worker thread runs once per
//! sink, per block, during a live session.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use syncwave_dsp::{DelayLine, GainStage};

fn benchmark_gain_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("gain_apply");

    for block_frames in [256, 1024, 4096].iter() {
        let channels = 2usize;
        let gain = GainStage::new(75).unwrap();
        let mut samples: Vec<i16> = (0..*block_frames * channels)
            .map(|i| ((i as i64 * 37) % 30_000) as i16)
            .collect();

        group.throughput(Throughput::Elements((*block_frames * channels) as u64));
        group.bench_function(format!("apply_{}_frames", block_frames), |b| {
            b.iter(|| {
                gain.apply(black_box(&mut samples));
            })
        });
    }

    group.finish();
}

fn benchmark_delay_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay_push_pop");

    for delay_ms in [0u32, 50, 500].iter() {
        let channels = 2u16;
        let sample_rate = 44_100u32;
        let mut line = DelayLine::new(*delay_ms, sample_rate, channels, 4_096).unwrap();
        let block = vec![1_234i16; 4_096 * channels as usize];

        group.throughput(Throughput::Elements(block.len() as u64));
        group.bench_function(format!("delay_{}ms", delay_ms), |b| {
            b.iter(|| {
                black_box(line.push_pop_block(black_box(&block)));
            })
        });
    }

    group.finish();
}

fn benchmark_full_sink_path(c: &mut Criterion) {
    // Gain then delay, back to back, as the worker performs per sink per block.
    let gain = GainStage::new(60).unwrap();
    let mut line = DelayLine::new(100, 44_100, 2, 4_096).unwrap();
    let block = vec![500i16; 4_096 * 2];

    c.bench_function("full_sink_path_4096_frames", |b| {
        b.iter(|| {
            let mut scratch = block.clone();
            gain.apply(black_box(&mut scratch));
            black_box(line.push_pop_block(black_box(&scratch)));
        })
    });
}

criterion_group!(
    benches,
    benchmark_gain_apply,
    benchmark_delay_push_pop,
    benchmark_full_sink_path
);
criterion_main!(benches);
