//! Performance benchmarks for the DSP module
//!
//! Run with: cargo bench -p syncwave_dsp

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use syncwave_dsp::{DelayLine, GainStage};

fn benchmark_gain_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("gain_stage");

    for buffer_size in [64, 256, 1024, 4096].iter() {
        let gain = GainStage::new(65).unwrap();
        let mut buffer: Vec<i16> = (0..*buffer_size * 2)
            .map(|i| ((i as i32 * 37) % 30_000) as i16)
            .collect();

        group.throughput(Throughput::Elements(*buffer_size as u64 * 2));
        group.bench_function(format!("apply_{}_frames", buffer_size), |b| {
            b.iter(|| {
                gain.apply(black_box(&mut buffer));
            })
        });
    }

    group.finish();
}

fn benchmark_delay_line_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay_line");

    for delay_ms in [0u32, 50, 200].iter() {
        let mut line = DelayLine::new(*delay_ms, 44_100, 2, 4096).unwrap();
        let block = vec![42i16; 4096 * 2];

        group.bench_function(format!("push_pop_{}ms_delay", delay_ms), |b| {
            b.iter(|| {
                black_box(line.push_pop_block(black_box(&block)));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_gain_apply, benchmark_delay_line_push_pop);
criterion_main!(benches);
