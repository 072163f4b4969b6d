use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use quanta::Instant;
use std::time::Duration;

use mosaic_transport::codec::{encode_message, plan_params, SendOptions};
use mosaic_transport::receiver::Reassembler;
use mosaic_transport::sender::frame_batch;

/// Benchmark the send hot path: plan + erasure-encode + frame.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &size in &[1400usize, 6000, 60_000] {
        let data = vec![0xABu8; size];
        let opts = SendOptions::default();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_frame_{size}B"), |b| {
            b.iter(|| {
                let (k, n) = plan_params(data.len(), &opts);
                let batch = encode_message(black_box(&data), k, n).unwrap();
                frame_batch(0xBEEF, 1, &batch)
            });
        });
    }

    group.finish();
}

/// Benchmark the receive hot path: ingest a full batch until delivery.
fn bench_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassemble");

    for &size in &[1400usize, 6000] {
        let data = vec![0xABu8; size];
        let (k, n) = plan_params(data.len(), &SendOptions::default());
        let batch = encode_message(&data, k, n).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("ingest_batch_{size}B"), |b| {
            let mut batch_id = 0u32;
            let mut rx = Reassembler::new(Duration::from_secs(10), 10_000);
            b.iter(|| {
                // Fresh batch id per iteration so the processed window
                // never short-circuits the ingest path.
                batch_id = batch_id.wrapping_add(1);
                let datagrams = frame_batch(0xBEEF, batch_id, &batch);
                let now = Instant::now();
                for dgram in &datagrams[..k as usize] {
                    black_box(rx.ingest(dgram, now));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_reassemble);
criterion_main!(benches);
