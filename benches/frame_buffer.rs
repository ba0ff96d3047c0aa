//! Benchmarks for frame batching
//!
//! Measures the per-frame cost of the capture loop's bookkeeping:
//! - FrameBuffer push and sealing at typical batch sizes
//! - Partial flush of an under-capacity buffer
//! - JPEG splitting of an MJPEG byte stream
//!
//! Platform: Cross-platform (synthetic payloads, CI-safe)

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use framecast::sources::JpegStreamReader;
use framecast::{BufferState, Frame, FrameBuffer};
use std::hint::black_box;

/// A 320x240 JPEG is typically 8-15 KiB
const FRAME_BYTES: usize = 12 * 1024;

fn synthetic_jpeg(seed: u8) -> Vec<u8> {
    let mut data = vec![seed; FRAME_BYTES];
    data[..2].copy_from_slice(&[0xFF, 0xD8]);
    let end = data.len();
    data[end - 2..].copy_from_slice(&[0xFF, 0xD9]);
    data
}

fn bench_buffer_push(c: &mut Criterion) {
    let payload = Bytes::from(synthetic_jpeg(0x42));

    let mut group = c.benchmark_group("frame_buffer_push");
    for batch_size in [1usize, 3, 10, 30] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &n| {
            let mut buffer = FrameBuffer::new(n);
            let mut sequence = 0u64;
            b.iter(|| {
                for _ in 0..n {
                    let frame = Frame::new(payload.clone(), sequence * 33, sequence);
                    sequence += 1;
                    if let BufferState::BatchReady(batch) = buffer.push(black_box(frame)) {
                        black_box(batch);
                    }
                }
            })
        });
    }
    group.finish();
}

fn bench_partial_flush(c: &mut Criterion) {
    let payload = Bytes::from(synthetic_jpeg(0x17));

    c.bench_function("frame_buffer_flush_partial", |b| {
        b.iter(|| {
            let mut buffer = FrameBuffer::new(10);
            for sequence in 0..7 {
                buffer.push(Frame::new(payload.clone(), sequence * 33, sequence));
            }
            black_box(buffer.flush_partial())
        })
    });
}

fn bench_jpeg_splitting(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let stream: Vec<u8> = (0..30).flat_map(synthetic_jpeg).collect();

    let mut group = c.benchmark_group("mjpeg_split");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("thirty_frames", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut reader = JpegStreamReader::new(stream.as_slice());
                let mut frames = 0;
                while let Some(frame) = reader.next_frame().await.expect("split") {
                    black_box(frame);
                    frames += 1;
                }
                assert_eq!(frames, 30);
            })
        })
    });
    group.finish();
}

criterion_group!(benches, bench_buffer_push, bench_partial_flush, bench_jpeg_splitting);
criterion_main!(benches);
