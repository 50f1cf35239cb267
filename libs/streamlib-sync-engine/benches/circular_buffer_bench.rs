// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use streamlib_sync_engine::{
    ChannelArena, CircularBuffer, MediaFormat, MetadataCarrier, MetadataNode, PacketToken,
    PropagationSpan, StreamSegment, propagate,
};

const FMT: MediaFormat = MediaFormat::pcm_48k_stereo_16();

// Benchmark: one write and one read of a processing frame through a 20ms ring
fn bench_circular_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("circular_write_read");

    for frame_ms in [1i64, 5, 10, 20].iter() {
        let frame_bytes = FMT.us_to_bytes(frame_ms * 1_000);
        group.throughput(Throughput::Bytes((frame_bytes * FMT.channels()) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{frame_ms}ms")),
            &frame_bytes,
            |b, &frame_bytes| {
                let mut ring = CircularBuffer::new(FMT.channels(), FMT.us_to_bytes(20_000))
                    .expect("ring");
                let ch = vec![1u8; frame_bytes];
                let src = ChannelArena::from_channels(&[&ch, &ch]);
                let mut dst = ChannelArena::new(FMT.channels(), frame_bytes);

                b.iter(|| {
                    ring.write_from(black_box(&src), 0, frame_bytes).expect("write");
                    dst.clear();
                    ring.read_into(&mut dst, frame_bytes);
                    black_box(dst.len());
                });
            },
        );
    }

    group.finish();
}

// Benchmark: wrap-around writes that overwrite the oldest data
fn bench_circular_overwrite(c: &mut Criterion) {
    let frame_bytes = FMT.us_to_bytes(7_000);
    let mut ring = CircularBuffer::new(FMT.channels(), FMT.us_to_bytes(20_000)).expect("ring");
    let ch = vec![2u8; frame_bytes];
    let src = ChannelArena::from_channels(&[&ch, &ch]);

    c.bench_function("circular_overwrite_7ms", |b| {
        b.iter(|| black_box(ring.write_from(black_box(&src), 0, frame_bytes).expect("write")));
    });
}

// Benchmark: propagating ledgers of varying size across a 10ms step
fn bench_propagate(c: &mut Criterion) {
    let mut group = c.benchmark_group("metadata_propagate");
    let samples = FMT.us_to_samples(10_000);

    for num_nodes in [1usize, 8, 64].iter() {
        group.throughput(Throughput::Elements(*num_nodes as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_nodes),
            num_nodes,
            |b, &num_nodes| {
                b.iter_batched(
                    || {
                        let mut input = StreamSegment::new(FMT.channels(), 0);
                        for i in 0..num_nodes {
                            let offset = i * samples / num_nodes;
                            input.metadata.create(if i % 2 == 0 {
                                MetadataNode::custom(offset, "level", (i as i64).into())
                            } else {
                                MetadataNode::target_render_time(0, false, PacketToken::P1)
                            });
                        }
                        (input, StreamSegment::new(FMT.channels(), 0))
                    },
                    |(mut input, mut output)| {
                        let result = propagate(
                            Some(&mut input as &mut dyn MetadataCarrier),
                            &mut output,
                            None,
                            0,
                            PropagationSpan::passthrough(samples, 0),
                        );
                        black_box(result)
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_circular_write_read,
    bench_circular_overwrite,
    bench_propagate
);
criterion_main!(benches);
