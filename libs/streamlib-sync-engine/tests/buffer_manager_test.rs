// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

/// Integration tests for external port buffering.
///
/// Covers the threshold scenario, exact discontinuity detection and the
/// offset and length invariants under randomized buffer/release sequences,
/// plus how an output port hands its ledger downstream.
use streamlib_sync_engine::{
    BufferOutcome, Delivery, Downstream, DropCause, EngineError, ExternalInputPort,
    ExternalOutputPort, HeldSegment, MediaFormat, MetadataCarrier, MetadataNode, MetadataPayload,
    OutputPool, PooledBuffer, PropagatedState, StreamSegment,
};

const FMT: MediaFormat = MediaFormat::pcm_48k_stereo_16();

fn open_port(threshold_us: i64) -> ExternalInputPort {
    let mut port = ExternalInputPort::new();
    port.open(0).expect("open");
    port.start().expect("start");
    port.configure(FMT, threshold_us).expect("configure");
    port
}

fn stereo(bytes: usize, ts: Option<i64>) -> StreamSegment {
    let ch = vec![3u8; bytes];
    StreamSegment::from_channels(&[&ch, &ch], ts)
}

/// Global sample position a test node was created for.
fn position(node: &MetadataNode) -> usize {
    match &node.payload {
        MetadataPayload::Custom { value, .. } => {
            value.as_int().expect("position node carries an int") as usize
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn test_two_segments_fill_threshold_third_is_discontinuous() {
    // 120 samples of 16-bit audio: 240 bytes per channel.
    let mut port = open_port(2_500);
    assert_eq!(port.capacity(), 240);

    let mut first = HeldSegment::new(stereo(100, Some(0)));
    assert_eq!(
        port.buffer_segment(&mut first, port.free_space(None)).unwrap(),
        BufferOutcome::Copied(100)
    );
    assert!(port.bytes_still_needed(None) > 0);

    let second_ts = FMT.bytes_to_us(100);
    let mut second = HeldSegment::new(stereo(140, Some(second_ts)));
    assert!(!port.detect_discontinuity(&second.segment));
    assert_eq!(
        port.buffer_segment(&mut second, port.free_space(None)).unwrap(),
        BufferOutcome::Copied(140)
    );
    assert_eq!(port.len(), 240);
    assert_eq!(port.bytes_still_needed(None), 0);

    let expected = second_ts + FMT.bytes_to_us(140);
    let mut third = HeldSegment::new(stereo(100, Some(expected + FMT.samples_to_us(50))));
    assert!(port.detect_discontinuity(&third.segment));
    assert_eq!(
        port.buffer_segment(&mut third, 240).unwrap(),
        BufferOutcome::Discontinuity
    );
    assert_eq!(third.consumed, 0);
    assert_eq!(port.len(), 240);
    assert!(port.has_pending_discontinuity());

    // Deliver what is held, then the late segment starts a fresh timeline.
    let block = port.take_block(240).unwrap();
    assert_eq!(block.len(), 240);
    assert_eq!(block.timestamp(), Some(0));
    port.compact();
    assert!(!port.has_pending_discontinuity());
    assert_eq!(
        port.buffer_segment(&mut third, 240).unwrap(),
        BufferOutcome::Copied(100)
    );
}

#[test]
fn test_discontinuity_is_exact() {
    let mut rng = fastrand::Rng::with_seed(0x5eed_0001);
    let mut port = open_port(5_000);
    // Whole milliseconds keep every extrapolation exact.
    let ms_bytes = FMT.us_to_bytes(1_000);
    let mut stream_us = 0i64;

    for _ in 0..500 {
        let bytes = ms_bytes * rng.usize(1..=3);
        let mut held = HeldSegment::new(stereo(bytes, Some(stream_us)));

        if let Some(expected) = port.timestamps().expected_next(port.len(), &FMT) {
            assert_eq!(expected, stream_us);
            let mut candidate = stereo(ms_bytes, Some(expected));
            assert!(!port.detect_discontinuity(&candidate));
            let delta = loop {
                let d = rng.i64(-3_000..=3_000);
                if d != 0 {
                    break d;
                }
            };
            candidate.set_timestamp(Some(expected + delta));
            assert!(port.detect_discontinuity(&candidate));
        }

        while !held.is_drained() {
            if port.free_space(None) == 0 {
                let take = ms_bytes * rng.usize(1..=port.unconsumed() / ms_bytes);
                port.take_block(take).unwrap();
                port.compact();
            }
            let outcome = port.buffer_segment(&mut held, port.free_space(None)).unwrap();
            assert!(matches!(outcome, BufferOutcome::Copied(_)));
        }
        stream_us += FMT.bytes_to_us(bytes);
    }
}

#[test]
fn test_metadata_offsets_track_true_distance() {
    let mut rng = fastrand::Rng::with_seed(0x5eed_0002);
    let mut port = open_port(5_000);
    // Global sample index of the local buffer's first byte.
    let mut port_base = 0usize;
    let mut stream_samples = 0usize;
    let mut held: Option<HeldSegment> = None;

    for _ in 0..2_000 {
        if held.is_none() {
            let samples = rng.usize(1..=200);
            let mut segment = stereo(FMT.samples_to_bytes(samples), None);
            let mut offsets: Vec<usize> = (0..rng.usize(0..=3))
                .map(|_| rng.usize(0..samples))
                .collect();
            offsets.sort_unstable();
            for offset in offsets {
                let global = (stream_samples + offset) as i64;
                segment
                    .metadata
                    .create(MetadataNode::custom(offset, "position", global.into()));
            }
            stream_samples += samples;
            held = Some(HeldSegment::new(segment));
        }

        if port.unconsumed() > 0 && (port.free_space(None) == 0 || rng.bool()) {
            let start = port_base + FMT.bytes_to_samples(port.len() - port.unconsumed());
            let samples = rng.usize(1..=FMT.bytes_to_samples(port.unconsumed()));
            let block = port.take_block(FMT.samples_to_bytes(samples)).unwrap();
            for node in block.metadata.iter() {
                assert_eq!(node.offset, position(node) - start);
            }
            if port.free_space(None) == 0 || rng.bool() {
                port_base += FMT.bytes_to_samples(port.compact());
            }
        } else if let Some(h) = held.as_mut() {
            port.buffer_segment(h, port.free_space(None)).unwrap();
            if h.is_drained() {
                held = None;
            }
        }

        for node in port.metadata().iter() {
            assert_eq!(node.offset, position(node) - port_base);
        }
    }
}

#[test]
fn test_length_never_exceeds_capacity() {
    let mut rng = fastrand::Rng::with_seed(0x5eed_0003);
    let mut port = open_port(5_000);
    let thresholds = [2_500i64, 5_000, 10_000];

    for _ in 0..1_000 {
        match rng.u8(0..10) {
            0 => {
                port.configure(FMT, thresholds[rng.usize(..thresholds.len())])
                    .unwrap();
            }
            1..=5 => {
                let mut held = HeldSegment::new(stereo(rng.usize(1..=2_000), None));
                let wanted = rng.usize(0..=4_000);
                let copied = match port.buffer_segment(&mut held, wanted).unwrap() {
                    BufferOutcome::Copied(n) => n,
                    BufferOutcome::Discontinuity => 0,
                };
                assert!(copied <= wanted);
            }
            _ => {
                if port.unconsumed() > 0 {
                    port.consume(rng.usize(1..=port.unconsumed()));
                }
                port.compact();
            }
        }

        let buffer = port.buffered().expect("configured port has a buffer");
        assert!(buffer.len() <= buffer.capacity());
        assert_eq!(buffer.num_channels(), 2);
        assert!(port.unconsumed() <= port.len());
    }
}

#[test]
fn test_partial_blocks_keep_timestamps_exact() {
    // 480 bytes/ch is exactly 5 ms; 100 bytes/ch is not a whole number of microseconds.
    let mut port = open_port(5_000);
    let mut first = HeldSegment::new(stereo(480, Some(0)));
    port.buffer_segment(&mut first, port.free_space(None)).unwrap();

    let mut stamps = Vec::new();
    for _ in 0..4 {
        let block = port.take_block(100).unwrap();
        stamps.push(block.timestamp());
        port.compact();
    }
    assert_eq!(
        stamps,
        vec![Some(0), Some(1_041), Some(2_083), Some(3_125)]
    );
    assert_eq!(port.timestamps().head(), Some(4_166));

    let mut next = HeldSegment::new(stereo(100, Some(5_000)));
    assert!(!port.detect_discontinuity(&next.segment));
    assert_eq!(
        port.buffer_segment(&mut next, port.free_space(None)).unwrap(),
        BufferOutcome::Copied(100)
    );
}

#[test]
fn test_odd_sized_blocks_never_break_a_contiguous_stream() {
    let mut rng = fastrand::Rng::with_seed(0x5eed_0004);
    let mut port = open_port(10_000);
    let sample_bytes = FMT.bytes_per_sample();
    // Each arrival is stamped where the previous one ends.
    let mut ts = 0i64;

    for _ in 0..300 {
        let samples = rng.usize(1..=300);
        let mut held = HeldSegment::new(stereo(FMT.samples_to_bytes(samples), Some(ts)));
        assert!(
            !port.detect_discontinuity(&held.segment),
            "contiguous arrival at {ts}us rejected"
        );

        while !held.is_drained() {
            if port.free_space(None) == 0 {
                let take = sample_bytes * rng.usize(1..=port.unconsumed() / sample_bytes);
                port.take_block(take).unwrap();
                port.compact();
            }
            let outcome = port.buffer_segment(&mut held, port.free_space(None)).unwrap();
            assert!(matches!(outcome, BufferOutcome::Copied(_)));
        }
        ts += FMT.samples_to_us(samples);
    }
}

#[test]
fn test_output_port_rebases_leftover_metadata() {
    let mut port = output_port();
    port.acquire_output()
        .unwrap()
        .buffers
        .append_slices(&[&[1; 8], &[2; 8]]);
    // 8 bytes/ch of 16-bit audio is 4 samples.
    for offset in [0usize, 4, 6, 11] {
        port.ledger()
            .0
            .create(MetadataNode::custom(offset, "position", (offset as i64).into()));
    }

    let mut sink = Collector::started();
    assert_eq!(
        port.deliver_or_drop(Some(&mut sink)).unwrap(),
        Delivery::Delivered { bytes_per_channel: 8 }
    );
    assert_eq!(sink.offsets, vec![vec![0, 4]]);
    let leftover: Vec<usize> = port.metadata().iter().map(|n| n.offset).collect();
    let expected: Vec<usize> = port
        .metadata()
        .iter()
        .map(|n| position(n) - 4)
        .collect();
    assert_eq!(leftover, vec![2, 7]);
    assert_eq!(leftover, expected);
}

#[test]
fn test_dropped_delivery_empties_the_ledger() {
    let mut port = output_port();
    port.acquire_output().unwrap().buffers.append_zeros(8);
    {
        let (ledger, flags) = port.ledger();
        ledger.create(MetadataNode::end_of_stream(0, true));
        ledger.create(MetadataNode::data_flow_gap(2));
        ledger.create(MetadataNode::custom(30, "position", 30i64.into()));
        flags.marker_eos = true;
    }

    let mut sink = Collector::default();
    assert_eq!(
        port.deliver_or_drop(Some(&mut sink)).unwrap(),
        Delivery::Dropped(DropCause::NotStarted)
    );
    assert!(sink.offsets.is_empty());
    assert!(port.metadata().is_empty());
    assert!(!port.ledger().1.marker_eos);
    assert_eq!(port.pool().map(OutputPool::available), Some(2));
}

fn output_port() -> ExternalOutputPort {
    let mut port = ExternalOutputPort::new(2);
    port.open(1).expect("open");
    port.start().expect("start");
    port.configure(FMT, 16).expect("configure");
    port
}

/// Downstream that records the metadata offsets of every delivered buffer.
#[derive(Default)]
struct Collector {
    state: PropagatedState,
    offsets: Vec<Vec<usize>>,
}

impl Collector {
    fn started() -> Self {
        Self {
            state: PropagatedState::Started,
            ..Default::default()
        }
    }
}

impl Downstream for Collector {
    fn propagated_state(&self) -> PropagatedState {
        self.state
    }

    fn push(&mut self, buffer: PooledBuffer) -> Result<(), EngineError> {
        self.offsets
            .push(buffer.metadata.iter().map(|n| n.offset).collect());
        Ok(())
    }
}
