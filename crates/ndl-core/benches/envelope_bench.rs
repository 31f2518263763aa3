//! Criterion benchmarks for the envelope codec and assembler.
//!
//! The serial poll task encodes one envelope per channel every 2 ms, and the
//! session reassembles whatever the socket delivers, so both paths sit on
//! the hot path of the bridge.
//!
//! Run with:
//! ```bash
//! cargo bench --package ndl-core --bench envelope_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndl_core::protocol::envelope::{decode_envelope, encode_envelope};
use ndl_core::{EnvelopeAssembler, TopicKey};

const PAYLOAD_SIZES: &[usize] = &[1, 64, 512, 4096];

/// Benchmarks `encode_envelope` across payload sizes.
fn bench_encode(c: &mut Criterion) {
    let key = TopicKey::from_name("uart1");
    let mut group = c.benchmark_group("encode_envelope");
    for &size in PAYLOAD_SIZES {
        let payload = vec![0x5A; size];
        group.bench_with_input(BenchmarkId::new("bytes", size), &payload, |b, payload| {
            b.iter(|| {
                encode_envelope(black_box(key), black_box(payload), 4096)
                    .expect("encode must succeed")
            })
        });
    }
    group.finish();
}

/// Benchmarks `decode_envelope` from pre-encoded frames.
fn bench_decode(c: &mut Criterion) {
    let key = TopicKey::from_name("uart1");
    let mut group = c.benchmark_group("decode_envelope");
    for &size in PAYLOAD_SIZES {
        let bytes = encode_envelope(key, &vec![0x5A; size], 4096)
            .expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("bytes", size), &bytes, |b, bytes| {
            b.iter(|| decode_envelope(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks reassembling a stream of small frames delivered in odd-sized chunks.
fn bench_assembler_stream(c: &mut Criterion) {
    let mut stream = Vec::new();
    for i in 0..64u8 {
        let name = if i % 2 == 0 { "uart1" } else { "uart2" };
        stream.extend(encode_envelope(TopicKey::from_name(name), &[i; 48], 4096).unwrap());
    }

    c.bench_function("assembler_64_frames_chunked", |b| {
        b.iter(|| {
            let mut asm = EnvelopeAssembler::new(4096);
            let mut frames = 0;
            for chunk in black_box(&stream).chunks(137) {
                asm.push(chunk);
                while asm.next_frame().is_some() {
                    frames += 1;
                }
            }
            frames
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_assembler_stream);
criterion_main!(benches);
