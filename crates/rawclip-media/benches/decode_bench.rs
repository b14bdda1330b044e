//! Benchmarks for the per-frame pixel paths.
//!
//! Run with: cargo bench -p rawclip-media

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rawclip_core::CfaPattern;
use rawclip_media::{debayer, pack_bits, unpack_bits, DebayerAlgorithm, DeltaCodec, EntropyCodec};

const WIDTH: u32 = 1920;
const HEIGHT: u32 = 1080;

fn synthetic_frame(bit_depth: u8) -> Vec<u16> {
    let mask = (1u32 << bit_depth) - 1;
    (0..(WIDTH * HEIGHT))
        .map(|i| ((i.wrapping_mul(2654435761) >> 7) & mask) as u16)
        .collect()
}

fn bench_unpack(c: &mut Criterion) {
    for depth in [10u8, 12, 14] {
        let packed = pack_bits(&synthetic_frame(depth), depth);
        let mut out = vec![0u16; (WIDTH * HEIGHT) as usize];
        let mut words = Vec::new();
        c.bench_function(&format!("unpack_{depth}bit_1080p"), |bencher| {
            bencher.iter(|| unpack_bits(black_box(&packed), depth, &mut out, &mut words));
        });
    }
}

fn bench_delta_decode(c: &mut Criterion) {
    let samples = synthetic_frame(14);
    let stream = DeltaCodec
        .encode(&samples, WIDTH, HEIGHT, 14)
        .expect("synthetic frame fits 14 bits");
    let mut out = vec![0u16; samples.len()];

    c.bench_function("delta_decode_1080p", |bencher| {
        bencher.iter(|| DeltaCodec.decode_into(black_box(&stream), WIDTH, HEIGHT, 14, &mut out));
    });
}

fn bench_debayer(c: &mut Criterion) {
    let raw = synthetic_frame(14);
    for algorithm in [
        DebayerAlgorithm::Identity,
        DebayerAlgorithm::Nearest,
        DebayerAlgorithm::Bilinear,
    ] {
        c.bench_function(&format!("debayer_{:?}_1080p", algorithm), |bencher| {
            bencher.iter(|| debayer(black_box(&raw), WIDTH, HEIGHT, CfaPattern::Rggb, algorithm));
        });
    }
}

criterion_group!(benches, bench_unpack, bench_delta_decode, bench_debayer);
criterion_main!(benches);
