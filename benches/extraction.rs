//! Benchmarks for full-stream extraction
//!
//! Measures demultiplexing throughput over synthesized ADTS, MPEG-TS and
//! fragmented MP4 streams.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sceneforged_extractor::{params, CapturingSink, MediaParser, SliceInput};

#[path = "../crates/sceneforged-extractor/tests/common/mod.rs"]
mod common;

/// Extracts `stream` to the end and returns the sample count.
fn extract(name: &str, stream: &[u8], in_band_crypto: bool) -> usize {
    let mut parser = MediaParser::create_by_name(name, CapturingSink::metadata_only()).unwrap();
    if in_band_crypto {
        parser.set_parameter(params::IN_BAND_CRYPTO_INFO, true).unwrap();
    }
    let mut input = SliceInput::new(stream.to_vec());
    while parser.advance(&mut input).unwrap() {}
    parser.sink().samples.len()
}

fn bench_elementary(c: &mut Criterion) {
    let mut group = c.benchmark_group("adts");

    for frames in [100usize, 1_000, 10_000] {
        let stream = common::adts_stream(frames);
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::new("frames", frames), &stream, |b, stream| {
            b.iter(|| extract("adts", black_box(stream), false));
        });
    }

    group.finish();
}

fn bench_transport_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("ts");

    for pes_count in [100usize, 1_000] {
        let stream = common::ts_aac_stream(pes_count, 1_920);
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::new("pes", pes_count), &stream, |b, stream| {
            b.iter(|| extract("ts", black_box(stream), false));
        });
    }

    group.finish();
}

fn bench_fragmented_mp4(c: &mut Criterion) {
    let mut group = c.benchmark_group("fmp4");

    let stream = common::encrypted_fragmented_file();
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("cenc/out_of_band", |b| {
        b.iter(|| extract("fmp4", black_box(&stream), false));
    });

    group.bench_function("cenc/in_band", |b| {
        b.iter(|| extract("fmp4", black_box(&stream), true));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_elementary,
    bench_transport_stream,
    bench_fragmented_mp4
);
criterion_main!(benches);
