//! Throughput of typical protocol payloads
//!
//! Compares zero-copy binary splicing against base64 for memory-read sized
//! blocks, and measures plain command-argument documents.

use codec::{decode, encode_sequence, encode_with, EncodeOptions, Value};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

/// Reply of a memory read: context id, address, payload
fn memory_read_reply(size: usize) -> Value {
    Value::list([
        Value::from("P1.T3"),
        Value::from(0x2000_0000u64),
        Value::binary(vec![0xA5u8; size]),
    ])
}

fn bench_binary_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary_encoding");
    let reply = memory_read_reply(64 * 1024);
    group.throughput(Throughput::Bytes(64 * 1024));

    group.bench_function("zero_copy_64k", |b| {
        b.iter(|| black_box(encode_with(black_box(&reply), EncodeOptions::zero_copy())));
    });

    group.bench_function("base64_64k", |b| {
        b.iter(|| black_box(encode_with(black_box(&reply), EncodeOptions::default())));
    });

    group.finish();
}

fn bench_binary_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary_decoding");
    let zero_copy = encode_with(&memory_read_reply(64 * 1024), EncodeOptions::zero_copy());
    group.throughput(Throughput::Bytes(64 * 1024));

    group.bench_function("zero_copy_64k", |b| {
        b.iter(|| black_box(decode(black_box(zero_copy.clone())).ok()));
    });

    group.finish();
}

fn bench_command_arguments(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_arguments");
    let args = vec![
        Value::from("P1.T3"),
        Value::map([
            ("Enabled", Value::from(true)),
            ("Location", Value::from("main.c:42")),
            ("IgnoreCount", Value::from(0)),
        ]),
    ];

    group.bench_function("encode_sequence", |b| {
        b.iter(|| black_box(encode_sequence(black_box(&args))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_binary_encoding,
    bench_binary_decoding,
    bench_command_arguments
);
criterion_main!(benches);
