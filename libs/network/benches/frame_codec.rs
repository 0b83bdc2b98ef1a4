//! Frame encode/decode cost for the common message shapes

use bytes::Bytes;
use codec::{DecodeOptions, EncodeOptions, Value};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use network::protocol::Frame;

fn command_frame() -> Frame {
    Frame::Command {
        token: "1042".to_string(),
        service: "Memory".to_string(),
        command: "get".to_string(),
        args: vec![
            Value::from("P1.T3"),
            Value::from(0x2000_0000u64),
            Value::from(1),
            Value::from(4096),
            Value::from(0),
        ],
    }
}

fn result_frame(size: usize) -> Frame {
    Frame::Result {
        token: "1042".to_string(),
        data: vec![Value::Null, Value::binary(vec![0x5Au8; size])],
    }
}

fn bench_frame_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encoding");
    let command = command_frame();
    let reply = result_frame(4096);

    group.bench_function("command", |b| {
        b.iter(|| black_box(command.encode(EncodeOptions::default())))
    });
    group.throughput(Throughput::Bytes(4096));
    group.bench_function("result_4k_binary", |b| {
        b.iter(|| black_box(reply.encode(EncodeOptions::default())))
    });
    group.finish();
}

fn bench_frame_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decoding");
    let command: Bytes = command_frame().encode(EncodeOptions::default());
    let reply: Bytes = result_frame(4096).encode(EncodeOptions::default());

    group.bench_function("command", |b| {
        b.iter(|| black_box(Frame::decode(command.clone(), DecodeOptions::default())))
    });
    group.throughput(Throughput::Bytes(reply.len() as u64));
    group.bench_function("result_4k_binary", |b| {
        b.iter(|| black_box(Frame::decode(reply.clone(), DecodeOptions::default())))
    });
    group.finish();
}

criterion_group!(benches, bench_frame_encoding, bench_frame_decoding);
criterion_main!(benches);
