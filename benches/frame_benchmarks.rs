// ABOUTME: Benchmark suite for NSQ frame decoding and command encoding
// ABOUTME: Measures the decoder's per-frame-type cost and command encoding across payload sizes

use bytes::{BufMut, Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nsq::codec::{Command, Payload};
use nsq::frame::FrameDecoder;
use std::time::Duration;

fn encode_frame(frame_type: i32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u32(4 + body.len() as u32);
    buf.put_i32(frame_type);
    buf.extend_from_slice(body);
    buf
}

fn message_frame_body(message: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.put_i64(1_700_000_000_000_000_000);
    body.put_u16(1);
    body.extend_from_slice(&[0xABu8; 16]);
    body.extend_from_slice(message);
    body
}

fn bench_decode_response(c: &mut Criterion) {
    let bytes = encode_frame(0, b"OK");
    let mut group = c.benchmark_group("decode_response");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("ok", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder.buffer_mut().extend_from_slice(black_box(&bytes));
            decoder.decode().unwrap()
        })
    });

    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_message");
    group.measurement_time(Duration::from_secs(5));

    for &size in &[10usize, 160, 1024, 8192] {
        let body = message_frame_body(&vec![b'A'; size]);
        let bytes = encode_frame(2, &body);

        group.bench_with_input(BenchmarkId::new("body_size", size), &bytes, |b, bytes| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                decoder.buffer_mut().extend_from_slice(black_box(bytes));
                decoder.decode().unwrap()
            })
        });
    }

    group.finish();
}

fn bench_decode_split_across_reads(c: &mut Criterion) {
    let body = message_frame_body(b"hello world");
    let bytes = encode_frame(2, &body);

    c.bench_function("decode_fragmented", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            for chunk in bytes.chunks(7) {
                decoder.buffer_mut().extend_from_slice(black_box(chunk));
                let _ = decoder.decode().unwrap();
            }
        })
    });
}

fn bench_encode_pub(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_pub");
    group.measurement_time(Duration::from_secs(5));

    for &size in &[10usize, 160, 1024, 8192] {
        let body = Bytes::from(vec![b'A'; size]);

        group.bench_with_input(BenchmarkId::new("body_size", size), &body, |b, body| {
            b.iter(|| {
                let command = Command::new("PUB")
                    .arg("events")
                    .body(Payload::Single(black_box(body.clone())));
                let mut buf = BytesMut::new();
                command.encode(&mut buf);
                buf
            })
        });
    }

    group.finish();
}

fn bench_encode_mpub(c: &mut Criterion) {
    let messages: Vec<Bytes> = (0..50).map(|_| Bytes::from_static(b"hello world")).collect();

    c.bench_function("encode_mpub_50", |b| {
        b.iter(|| {
            let command = Command::new("MPUB")
                .arg("events")
                .body(Payload::Multi(black_box(messages.clone())));
            command.to_bytes()
        })
    });
}

criterion_group!(
    benches,
    bench_decode_response,
    bench_decode_message,
    bench_decode_split_across_reads,
    bench_encode_pub,
    bench_encode_mpub
);
criterion_main!(benches);
