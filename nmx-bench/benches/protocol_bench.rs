//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nmx_protocol::message::EchoReq;
use nmx_protocol::oic::{self, CoapMessage};
use nmx_protocol::{cbor, CborMap, NmpMsg, NmpReq};

fn create_test_map(payload_size: usize) -> CborMap {
    CborMap::new()
        .with("d", "x".repeat(payload_size))
        .with("rc", 0)
        .with("off", 123_456)
        .with("data", vec![0xa5u8; payload_size])
}

fn create_echo_msg(payload_size: usize) -> NmpMsg {
    EchoReq {
        payload: "x".repeat(payload_size),
    }
    .msg(7)
}

fn bench_nmp_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("nmp_encode");

    for size in [16, 256, 2048] {
        let msg = create_echo_msg(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &msg, |b, msg| {
            b.iter(|| black_box(msg.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_nmp_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("nmp_decode");

    for size in [16, 256, 2048] {
        let encoded = create_echo_msg(size).encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(NmpMsg::decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_cbor_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("cbor_map");

    for size in [16, 256, 2048] {
        let map = create_test_map(size);
        let encoded = cbor::encode(&map).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("encode", size), &map, |b, map| {
            b.iter(|| black_box(cbor::encode(map).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
            b.iter(|| black_box(cbor::decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_coap_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("coap_message");
    group.throughput(Throughput::Elements(1));

    let token = 1u64.to_be_bytes().to_vec();
    let payload = Bytes::from(cbor::encode(&create_test_map(64)).unwrap());
    let req = oic::create_put(true, "/cfg/led/state", token, payload).unwrap();
    let encoded = req.to_message(1).encode().unwrap();

    group.bench_function("encode_put", |b| {
        b.iter(|| black_box(req.to_message(1).encode().unwrap()));
    });
    group.bench_function("decode_put", |b| {
        b.iter(|| black_box(CoapMessage::decode(&encoded).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_nmp_encode,
    bench_nmp_decode,
    bench_cbor_map,
    bench_coap_message,
);

criterion_main!(benches);
