//! Benchmarks for MySQL protocol decoding.

#![allow(clippy::unwrap_used, missing_docs)]

use std::hint::black_box;

use bytes::Bytes;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use mysql_protocol::{
    column::{ColumnDefinition, ColumnFlags, FieldType},
    packet::PacketHeader,
    row::{decode_text_row, encode_text_row, text_row_lengths},
};

fn bench_packet_header_decode(c: &mut Criterion) {
    let encoded = PacketHeader::new(1000, 3).encode_to_bytes();

    c.bench_function("packet_header_decode", |b| {
        b.iter(|| {
            let mut cursor = encoded.clone();
            black_box(PacketHeader::decode(&mut cursor).unwrap())
        })
    });
}

fn bench_column_definition_decode(c: &mut Criterion) {
    let encoded = ColumnDefinition {
        catalog: "def".into(),
        schema: "shop".into(),
        table: "orders".into(),
        org_table: "orders".into(),
        name: "customer_name".into(),
        org_name: "customer_name".into(),
        character_set: 45,
        column_length: 1020,
        column_type: FieldType::VarString as u8,
        flags: ColumnFlags::NOT_NULL,
        decimals: 0,
    }
    .encode();

    c.bench_function("column_definition_decode", |b| {
        b.iter(|| black_box(ColumnDefinition::decode(encoded.clone()).unwrap()))
    });
}

fn bench_text_row(c: &mut Criterion) {
    let value = vec![b'x'; 64];
    let columns: Vec<Option<&[u8]>> = (0..16)
        .map(|i| if i % 5 == 0 { None } else { Some(value.as_slice()) })
        .collect();
    let payload: Bytes = encode_text_row(&columns);

    let mut group = c.benchmark_group("text_row");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(decode_text_row(&payload, 16).unwrap()))
    });
    group.bench_function("lengths", |b| {
        b.iter(|| black_box(text_row_lengths(&payload, 16).unwrap()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_packet_header_decode,
    bench_column_definition_decode,
    bench_text_row
);
criterion_main!(benches);
