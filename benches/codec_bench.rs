//! Criterion micro-benchmarks for the tuple codecs.
//!
//! Benchmarks:
//! - Type-aware encode of mixed fixed/variable tuples
//! - Type-aware reader reset and full field walk
//! - Point-MBR encode of degenerate boxes

use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};

use lsm_index::tuple::{StoredTupleReference, TupleCodec, TupleReference, TupleWriter};
use lsm_index::{OwnedTuple, TypeTrait};

fn mixed_tuples(n: usize) -> Vec<OwnedTuple> {
    (0..n)
        .map(|i| {
            OwnedTuple::new(vec![
                (i as i64).to_le_bytes().to_vec(),
                format!("name_{i:08}").into_bytes(),
                (i as i32).to_le_bytes().to_vec(),
                vec![b'x'; i % 64],
            ])
        })
        .collect()
}

fn mixed_codec() -> TupleCodec {
    TupleCodec::from_tag(
        "type-aware",
        vec![TypeTrait::INT64, TypeTrait::Variable, TypeTrait::INT32, TypeTrait::Variable],
        1,
    )
    .unwrap()
}

fn encode_all(codec: &TupleCodec, tuples: &[OwnedTuple]) -> (Vec<u8>, Vec<usize>) {
    let total = tuples.iter().map(|t| codec.bytes_required(t)).sum();
    let mut buf = vec![0u8; total];
    let mut offsets = Vec::with_capacity(tuples.len());
    let mut pos = 0;
    for t in tuples {
        offsets.push(pos);
        pos += codec.write_tuple(t, &mut buf, pos).unwrap();
    }
    (buf, offsets)
}

// ---------------------------------------------------------------------------
// Type-aware codec
// ---------------------------------------------------------------------------

fn bench_type_aware_write(c: &mut Criterion) {
    let codec = mixed_codec();
    let tuples = mixed_tuples(1024);
    let total: usize = tuples.iter().map(|t| codec.bytes_required(t)).sum();

    let mut group = c.benchmark_group("type_aware");
    group.throughput(Throughput::Bytes(total as u64));
    group.bench_function("write_1024", |b| {
        let mut buf = vec![0u8; total];
        b.iter(|| {
            let mut pos = 0;
            for t in &tuples {
                pos += codec.write_tuple(black_box(t), &mut buf, pos).unwrap();
            }
            black_box(pos)
        });
    });
    group.finish();
}

fn bench_type_aware_read(c: &mut Criterion) {
    let codec = mixed_codec();
    let tuples = mixed_tuples(1024);
    let (buf, offsets) = encode_all(&codec, &tuples);

    let mut group = c.benchmark_group("type_aware");
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("read_1024", |b| {
        let mut reader = codec.create_tuple_reference();
        b.iter(|| {
            let mut field_bytes = 0;
            for &offset in &offsets {
                reader.reset(black_box(&buf), offset).unwrap();
                for i in 0..reader.field_count() {
                    field_bytes += reader.field_length(i);
                }
            }
            black_box(field_bytes)
        });
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Point-MBR codec
// ---------------------------------------------------------------------------

fn bench_point_mbr_write(c: &mut Criterion) {
    let codec = TupleCodec::from_tag(
        "point-mbr",
        vec![
            TypeTrait::DOUBLE,
            TypeTrait::DOUBLE,
            TypeTrait::DOUBLE,
            TypeTrait::DOUBLE,
            TypeTrait::INT64,
        ],
        4,
    )
    .unwrap();
    let points: Vec<OwnedTuple> = (0..1024)
        .map(|i| {
            let x = (i as f64) * 0.25;
            let y = 90.0 - (i as f64) * 0.1;
            OwnedTuple::new(vec![
                x.to_le_bytes().to_vec(),
                y.to_le_bytes().to_vec(),
                x.to_le_bytes().to_vec(),
                y.to_le_bytes().to_vec(),
                (i as i64).to_le_bytes().to_vec(),
            ])
        })
        .collect();
    let total: usize = points.iter().map(|t| codec.bytes_required(t)).sum();

    let mut group = c.benchmark_group("point_mbr");
    group.throughput(Throughput::Elements(points.len() as u64));
    group.bench_function("write_1024", |b| {
        let mut buf = vec![0u8; total];
        b.iter(|| {
            let mut pos = 0;
            for p in &points {
                pos += codec.write_tuple(black_box(p), &mut buf, pos).unwrap();
            }
            black_box(pos)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_type_aware_write,
    bench_type_aware_read,
    bench_point_mbr_write
);
criterion_main!(benches);
