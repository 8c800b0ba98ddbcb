use chrono_tz::Tz;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use sweepd_codec::{
    Collation, Datum, HashOptions, decode, encode_key, encode_value, hash_row, set_raw_values,
};

fn sample_row(width: usize) -> Vec<Datum> {
    (0..width)
        .map(|i| match i % 4 {
            0 => Datum::Int64(i as i64 * -7919),
            1 => Datum::String(format!("user-{i:08}"), Collation::Utf8Mb4GeneralCi),
            2 => Datum::Float64(i as f64 * 1.25),
            _ => Datum::decimal("12345.678").unwrap_or(Datum::Null),
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for width in [4usize, 16, 64] {
        let row = sample_row(width);
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("key", width), &row, |b, row| {
            b.iter(|| encode_key(&Tz::UTC, black_box(row)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("value", width), &row, |b, row| {
            b.iter(|| encode_value(&Tz::UTC, black_box(row)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("hash", width), &row, |b, row| {
            b.iter(|| hash_row(black_box(row), HashOptions::default()).unwrap())
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for width in [4usize, 16, 64] {
        let encoded = encode_value(&Tz::UTC, &sample_row(width)).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("full", width), &encoded, |b, encoded| {
            b.iter(|| decode(black_box(encoded), width).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("raw_slices", width), &encoded, |b, encoded| {
            b.iter(|| {
                let mut slots = vec![&[][..]; width];
                set_raw_values(black_box(encoded), &mut slots).unwrap();
                slots.len()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
