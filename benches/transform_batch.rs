use std::path::PathBuf;

use chrono::NaiveDate;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use datasus_etl::catalog::Catalog;
use datasus_etl::extract::{RawBatch, SourceLocator, extract};
use datasus_etl::resolve::{Dimensions, Period};
use datasus_etl::sink::load;
use datasus_etl::store;
use datasus_etl::transform::{TransformContext, transform};
use rusqlite::Connection;

fn sample_rows(rows: usize) -> RawBatch {
    let fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join("RDSE2108_sample.csv");
    let descriptor = Catalog::builtin()
        .expect("catalog")
        .get("sihsus_aih_rd")
        .expect("descriptor");
    let sample = extract(&SourceLocator::File(fixture), &descriptor.source, 16)
        .expect("open sample")
        .next()
        .expect("one batch")
        .expect("decode sample");
    let body = sample.rows.iter().cycle().take(rows).cloned().collect();
    RawBatch::new(sample.headers, body)
}

fn dimensions() -> Dimensions {
    let first = NaiveDate::from_ymd_opt(2021, 8, 1).expect("date");
    let last = NaiveDate::from_ymd_opt(2021, 8, 31).expect("date");
    Dimensions::new(
        vec![Period::new("2021-08", first, last)],
        vec![
            ("280030".to_string(), "geo-aracaju".to_string()),
            ("280020".to_string(), "geo-aquidaba".to_string()),
        ],
    )
}

fn bench_transform_and_load(c: &mut Criterion) {
    let descriptor = Catalog::builtin()
        .expect("catalog")
        .get("sihsus_aih_rd")
        .expect("descriptor");
    let raw = sample_rows(10_000);
    let dims = dimensions();
    let context = TransformContext::new(&dims, &dims);
    let canonical = transform(&descriptor, &raw, &context).expect("transform");

    let mut group = c.benchmark_group("aih_rd_batch");

    group.bench_function("transform_10k", |b| {
        b.iter(|| transform(&descriptor, &raw, &context).expect("transform"));
    });

    group.bench_function("load_10k_in_memory", |b| {
        b.iter_batched(
            || {
                let conn = Connection::open_in_memory().expect("sqlite");
                store::create_destination(&conn, &descriptor, "aih_rd").expect("destination");
                conn
            },
            |mut conn| {
                let mut tx = conn.transaction().expect("transaction");
                let status = load(&mut tx, "aih_rd", &canonical);
                assert!(status.is_success());
                tx.commit().expect("commit");
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_transform_and_load);
criterion_main!(benches);
