//! Throughput Benchmark for minikv
//!
//! This benchmark measures the hash table, the keyspace and the request
//! parser under various workloads.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use minikv::commands::CommandHandler;
use minikv::protocol::RequestParser;
use minikv::storage::{Db, Dict, Value};
use std::time::Duration;

/// Benchmark Dict insertion, including growth and incremental rehashing
fn bench_dict_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("dict_add");

    group.throughput(Throughput::Elements(1));
    group.bench_function("add_growing", |b| {
        let mut dict = Dict::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = Value::from(format!("key:{}", i));
            dict.add(key, Value::from("value")).unwrap();
            i += 1;
        });
    });

    group.throughput(Throughput::Elements(100_000));
    group.bench_function("fill_100k", |b| {
        let keys: Vec<Value> = (0..100_000).map(|i| Value::from(format!("key:{}", i))).collect();
        let value = Value::from("value");
        b.iter_batched(
            Dict::new,
            |mut dict| {
                for key in &keys {
                    dict.add(key.clone(), value.clone()).unwrap();
                }
                black_box(dict.len())
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

/// Benchmark Dict lookups
fn bench_dict_get(c: &mut Criterion) {
    let mut dict = Dict::new();

    // Pre-populate with data
    for i in 0..100_000 {
        dict.add(Value::from(format!("key:{}", i)), Value::from(format!("value:{}", i)))
            .unwrap();
    }
    // Finish any rehash in progress so lookups hit one table.
    while dict.is_rehashing() {
        dict.rehash_step();
    }

    let existing: Vec<Value> = (0..100_000).map(|i| Value::from(format!("key:{}", i))).collect();
    let missing: Vec<Value> = (0..1_000).map(|i| Value::from(format!("missing:{}", i))).collect();

    let mut group = c.benchmark_group("dict_get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0usize;
        b.iter(|| {
            black_box(dict.get(&existing[i % existing.len()]));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0usize;
        b.iter(|| {
            black_box(dict.get(&missing[i % missing.len()]));
            i += 1;
        });
    });

    group.bench_function("random_get", |b| {
        b.iter(|| black_box(dict.random_get()));
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes) through the command table
fn bench_mixed(c: &mut Criterion) {
    let mut db = Db::new();
    let handler = CommandHandler::new();

    // Pre-populate
    for i in 0..10_000 {
        db.set(Value::from(format!("key:{}", i)), Value::from(format!("value:{}", i)))
            .unwrap();
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let args = if i % 5 == 0 {
                // 20% writes
                vec![Value::from("SET"), Value::from(format!("new:{}", i)), Value::from("value")]
            } else {
                // 80% reads
                vec![Value::from("GET"), Value::from(format!("key:{}", i % 10_000))]
            };
            black_box(handler.execute(&mut db, &args));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark expiry operations
fn bench_expiry(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_with_ttl", |b| {
        let mut db = Db::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = Value::from(format!("key:{}", i));
            db.set_with_ttl(key, Value::from("value"), Duration::from_secs(3600))
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("active_expire_cycle", |b| {
        let mut db = Db::new();
        for i in 0..10_000 {
            db.set_with_ttl(
                Value::from(format!("expire:{}", i)),
                Value::from("value"),
                Duration::from_secs(3600),
            )
            .unwrap();
        }
        b.iter(|| black_box(db.active_expire_cycle(20)));
    });

    group.finish();
}

fn encode(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n{}\r\n", arg.len(), arg).as_bytes());
    }
    out
}

/// Benchmark request parsing
fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");

    let single = encode(&["SET", "key:1", "value"]);
    group.throughput(Throughput::Bytes(single.len() as u64));
    group.bench_function("single_request", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            let mut buf = BytesMut::from(&single[..]);
            black_box(parser.parse(&mut buf).unwrap())
        });
    });

    let pipeline: Vec<u8> = (0..100)
        .flat_map(|i| encode(&["SET", &format!("key:{}", i), "value"]))
        .collect();
    group.throughput(Throughput::Bytes(pipeline.len() as u64));
    group.bench_function("pipeline_100", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            let mut buf = BytesMut::from(&pipeline[..]);
            let mut count = 0;
            while let Some(args) = parser.parse(&mut buf).unwrap() {
                count += args.len();
            }
            black_box(count)
        });
    });

    let large = encode(&["SET", "big", &"x".repeat(64 * 1024)]);
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("fragmented_64kb", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            let mut buf = BytesMut::new();
            let mut result = None;
            for chunk in large.chunks(1460) {
                buf.extend_from_slice(chunk);
                if let Some(args) = parser.parse(&mut buf).unwrap() {
                    result = Some(args);
                }
            }
            black_box(result)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_dict_add,
    bench_dict_get,
    bench_mixed,
    bench_expiry,
    bench_parser,
);

criterion_main!(benches);
