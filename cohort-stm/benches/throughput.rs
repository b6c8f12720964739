//! Throughput benchmarks for the transactional region

use cohort_stm::{Addr, Region};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

const WORDS: usize = 1024;

fn counter_increment(region: &Region, addr: Addr) {
    region
        .atomically(false, |tx| {
            let mut buf = [0u8; 8];
            tx.read(addr, &mut buf)?;
            let v = u64::from_ne_bytes(buf);
            tx.write(&(v + 1).to_ne_bytes(), addr)
        })
        .unwrap();
}

fn bench_begin_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("begin_end");
    let region = Region::create(64, 8).unwrap();

    group.bench_function("read_only", |b| {
        b.iter(|| {
            let tx = region.begin(true).unwrap();
            black_box(tx.end());
        });
    });
    group.bench_function("read_write", |b| {
        b.iter(|| {
            let tx = region.begin(false).unwrap();
            black_box(tx.end());
        });
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let region = Region::create(WORDS * 8, 8).unwrap();
    let start = region.start();

    for words in [1usize, 8, 64, 512].iter() {
        group.throughput(Throughput::Bytes((*words * 8) as u64));
        let mut buf = vec![0u8; words * 8];
        group.bench_with_input(BenchmarkId::new("read_only", words), words, |b, _| {
            b.iter(|| {
                let mut tx = region.begin(true).unwrap();
                tx.read(start, &mut buf).unwrap();
                black_box(tx.end());
            });
        });
        group.bench_with_input(BenchmarkId::new("read_write", words), words, |b, _| {
            b.iter(|| {
                let mut tx = region.begin(false).unwrap();
                tx.read(start, &mut buf).unwrap();
                black_box(tx.end());
            });
        });
    }

    group.finish();
}

fn bench_write_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_commit");
    let region = Region::create(WORDS * 8, 8).unwrap();
    let start = region.start();

    for words in [1usize, 8, 64, 512].iter() {
        group.throughput(Throughput::Bytes((*words * 8) as u64));
        let payload = vec![0xA5u8; words * 8];
        group.bench_with_input(BenchmarkId::from_parameter(words), words, |b, _| {
            b.iter(|| {
                let mut tx = region.begin(false).unwrap();
                tx.write(&payload, start).unwrap();
                black_box(tx.end());
            });
        });
    }

    group.finish();
}

fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free");
    let region = Region::create(64, 8).unwrap();

    for size in [64usize, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let seg = region.atomically(false, |tx| tx.alloc(size)).unwrap();
                region.atomically(false, |tx| tx.free(seg)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    group.sample_size(20);

    for threads in [2usize, 4, 8].iter() {
        group.throughput(Throughput::Elements(1000 * *threads as u64));

        // Every thread increments the same word.
        group.bench_with_input(BenchmarkId::new("shared_word", threads), threads, |b, &num_threads| {
            b.iter(|| {
                let region = Arc::new(Region::create(64, 8).unwrap());
                let handles: Vec<_> = (0..num_threads)
                    .map(|_| {
                        let region = region.clone();
                        thread::spawn(move || {
                            for _ in 0..1000 {
                                counter_increment(&region, region.start());
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });

        // Every thread increments its own word.
        group.bench_with_input(BenchmarkId::new("disjoint_words", threads), threads, |b, &num_threads| {
            b.iter(|| {
                let region = Arc::new(Region::create(num_threads * 64, 8).unwrap());
                let handles: Vec<_> = (0..num_threads)
                    .map(|tid| {
                        let region = region.clone();
                        thread::spawn(move || {
                            let addr = region.start().byte_add(tid * 64);
                            for _ in 0..1000 {
                                counter_increment(&region, addr);
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_begin_end,
    bench_read,
    bench_write_commit,
    bench_alloc_free,
    bench_contention
);
criterion_main!(benches);
