//! Dispatch overhead: genuine `memcpy`/`strlen` versus the validating
//! interceptors with a permissive and with the basic validator.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use memguard_bench::{BenchStats, basic_interceptors, permissive_interceptors};

const SIZES: [usize; 3] = [16, 256, 4096];

fn bench_copy(c: &mut Criterion) {
    let permissive = permissive_interceptors();
    let basic = basic_interceptors();
    let mut group = c.benchmark_group("copy");

    for size in SIZES {
        let src = vec![0xABu8; size];
        let mut dst = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &n| {
            b.iter(|| {
                // SAFETY: both buffers hold `n` bytes.
                unsafe { libc::memcpy(black_box(dst.as_mut_ptr().cast()), black_box(src.as_ptr().cast()), n) }
            });
        });

        let stats = RefCell::new(BenchStats::default());
        group.bench_with_input(BenchmarkId::new("permissive", size), &size, |b, &n| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    // SAFETY: both buffers hold `n` bytes.
                    black_box(unsafe {
                        permissive.copy(black_box(dst.as_mut_ptr().cast()), black_box(src.as_ptr().cast()), n)
                    });
                }
                let dur = start.elapsed().max(Duration::from_nanos(1));
                stats.borrow_mut().record(iters, dur);
                dur
            });
        });
        stats.borrow().report(&format!("copy/permissive/{size}"));

        group.bench_with_input(BenchmarkId::new("basic", size), &size, |b, &n| {
            b.iter(|| {
                // SAFETY: both buffers hold `n` bytes.
                unsafe { basic.copy(black_box(dst.as_mut_ptr().cast()), black_box(src.as_ptr().cast()), n) }
            });
        });
    }
    group.finish();
}

fn bench_length(c: &mut Criterion) {
    let basic = basic_interceptors();
    let mut group = c.benchmark_group("length");

    for size in SIZES {
        let mut text = vec![b'm'; size];
        text.push(0);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, _| {
            // SAFETY: `text` is NUL-terminated.
            b.iter(|| unsafe { libc::strlen(black_box(text.as_ptr().cast())) });
        });
        group.bench_with_input(BenchmarkId::new("basic", size), &size, |b, _| {
            // SAFETY: `text` is NUL-terminated.
            b.iter(|| unsafe { basic.length(black_box(text.as_ptr().cast())) });
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(100))
        .measurement_time(Duration::from_secs(2))
        .sample_size(60);
    targets = bench_copy, bench_length
);
criterion_main!(benches);
