// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Operation-layer benchmarks: single-threaded throughput and a contended
// multi-reader/single-writer scenario against one CID.
//
// Run with:
//   cargo bench --bench ops

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dxmem::{DxMem, DxMemConfig};

const HEAP_SIZE: usize = 256 * 1024 * 1024;

fn mem() -> DxMem {
    DxMem::new(DxMemConfig {
        heap_size_bytes: HEAP_SIZE,
        node_id: 1,
        default_lock_timeout_ms: -1,
        defrag_min_free_ratio: 0.25,
    })
    .unwrap()
}

fn bench_create_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_get");

    for &size in &[64usize, 1024, 8192] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("create", size), &size, |b, &sz| {
            let m = mem();
            let data = vec![0x11u8; sz];
            b.iter(|| black_box(m.create(&data).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("get", size), &size, |b, &sz| {
            let m = mem();
            let cid = m.create(&vec![0x22u8; sz]).unwrap();
            b.iter(|| black_box(m.get(cid, -1).unwrap()));
        });
    }

    group.finish();
}

fn bench_put_in_place(c: &mut Criterion) {
    let m = mem();
    let cid = m.create(&vec![0u8; 256]).unwrap();
    let data = vec![0x33u8; 256];

    c.bench_function("put_same_length", |b| {
        b.iter(|| m.put(cid, &data, -1).unwrap());
    });
}

fn bench_contended_get(c: &mut Criterion) {
    let m = Arc::new(mem());
    let cid = m.create(&vec![0u8; 256]).unwrap();

    c.bench_function("contended_readers", |b| {
        b.iter(|| {
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    let m = &m;
                    scope.spawn(move || {
                        black_box(m.get(cid, -1).unwrap());
                    });
                }
            });
        });
    });
}

criterion_group!(benches, bench_create_get, bench_put_in_place, bench_contended_get);
criterion_main!(benches);
