// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Heap allocator benchmarks.
//
// Run with:
//   cargo bench --bench alloc
//
// Groups:
//   alloc_free_small_class — alloc/free round trip at a single size class
//   alloc_free_across_classes — alloc/free cycling through several classes
//   resize_in_place_vs_relocate — growth that stays within a size class vs. one that doesn't

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dxmem::heap::Heap;

const HEAP_SIZE: usize = 256 * 1024 * 1024;

fn bench_alloc_free_small_class(c: &mut Criterion) {
    let heap = Heap::reserve(HEAP_SIZE).unwrap();
    let mut group = c.benchmark_group("alloc_free_small_class");

    for &size in &[16u64, 64, 256, 1024] {
        group.throughput(Throughput::Bytes(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &sz| {
            b.iter(|| {
                let (addr, length) = heap.alloc_chunk(sz).unwrap();
                black_box(addr);
                heap.free_chunk(addr, &length);
            });
        });
    }

    group.finish();
}

fn bench_alloc_free_across_classes(c: &mut Criterion) {
    let heap = Heap::reserve(HEAP_SIZE).unwrap();
    let sizes: Vec<u64> = vec![32, 96, 512, 2048, 8192, 65536];

    c.bench_function("alloc_free_across_classes", |b| {
        b.iter(|| {
            let mut live = Vec::with_capacity(sizes.len());
            for &sz in &sizes {
                live.push(heap.alloc_chunk(sz).unwrap());
            }
            for (addr, length) in live {
                heap.free_chunk(addr, &length);
            }
        });
    });
}

fn bench_resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize_in_place_vs_relocate");

    group.bench_function("in_place_growth_within_class", |b| {
        let heap = Heap::reserve(HEAP_SIZE).unwrap();
        b.iter(|| {
            let (addr, length) = heap.alloc_chunk(100).unwrap();
            let (addr, length) = heap.resize_chunk(addr, &length, 120).unwrap();
            heap.free_chunk(addr, &length);
        });
    });

    group.bench_function("relocating_growth_across_classes", |b| {
        let heap = Heap::reserve(HEAP_SIZE).unwrap();
        b.iter(|| {
            let (addr, length) = heap.alloc_chunk(100).unwrap();
            let (addr, length) = heap.resize_chunk(addr, &length, 50_000).unwrap();
            heap.free_chunk(addr, &length);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_alloc_free_small_class, bench_alloc_free_across_classes, bench_resize);
criterion_main!(benches);
