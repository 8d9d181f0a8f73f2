//! Builder Connection Benchmarks
//!
//! Measures the connect phase (block counting, tree connection, layout and
//! verification) on graphs of increasing size.
//!
//! # Benchmark Categories
//!
//! 1. **Deep nesting**: builders appended inside builders, one level each
//! 2. **Wide sequences**: many sibling if/then constructs in one body
//! 3. **Bytecode chains**: worklist-driven bytecode builders with merges

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use cinder_builder::prelude::*;
use cinder_builder::{BuilderConfig, MethodBuilder};
use cinder_il::DataType;

/// Verification on, tracing off.
fn config() -> BuilderConfig {
    BuilderConfig::default()
}

// =============================================================================
// Graph Construction Helpers
// =============================================================================

/// `depth` builders, each appended inside the previous one.
fn deep(depth: usize) -> MethodBuilder {
    let mut mb = MethodBuilder::new("deep", config());
    mb.define_return_type(DataType::Int32);
    let mut parent = mb.root_id();
    for i in 0..depth {
        let child = mb.orphan_builder();
        let mut b = mb.at(child);
        b.const_i32(i as i32);
        mb.at(parent).append_builder(child);
        parent = child;
    }
    let mut root = mb.root();
    let v = root.const_i32(0);
    root.return_value(v);
    mb
}

/// `width` sequential if/then constructs over one parameter.
fn wide(width: usize) -> MethodBuilder {
    let mut mb = MethodBuilder::new("wide", config());
    mb.define_parameter("x", DataType::Int32)
        .define_return_type(DataType::Int32);
    let mut paths = Vec::with_capacity(width);
    {
        let mut b = mb.root();
        for i in 0..width {
            let x = b.load("x").unwrap();
            let bound = b.const_i32(i as i32);
            let above = b.greater_than(x, bound);
            let mut then_path = None;
            b.if_then(&mut then_path, above);
            paths.push(then_path.unwrap());
        }
        let x = b.load("x").unwrap();
        b.return_value(x);
    }
    for path in paths {
        let mut b = mb.at(path);
        let one = b.const_i32(1);
        b.store("hits", one).unwrap();
    }
    mb
}

/// `length` bytecode builders, each branching back to the first.
fn bytecode_chain(length: i32) -> MethodBuilder {
    let mut mb = MethodBuilder::new("chain", config());
    mb.define_parameter("x", DataType::Int32);
    let first = mb.bytecode_builder(0);
    mb.append_bytecode_builder(first);
    while let Some(index) = mb.get_next_bytecode_from_worklist() {
        let current = mb.bytecode_builder(index);
        let mut b = mb.at(current);
        if index + 1 == length {
            b.return_void();
            continue;
        }
        let x = b.load("x").unwrap();
        let mut back = first;
        b.bc_if_cmp_equal_zero(&mut back, x);
        let mut next = b.method().bytecode_builder(index + 1);
        mb.at(current).add_fall_through_builder(&mut next);
    }
    mb
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_connect(c: &mut Criterion) {
    let mut group = c.benchmark_group("connect");

    for &size in &[16usize, 256, 2048] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("deep", size), &size, |b, &size| {
            b.iter_with_setup(|| deep(size), |mb| black_box(mb.finish().unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("wide", size), &size, |b, &size| {
            b.iter_with_setup(|| wide(size), |mb| black_box(mb.finish().unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("bytecode", size), &size, |b, &size| {
            b.iter_with_setup(
                || bytecode_chain(size as i32),
                |mb| black_box(mb.finish().unwrap()),
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_connect);
criterion_main!(benches);
