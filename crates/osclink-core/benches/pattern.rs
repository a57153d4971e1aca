//! Pattern matching benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use osclink_core::Pattern;

fn compile_benchmark(c: &mut Criterion) {
    c.bench_function("compile_complex_pattern", |b| {
        b.iter(|| black_box(Pattern::compile("/osc/*/[0-9]?/{enable,disable}")))
    });
}

fn match_benchmark(c: &mut Criterion) {
    let literal = Pattern::compile("/mixer/channel/12/gain");
    let glob = Pattern::compile("/mixer/*/[0-9]?/{gain,pan}");

    c.bench_function("match_literal", |b| {
        b.iter(|| black_box(literal.matches(black_box("/mixer/channel/12/gain"))))
    });

    c.bench_function("match_glob", |b| {
        b.iter(|| black_box(glob.matches(black_box("/mixer/channel/12/pan"))))
    });

    c.bench_function("match_glob_miss", |b| {
        b.iter(|| black_box(glob.matches(black_box("/mixer/channel/12/mute"))))
    });
}

criterion_group!(benches, compile_benchmark, match_benchmark);
criterion_main!(benches);
