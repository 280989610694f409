// Tiling and generalization benchmarks over synthetic GPS traces
//
// Run with: cargo bench --package trace-tiles-core --bench tiling

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geo::{Coord, Geometry, LineString};
use trace_tiles_core::generalize::generalize;
use trace_tiles_core::pipeline::TileEngine;
use trace_tiles_core::sink::MemorySink;
use trace_tiles_core::{Attributes, FeatureSet, TileScheme};

const TRACE_COUNT: usize = 500;
const POINTS_PER_TRACE: usize = 400;

/// Wandering traces spread over a 100 km square
fn synthetic_traces() -> FeatureSet {
    let mut features = FeatureSet::new(3857);
    for i in 0..TRACE_COUNT {
        let start_x = (i * 7919 % 90_000) as f64;
        let start_y = (i * 104_729 % 90_000) as f64;
        let coords: Vec<Coord<f64>> = (0..POINTS_PER_TRACE)
            .map(|k| {
                let t = k as f64;
                Coord {
                    x: start_x + t * 20.0 + (t * 0.37 + i as f64).sin() * 35.0,
                    y: start_y + t * 11.0 + (t * 0.23).cos() * 50.0,
                }
            })
            .collect();
        features.push_geometry(
            Geometry::LineString(LineString::new(coords)),
            Attributes::new().with("name", format!("trace {}", i)).with("points", POINTS_PER_TRACE as i64),
        );
    }
    features
}

fn scheme() -> TileScheme {
    TileScheme::new(0.0, 0.0, 256, 400.0, 0, 8).unwrap()
}

fn bench_generalize(c: &mut Criterion) {
    let traces = synthetic_traces();
    let scheme = scheme();

    let mut group = c.benchmark_group("generalize");
    group.throughput(Throughput::Elements(TRACE_COUNT as u64));
    for z in [2, 5, 8] {
        group.bench_with_input(BenchmarkId::new("zoom", z), &z, |b, &z| {
            b.iter(|| black_box(generalize(&traces, scheme.resolution(z), 5).unwrap()))
        });
    }
    group.finish();
}

fn bench_tile_zoom(c: &mut Criterion) {
    let traces = synthetic_traces();
    let scheme = scheme();

    let mut group = c.benchmark_group("tile");
    group.throughput(Throughput::Elements(TRACE_COUNT as u64));
    for z in [2, 5, 8] {
        let generalized = generalize(&traces, scheme.resolution(z), 5).unwrap();
        group.bench_with_input(BenchmarkId::new("zoom", z), &generalized, |b, features| {
            b.iter(|| {
                let sink = MemorySink::new();
                let stats = TileEngine::new(features, &scheme).run(z, &sink).unwrap();
                black_box(stats)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generalize, bench_tile_zoom);
criterion_main!(benches);
