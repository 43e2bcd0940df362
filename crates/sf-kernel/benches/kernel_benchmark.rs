use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use sf_core::types::{BandGeometry, PixelGrid, Scene, SceneSource, SourceParams};
use sf_core::{PsfGaussian, PsfMixture, SceneKernel};
use sf_kernel::PatchEvaluator;

fn geometry() -> BandGeometry {
    BandGeometry {
        crval: [0.0, 0.0],
        crpix: [32.0, 32.0],
        dpix_dsky: [[1.0, 0.0], [0.0, 1.0]],
        scale: [[1.0, 0.0], [0.0, 1.0]],
        counts: 40.0,
    }
}

fn make_scene(n_sources: usize) -> Scene {
    // Deterministic pseudo-random-ish placement, cheap to build.
    let psf = PsfMixture::new(vec![
        PsfGaussian { radius: 0.3, ..PsfGaussian::circular(0.55, 1.0) },
        PsfGaussian { x: 0.2, y: -0.1, ..PsfGaussian::circular(0.25, 1.8) },
        PsfGaussian { x: -0.4, y: 0.3, ..PsfGaussian::circular(0.15, 3.1) },
        PsfGaussian { radius: 1.1, ..PsfGaussian::circular(0.05, 5.0) },
    ])
    .unwrap();

    let sources = (0..n_sources)
        .map(|k| SceneSource {
            params: SourceParams {
                ra: ((k * 13) % 48) as f64 - 24.0,
                dec: ((k * 29) % 48) as f64 - 24.0,
                q: 0.6 + 0.01 * (k % 30) as f64,
                pa: 0.1 * k as f64,
                nsersic: 1.0 + 0.05 * (k % 10) as f64,
                rh: 0.2 + 0.02 * (k % 15) as f64,
                fluxes: vec![1.0 + k as f64 * 0.25],
            },
            psf: psf.clone(),
        })
        .collect();
    Scene { sources }
}

fn bench_evaluate_model(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_model");
    let grid = PixelGrid::new(0.0, 0.0, 64, 64).unwrap();

    for n_sources in [1usize, 8, 30] {
        let scene = make_scene(n_sources);
        let serial = PatchEvaluator::new(geometry(), 0);
        group.bench_with_input(BenchmarkId::new("serial", n_sources), &scene, |b, s| {
            b.iter(|| black_box(serial.evaluate_model(s, &grid).unwrap()))
        });
        let parallel = PatchEvaluator::new(geometry(), 0).with_parallel(true);
        group.bench_with_input(BenchmarkId::new("parallel", n_sources), &scene, |b, s| {
            b.iter(|| black_box(parallel.evaluate_model(s, &grid).unwrap()))
        });
    }
    group.finish();
}

fn bench_evaluate_proposal(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_proposal");
    let grid = PixelGrid::new(0.0, 0.0, 64, 64).unwrap();
    let kernel = PatchEvaluator::new(geometry(), 0);

    for n_sources in [8usize, 30] {
        let scene = make_scene(n_sources);
        let data = kernel.evaluate_model(&scene, &grid).unwrap().model;
        let ierr = vec![1.0f32; grid.npix()];
        group.bench_with_input(BenchmarkId::new("serial", n_sources), &scene, |b, s| {
            b.iter(|| black_box(kernel.evaluate_proposal(s, &grid, &data, &ierr).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate_model, bench_evaluate_proposal);
criterion_main!(benches);
