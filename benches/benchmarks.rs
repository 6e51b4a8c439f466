// benches/benchmarks.rs -- Per-stage and full-pipeline benchmarks (CPU).
//
// Synthetic benchmarks (always run):
//   cargo bench
//
// With a real run file (first frame pair only):
//   RIPIV_RUN=/path/to/run.txt cargo bench
//
// The run-file benchmark loads the first pair, applies the configured
// pre-filters once, and times the full multi-pass pipeline.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use ripiv::config::RunConfig;
use ripiv::correlation::{cross_power, find_peaks};
use ripiv::fft::{fft_windows, Direction};
use ripiv::field::VectorField;
use ripiv::filters::{self, Filter};
use ripiv::frame::Frame;
use ripiv::grid::{PassPlan, PassSpec};
use ripiv::image::Image;
use ripiv::io::load_frame;
use ripiv::piv::{CpuPiv, PivEngine};
use ripiv::tiling::{detrend, tile_uniform, ShiftMap, TiledBuffer};
use ripiv::upsample::FieldInterpolant;
use ripiv::validate::{ValidatorConfig, VectorValidator};

use std::env;
use std::path::PathBuf;

// ============================================================
// Helpers
// ============================================================

/// Synthetic particle image: Gaussian blobs at LCG positions, moved by
/// (dx, dy).
fn make_particles(w: usize, h: usize, n: usize, dx: f32, dy: f32) -> Image<u8> {
    let mut state: u32 = 0xC0FF_EE11;
    let mut next = || {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (state >> 8) as f32 / (1u32 << 24) as f32
    };
    let mut acc = vec![0.0f32; w * h];
    for _ in 0..n {
        let px = next() * w as f32 + dx;
        let py = next() * h as f32 + dy;
        let (x0, y0) = (px as i64 - 3, py as i64 - 3);
        for y in y0.max(0)..(y0 + 8).min(h as i64) {
            for x in x0.max(0)..(x0 + 8).min(w as i64) {
                let (ex, ey) = (x as f32 - px, y as f32 - py);
                acc[y as usize * w + x as usize] += 200.0 * (-(ex * ex + ey * ey) / 2.0).exp();
            }
        }
    }
    Image::from_vec(w, h, acc.into_iter().map(|v| v.min(255.0) as u8).collect())
}

fn three_pass() -> [PassSpec; 3] {
    [
        PassSpec::new(64, 0.5),
        PassSpec::new(32, 0.5),
        PassSpec::new(16, 0.5),
    ]
}

// ============================================================
// Per-stage benchmarks (synthetic, always runnable)
// ============================================================

fn bench_fft(c: &mut Criterion) {
    let frame = Frame::from_image(make_particles(512, 512, 8000, 0.0, 0.0));

    let mut group = c.benchmark_group("fft");
    for w in [16usize, 32, 64] {
        let plan = PassPlan::new(512, 512, &[PassSpec::new(w, 0.5)]).unwrap();
        let geom = plan.pass(0);
        let mut tiles = TiledBuffer::with_capacity(geom.tiles_len());
        tile_uniform(&frame, geom, &mut tiles);
        group.bench_with_input(BenchmarkId::new("forward_512x512", w), &w, |b, _| {
            b.iter(|| fft_windows(&mut tiles, geom, Direction::Forward))
        });
    }
    group.finish();
}

fn bench_correlate(c: &mut Criterion) {
    let a = Frame::from_image(make_particles(512, 512, 8000, 0.0, 0.0));
    let bf = Frame::from_image(make_particles(512, 512, 8000, 2.0, 1.0));

    let mut group = c.benchmark_group("correlate");
    for w in [16usize, 32, 64] {
        let plan = PassPlan::new(512, 512, &[PassSpec::new(w, 0.5)]).unwrap();
        let geom = plan.pass(0);
        let mut ta = TiledBuffer::with_capacity(geom.tiles_len());
        let mut tb = TiledBuffer::with_capacity(geom.tiles_len());
        let mut field = VectorField::zeros(geom.cols, geom.rows);
        group.bench_with_input(BenchmarkId::new("single_pass_512x512", w), &w, |b, _| {
            b.iter(|| {
                tile_uniform(&a, geom, &mut ta);
                tile_uniform(&bf, geom, &mut tb);
                detrend(&mut ta, geom);
                detrend(&mut tb, geom);
                fft_windows(&mut ta, geom, Direction::Forward);
                fft_windows(&mut tb, geom, Direction::Forward);
                cross_power(&mut ta, &tb, w);
                fft_windows(&mut ta, geom, Direction::Inverse);
                find_peaks(&ta, geom, &mut field);
            })
        });
    }
    group.finish();
}

fn bench_between_passes(c: &mut Criterion) {
    let plan = PassPlan::new(512, 512, &three_pass()).unwrap();
    let coarse = plan.pass(0);
    let mut field = VectorField::uniform(coarse.cols, coarse.rows, 2.0, 1.0);
    field.set(3, 3, 9.0, -4.0);
    let validator = VectorValidator::new(ValidatorConfig::default());

    let mut group = c.benchmark_group("between_passes");
    group.bench_function("validate_64px_grid", |b| {
        b.iter(|| {
            let mut f = field.clone();
            validator.validate(&mut f, coarse)
        })
    });

    let interp = FieldInterpolant::new(coarse, &field).unwrap();
    let mut map = ShiftMap::zeros(512, 512);
    group.bench_function("shift_map_512x512", |b| {
        b.iter(|| interp.shift_map(&mut map))
    });
    group.bench_function("resample_to_32px_grid", |b| {
        b.iter(|| interp.resample(plan.pass(1)))
    });
    group.finish();
}

fn bench_filters(c: &mut Criterion) {
    let frame = Frame::from_image(make_particles(512, 512, 8000, 0.0, 0.0));
    let chains = [
        ("mean_sub_r3", vec![Filter::MeanFilterSubtraction { radius: 3 }]),
        ("gauss_r4", vec![Filter::GaussFilter { radius: 4, sigma: 2.0 }]),
    ];

    let mut group = c.benchmark_group("filters");
    for (name, chain) in &chains {
        group.bench_function(*name, |b| {
            b.iter(|| {
                let mut f = frame.clone();
                filters::apply_all(chain, &mut f);
                f
            })
        });
    }
    group.finish();
}

fn bench_pipeline_synthetic(c: &mut Criterion) {
    let a = Frame::from_image(make_particles(512, 512, 8000, 0.0, 0.0));
    let b = Frame::from_image(make_particles(512, 512, 8000, 2.5, -1.25));
    let plan = PassPlan::new(512, 512, &three_pass()).unwrap();
    let mut engine = CpuPiv::new(plan, ValidatorConfig::default());

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(20);
    group.bench_function("cpu_64_32_16_512x512", |bch| {
        bch.iter(|| engine.process(&a, &b).unwrap())
    });
    group.finish();
}

// ============================================================
// Run-file benchmark (optional, needs RIPIV_RUN env var)
// ============================================================

fn bench_run_file(c: &mut Criterion) {
    let run_path = match env::var("RIPIV_RUN") {
        Ok(p) => PathBuf::from(p),
        Err(_) => {
            eprintln!("RIPIV_RUN not set, skipping run-file benchmark.");
            eprintln!("Set it to run: RIPIV_RUN=/path/to/run.txt cargo bench");
            return;
        }
    };

    let config = RunConfig::load(&run_path)
        .unwrap_or_else(|e| panic!("failed to load {}: {e}", run_path.display()));
    let mut a = load_frame(&config.image_1.path(0).unwrap()).expect("load frame 1");
    let mut b = load_frame(&config.image_2.path(0).unwrap()).expect("load frame 2");
    filters::apply_all(&config.filters, &mut a);
    filters::apply_all(&config.filters, &mut b);
    eprintln!("Run-file benchmark ready: {}x{}, {} passes", a.width(), a.height(), config.passes.len());

    let plan = PassPlan::new(a.width(), a.height(), &config.passes).expect("pass plan");
    let mut engine = CpuPiv::new(plan, ValidatorConfig::default());

    let mut group = c.benchmark_group("run_file");
    group.sample_size(10);
    group.bench_function("cpu_first_pair", |bch| {
        bch.iter(|| engine.process(&a, &b).unwrap())
    });
    group.finish();
}

// ============================================================
// Register
// ============================================================

criterion_group!(
    benches,
    bench_fft,
    bench_correlate,
    bench_between_passes,
    bench_filters,
    bench_pipeline_synthetic,
    bench_run_file,
);
criterion_main!(benches);
