// benches/gpu_benchmarks.rs — GPU engine benchmarks.
//
// Mirrors benchmarks.rs structure. Each GPU benchmark has a CPU reference
// in the same group for direct comparison.
//
// Synthetic benchmarks (always run):
//   cargo bench --bench gpu_benchmarks
//
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including CPU overhead (frame upload, bind
// group creation, submit, poll, U/V readback, host-side validation and
// upsampling). That is the right metric here: every pass blocks on the
// readback before the next one can be seeded.
//
// All kernels are compiled when the engine is built, so the first
// iterations only pay driver-side warmup. We still set warm_up_time
// explicitly to get stable measurements.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use ripiv::frame::Frame;
use ripiv::gpu::device::{DeviceProfile, GpuDevice};
use ripiv::gpu::piv::GpuPiv;
use ripiv::grid::{PassPlan, PassSpec};
use ripiv::image::Image;
use ripiv::piv::{CpuPiv, PivEngine};
use ripiv::validate::ValidatorConfig;

// ============================================================
// Shared helpers
// ============================================================

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

fn pair(size: usize) -> (Frame, Frame) {
    let n = size * size / 32;
    (
        Frame::from_image(make_particles(size, size, n, 0.0, 0.0)),
        Frame::from_image(make_particles(size, size, n, 2.5, -1.25)),
    )
}

// ============================================================
// Single pass: CPU vs GPU, varying window size
// ============================================================

fn bench_single_pass(c: &mut Criterion) {
    let (a, b) = pair(1024);

    let mut group = c.benchmark_group("single_pass");
    group.warm_up_time(Duration::from_secs(2));

    for w in [16usize, 32, 64] {
        let plan = PassPlan::new(1024, 1024, &[PassSpec::new(w, 0.5)]).unwrap();
        let mut cpu = CpuPiv::new(plan.clone(), ValidatorConfig::default());
        let gpu = GpuDevice::new().expect("no Vulkan GPU");
        let mut gpu_engine =
            GpuPiv::new(gpu, plan, ValidatorConfig::default()).expect("GPU engine");

        group.bench_with_input(BenchmarkId::new("cpu_1024x1024", w), &w, |bch, _| {
            bch.iter(|| cpu.process(&a, &b).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("gpu_1024x1024", w), &w, |bch, _| {
            bch.iter(|| gpu_engine.process(&a, &b).unwrap())
        });
    }
    group.finish();
}

// ============================================================
// Full multi-pass pipeline: CPU vs GPU, varying frame size
// ============================================================

fn bench_pipeline(c: &mut Criterion) {
    let specs = [
        PassSpec::new(64, 0.5),
        PassSpec::new(32, 0.5),
        PassSpec::new(16, 0.5),
    ];

    let mut group = c.benchmark_group("pipeline");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(20);

    for size in [512usize, 1024, 2048] {
        let (a, b) = pair(size);
        let plan = PassPlan::new(size, size, &specs).unwrap();
        let mut cpu = CpuPiv::new(plan.clone(), ValidatorConfig::default());
        let gpu = GpuDevice::new().expect("no Vulkan GPU");
        let mut gpu_engine =
            GpuPiv::new(gpu, plan, ValidatorConfig::default()).expect("GPU engine");

        group.bench_with_input(BenchmarkId::new("cpu_64_32_16", size), &size, |bch, _| {
            bch.iter(|| cpu.process(&a, &b).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("gpu_64_32_16", size), &size, |bch, _| {
            bch.iter(|| gpu_engine.process(&a, &b).unwrap())
        });
    }
    group.finish();
}

// ============================================================
// Native vs Embedded limits on the same adapter
// ============================================================

fn bench_profiles(c: &mut Criterion) {
    let (a, b) = pair(1024);
    let specs = [PassSpec::new(32, 0.5), PassSpec::new(16, 0.5)];

    let mut group = c.benchmark_group("profiles");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(20);

    for profile in [DeviceProfile::Native, DeviceProfile::Embedded] {
        let plan = PassPlan::new(1024, 1024, &specs).unwrap();
        let gpu = GpuDevice::new_with_profile(profile).expect("no Vulkan GPU");
        let wg = gpu.workgroup_size;
        let mut engine = GpuPiv::new(gpu, plan, ValidatorConfig::default()).expect("GPU engine");
        let id = format!("{:?}_wg{}x{}", profile, wg.x, wg.y);
        group.bench_function(id, |bch| bch.iter(|| engine.process(&a, &b).unwrap()));
    }
    group.finish();
}

// ============================================================
// Register
// ============================================================

criterion_group!(benches, bench_single_pass, bench_pipeline, bench_profiles);
criterion_main!(benches);
