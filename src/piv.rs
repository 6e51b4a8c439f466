// piv.rs — Multi-pass orchestration and the CPU reference engine.
//
// Per frame pair, for each pass k (coarse → fine):
//
//   1. tile frame A uniformly; tile frame B uniformly (k = 0) or warped by
//      the shift map the previous pass produced
//   2. detrend every window
//   3. forward FFT of both tiled buffers
//   4. normalised cross-power spectrum with the Gaussian peak weight, in A
//   5. inverse FFT of A
//   6. peak search, accumulated onto the starting field
//   7. outlier validation + repair
//   8. if another pass follows: bicubic interpolant of the field
//      → per-pixel shift map + starting field for pass k+1
//
// Steps 1–6 are the "correlation stages". They are the only part that
// differs between the CPU reference and the GPU engine, so they sit behind
// `CorrelationStages`. Steps 7–8 and the pass sequencing live in
// `PassOrchestrator` and are shared; the GPU engine reads U/V back after
// step 6 anyway, since the result sink needs them on the host.
//
// NEW RUST CONCEPTS:
// - Trait objects (`Box<dyn PivEngine>`) so the binary picks CPU or GPU at
//   runtime.
// - `Option::take()` to move the seeded field out of the loop state.

use std::time::Instant;

use log::{debug, info};

use crate::correlation::{cross_power, find_peaks};
use crate::error::Result;
use crate::fft::{fft_windows, Direction};
use crate::field::{FrameResult, PassResult, VectorField};
use crate::frame::Frame;
use crate::grid::{PassGeometry, PassPlan};
use crate::tiling::{detrend, tile_uniform, tile_warped, ShiftMap, TiledBuffer};
use crate::upsample::FieldInterpolant;
use crate::validate::{ValidatorConfig, VectorValidator};

/// A complete PIV engine: frame pair in, one result per pass out.
pub trait PivEngine {
    /// Short name for logs ("cpu", "gpu").
    fn name(&self) -> &'static str;

    /// The resolved pass list this engine was built for.
    fn plan(&self) -> &PassPlan;

    /// Run every pass on one frame pair.
    fn process(&mut self, frame_a: &Frame, frame_b: &Frame) -> Result<FrameResult>;
}

/// Tiling → FFT → correlation → peak search for one pass.
pub trait CorrelationStages {
    /// Make `frame_a` and `frame_b` the current pair.
    fn load_frames(&mut self, frame_a: &Frame, frame_b: &Frame) -> Result<()>;

    /// Correlate pass `k` and add each window's peak displacement onto
    /// `field`. `warp` is `None` on the first pass.
    fn correlate(
        &mut self,
        k: usize,
        geom: &PassGeometry,
        warp: Option<&ShiftMap>,
        field: &mut VectorField,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Pass sequencing, validation and inter-pass upsampling.
///
/// Holds the run's pass plan and the host-side shift map, which is
/// allocated once and overwritten at every pass transition.
pub struct PassOrchestrator {
    plan: PassPlan,
    validator: VectorValidator,
    shift_map: ShiftMap,
}

impl PassOrchestrator {
    pub fn new(plan: PassPlan, validator: ValidatorConfig) -> Self {
        let shift_map = ShiftMap::zeros(plan.frame_width(), plan.frame_height());
        PassOrchestrator {
            plan,
            validator: VectorValidator::new(validator),
            shift_map,
        }
    }

    pub fn plan(&self) -> &PassPlan {
        &self.plan
    }

    /// Run all passes of one frame pair through `stages`.
    pub fn run<S: CorrelationStages>(
        &mut self,
        stages: &mut S,
        frame_a: &Frame,
        frame_b: &Frame,
    ) -> Result<FrameResult> {
        self.plan.check_frame(frame_a.width(), frame_a.height())?;
        self.plan.check_frame(frame_b.width(), frame_b.height())?;
        stages.load_frames(frame_a, frame_b)?;

        let n_pass = self.plan.len();
        let mut result = FrameResult { passes: Vec::with_capacity(n_pass) };
        let mut seed: Option<VectorField> = None;

        for k in 0..n_pass {
            let started = Instant::now();
            let geom = self.plan.pass(k);

            // Pass 0 always starts from rest.
            let mut field = seed
                .take()
                .unwrap_or_else(|| VectorField::zeros(geom.cols, geom.rows));
            let warp = (k > 0).then_some(&self.shift_map);

            stages.correlate(k, geom, warp, &mut field)?;
            let outliers = self.validator.validate(&mut field, geom);

            if k + 1 < n_pass {
                let interp = FieldInterpolant::new(geom, &field)?;
                interp.shift_map(&mut self.shift_map);
                seed = Some(interp.resample(self.plan.pass(k + 1)));
            }

            debug!(
                "[ripiv] pass {}/{} (W={}, {}×{}): {} outliers, {:.1} ms",
                k + 1,
                n_pass,
                geom.window,
                geom.cols,
                geom.rows,
                outliers,
                started.elapsed().as_secs_f64() * 1e3
            );
            result.passes.push(PassResult::new(k, geom, field, outliers));
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// CPU reference stages
// ---------------------------------------------------------------------------

/// CPU implementation of the correlation stages.
///
/// Owns two tiled buffers sized for the largest pass of the run and
/// reuses them for every pass and frame.
pub struct CpuStages {
    frame_a: Option<Frame>,
    frame_b: Option<Frame>,
    tiles_a: TiledBuffer,
    tiles_b: TiledBuffer,
}

impl CpuStages {
    pub fn new(plan: &PassPlan) -> Self {
        let cap = plan.max_tiles_len();
        CpuStages {
            frame_a: None,
            frame_b: None,
            tiles_a: TiledBuffer::with_capacity(cap),
            tiles_b: TiledBuffer::with_capacity(cap),
        }
    }

    /// The correlation surface of the last pass (real part = correlation).
    pub fn correlation(&self) -> &TiledBuffer {
        &self.tiles_a
    }
}

/// Copy `frame` into `slot`, reusing the slot's sample buffer after the
/// first pair.
fn store(slot: &mut Option<Frame>, frame: &Frame) {
    match slot {
        Some(held) => held.clone_from(frame),
        None => *slot = Some(frame.clone()),
    }
}

impl CorrelationStages for CpuStages {
    fn load_frames(&mut self, frame_a: &Frame, frame_b: &Frame) -> Result<()> {
        store(&mut self.frame_a, frame_a);
        store(&mut self.frame_b, frame_b);
        Ok(())
    }

    fn correlate(
        &mut self,
        _k: usize,
        geom: &PassGeometry,
        warp: Option<&ShiftMap>,
        field: &mut VectorField,
    ) -> Result<()> {
        let (Some(a), Some(b)) = (self.frame_a.as_ref(), self.frame_b.as_ref()) else {
            return Err(crate::error::PivError::Frame("no frame pair loaded".into()));
        };

        tile_uniform(a, geom, &mut self.tiles_a);
        match warp {
            Some(map) => tile_warped(b, geom, map, &mut self.tiles_b),
            None => tile_uniform(b, geom, &mut self.tiles_b),
        }
        detrend(&mut self.tiles_a, geom);
        detrend(&mut self.tiles_b, geom);

        fft_windows(&mut self.tiles_a, geom, Direction::Forward);
        fft_windows(&mut self.tiles_b, geom, Direction::Forward);
        cross_power(&mut self.tiles_a, &self.tiles_b, geom.window);
        fft_windows(&mut self.tiles_a, geom, Direction::Inverse);

        find_peaks(&self.tiles_a, geom, field);
        Ok(())
    }
}

/// The CPU reference PIV engine.
pub struct CpuPiv {
    orchestrator: PassOrchestrator,
    stages: CpuStages,
}

impl CpuPiv {
    pub fn new(plan: PassPlan, validator: ValidatorConfig) -> Self {
        info!(
            "[ripiv] CPU engine: {} passes on {}×{} frames, {} threads",
            plan.len(),
            plan.frame_width(),
            plan.frame_height(),
            rayon::current_num_threads()
        );
        let stages = CpuStages::new(&plan);
        CpuPiv {
            orchestrator: PassOrchestrator::new(plan, validator),
            stages,
        }
    }
}

impl PivEngine for CpuPiv {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn plan(&self) -> &PassPlan {
        self.orchestrator.plan()
    }

    fn process(&mut self, frame_a: &Frame, frame_b: &Frame) -> Result<FrameResult> {
        self.orchestrator.run(&mut self.stages, frame_a, frame_b)
    }
}
