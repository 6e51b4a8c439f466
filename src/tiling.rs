// tiling.rs — Window extraction into a packed tiled buffer (CPU reference).
//
// Every pass cuts the frame into a grid of W×W windows and packs them into
// one (cols·W) × (rows·W) buffer so that a single batched FFT can process
// all of them:
//
//   frame                               tiled buffer
//   ┌──────────────────┐                ┌────┬────┬────┐
//   │ ┌──┬─┼┬──┐       │   tile_*()     │ 00 │ 01 │ 02 │
//   │ │00│ ││01│ ...  │  ──────────►   ├────┼────┼────┤
//   │ └──┴─┼┴──┘       │                │ 10 │ 11 │ 12 │
//   └──────────────────┘                └────┴────┴────┘
//   (windows overlap by W − shift)      (windows side by side)
//
// Uniform tiling copies block (j·shift, i·shift). Warped tiling moves each
// sample by the integer offset the shift map holds for the sample's
// unwarped pixel; samples that land outside the frame read as zero. The
// GPU kernels in shaders/tiling.wgsl and shaders/detrend.wgsl implement the
// same mapping and are validated against these functions.
//
// NEW RUST CONCEPTS:
// - `par_chunks_mut` (rayon): split a mutable slice into disjoint chunks
//   processed on the thread pool. Each tiled-buffer row (or window band) is
//   owned by exactly one task, so no locking is needed.

use num_complex::Complex32;
use rayon::prelude::*;

use crate::frame::Frame;
use crate::grid::PassGeometry;

// ---------------------------------------------------------------------------
// Shift map
// ---------------------------------------------------------------------------

/// Dense per-pixel integer displacement (dx, dy), frame-sized, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftMap {
    width: usize,
    height: usize,
    offsets: Vec<[i32; 2]>,
}

impl ShiftMap {
    /// All-zero map; warping with it is a no-op.
    pub fn zeros(width: usize, height: usize) -> Self {
        ShiftMap {
            width,
            height,
            offsets: vec![[0, 0]; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, offsets: Vec<[i32; 2]>) -> Self {
        assert_eq!(offsets.len(), width * height, "shift map size mismatch");
        ShiftMap { width, height, offsets }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> [i32; 2] {
        self.offsets[y * self.width + x]
    }

    pub fn as_slice(&self) -> &[[i32; 2]] {
        &self.offsets
    }

    pub fn as_mut_slice(&mut self) -> &mut [[i32; 2]] {
        &mut self.offsets
    }
}

// ---------------------------------------------------------------------------
// Tiled buffer
// ---------------------------------------------------------------------------

/// Packed windows of one pass.
///
/// Allocated once for the largest pass of the run; `resize_for` only moves
/// the logical extent, the backing storage is never shrunk.
#[derive(Debug, Clone)]
pub struct TiledBuffer {
    data: Vec<Complex32>,
    width: usize,
    height: usize,
}

impl TiledBuffer {
    /// Allocate storage for `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        TiledBuffer {
            data: vec![Complex32::new(0.0, 0.0); capacity],
            width: 0,
            height: 0,
        }
    }

    /// Set the logical extent to the given pass's tiled size.
    pub fn resize_for(&mut self, geom: &PassGeometry) {
        let needed = geom.tiles_len();
        if needed > self.data.len() {
            self.data.resize(needed, Complex32::new(0.0, 0.0));
        }
        self.width = geom.tiles_width();
        self.height = geom.tiles_height();
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Allocated capacity in samples.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The active region.
    pub fn as_slice(&self) -> &[Complex32] {
        &self.data[..self.width * self.height]
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex32] {
        let len = self.width * self.height;
        &mut self.data[..len]
    }

    /// Copy window (row, col) out as a W×W row-major vector.
    pub fn window(&self, geom: &PassGeometry, row: usize, col: usize) -> Vec<Complex32> {
        let w = geom.window;
        let mut out = Vec::with_capacity(w * w);
        for ly in 0..w {
            let start = (row * w + ly) * self.width + col * w;
            out.extend_from_slice(&self.data[start..start + w]);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tiling
// ---------------------------------------------------------------------------

/// Copy every window of `geom` from `frame` into `tiles`.
pub fn tile_uniform(frame: &Frame, geom: &PassGeometry, tiles: &mut TiledBuffer) {
    tile_impl(frame, geom, None, tiles);
}

/// Like `tile_uniform`, but each sample is displaced by the shift map entry
/// of its unwarped pixel. Out-of-frame samples become zero.
pub fn tile_warped(frame: &Frame, geom: &PassGeometry, shifts: &ShiftMap, tiles: &mut TiledBuffer) {
    debug_assert_eq!(shifts.width(), frame.width());
    debug_assert_eq!(shifts.height(), frame.height());
    tile_impl(frame, geom, Some(shifts), tiles);
}

fn tile_impl(frame: &Frame, geom: &PassGeometry, shifts: Option<&ShiftMap>, tiles: &mut TiledBuffer) {
    tiles.resize_for(geom);
    let w = geom.window;
    let tw = tiles.width();
    let fw = frame.width() as i64;
    let fh = frame.height() as i64;
    let src = frame.samples();

    tiles
        .as_mut_slice()
        .par_chunks_mut(tw)
        .enumerate()
        .for_each(|(ty, line)| {
            let sy = (ty / w) * geom.shift + ty % w;
            for (tx, out) in line.iter_mut().enumerate() {
                let sx = (tx / w) * geom.shift + tx % w;
                let (px, py) = match shifts {
                    Some(map) => {
                        let [dx, dy] = map.get(sx, sy);
                        (sx as i64 + dx as i64, sy as i64 + dy as i64)
                    }
                    None => (sx as i64, sy as i64),
                };
                *out = if px >= 0 && px < fw && py >= 0 && py < fh {
                    src[(py * fw + px) as usize]
                } else {
                    Complex32::new(0.0, 0.0)
                };
            }
        });
}

/// Write every window back to its frame position.
///
/// Returns a frame-sized buffer; pixels no window covers are zero.
/// Overlapping windows carry identical samples for uniform tiles, so the
/// write order does not matter.
pub fn untile(tiles: &TiledBuffer, geom: &PassGeometry, width: usize, height: usize) -> Vec<Complex32> {
    let mut out = vec![Complex32::new(0.0, 0.0); width * height];
    let w = geom.window;
    let src = tiles.as_slice();
    for ty in 0..tiles.height() {
        let sy = (ty / w) * geom.shift + ty % w;
        for tx in 0..tiles.width() {
            let sx = (tx / w) * geom.shift + tx % w;
            out[sy * width + sx] = src[ty * tiles.width() + tx];
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Detrend
// ---------------------------------------------------------------------------

/// Subtract each window's mean intensity and clamp to non-negative.
///
/// The imaginary part is reset to zero.
pub fn detrend(tiles: &mut TiledBuffer, geom: &PassGeometry) {
    let w = geom.window;
    let tw = tiles.width();
    let n = (w * w) as f64;

    tiles
        .as_mut_slice()
        .par_chunks_mut(tw * w)
        .for_each(|band| {
            for col in 0..geom.cols {
                let x0 = col * w;
                let sum: f64 = (0..w)
                    .flat_map(|ly| band[ly * tw + x0..ly * tw + x0 + w].iter())
                    .map(|c| c.re as f64)
                    .sum();
                let mean = (sum / n) as f32;
                for ly in 0..w {
                    for c in &mut band[ly * tw + x0..ly * tw + x0 + w] {
                        *c = Complex32::new((c.re - mean).max(0.0), 0.0);
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{PassPlan, PassSpec};
    use crate::image::Image;

    fn ramp_frame(w: usize, h: usize) -> Frame {
        Frame::from_image(Image::<u16>::from_fn(w, h, |x, y| (y * w + x) as u16))
    }

    fn plan(w: usize, h: usize, win: usize, overlap: f32) -> PassPlan {
        PassPlan::new(w, h, &[PassSpec::new(win, overlap)]).unwrap()
    }

    #[test]
    fn uniform_window_matches_frame_block() {
        let frame = ramp_frame(64, 48);
        let plan = plan(64, 48, 16, 0.5);
        let geom = plan.pass(0);
        let mut tiles = TiledBuffer::with_capacity(plan.max_tiles_len());
        tile_uniform(&frame, geom, &mut tiles);

        let win = tiles.window(geom, 1, 2);
        let (ox, oy) = geom.window_origin(1, 2);
        for ly in 0..16 {
            for lx in 0..16 {
                assert_eq!(win[ly * 16 + lx].re, frame.intensity(ox + lx, oy + ly));
            }
        }
    }

    #[test]
    fn warped_offsets_sample_position() {
        let frame = ramp_frame(64, 64);
        let plan = plan(64, 64, 16, 0.0);
        let geom = plan.pass(0);
        let mut map = ShiftMap::zeros(64, 64);
        for o in map.as_mut_slice() {
            *o = [2, 1];
        }
        let mut tiles = TiledBuffer::with_capacity(plan.max_tiles_len());
        tile_warped(&frame, geom, &map, &mut tiles);
        let win = tiles.window(geom, 0, 0);
        assert_eq!(win[0].re, frame.intensity(2, 1));
        assert_eq!(win[16 + 3].re, frame.intensity(5, 2));
    }

    #[test]
    fn warped_out_of_frame_reads_zero() {
        let frame = Frame::from_image(Image::<u8>::from_vec(32, 32, vec![9; 32 * 32]));
        let plan = plan(32, 32, 16, 0.5);
        let geom = plan.pass(0);
        let mut map = ShiftMap::zeros(32, 32);
        for o in map.as_mut_slice() {
            *o = [-100, 0];
        }
        let mut tiles = TiledBuffer::with_capacity(plan.max_tiles_len());
        tile_warped(&frame, geom, &map, &mut tiles);
        assert!(tiles.as_slice().iter().all(|c| c.re == 0.0 && c.im == 0.0));
    }

    #[test]
    fn detrend_removes_mean_and_clamps() {
        let frame = ramp_frame(32, 32);
        let plan = plan(32, 32, 16, 0.0);
        let geom = plan.pass(0);
        let mut tiles = TiledBuffer::with_capacity(plan.max_tiles_len());
        tile_uniform(&frame, geom, &mut tiles);
        detrend(&mut tiles, geom);

        let win = tiles.window(geom, 0, 0);
        assert!(win.iter().all(|c| c.re >= 0.0 && c.im == 0.0));
        // Top half of a vertical ramp window sits above its mean.
        assert_eq!(win[0].re, 0.0);
        assert!(win[15 * 16 + 15].re > 0.0);
    }

    #[test]
    fn logical_resize_keeps_capacity() {
        let specs = [PassSpec::new(32, 0.5), PassSpec::new(16, 0.5)];
        let plan = PassPlan::new(128, 128, &specs).unwrap();
        let mut tiles = TiledBuffer::with_capacity(plan.max_tiles_len());
        let cap = tiles.capacity();
        tiles.resize_for(plan.pass(0));
        assert_eq!(tiles.as_slice().len(), plan.pass(0).tiles_len());
        tiles.resize_for(plan.pass(1));
        assert_eq!(tiles.as_slice().len(), plan.pass(1).tiles_len());
        assert_eq!(tiles.capacity(), cap);
    }
}
