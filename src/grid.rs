// grid.rs — Pass plan and sampling-grid geometry.
//
// A run is a fixed list of passes (window size W, overlap). Given the frame
// size, every pass resolves once into a `PassGeometry`:
//
//   shift = (int)((1 − overlap) · W)           window pitch in pixels
//   cols  = floor((width  − W) / shift)        windows per row
//   rows  = floor((height − W) / shift)        windows per column
//   X[i,j] = W/2 + j·shift,  Y[i,j] = W/2 + i·shift
//
// Window (i, j) reads pixels [j·shift, j·shift + W) × [i·shift, i·shift + W),
// so its centre is (X, Y). The tiled buffer for the pass is
// (cols·W) × (rows·W) samples, window (i, j) occupying the W×W block at
// (j·W, i·W).
//
// All geometry is computed once per run from the first frame; every later
// frame pair must have the same dimensions.

use log::debug;
use serde::Deserialize;

use crate::error::{PivError, Result};

/// User-facing description of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PassSpec {
    pub window: usize,
    pub overlap: f32,
}

impl PassSpec {
    pub fn new(window: usize, overlap: f32) -> Self {
        PassSpec { window, overlap }
    }
}

/// Resolved geometry of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassGeometry {
    /// Window side W (power of two).
    pub window: usize,
    /// Pixel distance between neighbouring window origins.
    pub shift: usize,
    /// Grid columns.
    pub cols: usize,
    /// Grid rows.
    pub rows: usize,
    /// Sub-pixel peak refinement on this pass.
    pub subpixel: bool,
    /// Grid-point x coordinates, row-major (cols × rows).
    pub x: Vec<f32>,
    /// Grid-point y coordinates, row-major (cols × rows).
    pub y: Vec<f32>,
    /// x coordinate of each grid column.
    pub x_axis: Vec<f64>,
    /// y coordinate of each grid row.
    pub y_axis: Vec<f64>,
}

impl PassGeometry {
    fn resolve(spec: PassSpec, width: usize, height: usize, subpixel: bool) -> Result<Self> {
        let w = spec.window;
        if w < 2 || !w.is_power_of_two() {
            return Err(PivError::config(format!(
                "window size {w} must be a power of two >= 2"
            )));
        }
        if !(0.0..1.0).contains(&spec.overlap) {
            return Err(PivError::config(format!(
                "window overlap {} must lie in [0, 1)",
                spec.overlap
            )));
        }
        let shift = ((1.0 - spec.overlap) * w as f32) as usize;
        if shift == 0 {
            return Err(PivError::config(format!(
                "overlap {} leaves no pixel shift for window {w}",
                spec.overlap
            )));
        }
        if w > width || w > height {
            return Err(PivError::config(format!(
                "window {w} does not fit in a {width}×{height} frame"
            )));
        }
        let cols = (width - w) / shift;
        let rows = (height - w) / shift;
        if cols == 0 || rows == 0 {
            return Err(PivError::config(format!(
                "window {w} with shift {shift} yields an empty grid on a {width}×{height} frame"
            )));
        }

        let half = (w / 2) as f64;
        let x_axis: Vec<f64> = (0..cols).map(|j| half + (j * shift) as f64).collect();
        let y_axis: Vec<f64> = (0..rows).map(|i| half + (i * shift) as f64).collect();

        let mut x = Vec::with_capacity(cols * rows);
        let mut y = Vec::with_capacity(cols * rows);
        for &yi in &y_axis {
            for &xj in &x_axis {
                x.push(xj as f32);
                y.push(yi as f32);
            }
        }

        Ok(PassGeometry {
            window: w,
            shift,
            cols,
            rows,
            subpixel,
            x,
            y,
            x_axis,
            y_axis,
        })
    }

    /// Number of grid points (= windows).
    #[inline]
    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tiled buffer width in samples.
    #[inline]
    pub fn tiles_width(&self) -> usize {
        self.cols * self.window
    }

    /// Tiled buffer height in samples.
    #[inline]
    pub fn tiles_height(&self) -> usize {
        self.rows * self.window
    }

    /// Total samples in the tiled buffer.
    #[inline]
    pub fn tiles_len(&self) -> usize {
        self.tiles_width() * self.tiles_height()
    }

    /// Frame pixel at which window (row, col) starts.
    #[inline]
    pub fn window_origin(&self, row: usize, col: usize) -> (usize, usize) {
        (col * self.shift, row * self.shift)
    }
}

/// The resolved pass list for a run: one `PassGeometry` per pass,
/// computed once from the frame size.
///
/// This is the host-side context threaded through the orchestrator; it
/// owns nothing mutable.
#[derive(Debug, Clone)]
pub struct PassPlan {
    frame_width: usize,
    frame_height: usize,
    passes: Vec<PassGeometry>,
}

impl PassPlan {
    /// Resolve `specs` against a frame size. Only the last pass refines to
    /// sub-pixel precision.
    pub fn new(frame_width: usize, frame_height: usize, specs: &[PassSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(PivError::config("at least one pass is required"));
        }
        let last = specs.len() - 1;
        let passes = specs
            .iter()
            .enumerate()
            .map(|(k, &spec)| PassGeometry::resolve(spec, frame_width, frame_height, k == last))
            .collect::<Result<Vec<_>>>()?;

        // The interpolant between passes needs at least two nodes per axis.
        for (k, pass) in passes[..last].iter().enumerate() {
            if pass.cols < 2 || pass.rows < 2 {
                return Err(PivError::config(format!(
                    "pass {k} grid is {}×{}; at least 2×2 is needed to seed the next pass",
                    pass.cols, pass.rows
                )));
            }
        }

        for (k, p) in passes.iter().enumerate() {
            debug!(
                "[ripiv] pass {k}: window {} shift {} grid {}×{}{}",
                p.window,
                p.shift,
                p.cols,
                p.rows,
                if p.subpixel { " (subpixel)" } else { "" }
            );
        }

        Ok(PassPlan {
            frame_width,
            frame_height,
            passes,
        })
    }

    /// Reject windows larger than a device can transform in one work-group.
    pub fn check_window_limit(&self, max_window: usize) -> Result<()> {
        match self.passes.iter().find(|p| p.window > max_window) {
            Some(p) => Err(PivError::config(format!(
                "window size {} exceeds the device limit of {max_window} invocations per work-group",
                p.window
            ))),
            None => Ok(()),
        }
    }

    pub fn passes(&self) -> &[PassGeometry] {
        &self.passes
    }

    pub fn pass(&self, k: usize) -> &PassGeometry {
        &self.passes[k]
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn frame_width(&self) -> usize {
        self.frame_width
    }

    pub fn frame_height(&self) -> usize {
        self.frame_height
    }

    /// Largest tiled buffer over all passes, in samples.
    pub fn max_tiles_len(&self) -> usize {
        self.passes.iter().map(PassGeometry::tiles_len).max().unwrap_or(0)
    }

    /// Largest grid over all passes, in points.
    pub fn max_grid_len(&self) -> usize {
        self.passes.iter().map(PassGeometry::len).max().unwrap_or(0)
    }

    /// Check that a frame matches the geometry this plan was built for.
    pub fn check_frame(&self, width: usize, height: usize) -> Result<()> {
        if width != self.frame_width || height != self.frame_height {
            return Err(PivError::Frame(format!(
                "frame is {width}×{height}, run was configured for {}×{}",
                self.frame_width, self.frame_height
            )));
        }
        Ok(())
    }
}
