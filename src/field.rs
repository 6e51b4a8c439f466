// field.rs — Displacement fields and per-pass results.

use crate::grid::PassGeometry;

/// U/V displacement (pixels) on a pass's grid, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    pub cols: usize,
    pub rows: usize,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
}

impl VectorField {
    /// All-zero field.
    pub fn zeros(cols: usize, rows: usize) -> Self {
        VectorField {
            cols,
            rows,
            u: vec![0.0; cols * rows],
            v: vec![0.0; cols * rows],
        }
    }

    /// Field where every point carries the same displacement.
    pub fn uniform(cols: usize, rows: usize, u: f32, v: f32) -> Self {
        VectorField {
            cols,
            rows,
            u: vec![u; cols * rows],
            v: vec![v; cols * rows],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// (U, V) at grid point (row, col).
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> (f32, f32) {
        let i = self.index(row, col);
        (self.u[i], self.v[i])
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, u: f32, v: f32) {
        let i = self.index(row, col);
        self.u[i] = u;
        self.v[i] = v;
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.u.iter().chain(&self.v).all(|c| c.is_finite())
    }

    /// Largest |U| or |V| over the field.
    pub fn max_abs(&self) -> f32 {
        self.u
            .iter()
            .chain(&self.v)
            .fold(0.0f32, |m, c| m.max(c.abs()))
    }
}

/// Everything the result sink needs for one pass of one frame pair.
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Zero-based pass index.
    pub pass: usize,
    pub window: usize,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub field: VectorField,
    /// Points the validator flagged (and repaired where possible).
    pub outliers: usize,
}

impl PassResult {
    pub fn new(pass: usize, geom: &PassGeometry, field: VectorField, outliers: usize) -> Self {
        PassResult {
            pass,
            window: geom.window,
            x: geom.x.clone(),
            y: geom.y.clone(),
            field,
            outliers,
        }
    }

    pub fn cols(&self) -> usize {
        self.field.cols
    }

    pub fn rows(&self) -> usize {
        self.field.rows
    }
}

/// All passes of one frame pair, coarse to fine.
#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    pub passes: Vec<PassResult>,
}

impl FrameResult {
    /// The finest pass, i.e. the final answer.
    pub fn last(&self) -> Option<&PassResult> {
        self.passes.last()
    }
}
