// interp.rs — Bicubic interpolant over a rectilinear grid.
//
// Built once per pass transition from a pass's grid axes and one scalar
// component (U or V). Each grid cell carries a 4×4 coefficient block of a
// bicubic Hermite patch:
//
//   p(t, u) = Σₐ Σ_b c[a][b] · tᵃ · uᵇ,   t, u ∈ [0, 1] across the cell
//
// Node derivatives come from natural cubic splines: ∂/∂x along each grid
// row, ∂/∂y along each grid column, and the cross term ∂²/∂x∂y as the
// y-spline of the x-derivatives. The surface reproduces node values, is
// C¹ across cells and is exact for data linear in x and y.
//
// OUTSIDE THE GRID
// ────────────────
// Queries outside [x_min, x_max] × [y_min, y_max] are clamped onto the
// box, evaluated there, and extended linearly with the edge cell's
// finite-difference gradient:
//
//   f(x, y) = S(cx, cy) + gx·(x − cx) + gy·(y − cy)
//
// gx is the edge-column difference quotient, interpolated linearly between
// the two node rows bounding cy (gy likewise between node columns). At the
// boundary the extension term vanishes, so both branches agree, and the
// extension itself has no jumps along the edge. Bilinear data is
// extrapolated exactly off each side.
//
// Everything is f64: the coefficients, the in-range branch and the
// extrapolation gradient. Results are narrowed to f32 by the callers.
// Evaluation is a fixed loop over a degree-indexed power table; there is
// no recursion.

use crate::error::{PivError, Result};

/// Hermite basis matrix: maps [p0, p1, p0', p1'] to cubic coefficients.
const HERMITE: [[f64; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [-3.0, 3.0, -2.0, -1.0],
    [2.0, -2.0, 1.0, 1.0],
];

/// Bicubic interpolant of one scalar field on a rectilinear grid.
#[derive(Debug, Clone)]
pub struct CubicInterpolant {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Node values, row-major (ys.len() rows × xs.len() cols).
    values: Vec<f64>,
    /// Per-cell coefficient blocks, row-major over cells.
    coeffs: Vec<[[f64; 4]; 4]>,
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

impl CubicInterpolant {
    /// Build from axes and row-major node values.
    ///
    /// Both axes need at least two strictly increasing coordinates.
    pub fn new(xs: &[f64], ys: &[f64], values: &[f32]) -> Result<Self> {
        let (nx, ny) = (xs.len(), ys.len());
        if nx < 2 || ny < 2 {
            return Err(PivError::config(format!(
                "interpolant needs at least 2×2 nodes, got {nx}×{ny}"
            )));
        }
        if values.len() != nx * ny {
            return Err(PivError::config(format!(
                "interpolant expects {} values, got {}",
                nx * ny,
                values.len()
            )));
        }
        if !strictly_increasing(xs) || !strictly_increasing(ys) {
            return Err(PivError::config("interpolant axes must be strictly increasing"));
        }

        let f: Vec<f64> = values.iter().map(|&v| v as f64).collect();

        // ∂f/∂x along every row.
        let mut fx = vec![0.0; nx * ny];
        for i in 0..ny {
            let d = spline_slopes(xs, &f[i * nx..(i + 1) * nx]);
            fx[i * nx..(i + 1) * nx].copy_from_slice(&d);
        }

        // ∂f/∂y and ∂²f/∂x∂y along every column.
        let mut fy = vec![0.0; nx * ny];
        let mut fxy = vec![0.0; nx * ny];
        let mut col = vec![0.0; ny];
        for j in 0..nx {
            for i in 0..ny {
                col[i] = f[i * nx + j];
            }
            for (i, d) in spline_slopes(ys, &col).into_iter().enumerate() {
                fy[i * nx + j] = d;
            }
            for i in 0..ny {
                col[i] = fx[i * nx + j];
            }
            for (i, d) in spline_slopes(ys, &col).into_iter().enumerate() {
                fxy[i * nx + j] = d;
            }
        }

        let (f_s, fx_s, fy_s, fxy_s) = (&f[..], &fx[..], &fy[..], &fxy[..]);
        let mut coeffs = Vec::with_capacity((nx - 1) * (ny - 1));
        for i in 0..ny - 1 {
            let hy = ys[i + 1] - ys[i];
            for j in 0..nx - 1 {
                let hx = xs[j + 1] - xs[j];
                let at = |grid: &[f64], dx: usize, dy: usize| grid[(i + dy) * nx + j + dx];
                // Rows: value/derivative in x at x0, x1. Cols: same in y.
                let g = [
                    [at(f_s, 0, 0), at(f_s, 0, 1), at(fy_s, 0, 0) * hy, at(fy_s, 0, 1) * hy],
                    [at(f_s, 1, 0), at(f_s, 1, 1), at(fy_s, 1, 0) * hy, at(fy_s, 1, 1) * hy],
                    [
                        at(fx_s, 0, 0) * hx,
                        at(fx_s, 0, 1) * hx,
                        at(fxy_s, 0, 0) * hx * hy,
                        at(fxy_s, 0, 1) * hx * hy,
                    ],
                    [
                        at(fx_s, 1, 0) * hx,
                        at(fx_s, 1, 1) * hx,
                        at(fxy_s, 1, 0) * hx * hy,
                        at(fxy_s, 1, 1) * hx * hy,
                    ],
                ];
                coeffs.push(hermite_sandwich(&g));
            }
        }

        Ok(CubicInterpolant {
            x_min: xs[0],
            x_max: xs[nx - 1],
            y_min: ys[0],
            y_max: ys[ny - 1],
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            values: f,
            coeffs,
        })
    }

    /// (x_min, x_max, y_min, y_max) of the node grid.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.x_min, self.x_max, self.y_min, self.y_max)
    }

    /// Evaluate at (x, y); linear extrapolation outside the grid.
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        let cx = x.clamp(self.x_min, self.x_max);
        let cy = y.clamp(self.y_min, self.y_max);
        let j = cell_index(&self.xs, cx);
        let i = cell_index(&self.ys, cy);
        let inside = self.eval_cell(i, j, cx, cy);
        if cx == x && cy == y {
            return inside;
        }

        // Edge slopes are blended across the clamped cell so the extension
        // stays continuous as the query crosses a node row or column.
        let nx = self.xs.len();
        let node = |row: usize, col: usize| self.values[row * nx + col];
        let t = (cx - self.xs[j]) / (self.xs[j + 1] - self.xs[j]);
        let u = (cy - self.ys[i]) / (self.ys[i + 1] - self.ys[i]);
        let mut out = inside;
        if x != cx {
            let j0 = if x < self.x_min { 0 } else { nx - 2 };
            let slope = |row: usize| (node(row, j0 + 1) - node(row, j0)) / (self.xs[j0 + 1] - self.xs[j0]);
            let gx = (1.0 - u) * slope(i) + u * slope(i + 1);
            out += gx * (x - cx);
        }
        if y != cy {
            let i0 = if y < self.y_min { 0 } else { self.ys.len() - 2 };
            let slope = |col: usize| (node(i0 + 1, col) - node(i0, col)) / (self.ys[i0 + 1] - self.ys[i0]);
            let gy = (1.0 - t) * slope(j) + t * slope(j + 1);
            out += gy * (y - cy);
        }
        out
    }

    fn eval_cell(&self, i: usize, j: usize, x: f64, y: f64) -> f64 {
        let t = (x - self.xs[j]) / (self.xs[j + 1] - self.xs[j]);
        let u = (y - self.ys[i]) / (self.ys[i + 1] - self.ys[i]);
        let c = &self.coeffs[i * (self.xs.len() - 1) + j];

        let mut tp = [1.0f64; 4];
        let mut up = [1.0f64; 4];
        for d in 1..4 {
            tp[d] = tp[d - 1] * t;
            up[d] = up[d - 1] * u;
        }
        let mut acc = 0.0;
        for a in 0..4 {
            for b in 0..4 {
                acc += c[a][b] * tp[a] * up[b];
            }
        }
        acc
    }
}

/// Index of the cell [v[k], v[k+1]] containing `x` (clamped to a valid cell).
#[inline]
fn cell_index(v: &[f64], x: f64) -> usize {
    v.partition_point(|&p| p <= x).saturating_sub(1).min(v.len() - 2)
}

fn strictly_increasing(v: &[f64]) -> bool {
    v.windows(2).all(|p| p[1] > p[0])
}

/// H · G · Hᵀ
fn hermite_sandwich(g: &[[f64; 4]; 4]) -> [[f64; 4]; 4] {
    let mut tmp = [[0.0; 4]; 4];
    for r in 0..4 {
        for c in 0..4 {
            tmp[r][c] = (0..4).map(|k| HERMITE[r][k] * g[k][c]).sum();
        }
    }
    let mut out = [[0.0; 4]; 4];
    for r in 0..4 {
        for c in 0..4 {
            out[r][c] = (0..4).map(|k| tmp[r][k] * HERMITE[c][k]).sum();
        }
    }
    out
}

/// First derivatives at the nodes of the natural cubic spline through
/// (xs, f). Two nodes degrade to the straight line.
fn spline_slopes(xs: &[f64], f: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let h: Vec<f64> = xs.windows(2).map(|p| p[1] - p[0]).collect();

    // Second derivatives, M[0] = M[n-1] = 0, tridiagonal solve (Thomas).
    let mut m = vec![0.0; n];
    if n > 2 {
        let k = n - 2;
        let mut diag = vec![0.0; k];
        let mut rhs = vec![0.0; k];
        let mut upper = vec![0.0; k];
        for r in 0..k {
            let i = r + 1;
            diag[r] = 2.0 * (h[i - 1] + h[i]);
            upper[r] = h[i];
            rhs[r] = 6.0 * ((f[i + 1] - f[i]) / h[i] - (f[i] - f[i - 1]) / h[i - 1]);
        }
        for r in 1..k {
            let lower = h[r]; // sub-diagonal of row r is h[i-1] with i = r+1
            let w = lower / diag[r - 1];
            diag[r] -= w * upper[r - 1];
            rhs[r] -= w * rhs[r - 1];
        }
        m[k] = rhs[k - 1] / diag[k - 1];
        for r in (0..k - 1).rev() {
            m[r + 1] = (rhs[r] - upper[r] * m[r + 2]) / diag[r];
        }
    }

    let mut d = vec![0.0; n];
    for i in 0..n - 1 {
        d[i] = (f[i + 1] - f[i]) / h[i] - h[i] * (2.0 * m[i] + m[i + 1]) / 6.0;
    }
    let last = n - 1;
    d[last] = (f[last] - f[last - 1]) / h[last - 1] + h[last - 1] * (m[last - 1] + 2.0 * m[last]) / 6.0;
    d
}
