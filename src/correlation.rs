// correlation.rs — Phase correlation and peak extraction (CPU reference).
//
// After both tiled buffers are in the frequency domain:
//
//   cross_power()  A ← G(k) · A·conj(B) / |A·conj(B)|      (0 where |·| = 0)
//   inverse FFT    A now holds the phase-correlation surface per window
//   find_peaks()   argmax per window → displacement, accumulated into U/V
//
// SPECTRAL WEIGHT
// ───────────────
// The unit-magnitude cross-power of a pure shift d is the ramp e^(−i k·d),
// whose inverse is a sampled sinc: one neighbour of the peak is negative
// for almost every fractional d, and the log-space fit below cannot run.
// Each bin is therefore weighted by a separable Gaussian
//
//   G(kx, ky) = g(kx)·g(ky),   g(k) = exp(−2π²σ²k²/W²),   k signed
//
// which turns the peak into a sampled Gaussian of σ = PEAK_SIGMA px
// centred on the true displacement. The integer argmax is unchanged, the
// three-point fit becomes exact for a pure shift, and high-frequency bins
// (mostly noise after normalisation) are damped.
//
// PEAK SEARCH
// ───────────
// Two stages, mirroring the work split of shaders/peak.wgsl:
//   1. per column, scan down the rows for the maximum (strict >)
//   2. scan the column maxima for the global maximum (strict >)
// Ties resolve to the lowest index in both stages, which makes the CPU and
// GPU pick the same cell on flat surfaces.
//
// With frame 2 = frame 1 moved by d, the correlation peak sits at index
// −d (mod W). Indices above W/2 are wrapped to negative values and the
// result is negated, so the stored displacement is +d.
//
// SUB-PIXEL
// ─────────
// On the final pass, each axis is refined with a three-point Gaussian fit
// in log space through the peak and its circular neighbours:
//
//   δ = (ln f₋ − ln f₊) / (2 ln f₋ − 4 ln f₀ + 2 ln f₊)
//
// The fit is skipped for an axis when any of the three samples is not
// positive (after adding EPS) or the denominator is degenerate.

use std::f32::consts::PI;

use num_complex::Complex32;
use rayon::prelude::*;

use crate::field::VectorField;
use crate::grid::PassGeometry;
use crate::tiling::TiledBuffer;

/// Added to correlation samples before taking logs.
pub const SUBPIXEL_EPS: f32 = 1e-6;

/// Denominators at or below this magnitude skip the sub-pixel fit.
pub const SUBPIXEL_MIN_DENOM: f32 = 1e-9;

/// Width, in pixels, of the Gaussian correlation peak.
pub const PEAK_SIGMA: f32 = 1.0;

/// Per-axis spectral weights g(k) for the W bins of one window axis.
pub fn spectral_weights(w: usize) -> Vec<f32> {
    let scale = -2.0 * PI * PI * PEAK_SIGMA * PEAK_SIGMA / (w * w) as f32;
    (0..w)
        .map(|i| {
            let k = if i > w / 2 { i as f32 - w as f32 } else { i as f32 };
            (scale * k * k).exp()
        })
        .collect()
}

/// Weighted normalised cross-power spectrum of every window, written into `a`.
pub fn cross_power(a: &mut TiledBuffer, b: &TiledBuffer, w: usize) {
    debug_assert_eq!(a.width(), b.width());
    debug_assert_eq!(a.height(), b.height());
    let g = spectral_weights(w);
    let tw = a.width();
    a.as_mut_slice()
        .par_chunks_mut(tw)
        .zip(b.as_slice().par_chunks(tw))
        .enumerate()
        .for_each(|(ty, (row_a, row_b))| weighted_row(row_a, row_b, &g, g[ty % w]));
}

/// Same as [`cross_power`] for a single W×W window pair.
pub fn cross_power_window(a: &mut [Complex32], b: &[Complex32], w: usize) {
    let g = spectral_weights(w);
    for (ky, (row_a, row_b)) in a.chunks_mut(w).zip(b.chunks(w)).enumerate() {
        weighted_row(row_a, row_b, &g, g[ky]);
    }
}

fn weighted_row(row_a: &mut [Complex32], row_b: &[Complex32], g: &[f32], gy: f32) {
    let w = g.len();
    for (kx, (x, y)) in row_a.iter_mut().zip(row_b).enumerate() {
        *x = normalised_product(*x, *y) * (gy * g[kx % w]);
    }
}

/// A·conj(B) scaled to unit magnitude; zero stays zero.
#[inline]
pub fn normalised_product(a: Complex32, b: Complex32) -> Complex32 {
    let c = a * b.conj();
    let mag = c.norm();
    if mag > 0.0 {
        c / mag
    } else {
        Complex32::new(0.0, 0.0)
    }
}

/// Gaussian three-point offset of the true maximum from the centre sample.
///
/// Returns `None` when the fit is not defined.
pub fn gaussian_offset(minus: f32, centre: f32, plus: f32) -> Option<f32> {
    let (m, c, p) = (minus + SUBPIXEL_EPS, centre + SUBPIXEL_EPS, plus + SUBPIXEL_EPS);
    if m <= 0.0 || c <= 0.0 || p <= 0.0 {
        return None;
    }
    let (lm, lc, lp) = (m.ln(), c.ln(), p.ln());
    let denom = 2.0 * lm - 4.0 * lc + 2.0 * lp;
    if denom.abs() <= SUBPIXEL_MIN_DENOM {
        return None;
    }
    let delta = (lm - lp) / denom;
    delta.is_finite().then_some(delta)
}

/// Displacement (du, dv) encoded by one W×W correlation surface.
///
/// `surface(row, col)` returns the real correlation value.
pub fn locate_peak(w: usize, subpixel: bool, surface: impl Fn(usize, usize) -> f32) -> (f32, f32) {
    // Stage 1: column maxima.
    let mut col_max = vec![f32::NEG_INFINITY; w];
    let mut col_row = vec![0usize; w];
    for col in 0..w {
        for row in 0..w {
            let v = surface(row, col);
            if v > col_max[col] {
                col_max[col] = v;
                col_row[col] = row;
            }
        }
    }

    // Stage 2: global maximum across columns.
    let mut best = f32::NEG_INFINITY;
    let mut best_col = 0usize;
    for (col, &v) in col_max.iter().enumerate() {
        if v > best {
            best = v;
            best_col = col;
        }
    }
    let best_row = col_row[best_col];

    let mut row_f = best_row as f32;
    let mut col_f = best_col as f32;

    if subpixel && best > 0.0 {
        let prev = |i: usize| (i + w - 1) % w;
        let next = |i: usize| (i + 1) % w;
        if let Some(d) = gaussian_offset(
            surface(prev(best_row), best_col),
            best,
            surface(next(best_row), best_col),
        ) {
            row_f += d;
        }
        if let Some(d) = gaussian_offset(
            surface(best_row, prev(best_col)),
            best,
            surface(best_row, next(best_col)),
        ) {
            col_f += d;
        }
    }

    let half = (w / 2) as f32;
    if row_f > half {
        row_f -= w as f32;
    }
    if col_f > half {
        col_f -= w as f32;
    }
    (-col_f, -row_f)
}

/// Locate the peak of every window and add it onto `field`.
pub fn find_peaks(tiles: &TiledBuffer, geom: &PassGeometry, field: &mut VectorField) {
    debug_assert_eq!(field.len(), geom.len());
    let w = geom.window;
    let tw = tiles.width();
    let data = tiles.as_slice();

    let peaks: Vec<(f32, f32)> = (0..geom.len())
        .into_par_iter()
        .map(|idx| {
            let (gy, gx) = (idx / geom.cols, idx % geom.cols);
            let origin = gy * w * tw + gx * w;
            locate_peak(w, geom.subpixel, |row, col| data[origin + row * tw + col].re)
        })
        .collect();

    for (idx, (du, dv)) in peaks.into_iter().enumerate() {
        field.u[idx] += du;
        field.v[idx] += dv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_surface(w: usize, peak_row: f32, peak_col: f32, sigma: f32) -> Vec<f32> {
        let mut s = vec![0.0; w * w];
        for r in 0..w {
            for c in 0..w {
                let dr = r as f32 - peak_row;
                let dc = c as f32 - peak_col;
                s[r * w + c] = (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp();
            }
        }
        s
    }

    #[test]
    fn zero_magnitude_gives_zero() {
        let z = normalised_product(Complex32::new(0.0, 0.0), Complex32::new(3.0, 1.0));
        assert_eq!(z, Complex32::new(0.0, 0.0));
    }

    #[test]
    fn product_has_unit_magnitude() {
        let c = normalised_product(Complex32::new(3.0, -2.0), Complex32::new(0.5, 4.0));
        assert!((c.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn spectral_weights_are_even_in_k() {
        let g = spectral_weights(16);
        assert_eq!(g[0], 1.0);
        for k in 1..8 {
            assert_eq!(g[k], g[16 - k], "k={k}");
            assert!(g[k] < g[k - 1]);
        }
        // σ = 1 px: exp(−π²/2) at Nyquist.
        assert!((g[8] - (-PI * PI / 2.0).exp()).abs() < 1e-6);
    }

    #[test]
    fn weighted_window_of_identical_spectra_is_the_weight() {
        let w = 8;
        let a: Vec<Complex32> = (0..w * w).map(|i| Complex32::new(1.0 + i as f32, 2.0)).collect();
        let mut out = a.clone();
        cross_power_window(&mut out, &a, w);
        let g = spectral_weights(w);
        for (i, c) in out.iter().enumerate() {
            assert!((c.re - g[i / w] * g[i % w]).abs() < 1e-6 && c.im.abs() < 1e-6, "bin {i}");
        }
    }

    #[test]
    fn gaussian_offset_exact_for_gaussian() {
        let f = |x: f32| (-(x - 0.3f32).powi(2) / 2.0).exp();
        let d = gaussian_offset(f(-1.0), f(0.0), f(1.0)).unwrap();
        assert!((d - 0.3).abs() < 1e-4, "{d}");
    }

    #[test]
    fn gaussian_offset_skips_non_positive() {
        assert!(gaussian_offset(-0.5, 1.0, 0.2).is_none());
        // Flat: denominator zero.
        assert!(gaussian_offset(0.5, 0.5, 0.5).is_none());
    }

    #[test]
    fn peak_index_is_recentred_and_negated() {
        let w = 16;
        // Peak at (row 13, col 2) → row −3, col 2 → displacement (−2, +3).
        let s = gaussian_surface(w, 13.0, 2.0, 0.8);
        let (du, dv) = locate_peak(w, false, |r, c| s[r * w + c]);
        assert_eq!((du, dv), (-2.0, 3.0));
    }

    #[test]
    fn index_at_half_is_not_wrapped() {
        let w = 8;
        let mut s = vec![0.0; w * w];
        s[4 * w + 4] = 1.0;
        let (du, dv) = locate_peak(w, false, |r, c| s[r * w + c]);
        assert_eq!((du, dv), (-4.0, -4.0));
    }

    #[test]
    fn flat_surface_resolves_to_origin() {
        let (du, dv) = locate_peak(16, true, |_, _| 0.0);
        assert_eq!((du, dv), (0.0, 0.0));
    }

    #[test]
    fn subpixel_reduces_error() {
        let w = 32;
        // True peak at row 2.35, col 29.6 (= −2.4 after re-centring).
        let s = gaussian_surface(w, 2.35, 29.6, 1.2);
        let truth = (2.4f32, -2.35f32);

        let coarse = locate_peak(w, false, |r, c| s[r * w + c]);
        let fine = locate_peak(w, true, |r, c| s[r * w + c]);

        let err = |e: (f32, f32)| ((e.0 - truth.0).powi(2) + (e.1 - truth.1).powi(2)).sqrt();
        assert!(err(fine) < err(coarse), "fine {fine:?} coarse {coarse:?}");
        assert!(err(fine) < 0.05, "fine {fine:?}");
    }

    #[test]
    fn subpixel_fraction_survives_wrap() {
        let w = 16;
        // Peak just below W/2 + 1 → refined index > W/2 → wraps keeping the fraction.
        let s = gaussian_surface(w, 0.0, 9.3, 1.0);
        let (du, _) = locate_peak(w, true, |r, c| s[r * w + c]);
        assert!((du - (16.0 - 9.3)).abs() < 0.01, "{du}");
    }
}
