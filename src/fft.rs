// fft.rs — Batched 2D FFT over a tiled window buffer (CPU reference).
//
// Each window is transformed independently and in place. The 2D DFT is
// separable, so it runs as a row pass followed by a column pass over the
// same buffer; every 1D line is an iterative radix-2 Cooley–Tukey
// transform:
//
//   1. bit-reversal permutation of the W samples
//   2. log2(W) butterfly stages; stage s combines pairs `half = 2^s` apart
//      with twiddle exp(∓2πi·k / 2^(s+1))   (− forward, + inverse)
//   3. inverse only: scale by 1/W
//
// Scaling each 1D inverse by 1/W gives the 1/W² normalisation of the 2D
// inverse, so forward followed by inverse is the identity.
//
// The twiddles are computed in f32 exactly as shaders/fft.wgsl computes
// them, so the CPU and GPU spectra agree to rounding.

use std::f32::consts::PI;

use num_complex::Complex32;
use rayon::prelude::*;

use crate::grid::PassGeometry;
use crate::tiling::TiledBuffer;

/// Transform direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Inverse,
}

impl Direction {
    /// Sign of the twiddle exponent.
    #[inline]
    pub fn sign(self) -> f32 {
        match self {
            Direction::Forward => -1.0,
            Direction::Inverse => 1.0,
        }
    }
}

/// In-place radix-2 FFT of one line.
///
/// # Panics
/// Panics if the length is not a power of two.
pub fn fft_1d(line: &mut [Complex32], dir: Direction) {
    let n = line.len();
    assert!(n.is_power_of_two(), "FFT length {n} is not a power of two");
    if n < 2 {
        return;
    }
    let log2n = n.trailing_zeros();

    // Bit reversal.
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - log2n);
        if j > i {
            line.swap(i, j);
        }
    }

    // Butterflies.
    let sign = dir.sign();
    for s in 0..log2n {
        let half = 1usize << s;
        let span = half << 1;
        for base in (0..n).step_by(span) {
            for k in 0..half {
                let angle = sign * 2.0 * PI * k as f32 / span as f32;
                let tw = Complex32::new(angle.cos(), angle.sin());
                let a = line[base + k];
                let b = tw * line[base + k + half];
                line[base + k] = a + b;
                line[base + k + half] = a - b;
            }
        }
    }

    if dir == Direction::Inverse {
        let scale = 1.0 / n as f32;
        for c in line.iter_mut() {
            *c *= scale;
        }
    }
}

/// 2D FFT of every window in the active region of `tiles`.
pub fn fft_windows(tiles: &mut TiledBuffer, geom: &PassGeometry, dir: Direction) {
    let w = geom.window;
    let tw = tiles.width();

    // One band = one row of windows; bands are independent.
    tiles
        .as_mut_slice()
        .par_chunks_mut(tw * w)
        .for_each(|band| {
            // Row pass: every W-long run of a band row is one window row.
            for row in band.chunks_mut(tw) {
                for line in row.chunks_mut(w) {
                    fft_1d(line, dir);
                }
            }

            // Column pass: gather, transform, scatter.
            let mut scratch = vec![Complex32::new(0.0, 0.0); w];
            for x in 0..tw {
                for (ly, s) in scratch.iter_mut().enumerate() {
                    *s = band[ly * tw + x];
                }
                fft_1d(&mut scratch, dir);
                for (ly, s) in scratch.iter().enumerate() {
                    band[ly * tw + x] = *s;
                }
            }
        });
}

/// 2D FFT of a single W×W row-major window. Used by tests and tools that
/// work on one window at a time.
pub fn fft_2d(window: &mut [Complex32], w: usize, dir: Direction) {
    assert_eq!(window.len(), w * w, "window must be {w}×{w}");
    for line in window.chunks_mut(w) {
        fft_1d(line, dir);
    }
    let mut scratch = vec![Complex32::new(0.0, 0.0); w];
    for x in 0..w {
        for (y, s) in scratch.iter_mut().enumerate() {
            *s = window[y * w + x];
        }
        fft_1d(&mut scratch, dir);
        for (y, s) in scratch.iter().enumerate() {
            window[y * w + x] = *s;
        }
    }
}
