// filters.rs — Optional pre-filters applied to each frame before tiling.
//
// Filters act on the real part of a frame's complex samples, in the order
// they are configured. Every filter is out-of-place: the output never feeds
// back into neighbourhoods still being read.
//
//   MANUAL_STRETCH min max          v' = full·(v − min·full)/((max − min)·full)
//                                   clamped to [0, full]
//   MEAN_FILTER r                   box mean over (2r+1)²
//   MEAN_FILTER_SUBTRACTION r       max(v − box mean, 0)
//   GAUSS_FILTER r σ                Gaussian-weighted mean over (2r+1)²
//   GAUSS_FILTER_SUBTRACTION r σ    max(v − Gaussian mean, 0)
//
// BORDER HANDLING: Skip and renormalise.
// Neighbours outside the image are left out and the weights that remain are
// renormalised. The box and Gaussian weights are products of 1D weights and
// the in-image region is a rectangle, so the 2D filter splits into a row
// pass and a column pass, each normalised by its own in-image weight sum.
//
// NEW RUST CONCEPTS:
// - `impl FromStr` so a filter can be parsed from a config line with
//   `"MEAN_FILTER 2".parse::<Filter>()`.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{PivError, Result};
use crate::frame::Frame;

/// One configured pre-filter.
///
/// Deserialises from its config-line form, e.g. `"GAUSS_FILTER 3 1.5"`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub enum Filter {
    /// Linear range stretch; bounds are fractions of the depth's full scale.
    ManualStretch { min: f32, max: f32 },
    MeanFilter { radius: usize },
    MeanFilterSubtraction { radius: usize },
    GaussFilter { radius: usize, sigma: f32 },
    GaussFilterSubtraction { radius: usize, sigma: f32 },
}

impl Filter {
    /// Parse `NAME arg…` words, as they appear after a `FILTER_i` key.
    pub fn parse(words: &[&str]) -> Result<Self> {
        let (name, args) = words
            .split_first()
            .ok_or_else(|| PivError::config("empty filter definition"))?;

        let int_arg = |i: usize| -> Result<usize> {
            let s = args
                .get(i)
                .ok_or_else(|| PivError::config(format!("{name}: missing argument {}", i + 1)))?;
            s.parse()
                .map_err(|_| PivError::config(format!("{name}: '{s}' is not a radius")))
        };
        let float_arg = |i: usize| -> Result<f32> {
            let s = args
                .get(i)
                .ok_or_else(|| PivError::config(format!("{name}: missing argument {}", i + 1)))?;
            s.parse()
                .map_err(|_| PivError::config(format!("{name}: '{s}' is not a number")))
        };

        let filter = match *name {
            "MANUAL_STRETCH" => {
                let (min, max) = (float_arg(0)?, float_arg(1)?);
                if !(max > min) {
                    return Err(PivError::config(format!(
                        "MANUAL_STRETCH: max {max} must exceed min {min}"
                    )));
                }
                Filter::ManualStretch { min, max }
            }
            "MEAN_FILTER" => Filter::MeanFilter { radius: int_arg(0)? },
            "MEAN_FILTER_SUBTRACTION" => Filter::MeanFilterSubtraction { radius: int_arg(0)? },
            "GAUSS_FILTER" => Filter::GaussFilter {
                radius: int_arg(0)?,
                sigma: positive_sigma(name, float_arg(1)?)?,
            },
            "GAUSS_FILTER_SUBTRACTION" => Filter::GaussFilterSubtraction {
                radius: int_arg(0)?,
                sigma: positive_sigma(name, float_arg(1)?)?,
            },
            other => return Err(PivError::config(format!("unknown filter type '{other}'"))),
        };
        Ok(filter)
    }

    /// Apply to `frame` in place (computed out-of-place internally).
    pub fn apply(&self, frame: &mut Frame) {
        let (w, h) = (frame.width(), frame.height());
        let full = frame.depth().full_scale();
        let values: Vec<f32> = frame.samples().iter().map(|c| c.re).collect();

        let out = match *self {
            Filter::ManualStretch { min, max } => {
                let (lo, hi) = (min * full, max * full);
                values
                    .par_iter()
                    .map(|&v| (full * (v - lo) / (hi - lo)).clamp(0.0, full))
                    .collect()
            }
            Filter::MeanFilter { radius } => smooth(&values, w, h, &box_kernel(radius)),
            Filter::MeanFilterSubtraction { radius } => {
                subtract(&values, &smooth(&values, w, h, &box_kernel(radius)))
            }
            Filter::GaussFilter { radius, sigma } => {
                smooth(&values, w, h, &gauss_kernel(radius, sigma))
            }
            Filter::GaussFilterSubtraction { radius, sigma } => {
                subtract(&values, &smooth(&values, w, h, &gauss_kernel(radius, sigma)))
            }
        };

        for (s, v) in frame.samples_mut().iter_mut().zip(out) {
            s.re = v;
            s.im = 0.0;
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::ManualStretch { min, max } => write!(f, "MANUAL_STRETCH {min} {max}"),
            Filter::MeanFilter { radius } => write!(f, "MEAN_FILTER {radius}"),
            Filter::MeanFilterSubtraction { radius } => {
                write!(f, "MEAN_FILTER_SUBTRACTION {radius}")
            }
            Filter::GaussFilter { radius, sigma } => write!(f, "GAUSS_FILTER {radius} {sigma}"),
            Filter::GaussFilterSubtraction { radius, sigma } => {
                write!(f, "GAUSS_FILTER_SUBTRACTION {radius} {sigma}")
            }
        }
    }
}

impl TryFrom<String> for Filter {
    type Error = PivError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for Filter {
    type Err = PivError;

    fn from_str(s: &str) -> Result<Self> {
        let words: Vec<&str> = s.split_whitespace().collect();
        Filter::parse(&words)
    }
}

/// Run every filter in order.
pub fn apply_all(filters: &[Filter], frame: &mut Frame) {
    for filter in filters {
        filter.apply(frame);
    }
}

fn positive_sigma(name: &str, sigma: f32) -> Result<f32> {
    if sigma > 0.0 && sigma.is_finite() {
        Ok(sigma)
    } else {
        Err(PivError::config(format!("{name}: sigma {sigma} must be positive")))
    }
}

fn box_kernel(radius: usize) -> Vec<f32> {
    vec![1.0; 2 * radius + 1]
}

/// Unnormalised 1D Gaussian taps; normalisation happens per pixel.
fn gauss_kernel(radius: usize, sigma: f32) -> Vec<f32> {
    let r = radius as isize;
    (-r..=r)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect()
}

fn subtract(values: &[f32], background: &[f32]) -> Vec<f32> {
    values
        .par_iter()
        .zip(background.par_iter())
        .map(|(&v, &b)| (v - b).max(0.0))
        .collect()
}

/// Separable weighted mean with skip-and-renormalise borders.
fn smooth(src: &[f32], w: usize, h: usize, kernel: &[f32]) -> Vec<f32> {
    let rows = smooth_rows(src, w, kernel);
    smooth_cols(&rows, w, h, kernel)
}

/// Horizontal pass: one rayon task per row.
fn smooth_rows(src: &[f32], w: usize, kernel: &[f32]) -> Vec<f32> {
    let half = (kernel.len() / 2) as isize;
    let mut dst = vec![0.0f32; src.len()];
    dst.par_chunks_mut(w)
        .zip(src.par_chunks(w))
        .for_each(|(out, row)| {
            for (x, o) in out.iter_mut().enumerate() {
                let (mut acc, mut wsum) = (0.0f32, 0.0f32);
                for (ki, &kv) in kernel.iter().enumerate() {
                    let sx = x as isize + ki as isize - half;
                    if sx < 0 || sx >= w as isize {
                        continue;
                    }
                    acc += row[sx as usize] * kv;
                    wsum += kv;
                }
                *o = acc / wsum;
            }
        });
    dst
}

/// Vertical pass: one rayon task per output row.
fn smooth_cols(src: &[f32], w: usize, h: usize, kernel: &[f32]) -> Vec<f32> {
    let half = (kernel.len() / 2) as isize;
    let mut dst = vec![0.0f32; src.len()];
    dst.par_chunks_mut(w).enumerate().for_each(|(y, out)| {
        let (mut taps, mut wsum) = (Vec::with_capacity(kernel.len()), 0.0f32);
        for (ki, &kv) in kernel.iter().enumerate() {
            let sy = y as isize + ki as isize - half;
            if sy < 0 || sy >= h as isize {
                continue;
            }
            taps.push((sy as usize * w, kv));
            wsum += kv;
        }
        for (x, o) in out.iter_mut().enumerate() {
            let acc: f32 = taps.iter().map(|&(off, kv)| src[off + x] * kv).sum();
            *o = acc / wsum;
        }
    });
    dst
}
