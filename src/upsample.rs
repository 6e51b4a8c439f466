// upsample.rs — Carry a coarse pass's field onto the next, finer pass.
//
// Between passes the validated U/V field is turned into two bicubic
// interpolants (one per component), which are evaluated twice:
//
//   shift_map()  at every frame pixel, rounded to integers
//                → per-pixel warp consumed by warped tiling
//   resample()   at the finer pass's grid points
//                → starting U/V bias that peak extraction accumulates onto

use rayon::prelude::*;

use crate::error::Result;
use crate::field::VectorField;
use crate::grid::PassGeometry;
use crate::interp::CubicInterpolant;
use crate::tiling::ShiftMap;

/// Interpolants for both components of a pass's field.
#[derive(Debug, Clone)]
pub struct FieldInterpolant {
    u: CubicInterpolant,
    v: CubicInterpolant,
}

impl FieldInterpolant {
    pub fn new(geom: &PassGeometry, field: &VectorField) -> Result<Self> {
        Ok(FieldInterpolant {
            u: CubicInterpolant::new(&geom.x_axis, &geom.y_axis, &field.u)?,
            v: CubicInterpolant::new(&geom.x_axis, &geom.y_axis, &field.v)?,
        })
    }

    /// (U, V) at pixel coordinates (x, y).
    #[inline]
    pub fn eval(&self, x: f64, y: f64) -> (f64, f64) {
        (self.u.eval(x, y), self.v.eval(x, y))
    }

    /// Fill `map` with the rounded displacement at every pixel.
    pub fn shift_map(&self, map: &mut ShiftMap) {
        let w = map.width();
        map.as_mut_slice()
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(py, row)| {
                for (px, out) in row.iter_mut().enumerate() {
                    let (u, v) = self.eval(px as f64, py as f64);
                    *out = [round_to_pixel(u), round_to_pixel(v)];
                }
            });
    }

    /// Starting field for the pass described by `geom`.
    pub fn resample(&self, geom: &PassGeometry) -> VectorField {
        let mut field = VectorField::zeros(geom.cols, geom.rows);
        let coords: Vec<(f64, f64)> = geom
            .x
            .iter()
            .zip(&geom.y)
            .map(|(&x, &y)| (x as f64, y as f64))
            .collect();
        let values: Vec<(f64, f64)> = coords
            .par_iter()
            .map(|&(x, y)| self.eval(x, y))
            .collect();
        for (k, (u, v)) in values.into_iter().enumerate() {
            field.u[k] = u as f32;
            field.v[k] = v as f32;
        }
        field
    }
}

/// Nearest integer pixel offset, saturating far outside any sane frame.
#[inline]
fn round_to_pixel(d: f64) -> i32 {
    if d.is_finite() {
        d.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
    } else {
        0
    }
}
