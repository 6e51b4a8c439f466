// validate.rs — Outlier detection and repair on a pass's vector field.
//
// Two full sweeps over the grid; the second reads flags written by the
// first, so they are never fused:
//
//   flag:    crit = |p − avg₈| / (|avg₈| + ε)    flagged when crit > threshold
//            avg₈ = mean of the up-to-8 immediate neighbours (edges clipped)
//
//   repair:  flagged p ← Σ wₖ pₖ / Σ wₖ   over VALID neighbours within
//            ±radius grid cells, wₖ = 1 / d², d measured in pixels
//            between grid coordinates. No valid neighbour → p unchanged.
//
// The validator keeps no state between passes; flags are rebuilt on every
// call.

use log::debug;
use rayon::prelude::*;

use crate::field::VectorField;
use crate::grid::PassGeometry;

/// Tuning for the outlier test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatorConfig {
    /// Normalised residual above which a vector is an outlier.
    pub threshold: f32,
    /// Added to the neighbour-average magnitude in the residual denominator.
    pub epsilon: f32,
    /// Half-width, in grid cells, of the repair neighbourhood.
    pub repair_radius: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            threshold: 0.1,
            epsilon: 1e-6,
            repair_radius: 4,
        }
    }
}

/// Flags outliers and replaces them by neighbour interpolation.
#[derive(Debug, Clone, Default)]
pub struct VectorValidator {
    config: ValidatorConfig,
}

impl VectorValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        VectorValidator { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Per-point outlier flags, row-major.
    pub fn flag_outliers(&self, field: &VectorField) -> Vec<bool> {
        let (cols, rows) = (field.cols, field.rows);
        let cfg = self.config;
        (0..field.len())
            .into_par_iter()
            .map(|idx| {
                let (r, c) = ((idx / cols) as isize, (idx % cols) as isize);
                let (mut su, mut sv, mut n) = (0.0f32, 0.0f32, 0u32);
                for dr in -1..=1isize {
                    for dc in -1..=1isize {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let (nr, nc) = (r + dr, c + dc);
                        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                            continue;
                        }
                        let k = nr as usize * cols + nc as usize;
                        su += field.u[k];
                        sv += field.v[k];
                        n += 1;
                    }
                }
                if n == 0 {
                    return false;
                }
                let (au, av) = (su / n as f32, sv / n as f32);
                let resid = (field.u[idx] - au).hypot(field.v[idx] - av);
                let crit = resid / (au.hypot(av) + cfg.epsilon);
                crit > cfg.threshold
            })
            .collect()
    }

    /// Overwrite flagged points with the inverse-squared-distance weighted
    /// mean of valid neighbours. Returns the number of points replaced.
    pub fn repair(&self, field: &mut VectorField, flags: &[bool], geom: &PassGeometry) -> usize {
        debug_assert_eq!(flags.len(), field.len());
        let (cols, rows) = (field.cols as isize, field.rows as isize);
        let radius = self.config.repair_radius as isize;
        let snapshot: &VectorField = field;

        let updates: Vec<(usize, f32, f32)> = (0..snapshot.len())
            .into_par_iter()
            .filter(|&idx| flags[idx])
            .filter_map(|idx| {
                let (r, c) = ((idx as isize) / cols, (idx as isize) % cols);
                let (px, py) = (geom.x[idx], geom.y[idx]);
                let (mut wu, mut wv, mut wsum) = (0.0f64, 0.0f64, 0.0f64);
                for nr in (r - radius).max(0)..=(r + radius).min(rows - 1) {
                    for nc in (c - radius).max(0)..=(c + radius).min(cols - 1) {
                        let k = (nr * cols + nc) as usize;
                        if flags[k] {
                            continue;
                        }
                        let dx = (geom.x[k] - px) as f64;
                        let dy = (geom.y[k] - py) as f64;
                        let d2 = dx * dx + dy * dy;
                        if d2 <= 0.0 {
                            continue;
                        }
                        let w = 1.0 / d2;
                        wu += w * snapshot.u[k] as f64;
                        wv += w * snapshot.v[k] as f64;
                        wsum += w;
                    }
                }
                (wsum > 0.0).then(|| (idx, (wu / wsum) as f32, (wv / wsum) as f32))
            })
            .collect();

        let replaced = updates.len();
        for (idx, u, v) in updates {
            field.u[idx] = u;
            field.v[idx] = v;
        }
        replaced
    }

    /// Flag, then repair. Returns the number of flagged points.
    pub fn validate(&self, field: &mut VectorField, geom: &PassGeometry) -> usize {
        let flags = self.flag_outliers(field);
        let flagged = flags.iter().filter(|&&f| f).count();
        let replaced = self.repair(field, &flags, geom);
        debug!("[ripiv] validator: {flagged} flagged, {replaced} replaced");
        flagged
    }
}
