// ripiv: multi-pass phase-correlation PIV
// CPU reference engine plus a wgpu compute engine
//
// Pipeline per pass: tile (warped after pass 0) → detrend → FFT →
// normalised cross-power → inverse FFT → peak → validate → upsample.

pub mod error;
pub mod image;
pub mod frame;
pub mod grid;
pub mod field;
pub mod tiling;        // window extraction, detrend
pub mod fft;           // batched radix-2 FFT
pub mod correlation;   // cross-power, peak search
pub mod interp;        // bicubic field interpolant
pub mod validate;      // outlier detection and repair
pub mod upsample;      // coarse → fine seed field and shift map
pub mod piv;           // pass orchestrator, CPU engine
pub mod filters;
pub mod config;
pub mod io;
pub mod output;
pub mod gpu;
