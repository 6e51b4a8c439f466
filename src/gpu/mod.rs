// gpu/mod.rs — GPU acceleration layer.
//
// wgpu compute kernels that mirror the CPU correlation stages in the parent
// crate. The CPU implementations remain the authoritative reference; the
// GPU engine is validated against them in the subprocess GPU tests.
//
// Architecture: hybrid CPU/GPU model.
//
//   GPU handles the heavy per-window work WITHIN a pass:
//     tiling/warping → detrend → FFT → cross-power → inverse FFT → peak
//
//   CPU handles orchestration BETWEEN passes:
//     outlier validation → bicubic interpolation → shift map / seed field
//
// The boundary is a readback of U/V after the peak kernel (a few KB), and
// an upload of the shift map before the next pass.

pub mod buffers;
pub mod device;
pub mod kernels;
pub mod piv;
