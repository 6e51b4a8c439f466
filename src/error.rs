// error.rs — Crate-wide error type.
//
// Variants grouped by how the run reacts to them:
//
//   Config        malformed run parameters, or a pass plan that cannot
//                 work on the loaded frame size. Aborts the run.
//   Gpu           device init or buffer-size failures. Aborts the run.
//   Stage         a GPU stage failed on one frame pair; carries the stage
//                 name. The run moves on to the next pair.
//   Io / Image /  reading run files, decoding images, frame pairs that
//   Frame         don't match the configured geometry. Per-frame.
//
// Numerical edge cases (zero-magnitude spectra, degenerate sub-pixel fits,
// empty repair neighborhoods) never surface here. They are recovered
// locally by the stage that hits them.

use thiserror::Error;

use crate::gpu::device::GpuError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PivError>;

/// Errors produced by the PIV engine and its adapters.
#[derive(Error, Debug)]
pub enum PivError {
    /// Missing or invalid run configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure reading a run file or writing results.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding failure.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON run file could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device-level failure outside any particular stage (init, limits).
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// Device failure while a named pipeline stage was running.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: GpuError,
    },

    /// A frame pair that cannot be processed by the configured pipeline.
    #[error("frame error: {0}")]
    Frame(String),
}

impl PivError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        PivError::Config(msg.into())
    }

    /// True for errors that invalidate the whole run, not just one frame.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, PivError::Config(_) | PivError::Gpu(_))
    }
}
