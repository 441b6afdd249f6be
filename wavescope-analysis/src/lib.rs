//! Audio analysis module for wavescope
//!
//! Provides the lock-free half of the visualization pipeline:
//! windowing, FFT spectrum analysis with temporal smoothing,
//! runtime-dispatched compute kernels, and bin-to-bar band mapping.

mod analyzer;
mod bands;
mod kernel;
mod window;

pub use analyzer::{dbfs, Meter, SpectralAnalyzer, SpectrumFrame, TSmoothingMode, DB_MIN};
pub use bands::{BandMapper, BandMapperConfig, BinModifiers, FilterMode, InterpMode};
pub use kernel::Kernel;
pub use window::{WindowCoeffs, WindowFunction};

/// Linear interpolation between `a` and `b`.
#[inline]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
