//! FFT window functions with cached coefficients.

use serde::Deserialize;
use std::f32::consts::PI;

/// Window applied to a sample block before the transform to reduce
/// spectral leakage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowFunction {
    /// Rectangular (no weighting)
    None,
    /// Raised cosine, good general-purpose default
    #[default]
    Hann,
    /// Hann variant with reduced first sidelobe
    Hamming,
    /// Three-term cosine sum
    Blackman,
    /// Four-term cosine sum, very low sidelobes
    BlackmanHarris,
    /// sin(pi*x)^k with configurable exponent
    PowerOfSine,
}

impl WindowFunction {
    #[inline]
    fn coefficient(self, i: usize, n: usize, sine_exponent: i32) -> f32 {
        let x = i as f32 / (n - 1) as f32;
        match self {
            WindowFunction::None => 1.0,
            WindowFunction::Hann => 0.5 - 0.5 * (2.0 * PI * x).cos(),
            WindowFunction::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
            WindowFunction::Blackman => {
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            }
            WindowFunction::BlackmanHarris => {
                0.35875 - 0.48829 * (2.0 * PI * x).cos() + 0.14128 * (4.0 * PI * x).cos()
                    - 0.01168 * (6.0 * PI * x).cos()
            }
            WindowFunction::PowerOfSine => (PI * x).sin().powi(sine_exponent.max(1)),
        }
    }
}

/// Precomputed window coefficients and their sum.
///
/// The sum is used to normalize FFT magnitudes so the window choice does
/// not change perceived loudness. Rebuilt only when the governing
/// parameters change.
pub struct WindowCoeffs {
    function: WindowFunction,
    sine_exponent: i32,
    coeffs: Vec<f32>,
    sum: f32,
}

impl WindowCoeffs {
    pub fn new(function: WindowFunction, size: usize, sine_exponent: i32) -> Self {
        assert!(size >= 2, "window size too small: {size}");
        let coeffs: Vec<f32> = (0..size)
            .map(|i| function.coefficient(i, size, sine_exponent))
            .collect();
        let sum = coeffs.iter().sum();
        Self {
            function,
            sine_exponent,
            coeffs,
            sum,
        }
    }

    /// True if the cached table already matches the given parameters.
    #[inline]
    pub fn matches(&self, function: WindowFunction, size: usize, sine_exponent: i32) -> bool {
        self.function == function
            && self.coeffs.len() == size
            && (self.sine_exponent == sine_exponent || function != WindowFunction::PowerOfSine)
    }

    #[inline]
    pub fn coeffs(&self) -> &[f32] {
        &self.coeffs
    }

    #[inline]
    pub fn sum(&self) -> f32 {
        self.sum
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }
}
