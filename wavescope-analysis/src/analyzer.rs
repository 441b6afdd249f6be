//! FFT spectrum analyzer with temporal smoothing, plus the level meter.
//!
//! One analyzer serves all output channels of a pipeline instance; the
//! per-channel state is the previous-frame magnitude buffer used for
//! smoothing. Input windows are peeked from the capture buffers by the
//! caller, so the analyzer itself is free of locks and allocation per tick.

use crate::kernel::Kernel;
use crate::lerp;
use crate::window::{WindowCoeffs, WindowFunction};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Deserialize;
use std::sync::Arc;

/// dBFS floor substituted for the undefined log of zero.
pub const DB_MIN: f32 = -120.0;

/// Decibels relative to full scale. Clamps to [`DB_MIN`] instead of
/// returning -inf or NaN for non-positive magnitudes.
#[inline]
pub fn dbfs(mag: f32) -> f32 {
    if mag > 0.0 {
        20.0 * mag.log10()
    } else {
        DB_MIN
    }
}

/// Temporal smoothing applied to spectrum magnitudes across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TSmoothingMode {
    /// Passthrough, no history blending
    None,
    /// Fixed-rate EMA, constant independent of frame time
    #[default]
    Exponential,
    /// EMA with decay derived from elapsed seconds, frame-rate independent
    TvExponential,
}

/// One analyzed frame: linear magnitudes and dBFS values, one per bin.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumFrame<'a> {
    pub magnitudes: &'a [f32],
    pub decibels: &'a [f32],
}

/// Real-time FFT spectrum analyzer.
pub struct SpectralAnalyzer {
    fft_size: usize,
    kernel: Kernel,
    fft: Arc<dyn Fft<f32>>,
    window: WindowCoeffs,
    windowed: Vec<f32>,
    fft_buf: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    smooth_bufs: Vec<Vec<f32>>,
    decibels: Vec<Vec<f32>>,
    smoothing: TSmoothingMode,
    gravity: f32,
    fast_peaks: bool,
}

impl SpectralAnalyzer {
    /// `fft_size` must be a multiple of 16 (vector kernels assume it).
    pub fn new(fft_size: usize, channels: usize, kernel: Kernel) -> Self {
        assert!(fft_size >= 32 && fft_size % 16 == 0, "bad fft size: {fft_size}");
        assert!(channels >= 1);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();
        let bins = fft_size / 2;
        Self {
            fft_size,
            kernel,
            fft,
            window: WindowCoeffs::new(WindowFunction::default(), fft_size, 2),
            windowed: vec![0.0; fft_size],
            fft_buf: vec![Complex::new(0.0, 0.0); fft_size],
            fft_scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            magnitudes: vec![0.0; bins],
            smooth_bufs: vec![vec![0.0; bins]; channels],
            decibels: vec![vec![DB_MIN; bins]; channels],
            smoothing: TSmoothingMode::default(),
            gravity: 0.65,
            fast_peaks: false,
        }
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of analyzed bins (half the transform size).
    #[inline]
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.smooth_bufs.len()
    }

    /// Rebuild the window coefficient cache if the parameters changed.
    pub fn set_window(&mut self, function: WindowFunction, sine_exponent: i32) {
        if !self.window.matches(function, self.fft_size, sine_exponent) {
            self.window = WindowCoeffs::new(function, self.fft_size, sine_exponent);
        }
    }

    pub fn set_smoothing(&mut self, mode: TSmoothingMode, gravity: f32, fast_peaks: bool) {
        self.smoothing = mode;
        self.gravity = gravity;
        self.fast_peaks = fast_peaks;
    }

    /// Drop all smoothing history (source change, reconfiguration).
    pub fn reset(&mut self) {
        for buf in &mut self.smooth_bufs {
            buf.fill(0.0);
        }
        for buf in &mut self.decibels {
            buf.fill(DB_MIN);
        }
    }

    /// EMA blend factor for this tick. Zero means no smoothing. Shared by
    /// the spectrum path and the meter ballistics.
    pub fn gravity_coeff(&self, elapsed: f32) -> f32 {
        // Tuned so the default slider value feels the same for both EMA
        // types at 60 FPS.
        const DENOM: f32 = 0.038_689_247;
        if self.smoothing == TSmoothingMode::None || self.gravity <= 0.0 {
            return 0.0;
        }
        match self.smoothing {
            TSmoothingMode::TvExponential => {
                (-elapsed / lerp(0.0, DENOM * 5.0, self.gravity)).exp()
            }
            _ => self.gravity,
        }
    }

    /// Analyze one channel's window of exactly `fft_size` samples.
    ///
    /// `modifiers` is an optional per-bin linear multiplier table (slope and
    /// roll-off compensation, precomputed by the band mapper). The returned
    /// frame borrows the analyzer's internal buffers and is valid until the
    /// next tick.
    pub fn tick_spectrum(
        &mut self,
        channel: usize,
        samples: &[f32],
        elapsed: f32,
        modifiers: Option<&[f32]>,
    ) -> SpectrumFrame<'_> {
        assert_eq!(samples.len(), self.fft_size, "window size mismatch");
        assert!(channel < self.smooth_bufs.len());

        self.kernel
            .window_mul(samples, self.window.coeffs(), &mut self.windowed);
        for (b, &w) in self.fft_buf.iter_mut().zip(&self.windowed) {
            *b = Complex::new(w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buf, &mut self.fft_scratch);

        // Normalize by the window sum so the window choice does not change
        // perceived loudness.
        let scale = 2.0 / self.window.sum();
        let bins = self.fft_size / 2;
        self.kernel
            .magnitudes(&self.fft_buf[..bins], scale, &mut self.magnitudes);

        if let Some(mods) = modifiers {
            self.kernel.mul_assign(&mut self.magnitudes, mods);
        }

        let g = self.gravity_coeff(elapsed);
        if g > 0.0 {
            self.kernel.smooth(
                &mut self.smooth_bufs[channel],
                &mut self.magnitudes,
                g,
                self.fast_peaks,
            );
        } else {
            self.smooth_bufs[channel].copy_from_slice(&self.magnitudes);
        }

        let db = &mut self.decibels[channel];
        for (d, &m) in db.iter_mut().zip(&self.magnitudes) {
            *d = dbfs(m);
        }

        SpectrumFrame {
            magnitudes: &self.magnitudes,
            decibels: &self.decibels[channel],
        }
    }
}

/// Peak or RMS level meter with EMA ballistics, one value per channel.
pub struct Meter {
    ema: Vec<f32>,
    rms: bool,
}

impl Meter {
    pub fn new(channels: usize, rms: bool) -> Self {
        Self {
            ema: vec![0.0; channels],
            rms,
        }
    }

    pub fn set_rms(&mut self, rms: bool) {
        self.rms = rms;
    }

    pub fn reset(&mut self) {
        self.ema.fill(0.0);
    }

    /// Measure one channel's window and return the smoothed level in dBFS.
    /// `g` is the EMA blend factor for this tick (0 disables smoothing);
    /// attack is always immediate so transients register.
    pub fn tick(&mut self, channel: usize, samples: &[f32], g: f32, kernel: Kernel) -> f32 {
        let level = if self.rms {
            (kernel.sum_squares(samples) / samples.len().max(1) as f32).sqrt()
        } else {
            kernel.peak(samples)
        };
        let smoothed = (self.ema[channel] * g + level * (1.0 - g)).max(level);
        self.ema[channel] = smoothed;
        dbfs(smoothed)
    }
}
