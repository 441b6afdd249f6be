//! Pipeline settings: the enumerated options recognized from the host's
//! settings dictionary, with defaults matching a fresh source.
//!
//! Geometry fields (bar/step widths, radial) are recognized and validated
//! here but consumed by the renderer; the pipeline only uses them to size
//! its outputs.

use serde::Deserialize;
use thiserror::Error;
use wavescope_analysis::{FilterMode, InterpMode, TSmoothingMode, WindowFunction};

/// What the source draws, and therefore which tick path runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    #[default]
    Curve,
    Bar,
    SteppedBar,
    Meter,
    SteppedMeter,
    Waveform,
}

impl DisplayMode {
    /// Spectrum modes run the FFT; meter and waveform modes reuse the
    /// buffering and timestamp machinery but skip the transform.
    #[inline]
    pub fn is_spectrum(self) -> bool {
        matches!(self, DisplayMode::Curve | DisplayMode::Bar | DisplayMode::SteppedBar)
    }

    #[inline]
    pub fn is_meter(self) -> bool {
        matches!(self, DisplayMode::Meter | DisplayMode::SteppedMeter)
    }
}

/// How capture channels map to analyzed channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelMode {
    /// Downmix everything to one channel
    #[default]
    Mono,
    /// First two capture channels, analyzed separately
    Stereo,
    /// One selected capture channel
    Single,
}

impl ChannelMode {
    #[inline]
    pub fn output_channels(self) -> usize {
        match self {
            ChannelMode::Stereo => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fft size {0} must be a multiple of 16, at least 64")]
    InvalidFftSize(usize),
    #[error("cutoff range {low}..{high} Hz is empty")]
    InvalidCutoffs { low: f32, high: f32 },
    #[error("dB range {floor}..{ceiling} is empty")]
    InvalidDbRange { floor: f32, ceiling: f32 },
    #[error("bar count must be at least 1")]
    NoBars,
}

/// One settings snapshot. Every field has a default, so a partial
/// dictionary is fine; unknown keys and unknown enum values are errors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Settings {
    pub display_mode: DisplayMode,
    pub channel_mode: ChannelMode,
    /// Capture channel used in single mode
    pub channel: usize,
    /// Render frame rate, used to size the FFT automatically
    pub fps: f32,
    /// Transform size; None derives one from fps and sample rate
    pub fft_size: Option<usize>,
    pub window_function: WindowFunction,
    pub sine_exponent: i32,
    pub interp_mode: InterpMode,
    pub lanczos_radius: usize,
    pub filter_mode: FilterMode,
    pub filter_radius: f32,
    pub tsmoothing: TSmoothingMode,
    pub gravity: f32,
    pub fast_peaks: bool,
    pub cutoff_low: f32,
    pub cutoff_high: f32,
    pub floor: f32,
    pub ceiling: f32,
    /// Spectrum tilt in dB per octave
    pub slope: f32,
    pub log_scale: bool,
    pub num_bars: usize,
    // renderer geometry, passed through untouched
    pub bar_width: u32,
    pub bar_gap: u32,
    pub step_width: u32,
    pub step_gap: u32,
    pub radial: bool,
    pub rolloff_q: f32,
    pub rolloff_rate: f32,
    pub normalize_volume: bool,
    pub volume_target: f32,
    pub max_gain: f32,
    pub rms_window_ms: u32,
    pub meter_ms: u32,
    pub meter_rms: bool,
    pub sync_offset_ms: f32,
    pub hide_on_silent: bool,
    pub ignore_mute: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::default(),
            channel_mode: ChannelMode::default(),
            channel: 0,
            fps: 60.0,
            fft_size: None,
            window_function: WindowFunction::default(),
            sine_exponent: 2,
            interp_mode: InterpMode::default(),
            lanczos_radius: 3,
            filter_mode: FilterMode::default(),
            filter_radius: 1.5,
            tsmoothing: TSmoothingMode::default(),
            gravity: 0.65,
            fast_peaks: false,
            cutoff_low: 30.0,
            cutoff_high: 17500.0,
            floor: -120.0,
            ceiling: 0.0,
            slope: 0.0,
            log_scale: true,
            num_bars: 64,
            bar_width: 4,
            bar_gap: 2,
            step_width: 4,
            step_gap: 2,
            radial: false,
            rolloff_q: 0.0,
            rolloff_rate: 0.0,
            normalize_volume: false,
            volume_target: -3.0,
            max_gain: 30.0,
            rms_window_ms: 500,
            meter_ms: 100,
            meter_rms: false,
            sync_offset_ms: 0.0,
            hide_on_silent: false,
            ignore_mute: false,
        }
    }
}

impl Settings {
    /// Parse a settings dictionary from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(n) = self.fft_size {
            if n < 64 || n % 16 != 0 {
                return Err(SettingsError::InvalidFftSize(n));
            }
        }
        if self.cutoff_low >= self.cutoff_high {
            return Err(SettingsError::InvalidCutoffs {
                low: self.cutoff_low,
                high: self.cutoff_high,
            });
        }
        if self.floor >= self.ceiling {
            return Err(SettingsError::InvalidDbRange {
                floor: self.floor,
                ceiling: self.ceiling,
            });
        }
        if self.num_bars == 0 {
            return Err(SettingsError::NoBars);
        }
        Ok(())
    }

    /// Transform size to use: explicit, or sized so one window spans about
    /// two frames at the configured fps.
    pub fn effective_fft_size(&self, sample_rate: u32) -> usize {
        if let Some(n) = self.fft_size {
            return n;
        }
        let fps = if self.fps > 0.0 { self.fps } else { 60.0 };
        let want = (sample_rate as f32 / fps * 2.0).max(1.0);
        let mut size = 256usize;
        while (size as f32) < want && size < 4096 {
            size *= 2;
        }
        size
    }

    #[inline]
    pub fn sync_offset_ns(&self) -> i64 {
        (self.sync_offset_ms * 1_000_000.0) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn partial_dictionary_takes_defaults() {
        let s = Settings::from_json(r#"{"display-mode": "bar", "num-bars": 32}"#).unwrap();
        assert_eq!(s.display_mode, DisplayMode::Bar);
        assert_eq!(s.num_bars, 32);
        assert_eq!(s.window_function, WindowFunction::Hann);
        assert_eq!(s.gravity, 0.65);
    }

    #[test]
    fn enumerated_options_parse_kebab_case() {
        let s = Settings::from_json(
            r#"{
                "display-mode": "stepped-meter",
                "channel-mode": "single",
                "channel": 1,
                "window-function": "blackman-harris",
                "interp-mode": "catmull-rom",
                "tsmoothing": "tv-exponential",
                "filter-mode": "none"
            }"#,
        )
        .unwrap();
        assert_eq!(s.display_mode, DisplayMode::SteppedMeter);
        assert_eq!(s.channel_mode, ChannelMode::Single);
        assert_eq!(s.window_function, WindowFunction::BlackmanHarris);
        assert_eq!(s.interp_mode, InterpMode::CatmullRom);
        assert_eq!(s.tsmoothing, TSmoothingMode::TvExponential);
        assert_eq!(s.filter_mode, FilterMode::None);
    }

    #[test]
    fn unknown_keys_and_values_are_rejected() {
        assert!(Settings::from_json(r#"{"no-such-option": 1}"#).is_err());
        assert!(Settings::from_json(r#"{"window-function": "kaiser"}"#).is_err());
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let mut s = Settings {
            fft_size: Some(1000),
            ..Default::default()
        };
        assert!(matches!(
            s.validate(),
            Err(SettingsError::InvalidFftSize(1000))
        ));

        s.fft_size = Some(2048);
        s.cutoff_low = 5000.0;
        s.cutoff_high = 100.0;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::InvalidCutoffs { .. })
        ));
    }

    #[test]
    fn auto_fft_size_tracks_fps_and_rate() {
        let s = Settings::default(); // 60 fps
        // 48kHz / 60 * 2 = 1600 -> next power of two
        assert_eq!(s.effective_fft_size(48000), 2048);
        let slow = Settings {
            fps: 10.0,
            ..Default::default()
        };
        // wants 9600 but clamps at 4096
        assert_eq!(slow.effective_fft_size(48000), 4096);
        let explicit = Settings {
            fft_size: Some(512),
            ..Default::default()
        };
        assert_eq!(explicit.effective_fft_size(48000), 512);
    }

    #[test]
    fn display_mode_classification() {
        assert!(DisplayMode::Curve.is_spectrum());
        assert!(DisplayMode::SteppedBar.is_spectrum());
        assert!(DisplayMode::Meter.is_meter());
        assert!(!DisplayMode::Waveform.is_spectrum());
        assert!(!DisplayMode::Waveform.is_meter());
    }
}
