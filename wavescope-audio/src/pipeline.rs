//! Tick-driven analysis pipeline: capture on one side, rendering on the
//! other.
//!
//! The host's capture callback and the render tick run on different
//! threads; everything they both touch (the capture buffers and the
//! normalizer's delay ring) lives behind one mutex in [`CaptureShared`].
//! The tick locks it only long enough to discard consumed audio and peek
//! the analysis windows; the FFT, band mapping, and metering all run on
//! local copies afterwards.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use wavescope_analysis::{
    dbfs, BandMapper, BandMapperConfig, Kernel, Meter, SpectralAnalyzer,
};

use crate::capture::{AudioFrame, CaptureCoordinator, CaptureStatus};
use crate::normalize::VolumeNormalizer;
use crate::settings::{Settings, SettingsError};

/// Something that can re-establish a dropped capture stream. Called from
/// the tick path when the retry backoff elapses; must not block.
pub trait CaptureSource {
    fn reattach(&mut self) -> bool;
}

/// State shared between the capture callback and the tick path.
pub struct CaptureShared {
    coordinator: CaptureCoordinator,
    normalizer: VolumeNormalizer,
}

/// Cloneable handle given to the capture callback.
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Mutex<CaptureShared>>,
}

impl CaptureHandle {
    /// Feed one host frame into the pipeline. The mono mix of the frame
    /// also feeds the normalizer's delay ring so its RMS window stays
    /// sample-aligned with what the tick path will analyze.
    pub fn push_frame(&self, frame: &AudioFrame) {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        if shared.coordinator.push_frame(frame) && shared.normalizer.enabled() {
            let CaptureShared {
                coordinator,
                normalizer,
            } = shared;
            // the mix is already zeroed for muted frames
            normalizer.push_captured(coordinator.mono_mix(), false);
        }
    }
}

/// One tick's render data.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutput {
    /// Band values in dBFS, one inner vec per channel
    Spectrum { bars: Vec<Vec<f32>> },
    /// Smoothed level per channel in dBFS
    Meter { levels_dbfs: Vec<f32> },
    /// Raw analysis windows, one per channel
    Waveform { samples: Vec<Vec<f32>> },
    /// Nothing to draw (no audio yet, or hidden on silence)
    Silent,
}

/// The whole analysis chain for one source, driven by [`Pipeline::tick`].
pub struct Pipeline {
    shared: Arc<Mutex<CaptureShared>>,
    settings: Settings,
    kernel: Kernel,
    sample_rate: u32,
    fft_size: usize,
    analyzer: SpectralAnalyzer,
    bands: BandMapper,
    meter: Meter,
    windows: Vec<Vec<f32>>,
    last_audio_ts: u64,
    last_generation: u64,
    sync_delta: i64,
    last_output: TickOutput,
}

impl Pipeline {
    /// `sample_rate` is the nominal rate; the pipeline adopts the actual
    /// rate reported by capture frames as they arrive.
    pub fn new(settings: Settings, sample_rate: u32) -> Result<Self, SettingsError> {
        settings.validate()?;
        let kernel = Kernel::detect();
        debug!(kernel = kernel.name(), "compute kernel selected");

        let sample_rate = sample_rate.max(1);
        let channels = settings.channel_mode.output_channels();
        let fft_size = settings.effective_fft_size(sample_rate);
        let window_len = Self::window_len_for(&settings, sample_rate, fft_size);

        let mut analyzer = SpectralAnalyzer::new(fft_size, channels, kernel);
        analyzer.set_window(settings.window_function, settings.sine_exponent);
        analyzer.set_smoothing(settings.tsmoothing, settings.gravity, settings.fast_peaks);

        let bands = BandMapper::new(Self::band_config_for(&settings, sample_rate, fft_size));
        let meter = Meter::new(channels, settings.meter_rms);

        let coordinator = CaptureCoordinator::new(
            settings.channel_mode,
            settings.channel,
            settings.ignore_mute,
            window_len,
        );
        let normalizer = VolumeNormalizer::new(
            Self::rms_samples_for(&settings, sample_rate),
            settings.volume_target,
            settings.max_gain,
            settings.normalize_volume,
        );
        let last_generation = coordinator.generation();

        Ok(Self {
            shared: Arc::new(Mutex::new(CaptureShared {
                coordinator,
                normalizer,
            })),
            settings,
            kernel,
            sample_rate,
            fft_size,
            analyzer,
            bands,
            meter,
            windows: vec![vec![0.0; window_len]; channels],
            last_audio_ts: 0,
            last_generation,
            sync_delta: 0,
            last_output: TickOutput::Silent,
        })
    }

    /// Handle to hand the host's capture callback.
    pub fn capture_handle(&self) -> CaptureHandle {
        CaptureHandle {
            shared: self.shared.clone(),
        }
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Audio-to-render clock delta from the most recent tick, in ns.
    #[inline]
    pub fn sync_delta_ns(&self) -> i64 {
        self.sync_delta
    }

    pub fn is_lost(&self) -> bool {
        self.shared.lock().coordinator.is_lost()
    }

    pub fn retries(&self) -> u32 {
        self.shared.lock().coordinator.retries()
    }

    /// Apply a new settings snapshot. Changes to the channel layout or
    /// window sizing rebuild the whole chain; everything else updates in
    /// place without dropping buffered audio.
    pub fn update(&mut self, settings: Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        if settings == self.settings {
            return Ok(());
        }
        let fft_size = settings.effective_fft_size(self.sample_rate);
        let window_len = Self::window_len_for(&settings, self.sample_rate, fft_size);
        let rebuild = settings.channel_mode != self.settings.channel_mode
            || settings.channel != self.settings.channel
            || settings.ignore_mute != self.settings.ignore_mute
            || fft_size != self.fft_size
            || window_len != self.window_len();
        self.settings = settings;
        if rebuild {
            self.rebuild();
            return Ok(());
        }

        self.analyzer
            .set_window(self.settings.window_function, self.settings.sine_exponent);
        self.analyzer.set_smoothing(
            self.settings.tsmoothing,
            self.settings.gravity,
            self.settings.fast_peaks,
        );
        self.bands
            .update(Self::band_config_for(&self.settings, self.sample_rate, self.fft_size));
        self.meter.set_rms(self.settings.meter_rms);

        let mut shared = self.shared.lock();
        shared.normalizer.configure(
            Self::rms_samples_for(&self.settings, self.sample_rate),
            self.settings.volume_target,
            self.settings.max_gain,
            self.settings.normalize_volume,
        );
        Ok(())
    }

    /// Advance the pipeline by one render frame.
    ///
    /// `now_ns` is the render clock, on the same timebase as the frame
    /// timestamps; `elapsed` is seconds since the previous tick. `source`
    /// is consulted when capture has been lost and a retry is due.
    pub fn tick(
        &mut self,
        now_ns: u64,
        elapsed: f32,
        mut source: Option<&mut dyn CaptureSource>,
    ) -> TickOutput {
        let needed = self.window_len();
        let gain;
        {
            let mut guard = self.shared.lock();

            let rate = guard.coordinator.sample_rate();
            if rate != 0 && rate != self.sample_rate {
                drop(guard);
                debug!(sample_rate = rate, "capture rate changed, rebuilding");
                self.sample_rate = rate;
                self.rebuild();
                return self.last_output.clone();
            }

            let shared = &mut *guard;
            if shared.coordinator.check(now_ns, elapsed) == CaptureStatus::RetryDue {
                if let Some(src) = source.as_mut() {
                    debug!(attempt = shared.coordinator.retries(), "retrying capture");
                    if src.reattach() {
                        info!("capture source reattached");
                        // dump whatever the dead stream left behind; loss
                        // clears once frames actually arrive
                        shared.coordinator.reset();
                    }
                }
            }

            if shared.coordinator.generation() != self.last_generation {
                self.last_generation = shared.coordinator.generation();
                self.analyzer.reset();
                self.meter.reset();
                shared.normalizer.reset();
                self.last_audio_ts = 0;
            }

            self.sync_delta = shared
                .coordinator
                .audio_sync(now_ns, self.settings.sync_offset_ns());

            let audio_ts = shared.coordinator.audio_ts();
            if audio_ts == 0 || audio_ts == self.last_audio_ts {
                // no new audio since the previous tick
                return self.last_output.clone();
            }
            self.last_audio_ts = audio_ts;

            let available = shared.coordinator.available();
            if available < needed {
                return self.last_output.clone();
            }
            let excess = available - needed;
            if excess > 0 {
                shared.coordinator.discard(excess);
                shared.normalizer.advance(excess);
            }
            for (ch, window) in self.windows.iter_mut().enumerate() {
                shared.coordinator.peek_window(ch, window);
            }
            gain = shared.normalizer.gain();
        }

        // silence is judged on the raw signal, before normalization
        let raw_peak = self
            .windows
            .iter()
            .map(|w| self.kernel.peak(w))
            .fold(0.0f32, f32::max);
        if gain != 1.0 {
            for window in &mut self.windows {
                self.kernel.scale(window, gain);
            }
        }
        if self.settings.hide_on_silent && dbfs(raw_peak) <= self.settings.floor {
            self.last_output = TickOutput::Silent;
            return TickOutput::Silent;
        }

        let channels = self.windows.len();
        let out = if self.settings.display_mode.is_spectrum() {
            let mut bars = Vec::with_capacity(channels);
            for ch in 0..channels {
                let frame = self.analyzer.tick_spectrum(
                    ch,
                    &self.windows[ch],
                    elapsed,
                    self.bands.modifiers(),
                );
                bars.push(self.bands.map(frame.decibels).to_vec());
            }
            TickOutput::Spectrum { bars }
        } else if self.settings.display_mode.is_meter() {
            let g = self.analyzer.gravity_coeff(elapsed);
            let levels = (0..channels)
                .map(|ch| self.meter.tick(ch, &self.windows[ch], g, self.kernel))
                .collect();
            TickOutput::Meter { levels_dbfs: levels }
        } else {
            TickOutput::Waveform {
                samples: self.windows.clone(),
            }
        };
        self.last_output = out.clone();
        out
    }

    #[inline]
    fn window_len(&self) -> usize {
        self.windows.first().map_or(0, Vec::len)
    }

    fn window_len_for(settings: &Settings, sample_rate: u32, fft_size: usize) -> usize {
        if settings.display_mode.is_meter() {
            ((sample_rate as u64 * settings.meter_ms as u64) / 1000).max(16) as usize
        } else {
            fft_size
        }
    }

    fn rms_samples_for(settings: &Settings, sample_rate: u32) -> usize {
        ((sample_rate as u64 * settings.rms_window_ms as u64) / 1000).max(1) as usize
    }

    fn band_config_for(s: &Settings, sample_rate: u32, fft_size: usize) -> BandMapperConfig {
        BandMapperConfig {
            num_bars: s.num_bars,
            fft_size,
            sample_rate,
            cutoff_low: s.cutoff_low,
            cutoff_high: s.cutoff_high,
            log_scale: s.log_scale,
            interp: s.interp_mode,
            lanczos_radius: s.lanczos_radius,
            filter: s.filter_mode,
            filter_radius: s.filter_radius,
            slope: s.slope,
            rolloff_q: s.rolloff_q,
            rolloff_rate: s.rolloff_rate,
        }
    }

    /// Rebuild the analysis chain and reset capture state. Used when the
    /// channel layout, transform size, or sample rate changes.
    fn rebuild(&mut self) {
        let channels = self.settings.channel_mode.output_channels();
        self.fft_size = self.settings.effective_fft_size(self.sample_rate);
        let window_len = Self::window_len_for(&self.settings, self.sample_rate, self.fft_size);

        self.analyzer = SpectralAnalyzer::new(self.fft_size, channels, self.kernel);
        self.analyzer
            .set_window(self.settings.window_function, self.settings.sine_exponent);
        self.analyzer.set_smoothing(
            self.settings.tsmoothing,
            self.settings.gravity,
            self.settings.fast_peaks,
        );
        self.bands
            .update(Self::band_config_for(&self.settings, self.sample_rate, self.fft_size));
        self.meter = Meter::new(channels, self.settings.meter_rms);
        self.windows = vec![vec![0.0; window_len]; channels];
        self.last_audio_ts = 0;

        let mut shared = self.shared.lock();
        shared.coordinator.configure(
            self.settings.channel_mode,
            self.settings.channel,
            self.settings.ignore_mute,
            window_len,
        );
        shared.normalizer.configure(
            Self::rms_samples_for(&self.settings, self.sample_rate),
            self.settings.volume_target,
            self.settings.max_gain,
            self.settings.normalize_volume,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ChannelMode, DisplayMode};
    use std::f32::consts::PI;
    use wavescope_analysis::{FilterMode, TSmoothingMode, WindowFunction};

    const SR: u32 = 48000;

    fn ns(ms: u64) -> u64 {
        ms * 1_000_000
    }

    fn sine(len: usize, freq: f32, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn push(pipeline: &Pipeline, samples: &[f32], ts: u64) {
        pipeline.capture_handle().push_frame(&AudioFrame {
            channels: &[samples],
            sample_rate: SR,
            timestamp_ns: ts,
            muted: false,
        });
    }

    fn spectrum_settings() -> Settings {
        Settings {
            display_mode: DisplayMode::Curve,
            channel_mode: ChannelMode::Mono,
            fft_size: Some(512),
            window_function: WindowFunction::None,
            tsmoothing: TSmoothingMode::None,
            filter_mode: FilterMode::None,
            num_bars: 32,
            ..Default::default()
        }
    }

    struct StubSource {
        attempts: usize,
        succeed: bool,
    }

    impl CaptureSource for StubSource {
        fn reattach(&mut self) -> bool {
            self.attempts += 1;
            self.succeed
        }
    }

    #[test]
    fn silent_until_audio_arrives() {
        let mut p = Pipeline::new(spectrum_settings(), SR).unwrap();
        assert_eq!(p.tick(ns(16), 0.016, None), TickOutput::Silent);
        assert_eq!(p.tick(ns(32), 0.016, None), TickOutput::Silent);
    }

    #[test]
    fn tone_shows_up_in_one_band() {
        let mut p = Pipeline::new(spectrum_settings(), SR).unwrap();
        // 1500 Hz is exactly 16 cycles per 512-sample window
        let samples = sine(1024, 1500.0, 0.5);
        push(&p, &samples, 0);

        let now = (1024u64 * 1_000_000_000) / SR as u64;
        let out = p.tick(now, 0.016, None);
        let TickOutput::Spectrum { bars } = out else {
            panic!("expected spectrum, got {out:?}");
        };
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].len(), 32);

        let max = bars[0].iter().cloned().fold(f32::MIN, f32::max);
        // the tone band sits at the signal amplitude (-6 dBFS)
        assert!((max - dbfs(0.5)).abs() < 1.5, "max bar {max}");
        // nearly everything else is at the floor
        let quiet = bars[0].iter().filter(|&&b| b < -100.0).count();
        assert!(quiet >= 20, "only {quiet} quiet bars");
    }

    #[test]
    fn tick_without_new_audio_repeats_last_output() {
        let mut p = Pipeline::new(spectrum_settings(), SR).unwrap();
        let samples = sine(1024, 1500.0, 0.5);
        push(&p, &samples, 0);

        let now = (1024u64 * 1_000_000_000) / SR as u64;
        let first = p.tick(now, 0.016, None);
        let second = p.tick(now + ns(16), 0.016, None);
        assert_eq!(first, second);
    }

    #[test]
    fn hide_on_silent_suppresses_output() {
        let settings = Settings {
            hide_on_silent: true,
            floor: -60.0,
            ceiling: 0.0,
            ..spectrum_settings()
        };
        let mut p = Pipeline::new(settings, SR).unwrap();
        push(&p, &vec![0.0f32; 1024], 0);
        let now = (1024u64 * 1_000_000_000) / SR as u64;
        assert_eq!(p.tick(now, 0.016, None), TickOutput::Silent);
    }

    #[test]
    fn meter_with_normalization_lands_on_target() {
        let settings = Settings {
            display_mode: DisplayMode::Meter,
            meter_rms: true,
            meter_ms: 100,
            tsmoothing: TSmoothingMode::None,
            normalize_volume: true,
            volume_target: -3.0,
            max_gain: 30.0,
            rms_window_ms: 100,
            ..Default::default()
        };
        let mut p = Pipeline::new(settings, SR).unwrap();
        // 300 ms of a quiet constant; RMS sits at -26 dBFS
        push(&p, &vec![0.05f32; 14400], 0);

        let now = (14400u64 * 1_000_000_000) / SR as u64;
        let out = p.tick(now, 0.016, None);
        let TickOutput::Meter { levels_dbfs } = out else {
            panic!("expected meter, got {out:?}");
        };
        assert_eq!(levels_dbfs.len(), 1);
        assert!(
            (levels_dbfs[0] + 3.0).abs() < 0.1,
            "level {}",
            levels_dbfs[0]
        );
    }

    #[test]
    fn waveform_mode_returns_the_window() {
        let settings = Settings {
            display_mode: DisplayMode::Waveform,
            ..spectrum_settings()
        };
        let mut p = Pipeline::new(settings, SR).unwrap();
        push(&p, &vec![0.25f32; 1024], 0);
        let now = (1024u64 * 1_000_000_000) / SR as u64;
        let TickOutput::Waveform { samples } = p.tick(now, 0.016, None) else {
            panic!("expected waveform");
        };
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].len(), 512);
        assert!(samples[0].iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn capture_loss_drives_retries_until_frames_resume() {
        let mut p = Pipeline::new(spectrum_settings(), SR).unwrap();
        let mut source = StubSource {
            attempts: 0,
            succeed: false,
        };
        push(&p, &sine(480, 1500.0, 0.5), 0);
        let stall = ns(700);

        // each 2 s of elapsed tick time past the timeout is one attempt
        for _ in 0..3 {
            p.tick(stall, 2.0, Some(&mut source));
        }
        assert_eq!(source.attempts, 3);
        assert_eq!(p.retries(), 3);
        assert!(p.is_lost());

        // frames clear the loss state
        push(&p, &sine(480, 1500.0, 0.5), stall);
        assert!(!p.is_lost());
        assert_eq!(p.retries(), 0);
    }

    #[test]
    fn successful_reattach_flushes_stale_audio() {
        let mut p = Pipeline::new(spectrum_settings(), SR).unwrap();
        let mut source = StubSource {
            attempts: 0,
            succeed: true,
        };
        push(&p, &sine(2048, 1500.0, 0.5), 0);
        assert_eq!(p.tick(ns(700), 2.0, Some(&mut source)), TickOutput::Silent);
        assert_eq!(source.attempts, 1);
        // the reset dropped buffered audio, so the next tick has nothing new
        assert_eq!(p.tick(ns(716), 0.016, None), TickOutput::Silent);
    }

    #[test]
    fn bar_count_update_applies_without_rebuild() {
        let mut p = Pipeline::new(spectrum_settings(), SR).unwrap();
        push(&p, &sine(1024, 1500.0, 0.5), 0);
        let now = (1024u64 * 1_000_000_000) / SR as u64;
        p.tick(now, 0.016, None);

        let mut settings = p.settings().clone();
        settings.num_bars = 16;
        p.update(settings).unwrap();

        push(&p, &sine(512, 1500.0, 0.5), now);
        let TickOutput::Spectrum { bars } = p.tick(now + ns(16), 0.016, None) else {
            panic!("expected spectrum");
        };
        assert_eq!(bars[0].len(), 16);
    }

    #[test]
    fn invalid_settings_update_is_rejected() {
        let mut p = Pipeline::new(spectrum_settings(), SR).unwrap();
        let mut settings = p.settings().clone();
        settings.num_bars = 0;
        assert!(p.update(settings).is_err());
        assert_eq!(p.settings().num_bars, 32);
    }
}
