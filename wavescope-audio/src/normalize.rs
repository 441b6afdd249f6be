//! RMS-based volume normalization, time-aligned with the analysis window.
//!
//! The RMS window trails the capture stream, so the gain it produces is
//! only valid for the audio it was measured from. A delay ring holds raw
//! samples between capture and analysis; the accumulator only advances
//! over samples the tick path is about to analyze. Applying the gain to
//! the peeked window therefore never scales "past" audio with "future"
//! loudness.

use crate::ring::RingBuffer;
use wavescope_analysis::{dbfs, DB_MIN};

/// Windowed-RMS gain tracker with a capture/analysis delay buffer.
pub struct VolumeNormalizer {
    enabled: bool,
    target_dbfs: f32,
    max_gain_db: f32,
    window: Vec<f32>,
    pos: usize,
    filled: usize,
    sum_squares: f64,
    sync_buf: RingBuffer,
    scratch: Vec<f32>,
    gain: f32,
}

impl VolumeNormalizer {
    pub fn new(window_samples: usize, target_dbfs: f32, max_gain_db: f32, enabled: bool) -> Self {
        Self {
            enabled,
            target_dbfs,
            max_gain_db: max_gain_db.max(0.0),
            window: vec![0.0; window_samples.max(1)],
            pos: 0,
            filled: 0,
            sum_squares: 0.0,
            sync_buf: RingBuffer::new(),
            scratch: Vec::new(),
            gain: 1.0,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Current linear gain, always in [1, 10^(max_gain/20)].
    #[inline]
    pub fn gain(&self) -> f32 {
        if self.enabled {
            self.gain
        } else {
            1.0
        }
    }

    /// Measured RMS of the analyzed stream in dBFS.
    #[inline]
    pub fn rms_dbfs(&self) -> f32 {
        if self.filled == 0 {
            return DB_MIN;
        }
        dbfs((self.sum_squares as f32 / self.filled as f32).sqrt())
    }

    pub fn configure(
        &mut self,
        window_samples: usize,
        target_dbfs: f32,
        max_gain_db: f32,
        enabled: bool,
    ) {
        self.target_dbfs = target_dbfs;
        self.max_gain_db = max_gain_db.max(0.0);
        self.enabled = enabled;
        if self.window.len() != window_samples.max(1) {
            self.window = vec![0.0; window_samples.max(1)];
            self.reset();
        }
        if !enabled {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.window.fill(0.0);
        self.pos = 0;
        self.filled = 0;
        self.sum_squares = 0.0;
        self.sync_buf.clear();
        self.gain = 1.0;
    }

    /// Queue captured samples behind the delay buffer. Called from the
    /// capture path under the pipeline lock. Muted input is excluded from
    /// the measurement but still occupies delay-buffer space so the
    /// alignment with the analysis stream holds.
    pub fn push_captured(&mut self, samples: &[f32], muted: bool) {
        if !self.enabled {
            return;
        }
        if muted {
            self.sync_buf.push_back_zero_f32(samples.len());
        } else {
            self.sync_buf.push_back_f32(samples);
        }
    }

    /// Advance the RMS window over the `count` samples now entering the
    /// analysis path and refresh the gain.
    pub fn advance(&mut self, count: usize) {
        if !self.enabled {
            return;
        }
        let take = count.min(self.sync_buf.len_f32());
        if take == 0 {
            return;
        }
        self.scratch.resize(take, 0.0);
        self.sync_buf.pop_front_f32(&mut self.scratch);

        for &s in &self.scratch {
            let sq = (s * s) as f64;
            self.sum_squares += sq - self.window[self.pos] as f64;
            self.window[self.pos] = s * s;
            self.pos = (self.pos + 1) % self.window.len();
            if self.filled < self.window.len() {
                self.filled += 1;
            }
        }
        // running f64 sum can drift slightly negative on silence
        if self.sum_squares < 0.0 {
            self.sum_squares = 0.0;
        }

        let rms_db = self.rms_dbfs();
        if rms_db <= DB_MIN {
            // silent window: hold the previous gain rather than amplifying
            // noise toward the target
            return;
        }
        let gain_db = (self.target_dbfs - rms_db).clamp(0.0, self.max_gain_db);
        self.gain = 10.0f32.powf(gain_db / 20.0);
    }
}
