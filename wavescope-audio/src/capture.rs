//! Audio capture buffering, timestamps, and loss/retry tracking.
//!
//! The coordinator lives inside the pipeline's shared-state mutex. The
//! host's capture callback feeds it frames; the tick path polls it for
//! loss, discards consumed audio, and peeks analysis windows. Retry
//! backoff is budgeted against the tick's elapsed-seconds input, never a
//! blocking sleep.

use crate::ring::RingBuffer;
use crate::settings::ChannelMode;
use tracing::{debug, warn};

/// Time without a frame before capture is considered lost (500 ms).
pub const CAPTURE_TIMEOUT_NS: u64 = 500 * 1_000_000;

/// Backoff between capture retry attempts.
pub const RETRY_DELAY_SECS: f32 = 2.0;

/// One chunk of audio as delivered by the host's capture callback.
///
/// `timestamp_ns` marks the start of the chunk on the same clock the host
/// passes to the tick path. All channel planes have equal length.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub channels: &'a [&'a [f32]],
    pub sample_rate: u32,
    pub timestamp_ns: u64,
    pub muted: bool,
}

/// Capture health as seen from the tick path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Active,
    /// Lost, waiting out the retry backoff
    Lost,
    /// Lost and the backoff has elapsed; caller should attempt reattach
    RetryDue,
}

/// Per-source capture state: channel ring buffers, timestamps, and the
/// loss/retry state machine.
pub struct CaptureCoordinator {
    channel_mode: ChannelMode,
    channel_index: usize,
    ignore_mute: bool,
    sample_rate: u32,
    capture_channels: usize,
    bufs: Vec<RingBuffer>,
    mono_mix: Vec<f32>,
    prefill: usize,
    capture_ts: u64,
    audio_ts: u64,
    lost: bool,
    retries: u32,
    retry_timer: f32,
    // bumped on every full reset so the tick path can drop stale
    // smoothing/normalization state
    generation: u64,
}

impl CaptureCoordinator {
    pub fn new(
        channel_mode: ChannelMode,
        channel_index: usize,
        ignore_mute: bool,
        prefill: usize,
    ) -> Self {
        let output_channels = channel_mode.output_channels();
        let mut bufs = Vec::with_capacity(output_channels);
        for _ in 0..output_channels {
            let mut rb = RingBuffer::with_capacity(prefill * 4 * 2);
            rb.push_front_zero_f32(prefill);
            bufs.push(rb);
        }
        Self {
            channel_mode,
            channel_index,
            ignore_mute,
            sample_rate: 0,
            capture_channels: 0,
            bufs,
            mono_mix: Vec::new(),
            prefill,
            capture_ts: 0,
            audio_ts: 0,
            lost: false,
            retries: 0,
            retry_timer: 0.0,
            generation: 0,
        }
    }

    #[inline]
    pub fn output_channels(&self) -> usize {
        self.bufs.len()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn audio_ts(&self) -> u64 {
        self.audio_ts
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Retry attempts since capture was last healthy. Diagnostic only.
    #[inline]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mono mix of the most recent frame (for the normalizer's RMS path).
    #[inline]
    pub fn mono_mix(&self) -> &[f32] {
        &self.mono_mix
    }

    /// Signed delta between the end of available audio (plus the sync
    /// offset) and `now`, clamped so a long stall cannot produce runaway
    /// drift. Negative when audio lags the render clock.
    pub fn audio_sync(&self, now_ns: u64, offset_ns: i64) -> i64 {
        // 16 seconds
        const MAX_TS_DELTA: i64 = 16_000_000_000;
        let audio_ts = self.audio_ts as i64 + offset_ns;
        (audio_ts - now_ns as i64).clamp(-MAX_TS_DELTA, MAX_TS_DELTA)
    }

    /// Reconfigure the channel layout and window prefill. Full reset.
    pub fn configure(
        &mut self,
        channel_mode: ChannelMode,
        channel_index: usize,
        ignore_mute: bool,
        prefill: usize,
    ) {
        self.channel_mode = channel_mode;
        self.channel_index = channel_index;
        self.ignore_mute = ignore_mute;
        self.prefill = prefill;
        self.reset();
    }

    /// Drop all buffered audio and prefill with one window of silence.
    pub fn reset(&mut self) {
        let output_channels = self.channel_mode.output_channels();
        self.bufs.resize_with(output_channels, RingBuffer::new);
        for rb in &mut self.bufs {
            rb.clear();
            rb.push_front_zero_f32(self.prefill);
        }
        self.capture_channels = 0;
        self.audio_ts = 0;
        self.capture_ts = 0;
        self.generation += 1;
    }

    /// Append one host frame to the channel buffers and stamp timestamps.
    /// Returns false for degenerate frames that were dropped.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> bool {
        let Some(first) = frame.channels.first() else {
            return false;
        };
        let len = first.len();
        if len == 0 || frame.sample_rate == 0 {
            return false;
        }

        // A reconfigured source is a full reset, not an incremental
        // migration.
        if frame.channels.len() != self.capture_channels
            || frame.sample_rate != self.sample_rate
        {
            if self.capture_channels != 0 {
                debug!(
                    channels = frame.channels.len(),
                    sample_rate = frame.sample_rate,
                    "capture format changed, resetting buffers"
                );
                self.reset();
            }
            self.capture_channels = frame.channels.len();
            self.sample_rate = frame.sample_rate;
        }

        let silenced = frame.muted && !self.ignore_mute;
        self.mono_mix.clear();
        if silenced {
            self.mono_mix.resize(len, 0.0);
        } else {
            let scale = 1.0 / frame.channels.len() as f32;
            self.mono_mix.resize(len, 0.0);
            for plane in frame.channels {
                for (m, &s) in self.mono_mix.iter_mut().zip(*plane) {
                    *m += s * scale;
                }
            }
        }

        for (out_ch, rb) in self.bufs.iter_mut().enumerate() {
            if silenced {
                rb.push_back_zero_f32(len);
                continue;
            }
            match self.channel_mode {
                ChannelMode::Mono => rb.push_back_f32(&self.mono_mix),
                ChannelMode::Stereo => {
                    let src = out_ch.min(frame.channels.len() - 1);
                    rb.push_back_f32(frame.channels[src]);
                }
                ChannelMode::Single => {
                    let src = self.channel_index.min(frame.channels.len() - 1);
                    rb.push_back_f32(frame.channels[src]);
                }
            }
        }

        let end_ts =
            frame.timestamp_ns + (len as u64 * 1_000_000_000) / frame.sample_rate as u64;
        self.capture_ts = end_ts;
        self.audio_ts = end_ts;

        if self.lost {
            debug!(retries = self.retries, "audio capture resumed");
            self.lost = false;
            self.retries = 0;
            self.retry_timer = 0.0;
        }
        true
    }

    /// Poll the loss state machine. Called once per tick.
    pub fn check(&mut self, now_ns: u64, elapsed: f32) -> CaptureStatus {
        if self.capture_ts == 0 {
            // no frame since attach; start the timeout from the first poll
            self.capture_ts = now_ns;
        }
        if !self.lost && now_ns.saturating_sub(self.capture_ts) > CAPTURE_TIMEOUT_NS {
            warn!("audio capture lost, retrying");
            self.lost = true;
            // first retry fires on the next tick
            self.retry_timer = RETRY_DELAY_SECS;
        }
        if !self.lost {
            return CaptureStatus::Active;
        }
        self.retry_timer += elapsed;
        if self.retry_timer >= RETRY_DELAY_SECS {
            self.retry_timer = 0.0;
            self.retries += 1;
            CaptureStatus::RetryDue
        } else {
            CaptureStatus::Lost
        }
    }

    /// Buffered samples available on every channel.
    pub fn available(&self) -> usize {
        self.bufs.iter().map(RingBuffer::len_f32).min().unwrap_or(0)
    }

    /// Consume `count` samples from the front of every channel buffer.
    pub fn discard(&mut self, count: usize) {
        for rb in &mut self.bufs {
            rb.discard_front_f32(count);
        }
    }

    /// Copy the newest `out.len()` samples of one channel, leaving them
    /// buffered for window overlap.
    pub fn peek_window(&self, channel: usize, out: &mut [f32]) {
        self.bufs[channel].peek_back_f32(out);
    }
}
