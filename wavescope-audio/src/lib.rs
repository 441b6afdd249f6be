//! Audio capture plumbing and the tick-driven analysis pipeline
//!
//! This crate owns everything between the host's capture callback and the
//! renderer:
//! - RingBuffer: growable byte ring backing the per-channel sample queues
//! - CaptureCoordinator: buffering, timestamps, loss detection and retry
//! - VolumeNormalizer: windowed-RMS gain, time-aligned with analysis
//! - Settings: the host-facing settings dictionary
//! - Pipeline: ties capture, spectrum/meter analysis, and band mapping
//!   together behind one tick call

mod capture;
mod normalize;
mod pipeline;
mod ring;
mod settings;

pub use capture::{
    AudioFrame, CaptureCoordinator, CaptureStatus, CAPTURE_TIMEOUT_NS, RETRY_DELAY_SECS,
};
pub use normalize::VolumeNormalizer;
pub use pipeline::{CaptureHandle, CaptureSource, Pipeline, TickOutput};
pub use ring::RingBuffer;
pub use settings::{ChannelMode, DisplayMode, Settings, SettingsError};
