//! Wavescope - terminal audio visualizer
//!
//! Captures the default input device and redraws one line per frame:
//! spectrum bars, a level meter, or the raw waveform peak, depending on
//! the configured display mode.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use std::{env, fs};

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use wavescope_audio::{AudioFrame, CaptureHandle, CaptureSource, Pipeline, Settings, TickOutput};

const BAR_GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Capture-side clock, shared with the stream callback so frame
/// timestamps and tick timestamps agree.
#[derive(Clone)]
struct Clock(Arc<Instant>);

impl Clock {
    fn new() -> Self {
        Clock(Arc::new(Instant::now()))
    }

    fn now_ns(&self) -> u64 {
        self.0.elapsed().as_nanos() as u64
    }
}

/// Owns the cpal input stream and can rebuild it when the pipeline asks.
struct InputSource {
    handle: CaptureHandle,
    clock: Clock,
    stream: Option<cpal::Stream>,
}

impl InputSource {
    fn new(handle: CaptureHandle, clock: Clock) -> Self {
        Self {
            handle,
            clock,
            stream: None,
        }
    }

    fn attach(&mut self) -> anyhow::Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("no input device available"))?;
        let config = device
            .default_input_config()
            .context("querying input config")?;
        if config.sample_format() != SampleFormat::F32 {
            return Err(anyhow!(
                "unsupported sample format {:?}",
                config.sample_format()
            ));
        }

        let channels = config.channels() as usize;
        let sample_rate = config.sample_rate().0;
        let handle = self.handle.clone();
        let clock = self.clock.clone();
        let mut planes: Vec<Vec<f32>> = vec![Vec::new(); channels.max(1)];

        let stream = device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for plane in &mut planes {
                    plane.clear();
                }
                for frame in data.chunks_exact(channels.max(1)) {
                    for (plane, &sample) in planes.iter_mut().zip(frame) {
                        plane.push(sample);
                    }
                }
                let refs: Vec<&[f32]> = planes.iter().map(Vec::as_slice).collect();
                let len = refs.first().map_or(0, |p| p.len()) as u64;
                let span_ns = len * 1_000_000_000 / sample_rate.max(1) as u64;
                handle.push_frame(&AudioFrame {
                    channels: &refs,
                    sample_rate,
                    timestamp_ns: clock.now_ns().saturating_sub(span_ns),
                    muted: false,
                });
            },
            |err| warn!(%err, "input stream error"),
            None,
        )?;
        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }
}

impl CaptureSource for InputSource {
    fn reattach(&mut self) -> bool {
        self.stream = None;
        match self.attach() {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "reattach failed");
                false
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let settings = match env::args().nth(1) {
        Some(path) => {
            let json = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            Settings::from_json(&json)?
        }
        None => Settings::default(),
    };
    let fps = if settings.fps > 0.0 { settings.fps } else { 60.0 };
    let floor = settings.floor;
    let ceiling = settings.ceiling;

    let mut pipeline = Pipeline::new(settings, 48000)?;
    let clock = Clock::new();
    let mut source = InputSource::new(pipeline.capture_handle(), clock.clone());
    source.attach()?;

    let frame_duration = Duration::from_secs_f32(1.0 / fps);
    let mut last = Instant::now();
    let stdout = io::stdout();
    loop {
        let elapsed = last.elapsed().as_secs_f32();
        last = Instant::now();
        let output = pipeline.tick(clock.now_ns(), elapsed, Some(&mut source));

        let line: String = render_line(&output, floor, ceiling)
            .chars()
            .take(120)
            .collect();
        let mut out = stdout.lock();
        write!(out, "\r\x1b[2K{line}")?;
        out.flush()?;

        thread::sleep(frame_duration.saturating_sub(last.elapsed()));
    }
}

fn render_line(output: &TickOutput, floor: f32, ceiling: f32) -> String {
    let span = (ceiling - floor).max(1.0);
    let glyph = |db: f32| {
        let t = ((db - floor) / span).clamp(0.0, 1.0);
        BAR_GLYPHS[(t * (BAR_GLYPHS.len() - 1) as f32).round() as usize]
    };
    match output {
        TickOutput::Spectrum { bars } => bars
            .iter()
            .map(|channel| channel.iter().map(|&db| glyph(db)).collect::<String>())
            .collect::<Vec<_>>()
            .join(" │ "),
        TickOutput::Meter { levels_dbfs } => levels_dbfs
            .iter()
            .map(|&db| {
                let width = (((db - floor) / span).clamp(0.0, 1.0) * 40.0) as usize;
                format!("[{:<40}] {db:6.1} dB", "█".repeat(width))
            })
            .collect::<Vec<_>>()
            .join("  "),
        TickOutput::Waveform { samples } => {
            let peak = samples
                .iter()
                .flat_map(|s| s.iter())
                .fold(0.0f32, |a, &b| a.max(b.abs()));
            format!("peak {peak:.4}")
        }
        TickOutput::Silent => String::new(),
    }
}
