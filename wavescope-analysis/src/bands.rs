//! Maps FFT bins onto a smaller number of display bars.
//!
//! The frequency axis (linear or logarithmic, bounded by the cutoff
//! frequencies) is divided into one contiguous bin range per bar. Bands
//! wider than one bin reduce with max; narrower bands interpolate at the
//! fractional bin position using point, Lanczos, or Catmull-Rom taps.
//! Roll-off and slope compensation are exposed as a per-bin multiplier
//! table applied upstream on linear magnitudes. All tables are pure
//! functions of the config and are rebuilt only when it changes.

use serde::Deserialize;
use std::f32::consts::PI;

/// Interpolation across fractional bin positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterpMode {
    /// Nearest bin
    Point,
    /// Windowed sinc with configurable kernel radius
    #[default]
    Lanczos,
    /// 4-point cubic
    CatmullRom,
}

/// Spatial filtering across adjacent bars (distinct from the analyzer's
/// temporal smoothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    None,
    #[default]
    Gauss,
}

/// Parameters governing the band map and its derived tables.
#[derive(Debug, Clone, PartialEq)]
pub struct BandMapperConfig {
    pub num_bars: usize,
    pub fft_size: usize,
    pub sample_rate: u32,
    pub cutoff_low: f32,
    pub cutoff_high: f32,
    pub log_scale: bool,
    pub interp: InterpMode,
    pub lanczos_radius: usize,
    pub filter: FilterMode,
    pub filter_radius: f32,
    /// Spectrum tilt in dB per octave relative to 1 kHz
    pub slope: f32,
    /// Roll-off knee in kHz; <= 0 disables compensation
    pub rolloff_q: f32,
    /// Roll-off boost in dB per octave above the knee
    pub rolloff_rate: f32,
}

impl Default for BandMapperConfig {
    fn default() -> Self {
        Self {
            num_bars: 64,
            fft_size: 2048,
            sample_rate: 48000,
            cutoff_low: 30.0,
            cutoff_high: 17500.0,
            log_scale: true,
            interp: InterpMode::default(),
            lanczos_radius: 3,
            filter: FilterMode::default(),
            filter_radius: 1.5,
            slope: 0.0,
            rolloff_q: 0.0,
            rolloff_rate: 0.0,
        }
    }
}

/// Per-bin linear multipliers for slope tilt and roll-off compensation.
pub struct BinModifiers {
    table: Vec<f32>,
    identity: bool,
}

impl BinModifiers {
    fn build(cfg: &BandMapperConfig) -> Self {
        let bins = cfg.fft_size / 2;
        let identity =
            cfg.slope == 0.0 && (cfg.rolloff_q <= 0.0 || cfg.rolloff_rate <= 0.0);
        let bin_hz = cfg.sample_rate as f32 / cfg.fft_size as f32;
        let knee = cfg.rolloff_q * 1000.0;
        let table = (0..bins)
            .map(|i| {
                let freq = (i as f32 * bin_hz).max(1.0);
                let mut db = cfg.slope * (freq / 1000.0).log2();
                if knee > 0.0 && cfg.rolloff_rate > 0.0 && freq > knee {
                    db += cfg.rolloff_rate * (freq / knee).log2();
                }
                10.0f32.powf(db / 20.0)
            })
            .collect();
        Self { table, identity }
    }

    /// The multiplier table, or None when it is all ones.
    #[inline]
    pub fn as_slice(&self) -> Option<&[f32]> {
        if self.identity {
            None
        } else {
            Some(&self.table)
        }
    }
}

// interpolation taps for one bar: first source bin plus weights
struct Taps {
    start: usize,
    weights: Vec<f32>,
}

/// Bin-to-bar mapper with cached interpolation, filter, and modifier tables.
pub struct BandMapper {
    cfg: BandMapperConfig,
    bin_lo: usize,
    bin_hi: usize,
    band_edges: Vec<usize>,
    band_widths: Vec<usize>,
    taps: Vec<Taps>,
    modifiers: BinModifiers,
    gauss_kernel: Vec<f32>,
    out: Vec<f32>,
    filter_buf: Vec<f32>,
}

impl BandMapper {
    pub fn new(cfg: BandMapperConfig) -> Self {
        assert!(cfg.num_bars >= 1, "need at least one bar");
        assert!(cfg.fft_size >= 32 && cfg.fft_size % 16 == 0);
        let mut mapper = Self {
            cfg: cfg.clone(),
            bin_lo: 0,
            bin_hi: 0,
            band_edges: Vec::new(),
            band_widths: Vec::new(),
            taps: Vec::new(),
            modifiers: BinModifiers::build(&cfg),
            gauss_kernel: Vec::new(),
            out: vec![0.0; cfg.num_bars],
            filter_buf: vec![0.0; cfg.num_bars],
        };
        mapper.rebuild();
        mapper
    }

    /// Apply a new config, rebuilding the cached tables only on change.
    pub fn update(&mut self, cfg: BandMapperConfig) {
        if cfg == self.cfg {
            return;
        }
        let modifiers_changed = cfg.fft_size != self.cfg.fft_size
            || cfg.sample_rate != self.cfg.sample_rate
            || cfg.slope != self.cfg.slope
            || cfg.rolloff_q != self.cfg.rolloff_q
            || cfg.rolloff_rate != self.cfg.rolloff_rate;
        self.cfg = cfg;
        if modifiers_changed {
            self.modifiers = BinModifiers::build(&self.cfg);
        }
        self.out.resize(self.cfg.num_bars, 0.0);
        self.filter_buf.resize(self.cfg.num_bars, 0.0);
        self.rebuild();
    }

    #[inline]
    pub fn num_bars(&self) -> usize {
        self.cfg.num_bars
    }

    /// Width of each bar's bin range. Sums to the full mapped range.
    #[inline]
    pub fn band_widths(&self) -> &[usize] {
        &self.band_widths
    }

    /// Per-bin magnitude multipliers for the analyzer stage.
    #[inline]
    pub fn modifiers(&self) -> Option<&[f32]> {
        self.modifiers.as_slice()
    }

    // fractional bin position of the mapped axis at t in [0, 1]
    fn axis_position(&self, t: f32) -> f32 {
        let nyquist = self.cfg.sample_rate as f32 / 2.0;
        let lo = self.cfg.cutoff_low.max(1.0).min(nyquist);
        let hi = self.cfg.cutoff_high.max(lo + 1.0).min(nyquist);
        let freq = if self.cfg.log_scale {
            (lo.ln() + (hi.ln() - lo.ln()) * t).exp()
        } else {
            lo + (hi - lo) * t
        };
        freq * self.cfg.fft_size as f32 / self.cfg.sample_rate as f32
    }

    fn rebuild(&mut self) {
        let bins = self.cfg.fft_size / 2;
        let bars = self.cfg.num_bars;

        self.bin_lo = (self.axis_position(0.0).floor() as usize).min(bins - 1);
        self.bin_hi = (self.axis_position(1.0).ceil() as usize).clamp(self.bin_lo + 1, bins);

        // integer band edges: monotone, exactly covering [bin_lo, bin_hi)
        self.band_edges.clear();
        self.band_edges.push(self.bin_lo);
        for i in 1..bars {
            let pos = self.axis_position(i as f32 / bars as f32).round() as usize;
            let prev = *self.band_edges.last().unwrap();
            self.band_edges.push(pos.clamp(prev, self.bin_hi));
        }
        self.band_edges.push(self.bin_hi);

        self.band_widths = self
            .band_edges
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect();

        // interpolation taps at each bar's fractional center
        self.taps.clear();
        for i in 0..bars {
            let center = (self.axis_position(i as f32 / bars as f32)
                + self.axis_position((i + 1) as f32 / bars as f32))
                / 2.0;
            self.taps.push(self.build_taps(center, bins));
        }

        self.gauss_kernel = match self.cfg.filter {
            FilterMode::Gauss if self.cfg.filter_radius >= 1.0 => {
                gauss_kernel(self.cfg.filter_radius)
            }
            _ => Vec::new(),
        };
    }

    fn build_taps(&self, center: f32, bins: usize) -> Taps {
        let clamp_idx = |i: isize| -> usize { i.clamp(0, bins as isize - 1) as usize };
        match self.cfg.interp {
            InterpMode::Point => Taps {
                start: clamp_idx(center.round() as isize),
                weights: vec![1.0],
            },
            InterpMode::Lanczos => {
                let a = self.cfg.lanczos_radius.max(1) as isize;
                let base = center.floor() as isize;
                let mut weights = Vec::with_capacity((2 * a) as usize);
                for j in (base - a + 1)..=(base + a) {
                    weights.push(lanczos(center - j as f32, a as f32));
                }
                let sum: f32 = weights.iter().sum();
                if sum.abs() > f32::EPSILON {
                    for w in &mut weights {
                        *w /= sum;
                    }
                }
                Taps {
                    start: clamp_idx(base - a + 1),
                    weights,
                }
            }
            InterpMode::CatmullRom => {
                let base = center.floor() as isize;
                let t = center - base as f32;
                let t2 = t * t;
                let t3 = t2 * t;
                let weights = vec![
                    0.5 * (-t + 2.0 * t2 - t3),
                    0.5 * (2.0 - 5.0 * t2 + 3.0 * t3),
                    0.5 * (t + 4.0 * t2 - 3.0 * t3),
                    0.5 * (-t2 + t3),
                ];
                Taps {
                    start: clamp_idx(base - 1),
                    weights,
                }
            }
        }
    }

    /// Map one channel's per-bin dBFS values to per-bar values.
    ///
    /// Bands spanning more than one bin reduce with max; single-bin bands
    /// interpolate. The result borrows an internal buffer valid until the
    /// next call.
    pub fn map(&mut self, decibels: &[f32]) -> &[f32] {
        assert!(decibels.len() >= self.bin_hi, "bin count mismatch");
        let bins = decibels.len();
        for i in 0..self.cfg.num_bars {
            let (lo, hi) = (self.band_edges[i], self.band_edges[i + 1]);
            self.out[i] = if hi - lo > 1 {
                decibels[lo..hi]
                    .iter()
                    .cloned()
                    .fold(f32::NEG_INFINITY, f32::max)
            } else {
                let taps = &self.taps[i];
                let mut acc = 0.0;
                for (j, &w) in taps.weights.iter().enumerate() {
                    acc += decibels[(taps.start + j).min(bins - 1)] * w;
                }
                acc
            };
        }

        if !self.gauss_kernel.is_empty() {
            apply_gauss(&self.gauss_kernel, &self.out, &mut self.filter_buf);
            std::mem::swap(&mut self.out, &mut self.filter_buf);
        }
        &self.out
    }
}

#[inline]
fn sinc(x: f32) -> f32 {
    if x.abs() < 1e-6 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

#[inline]
fn lanczos(x: f32, a: f32) -> f32 {
    if x.abs() >= a {
        0.0
    } else {
        sinc(x) * sinc(x / a)
    }
}

fn gauss_kernel(radius: f32) -> Vec<f32> {
    let r = radius.floor() as isize;
    let sigma = radius / 2.0;
    let mut kernel: Vec<f32> = (-r..=r)
        .map(|i| (-(i as f32 * i as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

fn apply_gauss(kernel: &[f32], input: &[f32], out: &mut [f32]) {
    let r = (kernel.len() / 2) as isize;
    let n = input.len() as isize;
    for i in 0..n {
        let mut acc = 0.0;
        for (k, &w) in kernel.iter().enumerate() {
            let j = (i + k as isize - r).clamp(0, n - 1);
            acc += input[j as usize] * w;
        }
        out[i as usize] = acc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(bars: usize, interp: InterpMode, log: bool) -> BandMapperConfig {
        BandMapperConfig {
            num_bars: bars,
            interp,
            log_scale: log,
            filter: FilterMode::None,
            ..Default::default()
        }
    }

    #[test]
    fn band_widths_partition_the_mapped_range() {
        for bars in [8, 31, 64, 200, 2000] {
            for log in [false, true] {
                let m = BandMapper::new(cfg(bars, InterpMode::Point, log));
                let total: usize = m.band_widths().iter().sum();
                assert_eq!(
                    total,
                    m.bin_hi - m.bin_lo,
                    "bars={bars} log={log}: widths must cover every mapped bin once"
                );
                assert_eq!(m.band_widths().len(), bars);
                // edges never go backwards
                for w in m.band_edges.windows(2) {
                    assert!(w[1] >= w[0]);
                }
            }
        }
    }

    #[test]
    fn constant_spectrum_maps_flat() {
        let bins = 1024;
        let db = vec![-30.0f32; bins];
        for interp in [InterpMode::Point, InterpMode::Lanczos, InterpMode::CatmullRom] {
            let mut m = BandMapper::new(cfg(48, interp, true));
            let bars = m.map(&db);
            for &b in bars {
                assert!((b + 30.0).abs() < 1e-3, "{interp:?}: got {b}");
            }
        }
    }

    #[test]
    fn gauss_filter_preserves_constant_level() {
        let bins = 1024;
        let db = vec![-12.0f32; bins];
        let mut c = cfg(48, InterpMode::Point, true);
        c.filter = FilterMode::Gauss;
        c.filter_radius = 2.0;
        let mut m = BandMapper::new(c);
        for &b in m.map(&db) {
            assert!((b + 12.0).abs() < 1e-3);
        }
    }

    #[test]
    fn gauss_filter_smooths_a_spike() {
        let bins = 1024;
        let mut db = vec![-60.0f32; bins];
        db[100] = 0.0;
        let mut plain = BandMapper::new(cfg(200, InterpMode::Point, false));
        let peak_plain = plain
            .map(&db)
            .iter()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);
        let mut c = cfg(200, InterpMode::Point, false);
        c.filter = FilterMode::Gauss;
        c.filter_radius = 3.0;
        let mut filt = BandMapper::new(c);
        let peak_filt = filt
            .map(&db)
            .iter()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);
        assert!(peak_filt < peak_plain);
    }

    #[test]
    fn identity_modifiers_are_elided() {
        let m = BandMapper::new(cfg(32, InterpMode::Point, true));
        assert!(m.modifiers().is_none());
    }

    #[test]
    fn slope_tilts_up_with_frequency() {
        let mut c = cfg(32, InterpMode::Point, true);
        c.slope = 3.0;
        let m = BandMapper::new(c);
        let mods = m.modifiers().expect("slope table");
        // unity near 1 kHz, rising above it
        let bin_hz = 48000.0 / 2048.0;
        let ref_bin = (1000.0 / bin_hz) as usize;
        assert!((mods[ref_bin] - 1.0).abs() < 0.05);
        assert!(mods[ref_bin * 4] > mods[ref_bin * 2]);
        assert!(mods[ref_bin * 2] > mods[ref_bin]);
    }

    #[test]
    fn rolloff_boosts_only_above_knee() {
        let mut c = cfg(32, InterpMode::Point, true);
        c.rolloff_q = 4.0; // knee at 4 kHz
        c.rolloff_rate = 6.0;
        let m = BandMapper::new(c);
        let mods = m.modifiers().expect("rolloff table");
        let bin_hz = 48000.0 / 2048.0;
        let below = (2000.0 / bin_hz) as usize;
        let above = (8000.0 / bin_hz) as usize;
        assert!((mods[below] - 1.0).abs() < 1e-6);
        // one octave above a 4 kHz knee at 6 dB/oct is x2
        assert!((mods[above] - 2.0).abs() < 0.05);
    }

    #[test]
    fn log_axis_gives_low_frequencies_more_bars() {
        let log = BandMapper::new(cfg(64, InterpMode::Point, true));
        let lin = BandMapper::new(cfg(64, InterpMode::Point, false));
        // first band is narrower (finer) under a log axis
        assert!(log.band_widths()[0] <= lin.band_widths()[0]);
        // last band is wider under a log axis
        assert!(log.band_widths()[63] >= lin.band_widths()[63]);
    }

    #[test]
    fn update_is_a_no_op_for_identical_config() {
        let c = cfg(32, InterpMode::Lanczos, true);
        let mut m = BandMapper::new(c.clone());
        let widths = m.band_widths().to_vec();
        m.update(c);
        assert_eq!(widths, m.band_widths());
    }

    #[test]
    fn update_rebuilds_on_bar_count_change() {
        let mut m = BandMapper::new(cfg(32, InterpMode::Point, true));
        let mut c2 = cfg(48, InterpMode::Point, true);
        c2.filter = FilterMode::None;
        m.update(c2);
        assert_eq!(m.num_bars(), 48);
        assert_eq!(m.band_widths().len(), 48);
        let total: usize = m.band_widths().iter().sum();
        assert_eq!(total, m.bin_hi - m.bin_lo);
    }
}
