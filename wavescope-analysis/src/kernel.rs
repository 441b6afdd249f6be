//! Runtime-dispatched compute kernels for the hot per-tick loops.
//!
//! Three tiers with an identical numeric contract (within floating point
//! tolerance): a portable scalar baseline, an AVX tier, and an AVX2+FMA
//! tier. The tier is detected once at startup; every per-tick call is a
//! single match on the tag.

use rustfft::num_complex::Complex;

/// Compute backend, chosen once from detected CPU features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    /// Portable baseline
    Scalar,
    /// 256-bit lanes for the elementwise stages
    #[cfg(target_arch = "x86_64")]
    Avx,
    /// AVX2 magnitude extraction plus fused multiply-add
    #[cfg(target_arch = "x86_64")]
    Avx2Fma,
}

impl Kernel {
    /// Detect the widest supported tier on this machine.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return Kernel::Avx2Fma;
            }
            if is_x86_feature_detected!("avx") {
                return Kernel::Avx;
            }
        }
        Kernel::Scalar
    }

    pub fn name(self) -> &'static str {
        match self {
            Kernel::Scalar => "scalar",
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx => "avx",
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx2Fma => "avx2+fma",
        }
    }

    /// `out[i] = input[i] * coeffs[i]` (windowed copy into the FFT input).
    pub fn window_mul(self, input: &[f32], coeffs: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), coeffs.len());
        debug_assert_eq!(input.len(), out.len());
        match self {
            Kernel::Scalar => scalar::window_mul(input, coeffs, out),
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx => unsafe { avx::window_mul(input, coeffs, out) },
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx2Fma => unsafe { avx::window_mul(input, coeffs, out) },
        }
    }

    /// `values[i] *= mods[i]` (slope / roll-off modifier tables).
    pub fn mul_assign(self, values: &mut [f32], mods: &[f32]) {
        debug_assert_eq!(values.len(), mods.len());
        match self {
            Kernel::Scalar => scalar::mul_assign(values, mods),
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx => unsafe { avx::mul_assign(values, mods) },
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx2Fma => unsafe { avx::mul_assign(values, mods) },
        }
    }

    /// `values[i] *= gain`.
    pub fn scale(self, values: &mut [f32], gain: f32) {
        match self {
            Kernel::Scalar => scalar::scale(values, gain),
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx => unsafe { avx::scale(values, gain) },
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx2Fma => unsafe { avx::scale(values, gain) },
        }
    }

    /// `out[i] = |bins[i]| * scale` for the first `out.len()` bins.
    pub fn magnitudes(self, bins: &[Complex<f32>], scale: f32, out: &mut [f32]) {
        debug_assert!(bins.len() >= out.len());
        match self {
            Kernel::Scalar => scalar::magnitudes(bins, scale, out),
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx => scalar::magnitudes(bins, scale, out),
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx2Fma => unsafe { avx2::magnitudes(bins, scale, out) },
        }
    }

    /// One EMA step: `cur = prev * g + cur * (1 - g)`, written back to both
    /// buffers. With `fast_peaks` a rising value bypasses smoothing, which
    /// is exactly `max(smoothed, cur)` since the EMA lies between the two.
    pub fn smooth(self, prev: &mut [f32], cur: &mut [f32], g: f32, fast_peaks: bool) {
        debug_assert_eq!(prev.len(), cur.len());
        match self {
            Kernel::Scalar => scalar::smooth(prev, cur, g, fast_peaks),
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx => unsafe { avx::smooth(prev, cur, g, fast_peaks) },
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx2Fma => unsafe { avx2::smooth(prev, cur, g, fast_peaks) },
        }
    }

    /// Sum of squared samples, for RMS windows and meters.
    pub fn sum_squares(self, samples: &[f32]) -> f32 {
        match self {
            Kernel::Scalar => scalar::sum_squares(samples),
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx => unsafe { avx::sum_squares(samples) },
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx2Fma => unsafe { avx2::sum_squares(samples) },
        }
    }

    /// Largest absolute sample value.
    pub fn peak(self, samples: &[f32]) -> f32 {
        match self {
            Kernel::Scalar => scalar::peak(samples),
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx => unsafe { avx::peak(samples) },
            #[cfg(target_arch = "x86_64")]
            Kernel::Avx2Fma => unsafe { avx::peak(samples) },
        }
    }
}

mod scalar {
    use rustfft::num_complex::Complex;

    pub fn window_mul(input: &[f32], coeffs: &[f32], out: &mut [f32]) {
        for ((o, &a), &b) in out.iter_mut().zip(input).zip(coeffs) {
            *o = a * b;
        }
    }

    pub fn mul_assign(values: &mut [f32], mods: &[f32]) {
        for (v, &m) in values.iter_mut().zip(mods) {
            *v *= m;
        }
    }

    pub fn scale(values: &mut [f32], gain: f32) {
        for v in values.iter_mut() {
            *v *= gain;
        }
    }

    pub fn magnitudes(bins: &[Complex<f32>], scale: f32, out: &mut [f32]) {
        for (o, c) in out.iter_mut().zip(bins) {
            *o = c.norm() * scale;
        }
    }

    pub fn smooth(prev: &mut [f32], cur: &mut [f32], g: f32, fast_peaks: bool) {
        for (p, c) in prev.iter_mut().zip(cur.iter_mut()) {
            let mut s = *p * g + *c * (1.0 - g);
            if fast_peaks {
                s = s.max(*c);
            }
            *p = s;
            *c = s;
        }
    }

    pub fn sum_squares(samples: &[f32]) -> f32 {
        samples.iter().map(|&s| s * s).sum()
    }

    pub fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, &s| m.max(s.abs()))
    }
}

#[cfg(target_arch = "x86_64")]
mod avx {
    use std::arch::x86_64::*;

    const LANES: usize = 8;

    #[target_feature(enable = "avx")]
    pub unsafe fn window_mul(input: &[f32], coeffs: &[f32], out: &mut [f32]) {
        let n = input.len();
        let chunks = n / LANES * LANES;
        for i in (0..chunks).step_by(LANES) {
            let a = _mm256_loadu_ps(input.as_ptr().add(i));
            let b = _mm256_loadu_ps(coeffs.as_ptr().add(i));
            _mm256_storeu_ps(out.as_mut_ptr().add(i), _mm256_mul_ps(a, b));
        }
        for i in chunks..n {
            out[i] = input[i] * coeffs[i];
        }
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn mul_assign(values: &mut [f32], mods: &[f32]) {
        let n = values.len();
        let chunks = n / LANES * LANES;
        for i in (0..chunks).step_by(LANES) {
            let v = _mm256_loadu_ps(values.as_ptr().add(i));
            let m = _mm256_loadu_ps(mods.as_ptr().add(i));
            _mm256_storeu_ps(values.as_mut_ptr().add(i), _mm256_mul_ps(v, m));
        }
        for i in chunks..n {
            values[i] *= mods[i];
        }
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn scale(values: &mut [f32], gain: f32) {
        let n = values.len();
        let chunks = n / LANES * LANES;
        let g = _mm256_set1_ps(gain);
        for i in (0..chunks).step_by(LANES) {
            let v = _mm256_loadu_ps(values.as_ptr().add(i));
            _mm256_storeu_ps(values.as_mut_ptr().add(i), _mm256_mul_ps(v, g));
        }
        for i in chunks..n {
            values[i] *= gain;
        }
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn smooth(prev: &mut [f32], cur: &mut [f32], g: f32, fast_peaks: bool) {
        let n = prev.len();
        let chunks = n / LANES * LANES;
        let gv = _mm256_set1_ps(g);
        let hv = _mm256_set1_ps(1.0 - g);
        for i in (0..chunks).step_by(LANES) {
            let p = _mm256_loadu_ps(prev.as_ptr().add(i));
            let c = _mm256_loadu_ps(cur.as_ptr().add(i));
            let mut s = _mm256_add_ps(_mm256_mul_ps(p, gv), _mm256_mul_ps(c, hv));
            if fast_peaks {
                s = _mm256_max_ps(s, c);
            }
            _mm256_storeu_ps(prev.as_mut_ptr().add(i), s);
            _mm256_storeu_ps(cur.as_mut_ptr().add(i), s);
        }
        super::scalar::smooth(&mut prev[chunks..], &mut cur[chunks..], g, fast_peaks);
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn sum_squares(samples: &[f32]) -> f32 {
        let n = samples.len();
        let chunks = n / LANES * LANES;
        let mut acc = _mm256_setzero_ps();
        for i in (0..chunks).step_by(LANES) {
            let v = _mm256_loadu_ps(samples.as_ptr().add(i));
            acc = _mm256_add_ps(acc, _mm256_mul_ps(v, v));
        }
        horizontal_sum(acc) + super::scalar::sum_squares(&samples[chunks..])
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn peak(samples: &[f32]) -> f32 {
        let n = samples.len();
        let chunks = n / LANES * LANES;
        // clear the sign bit to take |x|
        let sign = _mm256_set1_ps(-0.0);
        let mut acc = _mm256_setzero_ps();
        for i in (0..chunks).step_by(LANES) {
            let v = _mm256_loadu_ps(samples.as_ptr().add(i));
            acc = _mm256_max_ps(acc, _mm256_andnot_ps(sign, v));
        }
        let mut lanes = [0.0f32; LANES];
        _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
        let head = lanes.iter().fold(0.0f32, |m, &x| m.max(x));
        head.max(super::scalar::peak(&samples[chunks..]))
    }

    #[inline]
    pub(super) unsafe fn horizontal_sum(v: __m256) -> f32 {
        let mut lanes = [0.0f32; LANES];
        _mm256_storeu_ps(lanes.as_mut_ptr(), v);
        lanes.iter().sum()
    }
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use rustfft::num_complex::Complex;
    use std::arch::x86_64::*;

    const LANES: usize = 8;

    /// Eight complex magnitudes per iteration: square, pairwise add, then
    /// restore lane order with a cross-lane permute before the sqrt.
    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn magnitudes(bins: &[Complex<f32>], scale: f32, out: &mut [f32]) {
        let n = out.len();
        let chunks = n / LANES * LANES;
        let sv = _mm256_set1_ps(scale);
        // hadd of two squared registers yields [m0 m1 m4 m5 | m2 m3 m6 m7]
        let order = _mm256_setr_epi32(0, 1, 4, 5, 2, 3, 6, 7);
        let ptr = bins.as_ptr() as *const f32;
        for i in (0..chunks).step_by(LANES) {
            let a = _mm256_loadu_ps(ptr.add(i * 2));
            let b = _mm256_loadu_ps(ptr.add(i * 2 + LANES));
            let sq = _mm256_hadd_ps(_mm256_mul_ps(a, a), _mm256_mul_ps(b, b));
            let sq = _mm256_permutevar8x32_ps(sq, order);
            let mag = _mm256_mul_ps(_mm256_sqrt_ps(sq), sv);
            _mm256_storeu_ps(out.as_mut_ptr().add(i), mag);
        }
        super::scalar::magnitudes(&bins[chunks..n], scale, &mut out[chunks..]);
    }

    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn smooth(prev: &mut [f32], cur: &mut [f32], g: f32, fast_peaks: bool) {
        let n = prev.len();
        let chunks = n / LANES * LANES;
        let gv = _mm256_set1_ps(g);
        let hv = _mm256_set1_ps(1.0 - g);
        for i in (0..chunks).step_by(LANES) {
            let p = _mm256_loadu_ps(prev.as_ptr().add(i));
            let c = _mm256_loadu_ps(cur.as_ptr().add(i));
            let mut s = _mm256_fmadd_ps(p, gv, _mm256_mul_ps(c, hv));
            if fast_peaks {
                s = _mm256_max_ps(s, c);
            }
            _mm256_storeu_ps(prev.as_mut_ptr().add(i), s);
            _mm256_storeu_ps(cur.as_mut_ptr().add(i), s);
        }
        super::scalar::smooth(&mut prev[chunks..], &mut cur[chunks..], g, fast_peaks);
    }

    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn sum_squares(samples: &[f32]) -> f32 {
        let n = samples.len();
        let chunks = n / LANES * LANES;
        let mut acc = _mm256_setzero_ps();
        for i in (0..chunks).step_by(LANES) {
            let v = _mm256_loadu_ps(samples.as_ptr().add(i));
            acc = _mm256_fmadd_ps(v, v, acc);
        }
        super::avx::horizontal_sum(acc) + super::scalar::sum_squares(&samples[chunks..])
    }
}
