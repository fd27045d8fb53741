//! Impulse envelope preview
//!
//! The preparer stores a de-trended running integral of the peak-held IR
//! magnitude. Any output resolution is then a box filter over that integral,
//! `f(x) = (F(x + dx) - F(x)) / dx`, which stays stable when the preview is
//! much shorter or longer than the IR.

use rf_core::Sample;

/// Release factor of the peak-hold follower
const PEAK_RELEASE: f64 = 0.99;

/// Keeps the follower from settling on exact zero
const PEAK_FLOOR: f64 = 1.0e-9;

/// De-trended integral of the peak-held impulse magnitude
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeCurve {
    /// `F[n] = S[n] - (n + 1) * drift`, with `S` the running peak sum
    integral: Vec<f32>,
    /// Mean of the peak-hold curve, removed from `integral`
    drift: f64,
}

/// One-sided peak hold over `|impulse|`: instant attack, exponential release
pub fn peak_hold(impulse: &[Sample]) -> Vec<f64> {
    let mut peak = 0.0_f64;
    impulse
        .iter()
        .map(|&s| {
            let a = s.abs() as f64;
            if a > peak {
                peak = a;
            } else {
                peak = peak * PEAK_RELEASE + PEAK_FLOOR;
            }
            peak
        })
        .collect()
}

impl EnvelopeCurve {
    /// Integrate and de-trend the peak-hold curve of `impulse`
    pub fn from_impulse(impulse: &[Sample]) -> Self {
        let peaks = peak_hold(impulse);
        if peaks.is_empty() {
            return Self::default();
        }

        let total: f64 = peaks.iter().sum();
        let drift = total / peaks.len() as f64;

        let mut sum = 0.0_f64;
        let mut offset = 0.0_f64;
        let integral = peaks
            .iter()
            .map(|&p| {
                sum += p;
                offset += drift;
                (sum - offset) as f32
            })
            .collect();

        Self { integral, drift }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.integral.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.integral.is_empty()
    }

    /// Stored de-trended integral
    #[inline]
    pub fn integral(&self) -> &[f32] {
        &self.integral
    }

    /// Per-sample drift removed from the integral
    #[inline]
    pub fn drift(&self) -> f64 {
        self.drift
    }

    /// Integral value at sample `i` of the domain `[0, len]`, `F(0) = 0`
    #[inline]
    fn at(&self, i: usize) -> f64 {
        if i == 0 { 0.0 } else { self.integral[i - 1] as f64 }
    }

    /// Linear interpolation of the integral at continuous position `t`
    fn interpolate(&self, t: f64) -> f64 {
        let len = self.integral.len();
        let t = t.clamp(0.0, len as f64);
        // one sample of margin so `i + 1` stays inside the domain
        let i = (t.floor() as usize).min(len - 1);
        let frac = t - i as f64;
        let a = self.at(i);
        let b = self.at(i + 1);
        a + (b - a) * frac
    }

    /// Fill `out` with the envelope resampled to `out.len()` points
    pub fn extract(&self, out: &mut [Sample]) {
        if out.is_empty() || self.integral.is_empty() {
            return;
        }

        let scale = self.integral.len() as f64 / out.len() as f64;
        let time_scale = 1.0 / scale;
        let mut prev = 0.0;
        for (n, sample) in out.iter_mut().enumerate() {
            let next = self.interpolate((n + 1) as f64 * scale);
            *sample = ((next - prev) * time_scale + self.drift) as Sample;
            prev = next;
        }
    }
}
