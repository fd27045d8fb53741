//! Fixed-size complex FFT with a single normalization convention
//!
//! Forward transforms are unnormalized, inverse transforms scale by `1/N`.
//! Every spectrum in the crate goes through this wrapper so the pair stays
//! consistent between IR preparation and block processing.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use rf_core::{RfError, RfResult};

/// Single-precision complex bin
pub type Complex32 = Complex<f32>;

/// Zero bin
pub const ZERO_BIN: Complex32 = Complex32 { re: 0.0, im: 0.0 };

/// Planned forward/inverse pair for one power-of-two size
pub struct BlockFft {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    /// Shared in-place scratch, sized for the larger of the two plans
    scratch: Vec<Complex32>,
    inverse_scale: f32,
}

impl std::fmt::Debug for BlockFft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFft").field("size", &self.size).finish()
    }
}

impl BlockFft {
    /// Plan transforms of `size` points. `size` must be a non-zero power of two.
    pub fn new(size: usize) -> RfResult<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(RfError::InvalidBlockSize(size));
        }

        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Ok(Self {
            size,
            forward,
            inverse,
            scratch: vec![ZERO_BIN; scratch_len],
            inverse_scale: 1.0 / size as f32,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// In-place unnormalized forward transform
    #[inline]
    pub fn forward(&mut self, buffer: &mut [Complex32]) {
        debug_assert_eq!(buffer.len(), self.size);
        self.forward.process_with_scratch(buffer, &mut self.scratch);
    }

    /// In-place inverse transform, scaled by `1/N`
    #[inline]
    pub fn inverse(&mut self, buffer: &mut [Complex32]) {
        debug_assert_eq!(buffer.len(), self.size);
        self.inverse.process_with_scratch(buffer, &mut self.scratch);
        for bin in buffer.iter_mut() {
            *bin *= self.inverse_scale;
        }
    }
}

/// `result += a ⊙ b`
#[inline]
pub fn complex_multiply_accumulate(result: &mut [Complex32], a: &[Complex32], b: &[Complex32]) {
    debug_assert_eq!(result.len(), a.len());
    debug_assert_eq!(result.len(), b.len());
    for ((acc, &x), &y) in result.iter_mut().zip(a).zip(b) {
        acc.re += x.re * y.re - x.im * y.im;
        acc.im += x.re * y.im + x.im * y.re;
    }
}
