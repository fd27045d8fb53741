//! rf-dsp: DSP processors for the ReelForge convolution reverb
//!
//! ## Modules
//! - `fft` - Fixed-size complex FFT pair with one normalization convention
//! - `prepare` - IR resampling, normalization, partitioning and transform
//! - `convolution` - Uniform partitioned overlap-save block engine
//! - `envelope` - Arbitrary-resolution envelope preview from the IR integral

pub mod convolution;
pub mod envelope;
pub mod fft;
pub mod prepare;

pub use convolution::ConvolutionEngine;
pub use envelope::EnvelopeCurve;
pub use fft::{BlockFft, Complex32};
pub use prepare::{
    IrLayout, IrPreparer, IrSource, PLACEHOLDER_LENGTH, PrepareTarget, PreparedChannel, PreparedIr,
};

/// Trait for all DSP processors
pub trait Processor: Send + Sync {
    /// Reset processor state
    fn reset(&mut self);

    /// Get latency in samples
    fn latency(&self) -> usize {
        0
    }
}
