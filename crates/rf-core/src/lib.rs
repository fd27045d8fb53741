//! rf-core: Shared types for the ReelForge convolution reverb
//!
//! Sample type, error taxonomy and lock-free parameter cells used by
//! `rf-dsp` and `rf-engine`.

mod error;
mod params;
mod sample;

pub use error::*;
pub use params::*;
pub use sample::*;
