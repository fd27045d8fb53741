//! rf-engine: Convolution reverb runtime
//!
//! Provides:
//! - Shared IR slot registry (per-slot locks, upload fast path)
//! - Background IR preparation on a rayon pool
//! - Reverb instances with a non-blocking audio path
//! - C ABI for uploads and slot names

pub mod config;
pub mod ffi;
pub mod reverb;
pub mod slots;
pub mod worker;

pub use config::ReverbConfig;
pub use reverb::{ConvolutionReverb, IMPULSE_BUFFER_PREFIX, PARAM_USE_SAMPLE};
pub use slots::{DEFAULT_SLOT_COUNT, InFlight, IrSlotStore, UNSET_NAME};
pub use worker::{PreparePool, PrepareHandle, PrepareReport};
