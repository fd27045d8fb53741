//! Error types for ReelForge

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RfError {
    #[error("Invalid IR slot: {0}")]
    InvalidSlot(usize),

    #[error("Invalid block size: {0} (must be a non-zero power of two)")]
    InvalidBlockSize(usize),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("IR too long: {0} samples after resampling (limit {1})")]
    IrTooLong(usize, usize),

    #[error("Unsupported parameter index: {0}")]
    UnsupportedParameter(u32),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias
pub type RfResult<T> = Result<T, RfError>;
