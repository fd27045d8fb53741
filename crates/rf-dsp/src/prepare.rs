//! IR Preparation
//!
//! Turns a raw interleaved impulse response into the frequency-domain
//! partitions consumed by [`ConvolutionEngine`](crate::ConvolutionEngine):
//! - Linear-interpolation resampling to the host rate
//! - Unit-energy normalization
//! - Uniform partitioning, each block zero-padded to `2 * hop` and transformed
//! - Envelope integral for previews

use std::sync::Arc;

use rf_core::{RfError, RfResult, Sample, energy};

use crate::envelope::EnvelopeCurve;
use crate::fft::{BlockFft, Complex32, ZERO_BIN};

/// Length of the stand-in IR used when a slot holds no frames
pub const PLACEHOLDER_LENGTH: usize = 256;

/// Longest IR accepted, in seconds at the target rate
pub const MAX_IR_SECONDS: f64 = 15.0;

// ============ Source & Target ============

/// Borrowed view of a raw uploaded IR
#[derive(Debug, Clone, Copy)]
pub struct IrSource<'a> {
    /// Interleaved samples, `frames * channels` long
    pub samples: &'a [Sample],
    pub frames: usize,
    pub channels: usize,
    pub sample_rate: u32,
}

impl<'a> IrSource<'a> {
    pub fn new(samples: &'a [Sample], frames: usize, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            frames,
            channels,
            sample_rate,
        }
    }

    /// No usable frames; preparation substitutes the placeholder IR
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.channels == 0 || self.samples.len() < self.frames * self.channels
    }

    #[inline]
    fn sample(&self, frame: usize, channel: usize) -> Sample {
        self.samples[frame * self.channels + channel]
    }
}

/// Host-side configuration a preparation run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrepareTarget {
    /// Output channel count
    pub channels: usize,
    /// Host block length
    pub hop_size: usize,
    /// Host sample rate
    pub sample_rate: u32,
}

impl PrepareTarget {
    pub fn new(channels: usize, hop_size: usize, sample_rate: u32) -> Self {
        Self {
            channels,
            hop_size,
            sample_rate,
        }
    }

    pub fn validate(&self) -> RfResult<()> {
        if self.channels == 0 {
            return Err(RfError::InvalidChannelCount(self.channels));
        }
        if self.hop_size == 0 || !self.hop_size.is_power_of_two() {
            return Err(RfError::InvalidBlockSize(self.hop_size));
        }
        if self.sample_rate == 0 {
            return Err(RfError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.hop_size * 2
    }
}

// ============ Layout ============

/// Resampled IR length for a source of `source_frames` at `source_rate`
pub fn target_length(
    source_frames: usize,
    source_rate: u32,
    target_rate: u32,
    placeholder_length: usize,
) -> usize {
    if source_frames == 0 {
        return placeholder_length;
    }
    let exact = source_frames as f64 * target_rate as f64 / source_rate as f64;
    exact.ceil() as usize
}

/// Resampled length limit at `target_rate`
#[inline]
pub fn max_target_length(target_rate: u32) -> usize {
    (MAX_IR_SECONDS * target_rate as f64) as usize
}

/// `ceil(target_length / hop_size)`, at least one partition
#[inline]
pub fn partition_count(target_length: usize, hop_size: usize) -> usize {
    target_length.div_ceil(hop_size).max(1)
}

/// Shape of a prepared IR; two runs with equal layouts are interchangeable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrLayout {
    pub target: PrepareTarget,
    /// Source identity: sample rate
    pub source_rate: u32,
    /// Source identity: frame count
    pub source_frames: usize,
    /// Resampled length before zero padding
    pub target_length: usize,
    pub num_partitions: usize,
}

impl IrLayout {
    pub fn new(source: &IrSource<'_>, target: PrepareTarget, placeholder_length: usize) -> Self {
        let frames = if source.is_empty() { 0 } else { source.frames };
        let target_length =
            target_length(frames, source.sample_rate, target.sample_rate, placeholder_length);
        Self {
            target,
            source_rate: source.sample_rate,
            source_frames: source.frames,
            target_length,
            num_partitions: partition_count(target_length, target.hop_size),
        }
    }

    #[inline]
    pub fn hop_size(&self) -> usize {
        self.target.hop_size
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.target.fft_size()
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.target.channels
    }

    /// Padded impulse length, `num_partitions * hop_size`
    #[inline]
    pub fn impulse_len(&self) -> usize {
        self.num_partitions * self.target.hop_size
    }
}

// ============ Prepared Output ============

/// One output channel of a prepared IR
#[derive(Debug, Clone)]
pub struct PreparedChannel {
    /// Resampled, normalized impulse, `impulse_len` long
    pub impulse: Vec<Sample>,
    /// Forward transforms of each `hop`-sized block, `fft_size` bins each
    pub partitions: Vec<Vec<Complex32>>,
    /// Shared with envelope readers
    pub envelope: Arc<EnvelopeCurve>,
}

/// Complete output of one preparation run
#[derive(Debug, Clone)]
pub struct PreparedIr {
    pub layout: IrLayout,
    pub channels: Vec<PreparedChannel>,
}

impl PreparedIr {
    #[inline]
    pub fn layout(&self) -> &IrLayout {
        &self.layout
    }

    #[inline]
    pub fn channel(&self, index: usize) -> Option<&PreparedChannel> {
        self.channels.get(index)
    }
}

// ============ Preparer ============

/// IR preparation pipeline
#[derive(Debug, Clone)]
pub struct IrPreparer {
    placeholder_length: usize,
}

impl Default for IrPreparer {
    fn default() -> Self {
        Self::new(PLACEHOLDER_LENGTH)
    }
}

impl IrPreparer {
    pub fn new(placeholder_length: usize) -> Self {
        Self {
            placeholder_length: placeholder_length.max(1),
        }
    }

    /// Run the full pipeline for every target channel
    pub fn prepare(&self, source: &IrSource<'_>, target: PrepareTarget) -> RfResult<PreparedIr> {
        target.validate()?;
        if !source.is_empty() && source.sample_rate == 0 {
            return Err(RfError::InvalidSampleRate(source.sample_rate));
        }

        let layout = IrLayout::new(source, target, self.placeholder_length);
        let limit = max_target_length(target.sample_rate);
        if !source.is_empty() && layout.target_length > limit {
            return Err(RfError::IrTooLong(layout.target_length, limit));
        }
        let mut fft = BlockFft::new(layout.fft_size())?;

        log::debug!(
            "Preparing IR: {} frames @ {} Hz -> {} samples, {} partitions of {} ({} ch)",
            source.frames,
            source.sample_rate,
            layout.target_length,
            layout.num_partitions,
            layout.hop_size(),
            layout.channels()
        );

        let channels = (0..layout.channels())
            .map(|channel| {
                let mut impulse = vec![0.0; layout.impulse_len()];
                if source.is_empty() {
                    impulse[0] = 1.0;
                } else {
                    // clamp-to-last when the source has fewer channels
                    let source_channel = channel.min(source.channels - 1);
                    resample_linear(
                        source,
                        source_channel,
                        target.sample_rate,
                        &mut impulse[..layout.target_length],
                    );
                }

                if !normalize_energy(&mut impulse) {
                    log::warn!("IR channel {channel} has no energy, normalization skipped");
                }

                let partitions = partition_spectra(&impulse, layout.hop_size(), &mut fft);
                let envelope = Arc::new(EnvelopeCurve::from_impulse(&impulse));

                PreparedChannel {
                    impulse,
                    partitions,
                    envelope,
                }
            })
            .collect();

        Ok(PreparedIr { layout, channels })
    }
}

/// Linear-interpolation resample of one source channel into `out`
///
/// Destination sample `n` reads source position `n * source_rate / target_rate`;
/// both bounding indices clamp to the last source frame.
pub fn resample_linear(source: &IrSource<'_>, channel: usize, target_rate: u32, out: &mut [Sample]) {
    let speed = source.sample_rate as f64 / target_rate as f64;
    let last = source.frames - 1;

    for (n, sample) in out.iter_mut().enumerate() {
        let position = n as f64 * speed;
        let i1 = (position.floor() as usize).min(last);
        let i2 = (i1 + 1).min(last);
        let frac = (position - i1 as f64) as Sample;

        let s1 = source.sample(i1, channel);
        let s2 = source.sample(i2, channel);
        *sample = s1 + (s2 - s1) * frac;
    }
}

/// Scale to unit energy. Returns `false` (samples untouched) for silent or
/// non-finite input.
pub fn normalize_energy(impulse: &mut [Sample]) -> bool {
    let power = energy(impulse);
    if power <= 0.0 || !power.is_finite() {
        return false;
    }

    let scale = (1.0 / power.sqrt()) as Sample;
    for sample in impulse.iter_mut() {
        *sample *= scale;
    }
    true
}

/// Forward transforms of consecutive `hop_size` blocks, each zero-padded to
/// `fft.size()`
pub fn partition_spectra(impulse: &[Sample], hop_size: usize, fft: &mut BlockFft) -> Vec<Vec<Complex32>> {
    impulse
        .chunks(hop_size)
        .map(|block| {
            let mut spectrum = vec![ZERO_BIN; fft.size()];
            for (bin, &s) in spectrum.iter_mut().zip(block) {
                bin.re = s;
            }
            fft.forward(&mut spectrum);
            spectrum
        })
        .collect()
}
