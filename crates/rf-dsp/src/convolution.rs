//! Uniform Partitioned Convolution Engine
//!
//! Overlap-save convolution against a prepared IR:
//! - One forward FFT per channel per block (`fft_size = 2 * hop`)
//! - Frequency-domain delay line of past input spectra, addressed circularly
//! - Multiply-accumulate over all partitions, one inverse FFT per channel
//! - Zero added latency beyond the host block

use rf_core::{RfResult, Sample};

use crate::Processor;
use crate::fft::{BlockFft, Complex32, ZERO_BIN, complex_multiply_accumulate};
use crate::prepare::{IrLayout, PreparedIr};

// ============ Channel History ============

/// Per-channel input state
struct ChannelHistory {
    /// Frequency-domain delay line ("x"), `num_partitions` spectra
    input_spectra: Vec<Vec<Complex32>>,
    /// Time-domain ring of the last `fft_size` input samples ("s")
    ring: Vec<Sample>,
}

impl ChannelHistory {
    fn new(layout: &IrLayout) -> Self {
        Self {
            input_spectra: vec![vec![ZERO_BIN; layout.fft_size()]; layout.num_partitions],
            ring: vec![0.0; layout.fft_size()],
        }
    }

    fn clear(&mut self) {
        for spectrum in &mut self.input_spectra {
            spectrum.fill(ZERO_BIN);
        }
        self.ring.fill(0.0);
    }
}

// ============ Engine ============

/// Real-time block processor for one prepared IR
pub struct ConvolutionEngine {
    ir: PreparedIr,
    history: Vec<ChannelHistory>,
    fft: BlockFft,
    /// Scratch accumulator, `fft_size` bins
    accumulator: Vec<Complex32>,
    /// Ring write position shared by all channels, `[0, fft_size)`
    write_offset: usize,
    /// Delay-line slot of the newest spectrum, `[0, num_partitions)`
    partition_index: usize,
}

impl ConvolutionEngine {
    /// Allocate all runtime buffers for `ir`
    pub fn new(ir: PreparedIr) -> RfResult<Self> {
        let layout = ir.layout;
        let fft = BlockFft::new(layout.fft_size())?;
        let history = (0..layout.channels())
            .map(|_| ChannelHistory::new(&layout))
            .collect();

        Ok(Self {
            ir,
            history,
            fft,
            accumulator: vec![ZERO_BIN; layout.fft_size()],
            write_offset: 0,
            partition_index: 0,
        })
    }

    #[inline]
    pub fn layout(&self) -> &IrLayout {
        &self.ir.layout
    }

    #[inline]
    pub fn prepared(&self) -> &PreparedIr {
        &self.ir
    }

    #[inline]
    pub fn hop_size(&self) -> usize {
        self.ir.layout.hop_size()
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.ir.layout.channels()
    }

    #[inline]
    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    #[inline]
    pub fn partition_index(&self) -> usize {
        self.partition_index
    }

    /// Swap in new IR partitions with the same layout, keeping input history.
    ///
    /// Returns the previous IR, or hands `ir` back when its layout differs
    /// (the engine must be rebuilt instead).
    pub fn replace_ir(&mut self, ir: PreparedIr) -> Result<PreparedIr, PreparedIr> {
        if ir.layout != self.ir.layout {
            return Err(ir);
        }
        Ok(std::mem::replace(&mut self.ir, ir))
    }

    /// Process one host block.
    ///
    /// `input` holds `hop_size` frames of `in_channels` interleaved samples,
    /// `output` holds `hop_size` frames of `out_channels`. Output channel `i`
    /// reads input channel `min(i, in_channels - 1)`; output channels beyond
    /// the prepared count are silenced.
    pub fn process_block(
        &mut self,
        input: &[Sample],
        in_channels: usize,
        output: &mut [Sample],
        out_channels: usize,
    ) {
        let hop = self.hop_size();
        debug_assert!(input.len() >= hop * in_channels);
        debug_assert!(output.len() >= hop * out_channels);

        if in_channels == 0 {
            output.fill(0.0);
            return;
        }

        let num_partitions = self.ir.layout.num_partitions;
        let mask = self.ir.layout.fft_size() - 1;
        let partition_index = self.partition_index;
        let write_offset = self.write_offset;

        let Self {
            ir,
            history,
            fft,
            accumulator,
            ..
        } = self;

        for channel in 0..out_channels {
            let (Some(prepared), Some(state)) = (ir.channels.get(channel), history.get_mut(channel))
            else {
                for n in 0..hop {
                    output[n * out_channels + channel] = 0.0;
                }
                continue;
            };
            let source = channel.min(in_channels - 1);

            // Feed the new block into the ring
            let mut offset = write_offset;
            for n in 0..hop {
                state.ring[offset] = input[n * in_channels + source];
                offset = (offset + 1) & mask;
            }

            // X = FFT(newest block followed by the previous one)
            let spectrum = &mut state.input_spectra[partition_index];
            let mut offset = write_offset;
            for bin in spectrum.iter_mut() {
                *bin = Complex32::new(state.ring[offset], 0.0);
                offset = (offset + 1) & mask;
            }
            fft.forward(spectrum);

            // Y = IFFT(sum_k H_k * X_{(k + index) mod P})
            accumulator.fill(ZERO_BIN);
            for (k, ir_spectrum) in prepared.partitions.iter().enumerate() {
                let input_spectrum = &state.input_spectra[(k + partition_index) % num_partitions];
                complex_multiply_accumulate(accumulator, ir_spectrum, input_spectrum);
            }
            fft.inverse(accumulator);

            // Overlap-save: the first hop samples are alias-free
            for (n, bin) in accumulator.iter().take(hop).enumerate() {
                output[n * out_channels + channel] = bin.re;
            }
        }

        self.write_offset = (write_offset + hop) & mask;
        self.partition_index = if partition_index == 0 {
            num_partitions - 1
        } else {
            partition_index - 1
        };
    }
}

impl Processor for ConvolutionEngine {
    fn reset(&mut self) {
        for state in &mut self.history {
            state.clear();
        }
        self.accumulator.fill(ZERO_BIN);
        self.write_offset = 0;
        self.partition_index = 0;
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare::{IrPreparer, IrSource, PrepareTarget};

    fn engine_for(ir: &[Sample], hop: usize) -> ConvolutionEngine {
        let source = IrSource::new(ir, ir.len(), 1, 48_000);
        let prepared = IrPreparer::default()
            .prepare(&source, PrepareTarget::new(1, hop, 48_000))
            .unwrap();
        ConvolutionEngine::new(prepared).unwrap()
    }

    #[test]
    fn test_counters_wrap() {
        let mut engine = engine_for(&[1.0, 0.5, 0.25, 0.125, 0.0, 0.0], 2);
        assert_eq!(engine.layout().num_partitions, 3);

        let input = [0.0; 2];
        let mut output = [0.0; 2];
        let mut indices = Vec::new();
        let mut offsets = Vec::new();
        for _ in 0..4 {
            engine.process_block(&input, 1, &mut output, 1);
            indices.push(engine.partition_index());
            offsets.push(engine.write_offset());
        }
        assert_eq!(indices, vec![2, 1, 0, 2]);
        assert_eq!(offsets, vec![2, 0, 2, 0]);
    }

    #[test]
    fn test_identity_ir_passes_signal() {
        let mut engine = engine_for(&[1.0, 0.0, 0.0, 0.0], 4);
        let input = [0.25, -0.5, 0.75, 1.0];
        let mut output = [0.0; 4];
        engine.process_block(&input, 1, &mut output, 1);
        for (a, b) in output.iter().zip(&input) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_replace_ir_requires_same_layout() {
        let mut engine = engine_for(&[1.0, 0.0, 0.0, 0.0], 2);

        let same = IrPreparer::default()
            .prepare(
                &IrSource::new(&[0.0, 1.0, 0.0, 0.0], 4, 1, 48_000),
                PrepareTarget::new(1, 2, 48_000),
            )
            .unwrap();
        assert!(engine.replace_ir(same).is_ok());

        let longer = IrPreparer::default()
            .prepare(
                &IrSource::new(&[1.0; 8], 8, 1, 48_000),
                PrepareTarget::new(1, 2, 48_000),
            )
            .unwrap();
        assert!(engine.replace_ir(longer).is_err());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut engine = engine_for(&[1.0, 0.5, 0.25, 0.125], 2);
        let mut output = [0.0; 2];
        engine.process_block(&[1.0, 1.0], 1, &mut output, 1);
        engine.reset();
        assert_eq!(engine.partition_index(), 0);
        assert_eq!(engine.write_offset(), 0);

        engine.process_block(&[0.0, 0.0], 1, &mut output, 1);
        assert!(output.iter().all(|s| s.abs() < 1e-7));
    }

    #[test]
    fn test_extra_output_channels_are_silenced() {
        let mut engine = engine_for(&[1.0, 0.0], 2);
        let mut output = [9.0; 4];
        engine.process_block(&[1.0, 0.0], 1, &mut output, 2);
        assert!((output[0] - 1.0).abs() < 1e-6);
        assert_eq!(output[1], 0.0);
        assert_eq!(output[3], 0.0);
    }
}
