//! Convolution Reverb Instance
//!
//! Ties one [`ConvolutionEngine`] to the shared slot registry. The audio
//! thread only ever takes the short engine lock: it forwards the block to the
//! installed engine and, when the selected slot or host layout changed,
//! wakes the instance's dispatcher thread, which queues a preparation job
//! on the pool. Jobs read the slot under the slot lock, build spectra off
//! every lock, then swap the result in.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use rf_core::{AtomicParam, ParamId, ParamRange, RfError, RfResult, Sample, frame_count};
use rf_dsp::{
    ConvolutionEngine, EnvelopeCurve, IrLayout, IrPreparer, PrepareTarget, PreparedIr, Processor,
};

use crate::config::ReverbConfig;
use crate::slots::{InFlight, IrSlotStore};
use crate::worker::{PreparePool, PrepareHandle, PrepareReport};

/// "Use Sample": index of the IR slot to convolve with
pub const PARAM_USE_SAMPLE: ParamId = ParamId(0);

/// Prefix of the float buffers exposing per-channel envelopes
pub const IMPULSE_BUFFER_PREFIX: &str = "Impulse";

struct EngineState {
    engine: Option<ConvolutionEngine>,
    /// Slot whose IR is installed
    prepared_slot: Option<usize>,
    /// Host layout of the most recent block
    requested: PrepareTarget,
    /// Last attempt that failed, not retried until its slot is re-uploaded
    failed: Option<(usize, PrepareTarget)>,
}

/// Built off-lock by a preparation job
enum Install {
    Swap(PreparedIr),
    Rebuild(ConvolutionEngine),
}

struct Shared {
    state: Mutex<EngineState>,
    slots: Arc<IrSlotStore>,
    pool: Arc<PreparePool>,
    preparer: IrPreparer,
    use_sample: AtomicParam,
    use_sample_range: ParamRange,
}

impl Shared {
    #[inline]
    fn selected_slot(&self) -> usize {
        self.use_sample.get() as usize
    }

    fn needs_preparation(&self, state: &EngineState, slot: usize) -> bool {
        let target = state.requested;
        if target.validate().is_err() {
            return false;
        }
        let pending = self.slots.is_update_pending(slot);
        if state.failed == Some((slot, target)) && !pending {
            return false;
        }
        match &state.engine {
            None => true,
            Some(engine) => {
                pending || state.prepared_slot != Some(slot) || engine.layout().target != target
            }
        }
    }

    /// Queue a preparation for the current selection and host layout if
    /// anything changed since the last one
    fn trigger(self: &Arc<Self>) -> Option<PrepareHandle> {
        let slot = self.selected_slot();
        let target = {
            let state = self.state.lock();
            if let Err(err) = state.requested.validate() {
                log::warn!("Host layout cannot be prepared: {err}");
                return None;
            }
            if !self.needs_preparation(&state, slot) {
                return None;
            }
            state.requested
        };
        log::debug!(
            "Preparation requested for slot {slot}: {} ch, {} frames @ {} Hz",
            target.channels,
            target.hop_size,
            target.sample_rate
        );

        let in_flight = self.slots.begin_preparation(slot)?;
        let shared = Arc::clone(self);
        Some(self.pool.submit(move || shared.run_preparation(in_flight, target)))
    }

    fn run_preparation(
        &self,
        in_flight: InFlight,
        target: PrepareTarget,
    ) -> RfResult<PrepareReport> {
        let slot = in_flight.slot();
        let result = self.prepare_and_install(slot, target);
        match &result {
            Ok(report) => log::info!(
                "IR slot {slot} installed: {} partitions x {} ({} ch @ {} Hz){}",
                report.layout.num_partitions,
                report.layout.hop_size(),
                report.layout.channels(),
                report.layout.target.sample_rate,
                if report.rebuilt { ", engine rebuilt" } else { "" }
            ),
            Err(err) => {
                log::warn!("IR slot {slot} preparation failed: {err}");
                self.state.lock().failed = Some((slot, target));
            }
        }
        result
    }

    fn prepare_and_install(&self, slot: usize, target: PrepareTarget) -> RfResult<PrepareReport> {
        let live_layout = self.state.lock().engine.as_ref().map(|e| *e.layout());

        let prepared = self
            .slots
            .read_for_preparation(slot, |source| self.preparer.prepare(&source, target))??;
        let layout = prepared.layout;

        let mut install = if live_layout == Some(layout) {
            Install::Swap(prepared)
        } else {
            Install::Rebuild(ConvolutionEngine::new(prepared)?)
        };

        // Another job may have changed the layout since it was sampled
        loop {
            let mut state = self.state.lock();
            let live = state.engine.as_ref().map(|e| *e.layout());
            match install {
                Install::Swap(ir) if live == Some(ir.layout) => {
                    let retired = state.engine.as_mut().and_then(|e| e.replace_ir(ir).ok());
                    state.prepared_slot = Some(slot);
                    state.failed = None;
                    drop(state);
                    drop(retired);
                    return Ok(PrepareReport { slot, layout, rebuilt: false });
                }
                Install::Swap(ir) => {
                    drop(state);
                    install = Install::Rebuild(ConvolutionEngine::new(ir)?);
                }
                Install::Rebuild(engine) => {
                    let retired = state.engine.replace(engine);
                    state.prepared_slot = Some(slot);
                    state.failed = None;
                    drop(state);
                    drop(retired);
                    return Ok(PrepareReport { slot, layout, rebuilt: true });
                }
            }
        }
    }
}

/// Forwards audio-thread wake-ups to [`Shared::trigger`]
fn dispatch_loop(shared: Arc<Shared>, wake: Receiver<()>) {
    while wake.recv().is_ok() {
        // dropped handle: the job still runs and installs its result
        drop(shared.trigger());
    }
}

/// One reverb effect instance
pub struct ConvolutionReverb {
    shared: Arc<Shared>,
    /// Wakes the dispatcher; never blocks the audio thread
    wake: Option<Sender<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ConvolutionReverb {
    /// New instance reading from `slots`. Assumes the configured initial
    /// channel count and block size until the first block arrives; call
    /// [`poll`](Self::poll) to prepare ahead of it.
    pub fn new(
        slots: Arc<IrSlotStore>,
        pool: Arc<PreparePool>,
        config: &ReverbConfig,
        sample_rate: u32,
    ) -> RfResult<Self> {
        let max_slot = slots.slot_count().saturating_sub(1) as f64;
        let requested =
            PrepareTarget::new(config.initial_channels, config.initial_block_size, sample_rate);

        let shared = Arc::new(Shared {
            state: Mutex::new(EngineState {
                engine: None,
                prepared_slot: None,
                requested,
                failed: None,
            }),
            slots,
            pool,
            preparer: IrPreparer::new(config.placeholder_length),
            use_sample: AtomicParam::new(0.0),
            use_sample_range: ParamRange::linear(0.0, max_slot, 0.0),
        });

        let (wake_tx, wake_rx) = bounded(1);
        let dispatch_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name("rf-ir-dispatch".into())
            .spawn(move || dispatch_loop(dispatch_shared, wake_rx))
            .map_err(|e| RfError::WorkerPool(e.to_string()))?;

        Ok(Self {
            shared,
            wake: Some(wake_tx),
            dispatcher: Some(dispatcher),
        })
    }

    /// Instance on the process-wide registry with its own preparation pool
    pub fn from_config(config: &ReverbConfig, sample_rate: u32) -> RfResult<Self> {
        config.validate()?;
        let slots = IrSlotStore::init_global(config.slot_count);
        let pool = Arc::new(PreparePool::new(config.worker_threads)?);
        Self::new(slots, pool, config, sample_rate)
    }

    pub fn slots(&self) -> &Arc<IrSlotStore> {
        &self.shared.slots
    }

    pub fn set_parameter(&self, index: u32, value: f64) -> RfResult<()> {
        match ParamId(index) {
            PARAM_USE_SAMPLE => {
                let slot = self.shared.use_sample_range.clamp(value).trunc();
                self.shared.use_sample.set(slot);
                Ok(())
            }
            _ => Err(RfError::UnsupportedParameter(index)),
        }
    }

    pub fn parameter(&self, index: u32) -> RfResult<f64> {
        match ParamId(index) {
            PARAM_USE_SAMPLE => Ok(self.shared.use_sample.get()),
            _ => Err(RfError::UnsupportedParameter(index)),
        }
    }

    #[inline]
    pub fn selected_slot(&self) -> usize {
        self.shared.selected_slot()
    }

    /// Set the host layout ahead of the first block
    pub fn set_host_layout(&self, channels: usize, block_size: usize, sample_rate: u32) {
        self.shared.state.lock().requested = PrepareTarget::new(channels, block_size, sample_rate);
    }

    /// Layout of the installed engine
    pub fn layout(&self) -> Option<IrLayout> {
        self.shared.state.lock().engine.as_ref().map(|e| *e.layout())
    }

    /// Slot whose IR is currently installed
    pub fn prepared_slot(&self) -> Option<usize> {
        self.shared.state.lock().prepared_slot
    }

    /// Queue a preparation if the selected slot, its contents or the host
    /// layout changed since the last one. `None` when nothing needs doing or
    /// a run for the slot is already in flight.
    pub fn poll(&self) -> Option<PrepareHandle> {
        self.shared.trigger()
    }

    /// Process one block of `output.len() / out_channels` frames.
    ///
    /// Never prepares or allocates. Outputs silence until an engine matching
    /// the block's layout is installed, waking the dispatcher as needed.
    pub fn process(
        &self,
        input: &[Sample],
        in_channels: usize,
        output: &mut [Sample],
        out_channels: usize,
        sample_rate: u32,
    ) {
        let frames = frame_count(output, out_channels);
        let target = PrepareTarget::new(out_channels, frames, sample_rate);
        let slot = self.selected_slot();

        let mut state = self.shared.state.lock();
        state.requested = target;
        let trigger = self.shared.needs_preparation(&state, slot);

        let input_ok = input.len() >= frames * in_channels;
        match state.engine.as_mut() {
            Some(engine) if input_ok && engine.layout().target == target => {
                engine.process_block(input, in_channels, output, out_channels);
            }
            _ => output.fill(0.0),
        }
        drop(state);

        if trigger {
            if let Some(wake) = &self.wake {
                // full: a wake-up is already queued
                let _ = wake.try_send(());
            }
        }
    }

    /// Fill `out` with the envelope of output channel `channel`, resampled to
    /// `out.len()` points. `false` if no IR is installed or `channel` is out
    /// of range.
    pub fn envelope(&self, channel: usize, out: &mut [Sample]) -> bool {
        match self.envelope_curve(channel) {
            Some(curve) => {
                curve.extract(out);
                true
            }
            None => false,
        }
    }

    /// Curve of the installed IR; extraction runs after the engine lock is
    /// released
    fn envelope_curve(&self, channel: usize) -> Option<Arc<EnvelopeCurve>> {
        let state = self.shared.state.lock();
        state
            .engine
            .as_ref()
            .and_then(|engine| engine.prepared().channel(channel))
            .map(|prepared| Arc::clone(&prepared.envelope))
    }

    /// Named float buffer query. `"Impulse<d>"` returns the envelope of
    /// channel `d`.
    pub fn float_buffer(&self, name: &str, out: &mut [Sample]) -> bool {
        let channel = name
            .strip_prefix(IMPULSE_BUFFER_PREFIX)
            .and_then(|rest| rest.chars().next())
            .and_then(|c| c.to_digit(10));
        match channel {
            Some(channel) => self.envelope(channel as usize, out),
            None => false,
        }
    }

    /// Clear convolution history, keeping the installed IR
    pub fn reset(&self) {
        if let Some(engine) = self.shared.state.lock().engine.as_mut() {
            engine.reset();
        }
    }
}

impl Drop for ConvolutionReverb {
    fn drop(&mut self) {
        // closing the channel ends the dispatch loop
        self.wake.take();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ConvolutionReverb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionReverb")
            .field("selected_slot", &self.selected_slot())
            .field("layout", &self.layout())
            .finish()
    }
}
