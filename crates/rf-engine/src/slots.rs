//! IR Slot Store
//!
//! Fixed-capacity table of raw impulse responses uploaded by the host or a
//! script. Each slot has its own lock, so uploads to different slots never
//! contend. Preparation reads a slot under that lock for the whole numeric
//! run; the audio thread only ever looks at the atomic flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rf_core::{RfError, RfResult, Sample};
use rf_dsp::IrSource;

/// Default number of slots
pub const DEFAULT_SLOT_COUNT: usize = 16;

/// Name reported for empty or out-of-range slots
pub const UNSET_NAME: &str = "Not set";

static GLOBAL_SLOTS: OnceLock<Arc<IrSlotStore>> = OnceLock::new();

#[derive(Debug, Default)]
struct SlotData {
    /// Interleaved samples, `frames * channels` long
    samples: Vec<Sample>,
    frames: usize,
    channels: usize,
    sample_rate: u32,
    name: String,
    allocated: bool,
}

/// One independently locked IR entry
#[derive(Debug, Default)]
struct IrSlot {
    data: Mutex<SlotData>,
    /// Set by every upload, cleared when a preparation run takes the data.
    /// Only written while `data` is locked.
    update_pending: AtomicBool,
    /// A preparation run for this slot is queued or running
    preparing: AtomicBool,
}

/// Registry of IR slots
#[derive(Debug)]
pub struct IrSlotStore {
    slots: Box<[IrSlot]>,
}

impl IrSlotStore {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| IrSlot::default()).collect(),
        }
    }

    /// Build the process-wide registry. The first call decides the slot
    /// count; later calls return the existing registry.
    pub fn init_global(slot_count: usize) -> Arc<IrSlotStore> {
        let store = GLOBAL_SLOTS.get_or_init(|| {
            log::info!("IR slot registry created with {slot_count} slots");
            Arc::new(IrSlotStore::new(slot_count))
        });
        if store.slot_count() != slot_count {
            log::warn!(
                "IR slot registry already holds {} slots, ignoring request for {slot_count}",
                store.slot_count()
            );
        }
        Arc::clone(store)
    }

    /// Process-wide registry, created with [`DEFAULT_SLOT_COUNT`] slots if
    /// [`init_global`](Self::init_global) was never called
    pub fn global() -> Arc<IrSlotStore> {
        Arc::clone(GLOBAL_SLOTS.get_or_init(|| Arc::new(IrSlotStore::new(DEFAULT_SLOT_COUNT))))
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Store an interleaved IR in `slot`.
    ///
    /// Returns `false` without touching the slot if `slot` is out of range or
    /// `samples` holds fewer than `frame_count * channel_count` values. An
    /// upload with the same frame count, channel count and rate as the
    /// current contents overwrites the existing buffer in place.
    pub fn upload(
        &self,
        slot: usize,
        samples: &[Sample],
        frame_count: usize,
        channel_count: usize,
        sample_rate: u32,
        name: &str,
    ) -> bool {
        let Some(entry) = self.slots.get(slot) else {
            log::warn!("IR upload rejected: slot {slot} out of range");
            return false;
        };
        let Some(len) = frame_count.checked_mul(channel_count) else {
            log::warn!("IR upload rejected: {frame_count} x {channel_count} overflows");
            return false;
        };
        if samples.len() < len {
            log::warn!(
                "IR upload rejected: slot {slot} expects {len} samples, got {}",
                samples.len()
            );
            return false;
        }

        let mut data = entry.data.lock();
        let same_shape = data.allocated
            && data.frames == frame_count
            && data.channels == channel_count
            && data.sample_rate == sample_rate;

        if same_shape || (len > 0 && data.samples.len() == len) {
            data.samples.copy_from_slice(&samples[..len]);
        } else if len == 0 {
            data.samples = Vec::new();
        } else {
            data.samples = samples[..len].to_vec();
        }

        data.frames = frame_count;
        data.channels = channel_count;
        data.sample_rate = sample_rate;
        data.name.clear();
        data.name.push_str(name);
        data.allocated = true;
        entry.update_pending.store(true, Ordering::Release);

        log::debug!(
            "IR slot {slot} <- '{name}': {frame_count} frames x {channel_count} ch @ {sample_rate} Hz{}",
            if same_shape { " (in place)" } else { "" }
        );
        true
    }

    /// Display name of `slot`, or [`UNSET_NAME`]
    pub fn name(&self, slot: usize) -> String {
        match self.slots.get(slot) {
            Some(entry) => {
                let data = entry.data.lock();
                if data.allocated {
                    data.name.clone()
                } else {
                    UNSET_NAME.to_owned()
                }
            }
            None => UNSET_NAME.to_owned(),
        }
    }

    pub fn is_allocated(&self, slot: usize) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|entry| entry.data.lock().allocated)
    }

    /// Lock-free read of the pending flag
    #[inline]
    pub fn is_update_pending(&self, slot: usize) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|entry| entry.update_pending.load(Ordering::Acquire))
    }

    /// Run `f` on the slot contents while holding the slot lock, clearing the
    /// pending flag first. Uploads arriving meanwhile wait for `f` and flag
    /// the slot again.
    pub fn read_for_preparation<R>(
        &self,
        slot: usize,
        f: impl FnOnce(IrSource<'_>) -> R,
    ) -> RfResult<R> {
        let entry = self.slots.get(slot).ok_or(RfError::InvalidSlot(slot))?;
        let data = entry.data.lock();
        entry.update_pending.store(false, Ordering::Release);

        let source = IrSource::new(&data.samples, data.frames, data.channels, data.sample_rate);
        Ok(f(source))
    }

    /// Claim the in-flight marker of `slot`. `None` if out of range or a run
    /// is already queued; the claim is released when the guard drops.
    pub fn begin_preparation(self: &Arc<Self>, slot: usize) -> Option<InFlight> {
        let entry = self.slots.get(slot)?;
        entry
            .preparing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(InFlight {
            store: Arc::clone(self),
            slot,
        })
    }

    pub fn is_preparing(&self, slot: usize) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|entry| entry.preparing.load(Ordering::Acquire))
    }

    #[cfg(test)]
    fn buffer_ptr(&self, slot: usize) -> *const Sample {
        self.slots[slot].data.lock().samples.as_ptr()
    }
}

/// In-flight claim on one slot's preparation
#[derive(Debug)]
pub struct InFlight {
    store: Arc<IrSlotStore>,
    slot: usize,
}

impl InFlight {
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(entry) = self.store.slots.get(self.slot) {
            entry.preparing.store(false, Ordering::Release);
        }
    }
}
