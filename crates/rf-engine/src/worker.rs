//! Background IR preparation
//!
//! Preparation runs on a small rayon pool. Every submitted job hands back a
//! [`PrepareHandle`] the caller may wait on, poll, or simply drop.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};
use rf_core::{RfError, RfResult};
use rf_dsp::IrLayout;

/// Outcome of a finished preparation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareReport {
    /// Slot the IR was read from
    pub slot: usize,
    /// Layout now installed
    pub layout: IrLayout,
    /// A new engine was built (layout change) instead of swapping spectra
    pub rebuilt: bool,
}

/// Worker pool for preparation jobs
pub struct PreparePool {
    pool: rayon::ThreadPool,
}

impl PreparePool {
    pub fn new(num_threads: usize) -> RfResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|index| format!("rf-ir-prepare-{index}"))
            .panic_handler(|_| log::error!("IR preparation job panicked"))
            .build()
            .map_err(|e| RfError::WorkerPool(e.to_string()))?;

        log::debug!("IR preparation pool started with {} threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue `job`. Never blocks.
    pub fn submit<F>(&self, job: F) -> PrepareHandle
    where
        F: FnOnce() -> RfResult<PrepareReport> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.pool.spawn(move || {
            // receiver may be gone when the caller dropped the handle
            let _ = tx.send(job());
        });
        PrepareHandle { rx, result: None }
    }
}

impl std::fmt::Debug for PreparePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparePool")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

/// Completion handle of one queued preparation
#[derive(Debug)]
pub struct PrepareHandle {
    rx: Receiver<RfResult<PrepareReport>>,
    result: Option<RfResult<PrepareReport>>,
}

impl PrepareHandle {
    fn lost() -> RfError {
        RfError::WorkerPool("preparation job ended without a result".into())
    }

    fn poll(&mut self) {
        if self.result.is_some() {
            return;
        }
        match self.rx.try_recv() {
            Ok(result) => self.result = Some(result),
            Err(TryRecvError::Disconnected) => self.result = Some(Err(Self::lost())),
            Err(TryRecvError::Empty) => {}
        }
    }

    pub fn is_finished(&mut self) -> bool {
        self.poll();
        self.result.is_some()
    }

    /// Result if the job has finished
    pub fn try_result(&mut self) -> Option<&RfResult<PrepareReport>> {
        self.poll();
        self.result.as_ref()
    }

    /// Block until the job finishes
    pub fn wait(self) -> RfResult<PrepareReport> {
        match self.result {
            Some(result) => result,
            None => self.rx.recv().unwrap_or_else(|_| Err(Self::lost())),
        }
    }

    /// Block for at most `timeout`; gives the handle back if still running
    pub fn wait_timeout(self, timeout: Duration) -> Result<RfResult<PrepareReport>, Self> {
        if let Some(result) = self.result {
            return Ok(result);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(Self::lost())),
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }
}
