//! Progress reporting for long-running tasks
//!
//! Every long task (waveform recompute, onset detection, time-stretch, file
//! load/export) reports `(stage, fraction)` and honors a boolean cancel
//! signal. Within a thread the signal is a plain callback return value; across
//! threads it travels over a crossbeam channel with an atomic back-edge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Callback for single-stage tasks. Returns false to abort the task.
pub trait Progress {
    fn report(&mut self, fraction: f64) -> bool;
}

impl<F: FnMut(f64) -> bool> Progress for F {
    fn report(&mut self, fraction: f64) -> bool {
        self(fraction)
    }
}

/// A progress sink that never cancels
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _fraction: f64) -> bool {
        true
    }
}

/// One progress message from a worker task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate<S> {
    pub stage: S,
    pub fraction: f64,
}

/// Worker-side handle: reports updates, observes cancellation
pub struct ProgressTx<S> {
    tx: Sender<ProgressUpdate<S>>,
    cancel: Arc<AtomicBool>,
}

impl<S: Copy + Send + 'static> ProgressTx<S> {
    /// Report a stage fraction. Returns false once the task is cancelled.
    pub fn report(&mut self, stage: S, fraction: f64) -> bool {
        // A full channel only drops the intermediate update, never blocks
        // the worker.
        match self.tx.try_send(ProgressUpdate { stage, fraction }) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => return false,
        }
        !self.cancel.load(Ordering::Relaxed)
    }

    /// Adapt one stage to the single-stage [`Progress`] trait
    pub fn stage(&mut self, stage: S) -> StageProgress<'_, S> {
        StageProgress { tx: self, stage }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Single-stage adapter over [`ProgressTx`]
pub struct StageProgress<'a, S> {
    tx: &'a mut ProgressTx<S>,
    stage: S,
}

impl<S: Copy + Send + 'static> Progress for StageProgress<'_, S> {
    fn report(&mut self, fraction: f64) -> bool {
        self.tx.report(self.stage, fraction)
    }
}

/// UI-side handle: drains updates, raises the cancel signal
pub struct ProgressRx<S> {
    rx: Receiver<ProgressUpdate<S>>,
    cancel: Arc<AtomicBool>,
}

impl<S> ProgressRx<S> {
    /// Drain all pending updates, returning the latest (if any)
    pub fn latest(&self) -> Option<ProgressUpdate<S>> {
        self.rx.try_iter().last()
    }

    /// Block until the next update or the worker hangs up
    pub fn recv(&self) -> Option<ProgressUpdate<S>> {
        self.rx.recv().ok()
    }

    /// Request cancellation; the worker observes it at its next report
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// Create a paired progress channel for one worker task
pub fn progress_channel<S>() -> (ProgressTx<S>, ProgressRx<S>) {
    let (tx, rx) = crossbeam_channel::bounded(64);
    let cancel = Arc::new(AtomicBool::new(false));
    (
        ProgressTx {
            tx,
            cancel: Arc::clone(&cancel),
        },
        ProgressRx { rx, cancel },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Stage {
        Scan,
        Decode,
    }

    #[test]
    fn test_report_and_drain() {
        let (mut tx, rx) = progress_channel();
        assert!(tx.report(Stage::Scan, 0.5));
        assert!(tx.report(Stage::Decode, 0.1));
        let last = rx.latest().unwrap();
        assert_eq!(last.stage, Stage::Decode);
    }

    #[test]
    fn test_cancel_back_edge() {
        let (mut tx, rx) = progress_channel();
        assert!(tx.report(Stage::Scan, 0.0));
        rx.cancel();
        assert!(!tx.report(Stage::Scan, 0.5));
        assert!(tx.is_cancelled());
    }

    #[test]
    fn test_stage_adapter() {
        let (mut tx, rx) = progress_channel();
        {
            let mut stage = tx.stage(Stage::Decode);
            assert!(stage.report(0.25));
        }
        assert_eq!(rx.latest().unwrap().fraction, 0.25);
    }
}
