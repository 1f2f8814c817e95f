//! Driver capability
//!
//! Implementers provide initialization, teardown, and the stream parameters;
//! the process callback is registered once at initialization. Only one driver
//! may exist per process; construction of a second returns a descriptive
//! failure instead of panicking.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::AudioResult;

/// Real-time process callback: `(nframes, out_left, out_right)`.
///
/// Called from the driver's real-time thread. `nframes` never exceeds the
/// driver's advertised maximum block size; output samples are f32 in
/// [-1, 1] (out-of-range values are permitted but may be hard-clipped by
/// the host).
pub type ProcessCallback = Box<dyn FnMut(usize, &mut [f32], &mut [f32]) + Send + 'static>;

/// Audio driver capability
pub trait AudioDriver {
    /// Register the process callback and start the stream
    fn initialize(&mut self, callback: ProcessCallback) -> AudioResult<()>;

    /// Stop the stream and release the device
    fn cleanup(&mut self) -> AudioResult<()>;

    /// Stream sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Largest `nframes` the callback will ever receive
    fn max_block_size(&self) -> usize;

    fn is_running(&self) -> bool;
}

static DRIVER_SLOT: AtomicBool = AtomicBool::new(false);

/// Claim the process-wide driver slot; false if a driver already exists
pub(crate) fn acquire_driver_slot() -> bool {
    !DRIVER_SLOT.swap(true, Ordering::SeqCst)
}

pub(crate) fn release_driver_slot() {
    DRIVER_SLOT.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_slot_is_exclusive() {
        assert!(acquire_driver_slot());
        assert!(!acquire_driver_slot());
        release_driver_slot();
        assert!(acquire_driver_slot());
        release_driver_slot();
    }
}
