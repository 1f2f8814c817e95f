//! Master bus and lock-free metering
//!
//! The audio thread is the only writer of meter cells; the UI reads them with
//! relaxed atomics and tolerates a block of lag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use wl_core::{db_to_gain, Sample};
use wl_dsp::{block_peak, MeterState};

/// Atomic f64 for lock-free metering
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Stereo peak cells for one track, written by the audio thread
#[derive(Debug, Default)]
pub struct TrackMeter {
    peak_l: AtomicF64,
    peak_r: AtomicF64,
}

impl TrackMeter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fold a block's peaks into the running maxima
    #[inline]
    pub fn update(&self, l: f64, r: f64) {
        if l > self.peak_l.load() {
            self.peak_l.store(l);
        }
        if r > self.peak_r.load() {
            self.peak_r.store(r);
        }
    }

    pub fn peaks(&self) -> (f64, f64) {
        (self.peak_l.load(), self.peak_r.load())
    }

    pub fn reset(&self) {
        self.peak_l.store(0.0);
        self.peak_r.store(0.0);
    }
}

/// Master-bus cells shared between the session (writer of `gain_db`) and the
/// audio thread (writer of everything else)
#[derive(Debug)]
pub struct MasterShared {
    pub gain_db: AtomicF64,
    pub peak_l: AtomicF64,
    pub peak_r: AtomicF64,
    pub hold_l: AtomicF64,
    pub hold_r: AtomicF64,
}

impl Default for MasterShared {
    fn default() -> Self {
        Self {
            gain_db: AtomicF64::new(0.0),
            peak_l: AtomicF64::default(),
            peak_r: AtomicF64::default(),
            hold_l: AtomicF64::default(),
            hold_r: AtomicF64::default(),
        }
    }
}

/// Final summing stage, owned by the audio thread
pub struct MasterBus {
    shared: Arc<MasterShared>,
    meter_l: MeterState,
    meter_r: MeterState,
}

impl MasterBus {
    pub fn new() -> (Self, Arc<MasterShared>) {
        let shared = Arc::new(MasterShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
                meter_l: MeterState::new(),
                meter_r: MeterState::new(),
            },
            shared,
        )
    }

    /// Apply the master fader to the summed buffers and run the meters
    pub fn process(&mut self, out_l: &mut [Sample], out_r: &mut [Sample], elapsed_ms: f64) {
        let gain = db_to_gain(self.shared.gain_db.load());
        for s in out_l.iter_mut() {
            *s *= gain;
        }
        for s in out_r.iter_mut() {
            *s *= gain;
        }

        self.meter_l.process(block_peak(out_l), elapsed_ms);
        self.meter_r.process(block_peak(out_r), elapsed_ms);
        self.shared.peak_l.store(self.meter_l.peak());
        self.shared.peak_r.store(self.meter_r.peak());
        self.shared.hold_l.store(self.meter_l.peak_hold());
        self.shared.hold_r.store(self.meter_r.peak_hold());
    }

    pub fn reset_meters(&mut self) {
        self.meter_l.reset();
        self.meter_r.reset();
        self.shared.peak_l.store(0.0);
        self.shared.peak_r.store(0.0);
        self.shared.hold_l.store(0.0);
        self.shared.hold_r.store(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_master_gain_applied() {
        let (mut bus, shared) = MasterBus::new();
        shared.gain_db.store(-6.0);
        let mut l = vec![1.0; 64];
        let mut r = vec![0.5; 64];
        bus.process(&mut l, &mut r, 1.0);
        assert_abs_diff_eq!(l[0], db_to_gain(-6.0), epsilon = 1e-12);
        assert_abs_diff_eq!(r[0], 0.5 * db_to_gain(-6.0), epsilon = 1e-12);
        assert_abs_diff_eq!(shared.peak_l.load(), db_to_gain(-6.0), epsilon = 1e-12);
    }

    #[test]
    fn test_track_meter_folds_max() {
        let meter = TrackMeter::new();
        meter.update(0.4, 0.1);
        meter.update(0.2, 0.3);
        assert_eq!(meter.peaks(), (0.4, 0.3));
        meter.reset();
        assert_eq!(meter.peaks(), (0.0, 0.0));
    }

    #[test]
    fn test_master_hold_published() {
        let (mut bus, shared) = MasterBus::new();
        let mut l = vec![1.0; 16];
        let mut r = vec![1.0; 16];
        bus.process(&mut l, &mut r, 1.0);
        // Silence afterwards: the hold cell keeps the peak for a while
        let mut zl = vec![0.0; 16];
        let mut zr = vec![0.0; 16];
        bus.process(&mut zl, &mut zr, 1.0);
        assert_eq!(shared.hold_l.load(), 1.0);
        assert_eq!(shared.peak_l.load(), 0.0);
    }
}
