//! Meter ballistics
//!
//! Per-channel peak with hold and linear fall. The audio thread feeds block
//! peaks and the elapsed block time; held values are published to the UI
//! through relaxed atomics elsewhere.

/// Default peak-hold time in milliseconds
pub const DEFAULT_PEAK_HOLD_MS: f64 = 1500.0;

/// Default fall rate in amplitude units per millisecond
pub const DEFAULT_FALL_PER_MS: f64 = 1.0 / 1000.0;

/// Peak/hold state for a single channel
#[derive(Debug, Clone)]
pub struct MeterState {
    peak: f64,
    peak_hold: f64,
    total_peak_time_ms: f64,
    falling: bool,
    hold_ms: f64,
    fall_per_ms: f64,
}

impl Default for MeterState {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterState {
    pub fn new() -> Self {
        Self::with_ballistics(DEFAULT_PEAK_HOLD_MS, DEFAULT_FALL_PER_MS)
    }

    pub fn with_ballistics(hold_ms: f64, fall_per_ms: f64) -> Self {
        Self {
            peak: 0.0,
            peak_hold: 0.0,
            total_peak_time_ms: 0.0,
            falling: false,
            hold_ms,
            fall_per_ms,
        }
    }

    /// Feed one block's peak amplitude and the block duration
    pub fn process(&mut self, block_peak: f64, elapsed_ms: f64) {
        self.peak = block_peak;

        if block_peak >= self.peak_hold {
            self.peak_hold = block_peak;
            self.total_peak_time_ms = 0.0;
            self.falling = false;
            return;
        }

        self.total_peak_time_ms += elapsed_ms;
        if self.total_peak_time_ms > self.hold_ms {
            self.falling = true;
        }
        if self.falling {
            self.peak_hold = (self.peak_hold - self.fall_per_ms * elapsed_ms).max(block_peak);
            if self.peak_hold <= block_peak {
                self.falling = false;
                self.total_peak_time_ms = 0.0;
            }
        }
    }

    /// Instantaneous block peak
    #[inline]
    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Held peak with ballistics applied
    #[inline]
    pub fn peak_hold(&self) -> f64 {
        self.peak_hold
    }

    #[inline]
    pub fn is_falling(&self) -> bool {
        self.falling
    }

    pub fn reset(&mut self) {
        self.peak = 0.0;
        self.peak_hold = 0.0;
        self.total_peak_time_ms = 0.0;
        self.falling = false;
    }
}

/// Largest absolute sample in a block
#[inline]
pub fn block_peak(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0_f64, |acc, &s| acc.max(s.abs()))
}
