//! Onset detection
//!
//! Spectral-flux detector over fixed-size hops: Hann-windowed magnitude
//! spectra, positive flux between consecutive windows, running-max
//! normalization, and peak picking against the onset threshold. Windows whose
//! RMS falls below the silence threshold never produce onsets.

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::f64::consts::PI;
use std::sync::Arc;

use wl_core::{EditError, EditResult, Progress, Sample};

/// Analysis window length in samples
pub const ONSET_WINDOW: usize = 512;

/// Hop between analysis windows in samples
pub const ONSET_HOP: usize = 256;

/// Detection parameters
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OnsetParams {
    /// Peak-picking threshold over the normalized flux, 0.0 ..= 1.0
    pub onset_threshold: f64,
    /// Windows quieter than this (dBFS, -90.0 ..= 0.0) are ignored
    pub silence_threshold_db: f64,
}

impl Default for OnsetParams {
    fn default() -> Self {
        Self {
            onset_threshold: 0.3,
            silence_threshold_db: -60.0,
        }
    }
}

impl OnsetParams {
    pub fn clamped(self) -> Self {
        Self {
            onset_threshold: self.onset_threshold.clamp(0.0, 1.0),
            silence_threshold_db: self.silence_threshold_db.clamp(-90.0, 0.0),
        }
    }
}

/// Spectral-flux onset detector
pub struct OnsetDetector {
    fft: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    frame: Vec<f64>,
    scratch: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    prev_mag: Vec<f64>,
}

impl Default for OnsetDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OnsetDetector {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(ONSET_WINDOW);
        let spectrum = fft.make_output_vec();
        let bins = spectrum.len();

        Self {
            fft,
            window: (0..ONSET_WINDOW)
                .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (ONSET_WINDOW - 1) as f64).cos()))
                .collect(),
            frame: vec![0.0; ONSET_WINDOW],
            scratch: vec![0.0; ONSET_WINDOW],
            spectrum,
            prev_mag: vec![0.0; bins],
        }
    }

    /// Detect onsets over a mono sample stream.
    ///
    /// Returns frame offsets local to the stream, strictly increasing.
    /// Reports fractional progress against `nframes` and aborts with
    /// `Cancelled` when the callback returns false.
    pub fn detect<I, P>(
        &mut self,
        samples: I,
        nframes: usize,
        params: OnsetParams,
        progress: &mut P,
    ) -> EditResult<Vec<u64>>
    where
        I: IntoIterator<Item = Sample>,
        P: Progress + ?Sized,
    {
        let params = params.clamped();
        let mut source = samples.into_iter();

        self.prev_mag.fill(0.0);
        self.frame.fill(0.0);

        // Flux and loudness per hop, gathered in one streaming pass
        let mut flux = Vec::with_capacity(nframes / ONSET_HOP + 1);
        let mut loud_db = Vec::with_capacity(flux.capacity());

        // Prime the first full window
        let mut filled = 0;
        for slot in self.frame.iter_mut() {
            match source.next() {
                Some(s) => {
                    *slot = s;
                    filled += 1;
                }
                None => break,
            }
        }
        if filled < ONSET_WINDOW {
            return Ok(Vec::new());
        }

        let mut consumed = ONSET_WINDOW;
        loop {
            let (f, rms) = self.analyze_window();
            flux.push(f);
            loud_db.push(if rms > 0.0 {
                20.0 * rms.log10()
            } else {
                f64::NEG_INFINITY
            });

            if flux.len() % 64 == 0 && !progress.report(consumed as f64 / nframes.max(1) as f64) {
                return Err(EditError::Cancelled);
            }

            // Slide by one hop
            self.frame.copy_within(ONSET_HOP.., 0);
            let mut got = 0;
            for slot in self.frame[ONSET_WINDOW - ONSET_HOP..].iter_mut() {
                match source.next() {
                    Some(s) => {
                        *slot = s;
                        got += 1;
                    }
                    None => break,
                }
            }
            if got < ONSET_HOP {
                break;
            }
            consumed += ONSET_HOP;
        }

        if !progress.report(1.0) {
            return Err(EditError::Cancelled);
        }

        let onsets = pick_peaks(&flux, &loud_db, params);
        validate_monotonic(&onsets)?;
        Ok(onsets)
    }

    /// Flux and RMS of the current window
    fn analyze_window(&mut self) -> (f64, f64) {
        let mut energy = 0.0;
        for i in 0..ONSET_WINDOW {
            energy += self.frame[i] * self.frame[i];
            self.scratch[i] = self.frame[i] * self.window[i];
        }
        let rms = (energy / ONSET_WINDOW as f64).sqrt();

        // realfft scratch input is consumed in place
        self.fft
            .process(&mut self.scratch, &mut self.spectrum)
            .expect("window and spectrum sizes fixed at construction");

        let mut flux = 0.0;
        for (bin, prev) in self.spectrum.iter().zip(self.prev_mag.iter_mut()) {
            let mag = bin.norm();
            flux += (mag - *prev).max(0.0);
            *prev = mag;
        }
        (flux, rms)
    }
}

fn pick_peaks(flux: &[f64], loud_db: &[f64], params: OnsetParams) -> Vec<u64> {
    let max_flux = flux.iter().cloned().fold(0.0_f64, f64::max);
    if max_flux <= 0.0 {
        return Vec::new();
    }

    let mut onsets = Vec::new();
    for h in 1..flux.len() {
        let nf = flux[h] / max_flux;
        let rising = nf > flux[h - 1] / max_flux;
        let peak = h + 1 >= flux.len() || nf >= flux[h + 1] / max_flux;
        if rising
            && peak
            && nf >= params.onset_threshold
            && loud_db[h] >= params.silence_threshold_db
        {
            onsets.push((h * ONSET_HOP) as u64);
        }
    }
    onsets
}

fn validate_monotonic(onsets: &[u64]) -> EditResult<()> {
    for pair in onsets.windows(2) {
        if pair[1] <= pair[0] {
            return Err(EditError::OnsetSequenceCorrupt(format!(
                "onset {} does not advance past {}",
                pair[1], pair[0]
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wl_core::NoProgress;

    /// Silence with a burst starting at `at`
    fn burst_signal(len: usize, at: usize) -> Vec<Sample> {
        let mut v = vec![0.0; len];
        for (i, s) in v[at..(at + 2048).min(len)].iter_mut().enumerate() {
            *s = 0.8 * (2.0 * PI * 1000.0 * i as f64 / 44100.0).sin();
        }
        v
    }

    #[test]
    fn test_detects_burst() {
        let signal = burst_signal(44100, 22050);
        let mut det = OnsetDetector::new();
        let onsets = det
            .detect(
                signal.iter().copied(),
                signal.len(),
                OnsetParams::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert!(!onsets.is_empty());
        // The onset lands within a couple of hops of the burst
        let first = onsets[0];
        assert!(
            (first as i64 - 22050).unsigned_abs() <= (2 * ONSET_HOP) as u64,
            "first onset at {first}"
        );
    }

    #[test]
    fn test_silence_produces_nothing() {
        let mut det = OnsetDetector::new();
        let onsets = det
            .detect(
                std::iter::repeat(0.0).take(20_000),
                20_000,
                OnsetParams::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert!(onsets.is_empty());
    }

    #[test]
    fn test_silence_threshold_gates_quiet_bursts() {
        let signal: Vec<Sample> = burst_signal(44100, 22050)
            .into_iter()
            .map(|s| s * 1e-5) // about -100 dBFS
            .collect();
        let mut det = OnsetDetector::new();
        let onsets = det
            .detect(
                signal.iter().copied(),
                signal.len(),
                OnsetParams {
                    onset_threshold: 0.1,
                    silence_threshold_db: -40.0,
                },
                &mut NoProgress,
            )
            .unwrap();
        assert!(onsets.is_empty());
    }

    #[test]
    fn test_monotonic_output() {
        let mut signal = Vec::new();
        for k in 0..4 {
            signal.extend(burst_signal(11025, 2000 + k * 100));
        }
        let mut det = OnsetDetector::new();
        let onsets = det
            .detect(
                signal.iter().copied(),
                signal.len(),
                OnsetParams::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert!(onsets.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_cancel() {
        let signal = burst_signal(200_000, 50_000);
        let mut det = OnsetDetector::new();
        let mut cancel_now = |_f: f64| false;
        let err = det
            .detect(
                signal.iter().copied(),
                signal.len(),
                OnsetParams::default(),
                &mut cancel_now,
            )
            .unwrap_err();
        assert!(matches!(err, EditError::Cancelled));
    }

    #[test]
    fn test_short_stream() {
        let mut det = OnsetDetector::new();
        let onsets = det
            .detect(
                std::iter::repeat(0.5).take(100),
                100,
                OnsetParams::default(),
                &mut NoProgress,
            )
            .unwrap();
        assert!(onsets.is_empty());
    }
}
