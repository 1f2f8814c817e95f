//! Pitch-preserving time stretch
//!
//! Phase vocoder with STFT analysis, per-bin phase propagation, and
//! overlap-add resynthesis. Hann window with 75% overlap.
//!
//! The editor's onset-drag gesture builds on [`three_point_ratios`]: the
//! audio between three anchor frames is stretched so the middle anchor moves
//! while the outer two stay fixed.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use wl_core::Sample;

/// Default FFT size: quality/latency tradeoff for musical material
const DEFAULT_FFT_SIZE: usize = 2048;

/// 75% overlap (hop = fft_size / 4)
const OVERLAP_FACTOR: usize = 4;

/// Stretch ratios for a three-point edit.
///
/// `[start, src]` is stretched so `src` lands on `dest`; `[src, end]` so that
/// `end` stays fixed. A zero ratio means the respective half is discarded
/// (the dragged point collapses onto the adjacent anchor).
pub fn three_point_ratios(start: u64, src: u64, dest: u64, end: u64) -> (f64, f64) {
    let first = if src > start {
        (dest - start) as f64 / (src - start) as f64
    } else {
        0.0
    };
    let second = if end > src {
        (end - dest) as f64 / (end - src) as f64
    } else {
        0.0
    };
    (first, second)
}

/// Phase vocoder time stretcher (mono; run once per channel)
pub struct PhaseVocoder {
    fft_size: usize,
    hop_a: usize,
    window: Vec<f64>,
    omega: Vec<f64>,
    prev_phase: Vec<f64>,
    phase_acc: Vec<f64>,
    planner: FftPlanner<f64>,
}

impl PhaseVocoder {
    pub fn new(fft_size: usize) -> Self {
        let hop_a = fft_size / OVERLAP_FACTOR;
        // Expected per-bin phase advance over one analysis hop
        let omega: Vec<f64> = (0..fft_size)
            .map(|k| 2.0 * PI * k as f64 * hop_a as f64 / fft_size as f64)
            .collect();

        Self {
            fft_size,
            hop_a,
            window: hann_window(fft_size),
            omega,
            prev_phase: vec![0.0; fft_size],
            phase_acc: vec![0.0; fft_size],
            planner: FftPlanner::new(),
        }
    }

    pub fn new_default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }

    /// Stretch `input` by `factor` (> 1.0 lengthens, < 1.0 shortens).
    ///
    /// Output length is `round(input.len() * factor)`. A factor of exactly
    /// 1.0 returns the input untouched; a non-positive factor returns an
    /// empty buffer.
    pub fn process(&mut self, input: &[Sample], factor: f64) -> Vec<Sample> {
        if input.is_empty() || factor <= 0.0 {
            return Vec::new();
        }
        let out_len = (input.len() as f64 * factor).round() as usize;
        if out_len == 0 {
            return Vec::new();
        }
        if (factor - 1.0).abs() < 1e-12 {
            return input.to_vec();
        }

        let fft_size = self.fft_size;
        let hop_a = self.hop_a;
        let hop_s = ((hop_a as f64) * factor).round().max(1.0) as usize;

        // Guarantee at least one full analysis frame
        let padded;
        let src: &[Sample] = if input.len() < fft_size {
            let mut p = input.to_vec();
            p.resize(fft_size, 0.0);
            padded = p;
            &padded
        } else {
            input
        };

        let n_frames = 1 + (src.len() - fft_size) / hop_a;
        let synth_len = (n_frames - 1) * hop_s + fft_size;
        let mut out = vec![0.0; synth_len];
        let mut norm = vec![0.0; synth_len];

        self.prev_phase.fill(0.0);
        self.phase_acc.fill(0.0);

        let fft = self.planner.plan_fft_forward(fft_size);
        let ifft = self.planner.plan_fft_inverse(fft_size);
        let mut spectrum: Vec<Complex<f64>> = vec![Complex::default(); fft_size];

        for frame in 0..n_frames {
            let a_pos = frame * hop_a;
            for (i, bin) in spectrum.iter_mut().enumerate() {
                *bin = Complex::new(src[a_pos + i] * self.window[i], 0.0);
            }
            fft.process(&mut spectrum);

            for k in 0..fft_size {
                let mag = spectrum[k].norm();
                let phase = spectrum[k].arg();
                if frame == 0 {
                    // First frame passes through with its analysis phase
                    self.phase_acc[k] = phase;
                } else {
                    let delta = wrap_phase(phase - self.prev_phase[k] - self.omega[k]);
                    let advance_per_sample = (self.omega[k] + delta) / hop_a as f64;
                    self.phase_acc[k] =
                        wrap_phase(self.phase_acc[k] + advance_per_sample * hop_s as f64);
                }
                self.prev_phase[k] = phase;
                spectrum[k] = Complex::from_polar(mag, self.phase_acc[k]);
            }

            ifft.process(&mut spectrum);
            let s_pos = frame * hop_s;
            let scale = 1.0 / fft_size as f64;
            for i in 0..fft_size {
                out[s_pos + i] += spectrum[i].re * scale * self.window[i];
                norm[s_pos + i] += self.window[i] * self.window[i];
            }
        }

        for (o, n) in out.iter_mut().zip(&norm) {
            if *n > 1e-9 {
                *o /= *n;
            }
        }

        out.resize(out_len, 0.0);
        out
    }

    /// Stretch `input` to exactly `target_len` samples.
    ///
    /// The vocoder's rounding is absorbed by trimming or padding with the
    /// final sample, so spliced results keep anchor frames in place.
    pub fn stretch_exact(&mut self, input: &[Sample], target_len: usize) -> Vec<Sample> {
        if target_len == 0 {
            return Vec::new();
        }
        if input.is_empty() {
            return vec![0.0; target_len];
        }
        if target_len == input.len() {
            return input.to_vec();
        }
        let factor = target_len as f64 / input.len() as f64;
        let mut out = self.process(input, factor);
        let pad = out.last().copied().unwrap_or(0.0);
        out.resize(target_len, pad);
        out
    }
}

fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos()))
        .collect()
}

/// Wrap a phase difference into (-π, π]
#[inline]
fn wrap_phase(x: f64) -> f64 {
    x - 2.0 * PI * (x / (2.0 * PI)).round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f64, sample_rate: f64, n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_ratios() {
        let (a, b) = three_point_ratios(2000, 5000, 6000, 8000);
        assert_abs_diff_eq!(a, 4.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b, 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ratios_degenerate() {
        // src on start: first half discarded
        assert_eq!(three_point_ratios(100, 100, 150, 200).0, 0.0);
        // src on end: second half discarded
        assert_eq!(three_point_ratios(100, 200, 150, 200).1, 0.0);
    }

    #[test]
    fn test_output_length() {
        let mut pv = PhaseVocoder::new(512);
        let input = sine(440.0, 44100.0, 10_000);
        assert_eq!(pv.process(&input, 1.5).len(), 15_000);
        assert_eq!(pv.process(&input, 0.5).len(), 5_000);
    }

    #[test]
    fn test_unity_factor_is_identity() {
        let mut pv = PhaseVocoder::new(512);
        let input = sine(440.0, 44100.0, 4096);
        assert_eq!(pv.process(&input, 1.0), input);
    }

    #[test]
    fn test_stretch_exact_length() {
        let mut pv = PhaseVocoder::new(512);
        let input = sine(220.0, 44100.0, 3000);
        for target in [1, 100, 2999, 3000, 3001, 9000] {
            assert_eq!(pv.stretch_exact(&input, target).len(), target);
        }
        assert!(pv.stretch_exact(&input, 0).is_empty());
    }

    #[test]
    fn test_pitch_preserved() {
        // A stretched sine keeps its dominant frequency
        let sr = 44100.0;
        let mut pv = PhaseVocoder::new_default();
        let input = sine(441.0, sr, 44100);
        let out = pv.process(&input, 1.5);

        // Count zero crossings in the steady middle of the result
        let mid = &out[out.len() / 4..3 * out.len() / 4];
        let crossings = mid.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
        let seconds = mid.len() as f64 / sr;
        let freq = crossings as f64 / seconds;
        assert!((freq - 441.0).abs() < 15.0, "dominant freq was {freq}");
    }

    #[test]
    fn test_short_input() {
        let mut pv = PhaseVocoder::new(512);
        let out = pv.process(&[0.5; 64], 2.0);
        assert_eq!(out.len(), 128);
    }
}
