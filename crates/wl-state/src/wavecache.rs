//! Waveform cache
//!
//! Multi-resolution min/max pyramid per channel. The smallest level scans the
//! raw samples once; every larger level is derived by merging bin-level
//! min/max from a smaller one. Queries are constant time for any requested
//! bin size that a cached level divides.
//!
//! The cache is recomputed in full after any mutation of the underlying
//! sequence; recomputation honors the progress callback and leaves no partial
//! cache behind when cancelled.

use wl_core::{EditError, EditResult, Progress, Sample};

use crate::AudioSlice;

/// Default bin sizes in samples per channel, ascending
pub const DEFAULT_BIN_SIZES: [usize; 2] = [10, 100];

/// Min/max extrema of one bin
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WaveBin {
    pub min: Sample,
    pub max: Sample,
}

impl Default for WaveBin {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl WaveBin {
    /// Merge identity: any sample or bin folded in replaces both extrema
    const IDENTITY: Self = Self {
        min: Sample::INFINITY,
        max: Sample::NEG_INFINITY,
    };

    #[inline]
    fn fold_sample(&mut self, s: Sample) {
        if s < self.min {
            self.min = s;
        }
        if s > self.max {
            self.max = s;
        }
    }

    #[inline]
    fn fold_bin(&mut self, other: WaveBin) {
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }
}

/// One resolution level: per channel, one `WaveBin` per bin
#[derive(Debug, Clone)]
struct CacheLevel {
    bin_size: usize,
    channels: Vec<Vec<WaveBin>>,
}

/// Multi-resolution min/max pyramid over an interleaved sample snapshot
#[derive(Debug, Clone)]
pub struct WaveformCache {
    levels: Vec<CacheLevel>,
}

impl WaveformCache {
    /// Compute a cache over `slice` with the default bin sizes
    pub fn compute<P: Progress + ?Sized>(
        slice: &AudioSlice,
        channels: usize,
        progress: &mut P,
    ) -> EditResult<Self> {
        Self::compute_with_bins(slice, channels, &DEFAULT_BIN_SIZES, progress)
    }

    /// Compute a cache with explicit ascending bin sizes
    pub fn compute_with_bins<P: Progress + ?Sized>(
        slice: &AudioSlice,
        channels: usize,
        bin_sizes: &[usize],
        progress: &mut P,
    ) -> EditResult<Self> {
        if channels == 0 || bin_sizes.is_empty() || bin_sizes.contains(&0) {
            return Err(EditError::Audio("waveform cache needs channels and bins".into()));
        }
        debug_assert!(bin_sizes.windows(2).all(|w| w[0] < w[1]));

        let nframes = slice.len() / channels;
        let base_bin = bin_sizes[0];
        let base_len = nframes.div_ceil(base_bin);

        // Base level: one streaming pass over the raw samples
        let mut base: Vec<Vec<WaveBin>> = vec![vec![WaveBin::IDENTITY; base_len]; channels];
        let mut channel = 0;
        let mut frame = 0usize;
        for s in slice.iter() {
            base[channel][frame / base_bin].fold_sample(*s);
            channel += 1;
            if channel == channels {
                channel = 0;
                frame += 1;
                if frame % 65_536 == 0 && !progress.report(frame as f64 / nframes.max(1) as f64) {
                    return Err(EditError::Cancelled);
                }
            }
        }

        let mut levels = vec![CacheLevel {
            bin_size: base_bin,
            channels: base,
        }];

        // Derived levels: merge bins of the largest dividing smaller level
        for &bin in &bin_sizes[1..] {
            let source = levels
                .iter()
                .rev()
                .find(|l| bin % l.bin_size == 0)
                .ok_or(EditError::NoSuitableCache(bin))?;
            let factor = bin / source.bin_size;
            let derived: Vec<Vec<WaveBin>> = source
                .channels
                .iter()
                .map(|bins| {
                    bins.chunks(factor)
                        .map(|chunk| {
                            let mut merged = WaveBin::IDENTITY;
                            for b in chunk {
                                merged.fold_bin(*b);
                            }
                            merged
                        })
                        .collect()
                })
                .collect();
            levels.push(CacheLevel {
                bin_size: bin,
                channels: derived,
            });
            if !progress.report(1.0) {
                return Err(EditError::Cancelled);
            }
        }

        Ok(Self { levels })
    }

    /// Index of the largest cached level whose bin divides `requested_bin`
    pub fn cache_index(&self, requested_bin: usize) -> EditResult<usize> {
        self.levels
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| requested_bin != 0 && requested_bin % l.bin_size == 0)
            .map(|(i, _)| i)
            .ok_or(EditError::NoSuitableCache(requested_bin))
    }

    /// Cached bin size at a level index
    pub fn bin_size(&self, level: usize) -> Option<usize> {
        self.levels.get(level).map(|l| l.bin_size)
    }

    /// Extrema of the samples covering
    /// `[offset * bin_size, (offset + 1) * bin_size)` on one channel.
    ///
    /// Served from the largest dividing level; merging a fixed
    /// `bin_size / cached_bin` bins keeps the lookup constant time.
    pub fn min_max(&self, channel: usize, bin_size: usize, offset: usize) -> EditResult<WaveBin> {
        let level = &self.levels[self.cache_index(bin_size)?];
        let bins = level
            .channels
            .get(channel)
            .ok_or_else(|| {
                EditError::out_of_range("channel", channel as u64, level.channels.len() as u64)
            })?;

        let factor = bin_size / level.bin_size;
        let start = offset * factor;
        if start >= bins.len() {
            return Err(EditError::out_of_range(
                "bin offset",
                offset as u64,
                bins.len().div_ceil(factor) as u64,
            ));
        }
        let mut merged = WaveBin::IDENTITY;
        for b in &bins[start..(start + factor).min(bins.len())] {
            merged.fold_bin(*b);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wl_core::NoProgress;

    /// Mono ramp 0, 1, 2, ... as an interleaved slice
    fn ramp(n: usize) -> AudioSlice {
        AudioSlice::from_vec((0..n).map(|i| i as Sample).collect())
    }

    #[test]
    fn test_base_level_extrema() {
        let cache = WaveformCache::compute(&ramp(1000), 1, &mut NoProgress).unwrap();
        let bin = cache.min_max(0, 10, 3).unwrap();
        assert_eq!(bin.min, 30.0);
        assert_eq!(bin.max, 39.0);
    }

    #[test]
    fn test_derived_level_matches_raw() {
        let cache = WaveformCache::compute(&ramp(1000), 1, &mut NoProgress).unwrap();
        let bin = cache.min_max(0, 100, 7).unwrap();
        assert_eq!(bin.min, 700.0);
        assert_eq!(bin.max, 799.0);
    }

    #[test]
    fn test_composite_bin_query() {
        // 200 divides neither level directly but is a multiple of 100
        let cache = WaveformCache::compute(&ramp(1000), 1, &mut NoProgress).unwrap();
        assert_eq!(cache.bin_size(cache.cache_index(200).unwrap()), Some(100));
        let bin = cache.min_max(0, 200, 2).unwrap();
        assert_eq!(bin.min, 400.0);
        assert_eq!(bin.max, 599.0);
    }

    #[test]
    fn test_no_suitable_cache() {
        let cache = WaveformCache::compute(&ramp(100), 1, &mut NoProgress).unwrap();
        assert!(matches!(
            cache.cache_index(7),
            Err(EditError::NoSuitableCache(7))
        ));
    }

    #[test]
    fn test_stereo_channels_independent() {
        let mut samples = Vec::new();
        for f in 0..100 {
            samples.push(f as Sample);
            samples.push(-(f as Sample));
        }
        let cache =
            WaveformCache::compute(&AudioSlice::from_vec(samples), 2, &mut NoProgress).unwrap();
        assert_eq!(cache.min_max(0, 10, 0).unwrap().max, 9.0);
        assert_eq!(cache.min_max(1, 10, 0).unwrap().min, -9.0);
    }

    #[test]
    fn test_partial_final_bin() {
        let cache = WaveformCache::compute(&ramp(25), 1, &mut NoProgress).unwrap();
        let bin = cache.min_max(0, 10, 2).unwrap();
        assert_eq!(bin.min, 20.0);
        assert_eq!(bin.max, 24.0);
        assert!(cache.min_max(0, 10, 3).is_err());
    }

    #[test]
    fn test_cancel_discards_cache() {
        let slice = ramp(1_000_000);
        let mut cancel = |_: f64| false;
        assert!(matches!(
            WaveformCache::compute(&slice, 1, &mut cancel),
            Err(EditError::Cancelled)
        ));
    }
}
