//! Tracks
//!
//! A track is an ordered set of regions sharing one mix bus, with fader gain
//! and mute/solo flags. The UI-side model lives here; the snapshot the audio
//! thread mixes from is built by [`Track::playback`].

use std::sync::Arc;

use wl_core::db_to_gain;
use wl_state::Region;

use crate::{RtTrack, TrackMeter};

/// A mix bus of ordered regions
#[derive(Debug, Clone)]
pub struct Track {
    name: String,
    regions: Vec<Region>,
    fader_gain_db: f64,
    mute: bool,
    solo: bool,
    left_solo: bool,
    right_solo: bool,
    meter: Arc<TrackMeter>,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regions: Vec::new(),
            fader_gain_db: 0.0,
            mute: false,
            solo: false,
            left_solo: false,
            right_solo: false,
            meter: TrackMeter::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Append a region; returns its index
    pub fn add_region(&mut self, region: Region) -> usize {
        self.regions.push(region);
        self.regions.len() - 1
    }

    pub fn remove_region(&mut self, index: usize) -> Option<Region> {
        if index < self.regions.len() {
            Some(self.regions.remove(index))
        } else {
            None
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub fn region_mut(&mut self, index: usize) -> Option<&mut Region> {
        self.regions.get_mut(index)
    }

    #[inline]
    pub fn fader_gain_db(&self) -> f64 {
        self.fader_gain_db
    }

    pub fn set_fader_gain_db(&mut self, db: f64) {
        self.fader_gain_db = db;
    }

    #[inline]
    pub fn mute(&self) -> bool {
        self.mute
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    #[inline]
    pub fn solo(&self) -> bool {
        self.solo
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    #[inline]
    pub fn left_solo(&self) -> bool {
        self.left_solo
    }

    /// Solo the left channel; clears any right solo (at most one may be set)
    pub fn set_left_solo(&mut self, solo: bool) {
        self.left_solo = solo;
        if solo {
            self.right_solo = false;
        }
    }

    #[inline]
    pub fn right_solo(&self) -> bool {
        self.right_solo
    }

    /// Solo the right channel; clears any left solo
    pub fn set_right_solo(&mut self, solo: bool) {
        self.right_solo = solo;
        if solo {
            self.left_solo = false;
        }
    }

    /// Peak cells the audio thread writes for this track
    pub fn meter(&self) -> &Arc<TrackMeter> {
        &self.meter
    }

    /// Global frame one past the furthest region
    pub fn end_frame(&self) -> u64 {
        self.regions
            .iter()
            .map(|r| r.global_end())
            .max()
            .unwrap_or(0)
    }

    /// Immutable snapshot for the audio thread
    pub fn playback(&self) -> RtTrack {
        RtTrack {
            gain: db_to_gain(self.fader_gain_db),
            mute: self.mute,
            solo: self.solo,
            left_solo: self.left_solo,
            right_solo: self.right_solo,
            regions: self.regions.iter().map(|r| r.playback()).collect(),
            meter: Arc::clone(&self.meter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wl_state::AudioSequence;

    fn region(nframes: usize) -> Region {
        let seq = AudioSequence::new("s", 44100, 1, vec![0.25; nframes])
            .unwrap()
            .into_shared();
        Region::new(seq, "r")
    }

    #[test]
    fn test_region_ordering() {
        let mut t = Track::new("drums");
        let a = t.add_region(region(10));
        let b = t.add_region(region(20));
        assert_eq!((a, b), (0, 1));
        assert_eq!(t.regions().len(), 2);

        let removed = t.remove_region(0).unwrap();
        assert_eq!(removed.nframes(), 10);
        assert_eq!(t.regions().len(), 1);
        assert!(t.remove_region(5).is_none());
    }

    #[test]
    fn test_channel_solo_exclusive() {
        let mut t = Track::new("bass");
        t.set_left_solo(true);
        t.set_right_solo(true);
        assert!(!t.left_solo() && t.right_solo());
        t.set_left_solo(true);
        assert!(t.left_solo() && !t.right_solo());
    }

    #[test]
    fn test_end_frame() {
        let mut t = Track::new("keys");
        assert_eq!(t.end_frame(), 0);
        let mut r = region(100);
        r.set_offset(500);
        t.add_region(r);
        t.add_region(region(50));
        assert_eq!(t.end_frame(), 600);
    }

    #[test]
    fn test_playback_snapshot() {
        let mut t = Track::new("gtr");
        t.set_fader_gain_db(-6.0);
        t.add_region(region(64));
        let rt = t.playback();
        assert_eq!(rt.regions.len(), 1);
        assert!((rt.gain - db_to_gain(-6.0)).abs() < 1e-12);
    }
}
