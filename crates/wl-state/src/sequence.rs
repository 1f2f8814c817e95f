//! Audio sequences
//!
//! An `AudioSequence` wraps a piece table of interleaved PCM samples. Edits
//! are non-destructive splices; readers (regions, the audio thread, the
//! clipboard) hold snapshots that stay valid across later edits.
//!
//! Soft links give regions a display name on a sequence they reference
//! without extending its lifetime: the sequence stores weak back-pointers
//! only, pruned whenever the links are enumerated.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use wl_core::{EditError, EditResult, PieceSnapshot, PieceTable, Sample};

/// Interleaved PCM snapshot used as clipboard and splice material
pub type AudioSlice = PieceSnapshot<Sample>;

/// Shared handle to a sequence; the sequence lives as long as its longest
/// holder (a region, the session, or an in-flight audio-thread snapshot)
pub type SharedSequence = Arc<RwLock<AudioSequence>>;

/// Display name a region attaches to a sequence it references
#[derive(Debug)]
pub struct SequenceLink {
    pub name: String,
}

impl SequenceLink {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }
}

/// A versioned sequence of interleaved PCM samples
#[derive(Debug)]
pub struct AudioSequence {
    name: String,
    sample_rate: u32,
    channels: usize,
    samples: PieceTable<Sample>,
    links: Vec<Weak<SequenceLink>>,
}

impl AudioSequence {
    /// Build from decoded interleaved samples.
    ///
    /// Fails when `channels` is zero or the sample count is not a whole
    /// number of frames.
    pub fn new(
        name: impl Into<String>,
        sample_rate: u32,
        channels: usize,
        samples: Vec<Sample>,
    ) -> EditResult<Self> {
        if channels == 0 {
            return Err(EditError::Audio("sequence needs at least one channel".into()));
        }
        if samples.len() % channels != 0 {
            return Err(EditError::Audio(format!(
                "{} samples do not fill whole frames of {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            name: name.into(),
            sample_rate,
            channels,
            samples: PieceTable::from_vec(samples),
            links: Vec::new(),
        })
    }

    /// Independent clone of another sequence's current contents
    pub fn hard_clone(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples: PieceTable::from_snapshot(&self.samples.snapshot()),
            links: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedSequence {
        Arc::new(RwLock::new(self))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frame count; one frame holds one sample per channel
    #[inline]
    pub fn nframes(&self) -> u64 {
        (self.samples.len() / self.channels) as u64
    }

    /// Single sample lookup, O(log n)
    pub fn sample(&self, channel: usize, frame: u64) -> EditResult<Sample> {
        if channel >= self.channels {
            return Err(EditError::out_of_range(
                "channel",
                channel as u64,
                self.channels as u64,
            ));
        }
        if frame >= self.nframes() {
            return Err(EditError::out_of_range("frame", frame, self.nframes()));
        }
        self.samples
            .get(frame as usize * self.channels + channel)
    }

    /// Snapshot of the whole sequence
    pub fn snapshot(&self) -> AudioSlice {
        self.samples.snapshot()
    }

    /// Snapshot of frames `[frame_start, frame_end)`
    pub fn slice(&self, frame_start: u64, frame_end: u64) -> EditResult<AudioSlice> {
        self.check_frames(frame_start, frame_end)?;
        self.samples.slice(
            frame_start as usize * self.channels,
            frame_end as usize * self.channels,
        )
    }

    /// Iterate one channel of `[frame_start, frame_end)` in frame order
    pub fn channel_samples(
        &self,
        channel: usize,
        frame_start: u64,
        frame_end: u64,
    ) -> EditResult<impl Iterator<Item = Sample> + '_> {
        if channel >= self.channels {
            return Err(EditError::out_of_range(
                "channel",
                channel as u64,
                self.channels as u64,
            ));
        }
        self.check_frames(frame_start, frame_end)?;
        let take = (frame_end - frame_start) as usize;
        Ok(self
            .samples
            .cursor(frame_start as usize * self.channels + channel)
            .step_by(self.channels)
            .take(take)
            .copied())
    }

    /// Splice a snapshot's frames in before `at_frame`
    pub fn insert(&mut self, slice: &AudioSlice, at_frame: u64) -> EditResult<()> {
        self.check_alignment(slice)?;
        if at_frame > self.nframes() {
            return Err(EditError::out_of_range("frame", at_frame, self.nframes()));
        }
        self.samples
            .insert(at_frame as usize * self.channels, slice)?;
        debug_assert_eq!(self.samples.len() % self.channels, 0);
        Ok(())
    }

    /// Remove frames `[frame_start, frame_end)`
    pub fn remove(&mut self, frame_start: u64, frame_end: u64) -> EditResult<()> {
        self.check_frames(frame_start, frame_end)?;
        self.samples.remove(
            frame_start as usize * self.channels,
            frame_end as usize * self.channels,
        )?;
        debug_assert_eq!(self.samples.len() % self.channels, 0);
        Ok(())
    }

    /// Replace frames `[frame_start, frame_end)` with a snapshot's contents.
    /// One history entry.
    pub fn replace(
        &mut self,
        slice: &AudioSlice,
        frame_start: u64,
        frame_end: u64,
    ) -> EditResult<()> {
        self.check_alignment(slice)?;
        self.check_frames(frame_start, frame_end)?;
        self.samples.replace(
            slice,
            frame_start as usize * self.channels,
            frame_end as usize * self.channels,
        )?;
        debug_assert_eq!(self.samples.len() % self.channels, 0);
        Ok(())
    }

    pub fn undo(&mut self) -> EditResult<()> {
        self.samples.undo()
    }

    pub fn redo(&mut self) -> EditResult<()> {
        self.samples.redo()
    }

    pub fn query_undo(&self) -> EditResult<&'static str> {
        self.samples.query_undo()
    }

    pub fn query_redo(&self) -> EditResult<&'static str> {
        self.samples.query_redo()
    }

    /// Attach a weak back-pointer to a referencing link
    pub fn add_soft_link(&mut self, link: &Arc<SequenceLink>) {
        self.links.push(Arc::downgrade(link));
    }

    /// Live links; dangling entries are pruned here
    pub fn soft_links(&mut self) -> Vec<Arc<SequenceLink>> {
        self.links.retain(|w| w.strong_count() > 0);
        self.links.iter().filter_map(Weak::upgrade).collect()
    }

    fn check_frames(&self, start: u64, end: u64) -> EditResult<()> {
        if start > end || end > self.nframes() {
            return Err(EditError::OutOfRange(format!(
                "frames {start}..{end} invalid for sequence of {} frames",
                self.nframes()
            )));
        }
        Ok(())
    }

    fn check_alignment(&self, slice: &AudioSlice) -> EditResult<()> {
        if slice.len() % self.channels != 0 {
            return Err(EditError::Audio(format!(
                "slice of {} samples is not frame-aligned for {} channels",
                slice.len(),
                self.channels
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_seq(nframes: u64) -> AudioSequence {
        // left channel counts up, right channel counts down
        let mut samples = Vec::new();
        for f in 0..nframes {
            samples.push(f as Sample);
            samples.push(-(f as Sample));
        }
        AudioSequence::new("test", 44100, 2, samples).unwrap()
    }

    #[test]
    fn test_frame_invariant() {
        let seq = stereo_seq(10);
        assert_eq!(seq.nframes(), 10);
        assert_eq!(seq.sample(0, 3).unwrap(), 3.0);
        assert_eq!(seq.sample(1, 3).unwrap(), -3.0);
    }

    #[test]
    fn test_rejects_ragged_input() {
        assert!(AudioSequence::new("bad", 44100, 2, vec![0.0; 5]).is_err());
        assert!(AudioSequence::new("bad", 44100, 0, vec![]).is_err());
    }

    #[test]
    fn test_splice_keeps_frames_whole() {
        let mut seq = stereo_seq(10);
        let mid = seq.slice(2, 5).unwrap();
        seq.insert(&mid, 0).unwrap();
        assert_eq!(seq.nframes(), 13);
        assert_eq!(seq.sample(0, 0).unwrap(), 2.0);

        seq.remove(0, 3).unwrap();
        assert_eq!(seq.nframes(), 10);
        assert_eq!(seq.sample(0, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_undo_redo_through_piece_table() {
        let mut seq = stereo_seq(4);
        seq.remove(0, 2).unwrap();
        assert_eq!(seq.nframes(), 2);
        seq.undo().unwrap();
        assert_eq!(seq.nframes(), 4);
        seq.redo().unwrap();
        assert_eq!(seq.nframes(), 2);
    }

    #[test]
    fn test_misaligned_slice_rejected() {
        let mut seq = stereo_seq(4);
        let odd = AudioSlice::from_vec(vec![1.0; 3]);
        assert!(seq.insert(&odd, 0).is_err());
        assert!(seq.replace(&odd, 0, 1).is_err());
    }

    #[test]
    fn test_channel_iteration() {
        let seq = stereo_seq(8);
        let left: Vec<Sample> = seq.channel_samples(0, 2, 6).unwrap().collect();
        assert_eq!(left, vec![2.0, 3.0, 4.0, 5.0]);
        let right: Vec<Sample> = seq.channel_samples(1, 2, 6).unwrap().collect();
        assert_eq!(right, vec![-2.0, -3.0, -4.0, -5.0]);
    }

    #[test]
    fn test_soft_links_pruned() {
        let mut seq = stereo_seq(2);
        let held = SequenceLink::new("kept");
        {
            let dropped = SequenceLink::new("gone");
            seq.add_soft_link(&held);
            seq.add_soft_link(&dropped);
            assert_eq!(seq.soft_links().len(), 2);
        }
        let live = seq.soft_links();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "kept");
    }

    #[test]
    fn test_hard_clone_is_independent() {
        let mut original = stereo_seq(6);
        let mut cloned = original.hard_clone("clone");
        original.remove(0, 3).unwrap();
        assert_eq!(original.nframes(), 3);
        assert_eq!(cloned.nframes(), 6);
        cloned.remove(0, 1).unwrap();
        assert_eq!(original.nframes(), 3);
    }

    #[test]
    fn test_snapshot_survives_edit() {
        let mut seq = stereo_seq(5);
        let snap = seq.snapshot();
        seq.remove(0, 5).unwrap();
        assert_eq!(snap.len(), 10);
    }
}
