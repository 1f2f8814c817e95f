//! Onset sets
//!
//! Detected transients anchored to sequence-local frames. Within a set the
//! frames are strictly monotonically increasing. Each onset can carry
//! snapshots of the audio on either side of it (the material between the
//! onset and its neighboring anchors before any stretch was applied), so a
//! drag gesture always re-stretches original audio instead of compounding
//! artifacts, and an undone stretch can be replayed.

use wl_core::{EditError, EditResult};

use crate::AudioSlice;

/// One detected transient, frame-local to its sequence
#[derive(Debug, Clone)]
pub struct Onset {
    pub frame: u64,
    /// Pre-stretch audio between the previous anchor and this onset
    pub left_source: Option<AudioSlice>,
    /// Pre-stretch audio between this onset and the next anchor
    pub right_source: Option<AudioSlice>,
}

impl Onset {
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            left_source: None,
            right_source: None,
        }
    }
}

/// Strictly increasing set of onsets
#[derive(Debug, Clone, Default)]
pub struct OnsetSequence {
    onsets: Vec<Onset>,
}

impl OnsetSequence {
    /// Build from detector output; rejects duplicates and regressions
    pub fn from_frames(frames: Vec<u64>) -> EditResult<Self> {
        for pair in frames.windows(2) {
            if pair[1] <= pair[0] {
                return Err(EditError::OnsetSequenceCorrupt(format!(
                    "frame {} does not advance past {}",
                    pair[1], pair[0]
                )));
            }
        }
        Ok(Self {
            onsets: frames.into_iter().map(Onset::new).collect(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.onsets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.onsets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Onset> {
        self.onsets.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Onset> {
        self.onsets.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Onset> {
        self.onsets.iter()
    }

    pub fn frames(&self) -> Vec<u64> {
        self.onsets.iter().map(|o| o.frame).collect()
    }

    /// Anchors around onset `index`: the neighboring onset frames, or the
    /// bounds `[0, total_nframes]` at the edges of the set
    pub fn anchors(&self, index: usize, total_nframes: u64) -> EditResult<(u64, u64)> {
        if index >= self.onsets.len() {
            return Err(EditError::out_of_range(
                "onset",
                index as u64,
                self.onsets.len() as u64,
            ));
        }
        let prev = if index > 0 {
            self.onsets[index - 1].frame
        } else {
            0
        };
        let next = self
            .onsets
            .get(index + 1)
            .map(|o| o.frame)
            .unwrap_or(total_nframes);
        Ok((prev, next))
    }

    /// Move onset `index` to `new_frame`, keeping the set strictly increasing
    pub fn move_onset(&mut self, index: usize, new_frame: u64) -> EditResult<()> {
        if index >= self.onsets.len() {
            return Err(EditError::out_of_range(
                "onset",
                index as u64,
                self.onsets.len() as u64,
            ));
        }
        if index > 0 && new_frame <= self.onsets[index - 1].frame {
            return Err(EditError::OnsetSequenceCorrupt(format!(
                "moving onset {index} to {new_frame} collides with its predecessor"
            )));
        }
        if let Some(next) = self.onsets.get(index + 1) {
            if new_frame >= next.frame {
                return Err(EditError::OnsetSequenceCorrupt(format!(
                    "moving onset {index} to {new_frame} collides with its successor"
                )));
            }
        }
        self.onsets[index].frame = new_frame;
        Ok(())
    }

    /// Drop all cached pre-stretch material (after a committed edit)
    pub fn clear_sources(&mut self) {
        for onset in &mut self.onsets {
            onset.left_source = None;
            onset.right_source = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_construction() {
        assert!(OnsetSequence::from_frames(vec![10, 20, 30]).is_ok());
        assert!(matches!(
            OnsetSequence::from_frames(vec![10, 10]),
            Err(EditError::OnsetSequenceCorrupt(_))
        ));
        assert!(OnsetSequence::from_frames(vec![20, 10]).is_err());
    }

    #[test]
    fn test_anchors() {
        let set = OnsetSequence::from_frames(vec![100, 200, 300]).unwrap();
        assert_eq!(set.anchors(0, 1000).unwrap(), (0, 200));
        assert_eq!(set.anchors(1, 1000).unwrap(), (100, 300));
        assert_eq!(set.anchors(2, 1000).unwrap(), (200, 1000));
        assert!(set.anchors(3, 1000).is_err());
    }

    #[test]
    fn test_move_bounded_by_neighbors() {
        let mut set = OnsetSequence::from_frames(vec![100, 200, 300]).unwrap();
        set.move_onset(1, 150).unwrap();
        assert_eq!(set.frames(), vec![100, 150, 300]);
        assert!(set.move_onset(1, 100).is_err());
        assert!(set.move_onset(1, 300).is_err());
    }

    #[test]
    fn test_sources_cleared() {
        let mut set = OnsetSequence::from_frames(vec![50]).unwrap();
        set.get_mut(0).unwrap().left_source = Some(AudioSlice::from_vec(vec![0.5; 8]));
        set.clear_sources();
        assert!(set.get(0).unwrap().left_source.is_none());
    }
}
