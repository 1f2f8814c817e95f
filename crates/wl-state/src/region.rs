//! Regions
//!
//! A region is a named, movable window onto a shared audio sequence: slice
//! bounds select the visible frames, a global offset places them on the
//! timeline. All edit operations are non-destructive splices through the
//! sequence's piece table; the per-region edit history records which subset
//! changed so undo can restore it.
//!
//! Frame arguments on every public operation are region-local (0 is the
//! first visible frame).

use std::sync::Arc;

use wl_core::{db_to_gain, EditError, EditResult, NoProgress, Progress, Sample};
use wl_dsp::{OnsetDetector, OnsetParams, PhaseVocoder};

use crate::{
    AudioSlice, EditState, OnsetSequence, SequenceLink, SharedSequence, StateHistory,
    WaveformCache,
};

/// Minimum visible width a shrink may leave behind
pub const MIN_REGION_FRAMES: u64 = 2;

/// Outcome of a shrink attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkResult {
    pub success: bool,
    /// Signed frame delta actually applied to the moved edge
    pub delta: i64,
}

impl ShrinkResult {
    const FAILED: Self = Self {
        success: false,
        delta: 0,
    };
}

/// Placement and sample data the mix path needs, published as a snapshot
#[derive(Debug, Clone)]
pub struct RegionPlayback {
    /// Global frame of the first visible sample
    pub offset: u64,
    pub nframes: u64,
    pub channels: usize,
    pub mute: bool,
    /// Visible window, starting at the region's first frame
    pub samples: AudioSlice,
}

/// A windowed view onto an audio sequence
#[derive(Debug, Clone)]
pub struct Region {
    name: String,
    sequence: SharedSequence,
    /// Present when this region references a sequence it does not name-own
    link: Option<Arc<SequenceLink>>,
    slice_start: u64,
    slice_end: u64,
    offset: u64,
    mute: bool,
    subregion: Option<(u64, u64)>,
    linked_onsets: Option<OnsetSequence>,
    channel_onsets: Vec<OnsetSequence>,
    link_channels: bool,
    waveform: Option<WaveformCache>,
    edit_history: StateHistory<EditState>,
}

impl Region {
    /// Region covering the whole sequence, placed at the timeline origin
    pub fn new(sequence: SharedSequence, name: impl Into<String>) -> Self {
        let slice_end = sequence.read().nframes();
        Self {
            name: name.into(),
            sequence,
            link: None,
            slice_start: 0,
            slice_end,
            offset: 0,
            mute: false,
            subregion: None,
            linked_onsets: None,
            channel_onsets: Vec::new(),
            link_channels: false,
            waveform: None,
            edit_history: StateHistory::new(),
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[inline]
    pub fn mute(&self) -> bool {
        self.mute
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    /// Global frame of the first visible sample
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    #[inline]
    pub fn slice_start(&self) -> u64 {
        self.slice_start
    }

    #[inline]
    pub fn slice_end(&self) -> u64 {
        self.slice_end
    }

    /// Visible frame count
    #[inline]
    pub fn nframes(&self) -> u64 {
        self.slice_end - self.slice_start
    }

    /// Global frame one past the last visible sample
    #[inline]
    pub fn global_end(&self) -> u64 {
        self.offset + self.nframes()
    }

    pub fn sequence(&self) -> &SharedSequence {
        &self.sequence
    }

    pub fn channels(&self) -> usize {
        self.sequence.read().channels()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sequence.read().sample_rate()
    }

    /// Sample lookup at a region-local frame
    pub fn sample_local(&self, channel: usize, frame: u64) -> EditResult<Sample> {
        if frame >= self.nframes() {
            return Err(EditError::out_of_range("frame", frame, self.nframes()));
        }
        self.sequence.read().sample(channel, self.slice_start + frame)
    }

    #[inline]
    pub fn link_channels(&self) -> bool {
        self.link_channels
    }

    pub fn edit_history(&self) -> &StateHistory<EditState> {
        &self.edit_history
    }

    /// Snapshot view for the mix path. Slice bounds are clamped against the
    /// live sequence length, so a sequence shortened through another region
    /// sharing it degrades to a narrower window instead of failing.
    pub fn playback(&self) -> RegionPlayback {
        let seq = self.sequence.read();
        let limit = seq.nframes();
        let start = self.slice_start.min(limit);
        let end = self.slice_end.min(limit).max(start);
        let samples = seq
            .slice(start, end)
            .unwrap_or_else(|_| AudioSlice::from_vec(Vec::new()));
        RegionPlayback {
            offset: self.offset,
            nframes: end - start,
            channels: seq.channels(),
            mute: self.mute,
            samples,
        }
    }

    // ── Sample edits ───────────────────────────────────────────────────────

    /// Scale the range by `10^(db/20)`
    pub fn gain<P: Progress + ?Sized>(
        &mut self,
        db: f64,
        range: Option<(u64, u64)>,
        progress: &mut P,
    ) -> EditResult<()> {
        let factor = db_to_gain(db);
        self.apply_per_sample("gain", range, progress, move |s| s * factor)
    }

    /// Scale the range so its peak lands on `10^(target_db/20)`.
    /// A silent range is left untouched.
    pub fn normalize<P: Progress + ?Sized>(
        &mut self,
        target_db: f64,
        range: Option<(u64, u64)>,
        progress: &mut P,
    ) -> EditResult<()> {
        let (a, b) = self.abs_range(range)?;
        let peak = {
            let seq = self.sequence.read();
            seq.slice(a, b)?
                .iter()
                .fold(0.0_f64, |acc, s| acc.max(s.abs()))
        };
        if peak == 0.0 {
            return Ok(());
        }
        let factor = db_to_gain(target_db) / peak;
        self.apply_per_sample("normalize", range, progress, move |s| s * factor)
    }

    /// In-place frame reversal of `[frame_start, frame_end)`
    pub fn reverse(&mut self, frame_start: u64, frame_end: u64) -> EditResult<()> {
        let (a, b) = self.abs_range(Some((frame_start, frame_end)))?;
        if a == b {
            return Ok(());
        }
        let (data, channels) = self.extract(a, b)?;
        let n = data.len() / channels;
        let mut out = vec![0.0; data.len()];
        for f in 0..n {
            let src = (n - 1 - f) * channels;
            out[f * channels..(f + 1) * channels]
                .copy_from_slice(&data[src..src + channels]);
        }
        self.commit_samples(out, a, b, "reverse", &mut NoProgress)
    }

    /// Linear amplitude ramp 0 → 1 over the range
    pub fn fade_in(&mut self, frame_start: u64, frame_end: u64) -> EditResult<()> {
        self.fade(frame_start, frame_end, true)
    }

    /// Linear amplitude ramp 1 → 0 over the range
    pub fn fade_out(&mut self, frame_start: u64, frame_end: u64) -> EditResult<()> {
        self.fade(frame_start, frame_end, false)
    }

    fn fade(&mut self, frame_start: u64, frame_end: u64, rising: bool) -> EditResult<()> {
        let (a, b) = self.abs_range(Some((frame_start, frame_end)))?;
        if a == b {
            return Ok(());
        }
        let (mut data, channels) = self.extract(a, b)?;
        let n = data.len() / channels;
        for f in 0..n {
            let t = if n > 1 { f as f64 / (n - 1) as f64 } else { 1.0 };
            let g = if rising { t } else { 1.0 - t };
            for s in &mut data[f * channels..(f + 1) * channels] {
                *s *= g;
            }
        }
        let desc = if rising { "fade in" } else { "fade out" };
        self.commit_samples(data, a, b, desc, &mut NoProgress)
    }

    /// Replace `[frame_start, frame_end)` with its time-stretched version.
    /// Returns the new end frame of the range.
    pub fn stretch_subregion<P: Progress + ?Sized>(
        &mut self,
        frame_start: u64,
        frame_end: u64,
        ratio: f64,
        progress: &mut P,
    ) -> EditResult<u64> {
        if ratio <= 0.0 {
            return Err(EditError::Audio(format!("invalid stretch ratio {ratio}")));
        }
        let (a, b) = self.abs_range(Some((frame_start, frame_end)))?;
        let (data, channels) = self.extract(a, b)?;
        let src_frames = data.len() / channels;
        let target = (src_frames as f64 * ratio).round() as usize;

        let mut vocoder = PhaseVocoder::new_default();
        let mut out = vec![0.0; target * channels];
        for c in 0..channels {
            let chan: Vec<Sample> = data.iter().skip(c).step_by(channels).copied().collect();
            let stretched = vocoder.stretch_exact(&chan, target);
            for (f, s) in stretched.iter().enumerate() {
                out[f * channels + c] = *s;
            }
            if !progress.report((c + 1) as f64 / channels as f64) {
                return Err(EditError::Cancelled);
            }
        }

        self.commit_samples(out, a, b, "time-stretch", progress)?;
        Ok(frame_start + target as u64)
    }

    /// Stretch `[start, src]` so `src` maps onto `dest` and `[src, end]` so
    /// `end` stays fixed. The total frame count of `[start, end)` never
    /// changes and both boundary frames keep their samples.
    ///
    /// With `channel` set only that channel is stretched; the others keep
    /// their original samples (the set's timing anchors stay comparable
    /// across channels because the length is invariant). `sources` supplies
    /// pre-stretch material for the two halves so a repeated drag gesture
    /// does not compound vocoder artifacts.
    pub fn stretch_three_point<P: Progress + ?Sized>(
        &mut self,
        start: u64,
        src: u64,
        dest: u64,
        end: u64,
        channel: Option<usize>,
        sources: Option<(&AudioSlice, &AudioSlice)>,
        progress: &mut P,
    ) -> EditResult<()> {
        if !(start <= src && src <= end && start <= dest && dest <= end) {
            return Err(EditError::OutOfRange(format!(
                "three-point anchors {start}/{src}->{dest}/{end} out of order"
            )));
        }
        let (a, b) = self.abs_range(Some((start, end)))?;
        if a == b {
            return Ok(());
        }
        let (data, channels) = self.extract(a, b)?;
        if let Some(c) = channel {
            if c >= channels {
                return Err(EditError::out_of_range("channel", c as u64, channels as u64));
            }
        }

        let total = (end - start) as usize;
        let first_len = (dest - start) as usize;
        let second_len = total - first_len;
        let split = (src - start) as usize;

        let mut vocoder = PhaseVocoder::new_default();
        let mut out = data.clone();
        let stretch_all = channel.is_none();

        for c in 0..channels {
            if !stretch_all && channel != Some(c) {
                continue;
            }
            let (left_in, right_in): (Vec<Sample>, Vec<Sample>) = match sources {
                Some((ls, rs)) => (
                    extract_channel(ls, channels, c),
                    extract_channel(rs, channels, c),
                ),
                None => {
                    let chan: Vec<Sample> =
                        data.iter().skip(c).step_by(channels).copied().collect();
                    let (l, r) = chan.split_at(split);
                    (l.to_vec(), r.to_vec())
                }
            };

            // A zero-length half is discarded: the moved point collapses
            // onto the adjacent anchor.
            let mut chan_out = vocoder.stretch_exact(&left_in, first_len);
            chan_out.extend(vocoder.stretch_exact(&right_in, second_len));

            // Pin the leading boundary sample; the trailing one lies outside
            // the replaced range and is untouched by construction.
            if let Some(first) = left_in.first().or(right_in.first()) {
                chan_out[0] = *first;
            }

            for (f, s) in chan_out.iter().enumerate() {
                out[f * channels + c] = *s;
            }
            if !progress.report((c + 1) as f64 / channels as f64) {
                return Err(EditError::Cancelled);
            }
        }

        self.commit_samples(out, a, b, "three-point stretch", progress)
    }

    /// Splice a snapshot in before local frame `at`
    pub fn insert_local(&mut self, piece: &AudioSlice, at: u64) -> EditResult<()> {
        if at > self.nframes() {
            return Err(EditError::out_of_range("frame", at, self.nframes()));
        }
        let before = self.audio_state();
        let added = {
            let mut seq = self.sequence.write();
            seq.insert(piece, self.slice_start + at)?;
            piece.len() as u64 / seq.channels() as u64
        };
        self.slice_end += added;
        self.edit_history.append_state(before, "insert");
        self.refresh_waveform(&mut NoProgress)
    }

    /// Remove local frames `[frame_start, frame_end)`
    pub fn remove_local(&mut self, frame_start: u64, frame_end: u64) -> EditResult<()> {
        let (a, b) = self.abs_range(Some((frame_start, frame_end)))?;
        if a == b {
            return Ok(());
        }
        let before = self.audio_state();
        self.sequence.write().remove(a, b)?;
        self.slice_end -= b - a;
        self.edit_history.append_state(before, "remove");
        self.refresh_waveform(&mut NoProgress)
    }

    /// Snapshot of local frames `[frame_start, frame_end)` for the clipboard
    pub fn get_slice_local(&self, frame_start: u64, frame_end: u64) -> EditResult<AudioSlice> {
        let (a, b) = self.abs_range(Some((frame_start, frame_end)))?;
        self.sequence.read().slice(a, b)
    }

    // ── Slice window ───────────────────────────────────────────────────────

    /// Move the left edge to a new global frame; samples are unchanged
    pub fn shrink_start(&mut self, new_global_start: u64) -> ShrinkResult {
        let delta = new_global_start as i64 - self.offset as i64;
        let new_slice_start = self.slice_start as i64 + delta;
        if new_slice_start < 0
            || new_slice_start + MIN_REGION_FRAMES as i64 > self.slice_end as i64
        {
            log::warn!(
                "shrink_start to {new_global_start} rejected for region '{}'",
                self.name
            );
            return ShrinkResult::FAILED;
        }
        self.slice_start = new_slice_start as u64;
        self.offset = new_global_start;
        ShrinkResult {
            success: true,
            delta,
        }
    }

    /// Move the right edge to a new global frame; samples are unchanged
    pub fn shrink_end(&mut self, new_global_end: u64) -> ShrinkResult {
        let delta = new_global_end as i64 - self.global_end() as i64;
        let new_slice_end = self.slice_end as i64 + delta;
        let limit = self.sequence.read().nframes() as i64;
        if new_slice_end > limit
            || new_slice_end < self.slice_start as i64 + MIN_REGION_FRAMES as i64
        {
            log::warn!(
                "shrink_end to {new_global_end} rejected for region '{}'",
                self.name
            );
            return ShrinkResult::FAILED;
        }
        self.slice_end = new_slice_end as u64;
        ShrinkResult {
            success: true,
            delta,
        }
    }

    // ── Subregion selection ────────────────────────────────────────────────

    pub fn subregion(&self) -> Option<(u64, u64)> {
        self.subregion
    }

    pub fn set_subregion(&mut self, bounds: Option<(u64, u64)>) -> EditResult<()> {
        if let Some((a, b)) = bounds {
            if a >= b || b > self.nframes() {
                return Err(EditError::OutOfRange(format!(
                    "subregion {a}..{b} invalid for {} frames",
                    self.nframes()
                )));
            }
        }
        self.edit_history.append_state(
            EditState::Subregion {
                bounds: self.subregion,
            },
            "select subregion",
        );
        self.subregion = bounds;
        Ok(())
    }

    // ── Copies ─────────────────────────────────────────────────────────────

    /// New region over the same sequence; edits through either remain
    /// visible in both
    pub fn soft_copy(&self) -> Region {
        let link = SequenceLink::new(self.name.clone());
        self.sequence.write().add_soft_link(&link);
        Region {
            name: self.name.clone(),
            sequence: Arc::clone(&self.sequence),
            link: Some(link),
            slice_start: self.slice_start,
            slice_end: self.slice_end,
            offset: self.offset,
            mute: self.mute,
            subregion: None,
            linked_onsets: self.linked_onsets.clone(),
            channel_onsets: self.channel_onsets.clone(),
            link_channels: self.link_channels,
            waveform: self.waveform.clone(),
            edit_history: StateHistory::new(),
        }
    }

    /// New region over an independent clone of the sequence. The caller is
    /// responsible for registering the fresh sequence with the session.
    pub fn hard_copy(&self) -> Region {
        let cloned = {
            let seq = self.sequence.read();
            seq.hard_clone(seq.name().to_string())
        };
        Region {
            name: self.name.clone(),
            sequence: cloned.into_shared(),
            link: None,
            slice_start: self.slice_start,
            slice_end: self.slice_end,
            offset: self.offset,
            mute: self.mute,
            subregion: None,
            linked_onsets: self.linked_onsets.clone(),
            channel_onsets: self.channel_onsets.clone(),
            link_channels: self.link_channels,
            waveform: self.waveform.clone(),
            edit_history: StateHistory::new(),
        }
    }

    // ── Onsets ─────────────────────────────────────────────────────────────

    /// Detect onsets over the visible window.
    ///
    /// Linked detection sums the channels and *replaces* the linked set;
    /// per-channel detection recomputes one set per channel.
    pub fn detect_onsets<P: Progress + ?Sized>(
        &mut self,
        params: OnsetParams,
        link_channels: bool,
        progress: &mut P,
    ) -> EditResult<()> {
        let nframes = self.nframes() as usize;
        let mut detector = OnsetDetector::new();

        if link_channels {
            let (slice, channels) = {
                let seq = self.sequence.read();
                (
                    seq.slice(self.slice_start, self.slice_end)?,
                    seq.channels(),
                )
            };
            let mut cursor = slice.iter();
            let summed = std::iter::from_fn(move || {
                let mut sum = 0.0;
                for _ in 0..channels {
                    sum += *cursor.next()?;
                }
                Some(sum)
            });
            let frames = detector.detect(summed, nframes, params, progress)?;
            let set = sanitize_onsets(frames);
            self.push_onset_history("detect onsets");
            self.linked_onsets = Some(set);
            self.link_channels = true;
        } else {
            let channels = self.channels();
            let mut sets = Vec::with_capacity(channels);
            for c in 0..channels {
                let seq = self.sequence.read();
                let iter = seq.channel_samples(c, self.slice_start, self.slice_end)?;
                let frames = detector.detect(iter, nframes, params, progress)?;
                sets.push(sanitize_onsets(frames));
            }
            self.push_onset_history("detect onsets");
            self.channel_onsets = sets;
            self.linked_onsets = None;
            self.link_channels = false;
        }
        Ok(())
    }

    /// Switch between one linked onset set and per-channel sets.
    /// Either direction recomputes; sets are never merged.
    pub fn set_link_channels<P: Progress + ?Sized>(
        &mut self,
        enabled: bool,
        params: OnsetParams,
        progress: &mut P,
    ) -> EditResult<()> {
        self.detect_onsets(params, enabled, progress)
    }

    /// Onset set: `None` for the linked set, `Some(c)` for one channel
    pub fn onsets(&self, channel: Option<usize>) -> Option<&OnsetSequence> {
        match channel {
            None => self.linked_onsets.as_ref(),
            Some(c) => self.channel_onsets.get(c),
        }
    }

    /// Drag onset `index` of the given set to local frame `dest`.
    ///
    /// The audio between the neighboring anchors is three-point stretched so
    /// the onset lands on `dest` while the anchors stay fixed. The first drag
    /// captures the pre-stretch halves on the onset; later drags re-stretch
    /// that original material.
    pub fn drag_onset<P: Progress + ?Sized>(
        &mut self,
        channel: Option<usize>,
        index: usize,
        dest: u64,
        progress: &mut P,
    ) -> EditResult<()> {
        let nframes = self.nframes();
        let (prev, next, cur, left_src, right_src) = {
            let set = self
                .onsets(channel)
                .ok_or_else(|| EditError::Audio("no onset set for this channel".into()))?;
            let (prev, next) = set.anchors(index, nframes)?;
            let onset = set
                .get(index)
                .ok_or_else(|| EditError::out_of_range("onset", index as u64, set.len() as u64))?;
            (
                prev,
                next,
                onset.frame,
                onset.left_source.clone(),
                onset.right_source.clone(),
            )
        };
        if next <= prev + 1 {
            return Ok(());
        }
        let dest = dest.clamp(prev + 1, next - 1);
        if dest == cur {
            return Ok(());
        }

        let (left_src, right_src) = match (left_src, right_src) {
            (Some(l), Some(r)) => (l, r),
            _ => {
                let seq = self.sequence.read();
                (
                    seq.slice(self.slice_start + prev, self.slice_start + cur)?,
                    seq.slice(self.slice_start + cur, self.slice_start + next)?,
                )
            }
        };

        self.push_onset_history("drag onset");
        self.stretch_three_point(
            prev,
            cur,
            dest,
            next,
            channel,
            Some((&left_src, &right_src)),
            progress,
        )?;

        let set = self
            .onset_set_mut(channel)
            .ok_or_else(|| EditError::Audio("onset set vanished during drag".into()))?;
        set.move_onset(index, dest)?;
        if let Some(onset) = set.get_mut(index) {
            onset.left_source = Some(left_src);
            onset.right_source = Some(right_src);
        }
        Ok(())
    }

    // ── Undo/redo ──────────────────────────────────────────────────────────

    /// Revert the most recent edit recorded in this region's history
    pub fn undo_edit(&mut self) -> EditResult<()> {
        let is_audio = matches!(self.edit_history.query_undo()?, EditState::Audio { .. });
        if is_audio {
            self.sequence.write().undo()?;
        }
        let current = match self.edit_history.query_undo()? {
            EditState::Audio { .. } => self.audio_state(),
            EditState::Onsets { .. } => self.onset_state(),
            EditState::Subregion { .. } => EditState::Subregion {
                bounds: self.subregion,
            },
        };
        let restored = self.edit_history.undo(current)?;
        self.apply_edit_state(restored)
    }

    /// Reapply the most recently undone edit
    pub fn redo_edit(&mut self) -> EditResult<()> {
        let is_audio = matches!(self.edit_history.query_redo()?, EditState::Audio { .. });
        if is_audio {
            self.sequence.write().redo()?;
        }
        let current = match self.edit_history.query_redo()? {
            EditState::Audio { .. } => self.audio_state(),
            EditState::Onsets { .. } => self.onset_state(),
            EditState::Subregion { .. } => EditState::Subregion {
                bounds: self.subregion,
            },
        };
        let restored = self.edit_history.redo(current)?;
        self.apply_edit_state(restored)
    }

    fn apply_edit_state(&mut self, state: EditState) -> EditResult<()> {
        match state {
            EditState::Audio {
                slice_start,
                slice_end,
            } => {
                self.slice_start = slice_start;
                self.slice_end = slice_end;
                self.refresh_waveform(&mut NoProgress)
            }
            EditState::Onsets {
                linked,
                per_channel,
                link_channels,
            } => {
                self.linked_onsets = linked;
                self.channel_onsets = per_channel;
                self.link_channels = link_channels;
                Ok(())
            }
            EditState::Subregion { bounds } => {
                self.subregion = bounds;
                Ok(())
            }
        }
    }

    // ── Waveform cache ─────────────────────────────────────────────────────

    pub fn waveform(&self) -> Option<&WaveformCache> {
        self.waveform.as_ref()
    }

    /// Compute (or recompute) the waveform cache over the visible window.
    /// Cancellation leaves the region without a cache.
    pub fn ensure_waveform<P: Progress + ?Sized>(&mut self, progress: &mut P) -> EditResult<()> {
        let (slice, channels) = {
            let seq = self.sequence.read();
            (
                seq.slice(self.slice_start, self.slice_end)?,
                seq.channels(),
            )
        };
        match WaveformCache::compute(&slice, channels, progress) {
            Ok(cache) => {
                self.waveform = Some(cache);
                Ok(())
            }
            Err(EditError::Cancelled) => {
                self.waveform = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn refresh_waveform<P: Progress + ?Sized>(&mut self, progress: &mut P) -> EditResult<()> {
        if self.waveform.is_some() {
            self.ensure_waveform(progress)
        } else {
            Ok(())
        }
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn audio_state(&self) -> EditState {
        EditState::Audio {
            slice_start: self.slice_start,
            slice_end: self.slice_end,
        }
    }

    fn onset_state(&self) -> EditState {
        EditState::Onsets {
            linked: self.linked_onsets.clone(),
            per_channel: self.channel_onsets.clone(),
            link_channels: self.link_channels,
        }
    }

    fn push_onset_history(&mut self, desc: &str) {
        let state = self.onset_state();
        self.edit_history.append_state(state, desc);
    }

    fn onset_set_mut(&mut self, channel: Option<usize>) -> Option<&mut OnsetSequence> {
        match channel {
            None => self.linked_onsets.as_mut(),
            Some(c) => self.channel_onsets.get_mut(c),
        }
    }

    /// Translate a local range into absolute sequence frames
    fn abs_range(&self, range: Option<(u64, u64)>) -> EditResult<(u64, u64)> {
        let (a, b) = range.unwrap_or((0, self.nframes()));
        if a > b || b > self.nframes() {
            return Err(EditError::OutOfRange(format!(
                "range {a}..{b} invalid for region of {} frames",
                self.nframes()
            )));
        }
        Ok((self.slice_start + a, self.slice_start + b))
    }

    fn extract(&self, a: u64, b: u64) -> EditResult<(Vec<Sample>, usize)> {
        let seq = self.sequence.read();
        Ok((seq.slice(a, b)?.to_vec(), seq.channels()))
    }

    fn apply_per_sample<P, F>(
        &mut self,
        desc: &str,
        range: Option<(u64, u64)>,
        progress: &mut P,
        f: F,
    ) -> EditResult<()>
    where
        P: Progress + ?Sized,
        F: Fn(Sample) -> Sample,
    {
        let (a, b) = self.abs_range(range)?;
        if a == b {
            return Ok(());
        }
        let (mut data, _channels) = self.extract(a, b)?;
        let total = data.len();
        let mut done = 0usize;
        for chunk in data.chunks_mut(8192) {
            for s in chunk.iter_mut() {
                *s = f(*s);
            }
            done += chunk.len();
            if !progress.report(done as f64 / total as f64) {
                return Err(EditError::Cancelled);
            }
        }
        self.commit_samples(data, a, b, desc, progress)
    }

    /// Publish processed samples over `[a, b)`, record history, refresh the
    /// waveform cache. Nothing is published on a cancelled path; callers
    /// bail out before reaching this point.
    fn commit_samples<P: Progress + ?Sized>(
        &mut self,
        samples: Vec<Sample>,
        a: u64,
        b: u64,
        desc: &str,
        progress: &mut P,
    ) -> EditResult<()> {
        let before = self.audio_state();
        let new_frames = {
            let mut seq = self.sequence.write();
            let slice = AudioSlice::from_vec(samples);
            let frames = slice.len() as u64 / seq.channels() as u64;
            seq.replace(&slice, a, b)?;
            frames
        };
        let old_frames = b - a;
        self.slice_end = self.slice_end + new_frames - old_frames;
        self.edit_history.append_state(before, desc);
        self.refresh_waveform(progress)
    }
}

fn extract_channel(slice: &AudioSlice, channels: usize, channel: usize) -> Vec<Sample> {
    slice
        .iter()
        .skip(channel)
        .step_by(channels)
        .copied()
        .collect()
}

/// Detector output is monotonic by construction; a violation here means the
/// invariant broke upstream. Fatal in debug, recovered in release.
fn sanitize_onsets(frames: Vec<u64>) -> OnsetSequence {
    match OnsetSequence::from_frames(frames) {
        Ok(set) => set,
        Err(e) => {
            debug_assert!(false, "{e}");
            log::error!("{e}; discarding onset set");
            OnsetSequence::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use wl_core::NoProgress;

    fn mono_region(samples: Vec<Sample>) -> Region {
        let seq = crate::AudioSequence::new("test", 44100, 1, samples)
            .unwrap()
            .into_shared();
        Region::new(seq, "r")
    }

    fn ramp_region(n: usize) -> Region {
        mono_region((0..n).map(|i| i as Sample / n as Sample).collect())
    }

    #[test]
    fn test_gain_zero_db_is_identity() {
        let mut r = ramp_region(100);
        let before: Vec<Sample> = (0..100).map(|f| r.sample_local(0, f).unwrap()).collect();
        r.gain(0.0, None, &mut NoProgress).unwrap();
        let after: Vec<Sample> = (0..100).map(|f| r.sample_local(0, f).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_gain_scales_range_only() {
        let mut r = mono_region(vec![0.5; 10]);
        r.gain(-6.0, Some((2, 5)), &mut NoProgress).unwrap();
        assert_eq!(r.sample_local(0, 1).unwrap(), 0.5);
        assert_abs_diff_eq!(
            r.sample_local(0, 3).unwrap(),
            0.5 * db_to_gain(-6.0),
            epsilon = 1e-12
        );
        assert_eq!(r.sample_local(0, 5).unwrap(), 0.5);
    }

    #[test]
    fn test_normalize_hits_target_peak() {
        let mut r = mono_region(vec![0.0, 0.1, -0.25, 0.2, 0.0]);
        r.normalize(0.0, None, &mut NoProgress).unwrap();
        let peak = (0..5)
            .map(|f| r.sample_local(0, f).unwrap().abs())
            .fold(0.0_f64, f64::max);
        assert_abs_diff_eq!(peak, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_silence_is_noop() {
        let mut r = mono_region(vec![0.0; 16]);
        r.normalize(0.0, None, &mut NoProgress).unwrap();
        assert_eq!(r.sample_local(0, 8).unwrap(), 0.0);
        assert!(!r.edit_history().can_undo());
    }

    #[test]
    fn test_reverse_twice_is_identity() {
        let mut r = ramp_region(64);
        let before: Vec<Sample> = (0..64).map(|f| r.sample_local(0, f).unwrap()).collect();
        r.reverse(10, 50).unwrap();
        assert_ne!(r.sample_local(0, 10).unwrap(), before[10]);
        r.reverse(10, 50).unwrap();
        let after: Vec<Sample> = (0..64).map(|f| r.sample_local(0, f).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_fade_endpoints() {
        let mut r = mono_region(vec![1.0; 100]);
        r.fade_in(0, 50).unwrap();
        assert_eq!(r.sample_local(0, 0).unwrap(), 0.0);
        assert_eq!(r.sample_local(0, 49).unwrap(), 1.0);
        assert_eq!(r.sample_local(0, 50).unwrap(), 1.0);

        r.fade_out(50, 100).unwrap();
        assert_eq!(r.sample_local(0, 50).unwrap(), 1.0);
        assert_eq!(r.sample_local(0, 99).unwrap(), 0.0);
    }

    #[test]
    fn test_soft_copy_shares_audio() {
        let mut original = mono_region(vec![0.5; 32]);
        let copy = original.soft_copy();
        for f in 0..32 {
            assert_eq!(
                copy.sample_local(0, f).unwrap(),
                original.sample_local(0, f).unwrap()
            );
        }
        original.gain(-6.0, None, &mut NoProgress).unwrap();
        for f in 0..32 {
            assert_eq!(
                copy.sample_local(0, f).unwrap(),
                original.sample_local(0, f).unwrap()
            );
        }
    }

    #[test]
    fn test_soft_copy_registers_link() {
        let original = mono_region(vec![0.1; 8]);
        let copy = original.soft_copy();
        let links = original.sequence().write().soft_links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].name, copy.name());
    }

    #[test]
    fn test_hard_copy_is_independent() {
        let mut original = mono_region(vec![0.5; 32]);
        let copy = original.hard_copy();
        original.gain(-12.0, None, &mut NoProgress).unwrap();
        assert_eq!(copy.sample_local(0, 0).unwrap(), 0.5);
        assert_abs_diff_eq!(
            original.sample_local(0, 0).unwrap(),
            0.5 * db_to_gain(-12.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_shrink_bounds() {
        // Region at global offset 5000 with slice [0, 8000]
        let mut r = mono_region(vec![0.0; 8000]);
        r.set_offset(5000);

        // Would require sequence start < 0
        let failed = r.shrink_start(3000);
        assert!(!failed.success);
        assert_eq!(r.slice_start(), 0);
        assert_eq!(r.offset(), 5000);

        let ok = r.shrink_start(6000);
        assert!(ok.success);
        assert_eq!(ok.delta, 1000);
        assert_eq!(r.slice_start(), 1000);
        assert_eq!(r.offset(), 6000);
    }

    #[test]
    fn test_shrink_end_bounds() {
        let mut r = mono_region(vec![0.0; 1000]);
        // Past the end of the sequence
        assert!(!r.shrink_end(1500).success);
        // Below the minimum width
        assert!(!r.shrink_end(1).success);

        let ok = r.shrink_end(600);
        assert!(ok.success);
        assert_eq!(ok.delta, -400);
        assert_eq!(r.nframes(), 600);
    }

    #[test]
    fn test_insert_remove_local_and_undo() {
        let mut r = ramp_region(100);
        let clip = r.get_slice_local(10, 20).unwrap();
        r.insert_local(&clip, 0).unwrap();
        assert_eq!(r.nframes(), 110);
        assert_eq!(
            r.sample_local(0, 0).unwrap(),
            r.sample_local(0, 20).unwrap()
        );

        r.remove_local(0, 10).unwrap();
        assert_eq!(r.nframes(), 100);

        r.undo_edit().unwrap();
        assert_eq!(r.nframes(), 110);
        r.undo_edit().unwrap();
        assert_eq!(r.nframes(), 100);
        assert!(matches!(r.undo_edit(), Err(EditError::NoHistory)));

        r.redo_edit().unwrap();
        assert_eq!(r.nframes(), 110);
    }

    #[test]
    fn test_stretch_subregion_returns_new_end() {
        let mut r = mono_region(vec![0.1; 4000]);
        let new_end = r
            .stretch_subregion(1000, 3000, 1.5, &mut NoProgress)
            .unwrap();
        assert_eq!(new_end, 4000);
        assert_eq!(r.nframes(), 5000);

        r.undo_edit().unwrap();
        assert_eq!(r.nframes(), 4000);
    }

    #[test]
    fn test_three_point_preserves_endpoints_and_length() {
        // Step signal: quiet until frame 5000, loud after
        let mut samples = vec![0.2; 10_000];
        for s in &mut samples[5000..] {
            *s = 0.8;
        }
        let mut r = mono_region(samples);
        let at_2000 = r.sample_local(0, 2000).unwrap();
        let at_8000 = r.sample_local(0, 8000).unwrap();

        r.stretch_three_point(2000, 5000, 6000, 8000, None, None, &mut NoProgress)
            .unwrap();

        assert_eq!(r.nframes(), 10_000);
        assert_eq!(r.sample_local(0, 2000).unwrap(), at_2000);
        assert_eq!(r.sample_local(0, 8000).unwrap(), at_8000);

        // The step moved from 5000 towards 6000 (within vocoder smearing)
        let mid = |r: &Region, f: u64| r.sample_local(0, f).unwrap();
        assert!(mid(&r, 4500).abs() < 0.5, "left half still quiet");
        assert!(mid(&r, 7500).abs() > 0.5, "right half still loud");
    }

    #[test]
    fn test_three_point_zero_ratio_discards_half() {
        let mut r = mono_region(vec![0.5; 1000]);
        // dest == start: the first half collapses, the second covers the range
        r.stretch_three_point(100, 500, 100, 900, None, None, &mut NoProgress)
            .unwrap();
        assert_eq!(r.nframes(), 1000);
    }

    #[test]
    fn test_detect_and_drag_onset() {
        // Silence with two bursts
        let mut samples = vec![0.0; 20_000];
        for i in 4000..5000 {
            samples[i] = 0.8 * (i as f64 * 0.3).sin();
        }
        for i in 12_000..13_000 {
            samples[i] = 0.8 * (i as f64 * 0.3).sin();
        }
        let mut r = mono_region(samples);
        r.detect_onsets(OnsetParams::default(), true, &mut NoProgress)
            .unwrap();
        let set = r.onsets(None).expect("linked set");
        assert!(set.len() >= 2, "found {} onsets", set.len());
        assert!(r.link_channels());

        let before_frames = r.nframes();
        let first = set.get(0).unwrap().frame;
        r.drag_onset(None, 0, first + 500, &mut NoProgress).unwrap();
        assert_eq!(r.nframes(), before_frames);
        assert_eq!(r.onsets(None).unwrap().get(0).unwrap().frame, first + 500);
        // Pre-stretch material is now cached on the onset
        assert!(r.onsets(None).unwrap().get(0).unwrap().left_source.is_some());
    }

    #[test]
    fn test_linked_onsets_use_channel_sum() {
        // Stereo with an identical quiet burst on both channels, aligned to
        // a hop boundary. Summed, every burst window measures about -35 dBFS
        // and clears the -40 dBFS gate; the per-channel average would sit
        // near -41 dBFS and be silently gated out.
        let nframes = 20_000;
        let mut samples = vec![0.0; nframes * 2];
        for f in 8192..12_288 {
            let s = 0.012 * (f as f64 * 0.3).sin();
            samples[f * 2] = s;
            samples[f * 2 + 1] = s;
        }
        let params = OnsetParams {
            onset_threshold: 0.2,
            silence_threshold_db: -40.0,
        };

        let seq = crate::AudioSequence::new("t", 44100, 2, samples.clone())
            .unwrap()
            .into_shared();
        let mut r = Region::new(seq, "r");
        r.detect_onsets(params, true, &mut NoProgress).unwrap();
        let linked = r.onsets(None).expect("linked set").frames();
        assert!(
            !linked.is_empty(),
            "summed burst must clear the silence gate"
        );

        // The linked set must equal detection over a literal per-sample
        // channel sum
        let summed: Vec<Sample> = samples.chunks(2).map(|f| f[0] + f[1]).collect();
        let mut det = OnsetDetector::new();
        let expected = det
            .detect(summed.iter().copied(), nframes, params, &mut NoProgress)
            .unwrap();
        assert_eq!(linked, expected);
    }

    #[test]
    fn test_onset_undo_is_independent_of_audio_undo() {
        let mut r = mono_region(vec![0.5; 1000]);
        r.gain(-6.0, None, &mut NoProgress).unwrap();
        r.detect_onsets(OnsetParams::default(), true, &mut NoProgress)
            .unwrap();
        assert!(r.onsets(None).is_some());

        // Undo the onset detection: audio keeps its gain edit
        r.undo_edit().unwrap();
        assert!(r.onsets(None).is_none());
        assert_abs_diff_eq!(
            r.sample_local(0, 0).unwrap(),
            0.5 * db_to_gain(-6.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_subregion_selection_and_undo() {
        let mut r = mono_region(vec![0.0; 100]);
        r.set_subregion(Some((10, 40))).unwrap();
        assert_eq!(r.subregion(), Some((10, 40)));
        assert!(r.set_subregion(Some((50, 40))).is_err());
        assert!(r.set_subregion(Some((50, 200))).is_err());

        r.undo_edit().unwrap();
        assert_eq!(r.subregion(), None);
        r.redo_edit().unwrap();
        assert_eq!(r.subregion(), Some((10, 40)));
    }

    #[test]
    fn test_cancelled_edit_publishes_nothing() {
        let mut r = mono_region(vec![0.5; 100_000]);
        let mut cancel = |_: f64| false;
        assert!(matches!(
            r.gain(-6.0, None, &mut cancel),
            Err(EditError::Cancelled)
        ));
        assert_eq!(r.sample_local(0, 0).unwrap(), 0.5);
        assert!(!r.edit_history().can_undo());
    }

    #[test]
    fn test_playback_view() {
        let mut r = ramp_region(100);
        r.set_offset(500);
        assert!(r.shrink_start(510).success);
        let view = r.playback();
        assert_eq!(view.offset, 510);
        assert_eq!(view.nframes, 90);
        assert_eq!(view.channels, 1);
        assert_eq!(
            *view.samples.get(0).unwrap(),
            r.sample_local(0, 0).unwrap()
        );
    }

    #[test]
    fn test_waveform_refresh_after_edit() {
        let mut r = mono_region(vec![0.5; 1000]);
        r.ensure_waveform(&mut NoProgress).unwrap();
        assert!(r.waveform().is_some());
        r.gain(-6.0, None, &mut NoProgress).unwrap();
        let bin = r.waveform().unwrap().min_max(0, 10, 0).unwrap();
        assert_abs_diff_eq!(bin.max, 0.5 * db_to_gain(-6.0), epsilon = 1e-12);
    }
}
