//! Core session
//!
//! Top-level container: owns the tracks, the registered sequences, markers,
//! the arrange history, and the copy/paste machinery. Every structural or
//! audible change ends with [`CoreSession::publish_graph`], which hands the
//! real-time mixer a fresh immutable snapshot over the command ring and
//! reclaims the snapshots the mixer has retired.

use std::path::Path;
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use wl_core::{db_to_gain, EditError, EditResult, Progress, Sample};
use wl_file::{
    load_audio_file, write_stereo, ConverterQuality, ExportBitDepth, ExportFormat, FileError,
    FileResult, LoadStage,
};
use wl_state::{
    AudioSequence, EditState, Marker, MarkerMap, Region, SharedSequence, ShrinkResult,
    StateHistory,
};

use crate::{mix_track, MasterBus, MasterShared, Mixer, MixerCommand, RtTrack, Track, TrackGraph, Transport};

/// Command ring capacity (graph updates + meter resets)
const COMMAND_CAPACITY: usize = 256;

/// Render block size for offline mixdown
const RENDER_BLOCK: usize = 4096;

/// Which history an undo targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Arrange,
    EditRegion,
}

/// Clipboard behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    /// Pasted regions share the source sequences
    #[default]
    Soft,
    /// Pasted regions get independent sequence clones
    Hard,
}

/// Address of a region within the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionAddr {
    pub track: usize,
    pub region: usize,
}

/// Stages reported by [`CoreSession::export_session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Render,
    Encode,
    Complete,
}

/// Snapshot of the mutated subset of the session, one arm per state kind
#[derive(Clone)]
pub enum ArrangeState {
    MasterFader { gain_db: f64 },
    Tracks { tracks: Vec<Track> },
    SelectedTrack { index: Option<usize> },
    SelectedRegions { selection: Vec<RegionAddr> },
    RegionEdit { addr: RegionAddr, state: EditState },
}

/// Sink for errors the session routes to the UI
pub type ErrorSink = Box<dyn FnMut(&str) + Send>;

/// Top-level editor state
pub struct CoreSession {
    sample_rate: u32,
    tracks: Vec<Track>,
    sequences: Vec<SharedSequence>,
    markers: MarkerMap,
    arrange_history: StateHistory<ArrangeState>,
    copy_buffer: Vec<Region>,
    copy_mode: CopyMode,
    selected_track: Option<usize>,
    selected_regions: Vec<RegionAddr>,
    mode: SessionMode,
    edit_target: Option<RegionAddr>,
    transport: Arc<Transport>,
    master: Arc<MasterShared>,
    commands: Producer<MixerCommand>,
    retired: Consumer<TrackGraph>,
    error_sink: Option<ErrorSink>,
}

impl CoreSession {
    /// Build a session and its real-time mixer. The mixer is handed to the
    /// audio driver; the session stays on the UI thread.
    pub fn new(sample_rate: u32, max_block: usize) -> (Self, Mixer) {
        let transport = Arc::new(Transport::new());
        let (master_bus, master) = MasterBus::new();
        let (command_tx, command_rx) = RingBuffer::new(COMMAND_CAPACITY);
        let (retire_tx, retire_rx) = RingBuffer::new(COMMAND_CAPACITY);

        let mixer = Mixer::new(
            Arc::clone(&transport),
            master_bus,
            command_rx,
            retire_tx,
            sample_rate,
            max_block,
        );
        let session = Self {
            sample_rate,
            tracks: Vec::new(),
            sequences: Vec::new(),
            markers: MarkerMap::new(),
            arrange_history: StateHistory::new(),
            copy_buffer: Vec::new(),
            copy_mode: CopyMode::default(),
            selected_track: None,
            selected_regions: Vec::new(),
            mode: SessionMode::default(),
            edit_target: None,
            transport,
            master,
            commands: command_tx,
            retired: retire_rx,
            error_sink: None,
        };
        (session, mixer)
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Master-bus cells (fader gain, peaks) shared with the audio thread
    pub fn master(&self) -> &Arc<MasterShared> {
        &self.master
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> EditResult<&Track> {
        self.tracks
            .get(index)
            .ok_or_else(|| EditError::out_of_range("track", index as u64, self.tracks.len() as u64))
    }

    pub fn region(&self, addr: RegionAddr) -> EditResult<&Region> {
        let track = self.track(addr.track)?;
        let len = track.regions().len();
        track
            .region(addr.region)
            .ok_or_else(|| EditError::out_of_range("region", addr.region as u64, len as u64))
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn markers(&self) -> &MarkerMap {
        &self.markers
    }

    pub fn arrange_history(&self) -> &StateHistory<ArrangeState> {
        &self.arrange_history
    }

    pub fn master_gain_db(&self) -> f64 {
        self.master.gain_db.load()
    }

    /// Route session-level errors (file, audio) to the UI
    pub fn set_error_sink(&mut self, sink: ErrorSink) {
        self.error_sink = Some(sink);
    }

    pub fn report_error(&mut self, error: &dyn std::fmt::Display) {
        log::error!("{error}");
        if let Some(sink) = &mut self.error_sink {
            sink(&error.to_string());
        }
    }

    // ── Tracks ─────────────────────────────────────────────────────────────

    pub fn add_track(&mut self, name: impl Into<String>) -> usize {
        self.push_tracks_history("add track");
        self.tracks.push(Track::new(name));
        self.publish_graph();
        self.tracks.len() - 1
    }

    /// Remove a track; its regions are detached and their sequences become
    /// eligible for collection once nothing references them
    pub fn remove_track(&mut self, index: usize) -> EditResult<()> {
        if index >= self.tracks.len() {
            return Err(EditError::out_of_range(
                "track",
                index as u64,
                self.tracks.len() as u64,
            ));
        }
        self.push_tracks_history("remove track");
        self.tracks.remove(index);
        self.clamp_selection();
        self.collect_garbage();
        self.publish_graph();
        Ok(())
    }

    pub fn set_track_gain_db(&mut self, index: usize, db: f64) -> EditResult<()> {
        self.with_track(index, |t| t.set_fader_gain_db(db))
    }

    pub fn set_track_mute(&mut self, index: usize, mute: bool) -> EditResult<()> {
        self.with_track(index, |t| t.set_mute(mute))
    }

    pub fn set_track_solo(&mut self, index: usize, solo: bool) -> EditResult<()> {
        self.with_track(index, |t| t.set_solo(solo))
    }

    pub fn set_track_left_solo(&mut self, index: usize, solo: bool) -> EditResult<()> {
        self.with_track(index, |t| t.set_left_solo(solo))
    }

    pub fn set_track_right_solo(&mut self, index: usize, solo: bool) -> EditResult<()> {
        self.with_track(index, |t| t.set_right_solo(solo))
    }

    /// True while any track is soloed
    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.solo())
    }

    fn with_track(&mut self, index: usize, f: impl FnOnce(&mut Track)) -> EditResult<()> {
        let len = self.tracks.len();
        let track = self
            .tracks
            .get_mut(index)
            .ok_or_else(|| EditError::out_of_range("track", index as u64, len as u64))?;
        f(track);
        self.publish_graph();
        Ok(())
    }

    // ── Master fader ───────────────────────────────────────────────────────

    pub fn set_master_gain_db(&mut self, db: f64) {
        self.arrange_history.append_state(
            ArrangeState::MasterFader {
                gain_db: self.master_gain_db(),
            },
            "master fader",
        );
        self.master.gain_db.store(db);
    }

    // ── Selection and modes ────────────────────────────────────────────────

    pub fn selected_track(&self) -> Option<usize> {
        self.selected_track
    }

    pub fn select_track(&mut self, index: Option<usize>) -> EditResult<()> {
        if let Some(i) = index {
            self.track(i)?;
        }
        self.arrange_history.append_state(
            ArrangeState::SelectedTrack {
                index: self.selected_track,
            },
            "select track",
        );
        self.selected_track = index;
        Ok(())
    }

    pub fn selected_regions(&self) -> &[RegionAddr] {
        &self.selected_regions
    }

    pub fn select_regions(&mut self, selection: Vec<RegionAddr>) -> EditResult<()> {
        for addr in &selection {
            self.region(*addr)?;
        }
        self.arrange_history.append_state(
            ArrangeState::SelectedRegions {
                selection: self.selected_regions.clone(),
            },
            "select regions",
        );
        self.selected_regions = selection;
        Ok(())
    }

    /// Enter edit mode targeting one region; undo/redo now act on it
    pub fn enter_edit_mode(&mut self, addr: RegionAddr) -> EditResult<()> {
        self.region(addr)?;
        self.edit_target = Some(addr);
        self.mode = SessionMode::EditRegion;
        Ok(())
    }

    pub fn exit_edit_mode(&mut self) {
        self.mode = SessionMode::Arrange;
        self.edit_target = None;
    }

    pub fn edit_target(&self) -> Option<RegionAddr> {
        self.edit_target
    }

    // ── Regions ────────────────────────────────────────────────────────────

    /// Register a region on a track, adopting its sequence
    pub fn add_region(&mut self, track: usize, region: Region) -> EditResult<RegionAddr> {
        if track >= self.tracks.len() {
            return Err(EditError::out_of_range(
                "track",
                track as u64,
                self.tracks.len() as u64,
            ));
        }
        self.push_tracks_history("add region");
        self.adopt_sequence(region.sequence().clone());
        let index = self.tracks[track].add_region(region);
        self.resize_timeline();
        self.publish_graph();
        Ok(RegionAddr {
            track,
            region: index,
        })
    }

    pub fn remove_region(&mut self, addr: RegionAddr) -> EditResult<Region> {
        self.region(addr)?;
        self.push_tracks_history("remove region");
        let removed = self.tracks[addr.track]
            .remove_region(addr.region)
            .expect("validated above");
        self.clamp_selection();
        self.collect_garbage();
        self.publish_graph();
        Ok(removed)
    }

    pub fn move_region(&mut self, addr: RegionAddr, new_offset: u64) -> EditResult<()> {
        self.region(addr)?;
        self.push_tracks_history("move region");
        self.tracks[addr.track]
            .region_mut(addr.region)
            .expect("validated above")
            .set_offset(new_offset);
        self.resize_timeline();
        self.publish_graph();
        Ok(())
    }

    pub fn shrink_region_start(
        &mut self,
        addr: RegionAddr,
        new_global_start: u64,
    ) -> EditResult<ShrinkResult> {
        self.shrink_region(addr, "shrink region start", |r| {
            r.shrink_start(new_global_start)
        })
    }

    pub fn shrink_region_end(
        &mut self,
        addr: RegionAddr,
        new_global_end: u64,
    ) -> EditResult<ShrinkResult> {
        self.shrink_region(addr, "shrink region end", |r| r.shrink_end(new_global_end))
    }

    fn shrink_region(
        &mut self,
        addr: RegionAddr,
        desc: &str,
        f: impl FnOnce(&mut Region) -> ShrinkResult,
    ) -> EditResult<ShrinkResult> {
        self.region(addr)?;
        let before = self.tracks.clone();
        let result = f(self.tracks[addr.track]
            .region_mut(addr.region)
            .expect("validated above"));
        if result.success {
            self.arrange_history
                .append_state(ArrangeState::Tracks { tracks: before }, desc);
            self.resize_timeline();
            self.publish_graph();
        }
        Ok(result)
    }

    /// Run an edit operation against one region.
    ///
    /// In arrange mode a routing entry is recorded in the arrange history;
    /// in edit mode the region's own history (which the operation itself
    /// appends to) is the undo target.
    pub fn edit_region<T>(
        &mut self,
        addr: RegionAddr,
        f: impl FnOnce(&mut Region) -> EditResult<T>,
    ) -> EditResult<T> {
        let mode = self.mode;
        let (result, appended) = {
            let region = self.tracks
                .get_mut(addr.track)
                .and_then(|t| t.region_mut(addr.region))
                .ok_or_else(|| {
                    EditError::OutOfRange(format!(
                        "no region {} on track {}",
                        addr.region, addr.track
                    ))
                })?;
            let before_len = region.edit_history().undo_len();
            let result = f(region)?;
            let appended = if region.edit_history().undo_len() > before_len {
                let state = region.edit_history().query_undo()?.clone();
                let desc = region
                    .edit_history()
                    .undo_description()
                    .unwrap_or("region edit")
                    .to_string();
                Some((state, desc))
            } else {
                None
            };
            (result, appended)
        };
        if mode == SessionMode::Arrange {
            if let Some((state, desc)) = appended {
                self.arrange_history
                    .append_state(ArrangeState::RegionEdit { addr, state }, &desc);
            }
        }
        self.resize_timeline();
        self.publish_graph();
        Ok(result)
    }

    // ── Subregion ──────────────────────────────────────────────────────────

    /// Select a subregion on the edit-mode target
    pub fn select_subregion(&mut self, bounds: Option<(u64, u64)>) -> EditResult<()> {
        let addr = self
            .edit_target
            .ok_or_else(|| EditError::Audio("no region is being edited".into()))?;
        self.edit_region(addr, |r| r.set_subregion(bounds))
    }

    /// Arm the transport loop over the edit target's subregion
    pub fn loop_subregion(&self) -> EditResult<()> {
        let addr = self
            .edit_target
            .ok_or_else(|| EditError::Audio("no region is being edited".into()))?;
        let region = self.region(addr)?;
        let (a, b) = region
            .subregion()
            .ok_or_else(|| EditError::Audio("no subregion selected".into()))?;
        self.transport
            .enable_loop(region.offset() + a, region.offset() + b)
    }

    // ── Copy / paste ───────────────────────────────────────────────────────

    pub fn copy_mode(&self) -> CopyMode {
        self.copy_mode
    }

    /// Fill the clipboard from the selected regions
    pub fn copy_regions(&mut self, mode: CopyMode) -> EditResult<()> {
        let mut buffer = Vec::with_capacity(self.selected_regions.len());
        for addr in self.selected_regions.clone() {
            buffer.push(self.region(addr)?.clone());
        }
        self.copy_buffer = buffer;
        self.copy_mode = mode;
        Ok(())
    }

    /// Paste the clipboard at the transport position.
    ///
    /// All regions are translated by the delta from the earliest copied
    /// region to the playhead; hard mode clones sequences. Pasting targets
    /// the selected track, or a fresh one when none is selected.
    pub fn paste(&mut self) -> EditResult<Vec<RegionAddr>> {
        if self.copy_buffer.is_empty() {
            return Ok(Vec::new());
        }
        let earliest = self
            .copy_buffer
            .iter()
            .map(Region::offset)
            .min()
            .unwrap_or(0);
        let at = self.transport.offset();

        self.push_tracks_history("paste");
        let track_index = match self.selected_track {
            Some(i) if i < self.tracks.len() => i,
            _ => {
                self.tracks.push(Track::new("Paste"));
                self.tracks.len() - 1
            }
        };

        let buffered = self.copy_buffer.clone();
        let mode = self.copy_mode;
        let mut added = Vec::with_capacity(buffered.len());
        for source in &buffered {
            let mut pasted = match mode {
                CopyMode::Soft => source.soft_copy(),
                CopyMode::Hard => source.hard_copy(),
            };
            self.adopt_sequence(pasted.sequence().clone());
            pasted.set_offset(at + (source.offset() - earliest));
            let index = self.tracks[track_index].add_region(pasted);
            added.push(RegionAddr {
                track: track_index,
                region: index,
            });
        }

        self.resize_timeline();
        self.publish_graph();
        Ok(added)
    }

    // ── Undo / redo ────────────────────────────────────────────────────────

    /// Undo in the current mode: the edited region in edit mode, the
    /// session in arrange mode
    pub fn undo(&mut self) -> EditResult<()> {
        match self.mode {
            SessionMode::EditRegion => {
                let addr = self.edit_target.ok_or(EditError::NoHistory)?;
                self.tracks
                    .get_mut(addr.track)
                    .and_then(|t| t.region_mut(addr.region))
                    .ok_or(EditError::NoHistory)?
                    .undo_edit()?;
                self.resize_timeline();
                self.publish_graph();
                Ok(())
            }
            SessionMode::Arrange => self.undo_arrange(),
        }
    }

    pub fn redo(&mut self) -> EditResult<()> {
        match self.mode {
            SessionMode::EditRegion => {
                let addr = self.edit_target.ok_or(EditError::NoHistory)?;
                self.tracks
                    .get_mut(addr.track)
                    .and_then(|t| t.region_mut(addr.region))
                    .ok_or(EditError::NoHistory)?
                    .redo_edit()?;
                self.resize_timeline();
                self.publish_graph();
                Ok(())
            }
            SessionMode::Arrange => self.redo_arrange(),
        }
    }

    fn undo_arrange(&mut self) -> EditResult<()> {
        match self.pending(self.arrange_history.query_undo()?) {
            Pending::Region(addr) => {
                let stored = self.arrange_history.query_undo()?.clone();
                self.tracks
                    .get_mut(addr.track)
                    .and_then(|t| t.region_mut(addr.region))
                    .ok_or(EditError::NoHistory)?
                    .undo_edit()?;
                let _ = self.arrange_history.undo(stored)?;
            }
            Pending::Plain => {
                let current = self.capture_like(self.arrange_history.query_undo()?);
                let previous = self.arrange_history.undo(current)?;
                self.apply_arrange(previous);
            }
        }
        self.resize_timeline();
        self.publish_graph();
        Ok(())
    }

    fn redo_arrange(&mut self) -> EditResult<()> {
        match self.pending(self.arrange_history.query_redo()?) {
            Pending::Region(addr) => {
                let stored = self.arrange_history.query_redo()?.clone();
                self.tracks
                    .get_mut(addr.track)
                    .and_then(|t| t.region_mut(addr.region))
                    .ok_or(EditError::NoHistory)?
                    .redo_edit()?;
                let _ = self.arrange_history.redo(stored)?;
            }
            Pending::Plain => {
                let current = self.capture_like(self.arrange_history.query_redo()?);
                let next = self.arrange_history.redo(current)?;
                self.apply_arrange(next);
            }
        }
        self.resize_timeline();
        self.publish_graph();
        Ok(())
    }

    fn pending(&self, state: &ArrangeState) -> Pending {
        match state {
            ArrangeState::RegionEdit { addr, .. } => Pending::Region(*addr),
            _ => Pending::Plain,
        }
    }

    /// Current-state snapshot of the same kind as `like`
    fn capture_like(&self, like: &ArrangeState) -> ArrangeState {
        match like {
            ArrangeState::MasterFader { .. } => ArrangeState::MasterFader {
                gain_db: self.master_gain_db(),
            },
            ArrangeState::Tracks { .. } => ArrangeState::Tracks {
                tracks: self.tracks.clone(),
            },
            ArrangeState::SelectedTrack { .. } => ArrangeState::SelectedTrack {
                index: self.selected_track,
            },
            ArrangeState::SelectedRegions { .. } => ArrangeState::SelectedRegions {
                selection: self.selected_regions.clone(),
            },
            ArrangeState::RegionEdit { addr, state } => ArrangeState::RegionEdit {
                addr: *addr,
                state: state.clone(),
            },
        }
    }

    fn apply_arrange(&mut self, state: ArrangeState) {
        match state {
            ArrangeState::MasterFader { gain_db } => self.master.gain_db.store(gain_db),
            ArrangeState::Tracks { tracks } => {
                self.tracks = tracks;
                self.clamp_selection();
            }
            ArrangeState::SelectedTrack { index } => self.selected_track = index,
            ArrangeState::SelectedRegions { selection } => self.selected_regions = selection,
            // Routed through the region's own history before the exchange
            ArrangeState::RegionEdit { .. } => {}
        }
    }

    // ── Markers ────────────────────────────────────────────────────────────

    /// Drop a marker at the playhead under `key`
    pub fn set_marker(&mut self, key: char, name: impl Into<String>) {
        self.markers
            .set(key, Marker::new(self.transport.offset(), name));
    }

    pub fn jump_to_marker(&self, key: char) -> EditResult<()> {
        let marker = self
            .markers
            .get(key)
            .ok_or_else(|| EditError::OutOfRange(format!("no marker on '{key}'")))?;
        self.transport.seek(marker.offset);
        Ok(())
    }

    pub fn remove_marker(&mut self, key: char) -> Option<Marker> {
        self.markers.remove(key)
    }

    // ── File I/O ───────────────────────────────────────────────────────────

    /// Load an audio file and place it as a region on a new track at the
    /// playhead
    pub fn import_file<D, P>(
        &mut self,
        path: &Path,
        resample_dialog: D,
        progress: &mut P,
    ) -> FileResult<RegionAddr>
    where
        D: FnOnce(u32, u32) -> Option<ConverterQuality>,
        P: FnMut(LoadStage, f64) -> bool,
    {
        let buffer = load_audio_file(path, self.sample_rate, resample_dialog, progress)?;
        let name = buffer.name.clone();
        let sequence = AudioSequence::new(name.clone(), buffer.sample_rate, buffer.channels, buffer.samples)
            .map_err(|e| FileError::InvalidFile(e.to_string()))?
            .into_shared();

        self.push_tracks_history("import file");
        self.adopt_sequence(Arc::clone(&sequence));
        let mut region = Region::new(sequence, name.clone());
        region.set_offset(self.transport.offset());
        self.tracks.push(Track::new(name));
        let track = self.tracks.len() - 1;
        let index = self.tracks[track].add_region(region);
        self.resize_timeline();
        self.publish_graph();
        Ok(RegionAddr {
            track,
            region: index,
        })
    }

    /// Render the whole session to a stereo pair, offline, through the same
    /// mix path the audio thread uses
    pub fn render_mixdown<P: Progress + ?Sized>(
        &self,
        progress: &mut P,
    ) -> EditResult<(Vec<Sample>, Vec<Sample>)> {
        let graph: Vec<RtTrack> = self.tracks.iter().map(Track::playback).collect();
        let total = self.end_frame();
        let gain = db_to_gain(self.master_gain_db());
        let any_solo = graph.iter().any(|t| t.solo);

        let mut out_l = Vec::with_capacity(total as usize);
        let mut out_r = Vec::with_capacity(total as usize);
        let mut track_l = vec![0.0; RENDER_BLOCK];
        let mut track_r = vec![0.0; RENDER_BLOCK];
        let mut acc_l = vec![0.0; RENDER_BLOCK];
        let mut acc_r = vec![0.0; RENDER_BLOCK];

        let mut pos = 0u64;
        while pos < total {
            let n = RENDER_BLOCK.min((total - pos) as usize);
            acc_l[..n].fill(0.0);
            acc_r[..n].fill(0.0);
            for track in &graph {
                mix_track(track, pos, &mut track_l[..n], &mut track_r[..n], any_solo);
                for k in 0..n {
                    acc_l[k] += track_l[k];
                    acc_r[k] += track_r[k];
                }
            }
            for k in 0..n {
                out_l.push(acc_l[k] * gain);
                out_r.push(acc_r[k] * gain);
            }
            pos += n as u64;
            if !progress.report(pos as f64 / total as f64) {
                return Err(EditError::Cancelled);
            }
        }
        Ok((out_l, out_r))
    }

    /// Export the session mixdown. Both formats honor the requested bit
    /// depth.
    pub fn export_session<P>(
        &self,
        path: &Path,
        format: ExportFormat,
        bit_depth: ExportBitDepth,
        progress: &mut P,
    ) -> FileResult<()>
    where
        P: FnMut(ExportStage, f64) -> bool,
    {
        let (left, right) = {
            let mut render = |f: f64| progress(ExportStage::Render, f);
            self.render_mixdown(&mut render).map_err(|e| match e {
                EditError::Cancelled => FileError::Cancelled,
                other => FileError::InvalidFile(other.to_string()),
            })?
        };
        if !progress(ExportStage::Encode, 0.0) {
            return Err(FileError::Cancelled);
        }
        write_stereo(path, format, bit_depth, self.sample_rate, &left, &right)?;
        progress(ExportStage::Complete, 1.0);
        Ok(())
    }

    // ── Housekeeping ───────────────────────────────────────────────────────

    /// Global frame one past the furthest region on any track
    pub fn end_frame(&self) -> u64 {
        self.tracks.iter().map(Track::end_frame).max().unwrap_or(0)
    }

    /// Publish the current track state to the mixer and reclaim retired
    /// snapshots for deallocation on this thread
    pub fn publish_graph(&mut self) {
        let graph: TrackGraph = Arc::new(self.tracks.iter().map(Track::playback).collect());
        if self
            .commands
            .push(MixerCommand::SetGraph(graph))
            .is_err()
        {
            log::warn!("mixer command ring full; graph update dropped");
        }
        while self.retired.pop().is_ok() {}
    }

    /// Zero all track and master meters
    pub fn reset_meters(&mut self) {
        if self.commands.push(MixerCommand::ResetMeters).is_err() {
            log::warn!("mixer command ring full; meter reset dropped");
        }
    }

    /// Drop sequences nothing references anymore (the registry's own handle
    /// does not count; history snapshots and clipboard entries do)
    pub fn collect_garbage(&mut self) {
        self.sequences.retain(|s| Arc::strong_count(s) > 1);
    }

    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    fn adopt_sequence(&mut self, sequence: SharedSequence) {
        if !self.sequences.iter().any(|s| Arc::ptr_eq(s, &sequence)) {
            self.sequences.push(sequence);
        }
    }

    fn resize_timeline(&self) {
        self.transport.resize_if_necessary(self.end_frame());
    }

    fn push_tracks_history(&mut self, desc: &str) {
        self.arrange_history.append_state(
            ArrangeState::Tracks {
                tracks: self.tracks.clone(),
            },
            desc,
        );
    }

    fn clamp_selection(&mut self) {
        let tracks = &self.tracks;
        self.selected_regions
            .retain(|a| tracks.get(a.track).map_or(false, |t| a.region < t.regions().len()));
        if let Some(i) = self.selected_track {
            if i >= tracks.len() {
                self.selected_track = None;
            }
        }
        if let Some(addr) = self.edit_target {
            let valid = tracks
                .get(addr.track)
                .map_or(false, |t| addr.region < t.regions().len());
            if !valid {
                self.edit_target = None;
                self.mode = SessionMode::Arrange;
            }
        }
    }
}

enum Pending {
    Plain,
    Region(RegionAddr),
}
