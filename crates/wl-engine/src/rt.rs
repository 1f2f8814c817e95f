//! Real-time mix path
//!
//! The audio thread owns a `Mixer` and calls [`Mixer::process`] from the
//! driver callback. Everything it touches is either owned scratch, an
//! immutable published snapshot, or an atomic cell: no locks, no allocation,
//! no failure path. Replaced graph snapshots are handed back to the UI
//! thread over a second ring so deallocation happens off the audio thread.

use std::sync::Arc;

use rtrb::{Consumer, Producer};

use wl_core::Sample;
use wl_dsp::block_peak;
use wl_state::RegionPlayback;

use crate::{MasterBus, TrackMeter, Transport};

/// Immutable per-track snapshot the audio thread mixes from
#[derive(Debug, Clone)]
pub struct RtTrack {
    /// Linear fader gain
    pub gain: f64,
    pub mute: bool,
    pub solo: bool,
    pub left_solo: bool,
    pub right_solo: bool,
    pub regions: Vec<RegionPlayback>,
    pub meter: Arc<TrackMeter>,
}

/// Published snapshot of every track
pub type TrackGraph = Arc<Vec<RtTrack>>;

/// UI → audio thread commands
pub enum MixerCommand {
    SetGraph(TrackGraph),
    ResetMeters,
}

/// Mix one track's regions over `[offset, offset + out.len())` into the
/// given stereo buffers.
///
/// The destination is zeroed first. A muted track, or a non-soloed track
/// while any solo is active, contributes silence. Channel 0 feeds left,
/// channel 1 right; mono regions are duplicated. Frames outside a region's
/// global window are silence.
pub fn mix_track(
    track: &RtTrack,
    offset: u64,
    out_l: &mut [Sample],
    out_r: &mut [Sample],
    any_solo: bool,
) {
    out_l.fill(0.0);
    out_r.fill(0.0);

    if track.mute || (any_solo && !track.solo) {
        return;
    }

    let buf_nframes = out_l.len() as u64;
    for region in &track.regions {
        if region.mute || region.nframes == 0 {
            continue;
        }
        let start = offset.max(region.offset);
        let end = (offset + buf_nframes).min(region.offset + region.nframes);
        if start >= end {
            continue;
        }
        let local = (start - region.offset) as usize;
        let out_at = (start - offset) as usize;
        let count = (end - start) as usize;
        let channels = region.channels;

        let mut cursor = region.samples.cursor(local * channels);
        if channels == 1 {
            for k in 0..count {
                let s = *cursor.next().unwrap_or(&0.0);
                out_l[out_at + k] += s;
                out_r[out_at + k] += s;
            }
        } else {
            for k in 0..count {
                let l = *cursor.next().unwrap_or(&0.0);
                let r = *cursor.next().unwrap_or(&0.0);
                for _ in 2..channels {
                    let _ = cursor.next();
                }
                out_l[out_at + k] += l;
                out_r[out_at + k] += r;
            }
        }
    }

    for s in out_l.iter_mut() {
        *s *= track.gain;
    }
    for s in out_r.iter_mut() {
        *s *= track.gain;
    }

    if track.left_solo {
        out_r.fill(0.0);
    }
    if track.right_solo {
        out_l.fill(0.0);
    }

    track.meter.update(block_peak(out_l), block_peak(out_r));
}

/// Real-time mixer: schedules frame windows to tracks, sums them into the
/// master bus, and advances the transport
pub struct Mixer {
    transport: Arc<Transport>,
    graph: TrackGraph,
    master: MasterBus,
    commands: Consumer<MixerCommand>,
    retired: Producer<TrackGraph>,
    track_l: Vec<Sample>,
    track_r: Vec<Sample>,
    acc_l: Vec<Sample>,
    acc_r: Vec<Sample>,
    sample_rate: u32,
    max_block: usize,
}

impl Mixer {
    pub(crate) fn new(
        transport: Arc<Transport>,
        master: MasterBus,
        commands: Consumer<MixerCommand>,
        retired: Producer<TrackGraph>,
        sample_rate: u32,
        max_block: usize,
    ) -> Self {
        Self {
            transport,
            graph: Arc::new(Vec::new()),
            master,
            commands,
            retired,
            track_l: vec![0.0; max_block],
            track_r: vec![0.0; max_block],
            acc_l: vec![0.0; max_block],
            acc_r: vec![0.0; max_block],
            sample_rate,
            max_block,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Largest block [`Mixer::process`] accepts per call
    #[inline]
    pub fn max_block_size(&self) -> usize {
        self.max_block
    }

    /// Fill one stereo block. Never blocks, never allocates, never fails;
    /// missing data plays as silence.
    pub fn process(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        self.drain_commands();

        let n = out_l.len().min(out_r.len()).min(self.max_block);
        out_l.fill(0.0);
        out_r.fill(0.0);
        let elapsed_ms = n as f64 / self.sample_rate as f64 * 1000.0;

        if !self.transport.is_playing() {
            // Keep the meter ballistics falling while stopped
            self.acc_l[..n].fill(0.0);
            self.acc_r[..n].fill(0.0);
            let (acc_l, acc_r) = (&mut self.acc_l[..n], &mut self.acc_r[..n]);
            self.master.process(acc_l, acc_r, elapsed_ms);
            return;
        }

        let offset = self.transport.offset();
        self.acc_l[..n].fill(0.0);
        self.acc_r[..n].fill(0.0);

        let any_solo = self.graph.iter().any(|t| t.solo);
        for track in self.graph.iter() {
            mix_track(
                track,
                offset,
                &mut self.track_l[..n],
                &mut self.track_r[..n],
                any_solo,
            );
            for k in 0..n {
                self.acc_l[k] += self.track_l[k];
                self.acc_r[k] += self.track_r[k];
            }
        }

        {
            let (acc_l, acc_r) = (&mut self.acc_l[..n], &mut self.acc_r[..n]);
            self.master.process(acc_l, acc_r, elapsed_ms);
        }

        for k in 0..n {
            out_l[k] = self.acc_l[k] as f32;
            out_r[k] = self.acc_r[k] as f32;
        }

        self.transport.advance(n as u64);
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                MixerCommand::SetGraph(graph) => {
                    let old = std::mem::replace(&mut self.graph, graph);
                    // Hand the old snapshot back for off-thread deallocation;
                    // if the return ring is full it drops here instead.
                    let _ = self.retired.push(old);
                }
                MixerCommand::ResetMeters => {
                    for track in self.graph.iter() {
                        track.meter.reset();
                    }
                    self.master.reset_meters();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Track;
    use rtrb::RingBuffer;
    use wl_state::{AudioSequence, Region};

    fn region_with(samples: Vec<Sample>, channels: usize, offset: u64) -> Region {
        let seq = AudioSequence::new("s", 48000, channels, samples)
            .unwrap()
            .into_shared();
        let mut r = Region::new(seq, "r");
        r.set_offset(offset);
        r
    }

    fn mixer_with(graph: Vec<RtTrack>) -> Mixer {
        let transport = Arc::new(Transport::new());
        let (master, _shared) = MasterBus::new();
        let (mut cmd_tx, cmd_rx) = RingBuffer::new(8);
        let (ret_tx, _ret_rx) = RingBuffer::new(8);
        cmd_tx
            .push(MixerCommand::SetGraph(Arc::new(graph)))
            .ok()
            .unwrap();
        Mixer::new(transport, master, cmd_rx, ret_tx, 48000, 256)
    }

    #[test]
    fn test_mix_places_region_at_offset() {
        let mut track = Track::new("t");
        track.add_region(region_with(vec![0.5; 10], 1, 100));
        let rt = track.playback();

        let mut l = vec![0.0; 16];
        let mut r = vec![0.0; 16];
        // Window [96, 112) overlaps the region on [100, 110)
        mix_track(&rt, 96, &mut l, &mut r, false);
        assert_eq!(l[3], 0.0);
        assert_eq!(l[4], 0.5);
        assert_eq!(l[13], 0.5);
        assert_eq!(l[14], 0.0);
        // Mono duplicates into both sides
        assert_eq!(r[4], 0.5);
    }

    #[test]
    fn test_stereo_channel_routing() {
        // L ramps positive, R negative
        let mut samples = Vec::new();
        for f in 0..8 {
            samples.push(f as Sample);
            samples.push(-(f as Sample));
        }
        let mut track = Track::new("t");
        track.add_region(region_with(samples, 2, 0));
        let rt = track.playback();

        let mut l = vec![0.0; 8];
        let mut r = vec![0.0; 8];
        mix_track(&rt, 0, &mut l, &mut r, false);
        assert_eq!(l[3], 3.0);
        assert_eq!(r[3], -3.0);
    }

    #[test]
    fn test_muted_track_is_silent() {
        let mut track = Track::new("t");
        track.add_region(region_with(vec![0.9; 32], 1, 0));
        track.set_mute(true);
        let rt = track.playback();

        let mut l = vec![1.0; 32];
        let mut r = vec![1.0; 32];
        mix_track(&rt, 0, &mut l, &mut r, false);
        assert!(l.iter().all(|&s| s == 0.0));
        assert!(r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_solo_elsewhere_silences_track() {
        let mut track = Track::new("t");
        track.add_region(region_with(vec![0.9; 32], 1, 0));
        let rt = track.playback();

        let mut l = vec![0.0; 32];
        let mut r = vec![0.0; 32];
        mix_track(&rt, 0, &mut l, &mut r, true);
        assert!(l.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_left_solo_silences_right() {
        let mut track = Track::new("t");
        track.add_region(region_with(vec![0.9; 32], 1, 0));
        track.set_left_solo(true);
        let rt = track.playback();

        let mut l = vec![0.0; 32];
        let mut r = vec![0.0; 32];
        mix_track(&rt, 0, &mut l, &mut r, false);
        assert!(l.iter().all(|&s| s == 0.9));
        assert!(r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_all_tracks_muted_outputs_zeros() {
        let mut a = Track::new("a");
        a.add_region(region_with(vec![0.9; 64], 1, 0));
        a.set_mute(true);
        let mut b = Track::new("b");
        b.add_region(region_with(vec![0.7; 64], 1, 0));
        b.set_mute(true);

        let mut mixer = mixer_with(vec![a.playback(), b.playback()]);
        mixer.transport.resize_if_necessary(64);
        mixer.transport.play();

        let mut l = vec![1.0f32; 64];
        let mut r = vec![1.0f32; 64];
        mixer.process(&mut l, &mut r);
        assert!(l.iter().all(|&s| s == 0.0));
        assert!(r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_process_advances_and_stops_at_end() {
        let mut track = Track::new("t");
        track.add_region(region_with(vec![0.5; 100], 1, 0));
        let mut mixer = mixer_with(vec![track.playback()]);
        mixer.transport.resize_if_necessary(100);
        mixer.transport.play();

        let mut l = vec![0.0f32; 64];
        let mut r = vec![0.0f32; 64];
        mixer.process(&mut l, &mut r);
        assert_eq!(mixer.transport.offset(), 64);
        assert!((l[0] - 0.5).abs() < 1e-6);

        mixer.process(&mut l, &mut r);
        assert_eq!(mixer.transport.offset(), 100);
        assert!(!mixer.transport.is_playing());
    }

    #[test]
    fn test_stopped_transport_outputs_silence() {
        let mut track = Track::new("t");
        track.add_region(region_with(vec![0.5; 100], 1, 0));
        let mut mixer = mixer_with(vec![track.playback()]);

        let mut l = vec![1.0f32; 32];
        let mut r = vec![1.0f32; 32];
        mixer.process(&mut l, &mut r);
        assert!(l.iter().all(|&s| s == 0.0));
        assert_eq!(mixer.transport.offset(), 0);
    }

    #[test]
    fn test_track_fader_applied() {
        let mut track = Track::new("t");
        track.add_region(region_with(vec![1.0; 16], 1, 0));
        track.set_fader_gain_db(-6.0);
        let rt = track.playback();

        let mut l = vec![0.0; 16];
        let mut r = vec![0.0; 16];
        mix_track(&rt, 0, &mut l, &mut r, false);
        assert!((l[0] - wl_core::db_to_gain(-6.0)).abs() < 1e-12);
        let (pl, _) = rt.meter.peaks();
        assert!((pl - wl_core::db_to_gain(-6.0)).abs() < 1e-12);
    }
}
