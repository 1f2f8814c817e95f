//! Transport state machine
//!
//! All transport state lives in atomics written by the UI thread and observed
//! by the audio thread at process-call boundaries. Seeking and loop
//! manipulation are separate explicit operations; a seek never alters the
//! loop.
//!
//! ```text
//!               play()                pause()
//!   Stopped ───────────► Playing ─────────────► Stopped
//!      ▲                   │
//!      │  reach end, not   │ enable_loop / disable_loop
//!      │  looping          │ (alters the looping substate only)
//!      └───────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use wl_core::{EditError, EditResult};

/// Transport states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransportState {
    #[default]
    Stopped = 0,
    Playing = 1,
}

impl TransportState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Playing,
            _ => Self::Stopped,
        }
    }
}

/// Shared transport: playhead, play state, loop range, timeline length
#[derive(Debug, Default)]
pub struct Transport {
    offset: AtomicU64,
    state: AtomicU8,
    looping: AtomicBool,
    loop_start: AtomicU64,
    loop_end: AtomicU64,
    last_frame: AtomicU64,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    pub fn play(&self) {
        self.state
            .store(TransportState::Playing as u8, Ordering::Release);
    }

    pub fn pause(&self) {
        self.state
            .store(TransportState::Stopped as u8, Ordering::Release);
    }

    /// Playhead position in frames
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Move the playhead. Allowed while playing; takes effect at the next
    /// process call. Does not touch the loop.
    pub fn seek(&self, frame: u64) {
        let clamped = frame.min(self.last_frame());
        self.offset.store(clamped, Ordering::Relaxed);
    }

    /// Arm the loop over `[start, end)`; requires `end > start`
    pub fn enable_loop(&self, start: u64, end: u64) -> EditResult<()> {
        if end <= start {
            return Err(EditError::Audio(format!(
                "loop range {start}..{end} is empty"
            )));
        }
        self.loop_start.store(start, Ordering::Relaxed);
        self.loop_end.store(end, Ordering::Relaxed);
        self.looping.store(true, Ordering::Release);
        Ok(())
    }

    pub fn disable_loop(&self) {
        self.looping.store(false, Ordering::Release);
    }

    #[inline]
    pub fn looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    #[inline]
    pub fn loop_bounds(&self) -> (u64, u64) {
        (
            self.loop_start.load(Ordering::Relaxed),
            self.loop_end.load(Ordering::Relaxed),
        )
    }

    /// One past the end of the furthest region
    #[inline]
    pub fn last_frame(&self) -> u64 {
        self.last_frame.load(Ordering::Relaxed)
    }

    /// Grow the timeline monotonically to cover `frame`
    pub fn resize_if_necessary(&self, frame: u64) {
        self.last_frame.fetch_max(frame, Ordering::Relaxed);
    }

    /// Advance the playhead after mixing `nframes`. Wraps into the loop with
    /// overshoot carry; reaching the end without a loop stops the transport
    /// and clamps to the last frame. Called from the audio thread.
    pub fn advance(&self, nframes: u64) {
        let mut new = self.offset().saturating_add(nframes);
        if self.looping() {
            let (start, end) = self.loop_bounds();
            if end > start && new >= end {
                new = start + (new - end) % (end - start);
            }
        } else if new >= self.last_frame() {
            new = self.last_frame();
            self.pause();
        }
        self.offset.store(new, Ordering::Relaxed);
    }
}
