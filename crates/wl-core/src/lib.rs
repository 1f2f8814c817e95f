//! wl-core: Shared types, errors, and the piece table for WaveLoom
//!
//! This crate provides the foundational types used across all WaveLoom crates.

mod error;
mod piece;
mod progress;
mod sample;

pub use error::*;
pub use piece::*;
pub use progress::*;
pub use sample::*;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
    Hz176400 = 176400,
    Hz192000 = 192000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz44100
    }
}

/// Buffer size options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BufferSize {
    Frames64 = 64,
    Frames128 = 128,
    Frames256 = 256,
    Frames512 = 512,
    Frames1024 = 1024,
    Frames2048 = 2048,
}

impl BufferSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u32 as usize
    }

    /// Calculate latency in milliseconds
    #[inline]
    pub fn latency_ms(self, sample_rate: u32) -> f64 {
        (self.as_usize() as f64 / sample_rate as f64) * 1000.0
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::Frames512
    }
}
