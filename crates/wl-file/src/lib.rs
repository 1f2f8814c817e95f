//! wl-file: Audio file loading and session export
//!
//! Decoding goes through symphonia (WAV, FLAC, OGG Vorbis, AIFF, CAF);
//! sample-rate conversion through rubato; encoding through hound (WAV) and
//! flac-bound (FLAC). All long operations report staged progress and honor a
//! boolean cancel signal.

mod error;
mod export;
mod loader;

pub use error::*;
pub use export::*;
pub use loader::*;
