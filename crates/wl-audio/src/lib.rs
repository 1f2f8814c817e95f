//! wl-audio: Audio driver abstraction
//!
//! The engine talks to audio hardware through the [`AudioDriver`] capability;
//! the cpal backend is the only implementation shipped. The host invokes the
//! registered process callback from its real-time thread with deinterleaved
//! f32 buffers no larger than the advertised maximum block size.

mod cpal_driver;
mod driver;
mod error;

pub use cpal_driver::*;
pub use driver::*;
pub use error::*;
