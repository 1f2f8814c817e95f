//! wl-engine: Tracks, transport, real-time mixing, and the session
//!
//! The UI thread owns tracks and regions and publishes immutable playback
//! snapshots to the real-time mixer over a lock-free ring; the mixer adopts
//! the newest graph at the top of each process call and never allocates,
//! blocks, or fails.

mod master;
mod rt;
mod session;
mod timeline;
mod track;

pub use master::*;
pub use rt::*;
pub use session::*;
pub use timeline::*;
pub use track::*;
