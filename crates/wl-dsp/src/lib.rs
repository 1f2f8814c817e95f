//! wl-dsp: Signal processing for WaveLoom
//!
//! Onset detection, pitch-preserving time-stretch, and meter ballistics.
//! Everything here operates on plain sample slices; the editing layer owns
//! extraction from and splicing back into piece tables.

mod meter;
mod onset;
mod stretch;

pub use meter::*;
pub use onset::*;
pub use stretch::*;
