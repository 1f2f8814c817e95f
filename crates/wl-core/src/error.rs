//! Error types shared across the editor core

use thiserror::Error;

/// Core error type
///
/// `OutOfRange` and `NoHistory` are recoverable; callers log a diagnostic and
/// treat the operation as a no-op. `OnsetSequenceCorrupt` indicates a broken
/// invariant and is fatal in debug builds.
#[derive(Error, Debug)]
pub enum EditError {
    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("no further history")]
    NoHistory,

    #[error("no suitable waveform cache for bin size {0}")]
    NoSuitableCache(usize),

    #[error("operation cancelled")]
    Cancelled,

    #[error("onset sequence corrupt: {0}")]
    OnsetSequenceCorrupt(String),

    #[error("audio error: {0}")]
    Audio(String),
}

/// Result type alias
pub type EditResult<T> = Result<T, EditError>;

impl EditError {
    /// Format an index/length pair for `OutOfRange` payloads
    pub fn out_of_range(what: &str, index: u64, len: u64) -> Self {
        Self::OutOfRange(format!("{what} {index} exceeds length {len}"))
    }
}
