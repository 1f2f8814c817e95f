//! Audio driver error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no output device available")]
    NoDevice,

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("an audio driver is already initialized in this process")]
    AlreadyInitialized,

    #[error("driver is not initialized")]
    NotInitialized,
}

pub type AudioResult<T> = Result<T, AudioError>;
