//! cpal-backed audio driver
//!
//! Opens the platform's preferred host (JACK before ALSA on Linux, ASIO
//! before WASAPI on Windows, CoreAudio on macOS), requests an f32 output
//! stream, and bridges cpal's interleaved buffers to the engine's
//! deinterleaved process callback through preallocated scratch.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Host, SampleFormat, Stream, StreamConfig};

use crate::{
    acquire_driver_slot, release_driver_slot, AudioDriver, AudioError, AudioResult,
    ProcessCallback,
};

/// Get the audio host (platform-specific backend)
pub fn get_host() -> Host {
    #[cfg(target_os = "linux")]
    {
        if let Some(id) = cpal::available_hosts()
            .into_iter()
            .find(|h| *h == cpal::HostId::Jack)
        {
            if let Ok(host) = cpal::host_from_id(id) {
                return host;
            }
        }
        cpal::default_host()
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(id) = cpal::available_hosts()
            .into_iter()
            .find(|h| *h == cpal::HostId::Asio)
        {
            if let Ok(host) = cpal::host_from_id(id) {
                return host;
            }
        }
        cpal::default_host()
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        cpal::default_host()
    }
}

/// cpal implementation of the driver capability
pub struct CpalDriver {
    device: cpal::Device,
    config: StreamConfig,
    stream: Option<Stream>,
    max_block: usize,
}

impl CpalDriver {
    /// Open the default output device.
    ///
    /// Only one driver may exist per process; a second construction fails
    /// with `AlreadyInitialized`.
    pub fn new(max_block: usize) -> AudioResult<Self> {
        if !acquire_driver_slot() {
            return Err(AudioError::AlreadyInitialized);
        }
        match Self::open_device(max_block) {
            Ok(driver) => Ok(driver),
            Err(e) => {
                release_driver_slot();
                Err(e)
            }
        }
    }

    fn open_device(max_block: usize) -> AudioResult<Self> {
        let host = get_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let default = device
            .default_output_config()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?;
        if default.sample_format() != SampleFormat::F32 {
            return Err(AudioError::ConfigError(format!(
                "device sample format {:?} is not f32",
                default.sample_format()
            )));
        }
        let config = StreamConfig {
            channels: default.channels().max(2),
            sample_rate: default.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        log::info!(
            "audio device '{}' at {} Hz, {} channels",
            device.name().unwrap_or_else(|_| "unknown".into()),
            config.sample_rate.0,
            config.channels
        );
        Ok(Self {
            device,
            config,
            stream: None,
            max_block,
        })
    }
}

impl AudioDriver for CpalDriver {
    fn initialize(&mut self, mut callback: ProcessCallback) -> AudioResult<()> {
        if self.stream.is_some() {
            return Err(AudioError::StreamError("stream already running".into()));
        }
        let channels = self.config.channels as usize;
        let max_block = self.max_block;
        let mut scratch_l = vec![0.0f32; max_block];
        let mut scratch_r = vec![0.0f32; max_block];

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    // cpal hands us one interleaved buffer; feed the engine
                    // in sub-blocks no larger than the advertised maximum
                    let mut frame = 0;
                    let total = data.len() / channels;
                    while frame < total {
                        let n = (total - frame).min(max_block);
                        callback(n, &mut scratch_l[..n], &mut scratch_r[..n]);
                        for k in 0..n {
                            let at = (frame + k) * channels;
                            data[at] = scratch_l[k];
                            if channels > 1 {
                                data[at + 1] = scratch_r[k];
                            }
                            for extra in 2..channels {
                                data[at + extra] = 0.0;
                            }
                        }
                        frame += n;
                    }
                },
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn cleanup(&mut self) -> AudioResult<()> {
        match self.stream.take() {
            Some(stream) => {
                stream
                    .pause()
                    .map_err(|e| AudioError::StreamError(e.to_string()))?;
                drop(stream);
                Ok(())
            }
            None => Err(AudioError::NotInitialized),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn max_block_size(&self) -> usize {
        self.max_block
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.stream = None;
        release_driver_slot();
    }
}
