//! Session export encoders
//!
//! Stereo mixdowns go to WAV (hound) or FLAC (flac-bound) at 16- or 24-bit
//! PCM. A failed write removes the partial file.

use std::path::Path;

use flac_bound::{FlacEncoder, WriteWrapper};

use wl_core::Sample;

use crate::{FileError, FileResult};

/// FLAC block size in frames per `process_interleaved` call
const FLAC_BLOCK: usize = 4096;

/// Output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Wav,
    Flac,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Flac => "flac",
        }
    }
}

/// Output bit depths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportBitDepth {
    Int16,
    Int24,
}

impl ExportBitDepth {
    pub fn bits(self) -> u32 {
        match self {
            Self::Int16 => 16,
            Self::Int24 => 24,
        }
    }

    fn max_value(self) -> f64 {
        match self {
            Self::Int16 => 32767.0,
            Self::Int24 => 8_388_607.0,
        }
    }
}

/// Write a stereo pair to disk. Channels must have equal length.
pub fn write_stereo(
    path: &Path,
    format: ExportFormat,
    bit_depth: ExportBitDepth,
    sample_rate: u32,
    left: &[Sample],
    right: &[Sample],
) -> FileResult<()> {
    if left.len() != right.len() {
        return Err(FileError::EncodeError(format!(
            "channel lengths differ: {} vs {}",
            left.len(),
            right.len()
        )));
    }
    let result = match format {
        ExportFormat::Wav => write_wav(path, bit_depth, sample_rate, left, right),
        ExportFormat::Flac => write_flac(path, bit_depth, sample_rate, left, right),
    };
    if result.is_err() {
        let _ = std::fs::remove_file(path);
    }
    result
}

fn write_wav(
    path: &Path,
    bit_depth: ExportBitDepth,
    sample_rate: u32,
    left: &[Sample],
    right: &[Sample],
) -> FileResult<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: bit_depth.bits() as u16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let max = bit_depth.max_value();

    match bit_depth {
        ExportBitDepth::Int16 => {
            for (&l, &r) in left.iter().zip(right.iter()) {
                writer.write_sample((l.clamp(-1.0, 1.0) * max) as i16)?;
                writer.write_sample((r.clamp(-1.0, 1.0) * max) as i16)?;
            }
        }
        ExportBitDepth::Int24 => {
            for (&l, &r) in left.iter().zip(right.iter()) {
                writer.write_sample((l.clamp(-1.0, 1.0) * max) as i32)?;
                writer.write_sample((r.clamp(-1.0, 1.0) * max) as i32)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

fn write_flac(
    path: &Path,
    bit_depth: ExportBitDepth,
    sample_rate: u32,
    left: &[Sample],
    right: &[Sample],
) -> FileResult<()> {
    let mut file = std::fs::File::create(path)?;
    let mut wrapper = WriteWrapper(&mut file);
    let mut encoder = FlacEncoder::new()
        .ok_or_else(|| FileError::EncodeError("FLAC encoder init failed".to_string()))?
        .channels(2)
        .sample_rate(sample_rate)
        .bits_per_sample(bit_depth.bits())
        .compression_level(5)
        .init_write(&mut wrapper)
        .map_err(|e| FileError::EncodeError(format!("FLAC init failed: {e:?}")))?;

    let max = bit_depth.max_value();
    let frames = left.len();
    let mut block = Vec::with_capacity(FLAC_BLOCK * 2);
    for start in (0..frames).step_by(FLAC_BLOCK) {
        let end = (start + FLAC_BLOCK).min(frames);
        block.clear();
        for f in start..end {
            block.push((left[f].clamp(-1.0, 1.0) * max) as i32);
            block.push((right[f].clamp(-1.0, 1.0) * max) as i32);
        }
        encoder
            .process_interleaved(&block, (end - start) as u32)
            .map_err(|_| FileError::EncodeError("FLAC encode failed".to_string()))?;
    }
    encoder
        .finish()
        .map_err(|_| FileError::EncodeError("FLAC finish failed".to_string()))?;
    Ok(())
}
