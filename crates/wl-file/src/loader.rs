//! Audio file loading
//!
//! Decodes WAV, FLAC, OGG Vorbis, AIFF, and CAF through symphonia into
//! interleaved f64 samples. When the file's rate differs from the session's,
//! the caller-supplied dialog picks a converter quality (or cancels the load)
//! and the samples go through rubato's sinc resampler.
//!
//! Stages: `Scan → Decode → Resample → Complete`; the progress callback's
//! return value is the cancel signal.

use std::fs::File;
use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use wl_core::Sample;

use crate::{FileError, FileResult};

/// Import file filters advertised to file dialogs
pub const IMPORT_FILTERS: &[(&str, &[&str])] = &[
    ("WAV", &["wav", "wave"]),
    ("FLAC", &["flac"]),
    ("OGG Vorbis", &["ogg", "oga"]),
    ("AIFF", &["aiff", "aif"]),
    ("CAF", &["caf"]),
];

/// Resampler chunk size in frames
const RESAMPLE_CHUNK: usize = 1024;

/// Stages of a file load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Scan,
    Decode,
    Resample,
    Complete,
}

/// Sample-rate converter quality, picked through the resample dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterQuality {
    Best,
    Medium,
    Fastest,
}

impl ConverterQuality {
    fn sinc_params(self) -> SincInterpolationParameters {
        match self {
            Self::Best => SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            Self::Medium => SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            },
            Self::Fastest => SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.91,
                interpolation: SincInterpolationType::Nearest,
                oversampling_factor: 64,
                window: WindowFunction::Hann2,
            },
        }
    }
}

/// A decoded (and possibly resampled) audio file
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub name: String,
    pub sample_rate: u32,
    pub channels: usize,
    /// Interleaved samples, `len % channels == 0`
    pub samples: Vec<Sample>,
}

impl PcmBuffer {
    pub fn nframes(&self) -> u64 {
        (self.samples.len() / self.channels.max(1)) as u64
    }
}

/// Load an audio file, converting to `target_sample_rate` when necessary.
///
/// `resample_dialog` is consulted only on a rate mismatch; returning `None`
/// cancels the load.
pub fn load_audio_file<D, P>(
    path: &Path,
    target_sample_rate: u32,
    resample_dialog: D,
    progress: &mut P,
) -> FileResult<PcmBuffer>
where
    D: FnOnce(u32, u32) -> Option<ConverterQuality>,
    P: FnMut(LoadStage, f64) -> bool,
{
    if !progress(LoadStage::Scan, 0.0) {
        return Err(FileError::Cancelled);
    }

    let file =
        File::open(path).map_err(|_| FileError::NotFound(path.display().to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FileError::UnsupportedFormat(e.to_string()))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| FileError::InvalidFile("no audio track found".to_string()))?;
    let track_id = track.id;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(2);
    let file_sample_rate = track.codec_params.sample_rate.unwrap_or(target_sample_rate);
    let total_frames = track.codec_params.n_frames;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    if !progress(LoadStage::Scan, 1.0) {
        return Err(FileError::Cancelled);
    }

    // ── Decode ─────────────────────────────────────────────────────────────

    let mut samples: Vec<Sample> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f64>> = None;

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                });
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // Skip corrupt packets, keep the rest of the file
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        }

        let fraction = total_frames
            .map(|t| (samples.len() / channels.max(1)) as f64 / t.max(1) as f64)
            .unwrap_or(0.0);
        if !progress(LoadStage::Decode, fraction.min(1.0)) {
            return Err(FileError::Cancelled);
        }
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio")
        .to_string();

    // ── Resample ───────────────────────────────────────────────────────────

    let samples = if file_sample_rate != target_sample_rate {
        let quality = resample_dialog(file_sample_rate, target_sample_rate)
            .ok_or(FileError::Cancelled)?;
        resample(
            &samples,
            channels,
            file_sample_rate,
            target_sample_rate,
            quality,
            progress,
        )?
    } else {
        samples
    };

    if !progress(LoadStage::Complete, 1.0) {
        return Err(FileError::Cancelled);
    }

    Ok(PcmBuffer {
        name,
        sample_rate: target_sample_rate,
        channels,
        samples,
    })
}

fn resample<P>(
    samples: &[Sample],
    channels: usize,
    from: u32,
    to: u32,
    quality: ConverterQuality,
    progress: &mut P,
) -> FileResult<Vec<Sample>>
where
    P: FnMut(LoadStage, f64) -> bool,
{
    let ratio = to as f64 / from as f64;
    let mut resampler = SincFixedIn::<f64>::new(
        ratio,
        2.0,
        quality.sinc_params(),
        RESAMPLE_CHUNK,
        channels,
    )
    .map_err(|e| FileError::ResampleError(e.to_string()))?;

    let in_frames = samples.len() / channels.max(1);
    let expected = (in_frames as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();

    // Deinterleave
    let mut input: Vec<Vec<f64>> = vec![Vec::with_capacity(in_frames); channels];
    for (i, &s) in samples.iter().enumerate() {
        input[i % channels].push(s);
    }

    let mut output: Vec<Vec<f64>> = vec![Vec::with_capacity(expected + delay); channels];
    let mut pos = 0;
    while pos + RESAMPLE_CHUNK <= in_frames {
        let chunk: Vec<&[f64]> = input
            .iter()
            .map(|ch| &ch[pos..pos + RESAMPLE_CHUNK])
            .collect();
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| FileError::ResampleError(e.to_string()))?;
        for (out, ch) in output.iter_mut().zip(processed) {
            out.extend(ch);
        }
        pos += RESAMPLE_CHUNK;
        if !progress(LoadStage::Resample, pos as f64 / in_frames.max(1) as f64) {
            return Err(FileError::Cancelled);
        }
    }
    if pos < in_frames {
        let tail: Vec<&[f64]> = input.iter().map(|ch| &ch[pos..]).collect();
        let processed = resampler
            .process_partial(Some(&tail), None)
            .map_err(|e| FileError::ResampleError(e.to_string()))?;
        for (out, ch) in output.iter_mut().zip(processed) {
            out.extend(ch);
        }
    }
    // Drain the sinc filter's internal delay line
    let processed = resampler
        .process_partial::<&[f64]>(None, None)
        .map_err(|e| FileError::ResampleError(e.to_string()))?;
    for (out, ch) in output.iter_mut().zip(processed) {
        out.extend(ch);
    }

    // Trim the converter delay and re-interleave to the expected length
    let mut result = Vec::with_capacity(expected * channels);
    for frame in delay..(delay + expected) {
        for ch in &output {
            result.push(ch.get(frame).copied().unwrap_or(0.0));
        }
    }

    if !progress(LoadStage::Resample, 1.0) {
        return Err(FileError::Cancelled);
    }
    Ok(result)
}
