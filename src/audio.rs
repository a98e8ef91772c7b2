//! Audio decoding utilities.
//!
//! Uploaded files are decoded to 16 kHz mono PCM (`f32`) because that is the
//! rate wav2vec2 checkpoints are trained on.

use std::io::{Cursor, ErrorKind};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::AppError;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Returns the lowercased extension of `filename`, used as a probing hint.
pub fn extension_hint(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

/// Decodes media bytes into 16 kHz mono samples.
///
/// Channels are averaged and other sample rates are resampled. The container
/// is probed from content; `extension_hint` only speeds the probe up.
pub fn decode_to_mono_16khz_f32(
    bytes: &[u8],
    extension_hint: Option<&str>,
) -> Result<Vec<f32>, AppError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| AppError::audio_decode(format!("failed to open audio file: {err}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| AppError::audio_decode("no audio track found in uploaded file"))?;

    if track.codec_params.codec == CODEC_TYPE_NULL {
        return Err(AppError::audio_decode(
            "unsupported codec: missing codec information",
        ));
    }

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| AppError::audio_decode(format!("unsupported codec: {err}")))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(TARGET_SAMPLE_RATE);
    let track_id = track.id;
    let mut mono = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                return Err(AppError::audio_decode(
                    "decoder reset required for this audio stream",
                ));
            }
            Err(err) => {
                return Err(AppError::audio_decode(format!(
                    "failed while reading audio stream: {err}"
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => {
                return Err(AppError::audio_decode(format!(
                    "failed to decode audio packet: {err}"
                )));
            }
        };

        sample_rate = decoded.spec().rate;
        let channels = decoded.spec().channels.count();

        let mut sample_buffer =
            SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        sample_buffer.copy_interleaved_ref(decoded);
        let samples = sample_buffer.samples();

        if channels <= 1 {
            mono.extend_from_slice(samples);
            continue;
        }

        mono.extend(
            samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        );
    }

    if mono.is_empty() {
        return Err(AppError::audio_decode("decoded audio is empty"));
    }

    let clamped = mono
        .into_iter()
        .map(|s| s.clamp(-1.0, 1.0))
        .collect::<Vec<_>>();

    Ok(if sample_rate == TARGET_SAMPLE_RATE {
        clamped
    } else {
        resample_linear(&clamped, sample_rate, TARGET_SAMPLE_RATE)
    })
}

/// Resamples a mono signal from `src_rate` to `dst_rate` via linear interpolation.
fn resample_linear(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || input.len() < 2 {
        return input.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = ((input.len() as f64) * (dst_rate as f64) / (src_rate as f64)).round() as usize;
    let out_len = out_len.max(1);

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;

        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        out.push(a + (b - a) * frac);
    }

    out
}

/// Builds a 16-bit PCM WAV file in memory.
#[cfg(test)]
pub(crate) fn pcm16_wav(sample_rate: u32, channels: u16, frames: &[i16]) -> Vec<u8> {
    let data_len = (frames.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in frames {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
