//! Audio duration probing.
//!
//! Reads container and stream headers only; no packets are decoded. The probed
//! duration is display metadata and never drives the encoder, so callers treat a
//! failed probe as "unknown" rather than an error.

use crate::asset::{file_extension, AudioAsset};
use std::io::Cursor;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Error type for duration probing
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No registered demuxer recognised the bytes
    #[error("Unrecognized audio format: {0}")]
    Format(#[source] symphonia::core::errors::Error),

    /// The container holds no playable track
    #[error("No audio track found")]
    NoTrack,

    /// The stream headers carry no frame count
    #[error("Duration not present in stream metadata")]
    UnknownDuration,
}

/// Duration of `asset` in seconds, from stream metadata.
pub fn probe_duration(asset: &AudioAsset) -> Result<f64, ProbeError> {
    let source = Cursor::new(asset.bytes.clone());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = file_extension(&asset.file_name) {
        hint.with_extension(&ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(ProbeError::Format)?;

    let track = probed.format.default_track().ok_or(ProbeError::NoTrack)?;
    let params = &track.codec_params;
    let n_frames = params.n_frames.ok_or(ProbeError::UnknownDuration)?;

    let seconds = match (params.time_base, params.sample_rate) {
        (Some(tb), _) => {
            let time = tb.calc_time(n_frames);
            time.seconds as f64 + time.frac
        }
        (None, Some(rate)) if rate > 0 => n_frames as f64 / rate as f64,
        _ => return Err(ProbeError::UnknownDuration),
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ProbeError::UnknownDuration);
    }

    Ok(seconds)
}

/// Probe `asset`, returning 0 (unknown) when the duration cannot be read.
pub fn probe_duration_or_unknown(asset: &AudioAsset) -> f64 {
    match probe_duration(asset) {
        Ok(seconds) => seconds,
        Err(e) => {
            tracing::debug!(file = %asset.file_name, error = %e, "audio duration unknown");
            0.0
        }
    }
}
