//! stillframe
//!
//! Turns a still image and an audio clip into an MP4 video with an embedded
//! encoder, across several independent conversion slots.

pub mod app;
pub mod asset;
pub mod command;
pub mod converter;
pub mod download;
pub mod engine;
pub mod error;
pub mod job;
pub mod preflight;
pub mod preprocess;
pub mod probe;
pub mod slots;
pub mod status;

#[cfg(test)]
mod test_fixtures;

pub use stillframe_config as config;
pub use stillframe_config::Config;
pub use app::{App, AppError, InputPair};
pub use asset::{AudioAsset, ImageAsset};
pub use command::{build_encode_args, EncodeSettings};
pub use converter::{ConversionOutcome, ConversionRequest, JobTicket, SlotConverter};
pub use download::{DirectorySink, DownloadError, DownloadSink, VideoBlob};
pub use engine::{EncoderBackend, EncoderSession, EngineError, FfmpegBackend};
pub use error::{ConversionError, ConversionFailure, ErrorKind};
pub use job::{
    format_duration, format_file_size, output_file_name, ConversionPhase, ConversionState,
    OutputDescriptor,
};
pub use preflight::{parse_ffmpeg_version, run_preflight, PreflightError, PreflightSettings};
pub use preprocess::{compress_image, compress_or_original, PreprocessError, PreprocessOptions};
pub use probe::{probe_duration, probe_duration_or_unknown, ProbeError};
pub use slots::{Selection, Slot, SlotError, SlotOrchestrator};
pub use status::{BoardSnapshot, SlotStatus};
