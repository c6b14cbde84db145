//! Job-level errors and their user-facing classification.

use crate::download::DownloadError;
use crate::engine::EngineError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Substrings that mark a missing engine capability.
const UNSUPPORTED_MARKERS: &[&str] = &["sharedarraybuffer", "unavailable in this environment"];

/// Substrings that mark a memory failure.
const MEMORY_MARKERS: &[&str] = &["memory"];

/// Error type for a conversion job
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The encoder engine failed to load, stage, run or read back
    #[error("Encoder error: {0}")]
    Engine(#[from] EngineError),

    /// The finished video could not be delivered
    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    /// The encode command succeeded but wrote nothing
    #[error("Encoder produced an empty output file")]
    EmptyOutput,
}

/// Coarse, user-facing failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The environment lacks something the encoder needs
    UnsupportedEnvironment,
    /// The encoder ran out of memory
    ResourceExhausted,
    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Classify a failure by the substrings in its message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if UNSUPPORTED_MARKERS.iter().any(|m| lower.contains(m)) {
            ErrorKind::UnsupportedEnvironment
        } else if MEMORY_MARKERS.iter().any(|m| lower.contains(m)) {
            ErrorKind::ResourceExhausted
        } else {
            ErrorKind::Unknown
        }
    }

    /// Message shown to the user for this category.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedEnvironment => {
                "Video encoding is not supported in this environment. Please install a recent ffmpeg build with libx264 and AAC support."
            }
            ErrorKind::ResourceExhausted => "The files are too large to process. Try smaller files.",
            ErrorKind::Unknown => {
                "Something went wrong while creating the video. Please try different files."
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedEnvironment => "unsupported_environment",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified job failure as recorded in the slot state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionFailure {
    pub kind: ErrorKind,
    /// User-facing message
    pub message: String,
    /// The underlying error text, for logs and diagnostics
    pub detail: String,
}

impl ConversionFailure {
    pub fn from_error(err: &ConversionError) -> Self {
        let detail = err.to_string();
        let kind = ErrorKind::classify(&detail);
        Self {
            kind,
            message: kind.user_message().to_string(),
            detail,
        }
    }
}
