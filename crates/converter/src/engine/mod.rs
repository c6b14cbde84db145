//! Encoder engine capability
//!
//! The conversion pipeline drives an encoder it treats as a black box: the engine
//! is bootstrapped once per slot into a session, and a session offers a private
//! virtual filesystem plus a command runner that streams fractional progress.

pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod fake;

pub use ffmpeg::{FfmpegBackend, FfmpegSession, ProgressTracker};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the per-command progress channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Sending half of a command's progress stream; values are in [0, 1].
pub type ProgressSender = mpsc::Sender<f64>;

/// Error type for encoder engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// The environment lacks the encoder or one of its capabilities
    #[error("Encoder unavailable in this environment: {0}")]
    Unsupported(String),

    /// The engine could not be loaded
    #[error("Encoder failed to load: {0}")]
    Bootstrap(String),

    /// Virtual file names are plain names without path components
    #[error("Invalid virtual file name: {0:?}")]
    InvalidFileName(String),

    /// The virtual file does not exist
    #[error("Virtual file not found: {0}")]
    NotFound(String),

    /// The encode command failed
    #[error("Encode command failed: {0}")]
    Exec(String),

    /// IO error inside the engine
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Factory for encoder sessions.
#[async_trait]
pub trait EncoderBackend: Send + Sync {
    /// Load a fresh engine instance.
    async fn bootstrap(&self) -> Result<Arc<dyn EncoderSession>, EngineError>;
}

/// A loaded encoder instance with its own virtual filesystem.
///
/// A session belongs to exactly one slot.
#[async_trait]
pub trait EncoderSession: Send + Sync {
    /// Whether the session is still usable.
    fn is_loaded(&self) -> bool;

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), EngineError>;

    /// Run one command over the virtual filesystem, reporting progress on `progress`.
    async fn execute(&self, args: &[String], progress: ProgressSender) -> Result<(), EngineError>;

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, EngineError>;

    async fn delete_file(&self, name: &str) -> Result<(), EngineError>;
}

/// Reject names that would escape the virtual filesystem.
pub fn validate_virtual_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(EngineError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Send a progress value without waiting; a lagging consumer just misses it.
pub fn report_progress(tx: &ProgressSender, native: f64) {
    if !native.is_finite() {
        return;
    }
    if let Err(e) = tx.try_send(native.clamp(0.0, 1.0)) {
        let reason = match e {
            mpsc::error::TrySendError::Full(_) => "channel full",
            mpsc::error::TrySendError::Closed(_) => "receiver gone",
        };
        tracing::trace!(native, reason, "progress report dropped");
    }
}
