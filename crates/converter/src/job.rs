//! Conversion job state
//!
//! Phases, the observable per-slot state, progress mapping and the small
//! formatting helpers used to describe a finished video.

use crate::asset::{base_name, sanitize_file_component};
use crate::error::ConversionFailure;
use serde::Serialize;

/// Progress when the encode command starts.
pub const ENCODE_PROGRESS_START: f32 = 20.0;
/// Width of the encode window.
pub const ENCODE_PROGRESS_SPAN: f32 = 70.0;
/// Cap while the encode is running.
pub const ENCODE_PROGRESS_CAP: f32 = 90.0;

/// Phase of a slot's conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionPhase {
    Idle,
    Preparing,
    LoadingEncoder,
    WritingImage,
    WritingAudio,
    Encoding,
    Finalizing,
    Complete,
    Error,
}

impl ConversionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionPhase::Idle => "idle",
            ConversionPhase::Preparing => "preparing",
            ConversionPhase::LoadingEncoder => "loading_encoder",
            ConversionPhase::WritingImage => "writing_image",
            ConversionPhase::WritingAudio => "writing_audio",
            ConversionPhase::Encoding => "encoding",
            ConversionPhase::Finalizing => "finalizing",
            ConversionPhase::Complete => "complete",
            ConversionPhase::Error => "error",
        }
    }

    /// Status text shown on entering the phase.
    pub fn status_text(&self) -> &'static str {
        match self {
            ConversionPhase::Idle | ConversionPhase::Error => "",
            ConversionPhase::Preparing => "Preparing files...",
            ConversionPhase::LoadingEncoder => "Loading video encoder...",
            ConversionPhase::WritingImage => "Loading image...",
            ConversionPhase::WritingAudio => "Loading audio...",
            ConversionPhase::Encoding => "Rendering video...",
            ConversionPhase::Finalizing => "Finalizing export...",
            ConversionPhase::Complete => "Complete",
        }
    }

    /// Progress checkpoint on entering the phase, if it sets one.
    pub fn entry_progress(&self) -> Option<f32> {
        match self {
            ConversionPhase::Idle | ConversionPhase::Preparing | ConversionPhase::LoadingEncoder => {
                Some(0.0)
            }
            ConversionPhase::WritingImage => Some(10.0),
            ConversionPhase::WritingAudio => Some(15.0),
            ConversionPhase::Encoding => Some(ENCODE_PROGRESS_START),
            ConversionPhase::Finalizing => Some(95.0),
            ConversionPhase::Complete => Some(100.0),
            ConversionPhase::Error => None,
        }
    }

    /// A job is running in this phase.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            ConversionPhase::Preparing
                | ConversionPhase::LoadingEncoder
                | ConversionPhase::WritingImage
                | ConversionPhase::WritingAudio
                | ConversionPhase::Encoding
                | ConversionPhase::Finalizing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversionPhase::Complete | ConversionPhase::Error)
    }
}

impl std::fmt::Display for ConversionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Description of a finished video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDescriptor {
    pub file_name: String,
    /// Size in bytes
    pub file_size: u64,
    /// Audio duration in seconds; 0 when unknown
    pub duration: f64,
}

impl OutputDescriptor {
    pub fn formatted_size(&self) -> String {
        format_file_size(self.file_size)
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration)
    }
}

/// Observable state of one slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionState {
    pub phase: ConversionPhase,
    /// Percent complete, 0-100
    pub progress: f32,
    pub status: String,
    pub failure: Option<ConversionFailure>,
    pub output: Option<OutputDescriptor>,
}

impl Default for ConversionState {
    fn default() -> Self {
        Self::idle()
    }
}

impl ConversionState {
    pub fn idle() -> Self {
        Self {
            phase: ConversionPhase::Idle,
            progress: 0.0,
            status: String::new(),
            failure: None,
            output: None,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.phase.is_processing()
    }

    /// Move to `phase`, applying its status text and progress checkpoint.
    ///
    /// Progress never moves backwards within a job.
    pub fn enter(&mut self, phase: ConversionPhase) {
        self.phase = phase;
        self.status = phase.status_text().to_string();
        if let Some(p) = phase.entry_progress() {
            self.progress = self.progress.max(p);
        }
    }

    /// Enter `Error`; the message travels with the failure, not the status.
    pub fn fail(&mut self, failure: ConversionFailure) {
        self.phase = ConversionPhase::Error;
        self.progress = 0.0;
        self.status.clear();
        self.failure = Some(failure);
    }

    pub fn complete(&mut self, output: OutputDescriptor) {
        self.enter(ConversionPhase::Complete);
        self.output = Some(output);
    }
}

/// Map native engine progress (0-1) into the encode window.
pub fn map_encode_progress(native: f64) -> f32 {
    let native = if native.is_finite() { native.clamp(0.0, 1.0) } else { 0.0 };
    (ENCODE_PROGRESS_START + native as f32 * ENCODE_PROGRESS_SPAN).min(ENCODE_PROGRESS_CAP)
}

/// Tracks displayed progress for one job so it only ever increases.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressMeter {
    current: f32,
}

impl ProgressMeter {
    pub fn starting_at(current: f32) -> Self {
        Self { current }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Fold in a native progress report; returns the new value when it advanced.
    pub fn observe(&mut self, native: f64) -> Option<f32> {
        let mapped = map_encode_progress(native);
        if mapped > self.current {
            self.current = mapped;
            Some(mapped)
        } else {
            None
        }
    }
}

/// Format seconds as `M:SS`, seconds floored.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Format a byte count as `X.Y KB` below 1 MiB, otherwise `X.YY MB`.
pub fn format_file_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;

    let b = bytes as f64;
    if b < MIB {
        format!("{:.1} KB", b / KIB)
    } else {
        format!("{:.2} MB", b / MIB)
    }
}

/// Name of the delivered video.
///
/// `{image}_{audio}.mp4` from the two input base names, prefixed with
/// `slot{N}_` when the job runs in a multi-slot layout.
pub fn output_file_name(slot_number: Option<u32>, image_name: &str, audio_name: &str) -> String {
    let image = sanitize_file_component(base_name(image_name));
    let audio = sanitize_file_component(base_name(audio_name));
    match slot_number {
        Some(n) => format!("slot{}_{}_{}.mp4", n, image, audio),
        None => format!("{}_{}.mp4", image, audio),
    }
}
