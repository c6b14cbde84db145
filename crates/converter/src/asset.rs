//! Image and audio assets selected for a slot.
//!
//! Assets are opaque bytes plus the user's file name. Bytes are shared behind an
//! `Arc<[u8]>` so a slot can hand its selection to a job without copying.

use std::sync::Arc;

/// Extension used for the staged image when the file name has none.
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

/// Extension used for the staged audio when the file name has none.
pub const DEFAULT_AUDIO_EXTENSION: &str = "mp3";

/// A still image selected for conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    /// File name as given by the user (no directory part).
    pub file_name: String,
    /// Encoded image bytes.
    pub bytes: Arc<[u8]>,
    /// Pixel dimensions, known only after the preprocessor re-encoded the image.
    pub dimensions: Option<(u32, u32)>,
}

impl ImageAsset {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            dimensions: None,
        }
    }

    /// Extension for the staged virtual file, defaulting to `jpg`.
    pub fn staging_extension(&self) -> String {
        file_extension(&self.file_name).unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// An audio clip selected for conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioAsset {
    /// File name as given by the user (no directory part).
    pub file_name: String,
    /// Encoded audio bytes.
    pub bytes: Arc<[u8]>,
    /// Probed duration in seconds; 0 means unknown.
    pub duration_secs: f64,
}

impl AudioAsset {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            duration_secs: 0.0,
        }
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Extension for the staged virtual file, defaulting to `mp3`.
    pub fn staging_extension(&self) -> String {
        file_extension(&self.file_name).unwrap_or_else(|| DEFAULT_AUDIO_EXTENSION.to_string())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Byte offset of the extension dot, if the name ends in `.<suffix>` with a
/// non-empty suffix that contains no path separator.
fn extension_dot(name: &str) -> Option<usize> {
    let dot = name.rfind('.')?;
    let suffix = &name[dot + 1..];
    if suffix.is_empty() || suffix.contains('/') {
        return None;
    }
    Some(dot)
}

/// Lower-cased extension of `name`, or None when it has no extension.
pub fn file_extension(name: &str) -> Option<String> {
    extension_dot(name).map(|dot| name[dot + 1..].to_lowercase())
}

/// `name` without its last `.`-delimited suffix.
pub fn base_name(name: &str) -> &str {
    match extension_dot(name) {
        Some(dot) => &name[..dot],
        None => name,
    }
}

/// `name` with its extension replaced by `ext` (appended when there is none).
pub fn replace_extension(name: &str, ext: &str) -> String {
    format!("{}.{}", base_name(name), ext)
}

/// Replace characters that are not allowed in file names with `_`.
pub fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
