//! Encode command construction
//!
//! Builds the argument list that turns a staged still image and audio clip into
//! an H.264/AAC MP4 whose length follows the audio.

use crate::config::EncodeConfig;

/// Virtual file name of every encode's output.
pub const OUTPUT_FILE_NAME: &str = "output.mp4";

/// Stem of the staged input files (`input.<ext>`).
pub const INPUT_STEM: &str = "input";

/// Encoder settings applied to every job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub video_codec: String,
    pub preset: String,
    pub tune: String,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self::from(&EncodeConfig::default())
    }
}

impl From<&EncodeConfig> for EncodeSettings {
    fn from(cfg: &EncodeConfig) -> Self {
        Self {
            max_width: cfg.max_width,
            max_height: cfg.max_height,
            video_codec: cfg.video_codec.clone(),
            preset: cfg.preset.clone(),
            tune: cfg.tune.clone(),
            pixel_format: cfg.pixel_format.clone(),
            audio_codec: cfg.audio_codec.clone(),
            audio_bitrate_kbps: cfg.audio_bitrate_kbps,
        }
    }
}

impl EncodeSettings {
    /// Video filter: fit inside the bounds keeping aspect, then force even sides.
    pub fn scale_filter(&self) -> String {
        format!(
            "scale=min(iw\\,{}):min(ih\\,{}):force_original_aspect_ratio=decrease,scale=trunc(iw/2)*2:trunc(ih/2)*2",
            self.max_width, self.max_height
        )
    }
}

/// Virtual file name for a staged input with extension `ext`.
pub fn input_file_name(ext: &str) -> String {
    format!("{}.{}", INPUT_STEM, ext)
}

/// Build the encode arguments
///
/// The image is looped as a still video stream; `-shortest` ends the output
/// with the audio. Output is written to [`OUTPUT_FILE_NAME`] with the index
/// moved to the front for progressive playback.
pub fn build_encode_args(image_file: &str, audio_file: &str, settings: &EncodeSettings) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(32);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    // Looped still image, then audio
    push(&["-loop", "1", "-i", image_file]);
    push(&["-i", audio_file]);

    push(&["-c:v", settings.video_codec.as_str()]);
    push(&["-preset", settings.preset.as_str()]);
    push(&["-tune", settings.tune.as_str()]);
    let filter = settings.scale_filter();
    push(&["-vf", filter.as_str()]);

    let bitrate = format!("{}k", settings.audio_bitrate_kbps);
    push(&["-c:a", settings.audio_codec.as_str(), "-b:a", bitrate.as_str()]);

    push(&["-pix_fmt", settings.pixel_format.as_str()]);
    push(&["-shortest"]);
    push(&["-movflags", "+faststart"]);
    push(&[OUTPUT_FILE_NAME]);

    args
}
