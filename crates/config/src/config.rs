//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Parsed values violate a constraint
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Slot layout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotsConfig {
    /// Number of independent converter slots (default 4)
    #[serde(default = "default_slot_count")]
    pub count: u32,
}

fn default_slot_count() -> u32 {
    4
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            count: default_slot_count(),
        }
    }
}

/// Image pre-compression applied when an image is selected
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreprocessConfig {
    /// Run the preprocessor at all (default true)
    #[serde(default = "default_preprocess_enabled")]
    pub enabled: bool,
    /// Maximum width after compression (default 1280)
    #[serde(default = "default_preprocess_max_width")]
    pub max_width: u32,
    /// Maximum height after compression (default 720)
    #[serde(default = "default_preprocess_max_height")]
    pub max_height: u32,
    /// JPEG quality, 1-100 (default 80)
    #[serde(default = "default_preprocess_quality")]
    pub quality: u8,
}

fn default_preprocess_enabled() -> bool {
    true
}

fn default_preprocess_max_width() -> u32 {
    1280
}

fn default_preprocess_max_height() -> u32 {
    720
}

fn default_preprocess_quality() -> u8 {
    80
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enabled: default_preprocess_enabled(),
            max_width: default_preprocess_max_width(),
            max_height: default_preprocess_max_height(),
            quality: default_preprocess_quality(),
        }
    }
}

/// Encode command settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeConfig {
    /// Output width cap (default 1920)
    #[serde(default = "default_encode_max_width")]
    pub max_width: u32,
    /// Output height cap (default 1080)
    #[serde(default = "default_encode_max_height")]
    pub max_height: u32,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_tune")]
    pub tune: String,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// Audio bitrate in kbps (default 128)
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,
}

fn default_encode_max_width() -> u32 {
    1920
}

fn default_encode_max_height() -> u32 {
    1080
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "ultrafast".to_string()
}

fn default_tune() -> String {
    "stillimage".to_string()
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate_kbps() -> u32 {
    128
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            max_width: default_encode_max_width(),
            max_height: default_encode_max_height(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            tune: default_tune(),
            pixel_format: default_pixel_format(),
            audio_codec: default_audio_codec(),
            audio_bitrate_kbps: default_audio_bitrate_kbps(),
        }
    }
}

/// Encoder engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Explicit ffmpeg binary (searched on PATH if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    /// Minimum accepted ffmpeg major version (default 4)
    #[serde(default = "default_min_ffmpeg_major")]
    pub min_ffmpeg_major: u32,
    /// Parent directory for per-slot scratch filesystems (system temp if None)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_min_ffmpeg_major() -> u32 {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            min_ffmpeg_major: default_min_ffmpeg_major(),
            work_dir: None,
        }
    }
}

/// Where finished videos are delivered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (default "info")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub slots: SlotsConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}


impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Check value constraints that serde cannot express
    ///
    /// - at least one slot
    /// - non-zero preprocess bounds, quality in 1..=100
    /// - non-zero, even encode bounds (the video codec needs even dimensions)
    /// - non-zero audio bitrate
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots.count == 0 {
            return Err(ConfigError::Invalid(
                "slots.count must be at least 1".to_string(),
            ));
        }

        if self.preprocess.max_width == 0 || self.preprocess.max_height == 0 {
            return Err(ConfigError::Invalid(
                "preprocess bounds must be non-zero".to_string(),
            ));
        }

        if !(1..=100).contains(&self.preprocess.quality) {
            return Err(ConfigError::Invalid(format!(
                "preprocess.quality must be within 1..=100, got {}",
                self.preprocess.quality
            )));
        }

        let (w, h) = (self.encode.max_width, self.encode.max_height);
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "encode bounds must be non-zero even numbers, got {}x{}",
                w, h
            )));
        }

        if self.encode.audio_bitrate_kbps == 0 {
            return Err(ConfigError::Invalid(
                "encode.audio_bitrate_kbps must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    // For any combination of section values, a rendered TOML document parses back
    // into exactly those values.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            count in 1u32..16,
            enabled in proptest::bool::ANY,
            pre_w in 1u32..8000,
            pre_h in 1u32..8000,
            quality in 1u8..=100,
            enc_w in 1u32..4000,
            enc_h in 1u32..4000,
            bitrate in 1u32..512,
            min_major in 1u32..10,
        ) {
            let toml_str = format!(
                r#"
[slots]
count = {}

[preprocess]
enabled = {}
max_width = {}
max_height = {}
quality = {}

[encode]
max_width = {}
max_height = {}
audio_bitrate_kbps = {}

[engine]
min_ffmpeg_major = {}
"#,
                count, enabled, pre_w, pre_h, quality,
                enc_w * 2, enc_h * 2, bitrate, min_major
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.slots.count, count);
            prop_assert_eq!(config.preprocess.enabled, enabled);
            prop_assert_eq!(config.preprocess.max_width, pre_w);
            prop_assert_eq!(config.preprocess.max_height, pre_h);
            prop_assert_eq!(config.preprocess.quality, quality);
            prop_assert_eq!(config.encode.max_width, enc_w * 2);
            prop_assert_eq!(config.encode.max_height, enc_h * 2);
            prop_assert_eq!(config.encode.audio_bitrate_kbps, bitrate);
            prop_assert_eq!(config.engine.min_ffmpeg_major, min_major);
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_odd_encode_bounds_rejected(
            w in 1u32..2000,
            h in 1u32..2000,
        ) {
            let mut config = Config::default();
            config.encode.max_width = w * 2 + 1;
            config.encode.max_height = h * 2;

            prop_assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.slots.count, 4);
        assert!(config.preprocess.enabled);
        assert_eq!(config.preprocess.max_width, 1280);
        assert_eq!(config.preprocess.max_height, 720);
        assert_eq!(config.preprocess.quality, 80);
        assert_eq!(config.encode.max_width, 1920);
        assert_eq!(config.encode.max_height, 1080);
        assert_eq!(config.encode.video_codec, "libx264");
        assert_eq!(config.encode.preset, "ultrafast");
        assert_eq!(config.encode.tune, "stillimage");
        assert_eq!(config.encode.pixel_format, "yuv420p");
        assert_eq!(config.encode.audio_codec, "aac");
        assert_eq!(config.encode.audio_bitrate_kbps, 128);
        assert_eq!(config.engine.ffmpeg_path, None);
        assert_eq!(config.engine.min_ffmpeg_major, 4);
        assert_eq!(config.output.download_dir, PathBuf::from("."));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[engine]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"

[output]
download_dir = "/srv/videos"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(
            config.engine.ffmpeg_path,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
        assert_eq!(config.output.download_dir, PathBuf::from("/srv/videos"));
        assert_eq!(config.slots.count, 4);
        assert_eq!(config.encode, EncodeConfig::default());
    }

    #[test]
    fn test_quality_out_of_range_rejected() {
        let mut config = Config::default();
        config.preprocess.quality = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.preprocess.quality = 101;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_slots_rejected() {
        let mut config = Config::default();
        config.slots.count = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("slots.count"));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = Config::parse_toml("[slots\ncount = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file_validates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stillframe.toml");

        std::fs::write(&path, "[slots]\ncount = 2\n").unwrap();
        let config = Config::load(&path).expect("Should load valid file");
        assert_eq!(config.slots.count, 2);

        std::fs::write(&path, "[slots]\ncount = 0\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = Config::load("/nonexistent/stillframe.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
