//! Preflight checks for the ffmpeg engine
//!
//! Verifies the environment before an encoder session is handed out:
//! - ffmpeg binary resolution (configured path or PATH lookup)
//! - ffmpeg version check (configurable minimum major version)
//! - Encoder availability for the configured video and audio codecs

use crate::engine::EngineError;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Error types for preflight checks
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("FFmpeg version requirement not met: {0}")]
    FfmpegVersion(String),

    #[error("Encoder {0} not available in this ffmpeg build")]
    MissingEncoder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PreflightError> for EngineError {
    fn from(e: PreflightError) -> Self {
        EngineError::Unsupported(e.to_string())
    }
}

/// What the environment must provide
#[derive(Debug, Clone)]
pub struct PreflightSettings {
    /// Explicit ffmpeg binary; looked up on PATH when absent
    pub ffmpeg_path: Option<PathBuf>,
    /// Minimum accepted ffmpeg major version
    pub min_major: u32,
    /// Encoder names that must appear in `ffmpeg -encoders`
    pub required_encoders: Vec<String>,
}

/// Resolve the ffmpeg binary to run.
pub fn resolve_ffmpeg(configured: Option<&Path>) -> Result<PathBuf, PreflightError> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(PreflightError::FfmpegUnavailable(format!(
            "configured ffmpeg {} does not exist",
            path.display()
        ))),
        None => which::which("ffmpeg").map_err(|e| {
            PreflightError::FfmpegUnavailable(format!("ffmpeg not found in PATH: {}", e))
        }),
    }
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .trim()
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    // Major version sits before the first '.' or '-'
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Whether the version line names a git snapshot build ("N-112345-g...").
///
/// Snapshots carry no release number and are newer than any release they follow.
pub fn is_snapshot_build(version_output: &str) -> bool {
    version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))
        .and_then(|line| line.to_lowercase().split("ffmpeg version").nth(1).map(str::to_string))
        .and_then(|rest| rest.split_whitespace().next().map(str::to_string))
        .map(|token| token.starts_with("n-"))
        .unwrap_or(false)
}

/// Encoder names listed by `ffmpeg -encoders`.
///
/// Entries follow the `------` separator as `<flags> <name> <description>`.
pub fn parse_encoder_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _flags = parts.next()?;
            parts.next().map(str::to_string)
        })
        .collect()
}

async fn run_capture(binary: &Path, args: &[&str]) -> Result<String, PreflightError> {
    let output = Command::new(binary)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            PreflightError::FfmpegUnavailable(format!(
                "failed to run {} {}: {}",
                binary.display(),
                args.join(" "),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(PreflightError::FfmpegUnavailable(format!(
            "{} {} exited with {}",
            binary.display(),
            args.join(" "),
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check that `binary` reports a major version of at least `min_major`.
pub async fn check_ffmpeg_version(binary: &Path, min_major: u32) -> Result<(), PreflightError> {
    let version_output = run_capture(binary, &["-hide_banner", "-version"]).await?;

    if is_snapshot_build(&version_output) {
        tracing::debug!(binary = %binary.display(), "ffmpeg snapshot build, skipping version check");
        return Ok(());
    }

    let major_version = parse_ffmpeg_version(&version_output).ok_or_else(|| {
        PreflightError::FfmpegVersion(format!(
            "Could not parse FFmpeg version from output: {}",
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })?;

    if major_version < min_major {
        return Err(PreflightError::FfmpegVersion(format!(
            "FFmpeg {}.x or newer required, got: {}",
            min_major, major_version
        )));
    }

    Ok(())
}

/// Check that every encoder in `required` is compiled into `binary`.
pub async fn check_encoders(binary: &Path, required: &[String]) -> Result<(), PreflightError> {
    let output = run_capture(binary, &["-hide_banner", "-encoders"]).await?;
    let available = parse_encoder_list(&output);

    for name in required {
        if !available.iter().any(|a| a == name) {
            return Err(PreflightError::MissingEncoder(name.clone()));
        }
    }

    Ok(())
}

/// Run all preflight checks in order, returning the binary to use
///
/// Checks are run in the following order:
/// 1. Binary resolution
/// 2. FFmpeg version
/// 3. Encoder availability
pub async fn run_preflight(settings: &PreflightSettings) -> Result<PathBuf, PreflightError> {
    let binary = resolve_ffmpeg(settings.ffmpeg_path.as_deref())?;
    check_ffmpeg_version(&binary, settings.min_major).await?;
    check_encoders(&binary, &settings.required_encoders).await?;
    tracing::info!(binary = %binary.display(), "ffmpeg preflight passed");
    Ok(binary)
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // For any FFmpeg version string (including n-prefixed formats like n6.1-...),
    // the version parser extracts the major version number.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );

            let parsed = parse_ffmpeg_version(&version_output);
            prop_assert_eq!(
                parsed, Some(major),
                "Should parse major version {} from '{}'",
                major, version_output
            );
        }

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );

            let parsed = parse_ffmpeg_version(&version_output);
            prop_assert_eq!(parsed, Some(major));
            prop_assert!(!is_snapshot_build(&version_output));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_multiline(
            major in 1u32..20,
            minor in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{} Copyright (c) 2000-2024\nbuilt with gcc 12.2.0\nconfiguration: --enable-gpl",
                major, minor
            );

            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }
    }

    #[test]
    fn test_parse_ffmpeg_version_standard() {
        let output = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023";
        assert_eq!(parse_ffmpeg_version(output), Some(6));
    }

    #[test]
    fn test_parse_ffmpeg_version_n_prefixed() {
        let output = "ffmpeg version n7.0-123-gabcdef Copyright (c) 2000-2024";
        assert_eq!(parse_ffmpeg_version(output), Some(7));
    }

    #[test]
    fn test_parse_ffmpeg_version_invalid() {
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
    }

    #[test]
    fn test_snapshot_build_detection() {
        let output = "ffmpeg version N-112345-g0123abc Copyright (c) 2000-2024";
        assert!(is_snapshot_build(output));
        assert_eq!(parse_ffmpeg_version(output), None);
        assert!(!is_snapshot_build("ffmpeg version 6.0 Copyright"));
    }

    #[test]
    fn test_parse_encoder_list() {
        let output = r#"Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D mjpeg                MJPEG (Motion JPEG)
 A....D aac                  AAC (Advanced Audio Coding)
"#;
        let encoders = parse_encoder_list(output);
        assert_eq!(encoders, vec!["libx264", "mjpeg", "aac"]);
    }

    #[test]
    fn test_parse_encoder_list_without_separator() {
        assert!(parse_encoder_list("garbage\nmore garbage").is_empty());
    }

    #[test]
    fn test_resolve_missing_configured_binary() {
        let err = resolve_ffmpeg(Some(Path::new("/nonexistent/bin/ffmpeg"))).unwrap_err();
        assert!(matches!(err, PreflightError::FfmpegUnavailable(_)));
    }

    #[test]
    fn test_preflight_error_maps_to_unsupported() {
        let engine_err: EngineError = PreflightError::MissingEncoder("libx264".to_string()).into();
        assert!(matches!(engine_err, EngineError::Unsupported(_)));
        assert!(engine_err
            .to_string()
            .contains("unavailable in this environment"));
    }
}
