//! ffmpeg-backed encoder engine
//!
//! A session is an ffmpeg binary that passed preflight plus a private scratch
//! directory acting as its virtual filesystem. Commands run with that directory
//! as working directory, so virtual file names are plain relative names.

use super::{
    report_progress, validate_virtual_name, EncoderBackend, EncoderSession, EngineError,
    ProgressSender,
};
use crate::config::{EncodeConfig, EngineConfig};
use crate::preflight::{run_preflight, PreflightSettings};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Arguments placed before every command: overwrite, machine-readable progress on stdout.
const PLUMBING_ARGS: &[&str] = &["-hide_banner", "-y", "-nostats", "-progress", "pipe:1"];

/// Stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 8;

/// Loads ffmpeg sessions after checking the environment.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    preflight: PreflightSettings,
    work_dir: Option<PathBuf>,
}

impl FfmpegBackend {
    pub fn new(engine: &EngineConfig, encode: &EncodeConfig) -> Self {
        Self {
            preflight: PreflightSettings {
                ffmpeg_path: engine.ffmpeg_path.clone(),
                min_major: engine.min_ffmpeg_major,
                required_encoders: vec![encode.video_codec.clone(), encode.audio_codec.clone()],
            },
            work_dir: engine.work_dir.clone(),
        }
    }

    fn scratch_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stillframe-");
        match &self.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }
}

#[async_trait]
impl EncoderBackend for FfmpegBackend {
    async fn bootstrap(&self) -> Result<Arc<dyn EncoderSession>, EngineError> {
        let binary = run_preflight(&self.preflight).await?;
        let dir = self
            .scratch_dir()
            .map_err(|e| EngineError::Bootstrap(format!("cannot create scratch directory: {}", e)))?;

        tracing::debug!(dir = %dir.path().display(), "ffmpeg session ready");
        Ok(Arc::new(FfmpegSession { binary, dir }))
    }
}

/// One loaded ffmpeg instance and its scratch directory.
///
/// The directory is removed when the session is dropped.
#[derive(Debug)]
pub struct FfmpegSession {
    binary: PathBuf,
    dir: TempDir,
}

impl FfmpegSession {
    fn path_of(&self, name: &str) -> Result<PathBuf, EngineError> {
        validate_virtual_name(name)?;
        Ok(self.dir.path().join(name))
    }
}

fn not_found_as(name: &str, e: std::io::Error) -> EngineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        EngineError::NotFound(name.to_string())
    } else {
        EngineError::Io(e)
    }
}

#[async_trait]
impl EncoderSession for FfmpegSession {
    fn is_loaded(&self) -> bool {
        self.dir.path().is_dir()
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), EngineError> {
        let path = self.path_of(name)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn execute(&self, args: &[String], progress: ProgressSender) -> Result<(), EngineError> {
        let mut child = Command::new(&self.binary)
            .current_dir(self.dir.path())
            .args(PLUMBING_ARGS)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Exec("ffmpeg stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Exec("ffmpeg stderr not captured".to_string()))?;

        // Split on raw bytes: tag values in the log are not always UTF-8
        let mut progress_lines = BufReader::new(stdout).split(b'\n');
        let mut log_lines = BufReader::new(stderr).split(b'\n');
        let mut tracker = ProgressTracker::default();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let (mut progress_open, mut log_open) = (true, true);

        while progress_open || log_open {
            tokio::select! {
                segment = progress_lines.next_segment(), if progress_open => {
                    match read_line(segment, "stdout") {
                        Some(line) => {
                            if let Some(fraction) = tracker.observe_progress_line(&line) {
                                report_progress(&progress, fraction);
                            }
                        }
                        None => progress_open = false,
                    }
                }
                segment = log_lines.next_segment(), if log_open => {
                    match read_line(segment, "stderr") {
                        Some(line) => {
                            tracker.observe_log_line(&line);
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                        None => log_open = false,
                    }
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let tail: Vec<String> = tail.into_iter().collect();
            return Err(EngineError::Exec(format!(
                "ffmpeg exited with {}: {}",
                status,
                tail.join(" | ")
            )));
        }

        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.path_of(name)?;
        tokio::fs::read(&path).await.map_err(|e| not_found_as(name, e))
    }

    async fn delete_file(&self, name: &str) -> Result<(), EngineError> {
        let path = self.path_of(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| not_found_as(name, e))
    }
}

/// Decode one raw output line; `None` once the stream is finished.
fn read_line(segment: std::io::Result<Option<Vec<u8>>>, stream: &str) -> Option<String> {
    match segment {
        Ok(Some(bytes)) => {
            let line = String::from_utf8_lossy(&bytes);
            Some(line.trim_end_matches('\r').to_string())
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(stream, error = %e, "ffmpeg output stream failed");
            None
        }
    }
}

/// Turns ffmpeg output into a completion fraction.
///
/// The total comes from the longest `Duration:` line in the log; progress blocks
/// on stdout report the output position in microseconds.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    total_secs: Option<f64>,
}

impl ProgressTracker {
    pub fn total_secs(&self) -> Option<f64> {
        self.total_secs
    }

    /// Learn input durations from a log (stderr) line.
    pub fn observe_log_line(&mut self, line: &str) {
        let Some(rest) = line.trim_start().strip_prefix("Duration:") else {
            return;
        };
        let value = rest.split(',').next().unwrap_or_default().trim();
        if let Some(secs) = parse_timestamp(value) {
            if secs > 0.0 && self.total_secs.map_or(true, |t| secs > t) {
                self.total_secs = Some(secs);
            }
        }
    }

    /// Fraction complete from a progress (stdout) line, if it carries one.
    pub fn observe_progress_line(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if line == "progress=end" {
            return Some(1.0);
        }

        // Older builds label the microsecond field out_time_ms
        let micros = line
            .strip_prefix("out_time_us=")
            .or_else(|| line.strip_prefix("out_time_ms="))?;
        let micros: i64 = micros.trim().parse().ok()?;
        let total = self.total_secs?;

        Some((micros.max(0) as f64 / 1_000_000.0 / total).clamp(0.0, 1.0))
    }
}

/// Parse an ffmpeg timestamp like "00:02:05.40" into seconds.
fn parse_timestamp(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let mins: f64 = parts[1].parse().ok()?;
    let secs: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + mins * 60.0 + secs)
}
