//! Download delivery for finished videos.
//!
//! A finished job hands its bytes to a [`DownloadSink`]. The native sink writes
//! the file into a download directory: bytes go to a `.partial` sibling first and
//! are renamed into place, so a reader never sees a half-written video.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// MIME type of every delivered video.
pub const VIDEO_MIME_TYPE: &str = "video/mp4";

/// Errors that can occur while delivering a video.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The file name would escape the download directory.
    #[error("Invalid download file name: {0:?}")]
    InvalidFileName(String),

    /// Failed to create the download directory.
    #[error("Failed to create download directory {0}: {1}")]
    CreateDir(PathBuf, #[source] std::io::Error),

    /// Failed to write the video bytes.
    #[error("Failed to write {0}: {1}")]
    Write(PathBuf, #[source] std::io::Error),
}

/// Encoded video bytes plus their MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoBlob {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

impl VideoBlob {
    pub fn mp4(data: Vec<u8>) -> Self {
        Self {
            mime_type: VIDEO_MIME_TYPE,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Destination for finished videos.
///
/// Deliveries from different slots are independent and may arrive in any order.
#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn deliver(&self, file_name: &str, blob: VideoBlob) -> Result<(), DownloadError>;
}

/// Writes videos into a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path for `file_name` inside the download directory.
    pub fn target_path(&self, file_name: &str) -> Result<PathBuf, DownloadError> {
        if file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name == "."
            || file_name == ".."
        {
            return Err(DownloadError::InvalidFileName(file_name.to_string()));
        }
        Ok(self.dir.join(file_name))
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut partial = target.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn deliver(&self, file_name: &str, blob: VideoBlob) -> Result<(), DownloadError> {
        let target = self.target_path(file_name)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DownloadError::CreateDir(self.dir.clone(), e))?;

        let partial = partial_path(&target);
        if let Err(e) = tokio::fs::write(&partial, &blob.data).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DownloadError::Write(partial, e));
        }

        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DownloadError::Write(target, e));
        }

        tracing::info!(
            path = %target.display(),
            bytes = blob.len(),
            mime = blob.mime_type,
            "video delivered"
        );
        Ok(())
    }
}
