//! Application wiring
//!
//! Builds the encoder backend, the download sink and the slot orchestrator from
//! a [`Config`], loads input files from disk into slots, and runs every eligible
//! slot to completion.

use crate::asset::{AudioAsset, ImageAsset};
use crate::config::{Config, ConfigError};
use crate::converter::ConversionOutcome;
use crate::download::{DirectorySink, DownloadSink};
use crate::engine::{EncoderBackend, FfmpegBackend};
use crate::slots::{SlotError, SlotOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error type for application setup
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// More input pairs than slots
    #[error("{given} image/audio pairs given but only {slots} slots are configured")]
    TooManyPairs { given: usize, slots: usize },

    /// An input file could not be read
    #[error("Failed to read {0}: {1}")]
    ReadInput(PathBuf, #[source] std::io::Error),

    /// Slot selection failed
    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),
}

/// An image and an audio file destined for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPair {
    pub image: PathBuf,
    pub audio: PathBuf,
}

/// Runtime components built from configuration
pub struct App {
    pub config: Config,
    pub orchestrator: SlotOrchestrator,
}

impl App {
    /// Load configuration from `path`, or use defaults when no path is given.
    ///
    /// `download_dir` overrides `output.download_dir`.
    pub fn load(path: Option<&Path>, download_dir: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(dir) = download_dir {
            config.output.download_dir = dir.to_path_buf();
        }
        Ok(Self::with_config(config))
    }

    /// Wire the ffmpeg backend and a directory sink from `config`.
    pub fn with_config(config: Config) -> Self {
        let backend = Arc::new(FfmpegBackend::new(&config.engine, &config.encode));
        let sink = Arc::new(DirectorySink::new(config.output.download_dir.clone()));
        Self::with_parts(config, backend, sink)
    }

    pub fn with_parts(
        config: Config,
        backend: Arc<dyn EncoderBackend>,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        let orchestrator = SlotOrchestrator::from_config(&config, backend, sink);
        tracing::debug!(slots = orchestrator.len(), "slots ready");
        Self {
            config,
            orchestrator,
        }
    }

    /// Read each pair from disk and select it into the next slot, starting at 1.
    pub async fn load_pairs(&self, pairs: &[InputPair]) -> Result<(), AppError> {
        if pairs.len() > self.orchestrator.len() {
            return Err(AppError::TooManyPairs {
                given: pairs.len(),
                slots: self.orchestrator.len(),
            });
        }

        for (slot, pair) in self.orchestrator.slots().iter().zip(pairs) {
            let image = read_input(&pair.image).await?;
            let audio = read_input(&pair.audio).await?;

            let image = slot
                .select_image(ImageAsset::new(file_name_of(&pair.image), image))
                .await?;
            let audio = slot
                .select_audio(AudioAsset::new(file_name_of(&pair.audio), audio))
                .await?;

            tracing::info!(
                slot = slot.number(),
                image = %image.file_name,
                audio = %audio.file_name,
                duration = audio.duration_secs,
                "inputs selected"
            );
        }
        Ok(())
    }

    /// Start every eligible slot and wait for all of them.
    pub async fn run_all(&self) -> Vec<(u32, ConversionOutcome)> {
        let mut outcomes = Vec::new();
        for (slot, handle) in self.orchestrator.start_all() {
            match handle.await {
                Ok(outcome) => outcomes.push((slot, outcome)),
                Err(e) => tracing::error!(slot, error = %e, "job task ended abnormally"),
            }
        }
        outcomes
    }
}

async fn read_input(path: &Path) -> Result<Vec<u8>, AppError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| AppError::ReadInput(path.to_path_buf(), e))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
