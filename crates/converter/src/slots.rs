//! Slots and the slot orchestrator
//!
//! A slot pairs a selection (image, audio, duration label) with its own
//! conversion engine. The orchestrator owns a fixed set of slots numbered from 1
//! and starts them independently; "start all" never waits on any slot.

use crate::asset::{AudioAsset, ImageAsset};
use crate::command::EncodeSettings;
use crate::config::Config;
use crate::converter::{ConversionOutcome, ConversionRequest, SlotConverter};
use crate::download::DownloadSink;
use crate::engine::EncoderBackend;
use crate::job::{format_duration, ConversionState};
use crate::preprocess::{compress_or_original, PreprocessOptions};
use crate::probe::probe_duration_or_unknown;
use crate::status::{BoardSnapshot, SlotStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors from slot selection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    /// The selection cannot change while a job runs
    #[error("Slot {0} is processing")]
    Busy(u32),

    #[error("No slot numbered {0}")]
    UnknownSlot(u32),
}

/// Assets chosen for a slot
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub image: Option<ImageAsset>,
    pub audio: Option<AudioAsset>,
    /// `M:SS` for the audio, empty when unknown
    pub duration_label: String,
}

/// One independent conversion pipeline.
pub struct Slot {
    number: u32,
    /// Prefix output names with the slot number
    numbered_output: bool,
    preprocess: Option<PreprocessOptions>,
    converter: Arc<SlotConverter>,
    selection: Mutex<Selection>,
}

impl Slot {
    pub fn new(
        number: u32,
        numbered_output: bool,
        preprocess: Option<PreprocessOptions>,
        converter: SlotConverter,
    ) -> Self {
        Self {
            number,
            numbered_output,
            preprocess,
            converter: Arc::new(converter),
            selection: Mutex::new(Selection::default()),
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn state(&self) -> ConversionState {
        self.converter.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversionState> {
        self.converter.subscribe()
    }

    pub fn selection(&self) -> Selection {
        self.lock_selection().clone()
    }

    fn lock_selection(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Select an image, compressing it first when preprocessing is enabled.
    ///
    /// Compression failures fall back to the original asset.
    pub async fn select_image(&self, asset: ImageAsset) -> Result<ImageAsset, SlotError> {
        if self.converter.is_processing() {
            return Err(SlotError::Busy(self.number));
        }

        let prepared = match self.preprocess {
            Some(opts) => {
                let original = asset.clone();
                match tokio::task::spawn_blocking(move || compress_or_original(&asset, &opts)).await {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        tracing::warn!(slot = self.number, error = %e, "image preprocessing task failed, using original");
                        original
                    }
                }
            }
            None => asset,
        };

        let mut selection = self.lock_selection();
        if self.converter.is_processing() {
            return Err(SlotError::Busy(self.number));
        }
        selection.image = Some(prepared.clone());
        Ok(prepared)
    }

    /// Select an audio clip and probe its duration.
    pub async fn select_audio(&self, asset: AudioAsset) -> Result<AudioAsset, SlotError> {
        if self.converter.is_processing() {
            return Err(SlotError::Busy(self.number));
        }

        let probe_input = asset.clone();
        let duration = tokio::task::spawn_blocking(move || probe_duration_or_unknown(&probe_input))
            .await
            .unwrap_or(0.0);
        let asset = asset.with_duration(duration);
        let label = if duration > 0.0 {
            format_duration(duration)
        } else {
            String::new()
        };

        let mut selection = self.lock_selection();
        if self.converter.is_processing() {
            return Err(SlotError::Busy(self.number));
        }
        selection.audio = Some(asset.clone());
        selection.duration_label = label;
        Ok(asset)
    }

    pub fn clear_image(&self) -> Result<(), SlotError> {
        let mut selection = self.lock_selection();
        if self.converter.is_processing() {
            return Err(SlotError::Busy(self.number));
        }
        selection.image = None;
        Ok(())
    }

    pub fn clear_audio(&self) -> Result<(), SlotError> {
        let mut selection = self.lock_selection();
        if self.converter.is_processing() {
            return Err(SlotError::Busy(self.number));
        }
        selection.audio = None;
        selection.duration_label.clear();
        Ok(())
    }

    /// Both assets are chosen and no job is running.
    pub fn can_start(&self) -> bool {
        let selection = self.lock_selection();
        selection.image.is_some() && selection.audio.is_some() && !self.converter.is_processing()
    }

    /// Start a job on its own task; None when the slot is not eligible.
    pub fn start(&self) -> Option<JoinHandle<ConversionOutcome>> {
        let selection = self.lock_selection();
        let (image, audio) = match (&selection.image, &selection.audio) {
            (Some(image), Some(audio)) => (image.clone(), audio.clone()),
            _ => return None,
        };
        let ticket = self.converter.begin()?;
        drop(selection);

        let request = ConversionRequest {
            image,
            audio,
            slot_number: self.numbered_output.then_some(self.number),
        };
        let converter = self.converter.clone();
        tracing::debug!(slot = self.number, job_id = %ticket.id(), "job started");
        Some(tokio::spawn(async move { converter.run(ticket, request).await }))
    }

    /// Cancel any job, return to `Idle` and discard the selection.
    pub fn reset(&self) {
        let mut selection = self.lock_selection();
        self.converter.reset();
        *selection = Selection::default();
    }

    pub fn status(&self) -> SlotStatus {
        let selection = self.lock_selection();
        let state = self.converter.state();
        let mut status = SlotStatus::from_state(self.number, &state);
        status.image_name = selection.image.as_ref().map(|a| a.file_name.clone());
        status.audio_name = selection.audio.as_ref().map(|a| a.file_name.clone());
        status.duration_label = selection.duration_label.clone();
        status.can_start =
            selection.image.is_some() && selection.audio.is_some() && !state.is_processing();
        status
    }
}

/// Fixed set of independent slots, numbered from 1.
pub struct SlotOrchestrator {
    slots: Vec<Slot>,
}

impl SlotOrchestrator {
    pub fn new(
        count: u32,
        backend: Arc<dyn EncoderBackend>,
        settings: EncodeSettings,
        sink: Arc<dyn DownloadSink>,
        preprocess: Option<PreprocessOptions>,
    ) -> Self {
        let numbered_output = count > 1;
        let slots = (1..=count)
            .map(|number| {
                let converter =
                    SlotConverter::new(number, backend.clone(), settings.clone(), sink.clone());
                Slot::new(number, numbered_output, preprocess, converter)
            })
            .collect();
        Self { slots }
    }

    pub fn from_config(
        cfg: &Config,
        backend: Arc<dyn EncoderBackend>,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        let preprocess = cfg
            .preprocess
            .enabled
            .then(|| PreprocessOptions::from(&cfg.preprocess));
        Self::new(
            cfg.slots.count,
            backend,
            EncodeSettings::from(&cfg.encode),
            sink,
            preprocess,
        )
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, number: u32) -> Result<&Slot, SlotError> {
        number
            .checked_sub(1)
            .and_then(|i| self.slots.get(i as usize))
            .ok_or(SlotError::UnknownSlot(number))
    }

    pub fn can_start(&self, number: u32) -> bool {
        self.slot(number).map(Slot::can_start).unwrap_or(false)
    }

    pub fn start(&self, number: u32) -> Option<JoinHandle<ConversionOutcome>> {
        self.slot(number).ok()?.start()
    }

    /// Start every eligible slot without waiting for any of them.
    pub fn start_all(&self) -> Vec<(u32, JoinHandle<ConversionOutcome>)> {
        let started: Vec<_> = self
            .slots
            .iter()
            .filter_map(|slot| slot.start().map(|handle| (slot.number(), handle)))
            .collect();
        tracing::info!(started = started.len(), slots = self.slots.len(), "start all");
        started
    }

    pub fn reset(&self, number: u32) -> Result<(), SlotError> {
        self.slot(number)?.reset();
        Ok(())
    }

    pub fn reset_all(&self) {
        for slot in &self.slots {
            slot.reset();
        }
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot::from_slots(self.slots.iter().map(Slot::status).collect())
    }
}
