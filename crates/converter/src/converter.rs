//! Per-slot conversion engine
//!
//! Runs one job at a time through Preparing, LoadingEncoder, WritingImage,
//! WritingAudio, Encoding and Finalizing to Complete, publishing state on a
//! watch channel. The encoder session is bootstrapped lazily and kept for later
//! jobs in the same slot.
//!
//! Cancellation is cooperative: `reset` cancels the job's token, which is only
//! observed at phase boundaries. Every state update goes through the job guard,
//! so a cancelled job can never publish after the reset that cancelled it.

use crate::asset::{AudioAsset, ImageAsset};
use crate::command::{build_encode_args, input_file_name, EncodeSettings, OUTPUT_FILE_NAME};
use crate::download::{DownloadSink, VideoBlob};
use crate::engine::{EncoderBackend, EncoderSession, EngineError, PROGRESS_CHANNEL_CAPACITY};
use crate::error::{ConversionError, ConversionFailure};
use crate::job::{
    output_file_name, ConversionPhase, ConversionState, OutputDescriptor, ProgressMeter,
    ENCODE_PROGRESS_START,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Inputs of one conversion
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub image: ImageAsset,
    /// Audio clip; its probed duration is only used for the output description
    pub audio: AudioAsset,
    /// Slot number for the output name prefix, set in multi-slot layouts
    pub slot_number: Option<u32>,
}

/// How a job ended
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Completed(OutputDescriptor),
    Failed(ConversionFailure),
    /// Reset while running; no terminal state was published
    Cancelled,
}

/// Permission to run one job, handed out by [`SlotConverter::begin`].
#[derive(Debug)]
pub struct JobTicket {
    id: Uuid,
    cancel: CancellationToken,
}

impl JobTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug)]
struct ActiveJob {
    id: Uuid,
    cancel: CancellationToken,
}

/// Virtual files a job has staged, for cleanup.
#[derive(Default)]
struct Staged {
    session: Option<Arc<dyn EncoderSession>>,
    files: Vec<String>,
}

/// Conversion engine for one slot.
pub struct SlotConverter {
    slot: u32,
    backend: Arc<dyn EncoderBackend>,
    settings: EncodeSettings,
    sink: Arc<dyn DownloadSink>,
    session: tokio::sync::Mutex<Option<Arc<dyn EncoderSession>>>,
    state: watch::Sender<ConversionState>,
    active: Mutex<Option<ActiveJob>>,
    /// Held for a whole run; a new job waits here for a cancelled one to unwind
    run_lock: tokio::sync::Mutex<()>,
}

impl SlotConverter {
    pub fn new(
        slot: u32,
        backend: Arc<dyn EncoderBackend>,
        settings: EncodeSettings,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConversionState::idle());
        Self {
            slot,
            backend,
            settings,
            sink,
            session: tokio::sync::Mutex::new(None),
            state,
            active: Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConversionState {
        self.state.borrow().clone()
    }

    pub fn is_processing(&self) -> bool {
        self.state.borrow().is_processing()
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot for a new job.
    ///
    /// Checks that no job is processing and publishes `Preparing` in one step;
    /// returns None when the slot is busy.
    pub fn begin(&self) -> Option<JobTicket> {
        let mut active = self.active();
        if self.state.borrow().is_processing() {
            return None;
        }

        let ticket = JobTicket {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };
        *active = Some(ActiveJob {
            id: ticket.id,
            cancel: ticket.cancel.clone(),
        });

        let mut state = ConversionState::idle();
        state.enter(ConversionPhase::Preparing);
        self.state.send_replace(state);
        Some(ticket)
    }

    /// Cancel any running job and return to `Idle`.
    pub fn reset(&self) {
        let mut active = self.active();
        if let Some(job) = active.take() {
            job.cancel.cancel();
            tracing::info!(slot = self.slot, job_id = %job.id, "job cancelled");
        }
        self.state.send_replace(ConversionState::idle());
    }

    /// Apply `update` if `job_id` is still the live job.
    fn publish(&self, job_id: Uuid, update: impl FnOnce(&mut ConversionState)) -> bool {
        let active = self.active();
        match active.as_ref() {
            Some(job) if job.id == job_id && !job.cancel.is_cancelled() => {
                self.state.send_modify(update);
                true
            }
            _ => false,
        }
    }

    /// Publish a terminal state and retire the job.
    fn finish(&self, job_id: Uuid, update: impl FnOnce(&mut ConversionState)) -> bool {
        let mut active = self.active();
        match active.as_ref() {
            Some(job) if job.id == job_id && !job.cancel.is_cancelled() => {
                self.state.send_modify(update);
                *active = None;
                true
            }
            _ => false,
        }
    }

    /// Cross a phase boundary; false when the job was cancelled.
    fn advance(&self, ticket: &JobTicket, phase: ConversionPhase) -> bool {
        if ticket.is_cancelled() {
            return false;
        }
        let entered = self.publish(ticket.id, |state| state.enter(phase));
        if entered {
            tracing::debug!(phase = %phase, "phase");
        }
        entered
    }

    /// Begin and run a job in one call; None when the slot is busy.
    pub async fn convert(&self, request: ConversionRequest) -> Option<ConversionOutcome> {
        let ticket = self.begin()?;
        Some(self.run(ticket, request).await)
    }

    /// Run the job claimed by `ticket` to its end.
    pub async fn run(&self, ticket: JobTicket, request: ConversionRequest) -> ConversionOutcome {
        let span = tracing::info_span!("job", slot = self.slot, job_id = %ticket.id);
        async move {
            let _serial = self.run_lock.lock().await;

            let mut staged = Staged::default();
            let result = self.drive(&ticket, &request, &mut staged).await;
            self.cleanup(staged).await;

            match result {
                Ok(Some(output)) => {
                    let published = self.finish(ticket.id, |state| state.complete(output.clone()));
                    if published {
                        tracing::info!(
                            file = %output.file_name,
                            size = %output.formatted_size(),
                            duration = %output.formatted_duration(),
                            "conversion complete"
                        );
                        ConversionOutcome::Completed(output)
                    } else {
                        ConversionOutcome::Cancelled
                    }
                }
                Ok(None) => {
                    tracing::debug!("job stopped at phase boundary after cancel");
                    ConversionOutcome::Cancelled
                }
                Err(e) if ticket.is_cancelled() => {
                    tracing::debug!(error = %e, "cancelled job failed while unwinding");
                    ConversionOutcome::Cancelled
                }
                Err(e) => {
                    let failure = ConversionFailure::from_error(&e);
                    if self.finish(ticket.id, |state| state.fail(failure.clone())) {
                        tracing::error!(kind = %failure.kind, error = %e, "conversion failed");
                        ConversionOutcome::Failed(failure)
                    } else {
                        ConversionOutcome::Cancelled
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        ticket: &JobTicket,
        request: &ConversionRequest,
        staged: &mut Staged,
    ) -> Result<Option<OutputDescriptor>, ConversionError> {
        let image_file = input_file_name(&request.image.staging_extension());
        let audio_file = input_file_name(&request.audio.staging_extension());
        let output_name = output_file_name(
            request.slot_number,
            &request.image.file_name,
            &request.audio.file_name,
        );

        if !self.advance(ticket, ConversionPhase::LoadingEncoder) {
            return Ok(None);
        }
        let session = self.acquire_session().await?;
        staged.session = Some(session.clone());

        if !self.advance(ticket, ConversionPhase::WritingImage) {
            return Ok(None);
        }
        staged.files.push(image_file.clone());
        session.write_file(&image_file, &request.image.bytes).await?;

        if !self.advance(ticket, ConversionPhase::WritingAudio) {
            return Ok(None);
        }
        staged.files.push(audio_file.clone());
        session.write_file(&audio_file, &request.audio.bytes).await?;

        if !self.advance(ticket, ConversionPhase::Encoding) {
            return Ok(None);
        }
        let args = build_encode_args(&image_file, &audio_file, &self.settings);
        staged.files.push(OUTPUT_FILE_NAME.to_string());
        self.encode(ticket, session.as_ref(), &args).await?;

        if !self.advance(ticket, ConversionPhase::Finalizing) {
            return Ok(None);
        }
        let blob = VideoBlob::mp4(session.read_file(OUTPUT_FILE_NAME).await?);
        if blob.is_empty() {
            return Err(ConversionError::EmptyOutput);
        }
        let output = OutputDescriptor {
            file_name: output_name,
            file_size: blob.len() as u64,
            duration: request.audio.duration_secs,
        };

        if ticket.is_cancelled() {
            return Ok(None);
        }
        self.sink.deliver(&output.file_name, blob).await?;

        Ok(Some(output))
    }

    /// The slot's session, bootstrapping one when absent or unloaded.
    async fn acquire_session(&self) -> Result<Arc<dyn EncoderSession>, EngineError> {
        let mut cached = self.session.lock().await;
        if let Some(session) = cached.as_ref() {
            if session.is_loaded() {
                return Ok(session.clone());
            }
            tracing::debug!("encoder session unloaded, bootstrapping again");
        }

        *cached = None;
        let session = self.backend.bootstrap().await?;
        tracing::debug!("encoder bootstrapped");
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Run the encode command, folding its progress into the slot state.
    async fn encode(
        &self,
        ticket: &JobTicket,
        session: &dyn EncoderSession,
        args: &[String],
    ) -> Result<(), EngineError> {
        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let mut meter = ProgressMeter::starting_at(ENCODE_PROGRESS_START);

        let execution = session.execute(args, tx);
        tokio::pin!(execution);

        loop {
            tokio::select! {
                result = &mut execution => {
                    while let Ok(native) = rx.try_recv() {
                        self.report_progress(ticket, &mut meter, native);
                    }
                    return result;
                }
                Some(native) = rx.recv() => {
                    self.report_progress(ticket, &mut meter, native);
                }
            }
        }
    }

    fn report_progress(&self, ticket: &JobTicket, meter: &mut ProgressMeter, native: f64) {
        if let Some(progress) = meter.observe(native) {
            self.publish(ticket.id, |state| {
                state.progress = state.progress.max(progress);
            });
        }
    }

    /// Delete the job's virtual files; runs on every outcome.
    async fn cleanup(&self, staged: Staged) {
        let Some(session) = staged.session else {
            return;
        };
        for name in &staged.files {
            match session.delete_file(name).await {
                Ok(()) | Err(EngineError::NotFound(_)) => {}
                Err(e) => tracing::warn!(file = %name, error = %e, "failed to remove virtual file"),
            }
        }
    }
}
