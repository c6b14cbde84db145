//! Status board for the shell
//!
//! A serializable snapshot of every slot plus aggregate counts, taken on demand
//! from the orchestrator.

use crate::error::ErrorKind;
use crate::job::{ConversionPhase, ConversionState};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Finished-video description as displayed
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutputStatus {
    pub file_name: String,
    pub file_size: String,
    pub duration: String,
}

/// Everything the shell renders for one slot
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlotStatus {
    pub slot: u32,
    pub phase: ConversionPhase,
    pub progress: f32,
    pub status: String,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub output: Option<OutputStatus>,
    pub image_name: Option<String>,
    pub audio_name: Option<String>,
    /// `M:SS`, or empty when the duration is unknown
    pub duration_label: String,
    pub can_start: bool,
}

impl SlotStatus {
    /// Status of `slot` from its conversion state; selection fields start empty.
    pub fn from_state(slot: u32, state: &ConversionState) -> Self {
        Self {
            slot,
            phase: state.phase,
            progress: state.progress,
            status: state.status.clone(),
            error_kind: state.failure.as_ref().map(|f| f.kind),
            error_message: state.failure.as_ref().map(|f| f.message.clone()),
            output: state.output.as_ref().map(|o| OutputStatus {
                file_name: o.file_name.clone(),
                file_size: o.formatted_size(),
                duration: o.formatted_duration(),
            }),
            image_name: None,
            audio_name: None,
            duration_label: String::new(),
            can_start: false,
        }
    }
}

/// Snapshot of all slots
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BoardSnapshot {
    pub timestamp_unix_ms: i64,
    pub slots: Vec<SlotStatus>,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BoardSnapshot {
    pub fn from_slots(slots: Vec<SlotStatus>) -> Self {
        let count = |pred: fn(&ConversionPhase) -> bool| slots.iter().filter(|s| pred(&s.phase)).count();
        let processing = count(ConversionPhase::is_processing);
        let completed = count(|p| *p == ConversionPhase::Complete);
        let failed = count(|p| *p == ConversionPhase::Error);

        Self {
            timestamp_unix_ms: now_unix_ms(),
            slots,
            processing,
            completed,
            failed,
        }
    }

    /// No slot is running a job.
    pub fn is_settled(&self) -> bool {
        self.processing == 0
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConversionError, ConversionFailure};
    use crate::job::OutputDescriptor;

    fn status(slot: u32, phase: ConversionPhase) -> SlotStatus {
        let mut state = ConversionState::idle();
        state.enter(phase);
        SlotStatus::from_state(slot, &state)
    }

    #[test]
    fn test_aggregate_counts() {
        let snapshot = BoardSnapshot::from_slots(vec![
            status(1, ConversionPhase::Encoding),
            status(2, ConversionPhase::Complete),
            status(3, ConversionPhase::Idle),
            status(4, ConversionPhase::WritingImage),
        ]);

        assert_eq!(snapshot.processing, 2);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 0);
        assert!(!snapshot.is_settled());
        assert!(snapshot.timestamp_unix_ms > 0);
    }

    #[test]
    fn test_status_carries_failure_and_output() {
        let mut failed = ConversionState::idle();
        failed.fail(ConversionFailure::from_error(&ConversionError::EmptyOutput));
        let s = SlotStatus::from_state(1, &failed);
        assert_eq!(s.error_kind, Some(ErrorKind::Unknown));
        assert_eq!(s.error_message.as_deref(), Some(ErrorKind::Unknown.user_message()));

        let mut done = ConversionState::idle();
        done.complete(OutputDescriptor {
            file_name: "slot2_photo_track.mp4".to_string(),
            file_size: 3 * 1024 * 1024,
            duration: 125.4,
        });
        let s = SlotStatus::from_state(2, &done);
        assert_eq!(
            s.output,
            Some(OutputStatus {
                file_name: "slot2_photo_track.mp4".to_string(),
                file_size: "3.00 MB".to_string(),
                duration: "2:05".to_string(),
            })
        );
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = BoardSnapshot::from_slots(vec![status(1, ConversionPhase::Encoding)]);
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["processing"], 1);
        assert_eq!(json["slots"][0]["phase"], "encoding");
        assert_eq!(json["slots"][0]["status"], "Rendering video...");
        assert_eq!(json["slots"][0]["progress"], 20.0);
        assert!(json["slots"][0]["error_kind"].is_null());
    }
}
