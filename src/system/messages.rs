//! Messages exchanged with the detector worker thread.

use crossbeam_channel::Sender;

use crate::frame::{CameraInfo, ImageMessage};

use super::session::CycleStatus;

/// Color image with the calibration it was captured under.
#[derive(Debug, Clone)]
pub struct ColorMessage {
    pub image: ImageMessage,
    pub camera_info: CameraInfo,
}

/// Request to re-read configuration. The worker replies once the swap is
/// done (or has failed) with the error rendered as text.
pub struct RefreshRequest {
    pub reply: Sender<Result<(), String>>,
}

/// Outcome of one color frame, emitted by the worker after each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub timestamp_ns: u64,
    pub outcome: CycleOutcome,
    pub detections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped,
    Completed,
    Aborted,
}

impl From<&CycleStatus> for CycleOutcome {
    fn from(status: &CycleStatus) -> Self {
        match status {
            CycleStatus::Skipped => Self::Skipped,
            CycleStatus::Completed { .. } => Self::Completed,
            CycleStatus::Aborted(_) => Self::Aborted,
        }
    }
}
