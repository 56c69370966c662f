//! State shared between the detection cycle, depth updates and refreshes.
//!
//! Everything a cycle reads lives in [`SessionState`] behind a single mutex;
//! a cycle holds it from gate check to publication. Phase, shutdown and
//! counters are atomics so they can be observed without waiting on a cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::frame::DepthFrame;

use super::config::DetectorConfig;
use super::throttle::Throttle;

/// Interval between repeated "no depth" / "stale depth" warnings.
pub const WARN_THROTTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Active,
    /// A configuration swap is in progress; cycles wait for it.
    Refreshing,
}

impl SessionPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Refreshing,
            _ => Self::Active,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Refreshing => 1,
        }
    }
}

/// Mutable session data guarded by [`SharedState::state`].
pub struct SessionState {
    /// Most recent depth frame, replaced wholesale.
    pub depth: Option<Arc<DepthFrame>>,
    /// Active configuration snapshot.
    pub config: Arc<DetectorConfig>,
    pub depth_seen: bool,
    pub no_depth_warning: Throttle,
    pub stale_depth_warning: Throttle,
}

impl SessionState {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            depth: None,
            config: Arc::new(config),
            depth_seen: false,
            no_depth_warning: Throttle::new(WARN_THROTTLE),
            stale_depth_warning: Throttle::new(WARN_THROTTLE),
        }
    }
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_aborted: u64,
    pub detections_published: u64,
    pub depth_frames: u64,
}

pub struct SharedState {
    pub state: Mutex<SessionState>,
    phase: AtomicU8,
    shutdown_requested: AtomicBool,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    cycles_aborted: AtomicU64,
    detections_published: AtomicU64,
    depth_frames: AtomicU64,
}

impl SharedState {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            state: Mutex::new(SessionState::new(config)),
            phase: AtomicU8::new(SessionPhase::Active.as_u8()),
            shutdown_requested: AtomicBool::new(false),
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            cycles_aborted: AtomicU64::new(0),
            detections_published: AtomicU64::new(0),
            depth_frames: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn record_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.cycles_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, published: usize) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.detections_published
            .fetch_add(published as u64, Ordering::Relaxed);
    }

    pub fn record_depth_frame(&self) {
        self.depth_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            cycles_aborted: self.cycles_aborted.load(Ordering::Relaxed),
            detections_published: self.detections_published.load(Ordering::Relaxed),
            depth_frames: self.depth_frames.load(Ordering::Relaxed),
        }
    }
}
