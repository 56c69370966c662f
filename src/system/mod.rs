//! Detection session orchestration and thread management.
//!
//! `DetectionSession` owns the configuration and the paired depth frame and
//! runs detection cycles; `DetectorNode` wraps it in a worker thread fed by
//! bounded input queues.

pub mod config;
pub mod messages;
mod node;
mod session;
pub mod shared_state;
pub mod sinks;
pub mod throttle;

pub use config::{
    DetectorConfig, MemoryParameterStore, ParameterStore, StreamSettings, TagDescription,
    YamlParameterStore,
};
pub use messages::{ColorMessage, CycleOutcome, CycleSummary};
pub use node::{DetectorNode, NodeStats, RefreshHandle};
pub use session::{CycleError, CycleReport, CycleStatus, DetectionSession};
pub use shared_state::{SessionPhase, SessionStats};
pub use sinks::{
    CsvDetectionSink, DetectionSink, ImageSink, Sinks, Subscription, Topic, TransformSink,
};
