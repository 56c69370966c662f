//! Dataset input for offline replay.

pub mod recording;

pub use recording::{RecordedDecoder, Recording, ReplayEvent};
