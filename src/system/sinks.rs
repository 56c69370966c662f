//! Output side of the detector: detection sets, annotated images, transforms.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use image::RgbImage;
use parking_lot::Mutex;
use tracing::error;

use crate::detection::{DetectionSet, TagTransform};

pub trait DetectionSink: Send + Sync {
    /// Whether anyone consumes published sets. Polled before every cycle.
    fn has_subscribers(&self) -> bool;
    fn publish(&self, set: &DetectionSet);
}

pub trait ImageSink: Send + Sync {
    fn has_subscribers(&self) -> bool;
    fn publish(&self, timestamp_ns: u64, image: &RgbImage);
}

pub trait TransformSink: Send + Sync {
    fn broadcast(&self, transform: &TagTransform);
}

/// Fan-out to in-process subscribers, one bounded channel each.
///
/// A full subscriber queue drops the new message for that subscriber only.
/// A subscriber stops counting as soon as its [`Subscription`] is dropped.
pub struct Topic<T> {
    capacity: usize,
    subscribers: Mutex<Vec<(Sender<T>, Weak<()>)>>,
}

/// Receiving end of a [`Topic`].
pub struct Subscription<T> {
    rx: Receiver<T>,
    _alive: Arc<()>,
}

impl<T> Deref for Subscription<T> {
    type Target = Receiver<T>;

    fn deref(&self) -> &Receiver<T> {
        &self.rx
    }
}

impl<T: Clone + Send> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = bounded(self.capacity);
        let alive = Arc::new(());
        self.subscribers.lock().push((tx, Arc::downgrade(&alive)));
        Subscription { rx, _alive: alive }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subscribers.lock();
        subs.retain(|(_, alive)| alive.strong_count() > 0);
        subs.len()
    }

    pub fn send(&self, msg: &T) {
        self.subscribers.lock().retain(|(tx, alive)| {
            alive.strong_count() > 0
                && match tx.try_send(msg.clone()) {
                    Ok(()) | Err(TrySendError::Full(_)) => true,
                    Err(TrySendError::Disconnected(_)) => false,
                }
        });
    }
}

impl DetectionSink for Topic<DetectionSet> {
    fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    fn publish(&self, set: &DetectionSet) {
        self.send(set);
    }
}

impl ImageSink for Topic<(u64, RgbImage)> {
    fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    fn publish(&self, timestamp_ns: u64, image: &RgbImage) {
        self.send(&(timestamp_ns, image.clone()));
    }
}

impl TransformSink for Topic<TagTransform> {
    fn broadcast(&self, transform: &TagTransform) {
        self.send(transform);
    }
}

/// Writes every detection as one CSV row. Always counts as subscribed.
pub struct CsvDetectionSink {
    writer: Mutex<csv::Writer<File>>,
    rows: Mutex<usize>,
}

impl CsvDetectionSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(writer),
            rows: Mutex::new(0),
        })
    }

    pub fn rows_written(&self) -> usize {
        *self.rows.lock()
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush().context("Failed to flush detection CSV")
    }
}

impl DetectionSink for CsvDetectionSink {
    fn has_subscribers(&self) -> bool {
        true
    }

    fn publish(&self, set: &DetectionSet) {
        let mut writer = self.writer.lock();
        for record in set.records() {
            if let Err(e) = writer.serialize(&record) {
                error!("Failed to write detection row: {}", e);
                return;
            }
            *self.rows.lock() += 1;
        }
    }
}

/// The sinks a session publishes to. Absent sinks have no subscribers.
#[derive(Clone, Default)]
pub struct Sinks {
    pub detections: Option<Arc<dyn DetectionSink>>,
    pub image: Option<Arc<dyn ImageSink>>,
    pub transforms: Option<Arc<dyn TransformSink>>,
}

impl Sinks {
    pub fn with_detections(mut self, sink: Arc<dyn DetectionSink>) -> Self {
        self.detections = Some(sink);
        self
    }

    pub fn with_image(mut self, sink: Arc<dyn ImageSink>) -> Self {
        self.image = Some(sink);
        self
    }

    pub fn with_transforms(mut self, sink: Arc<dyn TransformSink>) -> Self {
        self.transforms = Some(sink);
        self
    }

    pub(crate) fn detections_subscribed(&self) -> bool {
        self.detections.as_ref().is_some_and(|s| s.has_subscribers())
    }

    pub(crate) fn image_subscribed(&self) -> bool {
        self.image.as_ref().is_some_and(|s| s.has_subscribers())
    }
}
