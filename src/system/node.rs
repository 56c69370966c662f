//! Detector node: input queues and the worker thread that drives a session.
//!
//! Color and depth frames arrive on bounded queues of `queue_size` entries
//! each. When a queue is full the oldest frame is dropped, so the worker always
//! sees the most recent input. The worker serializes everything through the
//! session; refresh requests are answered over a reply channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use tracing::{debug, info, warn};

use crate::frame::{CameraInfo, ImageMessage};

use super::messages::{ColorMessage, CycleOutcome, CycleSummary, RefreshRequest};
use super::session::DetectionSession;

/// Timeout for the worker's receive. Allows periodic shutdown checks.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// Capacity of the per-cycle summary channel. Summaries beyond it are dropped.
const SUMMARY_CHANNEL_CAPACITY: usize = 256;

/// Bounded queue that evicts its oldest entry instead of blocking.
struct InputQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> InputQueue<T> {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Returns the number of entries evicted to make room.
    fn push(&self, mut msg: T) -> u64 {
        let mut evicted = 0;
        loop {
            match self.tx.try_send(msg) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    msg = back;
                    if self.rx.try_recv().is_ok() {
                        evicted += 1;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }
}

/// Frame counters kept by the node.
#[derive(Debug, Default)]
pub struct NodeStats {
    pub color_received: AtomicU64,
    pub depth_received: AtomicU64,
    pub color_dropped: AtomicU64,
    pub depth_dropped: AtomicU64,
    pub cycles_run: AtomicU64,
}

/// Sends refresh requests to a running node and waits for the answer.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: Sender<RefreshRequest>,
}

impl RefreshHandle {
    /// Ask the worker to reload configuration; returns once it is swapped in.
    pub fn refresh(&self) -> Result<()> {
        let (reply, ack) = bounded(1);
        self.tx
            .send(RefreshRequest { reply })
            .map_err(|_| anyhow!("detector node is not running"))?;
        ack.recv()
            .context("detector node stopped before acknowledging refresh")?
            .map_err(|e| anyhow!(e))
    }
}

/// Owns the session and the worker thread feeding it.
pub struct DetectorNode {
    session: Arc<DetectionSession>,
    color: InputQueue<ColorMessage>,
    depth: InputQueue<ImageMessage>,
    refresh_tx: Sender<RefreshRequest>,
    summaries: Receiver<CycleSummary>,
    stats: Arc<NodeStats>,
    worker: Option<JoinHandle<()>>,
}

impl DetectorNode {
    /// Spawn the worker. Queue sizes come from the session's stream settings.
    pub fn spawn(session: DetectionSession) -> Result<Self> {
        let session = Arc::new(session);
        let queue_size = session.streams().queue_size;
        let color = InputQueue::new(queue_size);
        let depth = InputQueue::new(queue_size);
        let (refresh_tx, refresh_rx) = bounded(4);
        let (summary_tx, summaries) = bounded(SUMMARY_CHANNEL_CAPACITY);
        let stats = Arc::new(NodeStats::default());

        let worker = Worker {
            session: Arc::clone(&session),
            color_rx: color.rx.clone(),
            depth_rx: depth.rx.clone(),
            refresh_rx,
            summary_tx,
            stats: Arc::clone(&stats),
        };
        let handle = thread::Builder::new()
            .name("tag-detector".into())
            .spawn(move || worker.run())
            .context("Failed to spawn detector thread")?;

        info!(
            "Detector node started (queue_size = {}, color: {}, depth: {})",
            queue_size,
            session.streams().transport_hint,
            session.streams().depth_transport_hint
        );

        Ok(Self {
            session,
            color,
            depth,
            refresh_tx,
            summaries,
            stats,
            worker: Some(handle),
        })
    }

    pub fn push_color(&self, image: ImageMessage, camera_info: CameraInfo) {
        self.stats.color_received.fetch_add(1, Ordering::Relaxed);
        let dropped = self.color.push(ColorMessage { image, camera_info });
        if dropped > 0 {
            self.stats.color_dropped.fetch_add(dropped, Ordering::Relaxed);
            debug!("Color queue full, dropped {} frame(s)", dropped);
        }
    }

    pub fn push_depth(&self, image: ImageMessage) {
        self.stats.depth_received.fetch_add(1, Ordering::Relaxed);
        let dropped = self.depth.push(image);
        if dropped > 0 {
            self.stats.depth_dropped.fetch_add(dropped, Ordering::Relaxed);
            debug!("Depth queue full, dropped {} frame(s)", dropped);
        }
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle {
            tx: self.refresh_tx.clone(),
        }
    }

    /// One summary per processed color frame, in processing order.
    pub fn summaries(&self) -> &Receiver<CycleSummary> {
        &self.summaries
    }

    pub fn session(&self) -> &Arc<DetectionSession> {
        &self.session
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Stop the worker and wait for it. Queued frames are discarded.
    pub fn shutdown(&mut self) {
        self.session.shared().request_shutdown();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Detector thread panicked");
            }
        }
    }
}

impl Drop for DetectorNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    session: Arc<DetectionSession>,
    color_rx: Receiver<ColorMessage>,
    depth_rx: Receiver<ImageMessage>,
    refresh_rx: Receiver<RefreshRequest>,
    summary_tx: Sender<CycleSummary>,
    stats: Arc<NodeStats>,
}

impl Worker {
    fn run(self) {
        info!("Detector thread started");

        loop {
            if self.session.shared().is_shutdown_requested() {
                break;
            }

            select! {
                recv(self.refresh_rx) -> req => match req {
                    Ok(req) => self.refresh(req),
                    Err(_) => break,
                },
                recv(self.depth_rx) -> msg => match msg {
                    Ok(msg) => self.depth(&msg),
                    Err(_) => break,
                },
                recv(self.color_rx) -> msg => match msg {
                    Ok(msg) => self.color(msg),
                    Err(_) => break,
                },
                default(RECV_TIMEOUT) => continue,
            }
        }

        let stats = self.session.stats();
        info!(
            "Detector thread exiting. Stats: completed={}, skipped={}, aborted={}, published={}",
            stats.cycles_completed,
            stats.cycles_skipped,
            stats.cycles_aborted,
            stats.detections_published
        );
    }

    fn refresh(&self, req: RefreshRequest) {
        let result = self
            .session
            .refresh_configuration()
            .map_err(|e| format!("{e:#}"));
        let _ = req.reply.send(result);
    }

    fn depth(&self, msg: &ImageMessage) {
        // Failures are logged by the session.
        let _ = self.session.submit_depth_frame(msg);
    }

    fn color(&self, msg: ColorMessage) {
        // Depth that arrived before this frame must be in place for the cycle.
        for depth in self.depth_rx.try_iter() {
            self.depth(&depth);
        }

        let report = self
            .session
            .submit_color_frame(&msg.image, &msg.camera_info);
        self.stats.cycles_run.fetch_add(1, Ordering::Relaxed);

        let summary = CycleSummary {
            timestamp_ns: msg.image.timestamp_ns,
            outcome: CycleOutcome::from(&report.status),
            detections: report.detections.len(),
        };
        let _ = self.summary_tx.try_send(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::detection::{DecoderSettings, DetectionSet, RawDetection, TagDecoder};
    use crate::frame::ColorFrame;
    use crate::system::config::{DetectorConfig, MemoryParameterStore, TagDescription};
    use crate::system::sinks::{Sinks, Topic};
    use crate::test_utils::{
        depth_message, gray_message, project_tag, render_tag_depth, tag_pose, test_camera,
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn decoder() -> Arc<dyn TagDecoder> {
        let corners = project_tag(&tag_pose(0.0, 0.0, 1.2, 0.2, 0.1), 0.16, &test_camera());
        Arc::new(move |_: &ColorFrame, _: &DecoderSettings| {
            vec![RawDetection::new(1, corners, 40.0)]
        })
    }

    fn node(
        config: DetectorConfig,
    ) -> (DetectorNode, Arc<MemoryParameterStore>, Arc<Topic<DetectionSet>>) {
        let store = Arc::new(MemoryParameterStore::new(config));
        let topic: Arc<Topic<DetectionSet>> = Arc::new(Topic::new(16));
        let sinks = Sinks::default().with_detections(topic.clone());
        let session = DetectionSession::new(decoder(), store.clone(), sinks).unwrap();
        (DetectorNode::spawn(session).unwrap(), store, topic)
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            standalone_tags: vec![TagDescription::new(1, 0.16)],
            ..DetectorConfig::default()
        }
    }

    fn depth(ts: u64) -> ImageMessage {
        let pose = tag_pose(0.0, 0.0, 1.2, 0.2, 0.1);
        depth_message(&render_tag_depth(ts, &pose, 0.16, &test_camera(), 2.0))
    }

    fn info() -> CameraInfo {
        CameraInfo::pinhole(640, 480, 600.0, 600.0, 320.0, 240.0)
    }

    #[test]
    fn test_depth_then_color_produces_detection() {
        let (node, _, topic) = node(config());
        let rx = topic.subscribe();

        node.push_depth(depth(0));
        node.push_color(gray_message(1, &test_camera()), info());

        let summary = node.summaries().recv_timeout(WAIT).unwrap();
        assert_eq!(summary.outcome, CycleOutcome::Completed);
        assert_eq!(summary.detections, 1);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().detections[0].id, 1);
    }

    #[test]
    fn test_refresh_handle_acknowledges() {
        let (node, store, topic) = node(config());
        let _rx = topic.subscribe();
        let handle = node.refresh_handle();

        store.update(|c| c.depth_max_range = 0.5);
        handle.refresh().unwrap();
        assert_eq!(node.session().config().depth_max_range, 0.5);

        node.push_depth(depth(0));
        node.push_color(gray_message(1, &test_camera()), info());
        let summary = node.summaries().recv_timeout(WAIT).unwrap();
        assert_eq!(summary.detections, 0);

        store.update(|c| c.depth_min_range = 3.0);
        assert!(handle.refresh().is_err());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = InputQueue::new(2);
        assert_eq!(queue.push(1), 0);
        assert_eq!(queue.push(2), 0);
        assert_eq!(queue.push(3), 1);

        let left: Vec<i32> = queue.rx.try_iter().collect();
        assert_eq!(left, vec![2, 3]);
    }

    #[test]
    fn test_refresh_after_shutdown_fails() {
        let (mut node, _, _) = node(config());
        let handle = node.refresh_handle();
        node.shutdown();

        assert!(handle.refresh().is_err());
    }
}
