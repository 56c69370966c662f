//! One detection session: paired depth state, configuration, cycle logic.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::detection::annotate::Annotator;
use crate::detection::{
    DetectionResult, DetectionSet, RawDetection, TagDecoder, TagTransform, resolve,
};
use crate::frame::{CameraInfo, CameraModel, ColorFrame, DepthFrame, FrameDecodeError, ImageMessage};
use crate::geometry::estimate_tag_pose;

use super::config::{DetectorConfig, ParameterStore, StreamSettings, load_config};
use super::shared_state::{SessionPhase, SessionStats, SharedState};
use super::sinks::Sinks;

/// Reasons a cycle produced an empty set without running detection.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("frame conversion failed: {0}")]
    FrameDecode(#[from] FrameDecodeError),

    #[error("no depth image received yet")]
    NoDepthAvailable,

    #[error("depth image is {age_ms} ms older than the color image (limit {max_age_ms} ms)")]
    StaleDepth { age_ms: u64, max_age_ms: u64 },
}

#[derive(Debug)]
pub enum CycleStatus {
    /// Nobody consumes the output; nothing was decoded or published.
    Skipped,
    /// Detection ran; `rejected` tags were dropped by pose or depth checks.
    Completed { rejected: usize },
    Aborted(CycleError),
}

#[derive(Debug)]
pub struct CycleReport {
    pub detections: DetectionSet,
    pub status: CycleStatus,
}

impl CycleReport {
    fn empty(msg: &ImageMessage, status: CycleStatus) -> Self {
        Self {
            detections: DetectionSet::empty(msg.timestamp_ns, msg.frame_id.clone()),
            status,
        }
    }
}

/// Serializes depth updates, detection cycles and configuration refreshes.
pub struct DetectionSession {
    decoder: Arc<dyn TagDecoder>,
    store: Arc<dyn ParameterStore>,
    sinks: Sinks,
    /// Stream options are fixed once inputs are wired up.
    streams: StreamSettings,
    annotator: Annotator,
    shared: SharedState,
}

impl DetectionSession {
    /// Load the initial configuration and build the session.
    pub fn new(
        decoder: Arc<dyn TagDecoder>,
        store: Arc<dyn ParameterStore>,
        sinks: Sinks,
    ) -> Result<Self> {
        let config = load_config(store.as_ref())?;
        let annotator = Annotator::new()?;
        info!(
            "Detection session configured with {} tags, depth range [{}, {}] m",
            config.standalone_tags.len(),
            config.depth_min_range,
            config.depth_max_range
        );
        Ok(Self {
            decoder,
            store,
            sinks,
            streams: config.streams.clone(),
            annotator,
            shared: SharedState::new(config),
        })
    }

    pub fn streams(&self) -> &StreamSettings {
        &self.streams
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// Current configuration snapshot. Waits for an in-flight cycle.
    pub fn config(&self) -> Arc<DetectorConfig> {
        Arc::clone(&self.shared.state.lock().config)
    }

    pub fn has_depth(&self) -> bool {
        self.shared.state.lock().depth.is_some()
    }

    pub(crate) fn shared(&self) -> &SharedState {
        &self.shared
    }

    /// Replace the current depth frame. Never triggers detection.
    ///
    /// A message that fails to convert leaves the previous frame in place.
    pub fn submit_depth_frame(&self, msg: &ImageMessage) -> Result<(), FrameDecodeError> {
        let frame = DepthFrame::from_message(msg, self.streams.depth_transport_hint)
            .inspect_err(|e| error!("Failed to convert depth image: {}", e))?;

        let mut state = self.shared.state.lock();
        state.depth = Some(Arc::new(frame));
        if !state.depth_seen {
            state.depth_seen = true;
            info!("Depth image for tags received");
        }
        self.shared.record_depth_frame();
        Ok(())
    }

    /// Run one detection cycle on a color frame.
    pub fn submit_color_frame(&self, msg: &ImageMessage, camera_info: &CameraInfo) -> CycleReport {
        let mut state = self.shared.state.lock();
        let config = Arc::clone(&state.config);

        if !self.gate_open(&config) {
            self.shared.record_skipped();
            return CycleReport::empty(msg, CycleStatus::Skipped);
        }

        let converted = ColorFrame::from_message(msg, self.streams.transport_hint).and_then(
            |color| CameraModel::from_camera_info(camera_info).map(|camera| (color, camera)),
        );
        let (color, camera) = match converted {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to convert color image: {}", e);
                self.shared.record_aborted();
                return CycleReport::empty(msg, CycleStatus::Aborted(e.into()));
            }
        };

        let Some(depth) = state.depth.clone() else {
            if state.no_depth_warning.ready() {
                warn!("No depth image received yet; skipping tag detection");
            }
            self.shared.record_aborted();
            return CycleReport::empty(msg, CycleStatus::Aborted(CycleError::NoDepthAvailable));
        };

        if let Some(max_age_ms) = config.max_depth_age_ms {
            let age_ms = color.timestamp_ns.saturating_sub(depth.timestamp_ns) / 1_000_000;
            if age_ms > max_age_ms {
                if state.stale_depth_warning.ready() {
                    warn!(
                        "Depth image is {} ms older than color image (limit {} ms)",
                        age_ms, max_age_ms
                    );
                }
                self.shared.record_aborted();
                let err = CycleError::StaleDepth { age_ms, max_age_ms };
                return CycleReport::empty(msg, CycleStatus::Aborted(err));
            }
        }

        let raw = self.decoder.decode(&color, &config.decoder);
        let (set, accepted, rejected) = detect(&raw, &color, &camera, &depth, &config);
        self.publish(&set, &accepted, color, &config);
        self.shared.record_completed(set.len());

        // Held until here: publication is part of the cycle.
        drop(state);

        CycleReport {
            detections: set,
            status: CycleStatus::Completed { rejected },
        }
    }

    /// Re-read the configuration and swap it in.
    ///
    /// Blocks until any in-flight cycle finishes. On failure the previous
    /// configuration stays active and the error is returned.
    pub fn refresh_configuration(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.shared.set_phase(SessionPhase::Refreshing);

        let loaded = load_config(self.store.as_ref());
        let result = match loaded {
            Ok(config) => {
                if config.streams != self.streams {
                    warn!("Stream settings changed; they take effect on restart only");
                }
                state.config = Arc::new(config);
                info!("Detector configuration refreshed");
                Ok(())
            }
            Err(e) => {
                error!("Configuration refresh failed, keeping previous: {:#}", e);
                Err(e)
            }
        };

        self.shared.set_phase(SessionPhase::Active);
        result
    }

    fn gate_open(&self, config: &DetectorConfig) -> bool {
        self.sinks.detections_subscribed()
            || (config.publish_tag_detections_image && self.sinks.image_subscribed())
            || config.publish_tf
    }

    fn publish(
        &self,
        set: &DetectionSet,
        accepted: &[&RawDetection],
        color: ColorFrame,
        config: &DetectorConfig,
    ) {
        if let Some(sink) = &self.sinks.detections {
            sink.publish(set);
        }

        if config.publish_tf {
            if let Some(sink) = &self.sinks.transforms {
                for detection in &set.detections {
                    sink.broadcast(&TagTransform::from_detection(set, detection));
                }
            }
        }

        if config.publish_tag_detections_image {
            if let Some(sink) = self.sinks.image.as_ref().filter(|s| s.has_subscribers()) {
                let mut canvas = color.rgb;
                for raw in accepted {
                    self.annotator.draw_detection(&mut canvas, raw.id, &raw.corners);
                }
                sink.publish(set.timestamp_ns, &canvas);
            }
        }
    }
}

/// Pose estimation and depth verification for every raw detection.
///
/// Returns the assembled set, the raw detections that made it in (for
/// drawing) and the number of rejected tags.
fn detect<'a>(
    raw: &'a [RawDetection],
    color: &ColorFrame,
    camera: &CameraModel,
    depth: &DepthFrame,
    config: &DetectorConfig,
) -> (DetectionSet, Vec<&'a RawDetection>, usize) {
    let pnp = config.pnp_settings();
    let fusion = config.fusion_settings();
    let gate = config.range_gate();

    let mut id_counts: HashMap<u32, usize> = HashMap::new();
    for det in raw {
        *id_counts.entry(det.id).or_default() += 1;
    }

    let mut set = DetectionSet::empty(color.timestamp_ns, color.frame_id.clone());
    let mut accepted = Vec::new();
    let mut rejected = 0;

    for det in raw {
        let Some(tag) = config.tag(det.id) else {
            debug!("Ignoring tag {}: not in the tag table", det.id);
            continue;
        };
        if id_counts[&det.id] > 1 {
            warn!("Tag {} detected more than once; dropping all instances", det.id);
            rejected += 1;
            continue;
        }
        if det.decision_margin < config.min_decision_margin {
            debug!(
                "Tag {} rejected: decision margin {:.1} below {:.1}",
                det.id, det.decision_margin, config.min_decision_margin
            );
            rejected += 1;
            continue;
        }
        if det.hamming > config.decoder.max_hamming {
            debug!(
                "Tag {} rejected: {} corrected bits, at most {} allowed",
                det.id, det.hamming, config.decoder.max_hamming
            );
            rejected += 1;
            continue;
        }

        let candidates = estimate_tag_pose(&det.corners, camera, tag.size, &pnp);
        match resolve(&candidates, depth, camera, tag.size, &gate, &fusion) {
            Ok(fused) => {
                debug!(
                    "Tag {} accepted at {:.3} m (coverage {:.2}, {} candidates)",
                    det.id,
                    fused.depth_range,
                    fused.depth_coverage,
                    candidates.len()
                );
                set.detections.push(DetectionResult {
                    id: det.id,
                    frame_name: tag.frame_name(),
                    size: tag.size,
                    pose: fused.pose,
                    depth_range: fused.depth_range,
                    depth_coverage: fused.depth_coverage,
                    reprojection_error: fused.reprojection_error,
                });
                accepted.push(det);
            }
            Err(reason) => {
                debug!("Tag {} rejected: {}", det.id, reason);
                rejected += 1;
            }
        }
    }

    (set, accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use approx::assert_relative_eq;
    use crossbeam_channel::{Receiver, Sender, unbounded};
    use image::RgbImage;

    use crate::detection::DecoderSettings;
    use crate::frame::ImagePayload;
    use crate::geometry::SE3;
    use crate::system::config::{MemoryParameterStore, TagDescription};
    use crate::system::sinks::{Topic, TransformSink};
    use crate::test_utils::{
        depth_message, gray_message, project_tag, render_tag_depth, tag_pose, test_camera,
    };

    const TAG_ID: u32 = 3;
    const TAG_SIZE: f64 = 0.16;

    /// Returns fixed detections and counts calls.
    struct FixedDecoder {
        detections: Vec<RawDetection>,
        calls: AtomicUsize,
    }

    impl FixedDecoder {
        fn new(detections: Vec<RawDetection>) -> Arc<Self> {
            Arc::new(Self {
                detections,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TagDecoder for FixedDecoder {
        fn decode(&self, _: &ColorFrame, _: &DecoderSettings) -> Vec<RawDetection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.detections.clone()
        }
    }

    /// Signals entry, then waits for a release before returning.
    struct BlockingDecoder {
        detections: Vec<RawDetection>,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl TagDecoder for BlockingDecoder {
        fn decode(&self, _: &ColorFrame, _: &DecoderSettings) -> Vec<RawDetection> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.detections.clone()
        }
    }

    fn camera_info() -> CameraInfo {
        CameraInfo::pinhole(640, 480, 600.0, 600.0, 320.0, 240.0)
    }

    fn base_config() -> DetectorConfig {
        DetectorConfig {
            standalone_tags: vec![TagDescription::new(TAG_ID, TAG_SIZE)],
            ..DetectorConfig::default()
        }
    }

    fn truth() -> SE3 {
        tag_pose(0.1, -0.05, 1.5, 0.3, -0.2)
    }

    fn detection_of(pose: &SE3) -> RawDetection {
        RawDetection::new(TAG_ID, project_tag(pose, TAG_SIZE, &test_camera()), 50.0)
    }

    fn scene_depth(timestamp_ns: u64, pose: &SE3) -> ImageMessage {
        depth_message(&render_tag_depth(timestamp_ns, pose, TAG_SIZE, &test_camera(), 3.0))
    }

    struct Fixture {
        session: Arc<DetectionSession>,
        store: Arc<MemoryParameterStore>,
        detections: Arc<Topic<DetectionSet>>,
    }

    fn fixture(decoder: Arc<dyn TagDecoder>, config: DetectorConfig) -> Fixture {
        let store = Arc::new(MemoryParameterStore::new(config));
        let detections: Arc<Topic<DetectionSet>> = Arc::new(Topic::new(4));
        let sinks = Sinks::default().with_detections(detections.clone());
        let session = DetectionSession::new(decoder, store.clone(), sinks).unwrap();
        Fixture {
            session: Arc::new(session),
            store,
            detections,
        }
    }

    #[test]
    fn test_closed_gate_never_calls_decoder() {
        let decoder = FixedDecoder::new(vec![detection_of(&truth())]);
        let f = fixture(decoder.clone(), base_config());
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();

        // Detection topic has no subscriber, no image output, no tf.
        let report = f.session.submit_color_frame(&gray_message(1, &test_camera()), &camera_info());

        assert!(matches!(report.status, CycleStatus::Skipped));
        assert!(report.detections.is_empty());
        assert_eq!(decoder.calls(), 0);
        assert_eq!(f.session.stats().cycles_skipped, 1);
    }

    #[test]
    fn test_gate_opens_for_each_output() {
        let decoder = FixedDecoder::new(vec![]);
        let image: Arc<Topic<(u64, RgbImage)>> = Arc::new(Topic::new(1));
        let store = Arc::new(MemoryParameterStore::new(base_config()));
        let sinks = Sinks::default().with_image(image.clone());
        let session = DetectionSession::new(decoder.clone(), store.clone(), sinks).unwrap();
        session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();
        let color = gray_message(1, &test_camera());

        // Subscriber without the flag: still closed.
        let _image_rx = image.subscribe();
        session.submit_color_frame(&color, &camera_info());
        assert_eq!(decoder.calls(), 0);

        store.update(|c| c.publish_tag_detections_image = true);
        session.refresh_configuration().unwrap();
        session.submit_color_frame(&color, &camera_info());
        assert_eq!(decoder.calls(), 1);

        // publish_tf alone opens the gate.
        drop(_image_rx);
        store.update(|c| {
            c.publish_tag_detections_image = false;
            c.publish_tf = true;
        });
        session.refresh_configuration().unwrap();
        let report = session.submit_color_frame(&color, &camera_info());
        assert!(matches!(report.status, CycleStatus::Completed { .. }));
        assert_eq!(decoder.calls(), 2);
    }

    #[test]
    fn test_no_depth_yields_empty_set() {
        let decoder = FixedDecoder::new(vec![detection_of(&truth())]);
        let f = fixture(decoder.clone(), base_config());
        let rx = f.detections.subscribe();

        let report = f.session.submit_color_frame(&gray_message(1, &test_camera()), &camera_info());

        assert!(matches!(
            report.status,
            CycleStatus::Aborted(CycleError::NoDepthAvailable)
        ));
        assert!(report.detections.is_empty());
        assert_eq!(decoder.calls(), 0);
        assert!(rx.try_recv().is_err());
        assert!(!f.session.has_depth());
    }

    #[test]
    fn test_end_to_end_synthetic_detection() {
        let pose = truth();
        let decoder = FixedDecoder::new(vec![detection_of(&pose)]);
        let config = DetectorConfig {
            publish_tf: true,
            ..base_config()
        };
        let store = Arc::new(MemoryParameterStore::new(config));
        let detections: Arc<Topic<DetectionSet>> = Arc::new(Topic::new(4));
        let transforms = Arc::new(Topic::<TagTransform>::new(4));
        let sinks = Sinks::default()
            .with_detections(detections.clone())
            .with_transforms(transforms.clone() as Arc<dyn TransformSink>);
        let session = DetectionSession::new(decoder, store, sinks).unwrap();
        let set_rx = detections.subscribe();
        let tf_rx = transforms.subscribe();

        session.submit_depth_frame(&scene_depth(10, &pose)).unwrap();
        let report = session.submit_color_frame(&gray_message(20, &test_camera()), &camera_info());

        assert!(matches!(report.status, CycleStatus::Completed { rejected: 0 }));
        assert_eq!(report.detections.len(), 1);
        let det = &report.detections.detections[0];
        assert_eq!(det.id, TAG_ID);
        assert_eq!(det.frame_name, "tag_3");
        assert_relative_eq!(det.pose.translation, pose.translation, epsilon = 0.01);
        assert_relative_eq!(det.depth_range, pose.range(), epsilon = 0.01);
        assert!(det.depth_coverage > 0.9);
        assert_eq!(report.detections.timestamp_ns, 20);

        assert_eq!(set_rx.try_recv().unwrap(), report.detections);
        let tf = tf_rx.try_recv().unwrap();
        assert_eq!(tf.child_frame, "tag_3");
        assert_eq!(tf.parent_frame, "color_optical_frame");
    }

    #[test]
    fn test_range_gate_boundaries() {
        // Frontal tag on the optical axis over flat depth: range is exactly 2 m.
        let pose = tag_pose(0.0, 0.0, 2.0, 0.0, 0.0);
        let corners = project_tag(&pose, TAG_SIZE, &test_camera());
        let decoder = FixedDecoder::new(vec![RawDetection::new(TAG_ID, corners, 50.0)]);
        let f = fixture(decoder, base_config());
        let _rx = f.detections.subscribe();
        let depth = DepthFrame::uniform(0, 640, 480, 2.0);
        f.session.submit_depth_frame(&depth_message(&depth)).unwrap();
        let color = gray_message(1, &test_camera());

        for (min, max, expected) in [
            (2.0, 10.0, 1),
            (0.0, 2.0, 1),
            (2.001, 10.0, 0),
            (0.0, 1.999, 0),
        ] {
            f.store.update(|c| {
                c.depth_min_range = min;
                c.depth_max_range = max;
            });
            f.session.refresh_configuration().unwrap();
            let report = f.session.submit_color_frame(&color, &camera_info());
            assert_eq!(report.detections.len(), expected, "gate [{min}, {max}]");
        }
    }

    #[test]
    fn test_refresh_is_visible_to_next_cycle() {
        let decoder = FixedDecoder::new(vec![detection_of(&truth())]);
        let f = fixture(decoder, base_config());
        let _rx = f.detections.subscribe();
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();
        let color = gray_message(1, &test_camera());

        assert_eq!(f.session.submit_color_frame(&color, &camera_info()).detections.len(), 1);

        f.store.update(|c| c.depth_max_range = 1.0);
        f.session.refresh_configuration().unwrap();
        assert_eq!(f.session.phase(), SessionPhase::Active);

        let report = f.session.submit_color_frame(&color, &camera_info());
        assert!(report.detections.is_empty());
        assert!(matches!(report.status, CycleStatus::Completed { rejected: 1 }));
    }

    #[test]
    fn test_failed_refresh_keeps_previous_config() {
        let f = fixture(FixedDecoder::new(vec![]), base_config());

        f.store.update(|c| {
            c.depth_min_range = 5.0;
            c.depth_max_range = 1.0;
        });
        assert!(f.session.refresh_configuration().is_err());
        assert_eq!(f.session.config().depth_max_range, 10.0);
        assert_eq!(f.session.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_refresh_waits_for_in_flight_cycle() {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let decoder = Arc::new(BlockingDecoder {
            detections: vec![detection_of(&truth())],
            entered: entered_tx,
            release: release_rx,
        });
        let f = fixture(decoder, base_config());
        let _rx = f.detections.subscribe();
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();
        let color = gray_message(1, &test_camera());

        let session = f.session.clone();
        let (c, info) = (color.clone(), camera_info());
        let cycle = thread::spawn(move || session.submit_color_frame(&c, &info));
        entered_rx.recv().unwrap();

        f.store.update(|c| c.depth_max_range = 1.0);
        let session = f.session.clone();
        let refresh = thread::spawn(move || session.refresh_configuration());
        thread::sleep(Duration::from_millis(50));
        assert!(!refresh.is_finished());

        release_tx.send(()).unwrap();
        let first = cycle.join().unwrap();
        refresh.join().unwrap().unwrap();
        // The in-flight cycle used the old range gate.
        assert_eq!(first.detections.len(), 1);

        release_tx.send(()).unwrap();
        let second = f.session.submit_color_frame(&color, &camera_info());
        assert!(second.detections.is_empty());
    }

    #[test]
    fn test_unknown_and_low_margin_tags() {
        let mut unknown = detection_of(&truth());
        unknown.id = 99;
        let mut weak = detection_of(&truth());
        weak.decision_margin = 5.0;
        let decoder = FixedDecoder::new(vec![unknown, weak]);
        let config = DetectorConfig {
            min_decision_margin: 20.0,
            ..base_config()
        };
        let f = fixture(decoder, config);
        let _rx = f.detections.subscribe();
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();

        let report = f.session.submit_color_frame(&gray_message(1, &test_camera()), &camera_info());

        assert!(report.detections.is_empty());
        // The unknown id is ignored, not rejected.
        assert!(matches!(report.status, CycleStatus::Completed { rejected: 1 }));
    }

    #[test]
    fn test_hamming_above_limit_is_rejected() {
        let mut corrected = detection_of(&truth());
        corrected.hamming = 2;
        let decoder = FixedDecoder::new(vec![corrected]);
        let f = fixture(decoder, base_config());
        let _rx = f.detections.subscribe();
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();
        let color = gray_message(1, &test_camera());

        let report = f.session.submit_color_frame(&color, &camera_info());
        assert!(report.detections.is_empty());
        assert!(matches!(report.status, CycleStatus::Completed { rejected: 1 }));

        f.store.update(|c| c.decoder.max_hamming = 2);
        f.session.refresh_configuration().unwrap();
        let report = f.session.submit_color_frame(&color, &camera_info());
        assert_eq!(report.detections.len(), 1);
    }

    #[test]
    fn test_duplicate_ids_are_dropped() {
        let det = detection_of(&truth());
        let decoder = FixedDecoder::new(vec![det.clone(), det]);
        let f = fixture(decoder, base_config());
        let _rx = f.detections.subscribe();
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();

        let report = f.session.submit_color_frame(&gray_message(1, &test_camera()), &camera_info());
        assert!(report.detections.is_empty());
        assert!(matches!(report.status, CycleStatus::Completed { rejected: 2 }));
    }

    #[test]
    fn test_stale_depth_aborts_when_bounded() {
        let decoder = FixedDecoder::new(vec![detection_of(&truth())]);
        let config = DetectorConfig {
            max_depth_age_ms: Some(100),
            ..base_config()
        };
        let f = fixture(decoder.clone(), config);
        let _rx = f.detections.subscribe();
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();

        let late = gray_message(500_000_000, &test_camera());
        let report = f.session.submit_color_frame(&late, &camera_info());
        assert!(matches!(
            report.status,
            CycleStatus::Aborted(CycleError::StaleDepth { age_ms: 500, max_age_ms: 100 })
        ));
        assert_eq!(decoder.calls(), 0);

        let fresh = gray_message(50_000_000, &test_camera());
        let report = f.session.submit_color_frame(&fresh, &camera_info());
        assert_eq!(report.detections.len(), 1);
    }

    #[test]
    fn test_bad_depth_keeps_previous_frame() {
        let decoder = FixedDecoder::new(vec![detection_of(&truth())]);
        let f = fixture(decoder, base_config());
        let _rx = f.detections.subscribe();
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();

        let bad = ImageMessage::raw(5, "depth", 640, 480, "rgb8", vec![0; 640 * 480 * 3]);
        assert!(f.session.submit_depth_frame(&bad).is_err());
        assert!(f.session.has_depth());

        let report = f.session.submit_color_frame(&gray_message(6, &test_camera()), &camera_info());
        assert_eq!(report.detections.len(), 1);
    }

    #[test]
    fn test_bad_color_frame_aborts_cycle() {
        let decoder = FixedDecoder::new(vec![detection_of(&truth())]);
        let f = fixture(decoder.clone(), base_config());
        let _rx = f.detections.subscribe();
        f.session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();

        let mut color = gray_message(1, &test_camera());
        if let ImagePayload::Raw(raw) = &mut color.payload {
            raw.data.truncate(10);
        }
        let report = f.session.submit_color_frame(&color, &camera_info());

        assert!(matches!(
            report.status,
            CycleStatus::Aborted(CycleError::FrameDecode(FrameDecodeError::BufferSize { .. }))
        ));
        assert_eq!(decoder.calls(), 0);
    }

    #[test]
    fn test_annotated_image_published() {
        let decoder = FixedDecoder::new(vec![detection_of(&truth())]);
        let config = DetectorConfig {
            publish_tag_detections_image: true,
            ..base_config()
        };
        let store = Arc::new(MemoryParameterStore::new(config));
        let image: Arc<Topic<(u64, RgbImage)>> = Arc::new(Topic::new(1));
        let session =
            DetectionSession::new(decoder, store, Sinks::default().with_image(image.clone()))
                .unwrap();
        let rx = image.subscribe();
        session.submit_depth_frame(&scene_depth(0, &truth())).unwrap();

        session.submit_color_frame(&gray_message(7, &test_camera()), &camera_info());

        let (ts, canvas) = rx.try_recv().unwrap();
        assert_eq!(ts, 7);
        assert_eq!(canvas.dimensions(), (640, 480));
        let drawn = canvas.pixels().filter(|p| p.0 != [128, 128, 128]).count();
        assert!(drawn > 100);
    }
}
