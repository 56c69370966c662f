use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tag_depth_fusion::io::{Recording, ReplayEvent};
use tag_depth_fusion::system::{
    CsvDetectionSink, CycleOutcome, DetectionSession, DetectorNode, Sinks, YamlParameterStore,
};

/// Upper bound on one cycle while replaying.
const CYCLE_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let recording_path = args
        .next()
        .unwrap_or_else(|| "data/recording".to_string());
    let output_path = PathBuf::from(args.next().unwrap_or_else(|| "detections.csv".to_string()));

    info!("Loading recording from: {}", recording_path);
    let recording = Recording::new(&recording_path)?;
    let decoder = recording.decoder()?;
    info!(
        "Loaded {} color frames, {} depth frames, {} recorded tag detections",
        recording.color_entries.len(),
        recording.depth_entries.len(),
        decoder.len()
    );

    let store = Arc::new(YamlParameterStore::new(recording.params_path()));
    let sink = Arc::new(CsvDetectionSink::create(&output_path)?);
    let session = DetectionSession::new(
        Arc::new(decoder),
        store,
        Sinks::default().with_detections(sink.clone()),
    )
    .context("Failed to start detection session")?;
    let streams = session.streams().clone();
    let node = DetectorNode::spawn(session)?;

    let mut completed = 0usize;
    let mut aborted = 0usize;
    for (timestamp_ns, event) in recording.events() {
        match event {
            ReplayEvent::Depth(i) => {
                node.push_depth(recording.depth_message(i, streams.depth_transport_hint)?);
            }
            ReplayEvent::Color(i) => {
                let image = recording.color_message(i, streams.transport_hint)?;
                node.push_color(image, recording.camera_info.clone());

                // Lock-step replay: wait for this frame before feeding the next.
                let summary = node
                    .summaries()
                    .recv_timeout(CYCLE_TIMEOUT)
                    .with_context(|| format!("No cycle result for frame at {} ns", timestamp_ns))?;
                if summary.timestamp_ns != timestamp_ns {
                    bail!(
                        "cycle results out of order: expected {} ns, got {} ns",
                        timestamp_ns,
                        summary.timestamp_ns
                    );
                }
                match summary.outcome {
                    CycleOutcome::Completed => completed += 1,
                    CycleOutcome::Aborted => aborted += 1,
                    CycleOutcome::Skipped => warn!("Cycle skipped at {} ns", timestamp_ns),
                }
            }
        }
    }

    drop(node);
    sink.flush()?;

    println!(
        "Replay finished: {} cycles completed, {} aborted, {} detections written to {}",
        completed,
        aborted,
        sink.rows_written(),
        output_path.display()
    );
    Ok(())
}
