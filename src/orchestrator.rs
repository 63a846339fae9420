//! Pipeline wiring.
//!
//! The orchestrator owns the acquisition workers, the frame store and the
//! tracker table, and connects them to the external annotator: a feeder
//! thread pulls the latest frame from each worker into the annotator's
//! sink, and [`Orchestrator::ingest`] receives each processed batch back,
//! splitting the composite into the store channels and running every
//! detection through the behavior trackers.
//!
//! `ingest` is the annotator-callback entry point and may run concurrently
//! with everything else; it only touches state through the store's and
//! table's synchronized interfaces.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::annotator::{AnnotatedBatch, AnnotatorSink};
use crate::behavior::{FishState, TrackerTable, ViewKind};
use crate::camera::{AcquisitionWorker, CameraStats};
use crate::frame::Frame;
use crate::store::SharedFrameStore;

/// Idle sleep between feeder iterations.
const FEED_INTERVAL: Duration = Duration::from_millis(10);
/// How often stale trackers are aged out.
const EVICT_INTERVAL: Duration = Duration::from_secs(5);

/// Overlay instruction for the annotator's renderer: append `suffix` to
/// the object's display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelOverlay {
    pub track_id: u64,
    pub suffix: &'static str,
}

pub struct Orchestrator {
    workers: Arc<Vec<AcquisitionWorker>>,
    /// Store channel per source index, in annotator negotiation order.
    channels: Vec<String>,
    store: Arc<SharedFrameStore>,
    trackers: Arc<TrackerTable>,
    annotator: Arc<dyn AnnotatorSink>,
    shutdown: Arc<AtomicBool>,
    stale_after: Duration,
    feeder: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wire the components together. `workers` and `channels` are in
    /// source-index order; channel 0 is the top view.
    pub fn new(
        workers: Vec<AcquisitionWorker>,
        channels: Vec<String>,
        store: Arc<SharedFrameStore>,
        trackers: Arc<TrackerTable>,
        annotator: Arc<dyn AnnotatorSink>,
        shutdown: Arc<AtomicBool>,
        stale_after: Duration,
    ) -> Self {
        Self {
            workers: Arc::new(workers),
            channels,
            store,
            trackers,
            annotator,
            shutdown,
            stale_after,
            feeder: Mutex::new(None),
        }
    }

    /// Start the feeder thread: newest frame per camera into the annotator
    /// sink, plus periodic stale-tracker eviction.
    pub fn start_feeder(&self) {
        let workers = self.workers.clone();
        let annotator = self.annotator.clone();
        let trackers = self.trackers.clone();
        let shutdown = self.shutdown.clone();
        let stale_after = self.stale_after;

        let handle = std::thread::Builder::new()
            .name("feeder".to_string())
            .spawn(move || {
                let mut last_evict = Instant::now();
                while !shutdown.load(Ordering::SeqCst) {
                    for (source, worker) in workers.iter().enumerate() {
                        if let Some(frame) = worker.latest_frame() {
                            if let Err(e) = annotator.push_frame(source, &frame) {
                                warn!("annotator refused frame: {e}");
                            }
                        }
                    }
                    if last_evict.elapsed() >= EVICT_INTERVAL {
                        trackers.evict_stale(stale_after);
                        last_evict = Instant::now();
                    }
                    std::thread::sleep(FEED_INTERVAL);
                }
                debug!("feeder exited");
            })
            .expect("failed to spawn feeder thread");

        *self.feeder.lock().unwrap() = Some(handle);
    }

    /// Receive one processed batch from the annotator.
    ///
    /// The composite (sources tiled in one row) is split into equal strips
    /// and written to the per-source store channels; every detection is
    /// run through its behavior tracker. Returns the label overlays the
    /// annotator should render for non-healthy fish.
    pub fn ingest(&self, batch: AnnotatedBatch) -> Vec<LabelOverlay> {
        match split_composite(&batch.composite, self.channels.len()) {
            Some(strips) => {
                for (channel, strip) in self.channels.iter().zip(strips) {
                    self.store.update(channel, Some(strip));
                }
            }
            None => {
                warn!(
                    width = batch.composite.width,
                    sources = self.channels.len(),
                    "composite width does not tile evenly, store not updated"
                );
            }
        }

        let mut overlays = Vec::new();
        for source in &batch.per_source {
            let view = if source.source == 0 {
                ViewKind::Top
            } else {
                ViewKind::Side
            };
            for detection in &source.detections {
                let state = self.trackers.observe(view, detection);
                if state != FishState::Healthy {
                    overlays.push(LabelOverlay {
                        track_id: detection.track_id,
                        suffix: state.as_str(),
                    });
                }
            }
        }
        overlays
    }

    /// Counters for every camera, in source order.
    pub fn camera_stats(&self) -> Vec<CameraStats> {
        self.workers.iter().map(|w| w.stats()).collect()
    }

    pub fn trackers(&self) -> &Arc<TrackerTable> {
        &self.trackers
    }

    /// Raise the shared shutdown flag and join the feeder and workers.
    pub fn shutdown(&self) {
        info!("shutting down pipeline");
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.feeder.lock().unwrap().take() {
            let _ = handle.join();
        }
        for worker in self.workers.iter() {
            worker.stop();
        }
    }
}

/// Split a 1-row tiled composite into `parts` equal-width frames.
///
/// Returns `None` when the width does not divide evenly.
fn split_composite(composite: &Frame, parts: usize) -> Option<Vec<Frame>> {
    if parts == 0 || composite.width as usize % parts != 0 {
        return None;
    }
    let part_width = composite.width as usize / parts;
    let height = composite.height as usize;
    let row_len = composite.width as usize * 3;

    let mut out = Vec::with_capacity(parts);
    for part in 0..parts {
        let mut data = Vec::with_capacity(part_width * height * 3);
        for y in 0..height {
            let start = y * row_len + part * part_width * 3;
            data.extend_from_slice(&composite.data[start..start + part_width * 3]);
        }
        out.push(Frame::from_bgr(
            data,
            part_width as u32,
            composite.height,
            composite.timestamp,
        ));
    }
    Some(out)
}
