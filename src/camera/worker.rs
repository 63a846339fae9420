//! Per-camera acquisition worker.
//!
//! One worker owns one camera connection for its whole lifecycle: connect
//! with a bounded retry budget, negotiate features, then run the capture
//! loop until the shared shutdown flag is raised. Decoded frames land in a
//! bounded drop-oldest queue; consumers only ever see the most recent
//! frame, never a backlog.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, error, info, warn};

use super::{BufferStatus, CameraDriver, CameraHandle, FeatureValue};
use crate::frame::{Frame, PixelLayout};

/// Maximum frames held between producer and consumer.
const QUEUE_CAPACITY: usize = 2;
/// Driver buffers pre-allocated before acquisition starts.
const BUFFER_POOL_SIZE: usize = 30;

/// Connection lifecycle of one camera channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Failed,
}

/// Static configuration for one camera channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Logical channel name ("top", "side").
    pub name: String,
    /// Device address handed to the driver.
    pub address: String,
    /// Target exposure time in microseconds (best-effort).
    pub exposure_us: f64,
    /// Target frame rate limit (best-effort).
    pub frame_rate: f64,
    /// Preferred pixel layout.
    pub pixel_layout: PixelLayout,
    /// Fallback layouts tried in order when the preferred one is rejected.
    pub fallback_layouts: Vec<PixelLayout>,
    /// Connection attempts before the worker gives up permanently.
    pub connect_attempts: u32,
    /// Delay between connection attempts.
    pub retry_delay: Duration,
    /// Bounded wait for the next hardware buffer.
    pub pop_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            exposure_us: 20_000.0,
            frame_rate: 15.0,
            pixel_layout: PixelLayout::RawBayer,
            fallback_layouts: vec![PixelLayout::Rgb, PixelLayout::RawBayer],
            connect_attempts: 5,
            retry_delay: Duration::from_secs(2),
            pop_timeout: Duration::from_secs(1),
        }
    }
}

/// Read-only counters for one channel.
#[derive(Debug, Clone)]
pub struct CameraStats {
    pub name: String,
    pub address: String,
    pub state: ConnectionState,
    pub frames_captured: u64,
    pub timeouts: u64,
    pub fps: f64,
    pub queue_len: usize,
}

/// Bounded drop-oldest frame queue.
///
/// Insertion past capacity evicts the oldest entry and never blocks the
/// producer. Draining returns only the newest frame so repeated readers
/// cannot see stale data re-delivered.
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a frame, evicting the oldest entry when full.
    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Remove and return the newest frame, discarding everything older.
    pub fn drain_latest(&mut self) -> Option<Frame> {
        let latest = self.frames.pop_back();
        self.frames.clear();
        latest
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Peek the retained frames, oldest first. Test support.
    #[cfg(test)]
    fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

/// Rolling one-second fps estimator.
struct FpsEstimator {
    window_start: Instant,
    count: u32,
}

impl FpsEstimator {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Record one frame; returns a new estimate when the window rolls over.
    fn tick(&mut self) -> Option<f64> {
        self.count += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = f64::from(self.count) / elapsed.as_secs_f64();
            self.count = 0;
            self.window_start = Instant::now();
            Some(fps)
        } else {
            None
        }
    }
}

/// State shared between the capture thread and worker callers.
struct WorkerShared {
    queue: Mutex<FrameQueue>,
    state: Mutex<ConnectionState>,
    frames_captured: AtomicU64,
    timeouts: AtomicU64,
    fps: Mutex<f64>,
}

impl WorkerShared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

/// Handle to a running acquisition worker.
pub struct AcquisitionWorker {
    config: ChannelConfig,
    shared: Arc<WorkerShared>,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AcquisitionWorker {
    /// Spawn the capture thread and return immediately.
    ///
    /// The worker observes `shutdown` at every loop boundary; raising it
    /// makes the thread release the camera and exit.
    pub fn start<D: CameraDriver>(
        config: ChannelConfig,
        driver: D,
        shutdown: Arc<AtomicBool>,
    ) -> AcquisitionWorker {
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(FrameQueue::new(QUEUE_CAPACITY)),
            state: Mutex::new(ConnectionState::Disconnected),
            frames_captured: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            fps: Mutex::new(0.0),
        });

        let thread_shared = shared.clone();
        let thread_shutdown = shutdown.clone();
        let thread_config = config.clone();
        let handle = std::thread::Builder::new()
            .name(format!("cam-{}", config.name))
            .spawn(move || run_worker(driver, thread_config, thread_shared, thread_shutdown))
            .expect("failed to spawn acquisition thread");

        AcquisitionWorker {
            config,
            shared,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Most recent frame, or `None` when the channel is empty.
    ///
    /// Drains the queue so a repeated caller never sees an older frame
    /// re-delivered. Never blocks on the producer.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared.queue.lock().unwrap().drain_latest()
    }

    /// Snapshot of the channel counters.
    pub fn stats(&self) -> CameraStats {
        CameraStats {
            name: self.config.name.clone(),
            address: self.config.address.clone(),
            state: *self.shared.state.lock().unwrap(),
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            timeouts: self.shared.timeouts.load(Ordering::Relaxed),
            fps: *self.shared.fps.lock().unwrap(),
            queue_len: self.shared.queue.lock().unwrap().len(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Request termination and wait for the capture thread to exit.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AcquisitionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<D: CameraDriver>(
    mut driver: D,
    config: ChannelConfig,
    shared: Arc<WorkerShared>,
    shutdown: Arc<AtomicBool>,
) {
    info!(channel = %config.name, address = %config.address, "starting camera thread");
    shared.set_state(ConnectionState::Connecting);

    let mut handle = None;
    for attempt in 1..=config.connect_attempts {
        if shutdown.load(Ordering::SeqCst) {
            shared.set_state(ConnectionState::Disconnected);
            return;
        }
        match driver.connect(&config.address) {
            Ok(h) => {
                info!(channel = %config.name, "connected to camera");
                handle = Some(h);
                break;
            }
            Err(e) => {
                warn!(channel = %config.name, attempt, "connection attempt failed: {e}");
            }
        }
        if attempt < config.connect_attempts {
            std::thread::sleep(config.retry_delay);
        }
    }

    let Some(mut camera) = handle else {
        error!(
            channel = %config.name,
            attempts = config.connect_attempts,
            "could not connect to camera, channel will stay empty"
        );
        shared.set_state(ConnectionState::Failed);
        return;
    };

    match configure(&mut camera, &config) {
        Ok(geometry) => {
            shared.set_state(ConnectionState::Streaming);
            capture_loop(&mut camera, &config, geometry, &shared, &shutdown);
        }
        Err(e) => {
            error!(channel = %config.name, "camera initialization failed: {e}");
            shared.set_state(ConnectionState::Failed);
        }
    }

    // Shutdown errors are logged, never propagated.
    if let Err(e) = camera.stop_acquisition() {
        warn!(channel = %config.name, "cleanup error: {e}");
    }
    if *shared.state.lock().unwrap() == ConnectionState::Streaming {
        shared.set_state(ConnectionState::Disconnected);
    }
    info!(channel = %config.name, "camera thread exited");
}

/// Negotiated geometry and layout for the capture loop.
struct Geometry {
    width: u32,
    height: u32,
    layout: PixelLayout,
}

fn configure<C: CameraHandle>(
    camera: &mut C,
    config: &ChannelConfig,
) -> Result<Geometry, super::CameraError> {
    camera.set_feature("AcquisitionMode", FeatureValue::str("Continuous"))?;
    camera.set_feature("TriggerMode", FeatureValue::str("Off"))?;
    camera.set_feature("GevHeartbeatTimeout", FeatureValue::Int(5000))?;

    // Best-effort settings: hardware defaults are acceptable.
    if let Err(e) = camera
        .set_feature("AcquisitionFrameRateEnable", FeatureValue::Bool(true))
        .and_then(|_| camera.set_feature("AcquisitionFrameRate", FeatureValue::Float(config.frame_rate)))
    {
        warn!(channel = %config.name, "could not set fps limit: {e}");
    }

    negotiate_pixel_layout(camera, config);

    if let Err(e) = camera.set_feature("ExposureTime", FeatureValue::Float(config.exposure_us)) {
        if let Err(e2) = camera.set_feature("ExposureTimeAbs", FeatureValue::Float(config.exposure_us))
        {
            warn!(channel = %config.name, "could not set exposure time: {e}, {e2}");
        }
    }

    if let Err(e) = camera.set_feature("GevSCPSPacketSize", FeatureValue::Int(1500)) {
        warn!(channel = %config.name, "could not set packet size: {e}");
    }
    if let Err(e) = camera.set_feature("GevSCPD", FeatureValue::Int(10_000)) {
        warn!(channel = %config.name, "could not set inter-packet delay: {e}");
    }

    let layout = camera.pixel_layout();
    let (width, height) = match camera.dimensions() {
        Ok(dims) => dims,
        Err(e) => {
            warn!(channel = %config.name, "size query failed ({e}), assuming 1920x1080");
            (1920, 1080)
        }
    };
    info!(
        channel = %config.name,
        width, height, layout = layout.feature_name(),
        "camera configured"
    );

    camera.allocate_buffers(BUFFER_POOL_SIZE)?;
    camera.start_acquisition()?;
    info!(channel = %config.name, "acquisition started");

    Ok(Geometry {
        width,
        height,
        layout,
    })
}

/// Select the preferred pixel layout, cascading through the configured
/// fallbacks in order and keeping the first one the device accepts.
fn negotiate_pixel_layout<C: CameraHandle>(camera: &mut C, config: &ChannelConfig) {
    let desired = config.pixel_layout;
    if camera
        .set_feature("PixelFormat", FeatureValue::str(desired.feature_name()))
        .is_ok()
    {
        return;
    }
    warn!(
        channel = %config.name,
        "{} not supported, trying fallback formats",
        desired.feature_name()
    );
    for layout in &config.fallback_layouts {
        if *layout == desired {
            continue;
        }
        if camera
            .set_feature("PixelFormat", FeatureValue::str(layout.feature_name()))
            .is_ok()
        {
            return;
        }
    }
    // Every explicit choice rejected; keep whatever the device reports.
}

fn capture_loop<C: CameraHandle>(
    camera: &mut C,
    config: &ChannelConfig,
    geometry: Geometry,
    shared: &WorkerShared,
    shutdown: &AtomicBool,
) {
    let mut fps = FpsEstimator::new();

    while !shutdown.load(Ordering::SeqCst) {
        match camera.pop_buffer(config.pop_timeout) {
            Ok(Some(buffer)) => {
                if buffer.status == BufferStatus::Success {
                    shared.frames_captured.fetch_add(1, Ordering::Relaxed);
                    match Frame::decode(
                        &buffer.data,
                        geometry.layout,
                        geometry.width,
                        geometry.height,
                        SystemTime::now(),
                    ) {
                        Ok(frame) => {
                            if let Some(estimate) = fps.tick() {
                                *shared.fps.lock().unwrap() = estimate;
                            }
                            shared.queue.lock().unwrap().push(frame);
                        }
                        Err(e) => {
                            debug!(channel = %config.name, "dropping frame: {e}");
                        }
                    }
                } else {
                    shared.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                // Recycle regardless of decode outcome to keep the pool fed.
                camera.push_buffer(buffer);
            }
            Ok(None) => {
                shared.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(channel = %config.name, "capture error: {e}");
            }
        }
    }
}
