//! Camera driver abstraction and acquisition workers.
//!
//! The hardware protocol itself (feature negotiation, packet transport,
//! buffer allocation) lives behind the [`CameraDriver`]/[`CameraHandle`]
//! traits; the crate only relies on the pull-based contract below. The
//! acquisition worker in [`worker`] drives a handle on its own thread and
//! publishes decoded frames through a bounded drop-oldest queue.

pub mod mock;
pub mod worker;

pub use mock::MockCamera;
pub use worker::{AcquisitionWorker, CameraStats, ChannelConfig, ConnectionState};

use std::time::Duration;

use thiserror::Error;

use crate::frame::PixelLayout;

/// Errors surfaced by a camera driver.
///
/// Each variant maps to one containment scope from the error-handling
/// design: connection failures end the worker, feature rejections are
/// best-effort, everything else is per-frame.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Could not establish a connection to the device.
    #[error("connection to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// The device rejected a feature write.
    #[error("feature {name} rejected: {reason}")]
    FeatureRejected { name: String, reason: String },

    /// The device could not report its frame dimensions.
    #[error("dimension query failed: {0}")]
    DimensionsUnavailable(String),

    /// Any other driver-level failure.
    #[error("driver error: {0}")]
    Driver(String),
}

/// A typed feature value for [`CameraHandle::set_feature`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FeatureValue {
    pub fn str(v: &str) -> Self {
        FeatureValue::Str(v.to_string())
    }
}

/// Completion status reported by the driver for a popped buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// The buffer holds a complete sensor payload.
    Success,
    /// The transfer was incomplete or corrupted; payload must be ignored.
    Failed,
}

/// An owned copy of one hardware buffer.
///
/// Buffers are recycled: every popped buffer must be handed back via
/// [`CameraHandle::push_buffer`] regardless of decode outcome, or the
/// driver's pool starves.
#[derive(Debug)]
pub struct DriverBuffer {
    pub status: BufferStatus,
    pub data: Vec<u8>,
}

/// Factory for camera connections.
pub trait CameraDriver: Send + 'static {
    type Handle: CameraHandle;

    /// Establish a connection to the device at `address`.
    fn connect(&mut self, address: &str) -> Result<Self::Handle, CameraError>;
}

/// An open camera connection.
///
/// All methods are called from the owning worker thread only; no handle is
/// ever shared across threads.
pub trait CameraHandle: Send {
    /// Write one named feature. Independently failable; callers decide
    /// which writes are required and which are best-effort.
    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError>;

    /// Layout the device is currently delivering.
    fn pixel_layout(&self) -> PixelLayout;

    /// Current frame dimensions as `(width, height)`.
    fn dimensions(&self) -> Result<(u32, u32), CameraError>;

    /// Pre-allocate `count` transfer buffers.
    fn allocate_buffers(&mut self, count: usize) -> Result<(), CameraError>;

    fn start_acquisition(&mut self) -> Result<(), CameraError>;

    fn stop_acquisition(&mut self) -> Result<(), CameraError>;

    /// Wait up to `timeout` for the next buffer. `Ok(None)` is a timeout,
    /// not an error.
    fn pop_buffer(&mut self, timeout: Duration) -> Result<Option<DriverBuffer>, CameraError>;

    /// Return a buffer to the driver's pool.
    fn push_buffer(&mut self, buffer: DriverBuffer);
}
