//! Dual-camera fish activity monitoring station.
//!
//! Acquires frames from two machine-vision cameras (top and side view),
//! feeds them to an external annotation pipeline, classifies each tracked
//! fish as HEALTHY / SICK / DEAD from its motion, and serves the annotated
//! views over HTTP as browser-native MJPEG streams.
//!
//! Pipeline: camera driver -> [`camera::AcquisitionWorker`] (decode, queue)
//! -> [`orchestrator::Orchestrator`] feeder -> annotator -> store split +
//! [`behavior::TrackerTable`] -> [`server::StreamBroadcastServer`].

pub mod annotator;
pub mod behavior;
pub mod camera;
pub mod config;
pub mod frame;
pub mod orchestrator;
pub mod server;
pub mod store;

pub use annotator::{AnnotatedBatch, AnnotatorSink, BoundingBox, Detection, LoopbackAnnotator};
pub use behavior::{BehaviorConfig, FishBehaviorTracker, FishState, TrackerTable, ViewKind};
pub use camera::{AcquisitionWorker, CameraDriver, CameraHandle, ChannelConfig, MockCamera};
pub use config::AppConfig;
pub use frame::{Frame, PixelLayout};
pub use orchestrator::Orchestrator;
pub use server::StreamBroadcastServer;
pub use store::SharedFrameStore;
