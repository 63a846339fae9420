//! Annotation pipeline collaborator boundary.
//!
//! The detection/tracking pipeline is external: the core pushes raw BGR
//! frames tagged with a source index into an [`AnnotatorSink`] and gets
//! back, per processed batch, an annotated composite frame plus tracked
//! detections per source. Nothing in this crate knows how the annotator
//! works internally.

use std::sync::Mutex;

use thiserror::Error;

use crate::frame::Frame;

/// A bounding box in frame-pixel coordinates, `(left, top, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Center of the box.
    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }
}

/// One tracked detection reported by the annotator.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Stable identifier for the same physical object across batches.
    pub track_id: u64,
    /// Class label from the detector, when one was assigned.
    pub class_id: Option<u32>,
    pub bbox: BoundingBox,
}

/// Detections for one source within a processed batch.
#[derive(Debug, Clone)]
pub struct SourceDetections {
    /// Source index as negotiated with the sink (0 = top, 1 = side).
    pub source: usize,
    pub detections: Vec<Detection>,
}

/// One processed batch delivered back to the core.
#[derive(Debug)]
pub struct AnnotatedBatch {
    /// Annotated composite output frame (sources tiled in one row).
    pub composite: Frame,
    pub per_source: Vec<SourceDetections>,
}

#[derive(Debug, Error)]
pub enum AnnotatorError {
    /// The sink cannot accept the frame right now; the frame is dropped.
    #[error("annotator sink rejected frame for source {source_index}: {reason}")]
    Rejected { source_index: usize, reason: String },
}

/// Input side of the annotation pipeline.
pub trait AnnotatorSink: Send + Sync {
    /// Push one raw BGR frame for the given source index.
    fn push_frame(&self, source: usize, frame: &Frame) -> Result<(), AnnotatorError>;
}

/// In-process annotator stand-in.
///
/// Holds the latest frame per source and, once every source has reported
/// at least once, tiles them side by side into a composite with no
/// detections. Lets the full acquisition → store → streaming path run
/// without the external inference engine.
pub struct LoopbackAnnotator {
    slots: Mutex<Vec<Option<Frame>>>,
}

impl LoopbackAnnotator {
    pub fn new(sources: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; sources]),
        }
    }

    /// Produce a batch if every source has delivered a frame.
    ///
    /// Frames are resized implicitly by truncation/padding to the first
    /// source's geometry; mismatched mock sources are not a supported
    /// configuration, matching the fixed negotiated resolution contract.
    pub fn take_batch(&self) -> Option<AnnotatedBatch> {
        let mut slots = self.slots.lock().unwrap();
        if slots.is_empty() || slots.iter().any(|s| s.is_none()) {
            return None;
        }
        let frames: Vec<Frame> = slots.iter_mut().map(|s| s.take().unwrap()).collect();

        let height = frames[0].height;
        let width: u32 = frames.iter().map(|f| f.width).sum();
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height as usize {
            for frame in &frames {
                let row_len = frame.width as usize * 3;
                let start = y * row_len;
                if y < frame.height as usize {
                    data.extend_from_slice(&frame.data[start..start + row_len]);
                } else {
                    data.extend(std::iter::repeat(0u8).take(row_len));
                }
            }
        }

        let per_source = (0..frames.len())
            .map(|source| SourceDetections {
                source,
                detections: Vec::new(),
            })
            .collect();

        Some(AnnotatedBatch {
            composite: Frame::from_bgr(data, width, height, frames[0].timestamp),
            per_source,
        })
    }
}

impl AnnotatorSink for LoopbackAnnotator {
    fn push_frame(&self, source: usize, frame: &Frame) -> Result<(), AnnotatorError> {
        let mut slots = self.slots.lock().unwrap();
        let Some(slot) = slots.get_mut(source) else {
            return Err(AnnotatorError::Rejected {
                source_index: source,
                reason: format!("unknown source index (have {})", slots.len()),
            });
        };
        *slot = Some(frame.clone());
        Ok(())
    }
}
