//! Frame value type and pixel decoding.
//!
//! A [`Frame`] is an immutable pixel buffer plus its geometry, color layout
//! and capture timestamp. Frames are decoded once from the raw sensor payload
//! into canonical BGR and never mutated after that; every hand-off between
//! threads copies or moves the whole value.

use std::time::SystemTime;

use thiserror::Error;

/// Color layout of a pixel buffer.
///
/// `RawBayer`, `Rgb` and `Mono` describe sensor payloads; `Bgr` is the
/// canonical layout every decoded frame ends up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 8-bit Bayer mosaic, RGGB tiling, one byte per pixel.
    RawBayer,
    /// 8-bit packed RGB, three bytes per pixel.
    Rgb,
    /// 8-bit grayscale, one byte per pixel.
    Mono,
    /// 8-bit packed BGR, three bytes per pixel.
    Bgr,
}

impl PixelLayout {
    /// Bytes per pixel for this layout.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::RawBayer | PixelLayout::Mono => 1,
            PixelLayout::Rgb | PixelLayout::Bgr => 3,
        }
    }

    /// GenICam-style feature name used when negotiating with the driver.
    pub fn feature_name(&self) -> &'static str {
        match self {
            PixelLayout::RawBayer => "BayerRG8",
            PixelLayout::Rgb => "RGB8Packed",
            PixelLayout::Mono => "Mono8",
            PixelLayout::Bgr => "BGR8",
        }
    }

    /// Parse a driver feature name back into a layout tag.
    pub fn from_feature_name(name: &str) -> Option<Self> {
        match name {
            "BayerRG8" => Some(PixelLayout::RawBayer),
            "RGB8" | "RGB8Packed" => Some(PixelLayout::Rgb),
            "Mono8" => Some(PixelLayout::Mono),
            "BGR8" => Some(PixelLayout::Bgr),
            _ => None,
        }
    }
}

/// Errors produced while decoding a sensor payload into a [`Frame`].
#[derive(Debug, Error)]
pub enum FrameError {
    /// Payload carries fewer bytes than `width * height * bytes_per_pixel`.
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    ShortPayload { expected: usize, actual: usize },
}

/// A decoded video frame in canonical BGR layout.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Contiguous BGR bytes, row-major, `width * height * 3` long.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout tag of the decoded buffer (always [`PixelLayout::Bgr`] for
    /// frames produced by [`Frame::decode`]).
    pub layout: PixelLayout,
    /// Capture timestamp.
    pub timestamp: SystemTime,
}

impl Frame {
    /// Decode a raw sensor payload into a BGR frame.
    ///
    /// The payload is size-validated against the source layout; oversized
    /// payloads are truncated to the expected length, undersized payloads
    /// are rejected.
    pub fn decode(
        payload: &[u8],
        layout: PixelLayout,
        width: u32,
        height: u32,
        timestamp: SystemTime,
    ) -> Result<Frame, FrameError> {
        let (w, h) = (width as usize, height as usize);
        let expected = w * h * layout.bytes_per_pixel();
        if payload.len() < expected {
            return Err(FrameError::ShortPayload {
                expected,
                actual: payload.len(),
            });
        }
        let payload = &payload[..expected];

        let data = match layout {
            PixelLayout::RawBayer => demosaic_rggb_to_bgr(payload, w, h),
            PixelLayout::Rgb => rgb_to_bgr(payload),
            PixelLayout::Mono => mono_to_bgr(payload),
            PixelLayout::Bgr => payload.to_vec(),
        };

        Ok(Frame {
            data,
            width,
            height,
            layout: PixelLayout::Bgr,
            timestamp,
        })
    }

    /// Build a BGR frame directly from an already-canonical buffer.
    ///
    /// Panics in debug builds if the buffer length does not match the
    /// geometry; callers own validation for release paths.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32, timestamp: SystemTime) -> Frame {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Frame {
            data,
            width,
            height,
            layout: PixelLayout::Bgr,
            timestamp,
        }
    }

    /// Total pixel count.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Swap packed RGB bytes to BGR.
fn rgb_to_bgr(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for px in payload.chunks_exact(3) {
        out.push(px[2]);
        out.push(px[1]);
        out.push(px[0]);
    }
    out
}

/// Replicate a grayscale buffer into three BGR channels.
fn mono_to_bgr(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() * 3);
    for &v in payload {
        out.push(v);
        out.push(v);
        out.push(v);
    }
    out
}

/// Demosaic an RGGB Bayer mosaic to full-resolution BGR.
///
/// Each output pixel samples its 2x2 quad: red from the top-left site,
/// green averaged from the two green sites, blue from the bottom-right
/// site. Quads are clamped at the right/bottom edges for odd dimensions.
fn demosaic_rggb_to_bgr(payload: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; width * height * 3];
    let at = |x: usize, y: usize| payload[y * width + x];

    for y in 0..height {
        let qy = y & !1;
        let qy1 = (qy + 1).min(height - 1);
        for x in 0..width {
            let qx = x & !1;
            let qx1 = (qx + 1).min(width - 1);

            let r = at(qx, qy);
            let g = ((at(qx1, qy) as u16 + at(qx, qy1) as u16) / 2) as u8;
            let b = at(qx1, qy1);

            let o = (y * width + x) * 3;
            out[o] = b;
            out[o + 1] = g;
            out[o + 2] = r;
        }
    }
    out
}
