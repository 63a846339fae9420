//! Synthetic camera driver for tests and bench runs without hardware.
//!
//! Produces a moving gradient so consecutive frames are distinguishable.
//! Failure injection covers the paths the worker has to contain: refused
//! connections, transient connect failures and rejected pixel formats.

use std::time::{Duration, Instant};

use super::{
    BufferStatus, CameraDriver, CameraError, CameraHandle, DriverBuffer, FeatureValue,
};
use crate::frame::PixelLayout;

/// Mock camera factory; see module docs.
#[derive(Debug, Clone)]
pub struct MockCamera {
    width: u32,
    height: u32,
    layout: PixelLayout,
    connect_failures: u32,
    refuse_all: bool,
    rejected_layouts: Vec<PixelLayout>,
    frame_period: Duration,
}

impl MockCamera {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            layout,
            connect_failures: 0,
            refuse_all: false,
            rejected_layouts: Vec::new(),
            frame_period: Duration::from_millis(10),
        }
    }

    /// Fail the first `count` connection attempts, then succeed.
    pub fn with_connect_failures(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    /// Refuse every connection attempt.
    pub fn refuse_connections(mut self) -> Self {
        self.refuse_all = true;
        self
    }

    /// Reject `PixelFormat` writes selecting the given layout.
    pub fn reject_layout(mut self, layout: PixelLayout) -> Self {
        self.rejected_layouts.push(layout);
        self
    }

    /// Interval between synthesized frames.
    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = period;
        self
    }
}

impl CameraDriver for MockCamera {
    type Handle = MockHandle;

    fn connect(&mut self, address: &str) -> Result<MockHandle, CameraError> {
        if self.refuse_all {
            return Err(CameraError::ConnectFailed {
                address: address.to_string(),
                reason: "device unreachable".to_string(),
            });
        }
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(CameraError::ConnectFailed {
                address: address.to_string(),
                reason: "transient failure".to_string(),
            });
        }
        Ok(MockHandle {
            width: self.width,
            height: self.height,
            layout: self.layout,
            rejected_layouts: self.rejected_layouts.clone(),
            frame_period: self.frame_period,
            acquiring: false,
            frame_counter: 0,
            last_frame: Instant::now(),
        })
    }
}

/// Open connection to a [`MockCamera`].
pub struct MockHandle {
    width: u32,
    height: u32,
    layout: PixelLayout,
    rejected_layouts: Vec<PixelLayout>,
    frame_period: Duration,
    acquiring: bool,
    frame_counter: u64,
    last_frame: Instant,
}

impl MockHandle {
    fn synthesize_payload(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let t = self.frame_counter as usize;
        let mut payload = Vec::with_capacity(w * h * self.layout.bytes_per_pixel());
        for y in 0..h {
            for x in 0..w {
                let v = ((x + y + t) % 256) as u8;
                match self.layout {
                    PixelLayout::Mono | PixelLayout::RawBayer => payload.push(v),
                    PixelLayout::Rgb | PixelLayout::Bgr => {
                        payload.push(v);
                        payload.push(v.wrapping_add(64));
                        payload.push(v.wrapping_add(128));
                    }
                }
            }
        }
        payload
    }
}

impl CameraHandle for MockHandle {
    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
        if name == "PixelFormat" {
            let FeatureValue::Str(requested) = value else {
                return Err(CameraError::FeatureRejected {
                    name: name.to_string(),
                    reason: "expected a string value".to_string(),
                });
            };
            let Some(layout) = PixelLayout::from_feature_name(&requested) else {
                return Err(CameraError::FeatureRejected {
                    name: name.to_string(),
                    reason: format!("unknown format {requested}"),
                });
            };
            if self.rejected_layouts.contains(&layout) {
                return Err(CameraError::FeatureRejected {
                    name: name.to_string(),
                    reason: format!("{requested} not supported by device"),
                });
            }
            self.layout = layout;
        }
        // Every other feature write is accepted silently.
        Ok(())
    }

    fn pixel_layout(&self) -> PixelLayout {
        self.layout
    }

    fn dimensions(&self) -> Result<(u32, u32), CameraError> {
        Ok((self.width, self.height))
    }

    fn allocate_buffers(&mut self, _count: usize) -> Result<(), CameraError> {
        Ok(())
    }

    fn start_acquisition(&mut self) -> Result<(), CameraError> {
        self.acquiring = true;
        self.last_frame = Instant::now();
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), CameraError> {
        self.acquiring = false;
        Ok(())
    }

    fn pop_buffer(&mut self, timeout: Duration) -> Result<Option<DriverBuffer>, CameraError> {
        if !self.acquiring {
            return Err(CameraError::Driver("acquisition not started".to_string()));
        }
        let since_last = self.last_frame.elapsed();
        if since_last < self.frame_period {
            let wait = self.frame_period - since_last;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }
        self.last_frame = Instant::now();
        self.frame_counter += 1;
        Ok(Some(DriverBuffer {
            status: BufferStatus::Success,
            data: self.synthesize_payload(),
        }))
    }

    fn push_buffer(&mut self, _buffer: DriverBuffer) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failure_injection() {
        let mut driver = MockCamera::new(2, 2, PixelLayout::Mono).with_connect_failures(2);
        assert!(driver.connect("mock://0").is_err());
        assert!(driver.connect("mock://0").is_err());
        assert!(driver.connect("mock://0").is_ok());
    }

    #[test]
    fn test_frames_advance() {
        let mut driver = MockCamera::new(2, 2, PixelLayout::Mono);
        let mut handle = driver.connect("mock://0").unwrap();
        handle.start_acquisition().unwrap();
        let a = handle
            .pop_buffer(Duration::from_millis(50))
            .unwrap()
            .unwrap();
        let b = handle
            .pop_buffer(Duration::from_millis(50))
            .unwrap()
            .unwrap();
        assert_eq!(a.status, BufferStatus::Success);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_pop_before_start_fails() {
        let mut driver = MockCamera::new(2, 2, PixelLayout::Mono);
        let mut handle = driver.connect("mock://0").unwrap();
        assert!(handle.pop_buffer(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_rejected_layout() {
        let mut driver = MockCamera::new(2, 2, PixelLayout::Rgb).reject_layout(PixelLayout::RawBayer);
        let mut handle = driver.connect("mock://0").unwrap();
        assert!(handle
            .set_feature("PixelFormat", FeatureValue::str("BayerRG8"))
            .is_err());
        assert!(handle
            .set_feature("PixelFormat", FeatureValue::str("RGB8Packed"))
            .is_ok());
    }
}
