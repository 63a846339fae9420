//! Offline-channel placeholder frames.
//!
//! When a stream endpoint finds its channel empty, it serves a synthetic
//! frame instead of an error: dark background, colored border, channel
//! label and a live wall clock so a viewer can tell the stream itself is
//! alive even though the camera is not.

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use once_cell::sync::Lazy;

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Overlay font compiled into the binary, so placeholders render the same
/// on hosts with no fonts installed.
static OVERLAY_FONT: Lazy<FontRef<'static>> = Lazy::new(|| {
    FontRef::try_from_slice(include_bytes!("../../assets/DejaVuSans.ttf"))
        .expect("embedded font is a valid TTF")
});

/// Renders "camera offline" frames for one channel.
pub struct PlaceholderGenerator {
    label: String,
    border: Rgb<u8>,
}

impl PlaceholderGenerator {
    pub fn new(label: impl Into<String>, border: Rgb<u8>) -> Self {
        Self {
            label: label.into(),
            border,
        }
    }

    /// Standard offline placeholder for a named channel.
    pub fn offline(channel: &str) -> Self {
        Self::new(
            format!("{} CAM OFFLINE", channel.to_uppercase()),
            Rgb([100, 0, 0]),
        )
    }

    /// Render one placeholder frame with the current wall-clock time.
    pub fn render(&self) -> RgbImage {
        let clock = chrono::Local::now().format("%H:%M:%S").to_string();
        self.render_with_clock(&clock)
    }

    fn render_with_clock(&self, clock: &str) -> RgbImage {
        let mut img = RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
        for offset in 0..2 {
            draw_hollow_rect_mut(
                &mut img,
                Rect::at(offset, offset).of_size(
                    PLACEHOLDER_WIDTH - 2 * offset as u32,
                    PLACEHOLDER_HEIGHT - 2 * offset as u32,
                ),
                self.border,
            );
        }

        let font = &*OVERLAY_FONT;
        draw_text_mut(
            &mut img,
            WHITE,
            100,
            240,
            PxScale::from(32.0),
            font,
            &self.label,
        );
        draw_text_mut(&mut img, WHITE, 10, 50, PxScale::from(26.0), font, clock);

        img
    }
}
