//! Application configuration.
//!
//! A single JSON file with `video`, `behavior`, `tracker` and `server`
//! sections. Every field has a default, so a partial file (or none at
//! all) still yields a runnable configuration.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::behavior::BehaviorConfig;
use crate::camera::ChannelConfig;
use crate::frame::PixelLayout;

/// Camera/source settings shared by both channels.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Device address of the top-view camera; `None` disables the channel.
    pub top_source: Option<String>,
    /// Device address of the side-view camera; `None` disables the channel.
    pub side_source: Option<String>,
    /// Exposure time in microseconds.
    pub exposure_time: f64,
    pub fps: f64,
    /// Driver pixel-format feature name, e.g. "BayerRG8".
    pub pixel_format: String,
    /// Working resolution at the annotator boundary.
    pub width: u32,
    pub height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            top_source: None,
            side_source: None,
            exposure_time: 20_000.0,
            fps: 30.0,
            pixel_format: "BayerRG8".to_string(),
            width: 960,
            height: 720,
        }
    }
}

/// Behavior-classification thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorThresholds {
    pub dead_velocity_threshold: f64,
    pub dead_time_threshold: f64,
    pub top_zone: f64,
    pub bottom_zone: f64,
}

impl Default for BehaviorThresholds {
    fn default() -> Self {
        let defaults = BehaviorConfig::default();
        Self {
            dead_velocity_threshold: defaults.dead_velocity_threshold,
            dead_time_threshold: defaults.dead_time_threshold,
            top_zone: defaults.top_zone,
            bottom_zone: defaults.bottom_zone,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Position history horizon in seconds.
    pub memory: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { memory: 10.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub video: VideoConfig,
    pub behavior: BehaviorThresholds,
    pub tracker: TrackerConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Assemble the tracker-side view of the configuration.
    pub fn behavior_config(&self) -> BehaviorConfig {
        BehaviorConfig {
            frame_width: self.video.width as f64,
            frame_height: self.video.height as f64,
            frame_rate: self.video.fps,
            memory_secs: self.tracker.memory,
            dead_velocity_threshold: self.behavior.dead_velocity_threshold,
            dead_time_threshold: self.behavior.dead_time_threshold,
            top_zone: self.behavior.top_zone,
            bottom_zone: self.behavior.bottom_zone,
        }
    }

    /// Build one channel's acquisition settings from the video section.
    ///
    /// An unrecognized `pixel_format` falls back to the default layout
    /// rather than failing; the worker's negotiation cascade covers the
    /// rest.
    pub fn channel_config(&self, name: &str, address: &str) -> ChannelConfig {
        let mut channel = ChannelConfig::new(name, address);
        channel.exposure_us = self.video.exposure_time;
        channel.frame_rate = self.video.fps;
        if let Some(layout) = PixelLayout::from_feature_name(&self.video.pixel_format) {
            channel.pixel_layout = layout;
        } else {
            tracing::warn!(
                pixel_format = %self.video.pixel_format,
                "unknown pixel format in config, keeping default"
            );
        }
        channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_runnable() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.video.fps, 30.0);
        assert!(config.video.top_source.is_none());
        let behavior = config.behavior_config();
        assert_eq!(behavior.frame_height, 720.0);
        assert_eq!(behavior.memory_secs, 10.0);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "video": {"top_source": "192.168.1.10", "fps": 15},
                "server": {"port": 9000}
            }"#,
        )
        .unwrap();
        assert_eq!(config.video.top_source.as_deref(), Some("192.168.1.10"));
        assert_eq!(config.video.fps, 15.0);
        assert_eq!(config.video.exposure_time, 20_000.0);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.behavior.bottom_zone, 0.8);
    }

    #[test]
    fn test_channel_config_from_video_section() {
        let mut config = AppConfig::default();
        config.video.exposure_time = 5_000.0;
        config.video.pixel_format = "Mono8".to_string();
        let channel = config.channel_config("top", "192.168.1.10");
        assert_eq!(channel.name, "top");
        assert_eq!(channel.exposure_us, 5_000.0);
        assert_eq!(channel.pixel_layout, PixelLayout::Mono);
    }

    #[test]
    fn test_unknown_pixel_format_keeps_default() {
        let mut config = AppConfig::default();
        config.video.pixel_format = "YUV422".to_string();
        let channel = config.channel_config("side", "x");
        assert_eq!(channel.pixel_layout, PixelLayout::RawBayer);
    }
}
