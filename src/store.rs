//! Shared latest-frame store.
//!
//! One slot per logical channel, each behind its own lock so a stall on
//! one channel never blocks the other. Writers replace the whole slot;
//! readers get a private copy. Partial writes are never observable.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::frame::Frame;

/// A frame read back from the store, with its write metadata.
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub frame: Frame,
    /// Wall-clock time of the write, unix seconds.
    pub updated_unix: f64,
    /// Monotonically increasing write counter for the channel.
    pub seq: u64,
}

/// Per-channel activity snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub active: bool,
    pub updates: u64,
    /// Unix seconds of the last update, 0.0 if never written.
    pub last_update: f64,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    updated_unix: f64,
    seq: u64,
}

/// Process-wide table of named frame channels.
///
/// The channel set is fixed at construction; the store is created once,
/// wrapped in an `Arc` and passed to every component that needs it.
pub struct SharedFrameStore {
    channels: Vec<(String, Mutex<Slot>)>,
}

impl SharedFrameStore {
    pub fn new<S: AsRef<str>>(channel_names: &[S]) -> Self {
        let channels = channel_names
            .iter()
            .map(|name| (name.as_ref().to_string(), Mutex::new(Slot::default())))
            .collect();
        Self { channels }
    }

    fn slot(&self, channel: &str) -> Option<&Mutex<Slot>> {
        self.channels
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, slot)| slot)
    }

    /// Replace the channel's frame, stamp the time and bump the counter.
    ///
    /// An empty update still stamps and counts, so liveness of the writer
    /// stays visible in `snapshot_info` even when nothing decodes.
    /// Returns false for an unknown channel.
    pub fn update(&self, channel: &str, frame: Option<Frame>) -> bool {
        let Some(slot) = self.slot(channel) else {
            tracing::warn!("update for unknown channel {channel}");
            return false;
        };
        let mut slot = slot.lock().unwrap();
        slot.frame = frame;
        slot.updated_unix = unix_now();
        slot.seq += 1;
        true
    }

    /// Private copy of the channel's latest frame, or `None` when empty.
    pub fn read(&self, channel: &str) -> Option<StoredFrame> {
        let slot = self.slot(channel)?;
        let slot = slot.lock().unwrap();
        slot.frame.as_ref().map(|frame| StoredFrame {
            frame: frame.clone(),
            updated_unix: slot.updated_unix,
            seq: slot.seq,
        })
    }

    /// Activity snapshot of every channel, in construction order.
    pub fn snapshot_info(&self) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .map(|(name, slot)| {
                let slot = slot.lock().unwrap();
                ChannelInfo {
                    name: name.clone(),
                    active: slot.frame.is_some(),
                    updates: slot.seq,
                    last_update: slot.updated_unix,
                }
            })
            .collect()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|(name, _)| name.clone()).collect()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn frame(tag: u8) -> Frame {
        Frame::from_bgr(vec![tag; 12], 2, 2, SystemTime::now())
    }

    fn store() -> SharedFrameStore {
        SharedFrameStore::new(&["top", "side"])
    }

    #[test]
    fn test_empty_channel_reads_none() {
        let store = store();
        assert!(store.read("top").is_none());
    }

    #[test]
    fn test_second_write_wins() {
        let store = store();
        store.update("top", Some(frame(1)));
        store.update("top", Some(frame(2)));
        let read = store.read("top").unwrap();
        assert_eq!(read.frame.data[0], 2);
        assert_eq!(read.seq, 2);
    }

    #[test]
    fn test_read_is_idempotent_between_writes() {
        let store = store();
        store.update("top", Some(frame(9)));
        let a = store.read("top").unwrap();
        let b = store.read("top").unwrap();
        assert_eq!(a.seq, b.seq);
        assert_eq!(a.frame.data, b.frame.data);

        store.update("top", Some(frame(10)));
        let c = store.read("top").unwrap();
        assert_eq!(c.seq, a.seq + 1);
    }

    #[test]
    fn test_empty_update_still_counts() {
        let store = store();
        store.update("top", None);
        assert!(store.read("top").is_none());
        let info = store.snapshot_info();
        let top = info.iter().find(|c| c.name == "top").unwrap();
        assert!(!top.active);
        assert_eq!(top.updates, 1);
        assert!(top.last_update > 0.0);
    }

    #[test]
    fn test_channels_are_independent() {
        let store = store();
        store.update("top", Some(frame(1)));
        assert!(store.read("side").is_none());
        store.update("side", Some(frame(2)));
        assert_eq!(store.read("top").unwrap().seq, 1);
        assert_eq!(store.read("side").unwrap().seq, 1);
    }

    #[test]
    fn test_unknown_channel_is_rejected() {
        let store = store();
        assert!(!store.update("bottom", Some(frame(1))));
        assert!(store.read("bottom").is_none());
    }

    #[test]
    fn test_snapshot_reports_activity() {
        let store = store();
        store.update("top", Some(frame(1)));
        let info = store.snapshot_info();
        assert_eq!(info.len(), 2);
        let top = info.iter().find(|c| c.name == "top").unwrap();
        let side = info.iter().find(|c| c.name == "side").unwrap();
        assert!(top.active);
        assert!(!side.active);
        assert_eq!(side.updates, 0);
        assert_eq!(side.last_update, 0.0);
    }
}
