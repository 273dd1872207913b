//! Live frame cache
//!
//! ## Responsibilities
//!
//! - Hold the most recent frame per device for live views
//! - Serve readers without waiting on the durable store or alert rules
//!
//! Entries are replaced on every frame and never expire; a device that goes
//! quiet keeps showing its last frame. Image bytes are shared (`Arc<[u8]>`)
//! with the durable write, so an update never copies the image.
//!
//! The lock is only held to swap or clone an `Arc<LiveFrame>`; nothing is
//! awaited or copied under it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::model::FrameImage;

/// The latest frame of one device
#[derive(Debug, Clone, PartialEq)]
pub struct LiveFrame {
    pub image: FrameImage,
    pub received_at: DateTime<Utc>,
}

/// Per-device latest frame
#[derive(Debug, Default)]
pub struct FrameCache {
    frames: RwLock<HashMap<String, Arc<LiveFrame>>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a device's frame; the last write wins
    pub fn update(&self, device_id: &str, image: FrameImage, received_at: DateTime<Utc>) {
        let frame = Arc::new(LiveFrame {
            image,
            received_at,
        });
        self.frames
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.to_string(), frame);
    }

    /// Most recent frame of a device
    pub fn latest(&self, device_id: &str) -> Option<Arc<LiveFrame>> {
        self.frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    /// Devices with a cached frame, sorted
    pub fn devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.frames.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
