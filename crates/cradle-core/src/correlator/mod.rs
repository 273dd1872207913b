//! Recording correlator
//!
//! After an alert fires for a device, every reading and frame from that
//! device that arrives during the following recording window is stamped with
//! the alert's id. The window is a two-state machine per device:
//!
//! ```text
//!            alert fired                 alert fired
//!   Idle ─────────────────▶ Recording ──────────────┐
//!    ▲                        │   ▲                 │ (overwrite)
//!    │  message after window  │   └─────────────────┘
//!    └────────────────────────┘
//! ```
//!
//! Expiry is evaluated lazily when the next message for the device arrives.
//! A window left open on a silent device stays open in memory but never
//! stamps anything once its time is up.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::{AlertId, elapsed_since};

/// An open recording window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordingWindow {
    pub alert_id: AlertId,
    pub started_at: DateTime<Utc>,
}

/// Correlator state for one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording(RecordingWindow),
}

impl RecordingState {
    pub fn window(&self) -> Option<&RecordingWindow> {
        match self {
            Self::Idle => None,
            Self::Recording(window) => Some(window),
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording(_))
    }

    /// Close the window if more than `length` has passed since it opened
    ///
    /// Returns the closed window. Elapsed time is clamped at zero, so a
    /// message whose timestamp precedes the window never closes it.
    pub fn expire(&mut self, now: DateTime<Utc>, length: Duration) -> Option<RecordingWindow> {
        match *self {
            Self::Recording(window) if elapsed_since(now, window.started_at) > length => {
                *self = Self::Idle;
                Some(window)
            }
            _ => None,
        }
    }

    /// Alert id to stamp on a message received at `now`
    ///
    /// Only messages strictly later than the window start are stamped; the
    /// message that fired the alert is never its own recording.
    pub fn correlation_id(&self, now: DateTime<Utc>) -> Option<AlertId> {
        match self {
            Self::Recording(window) if now > window.started_at => Some(window.alert_id),
            _ => None,
        }
    }

    /// Open a window for a newly fired alert
    ///
    /// A window already open is replaced and returned.
    pub fn open(&mut self, alert_id: AlertId, now: DateTime<Utc>) -> Option<RecordingWindow> {
        let previous = self.window().copied();
        *self = Self::Recording(RecordingWindow {
            alert_id,
            started_at: now,
        });
        previous
    }
}
