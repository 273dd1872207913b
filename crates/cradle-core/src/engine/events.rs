//! Engine events for external monitoring

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::model::{AlertId, AlertKind, FrameId, ReadingId, ReadingKind};

/// Events emitted by the CradleEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started { partitions: usize },

    /// Engine stopped after draining
    Stopped { reason: String },

    /// A message was discarded (bad topic, unknown device, bad payload)
    MessageDropped { origin: String, reason: String },

    /// A reading row was written
    ReadingPersisted {
        device_id: String,
        reading_id: ReadingId,
        kind: ReadingKind,
        alert_id: Option<AlertId>,
    },

    /// A frame row was written
    FramePersisted {
        device_id: String,
        frame_id: FrameId,
        alert_id: Option<AlertId>,
    },

    /// An alert record was created
    AlertFired {
        device_id: String,
        alert_id: AlertId,
        kind: AlertKind,
    },

    /// A rule fired inside the de-duplication window of an unresolved alert
    AlertSuppressed { device_id: String, kind: AlertKind },

    /// A recording window opened
    RecordingStarted { device_id: String, alert_id: AlertId },

    /// A recording window expired or was replaced by a newer alert
    RecordingClosed { device_id: String, alert_id: AlertId },

    /// A durable write failed; in-memory state was kept
    PersistenceFailed { device_id: String, error: String },

    /// The notifier delivered an alert
    NotificationSent { alert_id: AlertId },

    /// The notifier failed to deliver an alert
    NotificationFailed { alert_id: AlertId, error: String },
}

/// Non-blocking event sender
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Emit an engine event
    ///
    /// Never waits: when the channel is full the event is dropped with a
    /// warning. A closed channel means nobody is listening.
    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            warn!(
                "Event channel full, dropping {:?}. Consider increasing event_channel_capacity.",
                event
            );
        }
    }
}
