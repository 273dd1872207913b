//! Ingestion router
//!
//! Turns one bus message into its effects, in this order:
//!
//! 1. Check the device is registered (unknown devices are dropped)
//! 2. Decode the payload (malformed payloads are dropped)
//! 3. Frames: refresh the live frame cache
//! 4. Expire the recording window, pick up the correlation id
//! 5. Readings: update device state, run the alert rules
//! 6. Persist the reading or frame, stamped with the correlation id
//! 7. Create alert records for candidates that are not de-duplicated and
//!    open a recording window for each
//!
//! Steps 4 and 5 happen under the device's state lock; nothing is awaited
//! there. Persistence failures are reported and never undo the state change.
//!
//! The router assumes messages of one device are not ingested concurrently.
//! [`CradleEngine`](crate::engine::CradleEngine) guarantees this by hashing
//! each device onto a single partition worker.

pub mod decode;
pub mod topic;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineEvent, EventSink};
use crate::error::{Error, Result};
use crate::evaluator::{AlertCandidate, AlertEvaluator};
use crate::frame_cache::FrameCache;
use crate::model::{
    AlertId, AlertKind, AlertRecord, AlertThresholds, Device, FrameId, FrameImage, NewAlert,
    NewFrame, NewReading, ReadingId, ReadingValue, TelemetryKind,
};
use crate::traits::{BusMessage, DeviceRegistry, TelemetryStore};
use crate::tracker::DeviceStateStore;

pub use decode::{Decoded, decode_frame, decode_payload};
pub use topic::{TopicRoute, parse_topic, subscription_filters, topic_for};

/// An alert created while ingesting a message
#[derive(Debug, Clone, PartialEq)]
pub struct FiredAlert {
    pub alert: AlertRecord,
    /// Whether the device's owner wants push notifications
    pub push: bool,
}

/// What happened to one accepted message
#[derive(Debug)]
pub struct IngestReport {
    pub device_id: String,
    pub kind: TelemetryKind,
    /// Alert id the message was stamped with
    pub alert_id: Option<AlertId>,
    pub reading_id: Option<ReadingId>,
    pub frame_id: Option<FrameId>,
    pub fired: Vec<FiredAlert>,
    pub suppressed: Vec<AlertKind>,
    /// Non-fatal failures (rule faults, store errors)
    pub errors: Vec<Error>,
}

impl IngestReport {
    fn new(device_id: &str, kind: TelemetryKind) -> Self {
        Self {
            device_id: device_id.to_string(),
            kind,
            alert_id: None,
            reading_id: None,
            frame_id: None,
            fired: Vec::new(),
            suppressed: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Whether the message reached the durable store
    pub fn persisted(&self) -> bool {
        self.reading_id.is_some() || self.frame_id.is_some()
    }
}

/// Routes decoded telemetry through state, rules and persistence
pub struct IngestionRouter {
    registry: Arc<dyn DeviceRegistry>,
    store: Arc<dyn TelemetryStore>,
    states: Arc<DeviceStateStore>,
    frames: Arc<FrameCache>,
    evaluator: AlertEvaluator,
    topic_prefix: String,
    events: EventSink,
}

impl IngestionRouter {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        store: Arc<dyn TelemetryStore>,
        states: Arc<DeviceStateStore>,
        frames: Arc<FrameCache>,
        evaluator: AlertEvaluator,
        topic_prefix: impl Into<String>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            registry,
            store,
            states,
            frames,
            evaluator,
            topic_prefix: topic_prefix.into(),
            events: EventSink::new(events),
        }
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Route a raw bus message
    pub async fn ingest_message(&self, message: &BusMessage) -> Result<IngestReport> {
        let route = match parse_topic(&self.topic_prefix, &message.topic) {
            Ok(route) => route,
            Err(e) => {
                self.reject(&message.topic, &e);
                return Err(e);
            }
        };
        self.ingest(&route.device_id, route.kind, &message.payload, message.received_at)
            .await
    }

    /// Route one message whose device and kind are already known
    ///
    /// # Returns
    ///
    /// - `Ok(IngestReport)`: The message was accepted
    /// - `Err(Error::UnknownDevice | Error::Decode)`: Dropped, nothing changed
    /// - `Err(Error::Persistence)`: The registry could not be read; dropped
    pub async fn ingest(
        &self,
        device_id: &str,
        kind: TelemetryKind,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<IngestReport> {
        match self.accept(device_id, kind, payload).await {
            Ok((device, decoded)) => {
                let mut report = IngestReport::new(device_id, kind);
                match decoded {
                    Decoded::Frame(image) => {
                        self.ingest_frame(&device, image, received_at, &mut report)
                            .await
                    }
                    Decoded::Reading(value) => {
                        self.ingest_reading(&device, value, received_at, &mut report)
                            .await
                    }
                }
                Ok(report)
            }
            Err(e) => {
                self.reject(device_id, &e);
                Err(e)
            }
        }
    }

    async fn accept(
        &self,
        device_id: &str,
        kind: TelemetryKind,
        payload: &[u8],
    ) -> Result<(Device, Decoded)> {
        let device = self
            .registry
            .lookup_device(device_id)
            .await?
            .ok_or_else(|| Error::unknown_device(device_id))?;
        let decoded = decode_payload(kind, payload)?;
        Ok((device, decoded))
    }

    /// Log and report a dropped message
    pub(crate) fn reject(&self, origin: &str, error: &Error) {
        if error.is_drop() {
            warn!("Dropping message from {}: {}", origin, error);
        } else {
            error!("Dropping message from {}: {}", origin, error);
        }
        self.events.emit(EngineEvent::MessageDropped {
            origin: origin.to_string(),
            reason: error.to_string(),
        });
    }

    async fn ingest_frame(
        &self,
        device: &Device,
        image: FrameImage,
        at: DateTime<Utc>,
        report: &mut IngestReport,
    ) {
        self.frames.update(&device.id, image.clone(), at);

        let window = self.evaluator.policy().recording_window();
        let (closed, alert_id) = self.states.with_state(&device.id, |state| {
            let closed = state.recording.expire(at, window);
            state.touch(at);
            (closed, state.recording.correlation_id(at))
        });
        if let Some(closed) = closed {
            self.recording_closed(&device.id, closed.alert_id);
        }
        report.alert_id = alert_id;

        let frame = NewFrame {
            device_id: device.id.clone(),
            image,
            alert_id,
            captured_at: at,
        };
        match self.store.insert_frame(&frame).await {
            Ok(id) => {
                debug!(
                    "Stored frame {} for {} ({} bytes, alert {:?})",
                    id,
                    device.id,
                    frame.image.size_bytes(),
                    alert_id
                );
                report.frame_id = Some(id);
                self.events.emit(EngineEvent::FramePersisted {
                    device_id: device.id.clone(),
                    frame_id: id,
                    alert_id,
                });
            }
            Err(e) => self.persistence_failed(&device.id, e, report),
        }
    }

    async fn ingest_reading(
        &self,
        device: &Device,
        value: ReadingValue,
        at: DateTime<Utc>,
        report: &mut IngestReport,
    ) {
        let thresholds = match self.registry.alert_thresholds(&device.id).await {
            Ok(Some(thresholds)) => thresholds,
            Ok(None) => self.evaluator.policy().default_thresholds.clone(),
            Err(e) => {
                warn!(
                    "Could not load alert thresholds for {}, using defaults: {}",
                    device.id, e
                );
                report.errors.push(e);
                self.evaluator.policy().default_thresholds.clone()
            }
        };

        let window = self.evaluator.policy().recording_window();
        let (closed, alert_id, evaluation) = self.states.with_state(&device.id, |state| {
            let closed = state.recording.expire(at, window);
            let alert_id = state.recording.correlation_id(at);
            state.apply(&value, at);
            let evaluation = self.evaluator.evaluate(&value, state, &thresholds, at);
            (closed, alert_id, evaluation)
        });
        if let Some(closed) = closed {
            self.recording_closed(&device.id, closed.alert_id);
        }
        report.alert_id = alert_id;

        for e in evaluation.errors {
            warn!("Alert rule skipped for {}: {}", device.id, e);
            report.errors.push(e);
        }

        let reading = NewReading {
            device_id: device.id.clone(),
            value,
            alert_id,
            recorded_at: at,
        };
        match self.store.insert_reading(&reading).await {
            Ok(id) => {
                debug!(
                    "Stored {} reading {} for {} (alert {:?})",
                    value.kind().as_str(),
                    id,
                    device.id,
                    alert_id
                );
                report.reading_id = Some(id);
                self.events.emit(EngineEvent::ReadingPersisted {
                    device_id: device.id.clone(),
                    reading_id: id,
                    kind: value.kind(),
                    alert_id,
                });
            }
            Err(e) => self.persistence_failed(&device.id, e, report),
        }

        for candidate in evaluation.candidates {
            self.raise(device, candidate, &thresholds, at, report).await;
        }
    }

    /// Turn a rule candidate into an alert record and open its recording
    async fn raise(
        &self,
        device: &Device,
        candidate: AlertCandidate,
        thresholds: &AlertThresholds,
        at: DateTime<Utc>,
        report: &mut IngestReport,
    ) {
        match self
            .evaluator
            .is_suppressed(self.store.as_ref(), &device.id, &candidate, at)
            .await
        {
            Ok(true) => {
                debug!(
                    "{} alert for {} suppressed by an earlier unresolved alert",
                    candidate.kind, device.id
                );
                report.suppressed.push(candidate.kind);
                self.events.emit(EngineEvent::AlertSuppressed {
                    device_id: device.id.clone(),
                    kind: candidate.kind,
                });
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Skipping {} alert for {}: de-duplication lookup failed: {}",
                    candidate.kind, device.id, e
                );
                report.errors.push(e);
                return;
            }
        }

        let new_alert = NewAlert {
            device_id: device.id.clone(),
            owner_id: device.owner_id,
            kind: candidate.kind,
            message: candidate.message,
            temperature: candidate.temperature,
            face_detected: candidate.face_detected,
            created_at: at,
        };
        let alert = match self.store.insert_alert(&new_alert).await {
            Ok(alert) => alert,
            Err(e) => {
                self.persistence_failed(&device.id, e, report);
                return;
            }
        };
        info!(
            "Alert {} ({}) for {}: {}",
            alert.id, alert.kind, device.id, alert.message
        );

        let replaced = self
            .states
            .with_state(&device.id, |state| state.recording.open(alert.id, at));
        if let Some(replaced) = replaced {
            self.recording_closed(&device.id, replaced.alert_id);
        }

        self.events.emit(EngineEvent::AlertFired {
            device_id: device.id.clone(),
            alert_id: alert.id,
            kind: alert.kind,
        });
        self.events.emit(EngineEvent::RecordingStarted {
            device_id: device.id.clone(),
            alert_id: alert.id,
        });

        report.fired.push(FiredAlert {
            alert,
            push: thresholds.push_notifications_enabled,
        });
    }

    fn recording_closed(&self, device_id: &str, alert_id: AlertId) {
        debug!("Recording for alert {} on {} closed", alert_id, device_id);
        self.events.emit(EngineEvent::RecordingClosed {
            device_id: device_id.to_string(),
            alert_id,
        });
    }

    fn persistence_failed(&self, device_id: &str, e: Error, report: &mut IngestReport) {
        error!("Failed to persist telemetry for {}: {}", device_id, e);
        self.events.emit(EngineEvent::PersistenceFailed {
            device_id: device_id.to_string(),
            error: e.to_string(),
        });
        report.errors.push(e);
    }
}
