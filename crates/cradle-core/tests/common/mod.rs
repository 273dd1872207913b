//! Test doubles and common utilities for contract tests
//!
//! This module provides minimal test doubles that let the contract tests
//! drive the engine deterministically and observe its side effects.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use cradle_core::error::{Error, Result};
use cradle_core::model::{
    AlertDetail, AlertId, AlertKind, AlertRecord, AlertThresholds, Device, Frame, FrameId,
    NewAlert, NewFrame, NewReading, Reading, ReadingId, ReadingKind,
};
use cradle_core::traits::{
    BusMessage, DeviceRegistry, Notifier, TelemetrySource, TelemetryStore,
};
use cradle_core::{CradleConfig, CradleEngine, EngineEvent, MemoryTelemetryStore};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Fixed reference time; tests express time as seconds after it
pub fn t(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

/// A bus message on `cradle/<device>/<kind>` received at `t(secs)`
pub fn message(device_id: &str, kind: &str, payload: &str, secs: i64) -> BusMessage {
    BusMessage::received_at(
        format!("cradle/{}/{}", device_id, kind),
        payload.as_bytes().to_vec(),
        t(secs),
    )
}

pub fn temperature(device_id: &str, celsius: f64, secs: i64) -> BusMessage {
    message(
        device_id,
        "temperature",
        &format!(r#"{{"temperature": {}}}"#, celsius),
        secs,
    )
}

pub fn crying(device_id: &str, status: &str, secs: i64) -> BusMessage {
    message(
        device_id,
        "crying",
        &format!(r#"{{"status": "{}", "probability": 0.9}}"#, status),
        secs,
    )
}

pub fn direction(device_id: &str, label: &str, secs: i64) -> BusMessage {
    message(
        device_id,
        "direction",
        &format!(r#"{{"direction": "{}"}}"#, label),
        secs,
    )
}

/// A real PNG of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn frame(device_id: &str, secs: i64) -> BusMessage {
    let payload = serde_json::json!({ "frame": BASE64_STANDARD.encode(png_bytes(8, 6)) });
    message(device_id, "frame", &payload.to_string(), secs)
}

/// A memory store with the given devices registered
pub async fn store_with_devices(device_ids: &[&str]) -> Arc<MemoryTelemetryStore> {
    let store = Arc::new(MemoryTelemetryStore::new());
    for (i, id) in device_ids.iter().enumerate() {
        store
            .register_device(id, &format!("192.168.0.{}", 10 + i))
            .await
            .unwrap();
        store.assign_owner(id, 1 + i as i64).await.unwrap();
    }
    store
}

/// Helper to create a minimal CradleConfig for testing
pub fn minimal_config() -> CradleConfig {
    let mut config = CradleConfig::new();
    config.engine.partitions = 2;
    config.engine.partition_queue_capacity = 64;
    config.engine.event_channel_capacity = 1000;
    config
}

/// An engine over a memory store that never receives bus traffic
///
/// Tests feed messages through `engine.router()` for step-by-step control.
pub fn idle_engine(
    store: Arc<MemoryTelemetryStore>,
    config: CradleConfig,
) -> (CradleEngine, mpsc::Receiver<EngineEvent>) {
    CradleEngine::new(
        Box::new(IdleSource),
        store.clone(),
        store,
        None,
        config,
    )
    .expect("engine construction succeeds")
}

/// Everything currently waiting in the event channel
pub fn drain_events(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A source fed by the test through a channel
///
/// The stream ends when every sender is dropped.
pub struct ControlledSource {
    engine_rx: Mutex<Option<mpsc::UnboundedReceiver<BusMessage>>>,
    watch_call_count: Arc<AtomicUsize>,
    shutdown_call_count: Arc<AtomicUsize>,
}

impl ControlledSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<BusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            engine_rx: Mutex::new(Some(rx)),
            watch_call_count: Arc::new(AtomicUsize::new(0)),
            shutdown_call_count: Arc::new(AtomicUsize::new(0)),
        };
        (source, tx)
    }

    /// Counter handles that outlive the source once it moves into an engine
    pub fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (
            self.watch_call_count.clone(),
            self.shutdown_call_count.clone(),
        )
    }
}

#[async_trait]
impl TelemetrySource for ControlledSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = BusMessage> + Send + 'static>> {
        self.watch_call_count.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }

    fn source_name(&self) -> &'static str {
        "controlled"
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A source that never emits anything
pub struct IdleSource;

#[async_trait]
impl TelemetrySource for IdleSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = BusMessage> + Send + 'static>> {
        Box::pin(tokio_stream::pending())
    }

    fn source_name(&self) -> &'static str {
        "idle"
    }
}

/// A notifier that records every alert it is asked to deliver
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<AlertRecord>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn delivered(&self) -> Vec<AlertRecord> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &AlertRecord) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::notification("gateway unavailable"));
        }
        self.delivered.lock().unwrap().push(alert.clone());
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "recording"
    }
}

/// A store wrapper whose writes can be switched off
///
/// Reads and the registry always go to the inner store.
#[derive(Clone)]
pub struct FlakyStore {
    inner: Arc<MemoryTelemetryStore>,
    failing: Arc<AtomicBool>,
    failed_writes: Arc<AtomicUsize>,
    flush_call_count: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryTelemetryStore>) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
            failed_writes: Arc::new(AtomicUsize::new(0)),
            flush_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }

    pub fn flush_call_count(&self) -> usize {
        self.flush_call_count.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(Error::persistence("database is locked"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistry for FlakyStore {
    async fn lookup_device(&self, device_id: &str) -> Result<Option<Device>> {
        self.inner.lookup_device(device_id).await
    }

    async fn alert_thresholds(&self, device_id: &str) -> Result<Option<AlertThresholds>> {
        self.inner.alert_thresholds(device_id).await
    }
}

#[async_trait]
impl TelemetryStore for FlakyStore {
    async fn insert_reading(&self, reading: &NewReading) -> Result<ReadingId> {
        self.check()?;
        self.inner.insert_reading(reading).await
    }

    async fn insert_frame(&self, frame: &NewFrame) -> Result<FrameId> {
        self.check()?;
        self.inner.insert_frame(frame).await
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<AlertRecord> {
        self.check()?;
        self.inner.insert_alert(alert).await
    }

    async fn latest_unresolved_alert(
        &self,
        device_id: &str,
        kind: AlertKind,
    ) -> Result<Option<AlertRecord>> {
        self.inner.latest_unresolved_alert(device_id, kind).await
    }

    async fn mark_notification_sent(&self, alert_id: AlertId) -> Result<()> {
        self.inner.mark_notification_sent(alert_id).await
    }

    async fn resolve_alert(&self, alert_id: AlertId, at: DateTime<Utc>) -> Result<()> {
        self.inner.resolve_alert(alert_id, at).await
    }

    async fn latest_reading(&self, device_id: &str, kind: ReadingKind) -> Result<Option<Reading>> {
        self.inner.latest_reading(device_id, kind).await
    }

    async fn readings_between(
        &self,
        device_id: &str,
        kind: Option<ReadingKind>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        self.inner
            .readings_between(device_id, kind, from, to, limit)
            .await
    }

    async fn alerts_for_device(&self, device_id: &str, limit: usize) -> Result<Vec<AlertRecord>> {
        self.inner.alerts_for_device(device_id, limit).await
    }

    async fn alert_detail(&self, alert_id: AlertId) -> Result<Option<AlertDetail>> {
        self.inner.alert_detail(alert_id).await
    }

    async fn frame(&self, frame_id: FrameId) -> Result<Option<Frame>> {
        self.inner.frame(frame_id).await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
