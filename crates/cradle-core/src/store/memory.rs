// # Memory Telemetry Store
//
// In-memory implementation of DeviceRegistry and TelemetryStore.
//
// ## Purpose
//
// Keeps devices, readings, frames and alert records in process memory. Row
// ids are assigned from per-table counters starting at 1, like an
// auto-increment column.
//
// ## Crash Behavior
//
// - Everything is lost on restart/crash
// - Devices must be registered again before their telemetry is accepted
//
// ## When to Use
//
// - Tests and embedding
// - Short-lived demos

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StoreConfig;
use crate::model::{
    AccountId, AlertDetail, AlertId, AlertKind, AlertRecord, AlertThresholds, Device, Frame,
    FrameId, NewAlert, NewFrame, NewReading, Reading, ReadingId, ReadingKind,
};
use crate::traits::{DeviceRegistry, StoreFactory, StoreHandles, TelemetryStore};

#[derive(Debug, Default)]
struct Tables {
    devices: HashMap<String, Device>,
    thresholds: HashMap<String, AlertThresholds>,
    readings: Vec<Reading>,
    frames: Vec<Frame>,
    alerts: Vec<AlertRecord>,
}

/// In-memory telemetry store
///
/// Cloning shares the underlying tables.
///
/// # Example
///
/// ```rust,no_run
/// use cradle_core::store::MemoryTelemetryStore;
/// use cradle_core::DeviceRegistry;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryTelemetryStore::new();
///     store.register_device("cradle-1", "192.168.0.20").await?;
///
///     let device = store.lookup_device("cradle-1").await?;
///     assert!(device.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTelemetryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, or refresh its address if already known
    ///
    /// The owner and creation time of an existing device are kept.
    pub async fn register_device(&self, device_id: &str, ip: &str) -> Result<Device, Error> {
        let mut tables = self.inner.write().await;
        let now = Utc::now();
        let device = tables
            .devices
            .entry(device_id.to_string())
            .and_modify(|device| {
                device.ip = ip.to_string();
                device.updated_at = now;
            })
            .or_insert_with(|| Device::new(device_id, ip));
        Ok(device.clone())
    }

    /// Link a device to the account that owns it
    pub async fn assign_owner(&self, device_id: &str, owner_id: AccountId) -> Result<(), Error> {
        let mut tables = self.inner.write().await;
        let device = tables
            .devices
            .get_mut(device_id)
            .ok_or_else(|| Error::not_found(format!("device {}", device_id)))?;
        device.owner_id = Some(owner_id);
        device.updated_at = Utc::now();
        Ok(())
    }

    /// Replace a device's alert thresholds
    pub async fn set_thresholds(
        &self,
        device_id: &str,
        thresholds: AlertThresholds,
    ) -> Result<(), Error> {
        let mut tables = self.inner.write().await;
        if !tables.devices.contains_key(device_id) {
            return Err(Error::not_found(format!("device {}", device_id)));
        }
        tables.thresholds.insert(device_id.to_string(), thresholds);
        Ok(())
    }

    pub async fn reading_count(&self) -> usize {
        self.inner.read().await.readings.len()
    }

    pub async fn frame_count(&self) -> usize {
        self.inner.read().await.frames.len()
    }

    pub async fn alert_count(&self) -> usize {
        self.inner.read().await.alerts.len()
    }

    /// Every stored reading of a device, in insertion order
    pub async fn readings_for(&self, device_id: &str) -> Vec<Reading> {
        self.inner
            .read()
            .await
            .readings
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryTelemetryStore {
    async fn lookup_device(&self, device_id: &str) -> Result<Option<Device>, Error> {
        Ok(self.inner.read().await.devices.get(device_id).cloned())
    }

    async fn alert_thresholds(&self, device_id: &str) -> Result<Option<AlertThresholds>, Error> {
        Ok(self.inner.read().await.thresholds.get(device_id).cloned())
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn insert_reading(&self, reading: &NewReading) -> Result<ReadingId, Error> {
        let mut tables = self.inner.write().await;
        let id = tables.readings.len() as ReadingId + 1;
        tables.readings.push(Reading::from_new(id, reading));
        Ok(id)
    }

    async fn insert_frame(&self, frame: &NewFrame) -> Result<FrameId, Error> {
        let mut tables = self.inner.write().await;
        let id = tables.frames.len() as FrameId + 1;
        tables.frames.push(Frame::from_new(id, frame));
        Ok(id)
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<AlertRecord, Error> {
        let mut tables = self.inner.write().await;
        let id = tables.alerts.len() as AlertId + 1;
        let record = AlertRecord::from_new(id, alert);
        tables.alerts.push(record.clone());
        Ok(record)
    }

    async fn latest_unresolved_alert(
        &self,
        device_id: &str,
        kind: AlertKind,
    ) -> Result<Option<AlertRecord>, Error> {
        let tables = self.inner.read().await;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.device_id == device_id && a.kind == kind && !a.resolved)
            .max_by_key(|a| (a.created_at, a.id))
            .cloned())
    }

    async fn mark_notification_sent(&self, alert_id: AlertId) -> Result<(), Error> {
        let mut tables = self.inner.write().await;
        let alert = tables
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| Error::not_found(format!("alert {}", alert_id)))?;
        alert.notification_sent = true;
        Ok(())
    }

    async fn resolve_alert(&self, alert_id: AlertId, at: DateTime<Utc>) -> Result<(), Error> {
        let mut tables = self.inner.write().await;
        let alert = tables
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| Error::not_found(format!("alert {}", alert_id)))?;
        if !alert.resolved {
            alert.resolved = true;
            alert.resolved_at = Some(at);
        }
        Ok(())
    }

    async fn latest_reading(
        &self,
        device_id: &str,
        kind: ReadingKind,
    ) -> Result<Option<Reading>, Error> {
        let tables = self.inner.read().await;
        Ok(tables
            .readings
            .iter()
            .filter(|r| r.device_id == device_id && r.kind() == kind)
            .max_by_key(|r| (r.recorded_at, r.id))
            .cloned())
    }

    async fn readings_between(
        &self,
        device_id: &str,
        kind: Option<ReadingKind>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>, Error> {
        let tables = self.inner.read().await;
        let mut readings: Vec<Reading> = tables
            .readings
            .iter()
            .filter(|r| r.device_id == device_id)
            .filter(|r| kind.is_none_or(|k| r.kind() == k))
            .filter(|r| r.recorded_at >= from && r.recorded_at <= to)
            .cloned()
            .collect();
        readings.sort_by_key(|r| (r.recorded_at, r.id));
        readings.truncate(limit);
        Ok(readings)
    }

    async fn alerts_for_device(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, Error> {
        let tables = self.inner.read().await;
        let mut alerts: Vec<AlertRecord> = tables
            .alerts
            .iter()
            .filter(|a| a.device_id == device_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| std::cmp::Reverse((a.created_at, a.id)));
        alerts.truncate(limit);
        Ok(alerts)
    }

    async fn alert_detail(&self, alert_id: AlertId) -> Result<Option<AlertDetail>, Error> {
        let tables = self.inner.read().await;
        let Some(alert) = tables.alerts.iter().find(|a| a.id == alert_id).cloned() else {
            return Ok(None);
        };

        let mut readings: Vec<Reading> = tables
            .readings
            .iter()
            .filter(|r| r.alert_id == Some(alert_id))
            .cloned()
            .collect();
        readings.sort_by_key(|r| (r.recorded_at, r.id));

        let mut frames: Vec<Frame> = tables
            .frames
            .iter()
            .filter(|f| f.alert_id == Some(alert_id))
            .cloned()
            .collect();
        frames.sort_by_key(|f| (f.captured_at, f.id));

        Ok(Some(AlertDetail {
            alert,
            readings,
            frames,
        }))
    }

    async fn frame(&self, frame_id: FrameId) -> Result<Option<Frame>, Error> {
        let tables = self.inner.read().await;
        Ok(tables.frames.iter().find(|f| f.id == frame_id).cloned())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for memory stores
pub struct MemoryStoreFactory;

#[async_trait]
impl StoreFactory for MemoryStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<StoreHandles, Error> {
        match config {
            StoreConfig::Memory => Ok(StoreHandles::from_shared(Arc::new(
                MemoryTelemetryStore::new(),
            ))),
            other => Err(Error::config(format!(
                "memory store factory cannot open a '{}' store",
                other.type_name()
            ))),
        }
    }
}
