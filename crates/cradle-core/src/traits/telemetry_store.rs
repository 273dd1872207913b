// # Telemetry Store Traits
//
// Defines the interface to the durable relational store shared with the
// surrounding web services.
//
// ## Purpose
//
// The store holds the rows this core produces (readings, frames, alert
// records) and the device registry it consumes. The core writes one row per
// measurement event and never updates or deletes readings or frames.
//
// ## Implementations
//
// - In-memory: `MemoryTelemetryStore` (tests, embedding)
// - SQLite: `cradle-store-sqlite` crate
//
// ## Usage
//
// ```rust,ignore
// use cradle_core::{DeviceRegistry, TelemetryStore};
//
// let device = registry.lookup_device("cradle-1").await?;
// let id = store.insert_reading(&reading).await?;
// let detail = store.alert_detail(alert_id).await?;
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::model::{
    AlertDetail, AlertId, AlertKind, AlertRecord, AlertThresholds, Device, Frame, FrameId,
    NewAlert, NewFrame, NewReading, Reading, ReadingId, ReadingKind,
};

/// Read-only view of the device registry
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Look up a registered device
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Device))`: The device is registered
    /// - `Ok(None)`: Unknown device; its telemetry must be dropped
    /// - `Err(Error)`: Storage error
    async fn lookup_device(&self, device_id: &str) -> Result<Option<Device>, crate::Error>;

    /// Alert thresholds configured for a device
    ///
    /// `Ok(None)` means the device has no settings row and defaults apply.
    async fn alert_thresholds(
        &self,
        device_id: &str,
    ) -> Result<Option<AlertThresholds>, crate::Error>;
}

/// Trait for durable telemetry storage
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O against the durable store
/// - ✅ Run blocking drivers on a dedicated thread
///
/// ## Forbidden Capabilities
/// - ❌ Decide whether an alert fires (owned by the evaluator)
/// - ❌ Stamp correlation ids (owned by the correlator)
/// - ❌ Apply retention (owned by the external janitor)
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Append one reading row
    async fn insert_reading(&self, reading: &NewReading) -> Result<ReadingId, crate::Error>;

    /// Append one frame row; the image bytes are stored as given
    async fn insert_frame(&self, frame: &NewFrame) -> Result<FrameId, crate::Error>;

    /// Create an alert record
    ///
    /// # Returns
    ///
    /// The stored record, with `notification_sent` and `resolved` unset
    async fn insert_alert(&self, alert: &NewAlert) -> Result<AlertRecord, crate::Error>;

    /// Most recent unresolved alert of a kind for a device
    ///
    /// Used for de-duplication windows.
    async fn latest_unresolved_alert(
        &self,
        device_id: &str,
        kind: AlertKind,
    ) -> Result<Option<AlertRecord>, crate::Error>;

    /// Record that the notification for an alert was delivered
    async fn mark_notification_sent(&self, alert_id: AlertId) -> Result<(), crate::Error>;

    /// Resolve an alert
    ///
    /// Resolution is an external action; the core only exposes it.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Resolved (resolving twice keeps the first timestamp)
    /// - `Err(Error::NotFound)`: No such alert
    async fn resolve_alert(
        &self,
        alert_id: AlertId,
        at: DateTime<Utc>,
    ) -> Result<(), crate::Error>;

    /// Most recent reading of a kind for a device
    async fn latest_reading(
        &self,
        device_id: &str,
        kind: ReadingKind,
    ) -> Result<Option<Reading>, crate::Error>;

    /// Readings in `[from, to]`, oldest first, at most `limit` rows
    async fn readings_between(
        &self,
        device_id: &str,
        kind: Option<ReadingKind>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>, crate::Error>;

    /// Alert history for a device, newest first, at most `limit` rows
    async fn alerts_for_device(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, crate::Error>;

    /// An alert plus every reading and frame stamped with its id
    async fn alert_detail(&self, alert_id: AlertId) -> Result<Option<AlertDetail>, crate::Error>;

    /// A single stored frame
    async fn frame(&self, frame_id: FrameId) -> Result<Option<Frame>, crate::Error>;

    /// Persist any pending changes
    ///
    /// Called once during shutdown after all in-flight messages drained.
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// A store backend as seen by the engine
///
/// Most backends implement both traits on one type; the handles may point at
/// the same object.
#[derive(Clone)]
pub struct StoreHandles {
    pub registry: Arc<dyn DeviceRegistry>,
    pub store: Arc<dyn TelemetryStore>,
}

impl StoreHandles {
    /// Build handles from one object implementing both traits
    pub fn from_shared<S>(backend: Arc<S>) -> Self
    where
        S: DeviceRegistry + TelemetryStore + 'static,
    {
        Self {
            registry: backend.clone(),
            store: backend,
        }
    }
}

/// Helper trait for constructing stores from configuration
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Open a store backend from configuration
    async fn create(
        &self,
        config: &crate::config::StoreConfig,
    ) -> Result<StoreHandles, crate::Error>;
}
