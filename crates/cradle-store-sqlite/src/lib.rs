// # SQLite Telemetry Store
//
// Durable `DeviceRegistry` and `TelemetryStore` backed by one SQLite file.
//
// ## Layout
//
// - `devices`, `alert_settings`: written by the surrounding services, read here
// - `readings`, `frames`: append-only, one row per measurement event
// - `alerts`: created here, resolved externally
//
// Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`) so
// text ordering in SQL matches time ordering.
//
// ## Threading
//
// All statements run on a single database thread (see `db.rs`). Writes from
// different ingestion partitions are serialized there; per-device ordering is
// already guaranteed upstream.

mod db;
mod migrations;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use cradle_core::config::StoreConfig;
use cradle_core::model::{
    AccountId, AlertDetail, AlertId, AlertKind, AlertRecord, AlertThresholds, Device, Frame,
    FrameId, FrameImage, NewAlert, NewFrame, NewReading, Reading, ReadingId, ReadingKind,
    ReadingValue,
};
use cradle_core::registry::ComponentRegistry;
use cradle_core::{DeviceRegistry, Error, Result, StoreFactory, StoreHandles, TelemetryStore};

use db::Database;

const DEVICE_COLUMNS: &str = "id, ip, owner_id, created_at, updated_at";
const READING_COLUMNS: &str = "id, device_id, kind, value, alert_id, recorded_at";
const FRAME_COLUMNS: &str = "id, device_id, image, format, width, height, alert_id, captured_at";
const ALERT_COLUMNS: &str = "id, device_id, owner_id, alert_type, message, temperature, \
     face_detected, notification_sent, resolved, resolved_at, created_at";

/// SQLite-backed telemetry store
///
/// Cloning shares the database thread.
///
/// # Example
///
/// ```rust,no_run
/// use cradle_store_sqlite::SqliteTelemetryStore;
///
/// # async fn demo() -> cradle_core::Result<()> {
/// let store = SqliteTelemetryStore::open("/var/lib/cradle/cradle.db")?;
/// store.register_device("cradle-1", "192.168.0.20").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqliteTelemetryStore {
    db: Database,
    path: Arc<PathBuf>,
}

impl SqliteTelemetryStore {
    /// Open the database file, creating and migrating it when needed
    ///
    /// Blocks the calling thread until the schema is ready; async callers
    /// should go through [`SqliteStoreFactory`] or `spawn_blocking`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let db = Database::open(&path).map_err(persistence)?;
        Ok(Self {
            db,
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db.execute(task).await.map_err(persistence)
    }

    /// Register a device, or refresh its address if already known
    ///
    /// The owner and creation time of an existing device are kept.
    pub async fn register_device(&self, device_id: &str, ip: &str) -> Result<Device> {
        let device_id = device_id.to_string();
        let ip = ip.to_string();
        self.run(move |conn| {
            let now = timestamp(&Utc::now());
            conn.execute(
                "INSERT INTO devices (id, ip, owner_id, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, ?3)
                 ON CONFLICT(id) DO UPDATE SET ip = excluded.ip, updated_at = excluded.updated_at",
                params![device_id, ip, now],
            )
            .context("failed to upsert device")?;

            let raw = conn
                .query_row(
                    &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
                    params![device_id],
                    RawDevice::from_row,
                )
                .context("failed to read registered device")?;
            raw.into_device()
        })
        .await
    }

    /// Link a device to the account that owns it
    pub async fn assign_owner(&self, device_id: &str, owner_id: AccountId) -> Result<()> {
        let id = device_id.to_string();
        let changed = self
            .run(move |conn| {
                conn.execute(
                    "UPDATE devices SET owner_id = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, owner_id, timestamp(&Utc::now())],
                )
                .context("failed to assign device owner")
            })
            .await?;

        if changed == 0 {
            return Err(Error::not_found(format!("device {}", device_id)));
        }
        Ok(())
    }

    /// Replace a device's alert thresholds
    pub async fn set_thresholds(&self, device_id: &str, thresholds: AlertThresholds) -> Result<()> {
        let id = device_id.to_string();
        let found = self
            .run(move |conn| {
                let exists = conn
                    .query_row("SELECT 1 FROM devices WHERE id = ?1", params![id], |_| Ok(()))
                    .optional()
                    .context("failed to look up device")?
                    .is_some();
                if !exists {
                    return Ok(false);
                }

                conn.execute(
                    "INSERT INTO alert_settings (device_id, max_temperature,
                         abnormal_position_timeout, crying_duration_threshold,
                         push_notifications_enabled, email_notifications_enabled, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(device_id) DO UPDATE SET
                         max_temperature = excluded.max_temperature,
                         abnormal_position_timeout = excluded.abnormal_position_timeout,
                         crying_duration_threshold = excluded.crying_duration_threshold,
                         push_notifications_enabled = excluded.push_notifications_enabled,
                         email_notifications_enabled = excluded.email_notifications_enabled,
                         updated_at = excluded.updated_at",
                    params![
                        id,
                        thresholds.max_temperature,
                        thresholds.abnormal_position_timeout_secs,
                        thresholds.crying_duration_threshold_secs,
                        thresholds.push_notifications_enabled,
                        thresholds.email_notifications_enabled,
                        timestamp(&Utc::now()),
                    ],
                )
                .context("failed to store alert settings")?;
                Ok(true)
            })
            .await?;

        if !found {
            return Err(Error::not_found(format!("device {}", device_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistry for SqliteTelemetryStore {
    async fn lookup_device(&self, device_id: &str) -> Result<Option<Device>> {
        let id = device_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
                params![id],
                RawDevice::from_row,
            )
            .optional()
            .context("failed to look up device")?
            .map(RawDevice::into_device)
            .transpose()
        })
        .await
    }

    async fn alert_thresholds(&self, device_id: &str) -> Result<Option<AlertThresholds>> {
        let id = device_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT max_temperature, abnormal_position_timeout, crying_duration_threshold,
                        push_notifications_enabled, email_notifications_enabled
                 FROM alert_settings WHERE device_id = ?1",
                params![id],
                |row| {
                    Ok(AlertThresholds {
                        max_temperature: row.get(0)?,
                        abnormal_position_timeout_secs: row.get(1)?,
                        crying_duration_threshold_secs: row.get(2)?,
                        push_notifications_enabled: row.get(3)?,
                        email_notifications_enabled: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("failed to read alert settings")
        })
        .await
    }
}

#[async_trait]
impl TelemetryStore for SqliteTelemetryStore {
    async fn insert_reading(&self, reading: &NewReading) -> Result<ReadingId> {
        let reading = reading.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO readings (device_id, kind, value, alert_id, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reading.device_id,
                    reading.value.kind().as_str(),
                    reading.value.to_stored(),
                    reading.alert_id,
                    timestamp(&reading.recorded_at),
                ],
            )
            .context("failed to insert reading")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn insert_frame(&self, frame: &NewFrame) -> Result<FrameId> {
        let frame = frame.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO frames (device_id, image, format, width, height, alert_id, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    frame.device_id,
                    &frame.image.data[..],
                    frame.image.format,
                    frame.image.width,
                    frame.image.height,
                    frame.alert_id,
                    timestamp(&frame.captured_at),
                ],
            )
            .context("failed to insert frame")?;
            debug!(
                "Stored {} byte frame for {}",
                frame.image.size_bytes(),
                frame.device_id
            );
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<AlertRecord> {
        let alert = alert.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO alerts (device_id, owner_id, alert_type, message, temperature,
                     face_detected, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    alert.device_id,
                    alert.owner_id,
                    alert.kind.as_str(),
                    alert.message,
                    alert.temperature,
                    alert.face_detected,
                    timestamp(&alert.created_at),
                ],
            )
            .context("failed to insert alert")?;
            Ok(AlertRecord::from_new(conn.last_insert_rowid(), &alert))
        })
        .await
    }

    async fn latest_unresolved_alert(
        &self,
        device_id: &str,
        kind: AlertKind,
    ) -> Result<Option<AlertRecord>> {
        let id = device_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM alerts
                     WHERE device_id = ?1 AND alert_type = ?2 AND resolved = 0
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    ALERT_COLUMNS
                ),
                params![id, kind.as_str()],
                RawAlert::from_row,
            )
            .optional()
            .context("failed to query unresolved alert")?
            .map(RawAlert::into_alert)
            .transpose()
        })
        .await
    }

    async fn mark_notification_sent(&self, alert_id: AlertId) -> Result<()> {
        let changed = self
            .run(move |conn| {
                conn.execute(
                    "UPDATE alerts SET notification_sent = 1 WHERE id = ?1",
                    params![alert_id],
                )
                .context("failed to mark notification sent")
            })
            .await?;

        if changed == 0 {
            return Err(Error::not_found(format!("alert {}", alert_id)));
        }
        Ok(())
    }

    async fn resolve_alert(&self, alert_id: AlertId, at: DateTime<Utc>) -> Result<()> {
        let found = self
            .run(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE alerts SET resolved = 1, resolved_at = ?2
                         WHERE id = ?1 AND resolved = 0",
                        params![alert_id, timestamp(&at)],
                    )
                    .context("failed to resolve alert")?;
                if changed > 0 {
                    return Ok(true);
                }
                // Already resolved keeps its first timestamp
                let exists = conn
                    .query_row("SELECT 1 FROM alerts WHERE id = ?1", params![alert_id], |_| {
                        Ok(())
                    })
                    .optional()
                    .context("failed to look up alert")?;
                Ok(exists.is_some())
            })
            .await?;

        if !found {
            return Err(Error::not_found(format!("alert {}", alert_id)));
        }
        Ok(())
    }

    async fn latest_reading(
        &self,
        device_id: &str,
        kind: ReadingKind,
    ) -> Result<Option<Reading>> {
        let id = device_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM readings WHERE device_id = ?1 AND kind = ?2
                     ORDER BY recorded_at DESC, id DESC LIMIT 1",
                    READING_COLUMNS
                ),
                params![id, kind.as_str()],
                RawReading::from_row,
            )
            .optional()
            .context("failed to query latest reading")?
            .map(RawReading::into_reading)
            .transpose()
        })
        .await
    }

    async fn readings_between(
        &self,
        device_id: &str,
        kind: Option<ReadingKind>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let id = device_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM readings
                     WHERE device_id = ?1 AND (?2 IS NULL OR kind = ?2)
                       AND recorded_at >= ?3 AND recorded_at <= ?4
                     ORDER BY recorded_at ASC, id ASC LIMIT ?5",
                    READING_COLUMNS
                ))
                .context("failed to prepare readings query")?;
            let rows = stmt
                .query_map(
                    params![
                        id,
                        kind.map(|k| k.as_str()),
                        timestamp(&from),
                        timestamp(&to),
                        to_i64(limit)?,
                    ],
                    RawReading::from_row,
                )
                .context("failed to query readings")?;
            collect_readings(rows)
        })
        .await
    }

    async fn alerts_for_device(&self, device_id: &str, limit: usize) -> Result<Vec<AlertRecord>> {
        let id = device_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM alerts WHERE device_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                    ALERT_COLUMNS
                ))
                .context("failed to prepare alert history query")?;
            let rows = stmt
                .query_map(params![id, to_i64(limit)?], RawAlert::from_row)
                .context("failed to query alert history")?;

            let mut alerts = Vec::new();
            for row in rows {
                alerts.push(row.context("failed to read alert row")?.into_alert()?);
            }
            Ok(alerts)
        })
        .await
    }

    async fn alert_detail(&self, alert_id: AlertId) -> Result<Option<AlertDetail>> {
        self.run(move |conn| {
            let Some(raw) = conn
                .query_row(
                    &format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS),
                    params![alert_id],
                    RawAlert::from_row,
                )
                .optional()
                .context("failed to query alert")?
            else {
                return Ok(None);
            };
            let alert = raw.into_alert()?;

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM readings WHERE alert_id = ?1 ORDER BY recorded_at ASC, id ASC",
                    READING_COLUMNS
                ))
                .context("failed to prepare correlated readings query")?;
            let rows = stmt
                .query_map(params![alert_id], RawReading::from_row)
                .context("failed to query correlated readings")?;
            let readings = collect_readings(rows)?;

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM frames WHERE alert_id = ?1 ORDER BY captured_at ASC, id ASC",
                    FRAME_COLUMNS
                ))
                .context("failed to prepare correlated frames query")?;
            let rows = stmt
                .query_map(params![alert_id], RawFrame::from_row)
                .context("failed to query correlated frames")?;
            let mut frames = Vec::new();
            for row in rows {
                frames.push(row.context("failed to read frame row")?.into_frame()?);
            }

            Ok(Some(AlertDetail {
                alert,
                readings,
                frames,
            }))
        })
        .await
    }

    async fn frame(&self, frame_id: FrameId) -> Result<Option<Frame>> {
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM frames WHERE id = ?1", FRAME_COLUMNS),
                params![frame_id],
                RawFrame::from_row,
            )
            .optional()
            .context("failed to query frame")?
            .map(RawFrame::into_frame)
            .transpose()
        })
        .await
    }

    async fn flush(&self) -> Result<()> {
        self.run(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .context("failed to checkpoint WAL")
        })
        .await
    }
}

/// Factory for SQLite stores
pub struct SqliteStoreFactory;

#[async_trait]
impl StoreFactory for SqliteStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<StoreHandles> {
        let StoreConfig::Sqlite { path } = config else {
            return Err(Error::config(format!(
                "sqlite store factory cannot open a '{}' store",
                config.type_name()
            )));
        };

        let path = PathBuf::from(path);
        let store = tokio::task::spawn_blocking(move || SqliteTelemetryStore::open(path))
            .await
            .map_err(|e| Error::persistence(format!("store open task failed: {}", e)))??;

        Ok(StoreHandles::from_shared(Arc::new(store)))
    }
}

/// Register the SQLite store with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_store("sqlite", Box::new(SqliteStoreFactory));
}

fn persistence(err: anyhow::Error) -> Error {
    Error::persistence(format!("{:#}", err))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(value: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{}': {}", value, err))
}

fn to_i64(value: usize) -> anyhow::Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {} exceeds SQLite INTEGER range", value))
}

fn collect_readings(
    rows: impl Iterator<Item = rusqlite::Result<RawReading>>,
) -> anyhow::Result<Vec<Reading>> {
    let mut readings = Vec::new();
    for row in rows {
        readings.push(row.context("failed to read reading row")?.into_reading()?);
    }
    Ok(readings)
}

// Row images: columns are pulled out as stored and converted outside the
// rusqlite row callback so conversion failures keep their own messages.

struct RawDevice {
    id: String,
    ip: String,
    owner_id: Option<AccountId>,
    created_at: String,
    updated_at: String,
}

impl RawDevice {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ip: row.get(1)?,
            owner_id: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_device(self) -> anyhow::Result<Device> {
        Ok(Device {
            id: self.id,
            ip: self.ip,
            owner_id: self.owner_id,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct RawReading {
    id: ReadingId,
    device_id: String,
    kind: String,
    value: String,
    alert_id: Option<AlertId>,
    recorded_at: String,
}

impl RawReading {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            kind: row.get(2)?,
            value: row.get(3)?,
            alert_id: row.get(4)?,
            recorded_at: row.get(5)?,
        })
    }

    fn into_reading(self) -> anyhow::Result<Reading> {
        let kind = ReadingKind::from_stored(&self.kind)?;
        Ok(Reading {
            id: self.id,
            device_id: self.device_id,
            value: ReadingValue::from_stored(kind, &self.value)?,
            alert_id: self.alert_id,
            recorded_at: parse_datetime(&self.recorded_at)?,
        })
    }
}

struct RawFrame {
    id: FrameId,
    device_id: String,
    image: Vec<u8>,
    format: String,
    width: u32,
    height: u32,
    alert_id: Option<AlertId>,
    captured_at: String,
}

impl RawFrame {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            image: row.get(2)?,
            format: row.get(3)?,
            width: row.get(4)?,
            height: row.get(5)?,
            alert_id: row.get(6)?,
            captured_at: row.get(7)?,
        })
    }

    fn into_frame(self) -> anyhow::Result<Frame> {
        Ok(Frame {
            id: self.id,
            device_id: self.device_id,
            image: FrameImage {
                data: Arc::from(self.image),
                format: self.format,
                width: self.width,
                height: self.height,
            },
            alert_id: self.alert_id,
            captured_at: parse_datetime(&self.captured_at)?,
        })
    }
}

struct RawAlert {
    id: AlertId,
    device_id: String,
    owner_id: Option<AccountId>,
    kind: String,
    message: String,
    temperature: Option<f64>,
    face_detected: Option<bool>,
    notification_sent: bool,
    resolved: bool,
    resolved_at: Option<String>,
    created_at: String,
}

impl RawAlert {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            owner_id: row.get(2)?,
            kind: row.get(3)?,
            message: row.get(4)?,
            temperature: row.get(5)?,
            face_detected: row.get(6)?,
            notification_sent: row.get(7)?,
            resolved: row.get(8)?,
            resolved_at: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_alert(self) -> anyhow::Result<AlertRecord> {
        Ok(AlertRecord {
            id: self.id,
            device_id: self.device_id,
            owner_id: self.owner_id,
            kind: AlertKind::from_stored(&self.kind)?,
            message: self.message,
            temperature: self.temperature,
            face_detected: self.face_detected,
            notification_sent: self.notification_sent,
            resolved: self.resolved,
            resolved_at: self.resolved_at.as_deref().map(parse_datetime).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}
