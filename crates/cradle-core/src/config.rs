//! Configuration types for the cradle telemetry core
//!
//! This module defines all configuration structures used throughout the crate.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::model::AlertThresholds;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CradleConfig {
    /// Telemetry bus configuration
    pub bus: BusConfig,

    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Alert notification configuration
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Alert timing policy
    #[serde(default)]
    pub alerts: AlertPolicyConfig,
}

impl CradleConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            bus: BusConfig::default(),
            store: StoreConfig::default(),
            notifier: NotifierConfig::default(),
            engine: EngineConfig::default(),
            alerts: AlertPolicyConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.bus.validate()?;
        self.store.validate()?;
        self.notifier.validate()?;
        self.engine.validate()?;
        self.alerts.validate()?;
        Ok(())
    }
}

impl Default for CradleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Telemetry bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusConfig {
    /// MQTT broker
    Mqtt {
        /// Broker host name
        host: String,
        /// Broker port
        #[serde(default = "default_mqtt_port")]
        port: u16,
        /// Client identifier presented to the broker
        #[serde(default = "default_client_id")]
        client_id: String,
        /// First topic segment, topics are `<prefix>/<device>/<kind>`
        #[serde(default = "default_topic_prefix")]
        topic_prefix: String,
        /// MQTT keep-alive interval in seconds
        #[serde(default = "default_keep_alive_secs")]
        keep_alive_secs: u64,
        /// Optional broker credentials
        username: Option<String>,
        password: Option<String>,
    },

    /// Custom telemetry source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl BusConfig {
    /// Validate the bus configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            BusConfig::Mqtt {
                host,
                port,
                topic_prefix,
                keep_alive_secs,
                ..
            } => {
                if host.is_empty() {
                    return Err(crate::Error::config("MQTT host cannot be empty"));
                }
                if *port == 0 {
                    return Err(crate::Error::config("MQTT port must be > 0"));
                }
                if topic_prefix.is_empty() || topic_prefix.contains(['+', '#']) {
                    return Err(crate::Error::config(format!(
                        "MQTT topic prefix must be a plain non-empty segment, got '{}'",
                        topic_prefix
                    )));
                }
                if *keep_alive_secs < 5 {
                    return Err(crate::Error::config("MQTT keep-alive must be >= 5 seconds"));
                }
                Ok(())
            }
            BusConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom bus factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the source type name
    pub fn type_name(&self) -> &str {
        match self {
            BusConfig::Mqtt { .. } => "mqtt",
            BusConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig::Mqtt {
            host: "localhost".to_string(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            username: None,
            password: None,
        }
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// SQLite database file
    Sqlite {
        /// Path to the database file
        path: String,
    },

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::Sqlite { path } if path.is_empty() => {
                Err(crate::Error::config("SQLite store path cannot be empty"))
            }
            StoreConfig::Custom { factory, .. } if factory.is_empty() => {
                Err(crate::Error::config("Custom store factory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Sqlite { .. } => "sqlite",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Alert notification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// Alerts are recorded but never pushed
    #[default]
    None,

    /// POST each alert as JSON to a webhook
    Webhook {
        /// Target URL
        url: String,
        /// Request timeout in seconds
        #[serde(default = "default_webhook_timeout_secs")]
        timeout_secs: u64,
        /// Optional bearer token sent in the Authorization header
        bearer_token: Option<String>,
    },

    /// Custom notifier
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl NotifierConfig {
    /// Validate the notifier configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            NotifierConfig::None => Ok(()),
            NotifierConfig::Webhook {
                url, timeout_secs, ..
            } => {
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "Webhook URL must use HTTP or HTTPS scheme, got '{}'",
                        url
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Webhook timeout must be > 0"));
                }
                Ok(())
            }
            NotifierConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom notifier factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the notifier type name, `None` when notifications are disabled
    pub fn type_name(&self) -> Option<&str> {
        match self {
            NotifierConfig::None => None,
            NotifierConfig::Webhook { .. } => Some("webhook"),
            NotifierConfig::Custom { factory, .. } => Some(factory),
        }
    }
}

/// How the abnormal-position timeout is anchored before the first Frontal reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialFaceAnchor {
    /// The first direction reading of any label starts the clock
    #[default]
    FirstObservation,
    /// Without a Frontal reading on record, any non-Frontal reading is overdue
    Unanchored,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of ingestion partitions
    ///
    /// Each partition owns one worker and processes its devices in order.
    /// A slow durable write only stalls devices hashed to the same partition.
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Capacity of each partition's queue
    ///
    /// When a queue is full the message is dropped (with a warning log), so a
    /// stalled partition never holds up the bus reader or other partitions.
    #[serde(default = "default_partition_queue_capacity")]
    pub partition_queue_capacity: usize,

    /// Upper bound on ingesting one message, registry and store calls included
    ///
    /// A message still running after this is abandoned and reported as dropped.
    #[serde(default = "default_ingest_timeout_secs")]
    pub ingest_timeout_secs: u64,

    /// How long shutdown waits for partitions to drain before aborting them
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Capacity of the notification queue
    ///
    /// When full, notifications are dropped (with a warning log); the alert
    /// record is kept.
    #[serde(default = "default_notification_queue_capacity")]
    pub notification_queue_capacity: usize,

    /// First topic segment expected on inbound topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Anchor for the abnormal-position timeout on a fresh device
    #[serde(default)]
    pub initial_face_anchor: InitialFaceAnchor,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.partitions == 0 {
            return Err(crate::Error::config("Engine partitions must be > 0"));
        }
        if self.partition_queue_capacity == 0 {
            return Err(crate::Error::config("Partition queue capacity must be > 0"));
        }
        if self.ingest_timeout_secs == 0 {
            return Err(crate::Error::config("Ingest timeout must be > 0 seconds"));
        }
        if self.drain_timeout_secs == 0 {
            return Err(crate::Error::config("Drain timeout must be > 0 seconds"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.notification_queue_capacity == 0 {
            return Err(crate::Error::config("Notification queue capacity must be > 0"));
        }
        if self.topic_prefix.is_empty() {
            return Err(crate::Error::config("Topic prefix cannot be empty"));
        }
        Ok(())
    }

    pub fn ingest_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ingest_timeout_secs)
    }

    pub fn drain_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            partition_queue_capacity: default_partition_queue_capacity(),
            ingest_timeout_secs: default_ingest_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            notification_queue_capacity: default_notification_queue_capacity(),
            topic_prefix: default_topic_prefix(),
            initial_face_anchor: InitialFaceAnchor::default(),
        }
    }
}

/// Alert timing policy
///
/// All windows are wall-clock durations measured against message receipt time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPolicyConfig {
    /// How long readings and frames are stamped after an alert fires
    #[serde(default = "default_recording_window_secs")]
    pub recording_window_secs: u64,

    /// De-dup window for high-temperature alerts
    #[serde(default = "default_high_temperature_dedup_secs")]
    pub high_temperature_dedup_secs: u64,

    /// De-dup window for abnormal-position and face-not-detected alerts
    #[serde(default = "default_position_dedup_secs")]
    pub position_dedup_secs: u64,

    /// De-dup window for crying alerts
    #[serde(default = "default_crying_dedup_secs")]
    pub crying_dedup_secs: u64,

    /// Thresholds used for devices without a settings row
    #[serde(default)]
    pub default_thresholds: AlertThresholds,
}

impl AlertPolicyConfig {
    /// Validate the alert policy
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.recording_window_secs == 0 {
            return Err(crate::Error::config("Recording window must be > 0 seconds"));
        }
        self.default_thresholds.max_temperature()?;
        self.default_thresholds.abnormal_position_timeout()?;
        self.default_thresholds.crying_duration_threshold()?;
        Ok(())
    }

    pub fn recording_window(&self) -> Duration {
        secs(self.recording_window_secs)
    }

    pub fn high_temperature_dedup(&self) -> Duration {
        secs(self.high_temperature_dedup_secs)
    }

    pub fn position_dedup(&self) -> Duration {
        secs(self.position_dedup_secs)
    }

    pub fn crying_dedup(&self) -> Duration {
        secs(self.crying_dedup_secs)
    }
}

impl Default for AlertPolicyConfig {
    fn default() -> Self {
        Self {
            recording_window_secs: default_recording_window_secs(),
            high_temperature_dedup_secs: default_high_temperature_dedup_secs(),
            position_dedup_secs: default_position_dedup_secs(),
            crying_dedup_secs: default_crying_dedup_secs(),
            default_thresholds: AlertThresholds::default(),
        }
    }
}

/// Saturates at the largest representable duration
fn secs(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "cradled".to_string()
}

fn default_topic_prefix() -> String {
    "cradle".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_partitions() -> usize {
    4
}

fn default_partition_queue_capacity() -> usize {
    256
}

fn default_ingest_timeout_secs() -> u64 {
    10
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_notification_queue_capacity() -> usize {
    64
}

fn default_recording_window_secs() -> u64 {
    60
}

fn default_high_temperature_dedup_secs() -> u64 {
    300
}

fn default_position_dedup_secs() -> u64 {
    120
}

fn default_crying_dedup_secs() -> u64 {
    120
}
