//! Device records and per-device alert thresholds

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Owning account reference
pub type AccountId = i64;

/// A registered edge device (cradle)
///
/// Devices register themselves out-of-band. The core only reads them: a
/// device that is missing from the registry has its telemetry dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Globally unique device identifier
    pub id: String,
    /// Last reported network address
    pub ip: String,
    /// Owning account, `None` for unclaimed devices
    pub owner_id: Option<AccountId>,
    /// First registration time
    pub created_at: DateTime<Utc>,
    /// Last registration or ownership change
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Create a freshly registered, unclaimed device
    pub fn new(id: impl Into<String>, ip: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            ip: ip.into(),
            owner_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the owning account
    pub fn with_owner(mut self, owner_id: AccountId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }
}

/// Per-device alert configuration
///
/// Values come from an external collaborator and are not trusted: each rule
/// validates the field it needs through the accessor methods, so one malformed
/// field only disables the rule that reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Temperature above which a high-temperature alert fires (°C)
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,

    /// Seconds without a frontal face before an abnormal-position alert fires
    #[serde(default = "default_abnormal_position_timeout_secs")]
    pub abnormal_position_timeout_secs: i64,

    /// Seconds of continuous crying before a crying alert fires
    #[serde(default = "default_crying_duration_threshold_secs")]
    pub crying_duration_threshold_secs: i64,

    /// Whether fired alerts are pushed to the notifier
    #[serde(default = "default_push_enabled")]
    pub push_notifications_enabled: bool,

    /// Email toggle, carried for collaborators; the core never sends email
    #[serde(default)]
    pub email_notifications_enabled: bool,
}

impl AlertThresholds {
    /// Validated maximum temperature
    pub fn max_temperature(&self) -> Result<f64> {
        if !self.max_temperature.is_finite() {
            return Err(Error::evaluation(
                "high_temperature",
                format!("max_temperature is not finite: {}", self.max_temperature),
            ));
        }
        Ok(self.max_temperature)
    }

    /// Validated abnormal-position timeout
    pub fn abnormal_position_timeout(&self) -> Result<Duration> {
        if self.abnormal_position_timeout_secs < 0 {
            return Err(Error::evaluation(
                "abnormal_position",
                format!(
                    "abnormal_position_timeout_secs is negative: {}",
                    self.abnormal_position_timeout_secs
                ),
            ));
        }
        Duration::try_seconds(self.abnormal_position_timeout_secs).ok_or_else(|| {
            Error::evaluation(
                "abnormal_position",
                format!(
                    "abnormal_position_timeout_secs is out of range: {}",
                    self.abnormal_position_timeout_secs
                ),
            )
        })
    }

    /// Validated crying duration threshold
    pub fn crying_duration_threshold(&self) -> Result<Duration> {
        if self.crying_duration_threshold_secs < 0 {
            return Err(Error::evaluation(
                "crying",
                format!(
                    "crying_duration_threshold_secs is negative: {}",
                    self.crying_duration_threshold_secs
                ),
            ));
        }
        Duration::try_seconds(self.crying_duration_threshold_secs).ok_or_else(|| {
            Error::evaluation(
                "crying",
                format!(
                    "crying_duration_threshold_secs is out of range: {}",
                    self.crying_duration_threshold_secs
                ),
            )
        })
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_temperature: default_max_temperature(),
            abnormal_position_timeout_secs: default_abnormal_position_timeout_secs(),
            crying_duration_threshold_secs: default_crying_duration_threshold_secs(),
            push_notifications_enabled: default_push_enabled(),
            email_notifications_enabled: false,
        }
    }
}

fn default_max_temperature() -> f64 {
    38.0
}

fn default_abnormal_position_timeout_secs() -> i64 {
    30
}

fn default_crying_duration_threshold_secs() -> i64 {
    30
}

fn default_push_enabled() -> bool {
    true
}
