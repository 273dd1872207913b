//! Alert records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::AccountId;
use super::reading::{Frame, Reading};
use crate::error::{Error, Result};

/// Durable alert identifier, also used as the correlation id
pub type AlertId = i64;

/// Kind of condition an alert reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighTemperature,
    AbnormalPosition,
    FaceNotDetected,
    Crying,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighTemperature => "high_temperature",
            Self::AbnormalPosition => "abnormal_position",
            Self::FaceNotDetected => "face_not_detected",
            Self::Crying => "crying",
        }
    }

    /// Kinds raised by the same rule; repeats of any of them are de-duplicated together
    pub fn rule_kinds(&self) -> &'static [AlertKind] {
        match self {
            Self::HighTemperature => &[Self::HighTemperature],
            Self::AbnormalPosition | Self::FaceNotDetected => {
                &[Self::AbnormalPosition, Self::FaceNotDetected]
            }
            Self::Crying => &[Self::Crying],
        }
    }

    pub fn from_stored(value: &str) -> Result<Self> {
        match value {
            "high_temperature" => Ok(Self::HighTemperature),
            "abnormal_position" => Ok(Self::AbnormalPosition),
            "face_not_detected" => Ok(Self::FaceNotDetected),
            "crying" => Ok(Self::Crying),
            other => Err(Error::persistence(format!("unknown alert kind '{}'", other))),
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert about to be written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAlert {
    pub device_id: String,
    pub owner_id: Option<AccountId>,
    pub kind: AlertKind,
    pub message: String,
    /// Temperature at the time of firing, for temperature alerts
    pub temperature: Option<f64>,
    /// Whether a face was visible, for position alerts
    pub face_detected: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// A stored alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: AlertId,
    pub device_id: String,
    pub owner_id: Option<AccountId>,
    pub kind: AlertKind,
    pub message: String,
    pub temperature: Option<f64>,
    pub face_detected: Option<bool>,
    pub notification_sent: bool,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AlertRecord {
    pub fn from_new(id: AlertId, new: &NewAlert) -> Self {
        Self {
            id,
            device_id: new.device_id.clone(),
            owner_id: new.owner_id,
            kind: new.kind,
            message: new.message.clone(),
            temperature: new.temperature,
            face_detected: new.face_detected,
            notification_sent: false,
            resolved: false,
            resolved_at: None,
            created_at: new.created_at,
        }
    }
}

/// Everything recorded during one alert's recording window
#[derive(Debug, Clone)]
pub struct AlertDetail {
    pub alert: AlertRecord,
    /// Readings stamped with the alert id, oldest first
    pub readings: Vec<Reading>,
    /// Frames stamped with the alert id, oldest first
    pub frames: Vec<Frame>,
}
