//! Telemetry kinds, typed reading values, readings and frames

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::AlertId;
use crate::error::{Error, Result};

/// Durable reading identifier
pub type ReadingId = i64;

/// Durable frame identifier
pub type FrameId = i64;

/// Measurement kind carried by one bus message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryKind {
    Temperature,
    Crying,
    Direction,
    Frame,
}

impl TelemetryKind {
    /// Parse the kind segment of a topic, accepting the long-form aliases
    pub fn parse(kind: &str) -> Result<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "temperature" => Ok(Self::Temperature),
            "crying" | "crying-status" | "crying_status" => Ok(Self::Crying),
            "direction" | "face-direction" | "face_direction" => Ok(Self::Direction),
            "frame" => Ok(Self::Frame),
            other => Err(Error::decode(format!("unknown telemetry kind '{}'", other))),
        }
    }

    /// The reading kind stored for this message, `None` for frames
    pub fn reading_kind(&self) -> Option<ReadingKind> {
        match self {
            Self::Temperature => Some(ReadingKind::Temperature),
            Self::Crying => Some(ReadingKind::CryingStatus),
            Self::Direction => Some(ReadingKind::FaceDirection),
            Self::Frame => None,
        }
    }

    /// Topic segment for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Crying => "crying",
            Self::Direction => "direction",
            Self::Frame => "frame",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a stored reading row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    Temperature,
    CryingStatus,
    FaceDirection,
}

impl ReadingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::CryingStatus => "crying_status",
            Self::FaceDirection => "face_direction",
        }
    }

    pub fn from_stored(value: &str) -> Result<Self> {
        match value {
            "temperature" => Ok(Self::Temperature),
            "crying_status" => Ok(Self::CryingStatus),
            "face_direction" => Ok(Self::FaceDirection),
            other => Err(Error::persistence(format!("unknown reading kind '{}'", other))),
        }
    }
}

/// Crying detector output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CryingStatus {
    Crying,
    Silent,
}

impl CryingStatus {
    pub fn from_label(label: &str) -> Result<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "crying" => Ok(Self::Crying),
            "silent" => Ok(Self::Silent),
            other => Err(Error::decode(format!("unknown crying status '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crying => "Crying",
            Self::Silent => "Silent",
        }
    }
}

/// Face-direction classifier output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceDirection {
    Frontal,
    LeftMoved,
    RightMoved,
    NotDetected,
    RecognitionError,
}

impl FaceDirection {
    /// Parse a direction label
    ///
    /// Accepts the canonical labels in any case or separator style, plus the
    /// localized labels published by the stock edge agent firmware.
    pub fn from_label(label: &str) -> Result<Self> {
        let trimmed = label.trim();
        match trimmed {
            "정면 유지 중" => return Ok(Self::Frontal),
            "좌측으로 움직임" => return Ok(Self::LeftMoved),
            "우측으로 움직임" => return Ok(Self::RightMoved),
            "인식 안됨" => return Ok(Self::NotDetected),
            "인식 오류" => return Ok(Self::RecognitionError),
            _ => {}
        }

        let normalized: String = trimmed
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "frontal" => Ok(Self::Frontal),
            "leftmoved" => Ok(Self::LeftMoved),
            "rightmoved" => Ok(Self::RightMoved),
            "notdetected" => Ok(Self::NotDetected),
            "recognitionerror" => Ok(Self::RecognitionError),
            _ => Err(Error::decode(format!("unknown face direction '{}'", trimmed))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontal => "Frontal",
            Self::LeftMoved => "LeftMoved",
            Self::RightMoved => "RightMoved",
            Self::NotDetected => "NotDetected",
            Self::RecognitionError => "RecognitionError",
        }
    }

    pub fn is_frontal(&self) -> bool {
        matches!(self, Self::Frontal)
    }

    /// Whether the classifier found a face at all
    pub fn face_detected(&self) -> bool {
        !matches!(self, Self::NotDetected | Self::RecognitionError)
    }
}

/// Typed value of one reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ReadingValue {
    Temperature(f64),
    CryingStatus(CryingStatus),
    FaceDirection(FaceDirection),
}

impl ReadingValue {
    pub fn kind(&self) -> ReadingKind {
        match self {
            Self::Temperature(_) => ReadingKind::Temperature,
            Self::CryingStatus(_) => ReadingKind::CryingStatus,
            Self::FaceDirection(_) => ReadingKind::FaceDirection,
        }
    }

    /// Text form stored in the value column
    pub fn to_stored(&self) -> String {
        match self {
            Self::Temperature(v) => v.to_string(),
            Self::CryingStatus(s) => s.as_str().to_string(),
            Self::FaceDirection(d) => d.as_str().to_string(),
        }
    }

    /// Rebuild a value from its kind and stored text
    pub fn from_stored(kind: ReadingKind, value: &str) -> Result<Self> {
        match kind {
            ReadingKind::Temperature => value
                .trim()
                .parse::<f64>()
                .map(Self::Temperature)
                .map_err(|e| Error::persistence(format!("bad stored temperature '{}': {}", value, e))),
            ReadingKind::CryingStatus => CryingStatus::from_label(value).map(Self::CryingStatus),
            ReadingKind::FaceDirection => FaceDirection::from_label(value).map(Self::FaceDirection),
        }
    }
}

/// A reading about to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub device_id: String,
    pub value: ReadingValue,
    /// Alert whose recording window was open when the reading arrived
    pub alert_id: Option<AlertId>,
    pub recorded_at: DateTime<Utc>,
}

/// A stored reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    pub device_id: String,
    pub value: ReadingValue,
    pub alert_id: Option<AlertId>,
    pub recorded_at: DateTime<Utc>,
}

impl Reading {
    pub fn from_new(id: ReadingId, new: &NewReading) -> Self {
        Self {
            id,
            device_id: new.device_id.clone(),
            value: new.value,
            alert_id: new.alert_id,
            recorded_at: new.recorded_at,
        }
    }

    pub fn kind(&self) -> ReadingKind {
        self.value.kind()
    }
}

/// A decoded camera image
///
/// The bytes are shared between the live frame cache and the durable write,
/// so cloning a `FrameImage` never copies the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    pub data: Arc<[u8]>,
    /// Image format sniffed from the header (e.g. `jpeg`)
    pub format: String,
    pub width: u32,
    pub height: u32,
}

impl FrameImage {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// A frame about to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewFrame {
    pub device_id: String,
    pub image: FrameImage,
    pub alert_id: Option<AlertId>,
    pub captured_at: DateTime<Utc>,
}

/// A stored frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: FrameId,
    pub device_id: String,
    pub image: FrameImage,
    pub alert_id: Option<AlertId>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn from_new(id: FrameId, new: &NewFrame) -> Self {
        Self {
            id,
            device_id: new.device_id.clone(),
            image: new.image.clone(),
            alert_id: new.alert_id,
            captured_at: new.captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_kind_aliases() {
        assert_eq!(TelemetryKind::parse("crying").unwrap(), TelemetryKind::Crying);
        assert_eq!(TelemetryKind::parse("crying-status").unwrap(), TelemetryKind::Crying);
        assert_eq!(TelemetryKind::parse("face-direction").unwrap(), TelemetryKind::Direction);
        assert_eq!(TelemetryKind::Frame.reading_kind(), None);
        assert!(TelemetryKind::parse("servo").is_err());
    }

    #[test]
    fn direction_labels() {
        assert_eq!(FaceDirection::from_label("Frontal").unwrap(), FaceDirection::Frontal);
        assert_eq!(FaceDirection::from_label("left_moved").unwrap(), FaceDirection::LeftMoved);
        assert_eq!(FaceDirection::from_label("Not Detected").unwrap(), FaceDirection::NotDetected);
        assert_eq!(FaceDirection::from_label("우측으로 움직임").unwrap(), FaceDirection::RightMoved);
        assert_eq!(FaceDirection::from_label("인식 오류").unwrap(), FaceDirection::RecognitionError);
        assert!(FaceDirection::from_label("sideways").is_err());
    }

    #[test]
    fn face_detected_flag() {
        assert!(FaceDirection::LeftMoved.face_detected());
        assert!(!FaceDirection::NotDetected.face_detected());
        assert!(!FaceDirection::RecognitionError.face_detected());
    }

    #[test]
    fn stored_value_round_trip() {
        let value = ReadingValue::FaceDirection(FaceDirection::RightMoved);
        let restored = ReadingValue::from_stored(value.kind(), &value.to_stored()).unwrap();
        assert_eq!(restored, value);

        let temp = ReadingValue::from_stored(ReadingKind::Temperature, "36.6").unwrap();
        assert_eq!(temp, ReadingValue::Temperature(36.6));
    }
}
