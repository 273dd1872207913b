//! Payload decoding
//!
//! Edge agents publish small JSON objects:
//!
//! ```text
//! temperature  {"temperature": 36.8}
//! crying       {"status": "Crying", "probability": 0.93, "timestamp": ...}
//! direction    {"direction": "LeftMoved", "timestamp": ...}
//! frame        {"frame": "<base64 JPEG>", "timestamp": ...}
//! ```
//!
//! Older firmware sends the bare value as plain text, or wraps it as
//! `{"value": ...}`. Both are accepted. Device-side timestamps are ignored.

use std::io::Cursor;
use std::sync::Arc;

use base64::prelude::*;
use image::{ImageFormat, ImageReader};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{CryingStatus, FaceDirection, FrameImage, ReadingValue, TelemetryKind};

/// A decoded payload
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Reading(ReadingValue),
    Frame(FrameImage),
}

/// Decode one payload of the given kind
pub fn decode_payload(kind: TelemetryKind, payload: &[u8]) -> Result<Decoded> {
    let envelope = envelope(payload)?;
    match kind {
        TelemetryKind::Temperature => {
            let value = field(&envelope, &["temperature"])?;
            temperature(value).map(|t| Decoded::Reading(ReadingValue::Temperature(t)))
        }
        TelemetryKind::Crying => {
            let value = field(&envelope, &["status", "crying_status", "crying"])?;
            crying_status(value).map(|s| Decoded::Reading(ReadingValue::CryingStatus(s)))
        }
        TelemetryKind::Direction => {
            let value = field(&envelope, &["direction", "face_direction"])?;
            let label = value
                .as_str()
                .ok_or_else(|| Error::decode(format!("direction is not a string: {}", value)))?;
            FaceDirection::from_label(label).map(|d| Decoded::Reading(ReadingValue::FaceDirection(d)))
        }
        TelemetryKind::Frame => {
            let value = field(&envelope, &["frame", "image"])?;
            let encoded = value
                .as_str()
                .ok_or_else(|| Error::decode("frame is not a base64 string"))?;
            decode_frame(encoded).map(Decoded::Frame)
        }
    }
}

/// Decode a base64 image and read its format and dimensions
pub fn decode_frame(encoded: &str) -> Result<FrameImage> {
    let encoded = match encoded.split_once(";base64,") {
        Some((scheme, data)) if scheme.starts_with("data:") => data,
        _ => encoded,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(Error::decode("empty frame"));
    }

    let bytes = BASE64_STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::decode(format!("frame is not valid base64: {}", e)))?;

    let format = image::guess_format(&bytes)
        .map_err(|e| Error::decode(format!("frame is not a recognised image: {}", e)))?;
    let (width, height) = ImageReader::with_format(Cursor::new(&bytes), format)
        .into_dimensions()
        .map_err(|e| Error::decode(format!("unreadable {:?} frame: {}", format, e)))?;

    Ok(FrameImage {
        data: Arc::from(bytes),
        format: format_name(format),
        width,
        height,
    })
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::Png => "png".to_string(),
        other => format!("{:?}", other).to_ascii_lowercase(),
    }
}

fn envelope(payload: &[u8]) -> Result<Value> {
    if let Ok(value) = serde_json::from_slice::<Value>(payload) {
        return Ok(value);
    }
    let text = std::str::from_utf8(payload)
        .map_err(|_| Error::decode("payload is neither JSON nor UTF-8 text"))?
        .trim();
    if text.is_empty() {
        return Err(Error::decode("empty payload"));
    }
    Ok(Value::String(text.to_string()))
}

fn field<'a>(envelope: &'a Value, keys: &[&str]) -> Result<&'a Value> {
    let Value::Object(map) = envelope else {
        return Ok(envelope);
    };
    keys.iter()
        .chain(std::iter::once(&"value"))
        .find_map(|key| map.get(*key))
        .ok_or_else(|| Error::decode(format!("payload has none of the fields {:?}", keys)))
}

fn temperature(value: &Value) -> Result<f64> {
    let celsius = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::decode(format!("temperature is not a number: {}", value)))?;

    if !celsius.is_finite() {
        return Err(Error::decode(format!("temperature is not finite: {}", celsius)));
    }
    Ok(celsius)
}

fn crying_status(value: &Value) -> Result<CryingStatus> {
    match value {
        Value::String(label) => CryingStatus::from_label(label),
        Value::Bool(true) => Ok(CryingStatus::Crying),
        Value::Bool(false) => Ok(CryingStatus::Silent),
        other => Err(Error::decode(format!("crying status is not a label: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::RgbImage::new(width, height)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn reading(kind: TelemetryKind, payload: &str) -> ReadingValue {
        match decode_payload(kind, payload.as_bytes()).unwrap() {
            Decoded::Reading(value) => value,
            Decoded::Frame(_) => panic!("expected a reading"),
        }
    }

    #[test]
    fn decodes_temperature_variants() {
        for payload in [
            r#"{"temperature": 37.5}"#,
            r#"{"temperature": "37.5"}"#,
            r#"{"value": 37.5}"#,
            "37.5",
            " 37.5\n",
        ] {
            assert_eq!(
                reading(TelemetryKind::Temperature, payload),
                ReadingValue::Temperature(37.5),
                "{}",
                payload
            );
        }
    }

    #[test]
    fn decodes_crying_and_direction() {
        assert_eq!(
            reading(
                TelemetryKind::Crying,
                r#"{"status": "Crying", "probability": 0.9, "timestamp": "2024-01-01T00:00:00"}"#
            ),
            ReadingValue::CryingStatus(CryingStatus::Crying)
        );
        assert_eq!(
            reading(TelemetryKind::Crying, "silent"),
            ReadingValue::CryingStatus(CryingStatus::Silent)
        );
        assert_eq!(
            reading(TelemetryKind::Direction, r#"{"direction": "좌측으로 움직임"}"#),
            ReadingValue::FaceDirection(FaceDirection::LeftMoved)
        );
        assert_eq!(
            reading(TelemetryKind::Direction, r#"{"value": "not_detected"}"#),
            ReadingValue::FaceDirection(FaceDirection::NotDetected)
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        let cases: [(TelemetryKind, &[u8]); 7] = [
            (TelemetryKind::Temperature, b"{\"temperature\": \"warm\"}"),
            (TelemetryKind::Temperature, b"{\"humidity\": 40}"),
            (TelemetryKind::Temperature, b""),
            (TelemetryKind::Crying, b"{\"status\": \"Giggling\"}"),
            (TelemetryKind::Direction, b"{\"direction\": 3}"),
            (TelemetryKind::Frame, b"{\"frame\": \"not base64!!\"}"),
            (TelemetryKind::Frame, &[0xff, 0xfe, 0x00]),
        ];
        for (kind, payload) in cases {
            let err = decode_payload(kind, payload).unwrap_err();
            assert!(matches!(err, Error::Decode(_)), "{:?} {:?}", kind, payload);
        }
    }

    #[test]
    fn decodes_frame_metadata() {
        let bytes = png(4, 3);
        let payload = serde_json::json!({ "frame": BASE64_STANDARD.encode(&bytes) }).to_string();

        let Decoded::Frame(frame) = decode_payload(TelemetryKind::Frame, payload.as_bytes()).unwrap()
        else {
            panic!("expected a frame");
        };
        assert_eq!(frame.format, "png");
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(&*frame.data, bytes.as_slice());
        assert_eq!(frame.size_bytes(), bytes.len());
    }

    #[test]
    fn accepts_data_urls() {
        let bytes = png(1, 1);
        let url = format!("data:image/png;base64,{}", BASE64_STANDARD.encode(&bytes));
        let frame = decode_frame(&url).unwrap();
        assert_eq!((frame.width, frame.height), (1, 1));
    }

    #[test]
    fn rejects_bytes_that_are_not_an_image() {
        let encoded = BASE64_STANDARD.encode(b"plain text, not a picture");
        assert!(matches!(decode_frame(&encoded), Err(Error::Decode(_))));
    }
}
