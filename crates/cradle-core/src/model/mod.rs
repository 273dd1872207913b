//! Data model shared by the core and its store implementations

pub mod alert;
pub mod device;
pub mod reading;

pub use alert::{AlertDetail, AlertId, AlertKind, AlertRecord, NewAlert};
pub use device::{AccountId, AlertThresholds, Device};
pub use reading::{
    CryingStatus, FaceDirection, Frame, FrameId, FrameImage, NewFrame, NewReading, Reading,
    ReadingId, ReadingKind, ReadingValue, TelemetryKind,
};

use chrono::{DateTime, Duration, Utc};

/// Wall-clock time elapsed from `earlier` to `now`
///
/// Device and server clocks drift; a negative span is clamped to zero so a
/// skewed timestamp never makes a window look already expired.
pub fn elapsed_since(now: DateTime<Utc>, earlier: DateTime<Utc>) -> Duration {
    let elapsed = now.signed_duration_since(earlier);
    if elapsed < Duration::zero() {
        Duration::zero()
    } else {
        elapsed
    }
}
