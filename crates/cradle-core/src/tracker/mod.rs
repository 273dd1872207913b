//! Per-device rolling state
//!
//! Every device the engine has heard from owns one [`DeviceState`]. It holds
//! exactly what the alert rules need (when the face was last seen frontal,
//! when continuous crying started) plus the correlator's recording window
//! and a snapshot of the latest value of each kind for live views.
//!
//! ## Concurrency
//!
//! States live in a [`DeviceStateStore`] split into shards, each behind a
//! plain mutex. Callers get a `&mut DeviceState` inside a closure and must
//! not await while holding it; the engine routes each device to one
//! partition worker so updates for a device are applied in arrival order.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::correlator::{RecordingState, RecordingWindow};
use crate::model::{AlertId, CryingStatus, FaceDirection, ReadingValue};

/// Rolling state for one device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    /// Last time the face was observed frontal
    pub last_normal_face_at: Option<DateTime<Utc>>,

    /// First direction reading ever seen for this device
    pub tracking_since: Option<DateTime<Utc>>,

    /// Latest face direction
    pub face_direction: Option<FaceDirection>,

    /// Time of the latest direction reading
    pub last_direction_at: Option<DateTime<Utc>>,

    /// Start of the current continuous crying episode
    pub crying_started_at: Option<DateTime<Utc>>,

    /// Latest crying status
    pub crying_status: Option<CryingStatus>,

    /// Latest temperature and when it arrived
    pub temperature: Option<(f64, DateTime<Utc>)>,

    /// Time of the latest message of any kind
    pub last_seen_at: Option<DateTime<Utc>>,

    /// Recording window owned by the correlator
    pub recording: RecordingState,
}

impl DeviceState {
    /// Apply one decoded reading
    ///
    /// Temperature never touches the rule state; it only refreshes the
    /// live snapshot.
    pub fn apply(&mut self, value: &ReadingValue, at: DateTime<Utc>) {
        self.last_seen_at = Some(at);

        match *value {
            ReadingValue::Temperature(celsius) => {
                self.temperature = Some((celsius, at));
            }
            ReadingValue::CryingStatus(status) => {
                match status {
                    CryingStatus::Crying => {
                        if self.crying_started_at.is_none() {
                            self.crying_started_at = Some(at);
                        }
                    }
                    CryingStatus::Silent => self.crying_started_at = None,
                }
                self.crying_status = Some(status);
            }
            ReadingValue::FaceDirection(direction) => {
                if self.tracking_since.is_none() {
                    self.tracking_since = Some(at);
                }
                if direction.is_frontal() {
                    self.last_normal_face_at = Some(at);
                }
                self.face_direction = Some(direction);
                self.last_direction_at = Some(at);
            }
        }
    }

    /// Record that a frame arrived
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_seen_at = Some(at);
    }

    /// Live snapshot for dashboards
    pub fn status(&self, device_id: &str) -> DeviceStatus {
        DeviceStatus {
            device_id: device_id.to_string(),
            temperature: self.temperature.map(|(value, _)| value),
            temperature_at: self.temperature.map(|(_, at)| at),
            crying_status: self.crying_status,
            crying_started_at: self.crying_started_at,
            face_direction: self.face_direction,
            last_direction_at: self.last_direction_at,
            last_normal_face_at: self.last_normal_face_at,
            recording: self.recording.window().copied(),
            last_seen_at: self.last_seen_at,
        }
    }
}

/// Read-only view of a device's latest state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub temperature: Option<f64>,
    pub temperature_at: Option<DateTime<Utc>>,
    pub crying_status: Option<CryingStatus>,
    pub crying_started_at: Option<DateTime<Utc>>,
    pub face_direction: Option<FaceDirection>,
    pub last_direction_at: Option<DateTime<Utc>>,
    pub last_normal_face_at: Option<DateTime<Utc>>,
    pub recording: Option<RecordingWindow>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    /// Alert the device is currently recording for, if any
    pub fn recording_alert(&self) -> Option<AlertId> {
        self.recording.map(|w| w.alert_id)
    }
}

/// Stable bucket for a device id
///
/// Used both for state shards and for engine partitions.
pub fn bucket_for(device_id: &str, buckets: usize) -> usize {
    if buckets <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    (hasher.finish() % buckets as u64) as usize
}

/// Sharded map of device states
#[derive(Debug)]
pub struct DeviceStateStore {
    shards: Vec<Mutex<HashMap<String, DeviceState>>>,
}

impl DeviceStateStore {
    /// Create a store with `shards` independent locks (at least one)
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, device_id: &str) -> &Mutex<HashMap<String, DeviceState>> {
        &self.shards[bucket_for(device_id, self.shards.len())]
    }

    /// Run `f` against a device's state, creating it on first contact
    ///
    /// The shard lock is held for the duration of `f`.
    pub fn with_state<R>(&self, device_id: &str, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        let mut shard = self
            .shard(device_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = shard.entry(device_id.to_string()).or_default();
        f(state)
    }

    /// Clone of a device's state, if the device was ever seen
    pub fn snapshot(&self, device_id: &str) -> Option<DeviceState> {
        self.shard(device_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    /// Live status of a device
    pub fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.shard(device_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .map(|state| state.status(device_id))
    }

    /// Ids of every tracked device
    pub fn devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeviceStateStore {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn crying_start_is_kept_until_silent() {
        let mut state = DeviceState::default();
        state.apply(&ReadingValue::CryingStatus(CryingStatus::Crying), t(0));
        state.apply(&ReadingValue::CryingStatus(CryingStatus::Crying), t(10));
        assert_eq!(state.crying_started_at, Some(t(0)));

        state.apply(&ReadingValue::CryingStatus(CryingStatus::Silent), t(20));
        assert_eq!(state.crying_started_at, None);

        state.apply(&ReadingValue::CryingStatus(CryingStatus::Crying), t(30));
        assert_eq!(state.crying_started_at, Some(t(30)));
    }

    #[test]
    fn frontal_refreshes_last_normal_face() {
        let mut state = DeviceState::default();
        state.apply(&ReadingValue::FaceDirection(FaceDirection::LeftMoved), t(0));
        assert_eq!(state.last_normal_face_at, None);
        assert_eq!(state.tracking_since, Some(t(0)));

        state.apply(&ReadingValue::FaceDirection(FaceDirection::Frontal), t(5));
        state.apply(&ReadingValue::FaceDirection(FaceDirection::RightMoved), t(9));
        assert_eq!(state.last_normal_face_at, Some(t(5)));
        assert_eq!(state.face_direction, Some(FaceDirection::RightMoved));
        assert_eq!(state.last_direction_at, Some(t(9)));
        assert_eq!(state.tracking_since, Some(t(0)));
    }

    #[test]
    fn temperature_leaves_rule_state_alone() {
        let mut state = DeviceState::default();
        state.apply(&ReadingValue::CryingStatus(CryingStatus::Crying), t(0));
        let before = state.clone();

        state.apply(&ReadingValue::Temperature(37.2), t(3));
        assert_eq!(state.crying_started_at, before.crying_started_at);
        assert_eq!(state.last_normal_face_at, before.last_normal_face_at);
        assert_eq!(state.temperature, Some((37.2, t(3))));
    }

    #[test]
    fn store_creates_state_on_first_contact() {
        let store = DeviceStateStore::new(4);
        assert!(store.snapshot("a").is_none());

        store.with_state("a", |s| s.touch(t(1)));
        store.with_state("b", |s| {
            s.apply(&ReadingValue::Temperature(36.5), t(2))
        });

        assert_eq!(store.len(), 2);
        assert_eq!(store.devices(), vec!["a".to_string(), "b".to_string()]);
        let status = store.status("b").unwrap();
        assert_eq!(status.temperature, Some(36.5));
        assert_eq!(status.last_seen_at, Some(t(2)));
        assert!(status.recording_alert().is_none());
    }

    #[test]
    fn buckets_are_stable() {
        for id in ["a", "cradle-1", "6f1c0a6e-3d1b-4c8e-9a0f-2b7d5c1e8f90"] {
            let first = bucket_for(id, 8);
            assert!(first < 8);
            assert_eq!(first, bucket_for(id, 8));
        }
        assert_eq!(bucket_for("anything", 1), 0);
        assert_eq!(bucket_for("anything", 0), 0);
    }

    #[test]
    fn recording_survives_snapshot() {
        let store = DeviceStateStore::default();
        store.with_state("a", |s| {
            s.recording.open(7, t(0));
        });
        let status = store.status("a").unwrap();
        assert_eq!(status.recording_alert(), Some(7));

        let later = t(0) + Duration::seconds(1);
        let id = store.with_state("a", |s| s.recording.correlation_id(later));
        assert_eq!(id, Some(7));
    }
}
