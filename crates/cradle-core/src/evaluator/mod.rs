//! Alert rules
//!
//! Three rules run against each decoded reading, selected by the reading's
//! kind:
//!
//! | Reading | Rule | Fires when |
//! |---------|------|------------|
//! | temperature | high temperature | value > `max_temperature` |
//! | face direction | abnormal position | non-frontal and the face has been away longer than `abnormal_position_timeout` |
//! | crying status | crying | crying continuously for at least `crying_duration_threshold` |
//!
//! Rules are pure: they read the device state (already updated with the
//! current reading) and the device's thresholds, and return candidates.
//! Whether a candidate becomes an alert record is decided afterwards by the
//! de-duplication check against the store.
//!
//! A malformed threshold disables only the rule that reads it; the failure
//! is reported in [`Evaluation::errors`] and the reading is still persisted.

use chrono::{DateTime, Duration, Utc};

use crate::config::{AlertPolicyConfig, InitialFaceAnchor};
use crate::error::Result;
use crate::model::{
    AlertKind, AlertThresholds, CryingStatus, FaceDirection, ReadingValue, elapsed_since,
};
use crate::traits::TelemetryStore;
use crate::tracker::DeviceState;

/// An alert a rule wants to raise
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub kind: AlertKind,
    pub message: String,
    pub temperature: Option<f64>,
    pub face_detected: Option<bool>,
    /// Suppression window for repeats of this kind
    pub dedup_window: Duration,
}

/// Outcome of running the rules for one reading
#[derive(Debug, Default)]
pub struct Evaluation {
    pub candidates: Vec<AlertCandidate>,
    pub errors: Vec<crate::Error>,
}

impl Evaluation {
    fn push(&mut self, outcome: Result<Option<AlertCandidate>>) {
        match outcome {
            Ok(Some(candidate)) => self.candidates.push(candidate),
            Ok(None) => {}
            Err(e) => self.errors.push(e),
        }
    }
}

/// Stateless rule engine
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    policy: AlertPolicyConfig,
    anchor: InitialFaceAnchor,
}

impl AlertEvaluator {
    pub fn new(policy: AlertPolicyConfig, anchor: InitialFaceAnchor) -> Self {
        Self { policy, anchor }
    }

    pub fn policy(&self) -> &AlertPolicyConfig {
        &self.policy
    }

    /// Run the rule matching the reading's kind
    ///
    /// `state` must already reflect `value`.
    pub fn evaluate(
        &self,
        value: &ReadingValue,
        state: &DeviceState,
        thresholds: &AlertThresholds,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let mut evaluation = Evaluation::default();
        match *value {
            ReadingValue::Temperature(celsius) => {
                evaluation.push(self.high_temperature(celsius, thresholds));
            }
            ReadingValue::FaceDirection(direction) => {
                evaluation.push(self.abnormal_position(direction, state, thresholds, now));
            }
            ReadingValue::CryingStatus(status) => {
                evaluation.push(self.crying(status, state, thresholds, now));
            }
        }
        evaluation
    }

    fn high_temperature(
        &self,
        celsius: f64,
        thresholds: &AlertThresholds,
    ) -> Result<Option<AlertCandidate>> {
        let max = thresholds.max_temperature()?;
        if celsius <= max {
            return Ok(None);
        }
        Ok(Some(AlertCandidate {
            kind: AlertKind::HighTemperature,
            message: format!(
                "High temperature detected: {:.1}°C (limit {:.1}°C)",
                celsius, max
            ),
            temperature: Some(celsius),
            face_detected: None,
            dedup_window: self.policy.high_temperature_dedup(),
        }))
    }

    fn abnormal_position(
        &self,
        direction: FaceDirection,
        state: &DeviceState,
        thresholds: &AlertThresholds,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertCandidate>> {
        let timeout = thresholds.abnormal_position_timeout()?;
        if direction.is_frontal() {
            return Ok(None);
        }

        let anchor = match (state.last_normal_face_at, self.anchor) {
            (Some(at), _) => Some(at),
            (None, InitialFaceAnchor::FirstObservation) => state.tracking_since,
            (None, InitialFaceAnchor::Unanchored) => None,
        };

        let away = match anchor {
            Some(at) => {
                let away = elapsed_since(now, at);
                if away <= timeout {
                    return Ok(None);
                }
                Some(away)
            }
            None => None,
        };

        let message = match (direction.face_detected(), away) {
            (false, Some(away)) => {
                format!("Baby's face not detected for {}s", away.num_seconds())
            }
            (false, None) => "Baby's face not detected".to_string(),
            (true, Some(away)) => format!(
                "Baby turned away ({}) for {}s",
                direction.as_str(),
                away.num_seconds()
            ),
            (true, None) => format!("Baby turned away ({})", direction.as_str()),
        };

        let kind = if direction.face_detected() {
            AlertKind::AbnormalPosition
        } else {
            AlertKind::FaceNotDetected
        };

        Ok(Some(AlertCandidate {
            kind,
            message,
            temperature: None,
            face_detected: Some(direction.face_detected()),
            dedup_window: self.policy.position_dedup(),
        }))
    }

    fn crying(
        &self,
        status: CryingStatus,
        state: &DeviceState,
        thresholds: &AlertThresholds,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertCandidate>> {
        let threshold = thresholds.crying_duration_threshold()?;
        if status != CryingStatus::Crying {
            return Ok(None);
        }
        let Some(started) = state.crying_started_at else {
            return Ok(None);
        };

        let crying_for = elapsed_since(now, started);
        if crying_for < threshold {
            return Ok(None);
        }
        Ok(Some(AlertCandidate {
            kind: AlertKind::Crying,
            message: format!("Baby has been crying for {}s", crying_for.num_seconds()),
            temperature: None,
            face_detected: None,
            dedup_window: self.policy.crying_dedup(),
        }))
    }

    /// Whether an unresolved alert from the same rule is still inside its
    /// de-duplication window
    ///
    /// The abnormal-position rule raises two kinds; an unresolved alert of
    /// either suppresses both.
    pub async fn is_suppressed(
        &self,
        store: &dyn TelemetryStore,
        device_id: &str,
        candidate: &AlertCandidate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        for kind in candidate.kind.rule_kinds() {
            let previous = store.latest_unresolved_alert(device_id, *kind).await?;
            if previous
                .is_some_and(|alert| elapsed_since(now, alert.created_at) < candidate.dedup_window)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
