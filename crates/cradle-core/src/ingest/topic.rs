//! Topic layout: `<prefix>/<device id>/<kind>`

use crate::error::{Error, Result};
use crate::model::TelemetryKind;

/// Kinds the engine subscribes to, in subscription order
pub const SUBSCRIBED_KINDS: [TelemetryKind; 4] = [
    TelemetryKind::Temperature,
    TelemetryKind::Crying,
    TelemetryKind::Direction,
    TelemetryKind::Frame,
];

/// Where a message came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoute {
    pub device_id: String,
    pub kind: TelemetryKind,
}

/// Split a topic into device id and kind
pub fn parse_topic(prefix: &str, topic: &str) -> Result<TopicRoute> {
    let prefix = prefix.trim_matches('/');
    let rest = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| Error::decode(format!("topic '{}' is outside prefix '{}'", topic, prefix)))?;

    let mut segments = rest.split('/');
    let (Some(device_id), Some(kind), None) = (segments.next(), segments.next(), segments.next())
    else {
        return Err(Error::decode(format!(
            "topic '{}' is not <prefix>/<device>/<kind>",
            topic
        )));
    };

    if device_id.is_empty() {
        return Err(Error::decode(format!("topic '{}' has an empty device id", topic)));
    }

    Ok(TopicRoute {
        device_id: device_id.to_string(),
        kind: TelemetryKind::parse(kind)?,
    })
}

/// Topic for one device and kind
pub fn topic_for(prefix: &str, device_id: &str, kind: TelemetryKind) -> String {
    format!("{}/{}/{}", prefix.trim_matches('/'), device_id, kind.as_str())
}

/// Wildcard subscriptions covering every device
pub fn subscription_filters(prefix: &str) -> Vec<String> {
    SUBSCRIBED_KINDS
        .iter()
        .map(|kind| topic_for(prefix, "+", *kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_topics() {
        let route = parse_topic("cradle", "cradle/6f1c0a6e/temperature").unwrap();
        assert_eq!(route.device_id, "6f1c0a6e");
        assert_eq!(route.kind, TelemetryKind::Temperature);

        let route = parse_topic("site/a", "site/a/dev-2/face_direction").unwrap();
        assert_eq!(route.device_id, "dev-2");
        assert_eq!(route.kind, TelemetryKind::Direction);
    }

    #[test]
    fn rejects_malformed_topics() {
        for topic in [
            "other/dev/temperature",
            "cradle/dev",
            "cradle//temperature",
            "cradle/dev/temperature/extra",
            "cradle/dev/humidity",
            "cradleX/dev/temperature",
        ] {
            let err = parse_topic("cradle", topic).unwrap_err();
            assert!(err.is_drop(), "{} should be dropped", topic);
        }
    }

    #[test]
    fn builds_subscription_filters() {
        assert_eq!(
            subscription_filters("cradle/"),
            vec![
                "cradle/+/temperature",
                "cradle/+/crying",
                "cradle/+/direction",
                "cradle/+/frame",
            ]
        );
        assert_eq!(
            topic_for("cradle", "dev", TelemetryKind::Frame),
            "cradle/dev/frame"
        );
    }
}
