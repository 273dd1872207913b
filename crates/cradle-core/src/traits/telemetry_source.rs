// # Telemetry Source Trait
//
// Defines the interface for receiving device telemetry from a publish/subscribe bus.
//
// ## Implementations
//
// - MQTT: `cradle-bus-mqtt` crate
// - Tests: channel-backed sources in `tests/common`
//
// ## Usage
//
// ```rust,ignore
// use cradle_core::TelemetrySource;
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* TelemetrySource implementation */;
//
//     let mut stream = source.watch();
//     while let Some(message) = stream.next().await {
//         println!("{} ({} bytes)", message.topic, message.payload.len());
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::pin::Pin;
use tokio_stream::Stream;

/// One message delivered by the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Full topic, e.g. `cradle/<device>/temperature`
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Server-side receipt time; all rule timing is measured against this
    pub received_at: DateTime<Utc>,
}

impl BusMessage {
    /// Create a message received now
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::received_at(topic, payload, Utc::now())
    }

    /// Create a message with an explicit receipt time
    pub fn received_at(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at,
        }
    }
}

/// Trait for telemetry bus implementations
///
/// # Delivery
///
/// Telemetry is consumed at-most-once. Sources must not redeliver a message
/// the engine already received, and the engine never acknowledges or retries.
///
/// # Ordering
///
/// Sources are not required to preserve ordering across devices. The engine
/// restores per-device ordering from the point a message leaves the stream.
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Hold a network connection to the broker
/// - ✅ Spawn one task that drives the connection and feeds the stream
/// - ✅ Reconnect with back-off after connection loss
///
/// ## Forbidden Capabilities
/// - ❌ Decode payloads (owned by the ingestion router)
/// - ❌ Touch device state or the store (owned by `CradleEngine`)
/// - ❌ Publish to device control topics
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Stream of inbound messages
    ///
    /// The stream ends only when the source is shut down. It must be
    /// cancellation-safe: dropping it releases the subscription.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = BusMessage> + Send + 'static>>;

    /// Short name used in logs
    fn source_name(&self) -> &'static str;

    /// Release the bus connection
    ///
    /// Called once by the engine after the ingestion loop stopped reading.
    async fn shutdown(&self) -> Result<(), crate::Error> {
        Ok(())
    }
}

/// Helper trait for constructing telemetry sources from configuration
pub trait TelemetrySourceFactory: Send + Sync {
    /// Create a TelemetrySource instance from configuration
    fn create(
        &self,
        config: &crate::config::BusConfig,
    ) -> Result<Box<dyn TelemetrySource>, crate::Error>;
}
