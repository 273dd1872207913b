// # MQTT Telemetry Source
//
// This crate provides an MQTT-based telemetry source for the cradle core.
//
// ## Architecture
//
// One driver task owns the rumqttc event loop. It subscribes to
// `<prefix>/+/<kind>` for every telemetry kind after each (re)connect and
// forwards inbound publishes into a bounded channel that backs the stream
// returned by `watch()`.
//
// - ✅ QoS 0 subscriptions: telemetry is consumed at-most-once
// - ✅ Reconnect with exponential back-off after connection loss
// - ✅ Bounded hand-off: a stalled engine stops the driver from reading the socket
// - ❌ NO payload decoding (owned by IngestionRouter)
// - ❌ NO publishing to device control topics
//
// ## Security Requirements
//
// - Broker password NEVER appears in logs

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use cradle_core::config::BusConfig;
use cradle_core::ingest::subscription_filters;
use cradle_core::registry::ComponentRegistry;
use cradle_core::{BusMessage, Error, Result, TelemetrySource, TelemetrySourceFactory};

/// Capacity of the request queue between the client handle and the event loop
const CLIENT_QUEUE_CAPACITY: usize = 32;

/// Messages buffered between the driver and the engine
const STREAM_CAPACITY: usize = 1024;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// MQTT telemetry source
pub struct MqttSource {
    client: AsyncClient,
    /// Taken by the first `watch()`
    event_loop: Mutex<Option<EventLoop>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    stop: Arc<Notify>,
    filters: Vec<String>,
    broker: String,
}

impl MqttSource {
    /// Create a source from broker options
    ///
    /// Nothing connects until `watch()` starts the driver.
    pub fn new(options: MqttOptions, topic_prefix: &str) -> Self {
        let (host, port) = options.broker_address();
        let broker = format!("{}:{}", host, port);
        let (client, event_loop) = AsyncClient::new(options, CLIENT_QUEUE_CAPACITY);

        Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            driver: Mutex::new(None),
            stop: Arc::new(Notify::new()),
            filters: subscription_filters(topic_prefix),
            broker,
        }
    }

    /// Topic filters subscribed after each connect
    pub fn filters(&self) -> &[String] {
        &self.filters
    }
}

#[async_trait]
impl TelemetrySource for MqttSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = BusMessage> + Send + 'static>> {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);

        let event_loop = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match event_loop {
            Some(event_loop) => {
                info!(
                    "Starting MQTT telemetry source (broker={}, filters={:?})",
                    self.broker, self.filters
                );
                let handle = tokio::spawn(drive(
                    event_loop,
                    self.client.clone(),
                    self.filters.clone(),
                    tx,
                    self.stop.clone(),
                    self.broker.clone(),
                ));
                *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            // The sender is dropped here, so this stream ends immediately
            None => warn!("MQTT source is already being watched; returning an empty stream"),
        }

        Box::pin(ReceiverStream::new(rx))
    }

    fn source_name(&self) -> &'static str {
        "mqtt"
    }

    async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request not queued: {}", e);
        }
        self.stop.notify_one();

        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| Error::bus(format!("MQTT driver task failed: {}", e)))?;
        }

        info!("MQTT telemetry source stopped");
        Ok(())
    }
}

async fn drive(
    mut event_loop: EventLoop,
    client: AsyncClient,
    filters: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
    stop: Arc<Notify>,
    broker: String,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let event = tokio::select! {
            _ = stop.notified() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker {}", broker);
                backoff = INITIAL_BACKOFF;
                // Clean sessions forget subscriptions, so renew them on every connect
                for filter in &filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        warn!("Failed to subscribe to {}: {}", filter, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage::new(publish.topic, publish.payload.to_vec());
                tokio::select! {
                    _ = stop.notified() => break,
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            debug!("Telemetry stream dropped, stopping MQTT driver");
                            break;
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "MQTT connection to {} failed: {}; retrying in {:?}",
                    broker, e, backoff
                );
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff);
            }
        }
    }

    debug!("MQTT driver stopped");
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Factory for creating MQTT sources
pub struct MqttSourceFactory;

impl TelemetrySourceFactory for MqttSourceFactory {
    fn create(&self, config: &BusConfig) -> Result<Box<dyn TelemetrySource>> {
        match config {
            BusConfig::Mqtt {
                host,
                port,
                client_id,
                topic_prefix,
                keep_alive_secs,
                username,
                password,
            } => {
                config.validate()?;

                let mut options = MqttOptions::new(client_id.clone(), host.clone(), *port);
                options.set_keep_alive(Duration::from_secs(*keep_alive_secs));
                options.set_clean_session(true);
                if let Some(username) = username {
                    options.set_credentials(username.clone(), password.clone().unwrap_or_default());
                }

                Ok(Box::new(MqttSource::new(options, topic_prefix)))
            }
            _ => Err(Error::config("Invalid config for MQTT telemetry source")),
        }
    }
}

/// Register the MQTT source with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_source("mqtt", Box::new(MqttSourceFactory));
}
