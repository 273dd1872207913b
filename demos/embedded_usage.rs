//! Minimal embedding example for cradle-core
//!
//! Replays a short scripted session from one cradle through the engine using
//! the in-memory store, a channel-backed telemetry source and a notifier that
//! prints alerts. The application owns the whole engine lifecycle.

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use cradle_core::model::AlertRecord;
use cradle_core::{
    BusMessage, CradleConfig, CradleEngine, MemoryTelemetryStore, Notifier, Result,
    TelemetrySource, TelemetryStore,
};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// 1x1 PNG, as the camera would publish it
const TINY_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

/// Telemetry source fed by the application
struct ChannelSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<BusMessage>>>,
}

impl ChannelSource {
    fn new() -> (Self, mpsc::UnboundedSender<BusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait::async_trait]
impl TelemetrySource for ChannelSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = BusMessage> + Send + 'static>> {
        if let Some(rx) = self.rx.lock().ok().and_then(|mut rx| rx.take()) {
            return Box::pin(UnboundedReceiverStream::new(rx));
        }
        Box::pin(tokio_stream::empty())
    }

    fn source_name(&self) -> &'static str {
        "embedded"
    }
}

/// Notifier that prints instead of pushing
struct PrintNotifier;

#[async_trait::async_trait]
impl Notifier for PrintNotifier {
    async fn notify(&self, alert: &AlertRecord) -> Result<()> {
        println!("[Notify] {} on {}: {}", alert.kind, alert.device_id, alert.message);
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "print"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    println!("=== Embedded cradle-core Example ===\n");

    println!("1. Registering the cradle...");
    let store = Arc::new(MemoryTelemetryStore::new());
    store.register_device("cradle-1", "192.168.0.20").await?;
    store.assign_owner("cradle-1", 1).await?;

    let (source, bus) = ChannelSource::new();
    let (engine, mut event_rx) = CradleEngine::new(
        Box::new(source),
        store.clone(),
        store.clone(),
        Some(Box::new(PrintNotifier)),
        CradleConfig::default(),
    )?;

    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {:?}", event);
        }
    });

    println!("2. Replaying a scripted session...");
    let start = Utc::now();
    let at = |secs: i64| start + Duration::seconds(secs);
    let script = [
        ("temperature", r#"{"temperature": 36.8}"#.to_string(), 0),
        ("direction", r#"{"direction": "Frontal"}"#.to_string(), 1),
        ("crying", r#"{"status": "Crying"}"#.to_string(), 5),
        ("crying", r#"{"status": "Crying"}"#.to_string(), 20),
        ("crying", r#"{"status": "Crying"}"#.to_string(), 35),
        ("frame", serde_json::json!({ "frame": TINY_PNG }).to_string(), 36),
        ("temperature", r#"{"temperature": 37.1}"#.to_string(), 40),
        ("direction", r#"{"direction": "LeftMoved"}"#.to_string(), 41),
    ];
    for (kind, payload, secs) in script {
        let topic = format!("cradle/cradle-1/{}", kind);
        let _ = bus.send(BusMessage::received_at(topic, payload, at(secs)));
    }

    // Closing the channel ends the stream, which stops the engine
    drop(bus);
    engine.run_with_shutdown(None).await?;

    println!("\n3. Engine stopped; inspecting results...");
    if let Some(status) = engine.live_status("cradle-1") {
        println!("   Live status: {:?}", status);
    }
    if let Some(frame) = engine.latest_frame("cradle-1") {
        println!(
            "   Latest frame: {} {}x{} ({} bytes)",
            frame.image.format,
            frame.image.width,
            frame.image.height,
            frame.image.size_bytes()
        );
    }

    for alert in store.alerts_for_device("cradle-1", 10).await? {
        println!(
            "   Alert {} ({}), notified: {}",
            alert.id, alert.kind, alert.notification_sent
        );
        if let Some(detail) = store.alert_detail(alert.id).await? {
            println!(
                "     recorded {} reading(s) and {} frame(s)",
                detail.readings.len(),
                detail.frames.len()
            );
        }
    }

    drop(engine);
    let _ = event_listener.await;

    println!("\n=== Embedding Successful ===");
    Ok(())
}
