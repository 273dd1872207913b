//! Architectural Contract Test: Shutdown Determinism
//!
//! This test verifies that shutdown is deterministic and complete.
//!
//! Constraints verified:
//! - Engine terminates on shutdown signal or when the source ends
//! - Messages already handed to partitions are processed before exit
//! - Queued notifications are delivered before exit
//! - The source is released and the store flushed exactly once
//!
//! If this test fails, someone has added:
//! - Detached background tasks
//! - Tasks that ignore cancellation
//! - Blocking operations in shutdown path

mod common;

use common::*;
use cradle_core::model::AlertThresholds;
use cradle_core::{CradleEngine, EngineEvent, TelemetryStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, timeout};

#[tokio::test]
async fn shutdown_signal_terminates_engine() {
    let store = store_with_devices(&["d1"]).await;
    let (engine, mut event_rx) = idle_engine(store, minimal_config());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(shutdown_tx.send(()).is_ok(), "shutdown signal send succeeds");

    let result = timeout(Duration::from_secs(5), engine_handle).await;
    assert!(result.is_ok(), "Engine should terminate within 5 seconds");
    tokio_test::assert_ok!(result.unwrap().unwrap());

    let events = drain_events(&mut event_rx);
    assert_eq!(events.first(), Some(&EngineEvent::Started { partitions: 2 }));
    assert_eq!(
        events.last(),
        Some(&EngineEvent::Stopped {
            reason: "Shutdown signal".to_string()
        })
    );
}

#[tokio::test]
async fn shutdown_flushes_store_once() {
    let store = FlakyStore::new(store_with_devices(&["d1"]).await);
    let shared = Arc::new(store.clone());

    let (engine, _event_rx) = CradleEngine::new(
        Box::new(IdleSource),
        shared.clone(),
        shared,
        None,
        minimal_config(),
    )
    .expect("engine construction succeeds");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();
    engine_handle.await.unwrap().unwrap();

    assert_eq!(
        store.flush_call_count(),
        1,
        "TelemetryStore::flush() should be called exactly once on shutdown"
    );
}

#[tokio::test]
async fn queued_messages_are_drained_before_exit() {
    let store = store_with_devices(&["d1", "d2", "d3", "d4", "d5"]).await;
    let (source, bus) = ControlledSource::new();
    let (_, shutdown_calls) = source.counters();

    let (engine, mut event_rx) = CradleEngine::new(
        Box::new(source),
        store.clone(),
        store.clone(),
        None,
        minimal_config(),
    )
    .expect("engine construction succeeds");

    for secs in 0..10 {
        for device in ["d1", "d2", "d3", "d4", "d5"] {
            bus.send(temperature(device, 36.5, secs)).unwrap();
        }
    }
    // Closing the bus ends the source stream
    drop(bus);

    let result = timeout(Duration::from_secs(5), engine.run_with_shutdown(None)).await;
    assert!(result.is_ok(), "Engine should stop when the source ends");
    result.unwrap().unwrap();

    assert_eq!(store.reading_count().await, 50);
    assert_eq!(shutdown_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.tracked_devices().len(), 5);

    let events = drain_events(&mut event_rx);
    assert_eq!(
        events.last(),
        Some(&EngineEvent::Stopped {
            reason: "Telemetry source closed".to_string()
        })
    );
}

#[tokio::test]
async fn notifications_are_delivered_before_exit() {
    let store = store_with_devices(&["d1", "d2"]).await;
    store
        .set_thresholds(
            "d2",
            AlertThresholds {
                push_notifications_enabled: false,
                ..AlertThresholds::default()
            },
        )
        .await
        .unwrap();

    let notifier = RecordingNotifier::new();
    let (source, bus) = ControlledSource::new();
    let (engine, mut event_rx) = CradleEngine::new(
        Box::new(source),
        store.clone(),
        store.clone(),
        Some(Box::new(notifier.clone())),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    bus.send(temperature("d1", 39.2, 0)).unwrap();
    bus.send(temperature("d2", 39.2, 0)).unwrap();
    drop(bus);

    timeout(Duration::from_secs(5), engine.run())
        .await
        .expect("engine stops when the source ends")
        .unwrap();

    let delivered = notifier.delivered();
    assert_eq!(delivered.len(), 1, "d2 has push notifications disabled");
    assert_eq!(delivered[0].device_id, "d1");

    let d1 = store.alerts_for_device("d1", 10).await.unwrap();
    assert!(d1[0].notification_sent);
    let d2 = store.alerts_for_device("d2", 10).await.unwrap();
    assert_eq!(d2.len(), 1);
    assert!(!d2[0].notification_sent);

    let events = drain_events(&mut event_rx);
    assert!(events.contains(&EngineEvent::NotificationSent {
        alert_id: d1[0].id
    }));
}

#[tokio::test]
async fn failed_notification_keeps_the_alert() {
    let store = store_with_devices(&["d1"]).await;
    let (source, bus) = ControlledSource::new();
    let (engine, _event_rx) = CradleEngine::new(
        Box::new(source),
        store.clone(),
        store.clone(),
        Some(Box::new(RecordingNotifier::failing())),
        minimal_config(),
    )
    .expect("engine construction succeeds");

    bus.send(crying("d1", "Crying", 0)).unwrap();
    bus.send(crying("d1", "Crying", 30)).unwrap();
    drop(bus);

    engine.run_with_shutdown(None).await.unwrap();

    let alerts = store.alerts_for_device("d1", 10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(!alerts[0].notification_sent);
}

#[tokio::test]
async fn source_is_released_after_shutdown() {
    struct CountingDropSource {
        live: Arc<AtomicUsize>,
    }

    impl Drop for CountingDropSource {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl cradle_core::TelemetrySource for CountingDropSource {
        fn watch(
            &self,
        ) -> std::pin::Pin<
            Box<dyn tokio_stream::Stream<Item = cradle_core::BusMessage> + Send + 'static>,
        > {
            Box::pin(tokio_stream::pending())
        }

        fn source_name(&self) -> &'static str {
            "counting"
        }
    }

    let live = Arc::new(AtomicUsize::new(1));
    let store = store_with_devices(&[]).await;
    let (engine, _event_rx) = CradleEngine::new(
        Box::new(CountingDropSource { live: live.clone() }),
        store.clone(),
        store,
        None,
        minimal_config(),
    )
    .expect("engine construction succeeds");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();
    let _ = engine_handle.await;

    assert_eq!(
        live.load(Ordering::SeqCst),
        0,
        "The source should be dropped with the engine"
    );
}

#[tokio::test]
async fn dropped_shutdown_sender_stops_the_engine() {
    let store = store_with_devices(&["d1"]).await;
    let (engine, _event_rx) = idle_engine(store, minimal_config());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    drop(shutdown_tx);

    let result = timeout(Duration::from_secs(5), engine_handle).await;
    assert!(result.is_ok(), "A dropped sender counts as a shutdown signal");
}
