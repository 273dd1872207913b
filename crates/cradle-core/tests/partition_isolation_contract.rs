//! Contract Test: Partition Isolation
//!
//! Constraints verified:
//! - A device with out-of-range thresholds never stops ingestion for the
//!   devices sharing its partition
//! - A message whose ingestion panics is reported and the partition keeps
//!   running
//! - A device whose registry lookup never returns stalls neither the bus
//!   reader nor other partitions, and shutdown still completes

mod common;

use async_trait::async_trait;
use common::*;
use cradle_core::error::Result;
use cradle_core::model::{AlertThresholds, Device};
use cradle_core::tracker::bucket_for;
use cradle_core::{CradleEngine, DeviceRegistry, EngineEvent, MemoryTelemetryStore};
use std::sync::Arc;
use tokio::time::{Duration, Instant, sleep, timeout};

/// Registry that misbehaves for one device and delegates the rest
struct FaultyRegistry {
    inner: Arc<MemoryTelemetryStore>,
    device_id: &'static str,
    fault: Fault,
}

#[derive(Clone, Copy)]
enum Fault {
    Hang,
    Panic,
}

#[async_trait]
impl DeviceRegistry for FaultyRegistry {
    async fn lookup_device(&self, device_id: &str) -> Result<Option<Device>> {
        if device_id == self.device_id {
            match self.fault {
                Fault::Hang => std::future::pending::<()>().await,
                Fault::Panic => panic!("registry row for {} is corrupt", device_id),
            }
        }
        self.inner.lookup_device(device_id).await
    }

    async fn alert_thresholds(&self, device_id: &str) -> Result<Option<AlertThresholds>> {
        self.inner.alert_thresholds(device_id).await
    }
}

fn dropped(events: &[EngineEvent], device_id: &str) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::MessageDropped { origin, reason } if origin == device_id => {
                Some(reason.clone())
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn huge_threshold_does_not_stop_its_partition() {
    let store = store_with_devices(&["d1", "d2"]).await;
    store
        .set_thresholds(
            "d1",
            AlertThresholds {
                abnormal_position_timeout_secs: i64::MAX,
                ..AlertThresholds::default()
            },
        )
        .await
        .unwrap();

    let mut config = minimal_config();
    config.engine.partitions = 1;
    let (source, bus) = ControlledSource::new();
    let (engine, mut events) =
        CradleEngine::new(Box::new(source), store.clone(), store.clone(), None, config).unwrap();

    bus.send(direction("d1", "LeftMoved", 0)).unwrap();
    bus.send(temperature("d2", 36.5, 1)).unwrap();
    bus.send(temperature("d2", 36.6, 2)).unwrap();
    drop(bus);

    timeout(Duration::from_secs(5), engine.run_with_shutdown(None))
        .await
        .expect("engine stops when the source ends")
        .unwrap();

    assert_eq!(store.readings_for("d1").await.len(), 1);
    assert_eq!(store.readings_for("d2").await.len(), 2);
    assert_eq!(store.alert_count().await, 0);

    let events = drain_events(&mut events);
    assert!(dropped(&events, "d1").is_empty());
    assert!(dropped(&events, "d2").is_empty());
}

#[tokio::test]
async fn panicking_ingest_is_reported_and_partition_survives() {
    let store = store_with_devices(&["boom", "d2"]).await;
    let registry = Arc::new(FaultyRegistry {
        inner: store.clone(),
        device_id: "boom",
        fault: Fault::Panic,
    });

    let mut config = minimal_config();
    config.engine.partitions = 1;
    let (source, bus) = ControlledSource::new();
    let (engine, mut events) =
        CradleEngine::new(Box::new(source), registry, store.clone(), None, config).unwrap();

    bus.send(temperature("boom", 36.5, 0)).unwrap();
    bus.send(temperature("d2", 36.5, 1)).unwrap();
    bus.send(temperature("d2", 36.6, 2)).unwrap();
    drop(bus);

    timeout(Duration::from_secs(5), engine.run_with_shutdown(None))
        .await
        .expect("engine stops when the source ends")
        .unwrap();

    assert_eq!(store.readings_for("d2").await.len(), 2);
    assert!(store.readings_for("boom").await.is_empty());

    let events = drain_events(&mut events);
    let reasons = dropped(&events, "boom");
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with("ingest task failed"), "{}", reasons[0]);
}

#[tokio::test]
async fn stuck_device_does_not_stall_other_partitions() {
    let fast = ["fast-0", "fast-1", "fast-2", "fast-3", "fast-4", "fast-5"]
        .into_iter()
        .find(|id| bucket_for(id, 2) != bucket_for("slow", 2))
        .expect("some candidate hashes to the other partition");

    let store = store_with_devices(&["slow", fast]).await;
    let registry = Arc::new(FaultyRegistry {
        inner: store.clone(),
        device_id: "slow",
        fault: Fault::Hang,
    });

    let mut config = minimal_config();
    config.engine.partitions = 2;
    config.engine.partition_queue_capacity = 1;
    config.engine.ingest_timeout_secs = 1;
    config.engine.drain_timeout_secs = 1;

    let (source, bus) = ControlledSource::new();
    let (engine, mut events) =
        CradleEngine::new(Box::new(source), registry, store.clone(), None, config).unwrap();
    let engine = Arc::new(engine);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.run_with_shutdown(Some(shutdown_rx)).await });

    for secs in 0..4 {
        bus.send(temperature("slow", 36.5, secs)).unwrap();
    }
    bus.send(temperature(fast, 36.5, 4)).unwrap();

    // Well inside the ingest timeout of the stuck device
    let deadline = Instant::now() + Duration::from_millis(800);
    while store.readings_for(fast).await.is_empty() && Instant::now() < deadline {
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.readings_for(fast).await.len(), 1);

    shutdown_tx.send(()).unwrap();
    let result = timeout(Duration::from_secs(5), handle)
        .await
        .expect("shutdown completes despite the stuck device");
    result.unwrap().unwrap();
    drop(bus);

    assert!(store.readings_for("slow").await.is_empty());
    let events = drain_events(&mut events);
    let reasons = dropped(&events, "slow");
    assert!(
        reasons.iter().filter(|r| r.contains("queue full")).count() >= 2,
        "{:?}",
        reasons
    );
}
