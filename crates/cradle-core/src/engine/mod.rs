//! Core telemetry engine
//!
//! The CradleEngine is responsible for:
//! - Reading messages from the TelemetrySource
//! - Routing each message to the partition that owns its device
//! - Handing fired alerts to the notification worker
//! - Draining everything and flushing the store on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ TelemetrySource │─── BusMessage ───┐
//! └─────────────────┘                  │
//!                                      ▼
//!                            ┌──────────────────┐
//!                            │   CradleEngine   │  hash(device id)
//!                            └──────────────────┘
//!                     ┌────────────┬───┴────────┬────────────┐
//!                     ▼            ▼            ▼            ▼
//!               partition 0  partition 1  partition 2  partition 3
//!                     │   (IngestionRouter: state, rules, store)
//!                     └────────────┴─────┬──────┴────────────┘
//!                                        ▼ fired alerts
//!                              ┌──────────────────────┐
//!                              │ notification worker  │──▶ Notifier
//!                              └──────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! A device always hashes to the same partition and each partition handles
//! one message at a time, so messages of one device are applied in the order
//! they left the source. Devices on different partitions proceed
//! independently; a slow store write stalls only its own partition.
//!
//! ## Isolation
//!
//! The bus reader never waits on a partition: a full queue drops the message.
//! Each message is ingested in its own task under `ingest_timeout`, so a
//! panic or a hung registry call costs that message only.

mod events;

pub use events::EngineEvent;
pub(crate) use events::EventSink;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::{CradleConfig, EngineConfig};
use crate::error::Result;
use crate::evaluator::AlertEvaluator;
use crate::frame_cache::{FrameCache, LiveFrame};
use crate::ingest::{IngestReport, IngestionRouter, parse_topic};
use crate::model::{AlertRecord, TelemetryKind};
use crate::traits::{BusMessage, DeviceRegistry, Notifier, TelemetrySource, TelemetryStore};
use crate::tracker::{DeviceStateStore, DeviceStatus, bucket_for};

/// A message on its way to a partition worker
#[derive(Debug)]
struct RoutedMessage {
    device_id: String,
    kind: TelemetryKind,
    payload: Vec<u8>,
    received_at: DateTime<Utc>,
}

/// Core telemetry engine
///
/// ## Lifecycle
///
/// 1. Create with [`CradleEngine::new()`]
/// 2. Start with [`CradleEngine::run()`]
/// 3. Engine runs until a shutdown signal is received or the source ends
/// 4. In-flight messages and notifications are drained, then the store is flushed
///
/// ## Load Resistance
///
/// - **Bounded partition queues**: a full queue drops the message (logged)
/// - **Ingest timeout**: a message that takes too long is abandoned (logged)
/// - **Drain deadline**: partitions still busy at the deadline are aborted
/// - **Bounded notification queue**: a full queue drops the notification (logged)
/// - **Bounded event channel**: a full channel drops the event (logged)
pub struct CradleEngine {
    source: Box<dyn TelemetrySource>,
    store: Arc<dyn TelemetryStore>,
    notifier: Option<Arc<dyn Notifier>>,
    router: Arc<IngestionRouter>,
    states: Arc<DeviceStateStore>,
    frames: Arc<FrameCache>,
    config: EngineConfig,
    events: EventSink,
}

impl CradleEngine {
    /// Create a new engine
    ///
    /// # Parameters
    ///
    /// - `source`: Telemetry bus
    /// - `registry`: Device registry
    /// - `store`: Durable telemetry store
    /// - `notifier`: Alert notifier, `None` to only record alerts
    /// - `config`: Configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn TelemetrySource>,
        registry: Arc<dyn DeviceRegistry>,
        store: Arc<dyn TelemetryStore>,
        notifier: Option<Box<dyn Notifier>>,
        config: CradleConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let states = Arc::new(DeviceStateStore::new(config.engine.partitions * 4));
        let frames = Arc::new(FrameCache::new());
        let evaluator = AlertEvaluator::new(config.alerts, config.engine.initial_face_anchor);
        let router = Arc::new(IngestionRouter::new(
            registry,
            store.clone(),
            states.clone(),
            frames.clone(),
            evaluator,
            config.engine.topic_prefix.clone(),
            tx.clone(),
        ));

        let engine = Self {
            source,
            store,
            notifier: notifier.map(Arc::from),
            router,
            states,
            frames,
            config: config.engine,
            events: EventSink::new(tx),
        };

        Ok((engine, rx))
    }

    /// Run the engine
    ///
    /// Processes telemetry until SIGINT is received or the source ends.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: The final store flush failed
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run with a controlled shutdown signal
    ///
    /// Used by embedders that own their own signal handling, and by tests.
    /// `None` behaves like [`run()`](Self::run).
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.events.emit(EngineEvent::Started {
            partitions: self.config.partitions,
        });
        info!(
            "Engine started: {} partitions, source {}",
            self.config.partitions,
            self.source.source_name()
        );

        let (notify_tx, notification_worker) = self.spawn_notification_worker();
        let (partitions, workers) = self.spawn_partitions(notify_tx);

        let mut shutdown = shutdown_signal(shutdown_rx);
        let mut stream = self.source.watch();

        let reason = loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(message) => self.dispatch(&partitions, message),
                    None => {
                        info!("Telemetry source closed");
                        break "Telemetry source closed";
                    }
                },

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break "Shutdown signal";
                }
            }
        };

        // Stop reading before draining
        drop(stream);
        if let Err(e) = self.source.shutdown().await {
            warn!("Failed to shut down {}: {}", self.source.source_name(), e);
        }

        drop(partitions);
        let mut workers = workers;
        let drain = async {
            for (index, worker) in workers.iter_mut().enumerate() {
                if let Err(e) = worker.await {
                    error!("Partition {} worker failed: {}", index, e);
                }
            }
        };
        let drained = tokio::time::timeout(self.config.drain_timeout(), drain).await;
        match drained {
            Ok(()) => debug!("All partitions drained"),
            Err(_) => {
                error!(
                    "Partitions did not drain within {:?}, aborting them",
                    self.config.drain_timeout()
                );
                for worker in &workers {
                    worker.abort();
                }
            }
        }

        if let Some(worker) = notification_worker {
            if let Err(e) = worker.await {
                error!("Notification worker failed: {}", e);
            }
        }

        self.store.flush().await?;
        info!("Store flushed, engine stopped");

        self.events.emit(EngineEvent::Stopped {
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn spawn_notification_worker(
        &self,
    ) -> (Option<mpsc::Sender<AlertRecord>>, Option<JoinHandle<()>>) {
        let Some(notifier) = self.notifier.clone() else {
            debug!("No notifier configured, alerts are only recorded");
            return (None, None);
        };
        let (tx, rx) = mpsc::channel(self.config.notification_queue_capacity);
        let worker = tokio::spawn(notification_worker(
            notifier,
            self.store.clone(),
            rx,
            self.events.clone(),
        ));
        (Some(tx), Some(worker))
    }

    fn spawn_partitions(
        &self,
        notify_tx: Option<mpsc::Sender<AlertRecord>>,
    ) -> (Vec<mpsc::Sender<RoutedMessage>>, Vec<JoinHandle<()>>) {
        (0..self.config.partitions)
            .map(|index| {
                let (tx, rx) = mpsc::channel(self.config.partition_queue_capacity);
                let worker = tokio::spawn(partition_worker(
                    index,
                    self.router.clone(),
                    rx,
                    notify_tx.clone(),
                    self.config.ingest_timeout(),
                    self.events.clone(),
                ));
                (tx, worker)
            })
            .unzip()
    }

    /// Hand a message to the partition owning its device
    ///
    /// Never waits: a full or closed queue drops the message.
    fn dispatch(&self, partitions: &[mpsc::Sender<RoutedMessage>], message: BusMessage) {
        let route = match parse_topic(self.router.topic_prefix(), &message.topic) {
            Ok(route) => route,
            Err(e) => {
                self.router.reject(&message.topic, &e);
                return;
            }
        };

        let index = bucket_for(&route.device_id, partitions.len());
        let routed = RoutedMessage {
            device_id: route.device_id,
            kind: route.kind,
            payload: message.payload,
            received_at: message.received_at,
        };
        let (routed, reason) = match partitions[index].try_send(routed) {
            Ok(()) => return,
            Err(TrySendError::Full(routed)) => {
                warn!(
                    "Partition {} queue full, dropping {} message from {}",
                    index, routed.kind, routed.device_id
                );
                (routed, format!("partition {} queue full", index))
            }
            Err(TrySendError::Closed(routed)) => {
                error!(
                    "Partition {} is gone, dropping message from {}",
                    index, routed.device_id
                );
                (routed, format!("partition {} stopped", index))
            }
        };
        self.events.emit(EngineEvent::MessageDropped {
            origin: routed.device_id,
            reason,
        });
    }

    /// Latest in-memory state of a device
    pub fn live_status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.states.status(device_id)
    }

    /// Devices the engine has accepted telemetry from
    pub fn tracked_devices(&self) -> Vec<String> {
        self.states.devices()
    }

    /// Most recent frame of a device
    pub fn latest_frame(&self, device_id: &str) -> Option<Arc<LiveFrame>> {
        self.frames.latest(device_id)
    }

    /// Shared live frame cache, for live-view servers
    pub fn frame_cache(&self) -> Arc<FrameCache> {
        self.frames.clone()
    }

    /// The router, for ingesting messages that do not come from the bus
    pub fn router(&self) -> Arc<IngestionRouter> {
        self.router.clone()
    }

    pub fn store(&self) -> Arc<dyn TelemetryStore> {
        self.store.clone()
    }
}

fn shutdown_signal(
    shutdown_rx: Option<oneshot::Receiver<()>>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    match shutdown_rx {
        Some(rx) => Box::pin(async move {
            // A dropped sender also stops the engine
            let _ = rx.await;
        }),
        None => Box::pin(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }),
    }
}

/// Aborts the task when dropped, including when the owning worker is aborted
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn partition_worker(
    index: usize,
    router: Arc<IngestionRouter>,
    mut rx: mpsc::Receiver<RoutedMessage>,
    notify_tx: Option<mpsc::Sender<AlertRecord>>,
    ingest_timeout: Duration,
    events: EventSink,
) {
    debug!("Partition {} started", index);

    while let Some(message) = rx.recv().await {
        let device_id = message.device_id.clone();
        let kind = message.kind;

        let task_router = router.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            task_router
                .ingest(
                    &message.device_id,
                    message.kind,
                    &message.payload,
                    message.received_at,
                )
                .await
        }));

        let reason = match tokio::time::timeout(ingest_timeout, &mut task.0).await {
            Ok(Ok(Ok(report))) => {
                forward_alerts(report, notify_tx.as_ref());
                continue;
            }
            // Dropped messages were already logged by the router
            Ok(Ok(Err(_))) => continue,
            Ok(Err(e)) => {
                error!(
                    "Partition {}: ingesting {} from {} failed: {}",
                    index, kind, device_id, e
                );
                format!("ingest task failed: {}", e)
            }
            Err(_) => {
                warn!(
                    "Partition {}: ingesting {} from {} took longer than {:?}, abandoned",
                    index, kind, device_id, ingest_timeout
                );
                format!("ingest timed out after {:?}", ingest_timeout)
            }
        };
        events.emit(EngineEvent::MessageDropped {
            origin: device_id,
            reason,
        });
    }

    debug!("Partition {} drained", index);
}

fn forward_alerts(report: IngestReport, notify_tx: Option<&mpsc::Sender<AlertRecord>>) {
    for fired in report.fired {
        if !fired.push {
            debug!(
                "Push notifications disabled for {}, alert {} not sent",
                fired.alert.device_id, fired.alert.id
            );
            continue;
        }
        let Some(tx) = notify_tx else {
            continue;
        };
        match tx.try_send(fired.alert) {
            Ok(()) => {}
            Err(TrySendError::Full(alert)) => {
                warn!(
                    "Notification queue full, dropping notification for alert {}",
                    alert.id
                );
            }
            Err(TrySendError::Closed(alert)) => {
                warn!(
                    "Notification worker stopped, dropping notification for alert {}",
                    alert.id
                );
            }
        }
    }
}

async fn notification_worker(
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn TelemetryStore>,
    mut rx: mpsc::Receiver<AlertRecord>,
    events: EventSink,
) {
    while let Some(alert) = rx.recv().await {
        match notifier.notify(&alert).await {
            Ok(()) => {
                if let Err(e) = store.mark_notification_sent(alert.id).await {
                    error!(
                        "Alert {} was delivered but could not be marked as sent: {}",
                        alert.id, e
                    );
                    continue;
                }
                debug!(
                    "Alert {} delivered via {}",
                    alert.id,
                    notifier.notifier_name()
                );
                events.emit(EngineEvent::NotificationSent { alert_id: alert.id });
            }
            Err(e) => {
                warn!(
                    "{} failed to deliver alert {}: {}",
                    notifier.notifier_name(),
                    alert.id,
                    e
                );
                events.emit(EngineEvent::NotificationFailed {
                    alert_id: alert.id,
                    error: e.to_string(),
                });
            }
        }
    }
    debug!("Notification queue drained");
}
