// # cradle-core
//
// Core library for smart-cradle telemetry ingestion.
//
// ## Architecture Overview
//
// Edge devices publish temperature, crying status, face direction and camera
// frames to a publish/subscribe bus. This library turns that stream into
// durable readings, alert records and per-alert recordings:
// - **TelemetrySource**: Trait for receiving bus messages
// - **DeviceRegistry / TelemetryStore**: Traits for the relational store
// - **Notifier**: Trait for best-effort alert delivery
// - **IngestionRouter**: Decodes a message and drives state, rules and persistence
// - **CradleEngine**: Partitions devices over workers and owns the lifecycle
// - **ComponentRegistry**: Plugin-based registry for sources, stores and notifiers
//
// ## Design Principles
//
// 1. **Per-device ordering**: a device's messages are applied in arrival order
// 2. **Memory first**: state changes are kept even when a durable write fails
// 3. **Plugin-Based**: implementations are registered dynamically
// 4. **Library-First**: all core functionality can be used as a library

pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod frame_cache;
pub mod ingest;
pub mod model;
pub mod registry;
pub mod store;
pub mod tracker;
pub mod traits;

// Re-export core types for convenience
pub use config::{
    AlertPolicyConfig, BusConfig, CradleConfig, EngineConfig, InitialFaceAnchor, NotifierConfig,
    StoreConfig,
};
pub use engine::{CradleEngine, EngineEvent};
pub use error::{Error, Result};
pub use frame_cache::{FrameCache, LiveFrame};
pub use ingest::{IngestReport, IngestionRouter};
pub use registry::ComponentRegistry;
pub use store::MemoryTelemetryStore;
pub use tracker::DeviceStatus;
pub use traits::{
    BusMessage, DeviceRegistry, Notifier, NotifierFactory, StoreFactory, StoreHandles,
    TelemetrySource, TelemetrySourceFactory, TelemetryStore,
};
