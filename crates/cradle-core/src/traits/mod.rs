//! Core traits for the cradle telemetry core
//!
//! This module defines the abstract interfaces at the edges of the engine.
//!
//! - [`TelemetrySource`]: Receive telemetry from the bus
//! - [`DeviceRegistry`]: Look up devices and their alert thresholds
//! - [`TelemetryStore`]: Durable readings, frames and alert records
//! - [`Notifier`]: Best-effort alert delivery

pub mod notifier;
pub mod telemetry_source;
pub mod telemetry_store;

pub use notifier::{Notifier, NotifierFactory};
pub use telemetry_source::{BusMessage, TelemetrySource, TelemetrySourceFactory};
pub use telemetry_store::{DeviceRegistry, StoreFactory, StoreHandles, TelemetryStore};
