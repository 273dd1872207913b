// # Telemetry Store Implementations
//
// Stores that ship with the core. The SQLite backend lives in the
// `cradle-store-sqlite` crate.

pub mod memory;

pub use memory::{MemoryStoreFactory, MemoryTelemetryStore};
