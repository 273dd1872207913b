//! Plugin-based component registry
//!
//! The registry lets bus, store and notifier implementations be registered
//! at runtime, so the daemon builds its components from configuration
//! without hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cradle_core::registry::ComponentRegistry;
//!
//! let registry = ComponentRegistry::new();
//! cradle_bus_mqtt::register(&registry);
//! cradle_store_sqlite::register(&registry);
//!
//! let source = registry.create_source(&config.bus)?;
//! let store = registry.create_store(&config.store).await?;
//! let notifier = registry.create_notifier(&config.notifier)?;
//! ```
//!
//! ## Registration
//!
//! Implementation crates expose a `register` function:
//!
//! ```rust,ignore
//! pub fn register(registry: &ComponentRegistry) {
//!     registry.register_source("mqtt", Box::new(MqttSourceFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{BusConfig, NotifierConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::store::MemoryStoreFactory;
use crate::traits::{
    Notifier, NotifierFactory, StoreFactory, StoreHandles, TelemetrySource,
    TelemetrySourceFactory,
};

/// Registry of component factories keyed by type name
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
pub struct ComponentRegistry {
    sources: RwLock<HashMap<String, Box<dyn TelemetrySourceFactory>>>,
    stores: RwLock<HashMap<String, Arc<dyn StoreFactory>>>,
    notifiers: RwLock<HashMap<String, Box<dyn NotifierFactory>>>,
}

impl ComponentRegistry {
    /// Create a registry with the built-in memory store registered
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_store("memory", Box::new(MemoryStoreFactory));
        registry
    }

    /// Create a registry with nothing registered
    pub fn empty() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            stores: RwLock::new(HashMap::new()),
            notifiers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a telemetry source factory
    ///
    /// # Parameters
    ///
    /// - `name`: Bus type name (e.g., "mqtt")
    /// - `factory`: Factory object for creating source instances
    pub fn register_source(
        &self,
        name: impl Into<String>,
        factory: Box<dyn TelemetrySourceFactory>,
    ) {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        sources.insert(name.into(), factory);
    }

    /// Register a store factory
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn StoreFactory>) {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.into(), Arc::from(factory));
    }

    /// Register a notifier factory
    pub fn register_notifier(&self, name: impl Into<String>, factory: Box<dyn NotifierFactory>) {
        let mut notifiers = self
            .notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        notifiers.insert(name.into(), factory);
    }

    /// Create a telemetry source from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn TelemetrySource>)`: Created source instance
    /// - `Err(Error)`: If the bus type is not registered or creation fails
    pub fn create_source(&self, config: &BusConfig) -> Result<Box<dyn TelemetrySource>> {
        let source_type = config.type_name();
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);

        let factory = sources
            .get(source_type)
            .ok_or_else(|| Error::config(format!("Unknown bus type: {}", source_type)))?;

        factory.create(config)
    }

    /// Open a store from configuration
    pub async fn create_store(&self, config: &StoreConfig) -> Result<StoreHandles> {
        let store_type = config.type_name();
        let factory = {
            let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
            stores
                .get(store_type)
                .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?
                .clone()
        };

        // Lock released before awaiting
        factory.create(config).await
    }

    /// Create a notifier from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(None)`: Notifications are disabled
    /// - `Ok(Some(notifier))`: Created notifier instance
    /// - `Err(Error)`: If the notifier type is not registered or creation fails
    pub fn create_notifier(&self, config: &NotifierConfig) -> Result<Option<Box<dyn Notifier>>> {
        let Some(notifier_type) = config.type_name() else {
            return Ok(None);
        };
        let notifiers = self
            .notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = notifiers
            .get(notifier_type)
            .ok_or_else(|| Error::config(format!("Unknown notifier type: {}", notifier_type)))?;

        factory.create(config).map(Some)
    }

    pub fn list_sources(&self) -> Vec<String> {
        sorted_keys(&self.sources)
    }

    pub fn list_stores(&self) -> Vec<String> {
        sorted_keys(&self.stores)
    }

    pub fn list_notifiers(&self) -> Vec<String> {
        sorted_keys(&self.notifiers)
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_store(&self, name: &str) -> bool {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_notifier(&self, name: &str) -> bool {
        self.notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_keys<V>(map: &RwLock<HashMap<String, V>>) -> Vec<String> {
    let mut keys: Vec<String> = map
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    keys.sort();
    keys
}
