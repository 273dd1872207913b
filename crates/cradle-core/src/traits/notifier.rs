// # Notifier Trait
//
// Defines the interface for delivering fired alerts to an external
// notification channel (push gateway, webhook, ...).
//
// ## Implementations
//
// - Webhook: `cradle-notify-webhook` crate

use async_trait::async_trait;

use crate::model::AlertRecord;

/// Trait for alert notification channels
///
/// Delivery is best-effort. The engine calls `notify` from a dedicated worker
/// after the alert record was committed; a failure is logged and never rolls
/// the record back.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS calls to its own endpoint
///
/// ## Forbidden Capabilities
/// - ❌ Retry in a loop (one attempt per alert)
/// - ❌ Access the store or device state
/// - ❌ Spawn tasks
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Delivered; the engine marks the record as notified
    /// - `Err(Error)`: Delivery failed; the record stays un-notified
    async fn notify(&self, alert: &AlertRecord) -> Result<(), crate::Error>;

    /// Short name used in logs
    fn notifier_name(&self) -> &'static str;
}

/// Helper trait for constructing notifiers from configuration
pub trait NotifierFactory: Send + Sync {
    /// Create a Notifier instance from configuration
    fn create(
        &self,
        config: &crate::config::NotifierConfig,
    ) -> Result<Box<dyn Notifier>, crate::Error>;
}
