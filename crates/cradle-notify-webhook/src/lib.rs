// # Webhook Notifier
//
// Delivers fired alerts by POSTing a JSON document to a configured URL. A push
// gateway or chat bridge sits behind the webhook; this crate knows nothing
// about the final channel.
//
// ## Behavior
//
// - ✅ One POST per alert, with a request timeout
// - ✅ Optional bearer token in the Authorization header
// - ✅ Any 2xx response counts as delivered
// - ❌ NO retry logic (a failed alert simply stays un-notified)
// - ❌ NO access to the store or device state
//
// ## Security Requirements
//
// - The bearer token NEVER appears in logs or Debug output
//
// ## Payload
//
// ```json
// {
//   "event": "alert",
//   "alert_id": 42,
//   "device_id": "cradle-1",
//   "owner_id": 7,
//   "alert_type": "crying",
//   "message": "Baby has been crying for 30s",
//   "temperature": null,
//   "face_detected": null,
//   "created_at": "2024-03-01T02:13:05Z"
// }
// ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use cradle_core::config::NotifierConfig;
use cradle_core::model::AlertRecord;
use cradle_core::registry::ComponentRegistry;
use cradle_core::{Error, Notifier, NotifierFactory, Result};

/// Webhook alert notifier
pub struct WebhookNotifier {
    url: String,
    /// ⚠️ NEVER log this value
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &self.url)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

impl WebhookNotifier {
    /// Create a notifier for one endpoint
    pub fn new(url: impl Into<String>, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            bearer_token: bearer_token.filter(|token| !token.is_empty()),
            client,
        })
    }

    fn payload(alert: &AlertRecord) -> Value {
        json!({
            "event": "alert",
            "alert_id": alert.id,
            "device_id": alert.device_id,
            "owner_id": alert.owner_id,
            "alert_type": alert.kind.as_str(),
            "message": alert.message,
            "temperature": alert.temperature,
            "face_detected": alert.face_detected,
            "created_at": alert.created_at,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &AlertRecord) -> Result<()> {
        let mut request = self.client.post(&self.url).json(&Self::payload(alert));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::notification(format!("Webhook request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("Webhook rejected alert {}: {}", alert.id, body);
            return Err(Error::notification(format!(
                "Webhook returned HTTP {}",
                status
            )));
        }

        info!(
            "Delivered {} alert {} for device {}",
            alert.kind, alert.id, alert.device_id
        );
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "webhook"
    }
}

/// Factory for creating webhook notifiers
pub struct WebhookFactory;

impl NotifierFactory for WebhookFactory {
    fn create(&self, config: &NotifierConfig) -> Result<Box<dyn Notifier>> {
        match config {
            NotifierConfig::Webhook {
                url,
                timeout_secs,
                bearer_token,
            } => {
                config.validate()?;
                Ok(Box::new(WebhookNotifier::new(
                    url.clone(),
                    bearer_token.clone(),
                    Duration::from_secs(*timeout_secs),
                )?))
            }
            _ => Err(Error::config("Invalid config for webhook notifier")),
        }
    }
}

/// Register the webhook notifier with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_notifier("webhook", Box::new(WebhookFactory));
}
