// # cradled - Cradle Telemetry Daemon
//
// Thin integration layer around cradle-core. All ingestion, alerting and
// recording logic lives in the library; the daemon only:
// 1. Reads configuration from environment variables
// 2. Initializes tracing and the runtime
// 3. Registers the bus, store and notifier implementations
// 4. Runs the engine until SIGTERM/SIGINT or until the bus closes
//
// ## Configuration
//
// ### Bus
// - `CRADLE_MQTT_HOST`: Broker host (default: localhost)
// - `CRADLE_MQTT_PORT`: Broker port (default: 1883)
// - `CRADLE_MQTT_CLIENT_ID`: Client identifier (default: cradled)
// - `CRADLE_MQTT_USERNAME` / `CRADLE_MQTT_PASSWORD`: Optional credentials
// - `CRADLE_MQTT_KEEP_ALIVE_SECS`: Keep-alive interval (default: 60)
// - `CRADLE_TOPIC_PREFIX`: First topic segment (default: cradle)
//
// ### Store
// - `CRADLE_STORE_TYPE`: sqlite or memory (default: sqlite)
// - `CRADLE_STORE_PATH`: Database file (required for sqlite)
//
// ### Notifications
// - `CRADLE_WEBHOOK_URL`: Alert webhook; notifications are off when unset
// - `CRADLE_WEBHOOK_TOKEN`: Optional bearer token
// - `CRADLE_WEBHOOK_TIMEOUT_SECS`: Request timeout (default: 10)
//
// ### Engine
// - `CRADLE_PARTITIONS`: Ingestion partitions (default: 4)
// - `CRADLE_PARTITION_QUEUE`: Per-partition queue capacity (default: 256)
// - `CRADLE_FACE_ANCHOR`: first_observation or unanchored (default: first_observation)
// - `CRADLE_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export CRADLE_MQTT_HOST=broker.local
// export CRADLE_STORE_TYPE=sqlite
// export CRADLE_STORE_PATH=/var/lib/cradle/cradle.db
// export CRADLE_WEBHOOK_URL=https://push.example.com/alerts
//
// cradled
// ```

use anyhow::{Context, Result, bail};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

use cradle_core::{
    BusConfig, ComponentRegistry, CradleConfig, CradleEngine, EngineConfig, InitialFaceAnchor,
    NotifierConfig, StoreConfig,
};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum CradleExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<CradleExitCode> for ExitCode {
    fn from(code: CradleExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration as read from the environment
///
/// No Debug derive: the MQTT password and webhook token must never be printed.
struct Config {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_keep_alive_secs: u64,
    topic_prefix: String,
    store_type: String,
    store_path: Option<String>,
    webhook_url: Option<String>,
    webhook_token: Option<String>,
    webhook_timeout_secs: u64,
    partitions: usize,
    partition_queue: usize,
    face_anchor: String,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Ok(Self {
            mqtt_host: text("CRADLE_MQTT_HOST", "localhost"),
            mqtt_port: parse_var(&lookup, "CRADLE_MQTT_PORT", 1883)?,
            mqtt_client_id: text("CRADLE_MQTT_CLIENT_ID", "cradled"),
            mqtt_username: optional("CRADLE_MQTT_USERNAME"),
            mqtt_password: optional("CRADLE_MQTT_PASSWORD"),
            mqtt_keep_alive_secs: parse_var(&lookup, "CRADLE_MQTT_KEEP_ALIVE_SECS", 60)?,
            topic_prefix: text("CRADLE_TOPIC_PREFIX", "cradle"),
            store_type: text("CRADLE_STORE_TYPE", "sqlite"),
            store_path: optional("CRADLE_STORE_PATH"),
            webhook_url: optional("CRADLE_WEBHOOK_URL"),
            webhook_token: optional("CRADLE_WEBHOOK_TOKEN"),
            webhook_timeout_secs: parse_var(&lookup, "CRADLE_WEBHOOK_TIMEOUT_SECS", 10)?,
            partitions: parse_var(&lookup, "CRADLE_PARTITIONS", 4)?,
            partition_queue: parse_var(&lookup, "CRADLE_PARTITION_QUEUE", 256)?,
            face_anchor: text("CRADLE_FACE_ANCHOR", "first_observation"),
            log_level: text("CRADLE_LOG_LEVEL", "info"),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.store_type.as_str() {
            "memory" => {}
            "sqlite" => {
                let Some(path) = &self.store_path else {
                    bail!(
                        "CRADLE_STORE_PATH is required when CRADLE_STORE_TYPE=sqlite. \
                        Set it via: export CRADLE_STORE_PATH=/var/lib/cradle/cradle.db"
                    );
                };
                if let Some(parent) = std::path::Path::new(path).parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    bail!(
                        "CRADLE_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                        parent.display(),
                        parent.display()
                    );
                }
            }
            other => bail!(
                "CRADLE_STORE_TYPE '{}' is not supported. Supported types: sqlite, memory",
                other
            ),
        }

        if self.mqtt_password.is_some() && self.mqtt_username.is_none() {
            bail!("CRADLE_MQTT_PASSWORD is set but CRADLE_MQTT_USERNAME is missing");
        }

        if !(1..=64).contains(&self.partitions) {
            bail!(
                "CRADLE_PARTITIONS must be between 1 and 64. Got: {}",
                self.partitions
            );
        }

        self.initial_face_anchor()?;
        self.level()?;

        self.cradle_config()
            .validate()
            .context("invalid engine configuration")?;

        Ok(())
    }

    fn initial_face_anchor(&self) -> Result<InitialFaceAnchor> {
        match self.face_anchor.to_lowercase().as_str() {
            "first_observation" => Ok(InitialFaceAnchor::FirstObservation),
            "unanchored" => Ok(InitialFaceAnchor::Unanchored),
            other => bail!(
                "CRADLE_FACE_ANCHOR '{}' is not valid. Valid values: first_observation, unanchored",
                other
            ),
        }
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => bail!(
                "CRADLE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    /// Translate into the library configuration
    fn cradle_config(&self) -> CradleConfig {
        let mut config = CradleConfig::new();

        config.bus = BusConfig::Mqtt {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            topic_prefix: self.topic_prefix.clone(),
            keep_alive_secs: self.mqtt_keep_alive_secs,
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
        };

        config.store = match (self.store_type.as_str(), &self.store_path) {
            ("sqlite", Some(path)) => StoreConfig::Sqlite { path: path.clone() },
            _ => StoreConfig::Memory,
        };

        config.notifier = match &self.webhook_url {
            Some(url) => NotifierConfig::Webhook {
                url: url.clone(),
                timeout_secs: self.webhook_timeout_secs,
                bearer_token: self.webhook_token.clone(),
            },
            None => NotifierConfig::None,
        };

        config.engine = EngineConfig {
            partitions: self.partitions,
            partition_queue_capacity: self.partition_queue,
            topic_prefix: self.topic_prefix.clone(),
            initial_face_anchor: self
                .initial_face_anchor()
                .unwrap_or_default(),
            ..EngineConfig::default()
        };

        config
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", key, value, e)),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return CradleExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return CradleExitCode::ConfigError.into();
    }

    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return CradleExitCode::ConfigError.into();
    }

    info!("Starting cradled daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return CradleExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => CradleExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                CradleExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let registry = ComponentRegistry::new();

    #[cfg(feature = "mqtt")]
    {
        info!("Registering MQTT telemetry source");
        cradle_bus_mqtt::register(&registry);
    }

    #[cfg(feature = "sqlite")]
    {
        info!("Registering SQLite store");
        cradle_store_sqlite::register(&registry);
    }

    #[cfg(feature = "webhook")]
    {
        info!("Registering webhook notifier");
        cradle_notify_webhook::register(&registry);
    }

    let cradle_config = config.cradle_config();

    let source = registry
        .create_source(&cradle_config.bus)
        .context("failed to create telemetry source")?;
    let handles = registry
        .create_store(&cradle_config.store)
        .await
        .context("failed to open store")?;
    let notifier = registry
        .create_notifier(&cradle_config.notifier)
        .context("failed to create notifier")?;

    info!("Telemetry source: {}", source.source_name());
    info!("Store: {}", cradle_config.store.type_name());
    match &notifier {
        Some(notifier) => info!("Notifier: {}", notifier.notifier_name()),
        None => info!("Notifier: disabled"),
    }

    let (engine, mut events) = CradleEngine::new(
        source,
        handles.registry,
        handles.store,
        notifier,
        cradle_config,
    )?;

    // Ends when the engine drops its event sender
    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("Engine event: {:?}", event);
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let signals = tokio::spawn(signal_task(wait_for_shutdown(), shutdown_tx));

    let result = engine.run_with_shutdown(Some(shutdown_rx)).await;

    // The bus may have closed before any signal arrived
    signals.abort();
    drop(engine);
    let _ = event_logger.await;

    result?;
    info!("cradled stopped");
    Ok(())
}

/// Trigger shutdown on the first signal
///
/// If the handlers cannot be installed the sender is kept alive, so the
/// daemon keeps running until the bus closes.
async fn signal_task(
    signals: impl Future<Output = Result<&'static str>>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
) {
    match signals.await {
        Ok(signal) => {
            info!("Received shutdown signal: {}", signal);
            let _ = shutdown_tx.send(());
        }
        Err(e) => {
            error!("Signal handling failed, shutdown by signal is unavailable: {:#}", e);
            std::future::pending::<()>().await;
            drop(shutdown_tx);
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[tokio::test]
    async fn signal_triggers_shutdown() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        signal_task(async { Ok::<_, anyhow::Error>("SIGTERM") }, tx).await;
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn failed_signal_setup_keeps_running() {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(signal_task(
            async { Err::<&'static str, _>(anyhow::anyhow!("signal driver unavailable")) },
            tx,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::oneshot::error::TryRecvError::Empty)
        ));
        task.abort();
    }

    #[test]
    fn defaults_need_a_store_path() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.mqtt_port, 1883);
        assert!(config.validate().is_err());

        let config = config_from(&[("CRADLE_STORE_TYPE", "memory")]).unwrap();
        assert!(config.validate().is_ok());
        assert!(matches!(config.cradle_config().notifier, NotifierConfig::None));
    }

    #[test]
    fn prefix_reaches_bus_and_engine() {
        let config = config_from(&[
            ("CRADLE_STORE_TYPE", "memory"),
            ("CRADLE_TOPIC_PREFIX", "nursery"),
            ("CRADLE_FACE_ANCHOR", "unanchored"),
        ])
        .unwrap();
        let cradle = config.cradle_config();
        assert_eq!(cradle.engine.topic_prefix, "nursery");
        assert_eq!(cradle.engine.initial_face_anchor, InitialFaceAnchor::Unanchored);
        match cradle.bus {
            BusConfig::Mqtt { topic_prefix, .. } => assert_eq!(topic_prefix, "nursery"),
            other => panic!("unexpected bus config {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config_from(&[("CRADLE_MQTT_PORT", "eighty")]).is_err());

        for vars in [
            vec![("CRADLE_STORE_TYPE", "postgres")],
            vec![("CRADLE_STORE_TYPE", "memory"), ("CRADLE_PARTITIONS", "0")],
            vec![("CRADLE_STORE_TYPE", "memory"), ("CRADLE_LOG_LEVEL", "loud")],
            vec![("CRADLE_STORE_TYPE", "memory"), ("CRADLE_FACE_ANCHOR", "sideways")],
            vec![("CRADLE_STORE_TYPE", "memory"), ("CRADLE_WEBHOOK_URL", "push.local")],
            vec![("CRADLE_STORE_TYPE", "memory"), ("CRADLE_MQTT_PASSWORD", "pw")],
        ] {
            let config = config_from(&vars).unwrap();
            assert!(config.validate().is_err(), "{:?} should be rejected", vars);
        }
    }

    #[test]
    fn webhook_enables_notifications() {
        let config = config_from(&[
            ("CRADLE_STORE_TYPE", "memory"),
            ("CRADLE_WEBHOOK_URL", "https://push.example.com/alerts"),
            ("CRADLE_WEBHOOK_TOKEN", "s3cret"),
        ])
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cradle_config().notifier.type_name(), Some("webhook"));
    }
}
