//! Settings file and environment loading.
//!
//! Sources, later wins:
//! 1. built-in defaults (`#[serde(default)]`)
//! 2. `config/courier.toml` (or `--config`), optional
//! 3. `COURIER_*` environment variables, `__` between sections,
//!    e.g. `COURIER_ENDPOINT__WORKERS=8`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use courier_core::config::{HeartbeatConfig, MetricsConfig, RecoverabilityConfig};
use courier_core::{CourierError, EndpointAddress, EndpointConfig, MessageType};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/courier.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoint: EndpointSettings,
    pub recoverability: RecoverabilitySettings,
    pub heartbeat: HeartbeatSettings,
    pub metrics: MetricsSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub name: String,
    pub connection_string: String,
    pub workers: usize,
    pub audit_queue: Option<String>,
    pub error_queue: String,
    pub auto_subscribe: bool,
    pub subscription_cache_ttl_secs: u64,
    pub receive_timeout_ms: u64,
    /// message type -> destination endpoint
    pub routes: BTreeMap<String, String>,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            name: "courier.demo".to_string(),
            connection_string: "memory://default".to_string(),
            workers: 4,
            audit_queue: None,
            error_queue: "error".to_string(),
            auto_subscribe: true,
            subscription_cache_ttl_secs: 60,
            receive_timeout_ms: 1_000,
            routes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverabilitySettings {
    pub enabled: bool,
    pub immediate_retries: u32,
    pub delayed_retries: u32,
    pub time_increase_secs: u64,
}

impl Default for RecoverabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            immediate_retries: 5,
            delayed_retries: 3,
            time_increase_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub enabled: bool,
    /// Defaults to the error queue.
    pub destination: Option<String>,
    pub interval_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: None,
            interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub destination: String,
    pub interval_ms: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: "metrics".to_string(),
            interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, used when neither `RUST_LOG` nor `COURIER_LOG` is set.
    pub filter: Option<String>,
    /// Write a daily rolling log file here in addition to stdout.
    pub directory: Option<PathBuf>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_from(path, None)
    }

    /// `env` replaces the process environment; used by tests.
    pub fn load_from(path: &Path, env: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }

    pub fn endpoint_config(&self) -> Result<EndpointConfig, CourierError> {
        let e = &self.endpoint;
        let r = &self.recoverability;
        let h = &self.heartbeat;
        let m = &self.metrics;

        let mut builder = EndpointConfig::builder(e.name.clone())
            .connection_string(e.connection_string.clone())
            .workers(e.workers)
            .audit_queue(e.audit_queue.as_deref().map(EndpointAddress::new))
            .error_queue(EndpointAddress::new(e.error_queue.clone()))
            .auto_subscribe(e.auto_subscribe)
            .subscription_cache_ttl(Duration::from_secs(e.subscription_cache_ttl_secs))
            .receive_timeout(Duration::from_millis(e.receive_timeout_ms))
            .recoverability(RecoverabilityConfig {
                enabled: r.enabled,
                immediate_retries: r.immediate_retries,
                delayed_retries: r.delayed_retries,
                time_increase: Duration::from_secs(r.time_increase_secs),
            })
            .heartbeat(HeartbeatConfig {
                enabled: h.enabled,
                destination: h.destination.as_deref().map(EndpointAddress::new),
                interval: Duration::from_secs(h.interval_secs),
            })
            .metrics(MetricsConfig {
                enabled: m.enabled,
                destination: EndpointAddress::new(m.destination.clone()),
                interval: Duration::from_millis(m.interval_ms),
            });
        for (message_type, destination) in &e.routes {
            builder = builder.route(
                MessageType::new(message_type.clone()),
                EndpointAddress::new(destination.clone()),
            );
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn no_env() -> Option<config::Map<String, String>> {
        Some(config::Map::new())
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load_from(Path::new("does/not/exist.toml"), no_env()).unwrap();
        assert_eq!(settings.endpoint.name, "courier.demo");
        assert_eq!(settings.endpoint.workers, 4);
        assert!(settings.recoverability.enabled);
        assert_eq!(settings.recoverability.immediate_retries, 5);

        let config = settings.endpoint_config().unwrap();
        assert_eq!(config.error_queue().as_str(), "error");
        assert_eq!(config.heartbeat_destination().as_str(), "error");
    }

    #[test]
    fn file_values_are_applied() {
        let file = write_config(
            r#"
[endpoint]
name = "sales"
workers = 2
audit_queue = "audit"

[endpoint.routes]
"acme.billing.charge.v1" = "billing"

[recoverability]
immediate_retries = 3
delayed_retries = 2
time_increase_secs = 30

[heartbeat]
enabled = true
destination = "monitor"
"#,
        );
        let settings = Settings::load_from(file.path(), no_env()).unwrap();
        let config = settings.endpoint_config().unwrap();

        assert_eq!(config.name().as_str(), "sales");
        assert_eq!(config.workers(), 2);
        assert_eq!(config.audit_queue().map(|q| q.as_str()), Some("audit"));
        assert_eq!(config.recoverability().delayed_retries, 2);
        assert_eq!(config.recoverability().time_increase, Duration::from_secs(30));
        assert_eq!(config.heartbeat_destination().as_str(), "monitor");
        assert_eq!(
            config
                .routes()
                .get(&MessageType::new("acme.billing.charge.v1"))
                .map(|d| d.as_str()),
            Some("billing")
        );
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config("[endpoint]\nworkers = 2\n");
        let env = config::Map::from([
            ("COURIER_ENDPOINT__WORKERS".to_string(), "8".to_string()),
            ("COURIER_RECOVERABILITY__ENABLED".to_string(), "false".to_string()),
        ]);

        let settings = Settings::load_from(file.path(), Some(env)).unwrap();
        assert_eq!(settings.endpoint.workers, 8);
        assert!(!settings.recoverability.enabled);
    }

    #[test]
    fn invalid_values_are_rejected_when_converted() {
        let file = write_config("[endpoint]\nname = \"sales\"\nerror_queue = \"sales\"\n");
        let settings = Settings::load_from(file.path(), no_env()).unwrap();
        assert!(matches!(
            settings.endpoint_config(),
            Err(CourierError::InvalidConfig(_))
        ));
    }
}
