//! Resolved endpoint configuration.
//!
//! The core never reads configuration files. A bootstrap (see `courier-cli`)
//! resolves raw settings and feeds them through [`EndpointConfigBuilder`],
//! which validates once and hands out an immutable [`EndpointConfig`].

use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::{EndpointAddress, MessageType};
use crate::error::{CourierError, Result};

/// Immediate/delayed retry limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverabilityConfig {
    /// When false the first handler failure dead-letters the message.
    pub enabled: bool,
    pub immediate_retries: u32,
    pub delayed_retries: u32,
    /// Linear increment between delayed retries (`round * time_increase`).
    pub time_increase: Duration,
}

impl Default for RecoverabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            immediate_retries: 5,
            delayed_retries: 3,
            time_increase: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Falls back to the error queue when unset.
    pub destination: Option<EndpointAddress>,
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: None,
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Collector queue the periodic reports are pushed to.
    pub destination: EndpointAddress,
    pub interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: EndpointAddress::new("metrics"),
            interval: Duration::from_millis(10_000),
        }
    }
}

/// Configuration of one endpoint. Read-only once built.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    name: EndpointAddress,
    connection_string: String,
    workers: usize,
    audit_queue: Option<EndpointAddress>,
    error_queue: EndpointAddress,
    auto_subscribe: bool,
    subscription_cache_ttl: Duration,
    receive_timeout: Duration,
    routes: BTreeMap<MessageType, EndpointAddress>,
    recoverability: RecoverabilityConfig,
    heartbeat: HeartbeatConfig,
    metrics: MetricsConfig,
}

impl EndpointConfig {
    pub fn builder(name: impl Into<String>) -> EndpointConfigBuilder {
        EndpointConfigBuilder::new(name)
    }

    pub fn name(&self) -> &EndpointAddress {
        &self.name
    }

    /// The endpoint's input queue (same as its name).
    pub fn input_queue(&self) -> &EndpointAddress {
        &self.name
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn audit_queue(&self) -> Option<&EndpointAddress> {
        self.audit_queue.as_ref()
    }

    pub fn error_queue(&self) -> &EndpointAddress {
        &self.error_queue
    }

    pub fn auto_subscribe(&self) -> bool {
        self.auto_subscribe
    }

    pub fn subscription_cache_ttl(&self) -> Duration {
        self.subscription_cache_ttl
    }

    /// Upper bound of one long-poll wait for new messages.
    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    pub fn routes(&self) -> &BTreeMap<MessageType, EndpointAddress> {
        &self.routes
    }

    pub fn recoverability(&self) -> &RecoverabilityConfig {
        &self.recoverability
    }

    pub fn heartbeat(&self) -> &HeartbeatConfig {
        &self.heartbeat
    }

    pub fn heartbeat_destination(&self) -> &EndpointAddress {
        self.heartbeat
            .destination
            .as_ref()
            .unwrap_or(&self.error_queue)
    }

    pub fn metrics(&self) -> &MetricsConfig {
        &self.metrics
    }
}

/// Collects settings and validates them in [`EndpointConfigBuilder::build`].
#[derive(Debug, Clone)]
pub struct EndpointConfigBuilder {
    config: EndpointConfig,
}

impl EndpointConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: EndpointConfig {
                name: EndpointAddress::new(name),
                connection_string: "memory://default".to_string(),
                workers: 4,
                audit_queue: None,
                error_queue: EndpointAddress::new("error"),
                auto_subscribe: true,
                subscription_cache_ttl: Duration::from_secs(60),
                receive_timeout: Duration::from_secs(1),
                routes: BTreeMap::new(),
                recoverability: RecoverabilityConfig::default(),
                heartbeat: HeartbeatConfig::default(),
                metrics: MetricsConfig::default(),
            },
        }
    }

    pub fn connection_string(mut self, value: impl Into<String>) -> Self {
        self.config.connection_string = value.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn audit_queue(mut self, queue: Option<EndpointAddress>) -> Self {
        self.config.audit_queue = queue;
        self
    }

    pub fn error_queue(mut self, queue: EndpointAddress) -> Self {
        self.config.error_queue = queue;
        self
    }

    pub fn auto_subscribe(mut self, enabled: bool) -> Self {
        self.config.auto_subscribe = enabled;
        self
    }

    pub fn subscription_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.subscription_cache_ttl = ttl;
        self
    }

    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout = timeout;
        self
    }

    pub fn route(mut self, message_type: MessageType, destination: EndpointAddress) -> Self {
        self.config.routes.insert(message_type, destination);
        self
    }

    pub fn recoverability(mut self, recoverability: RecoverabilityConfig) -> Self {
        self.config.recoverability = recoverability;
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<EndpointConfig> {
        let c = self.config;
        let invalid = |msg: String| Err(CourierError::InvalidConfig(msg));

        if c.name.as_str().trim().is_empty() {
            return invalid("endpoint name must not be empty".into());
        }
        if c.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        if c.error_queue == c.name {
            return invalid(format!("error queue must differ from input queue '{}'", c.name));
        }
        if c.audit_queue.as_ref() == Some(&c.name) {
            return invalid(format!("audit queue must differ from input queue '{}'", c.name));
        }
        if c.recoverability.enabled
            && c.recoverability.delayed_retries > 0
            && c.recoverability.time_increase.is_zero()
        {
            return invalid("time_increase must be positive when delayed retries are on".into());
        }
        if c.receive_timeout.is_zero() {
            return invalid("receive_timeout must be positive".into());
        }
        if c.heartbeat.enabled && c.heartbeat.interval.is_zero() {
            return invalid("heartbeat interval must be positive".into());
        }
        if c.metrics.enabled && c.metrics.interval.is_zero() {
            return invalid("metrics interval must be positive".into());
        }
        Ok(c)
    }
}
