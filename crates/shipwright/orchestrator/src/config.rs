//! Configuration for the orchestration service

use serde::{Deserialize, Serialize};
use shipwright_bus::{ConsumerConfig, DEFAULT_STREAM_MAX_LEN};
use shipwright_dispatcher::DispatchConfig;
use shipwright_resilience::{CircuitBreakerConfig, RetryPolicy};
use shipwright_schema::DEFAULT_COMPATIBILITY_WINDOW;
use shipwright_workflow::GatePolicy;
use std::time::Duration;

/// Environment variable prefix; nested keys use `__`, e.g.
/// `SHIPWRIGHT_DISPATCH__MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "SHIPWRIGHT";

/// Main orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    /// Results consumer loop
    #[serde(default)]
    pub consumer: ConsumerConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Decision and clarification gates. No thresholds by default.
    #[serde(default)]
    pub gates: GatePolicy,

    /// Retry policy for publishing tasks
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// `source` stamped on every envelope the service emits
    pub source: String,
    /// Consumer group on the results stream
    pub results_group: String,
    /// Interval of the task timeout sweeper
    pub sweep_interval_ms: u64,
    /// Maximum optimistic-concurrency retries per workflow update
    pub conflict_retries: u32,
    /// Entries kept per in-memory stream before the oldest are trimmed
    pub stream_max_len: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            source: "orchestrator".to_string(),
            results_group: "orchestrator".to_string(),
            sweep_interval_ms: 5_000,
            conflict_retries: 3,
            stream_max_len: DEFAULT_STREAM_MAX_LEN,
        }
    }
}

impl ServiceConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Lifetime of done markers
    pub ttl_secs: u64,
    /// Lifetime of in-flight leases; should exceed the handler timeout
    pub lease_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            lease_secs: 10 * 60,
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs.min(self.ttl_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Minor versions behind current still accepted
    pub compatibility_window: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            compatibility_window: DEFAULT_COMPATIBILITY_WINDOW,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,

    /// JSON format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `SHIPWRIGHT_*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&OrchestratorConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Dispatcher settings with the service-level publish retry applied.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            publish_retry: self.retry.clone(),
            ..self.dispatch.clone()
        }
    }
}
