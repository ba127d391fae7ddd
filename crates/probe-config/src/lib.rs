// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for Test-Probe.
//!
//! This crate provides [`ProbeConfig`], the top-level runtime settings,
//! together with helpers for loading from TOML files, merging overlays, and
//! producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// An unusually small admission budget.
    TinyConcurrency {
        /// Configured `max_concurrent`.
        value: usize,
    },
    /// An unusually large offset-commit batch.
    LargeCommitBatch {
        /// Configured `commit_batch_size`.
        value: usize,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::TinyConcurrency { value } => {
                write!(f, "max_concurrent = {value} serialises all tests")
            }
            ConfigWarning::LargeCommitBatch { value } => {
                write!(
                    f,
                    "commit_batch_size = {value} risks large redelivery windows on stop"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for Test-Probe.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProbeConfig {
    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Scheduler admission and ask settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Stream startup and consumer offset-commit settings.
    #[serde(default)]
    pub streams: StreamsConfig,

    /// Guardian restart budget.
    #[serde(default)]
    pub guardian: GuardianConfig,

    /// Broker connectivity.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Artifact storage provider.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credential vault provider.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Schema registry.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Bucket layout.
    #[serde(default)]
    pub bucket: BucketConfig,

    /// Scenario runner invocation.
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Admission queue and ask-timeout settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently executing tests.
    pub max_concurrent: usize,

    /// Default reply deadline for per-request actor asks, in milliseconds.
    pub ask_timeout_ms: u64,

    /// How long terminal records stay queryable, in seconds. Unset means
    /// retained until process exit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            ask_timeout_ms: 3_000,
            retention_secs: None,
        }
    }
}

impl SchedulerConfig {
    /// Ask timeout as a [`Duration`].
    #[must_use]
    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }

    /// Retention period as a [`Duration`], if configured.
    #[must_use]
    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }
}

/// Stream startup and consumer offset-commit settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct StreamsConfig {
    /// Upper bound on producer/consumer stream initialization, in milliseconds.
    pub startup_deadline_ms: u64,

    /// Commit consumer offsets after this many records.
    pub commit_batch_size: usize,

    /// Commit consumer offsets at least this often, in milliseconds.
    pub commit_interval_ms: u64,

    /// Bound on the producer's final flush when stopping, in milliseconds.
    pub stop_flush_timeout_ms: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            startup_deadline_ms: 10_000,
            commit_batch_size: 20,
            commit_interval_ms: 5_000,
            stop_flush_timeout_ms: 5_000,
        }
    }
}

impl StreamsConfig {
    /// Startup deadline as a [`Duration`].
    #[must_use]
    pub fn startup_deadline(&self) -> Duration {
        Duration::from_millis(self.startup_deadline_ms)
    }

    /// Commit interval as a [`Duration`].
    #[must_use]
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    /// Stop-flush bound as a [`Duration`].
    #[must_use]
    pub fn stop_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_flush_timeout_ms)
    }
}

/// Guardian restart budget: at most `max_restarts` within `window_secs`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct GuardianConfig {
    /// Maximum scheduler restarts inside one window.
    pub max_restarts: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            window_secs: 60,
        }
    }
}

impl GuardianConfig {
    /// Restart window as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Broker connectivity settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker client provider: `"memory"` or `"kafka"`.
    pub provider: String,
    /// Used when a directive omits its own bootstrap servers.
    pub default_bootstrap_servers: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: "memory".into(),
            default_bootstrap_servers: "localhost:9092".into(),
        }
    }
}

/// Artifact storage provider selection.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage provider: `"local"` or `"memory"`.
    pub provider: String,
    /// Root directory for the local provider (bucket URIs resolve under it
    /// unless absolute).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            root: None,
        }
    }
}

/// Credential vault provider selection.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault provider: `"file"` or `"env"`.
    pub provider: String,
    /// Credential file for the file provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Fields every credentials map must carry; missing ones fail the fetch.
    pub required_fields: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            provider: "env".into(),
            path: None,
            required_fields: Vec::new(),
        }
    }
}

/// Schema registry settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct SchemaConfig {
    /// Base URL of the schema registry (e.g. `http://localhost:8081`).
    /// Unset selects the seeded in-memory registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { registry_url: None }
    }
}

/// Relative paths inside a fetched bucket.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct BucketConfig {
    /// Feature-file directory, relative to the bucket root.
    pub features_path: String,
    /// Topic-directive manifest, relative to the bucket root.
    pub manifest_path: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            features_path: "features".into(),
            manifest_path: "topic-directives.yaml".into(),
        }
    }
}

/// External scenario-runner invocation.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Command to spawn. Unset selects the no-op runner (only useful in
    /// tests and dry runs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Extra CLI arguments.
    pub args: Vec<String>,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest accepted admission budget.
const MAX_CONCURRENT_CEILING: usize = 256;

/// Commit batches above this produce an advisory warning.
const LARGE_COMMIT_BATCH_THRESHOLD: usize = 500;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Recognised providers per port.
const VALID_BROKER_PROVIDERS: &[&str] = &["memory", "kafka"];
const VALID_STORAGE_PROVIDERS: &[&str] = &["local", "memory"];
const VALID_VAULT_PROVIDERS: &[&str] = &["file", "env"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`ProbeConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`ProbeConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] or [`ConfigError::ParseError`].
pub fn load_config(path: Option<&Path>) -> Result<ProbeConfig, ConfigError> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)
        }
        None => Ok(ProbeConfig::default()),
    }
}

/// Parse a TOML string into a [`ProbeConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] for malformed TOML or wrong types.
pub fn parse_toml(content: &str) -> Result<ProbeConfig, ConfigError> {
    toml::from_str::<ProbeConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero concurrency, unknown providers, zero timeouts) are
/// returned as a [`ConfigError::ValidationError`]; soft issues come back as
/// warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] listing every hard problem.
pub fn validate_config(config: &ProbeConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level {
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(format!("invalid log_level '{level}'"));
        }
    }

    if config.scheduler.max_concurrent == 0 {
        errors.push("scheduler.max_concurrent must be at least 1".into());
    } else if config.scheduler.max_concurrent > MAX_CONCURRENT_CEILING {
        errors.push(format!(
            "scheduler.max_concurrent {} out of range (1..{MAX_CONCURRENT_CEILING})",
            config.scheduler.max_concurrent
        ));
    } else if config.scheduler.max_concurrent == 1 {
        warnings.push(ConfigWarning::TinyConcurrency { value: 1 });
    }

    if config.scheduler.ask_timeout_ms == 0 {
        errors.push("scheduler.ask_timeout_ms must be positive".into());
    }

    if config.streams.startup_deadline_ms == 0 {
        errors.push("streams.startup_deadline_ms must be positive".into());
    }
    if config.streams.commit_batch_size == 0 {
        errors.push("streams.commit_batch_size must be at least 1".into());
    } else if config.streams.commit_batch_size > LARGE_COMMIT_BATCH_THRESHOLD {
        warnings.push(ConfigWarning::LargeCommitBatch {
            value: config.streams.commit_batch_size,
        });
    }
    if config.streams.commit_interval_ms == 0 {
        errors.push("streams.commit_interval_ms must be positive".into());
    }

    if config.guardian.max_restarts == 0 {
        errors.push("guardian.max_restarts must be at least 1".into());
    }
    if config.guardian.window_secs == 0 {
        errors.push("guardian.window_secs must be positive".into());
    }

    if !VALID_BROKER_PROVIDERS.contains(&config.broker.provider.as_str()) {
        errors.push(format!("unknown broker.provider '{}'", config.broker.provider));
    }
    if config.broker.default_bootstrap_servers.is_empty() {
        errors.push("broker.default_bootstrap_servers must not be empty".into());
    }

    if !VALID_STORAGE_PROVIDERS.contains(&config.storage.provider.as_str()) {
        errors.push(format!(
            "unknown storage.provider '{}'",
            config.storage.provider
        ));
    }
    if config.storage.provider == "local" && config.storage.root.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "storage.root".into(),
            hint: "bucket URIs must be absolute paths".into(),
        });
    }

    if !VALID_VAULT_PROVIDERS.contains(&config.vault.provider.as_str()) {
        errors.push(format!("unknown vault.provider '{}'", config.vault.provider));
    }
    if config.vault.provider == "file" && config.vault.path.is_none() {
        errors.push("vault.path is required for the file provider".into());
    }

    if config.bucket.features_path.is_empty() {
        errors.push("bucket.features_path must not be empty".into());
    }
    if config.bucket.manifest_path.is_empty() {
        errors.push("bucket.manifest_path must not be empty".into());
    }

    if config.runner.command.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "runner.command".into(),
            hint: "scenario runs will use the no-op runner".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations.  Values in `overlay` take precedence over `base`
/// table by table (an overlay table present in the file replaces the base
/// table wholesale).
#[must_use]
pub fn merge_configs(base: ProbeConfig, overlay: ProbeConfig) -> ProbeConfig {
    let defaults = ProbeConfig::default();
    ProbeConfig {
        log_level: overlay.log_level.or(base.log_level),
        scheduler: pick(overlay.scheduler, base.scheduler, defaults.scheduler),
        streams: pick(overlay.streams, base.streams, defaults.streams),
        guardian: pick(overlay.guardian, base.guardian, defaults.guardian),
        broker: pick(overlay.broker, base.broker, defaults.broker),
        storage: pick(overlay.storage, base.storage, defaults.storage),
        vault: pick(overlay.vault, base.vault, defaults.vault),
        schema: pick(overlay.schema, base.schema, defaults.schema),
        bucket: pick(overlay.bucket, base.bucket, defaults.bucket),
        runner: pick(overlay.runner, base.runner, defaults.runner),
    }
}

/// Overlay wins when it differs from the defaults, else the base survives.
fn pick<T: PartialEq>(overlay: T, base: T, default: T) -> T {
    if overlay == default { base } else { overlay }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
