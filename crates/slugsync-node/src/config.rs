//! Application configuration.
//!
//! Loaded from TOML. Every field has a default, so a partial file (or no
//! file at all) is valid.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use slugsync_coordinator::CoordinatorConfig;
use slugsync_feed::DispatcherConfig;
use slugsync_registry::RedisRegistryConfig;
use slugsync_telemetry::LogFormat;
use slugsync_ws::ConnectionConfig;
use std::path::Path;
use std::time::Duration;

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "SLUGSYNC_CONFIG";
pub const REDIS_URL_ENV: &str = "SLUGSYNC_REDIS_URL";
pub const FEED_URL_ENV: &str = "SLUGSYNC_FEED_URL";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Registry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Shared Redis set plus pub/sub channel.
    #[default]
    Redis,
    /// In-process only. Replicas do not share state.
    Memory,
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_set_key")]
    pub set_key: String,
    #[serde(default = "default_events_channel")]
    pub events_channel: String,
    /// First delay between attempts to reach the store at startup (ms).
    #[serde(default = "default_connect_retry_base_ms")]
    pub connect_retry_base_ms: u64,
    #[serde(default = "default_connect_retry_max_ms")]
    pub connect_retry_max_ms: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_set_key() -> String {
    "slugsync:slugs".to_string()
}

fn default_events_channel() -> String {
    "slugsync:slugs:events".to_string()
}

fn default_connect_retry_base_ms() -> u64 {
    500
}

fn default_connect_retry_max_ms() -> u64 {
    10_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::default(),
            url: default_redis_url(),
            set_key: default_set_key(),
            events_channel: default_events_channel(),
            connect_retry_base_ms: default_connect_retry_base_ms(),
            connect_retry_max_ms: default_connect_retry_max_ms(),
        }
    }
}

impl From<RegistryConfig> for RedisRegistryConfig {
    fn from(cfg: RegistryConfig) -> Self {
        Self {
            url: cfg.url,
            set_key: cfg.set_key,
            events_channel: cfg.events_channel,
        }
    }
}

/// Feed connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// Maximum consecutive failed sessions (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_max_consecutive_protocol_errors")]
    pub max_consecutive_protocol_errors: u32,
    /// 0 = never split subscription frames.
    #[serde(default)]
    pub max_slugs_per_frame: usize,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Capacity of the channel between the connection and the dispatcher.
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,
}

fn default_feed_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_reconnect_jitter_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    20_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}

fn default_max_consecutive_protocol_errors() -> u32 {
    10
}

fn default_command_buffer() -> usize {
    256
}

fn default_message_buffer() -> usize {
    1000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            max_consecutive_protocol_errors: default_max_consecutive_protocol_errors(),
            max_slugs_per_frame: 0,
            command_buffer: default_command_buffer(),
            message_buffer: default_message_buffer(),
        }
    }
}

impl From<FeedConfig> for ConnectionConfig {
    fn from(cfg: FeedConfig) -> Self {
        Self {
            url: cfg.url,
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_base_delay_ms: cfg.reconnect_base_delay_ms,
            reconnect_max_delay_ms: cfg.reconnect_max_delay_ms,
            reconnect_jitter_ms: cfg.reconnect_jitter_ms,
            connect_timeout_ms: cfg.connect_timeout_ms,
            heartbeat_interval_ms: cfg.heartbeat_interval_ms,
            heartbeat_timeout_ms: cfg.heartbeat_timeout_ms,
            max_consecutive_protocol_errors: cfg.max_consecutive_protocol_errors,
            max_slugs_per_frame: cfg.max_slugs_per_frame,
            command_buffer: cfg.command_buffer,
        }
    }
}

/// Coordinator timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

fn default_debounce_ms() -> u64 {
    250
}

fn default_reconcile_interval_ms() -> u64 {
    30_000
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

impl From<CoordinatorSection> for CoordinatorConfig {
    fn from(cfg: CoordinatorSection) -> Self {
        CoordinatorConfig::from_millis(cfg.debounce_ms, cfg.reconcile_interval_ms)
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherSection {
    /// Budget per handler invocation (ms). Unset = unbounded.
    #[serde(default)]
    pub per_handler_timeout_ms: Option<u64>,
}

impl From<DispatcherSection> for DispatcherConfig {
    fn from(cfg: DispatcherSection) -> Self {
        Self {
            per_handler_timeout: cfg
                .per_handler_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default tracing filter; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Force JSON logs. Unset = JSON only when `RUST_ENV=production`.
    #[serde(default)]
    pub json_logs: Option<bool>,
    /// Period of the status summary log line (s). 0 disables it.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_log_level() -> String {
    slugsync_telemetry::logging::DEFAULT_FILTER.to_string()
}

fn default_status_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: None,
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

impl TelemetryConfig {
    pub fn log_format(&self) -> LogFormat {
        match self.json_logs {
            Some(true) => LogFormat::Json,
            Some(false) => LogFormat::Pretty,
            None => LogFormat::from_env(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Resolve the config path: explicit > `SLUGSYNC_CONFIG` > default path.
    pub fn resolve_path(explicit: Option<String>) -> String {
        explicit
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load from `path` if it exists, defaults otherwise, then apply env
    /// overrides.
    pub fn load(path: &str) -> AppResult<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(REDIS_URL_ENV).ok(),
            std::env::var(FEED_URL_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, redis_url: Option<String>, feed_url: Option<String>) {
        if let Some(url) = redis_url.filter(|u| !u.trim().is_empty()) {
            self.registry.url = url;
        }
        if let Some(url) = feed_url.filter(|u| !u.trim().is_empty()) {
            self.feed.url = url;
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.feed.url.trim().is_empty() {
            return Err(AppError::Config("feed.url must not be empty".to_string()));
        }
        if self.registry.backend == RegistryBackend::Redis && self.registry.url.trim().is_empty() {
            return Err(AppError::Config("registry.url must not be empty".to_string()));
        }
        if self.feed.reconnect_base_delay_ms > self.feed.reconnect_max_delay_ms {
            return Err(AppError::Config(
                "feed.reconnect_base_delay_ms exceeds feed.reconnect_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}
