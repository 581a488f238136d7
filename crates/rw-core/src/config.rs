//! Configuration for the rw_core daemon.
//!
//! Settings are read from a TOML file (every field optional) and then
//! overridden by command-line flags. Default location:
//! /etc/voltha/rw_core.toml

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/voltha/rw_core.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Backing store implementations the daemon can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// In-process map; state is lost on restart.
    Memory,
    Redis,
}

/// Backing store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvStoreConfig {
    /// `memory` or `redis`
    #[serde(default = "default_store_type")]
    pub store_type: String,

    /// host:port of the store
    #[serde(default = "default_store_address")]
    pub address: String,

    /// Upper bound on each store call, in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,

    /// Prefix prepended to every stored key
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,

    /// Age after which an uncommitted transaction branch is discarded
    #[serde(default = "default_txn_key_delete")]
    pub txn_key_delete_secs: u64,
}

/// Message-bus settings used by the adapter transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_adapter_address")]
    pub adapter_address: String,

    #[serde(default = "default_cluster_address")]
    pub cluster_address: String,

    #[serde(default = "default_core_topic")]
    pub core_topic: String,

    #[serde(default = "default_affinity_router_topic")]
    pub affinity_router_topic: String,

    #[serde(default = "default_core_pair_topic")]
    pub core_pair_topic: String,

    #[serde(default = "default_core_binding_key")]
    pub core_binding_key: String,

    /// Whether a pair of cores competes for each request
    #[serde(default = "default_in_competing_mode")]
    pub in_competing_mode: bool,

    /// Northbound gRPC listen address
    #[serde(default = "default_grpc_address")]
    pub grpc_address: String,

    /// Endpoint name this core registers under
    #[serde(default = "default_rw_core_endpoint")]
    pub rw_core_endpoint: String,
}

/// Request deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_timeout")]
    pub default_request_ms: u64,

    /// Deadline for adopt, reboot and similar slow adapter requests
    #[serde(default = "default_long_running_timeout")]
    pub long_running_request_ms: u64,

    /// Deadline for core-internal requests
    #[serde(default = "default_core_timeout")]
    pub core_ms: u64,
}

/// Store connection retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Attempts before giving up; unset retries forever
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
}

/// Liveness probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_address")]
    pub address: String,

    /// Probe period while the store is reachable
    #[serde(default = "default_live_interval")]
    pub live_interval_secs: u64,

    /// Probe period while the store is unreachable
    #[serde(default = "default_not_live_interval")]
    pub not_live_interval_secs: u64,
}

/// Complete rw_core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub kv_store: KvStoreConfig,

    #[serde(default)]
    pub messaging: MessagingConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Print the start-up banner
    #[serde(default)]
    pub banner: bool,
}

fn default_store_type() -> String {
    "redis".to_string()
}

fn default_store_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_store_timeout() -> u64 {
    5
}

fn default_data_prefix() -> String {
    "service/voltha".to_string()
}

fn default_txn_key_delete() -> u64 {
    60
}

fn default_adapter_address() -> String {
    "127.0.0.1:9092".to_string()
}

fn default_cluster_address() -> String {
    "127.0.0.1:9094".to_string()
}

fn default_core_topic() -> String {
    "rwcore".to_string()
}

fn default_affinity_router_topic() -> String {
    "affinityRouter".to_string()
}

fn default_core_pair_topic() -> String {
    "rwcore_1".to_string()
}

fn default_core_binding_key() -> String {
    "voltha_backend_name".to_string()
}

fn default_in_competing_mode() -> bool {
    true
}

fn default_grpc_address() -> String {
    ":50057".to_string()
}

fn default_rw_core_endpoint() -> String {
    "rwcore".to_string()
}

fn default_request_timeout() -> u64 {
    1000
}

fn default_long_running_timeout() -> u64 {
    2000
}

fn default_core_timeout() -> u64 {
    1000
}

fn default_retry_interval() -> u64 {
    2
}

fn default_probe_address() -> String {
    ":8080".to_string()
}

fn default_live_interval() -> u64 {
    60
}

fn default_not_live_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_instance_id() -> String {
    "rwcore".to_string()
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            address: default_store_address(),
            timeout_secs: default_store_timeout(),
            data_prefix: default_data_prefix(),
            txn_key_delete_secs: default_txn_key_delete(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            adapter_address: default_adapter_address(),
            cluster_address: default_cluster_address(),
            core_topic: default_core_topic(),
            affinity_router_topic: default_affinity_router_topic(),
            core_pair_topic: default_core_pair_topic(),
            core_binding_key: default_core_binding_key(),
            in_competing_mode: default_in_competing_mode(),
            grpc_address: default_grpc_address(),
            rw_core_endpoint: default_rw_core_endpoint(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_request_ms: default_request_timeout(),
            long_running_request_ms: default_long_running_timeout(),
            core_ms: default_core_timeout(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            retry_interval_secs: default_retry_interval(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            address: default_probe_address(),
            live_interval_secs: default_live_interval(),
            not_live_interval_secs: default_not_live_interval(),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            kv_store: KvStoreConfig::default(),
            messaging: MessagingConfig::default(),
            timeouts: TimeoutConfig::default(),
            connection: ConnectionConfig::default(),
            probe: ProbeConfig::default(),
            log_level: default_log_level(),
            instance_id: default_instance_id(),
            banner: false,
        }
    }
}

impl KvStoreConfig {
    pub fn kind(&self) -> Result<StoreKind, ConfigError> {
        match self.store_type.to_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "redis" => Ok(StoreKind::Redis),
            other => Err(ConfigError::invalid(format!("unknown kv store type '{}'", other))),
        }
    }
}

impl CoreConfig {
    /// Loads configuration from `path`, falling back to defaults if the
    /// file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub fn kv_timeout(&self) -> Duration {
        Duration::from_secs(self.kv_store.timeout_secs)
    }

    pub fn txn_key_delete_time(&self) -> Duration {
        Duration::from_secs(self.kv_store.txn_key_delete_secs)
    }

    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.default_request_ms)
    }

    pub fn long_running_request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.long_running_request_ms)
    }

    pub fn core_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.core_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.connection.retry_interval_secs)
    }

    pub fn live_probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe.live_interval_secs)
    }

    pub fn not_live_probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe.not_live_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kv_store.kind()?;

        if self.kv_store.address.trim().is_empty() {
            return Err(ConfigError::invalid("kv_store.address must not be empty"));
        }
        if self.messaging.adapter_address.trim().is_empty() {
            return Err(ConfigError::invalid("messaging.adapter_address must not be empty"));
        }
        if self.kv_store.timeout_secs == 0 {
            return Err(ConfigError::invalid("kv_store.timeout_secs must be > 0"));
        }
        if self.timeouts.default_request_ms == 0
            || self.timeouts.long_running_request_ms == 0
            || self.timeouts.core_ms == 0
        {
            return Err(ConfigError::invalid("request timeouts must be > 0"));
        }
        if self.probe.live_interval_secs == 0 || self.probe.not_live_interval_secs == 0 {
            return Err(ConfigError::invalid("probe intervals must be > 0"));
        }
        Ok(())
    }
}

/// rw_core - device orchestration core
#[derive(Parser, Debug, Default)]
#[command(name = "rw_core")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Backing store type (memory, redis)
    #[arg(long)]
    pub kv_store_type: Option<String>,

    /// Backing store host:port
    #[arg(long)]
    pub kv_store_address: Option<String>,

    /// Identifier of this core instance
    #[arg(long)]
    pub instance_id: Option<String>,

    /// Print the start-up banner
    #[arg(long)]
    pub banner: bool,
}

impl Args {
    /// Overrides file settings with the flags that were given.
    pub fn apply(&self, config: &mut CoreConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(store_type) = &self.kv_store_type {
            config.kv_store.store_type = store_type.clone();
        }
        if let Some(address) = &self.kv_store_address {
            config.kv_store.address = address.clone();
        }
        if let Some(instance_id) = &self.instance_id {
            config.instance_id = instance_id.clone();
        }
        if self.banner {
            config.banner = true;
        }
    }
}
