//! netsleuth configuration.
//!
//! Configuration lives in /etc/netsleuth/config.toml, falling back to
//! /var/lib/netsleuth/config.toml and then to built-in defaults. Every field
//! has a default, so a partial file is always valid TOML for us.
//!
//! Secrets never live here: the engine API key is read from
//! `NETSLEUTH_ENGINE_API_KEY`, device credentials come from the ssh agent
//! or the user's ssh configuration.

use anyhow::{Context, Result};
use netsleuth_common::{CapabilityCatalog, CapabilityEntry, CatalogError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/netsleuth";
/// Data directory (secondary config location)
pub const DATA_DIR: &str = "/var/lib/netsleuth";
const CONFIG_FILE: &str = "config.toml";

/// Environment variable holding the reasoning engine API key
pub const ENGINE_API_KEY_ENV: &str = "NETSLEUTH_ENGINE_API_KEY";

/// Reasoning engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Per-request HTTP timeout
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first failed call
    #[serde(default = "default_engine_retries")]
    pub retries: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_engine_timeout() -> u64 {
    60
}

fn default_engine_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_secs: default_engine_timeout(),
            retries: default_engine_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl EngineConfig {
    /// Key from the environment; never serialized
    pub fn api_key(&self) -> Option<String> {
        std::env::var(ENGINE_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// What happens to in-flight device operations on cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicy {
    /// Wait for in-flight operations and keep their results
    #[default]
    Drain,
    /// Abort in-flight operations immediately
    Abandon,
}

/// Per-session budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Corrective re-prompts per iteration
    #[serde(default = "default_correction_retries")]
    pub correction_retries: u32,

    /// Character budget for consolidated context
    #[serde(default = "default_context_budget")]
    pub context_budget_chars: usize,

    #[serde(default = "default_max_operations")]
    pub max_operations_per_request: usize,

    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    #[serde(default)]
    pub cancel_policy: CancelPolicy,
}

fn default_max_iterations() -> u32 {
    5
}

fn default_correction_retries() -> u32 {
    2
}

fn default_context_budget() -> usize {
    12_000
}

fn default_max_operations() -> usize {
    8
}

fn default_session_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            correction_retries: default_correction_retries(),
            context_budget_chars: default_context_budget(),
            max_operations_per_request: default_max_operations(),
            session_timeout_secs: default_session_timeout(),
            cancel_policy: CancelPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// Dispatcher and connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Maximum concurrent device sessions across the service
    #[serde(default = "default_pool_size")]
    pub device_pool_size: usize,

    #[serde(default = "default_sessions_per_device")]
    pub max_sessions_per_device: usize,

    /// Run ping + DNS diagnostics when a device connection fails
    #[serde(default = "default_fallback")]
    pub connectivity_fallback: bool,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_ms: u64,
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_pool_size() -> usize {
    8
}

fn default_sessions_per_device() -> usize {
    2
}

fn default_fallback() -> bool {
    true
}

fn default_ping_timeout() -> u64 {
    2000
}

fn default_dns_timeout() -> u64 {
    2000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: default_operation_timeout(),
            device_pool_size: default_pool_size(),
            max_sessions_per_device: default_sessions_per_device(),
            connectivity_fallback: default_fallback(),
            ping_timeout_ms: default_ping_timeout(),
            dns_timeout_ms: default_dns_timeout(),
        }
    }
}

impl DispatchConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }
}

/// SSH transport settings. Authentication is left to ssh itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long an idle control master stays up
    #[serde(default = "default_control_persist")]
    pub control_persist_secs: u64,

    #[serde(default = "default_control_dir")]
    pub control_dir: PathBuf,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_control_persist() -> u64 {
    60
}

fn default_control_dir() -> PathBuf {
    std::env::temp_dir().join("netsleuth-ssh")
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: None,
            connect_timeout_secs: default_connect_timeout(),
            control_persist_secs: default_control_persist(),
            control_dir: default_control_dir(),
        }
    }
}

/// Problems found by `Config::validate`. Fatal at session start.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    ZeroBudget(&'static str),

    #[error("engine endpoint is empty")]
    EmptyEndpoint,

    #[error("engine model is empty")]
    EmptyModel,

    #[error("invalid capability catalog: {0}")]
    InvalidCatalog(#[from] CatalogError),
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    /// Catalog override; empty means the built-in catalog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<CapabilityEntry>,
}

impl Config {
    /// Load from the first existing standard location, else defaults
    pub fn load() -> Result<Self> {
        for path in config_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Check budgets and the catalog. Nothing here touches the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        if self.engine.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        let budgets = [
            ("session.max_iterations", self.session.max_iterations as u64),
            ("session.context_budget_chars", self.session.context_budget_chars as u64),
            (
                "session.max_operations_per_request",
                self.session.max_operations_per_request as u64,
            ),
            ("session.session_timeout_secs", self.session.session_timeout_secs),
            ("dispatch.operation_timeout_secs", self.dispatch.operation_timeout_secs),
            ("dispatch.device_pool_size", self.dispatch.device_pool_size as u64),
            (
                "dispatch.max_sessions_per_device",
                self.dispatch.max_sessions_per_device as u64,
            ),
        ];
        for (name, value) in budgets {
            if value == 0 {
                return Err(ConfigError::ZeroBudget(name));
            }
        }
        self.catalog()?;
        Ok(())
    }

    /// Catalog from `[[capabilities]]`, or the built-in one
    pub fn catalog(&self) -> Result<CapabilityCatalog, ConfigError> {
        if self.capabilities.is_empty() {
            Ok(CapabilityCatalog::standard())
        } else {
            Ok(CapabilityCatalog::from_entries(self.capabilities.clone())?)
        }
    }
}

/// Config file search order
pub fn config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE),
        PathBuf::from(DATA_DIR).join(CONFIG_FILE),
    ]
}
