//! Configuration types for carrier-router
//!
//! This module defines the daemon configuration. It is loaded from a JSON
//! file at startup and validated before the first route reload.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::routing::{DrainPolicy, LookupOptions, MatchMode};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Where routing data comes from
    pub source: SourceConfig,

    /// Lookup behavior
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Snapshot publication and reclamation
    #[serde(default)]
    pub reload: ReloadConfig,

    /// IPC configuration
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate()?;
        self.routing.validate()?;
        self.reload.validate()?;
        self.ipc.validate()?;
        self.log.validate()?;
        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            source: SourceConfig::default(),
            routing: RoutingConfig::default(),
            reload: ReloadConfig::default(),
            ipc: IpcConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Kind of route source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Flat route file
    #[default]
    File,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
        }
    }
}

/// Route source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Source type
    #[serde(rename = "type", default)]
    pub source_type: SourceType,

    /// Path to the route file
    pub path: PathBuf,

    /// Copy the route file to `<path>.bak` before saving edits
    #[serde(default = "default_true")]
    pub backup: bool,
}

impl SourceConfig {
    /// Validate source configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} source requires a path",
                self.source_type
            )));
        }
        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source_type: SourceType::File,
            path: PathBuf::from("/etc/carrier-router/routes.conf"),
            backup: true,
        }
    }
}

/// Lookup behavior configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Prefix alphabet width: 10 (digits) or 128 (ASCII)
    #[serde(default = "default_match_mode")]
    pub match_mode: u32,

    /// Route unknown carrier ids through the default carrier
    #[serde(default)]
    pub fallback_default: bool,

    /// Skip destinations the caller already tried (weighted mode only)
    #[serde(default)]
    pub avoid_failed_destinations: bool,

    /// Name of the default carrier; the source's choice when unset
    #[serde(default)]
    pub default_carrier: Option<String>,
}

impl RoutingConfig {
    /// Validate routing configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mode()?;
        if matches!(&self.default_carrier, Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "default_carrier cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// The trie alphabet selected by `match_mode`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for widths other than 10 and 128.
    pub fn mode(&self) -> Result<MatchMode, ConfigError> {
        MatchMode::from_width(self.match_mode).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "match_mode must be 10 or 128, got {}",
                self.match_mode
            ))
        })
    }

    /// Engine-wide lookup options
    #[must_use]
    pub const fn lookup_options(&self) -> LookupOptions {
        LookupOptions {
            fallback_default: self.fallback_default,
            avoid_failed_destinations: self.avoid_failed_destinations,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            match_mode: default_match_mode(),
            fallback_default: false,
            avoid_failed_destinations: false,
            default_carrier: None,
        }
    }
}

/// Reload and drain configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReloadConfig {
    /// First sleep while waiting for readers of a superseded snapshot
    #[serde(default = "default_drain_initial_backoff_us")]
    pub drain_initial_backoff_us: u64,

    /// Upper bound of the drain backoff
    #[serde(default = "default_drain_max_backoff_ms")]
    pub drain_max_backoff_ms: u64,

    /// Log a warning when draining takes longer than this
    #[serde(default = "default_drain_warn_after_ms")]
    pub drain_warn_after_ms: u64,

    /// Stop waiting after this long; wait forever when unset
    #[serde(default)]
    pub drain_give_up_after_ms: Option<u64>,
}

impl ReloadConfig {
    /// Validate reload configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drain_initial_backoff_us == 0 {
            return Err(ConfigError::ValidationError(
                "drain_initial_backoff_us must be greater than 0".into(),
            ));
        }
        if self.drain_max_backoff_ms.saturating_mul(1000) < self.drain_initial_backoff_us {
            return Err(ConfigError::ValidationError(
                "drain_max_backoff_ms must not be below drain_initial_backoff_us".into(),
            ));
        }
        if self.drain_give_up_after_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "drain_give_up_after_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// The drain policy for the route engine
    #[must_use]
    pub fn drain_policy(&self) -> DrainPolicy {
        let policy = DrainPolicy {
            initial_backoff: Duration::from_micros(self.drain_initial_backoff_us),
            max_backoff: Duration::from_millis(self.drain_max_backoff_ms),
            ..DrainPolicy::default()
        }
        .with_warn_after(Duration::from_millis(self.drain_warn_after_ms));

        match self.drain_give_up_after_ms {
            Some(ms) => policy.with_give_up_after(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            drain_initial_backoff_us: default_drain_initial_backoff_us(),
            drain_max_backoff_ms: default_drain_max_backoff_ms(),
            drain_warn_after_ms: default_drain_warn_after_ms(),
            drain_give_up_after_ms: None,
        }
    }
}

/// IPC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    /// Path to Unix socket
    pub socket_path: PathBuf,

    /// Socket file mode (octal, e.g., 0o660)
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Enable IPC server
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl IpcConfig {
    /// Validate IPC configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "IPC socket path cannot be empty when IPC is enabled".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/carrier-router.sock"),
            socket_mode: 0o660,
            enabled: true,
            max_message_size: 1024 * 1024, // 1MB
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.format.as_str(), "json" | "text") {
            return Err(ConfigError::ValidationError(format!(
                "log format must be \"json\" or \"text\", got \"{}\"",
                self.format
            )));
        }
        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "json".into(),
            target: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_match_mode() -> u32 {
    10
}

const fn default_drain_initial_backoff_us() -> u64 {
    10
}

const fn default_drain_max_backoff_ms() -> u64 {
    10
}

const fn default_drain_warn_after_ms() -> u64 {
    1000
}

const fn default_socket_mode() -> u32 {
    0o660
}

const fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}
