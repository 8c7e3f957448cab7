//! Configuration module for carrier-router
//!
//! This module provides the daemon configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use carrier_router::config::{load_config, Config};
//!
//! let config = load_config("/etc/carrier-router/config.json").unwrap();
//! println!("Route file: {:?}", config.source.path);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env, ENV_IPC_SOCKET, ENV_LOG_LEVEL, ENV_ROUTES_FILE,
};
pub use types::{
    Config, IpcConfig, LogConfig, ReloadConfig, RoutingConfig, SourceConfig, SourceType,
};
