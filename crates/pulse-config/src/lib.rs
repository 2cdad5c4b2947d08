//! Shared configuration for the Pulse daemon and its plugin control plane.
//!
//! Values are layered by `ortho_config`: built-in defaults, then a TOML file
//! (`--config-path` or `PULSE_CONFIG_PATH`), then `PULSE_*` environment
//! variables, then command-line flags. The later layer wins.

mod defaults;
mod logging;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_LOG_FILTER, DEFAULT_PLUGIN_LOG_PATH,
    default_handshake_timeout_secs, default_log_filter, default_log_filter_string,
    default_log_format, default_plugin_log_path,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PULSE")]
pub struct Config {
    /// `tracing` filter directive applied to daemon logs.
    #[ortho_config(default = default_log_filter_string())]
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format of daemon logs.
    #[ortho_config(default = default_log_format())]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Seconds a plugin has to answer the handshake.
    #[ortho_config(default = default_handshake_timeout_secs())]
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Directory handed to plugins for their own logs.
    #[ortho_config(default = default_plugin_log_path())]
    #[serde(default = "default_plugin_log_path")]
    pub plugin_log_path: Utf8PathBuf,
    /// Plugin executables loaded when the daemon starts, in order.
    #[serde(default)]
    pub autoload_plugins: Vec<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            plugin_log_path: default_plugin_log_path(),
            autoload_plugins: Vec::new(),
        }
    }
}

/// Semantic problems found in an otherwise well-formed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A zero handshake budget would fail every load.
    #[error("handshake_timeout_secs must be greater than zero")]
    ZeroHandshakeTimeout,
    /// Plugins need somewhere to write their logs.
    #[error("plugin_log_path must not be empty")]
    EmptyPluginLogPath,
}

impl Config {
    /// Loads configuration from the process arguments, environment, and
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any layer is malformed.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads configuration using `args` in place of the process arguments.
    ///
    /// The first item is treated as the binary name.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any layer is malformed.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Checks values the loader cannot reject on type alone.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        if self.plugin_log_path.as_str().trim().is_empty() {
            return Err(ConfigError::EmptyPluginLogPath);
        }
        Ok(())
    }

    /// `tracing` filter directive for daemon logs.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Output format of daemon logs.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Handshake budget as a [`Duration`].
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Directory handed to plugins for their own logs.
    #[must_use]
    pub fn plugin_log_path(&self) -> &Utf8Path {
        self.plugin_log_path.as_path()
    }

    /// Plugins loaded at startup.
    #[must_use]
    pub fn autoload_plugins(&self) -> &[Utf8PathBuf] {
        self.autoload_plugins.as_slice()
    }
}
