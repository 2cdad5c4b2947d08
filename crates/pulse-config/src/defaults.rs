use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Seconds a plugin has to answer the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 3;

/// Directory plugins are told to write their logs to.
pub const DEFAULT_PLUGIN_LOG_PATH: &str = "/tmp";

/// Default log filter expression used by the daemon.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default handshake budget in seconds.
#[must_use]
pub const fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

/// Default plugin log directory.
#[must_use]
pub fn default_plugin_log_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_PLUGIN_LOG_PATH)
}
