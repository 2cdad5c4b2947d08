//! Daemon bootstrap and plugin autoloading.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;
use tracing::{info, warn};

use pulse_config::{Config, ConfigError};
use pulse_control::{
    CatalogedPlugin, ControlError, HostKeyPair, ManagerSettings, PluginKey, PluginLauncher,
    PluginManager,
};

use crate::telemetry::{self, TelemetryError, TelemetryHandle};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any configuration layer is malformed.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config` so it can be handed to [`bootstrap_with`].
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but holds unusable values.
    #[error("invalid configuration: {source}")]
    InvalidConfiguration {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Outcome of loading the configured plugins.
#[derive(Debug, Default)]
pub struct AutoloadReport {
    /// Number of plugins registered.
    pub loaded: usize,
    /// Plugins that failed to load, with the reason.
    pub failed: Vec<(String, ControlError)>,
}

/// A bootstrapped daemon owning the plugin manager.
#[derive(Debug)]
pub struct Daemon<L> {
    config: Config,
    manager: PluginManager<L>,
    telemetry: TelemetryHandle,
}

impl<L> Daemon<L> {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the plugin manager.
    #[must_use]
    pub const fn manager(&self) -> &PluginManager<L> {
        &self.manager
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Unloads every registered plugin in load order.
    ///
    /// Returns the number of plugins unloaded. Failures are logged and the
    /// remaining plugins are still attempted.
    pub fn unload_all(&self) -> usize {
        let mut unloaded = 0;
        for record in self.manager.catalog() {
            match self.manager.unload_plugin(record.as_ref()) {
                Ok(_) => unloaded += 1,
                Err(error) => warn!(
                    target: BOOTSTRAP_TARGET,
                    plugin = record.name(),
                    version = record.version(),
                    %error,
                    "failed to unload plugin during shutdown"
                ),
            }
        }
        info!(target: BOOTSTRAP_TARGET, unloaded, "plugins unloaded");
        unloaded
    }

    /// Kills every plugin process still owned by the manager.
    ///
    /// This covers unloaded plugins and plugins whose handshake failed.
    /// Returns the number of processes terminated.
    pub fn terminate_plugins(&self) -> usize {
        let owned = self.manager.process_count();
        let terminated = self.manager.terminate_processes();
        info!(target: BOOTSTRAP_TARGET, owned, terminated, "plugin processes terminated");
        terminated
    }
}

impl<L: PluginLauncher> Daemon<L> {
    /// Loads every plugin listed in the configuration.
    ///
    /// A failed load does not stop the remaining plugins from loading.
    pub fn autoload(&self) -> AutoloadReport {
        let mut report = AutoloadReport::default();
        for path in self.config.autoload_plugins() {
            match self.manager.load_plugin(path.as_std_path()) {
                Ok(record) => {
                    report.loaded += 1;
                    info!(
                        target: BOOTSTRAP_TARGET,
                        plugin = record.name(),
                        version = record.version(),
                        plugin_type = record.type_name(),
                        "autoloaded plugin"
                    );
                }
                Err(error) => {
                    warn!(target: BOOTSTRAP_TARGET, path = %path, %error, "autoload failed");
                    report.failed.push((path.to_string(), error));
                }
            }
        }
        report
    }
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration or telemetry setup fails.
pub fn bootstrap_with<L>(
    loader: &dyn ConfigLoader,
    launcher: L,
    keys: HostKeyPair,
) -> Result<Daemon<L>, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    config
        .validate()
        .map_err(|source| BootstrapError::InvalidConfiguration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    let manager = PluginManager::new(launcher, keys, ManagerSettings::from(&config));
    info!(
        target: BOOTSTRAP_TARGET,
        handshake_timeout_secs = config.handshake_timeout_secs,
        plugin_log_path = %config.plugin_log_path(),
        autoload = config.autoload_plugins().len(),
        "daemon bootstrapped"
    );

    Ok(Daemon {
        config,
        manager,
        telemetry,
    })
}
