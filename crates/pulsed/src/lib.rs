//! The Pulse telemetry daemon.
//!
//! `pulsed` loads its configuration, installs structured logging, generates
//! the host key pair, and loads the configured plugins through
//! [`pulse_control::PluginManager`]. It then blocks until a termination
//! signal arrives, unloads every plugin, and terminates the plugin processes
//! before exiting.

mod bootstrap;
mod shutdown;
mod telemetry;

use thiserror::Error;
use tracing::info;

use pulse_control::process::ExecutableLauncher;
use pulse_control::{HostKeyPair, PluginLauncher};

pub use bootstrap::{
    AutoloadReport, BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};

const RUN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run");

/// Errors that end a daemon run.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Bootstrap failed before any plugin was loaded.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Waiting for the shutdown signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Summary of a completed daemon run.
#[derive(Debug)]
pub struct RunSummary {
    /// Result of the startup autoload pass.
    pub autoload: AutoloadReport,
    /// Plugins unloaded during shutdown.
    pub unloaded: usize,
    /// Plugin processes killed during shutdown.
    pub terminated: usize,
}

/// Runs the daemon with the system collaborators.
///
/// # Errors
///
/// Returns [`DaemonError`] when bootstrap or signal handling fails.
pub fn run() -> Result<RunSummary, DaemonError> {
    run_with(
        &SystemConfigLoader,
        ExecutableLauncher,
        &SystemShutdownSignal,
    )
}

/// Runs the daemon with injected collaborators.
///
/// # Errors
///
/// Returns [`DaemonError`] when bootstrap or signal handling fails. Plugin
/// load failures are reported in the summary instead.
pub fn run_with<L: PluginLauncher>(
    loader: &dyn ConfigLoader,
    launcher: L,
    shutdown: &dyn ShutdownSignal,
) -> Result<RunSummary, DaemonError> {
    let daemon = bootstrap_with(loader, launcher, HostKeyPair::generate())?;
    let autoload = daemon.autoload();
    info!(
        target: RUN_TARGET,
        loaded = autoload.loaded,
        failed = autoload.failed.len(),
        "daemon ready"
    );

    let waited = shutdown.wait();
    let unloaded = daemon.unload_all();
    let terminated = daemon.terminate_plugins();
    waited?;

    Ok(RunSummary {
        autoload,
        unloaded,
        terminated,
    })
}

#[cfg(test)]
mod tests;
