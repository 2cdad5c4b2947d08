//! Contract between the control plane and the plugin process wrapper.
//!
//! The manager never spawns processes itself. It asks a [`PluginLauncher`] to
//! prepare a [`PluginProcess`] for an executable, starts it, and waits a
//! bounded time for the plugin's handshake response. The production
//! implementation lives in [`crate::process`]; tests substitute scripted or
//! mocked launchers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::handshake::{HandshakeArgs, HandshakeResponse};

/// Failures reported by a launcher or one of its processes.
#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    /// The executable does not exist or is not a regular file.
    #[error("executable not found: {}", path.display())]
    ExecutableNotFound {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The process could not be prepared or started.
    #[error("failed to start process: {message}")]
    Spawn {
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<io::Error>>,
    },

    /// No handshake response arrived within the allotted time.
    #[error("no handshake response within {}ms", timeout.as_millis())]
    Timeout {
        /// Time that was waited.
        timeout: Duration,
    },

    /// The response channel failed or carried something unreadable.
    #[error("handshake transport failure: {message}")]
    Transport {
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<io::Error>>,
    },
}

/// A plugin process prepared by a [`PluginLauncher`].
///
/// Once started, the handle is owned by the manager for the life of the
/// process, including after the plugin is unloaded.
#[cfg_attr(test, mockall::automock)]
pub trait PluginProcess: Send {
    /// Starts the process.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Spawn`] when the process cannot be started.
    fn start(&mut self) -> Result<(), LaunchError>;

    /// Blocks until the plugin writes its handshake response or `timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Timeout`] when nothing arrives in time and
    /// [`LaunchError::Transport`] for any other failure.
    fn wait_for_response(&mut self, timeout: Duration) -> Result<HandshakeResponse, LaunchError>;

    /// Terminates the process if it is still running.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Transport`] when the termination request fails.
    fn kill(&mut self) -> Result<(), LaunchError>;
}

/// Factory for plugin processes.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use std::time::Duration;
/// use pulse_control::launcher::{LaunchError, PluginLauncher, PluginProcess};
/// use pulse_control::{HandshakeArgs, HandshakeResponse, PluginMeta, PluginType};
///
/// struct Canned;
///
/// impl PluginProcess for Canned {
///     fn start(&mut self) -> Result<(), LaunchError> {
///         Ok(())
///     }
///
///     fn wait_for_response(&mut self, _timeout: Duration) -> Result<HandshakeResponse, LaunchError> {
///         Ok(HandshakeResponse::success(
///             PluginMeta::new("cpu", 1),
///             PluginType::Collector,
///             "token",
///         ))
///     }
///
///     fn kill(&mut self) -> Result<(), LaunchError> {
///         Ok(())
///     }
/// }
///
/// struct CannedLauncher;
///
/// impl PluginLauncher for CannedLauncher {
///     fn create(
///         &self,
///         _args: &HandshakeArgs,
///         _path: &Path,
///         _daemon: bool,
///     ) -> Result<Box<dyn PluginProcess>, LaunchError> {
///         Ok(Box::new(Canned))
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait PluginLauncher: Send + Sync {
    /// Prepares a process for the executable at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchError`] when the executable cannot be prepared.
    fn create(
        &self,
        args: &HandshakeArgs,
        path: &Path,
        daemon: bool,
    ) -> Result<Box<dyn PluginProcess>, LaunchError>;
}

impl<L> PluginLauncher for Arc<L>
where
    L: PluginLauncher + ?Sized,
{
    fn create(
        &self,
        args: &HandshakeArgs,
        path: &Path,
        daemon: bool,
    ) -> Result<Box<dyn PluginProcess>, LaunchError> {
        (**self).create(args, path, daemon)
    }
}
