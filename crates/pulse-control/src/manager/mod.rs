//! Plugin lifecycle orchestration.
//!
//! The [`PluginManager`] is the only component allowed to spawn plugins and
//! hand them the host's public key. Loading runs the handshake outside any
//! lock, so concurrent loads only contend on the final append. Unloading
//! holds the registry lock from the identity scan until the removal so the
//! index it found cannot go stale.
//!
//! Every started process stays owned by the manager until
//! [`PluginManager::terminate_processes`] runs or a caller detaches it, so
//! unloading a plugin never orphans its process handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use pulse_config::{Config, DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_PLUGIN_LOG_PATH};

use crate::error::ControlError;
use crate::handshake::HandshakeArgs;
use crate::keys::{HostKeyPair, PUBLIC_KEY_LENGTH};
use crate::launcher::{LaunchError, PluginLauncher, PluginProcess};
use crate::record::{CatalogedPlugin, PluginKey, PluginRecord, PluginState};
use crate::registry::PluginRegistry;

/// Tracing target for lifecycle operations.
const MANAGER_TARGET: &str = "pulse_control::manager";

/// Handshake budget used when no configuration is supplied.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS);

/// Tunables for the load protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    handshake_timeout: Duration,
    plugin_log_path: PathBuf,
}

impl ManagerSettings {
    /// Creates settings with an explicit timeout and log directory.
    #[must_use]
    pub fn new(handshake_timeout: Duration, plugin_log_path: impl Into<PathBuf>) -> Self {
        Self {
            handshake_timeout,
            plugin_log_path: plugin_log_path.into(),
        }
    }

    /// Returns how long a load waits for the handshake response.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Returns the log directory handed to plugins.
    #[must_use]
    pub fn plugin_log_path(&self) -> &Path {
        self.plugin_log_path.as_path()
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_PLUGIN_LOG_PATH)
    }
}

impl From<&Config> for ManagerSettings {
    fn from(config: &Config) -> Self {
        Self::new(
            config.handshake_timeout(),
            config.plugin_log_path().as_std_path(),
        )
    }
}

/// Loads, tracks, and retires plugins.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use std::time::Duration;
/// use pulse_control::launcher::{LaunchError, PluginLauncher, PluginProcess};
/// use pulse_control::{
///     CatalogedPlugin, HandshakeArgs, HandshakeResponse, HostKeyPair, ManagerSettings,
///     PluginManager, PluginMeta, PluginType,
/// };
///
/// struct Ready;
///
/// impl PluginProcess for Ready {
///     fn start(&mut self) -> Result<(), LaunchError> {
///         Ok(())
///     }
///
///     fn wait_for_response(&mut self, _timeout: Duration) -> Result<HandshakeResponse, LaunchError> {
///         Ok(HandshakeResponse::success(
///             PluginMeta::new("collector", 1),
///             PluginType::Collector,
///             "abc",
///         ))
///     }
///
///     fn kill(&mut self) -> Result<(), LaunchError> {
///         Ok(())
///     }
/// }
///
/// struct ReadyLauncher;
///
/// impl PluginLauncher for ReadyLauncher {
///     fn create(
///         &self,
///         _args: &HandshakeArgs,
///         _path: &Path,
///         _daemon: bool,
///     ) -> Result<Box<dyn PluginProcess>, LaunchError> {
///         Ok(Box::new(Ready))
///     }
/// }
///
/// let manager = PluginManager::new(
///     ReadyLauncher,
///     HostKeyPair::generate(),
///     ManagerSettings::default(),
/// );
/// let record = manager.load_plugin("/bin/collector-v1").expect("load");
/// assert_eq!(record.status(), "loaded");
///
/// manager.unload_plugin(&PluginMeta::new("collector", 1)).expect("unload");
/// assert!(manager.registry().is_empty());
/// ```
#[derive(Debug)]
pub struct PluginManager<L> {
    registry: PluginRegistry,
    processes: ProcessTable,
    launcher: L,
    keys: HostKeyPair,
    settings: ManagerSettings,
}

/// A started process and the record it was registered under, if any.
struct TrackedProcess {
    path: PathBuf,
    record: Option<Arc<PluginRecord>>,
    process: Box<dyn PluginProcess>,
}

/// Started processes owned by the manager.
#[derive(Default)]
struct ProcessTable {
    entries: Mutex<Vec<TrackedProcess>>,
}

impl ProcessTable {
    fn adopt(
        &self,
        path: &Path,
        record: Option<Arc<PluginRecord>>,
        process: Box<dyn PluginProcess>,
    ) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TrackedProcess {
                path: path.to_path_buf(),
                record,
                process,
            });
    }

    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn detach(&self, record: &PluginRecord) -> Option<Box<dyn PluginProcess>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let index = entries.iter().position(|entry| {
            entry
                .record
                .as_deref()
                .is_some_and(|tracked| std::ptr::eq(tracked, record))
        })?;
        Some(entries.remove(index).process)
    }

    fn drain(&self) -> Vec<TrackedProcess> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTable")
            .field("len", &self.len())
            .finish()
    }
}

impl<L> PluginManager<L> {
    /// Creates a manager with an empty registry.
    #[must_use]
    pub fn new(launcher: L, keys: HostKeyPair, settings: ManagerSettings) -> Self {
        Self {
            registry: PluginRegistry::new(),
            processes: ProcessTable::default(),
            launcher,
            keys,
            settings,
        }
    }

    /// Returns the registry of loaded plugins.
    #[must_use]
    pub const fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Returns a snapshot of every loaded plugin in load order.
    #[must_use]
    pub fn catalog(&self) -> Vec<Arc<PluginRecord>> {
        self.registry.snapshot()
    }

    /// Returns how many started processes the manager still owns.
    ///
    /// This includes processes of unloaded plugins and of plugins whose
    /// handshake failed, until they are terminated or detached.
    #[must_use]
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Hands ownership of `record`'s process to the caller.
    ///
    /// Returns `None` if the process was already detached or terminated, or if
    /// `record` was not produced by this manager.
    #[must_use]
    pub fn detach_process(&self, record: &PluginRecord) -> Option<Box<dyn PluginProcess>> {
        self.processes.detach(record)
    }

    /// Kills every process the manager still owns.
    ///
    /// Returns the number of processes terminated. A failed kill is logged
    /// and the remaining processes are still attempted. The registry is not
    /// touched; unload plugins first to retire their records.
    pub fn terminate_processes(&self) -> usize {
        let mut terminated = 0;
        for mut entry in self.processes.drain() {
            match entry.process.kill() {
                Ok(()) => {
                    terminated += 1;
                    debug!(
                        target: MANAGER_TARGET,
                        path = %entry.path.display(),
                        "plugin process terminated"
                    );
                }
                Err(err) => warn!(
                    target: MANAGER_TARGET,
                    path = %entry.path.display(),
                    error = %err,
                    "failed to terminate plugin process"
                ),
            }
        }
        terminated
    }

    /// Returns the public key handed to plugins.
    #[must_use]
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.keys.public_key_bytes()
    }

    /// Returns the host key pair.
    #[must_use]
    pub const fn keys(&self) -> &HostKeyPair {
        &self.keys
    }

    /// Returns the load protocol settings.
    #[must_use]
    pub const fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Builds the argument bundle handed to a spawned plugin.
    #[must_use]
    pub fn handshake_args(&self, daemon: bool) -> HandshakeArgs {
        HandshakeArgs::new(
            self.keys.public_key_bytes(),
            self.settings.plugin_log_path(),
            daemon,
        )
    }

    /// Removes the first loaded plugin matching `plugin`'s name and version.
    ///
    /// The plugin process itself is left running and stays owned by the
    /// manager; see [`Self::detach_process`] and [`Self::terminate_processes`].
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::PluginNotFound`] if no record matches and
    /// [`ControlError::InvalidState`] if the match is not loaded. The
    /// registry is unchanged in both cases.
    pub fn unload_plugin<K>(&self, plugin: &K) -> Result<Arc<PluginRecord>, ControlError>
    where
        K: PluginKey + ?Sized,
    {
        let mut table = self.registry.lock();

        let index = table
            .position(|record| {
                record.name() == plugin.name() && record.version() == plugin.version()
            })
            .ok_or_else(|| ControlError::PluginNotFound {
                name: plugin.name().to_owned(),
                version: plugin.version(),
            })?;

        table.get(index)?.transition(PluginState::Unloaded)?;
        let record = table.remove_at(index)?;
        drop(table);

        info!(
            target: MANAGER_TARGET,
            plugin = record.name(),
            version = record.version(),
            path = %record.path().display(),
            "plugin unloaded"
        );
        Ok(record)
    }
}

impl<L: PluginLauncher> PluginManager<L> {
    /// Spawns the plugin at `path`, performs the handshake, and registers it.
    ///
    /// The handshake wait happens outside the registry lock. Exactly one
    /// spawn attempt is made.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::SpawnFailure`] if the process cannot be
    /// created or started, [`ControlError::HandshakeTimeout`] or
    /// [`ControlError::HandshakeTransport`] if no usable response arrives,
    /// [`ControlError::HandshakeRejected`] if the plugin refuses to load, or
    /// the registry's error if the final append fails. The registry is
    /// unchanged on every failure.
    ///
    /// A process that started but failed the handshake is not killed; it
    /// stays owned by the manager until [`Self::terminate_processes`].
    pub fn load_plugin(&self, path: impl AsRef<Path>) -> Result<Arc<PluginRecord>, ControlError> {
        let path = path.as_ref();
        info!(target: MANAGER_TARGET, path = %path.display(), "attempting to load plugin");

        let mut process = self.spawn(path)?;

        let record = match self.handshake(path, PluginRecord::detected(path), process.as_mut()) {
            Ok(record) => record,
            Err(err) => {
                self.processes.adopt(path, None, process);
                return Err(err);
            }
        };

        if let Err(err) = self.registry.append(Arc::clone(&record)) {
            terminate_orphan(path, process.as_mut());
            return Err(err);
        }
        self.processes.adopt(path, Some(Arc::clone(&record)), process);

        info!(
            target: MANAGER_TARGET,
            plugin = record.name(),
            version = record.version(),
            plugin_type = record.type_name(),
            path = %path.display(),
            "plugin loaded"
        );
        Ok(record)
    }

    fn spawn(&self, path: &Path) -> Result<Box<dyn PluginProcess>, ControlError> {
        let spawn_failure = |source: LaunchError| {
            warn!(
                target: MANAGER_TARGET,
                path = %path.display(),
                error = %source,
                "failed to spawn plugin"
            );
            ControlError::SpawnFailure {
                path: path.to_path_buf(),
                source,
            }
        };

        let args = self.handshake_args(false);
        let mut process = self
            .launcher
            .create(&args, path, false)
            .map_err(spawn_failure)?;
        process.start().map_err(spawn_failure)?;
        debug!(target: MANAGER_TARGET, path = %path.display(), "plugin process started");
        Ok(process)
    }

    fn handshake(
        &self,
        path: &Path,
        mut record: PluginRecord,
        process: &mut dyn PluginProcess,
    ) -> Result<Arc<PluginRecord>, ControlError> {
        record.transition(PluginState::Loading)?;

        let response = process
            .wait_for_response(self.settings.handshake_timeout())
            .map_err(|err| self.handshake_error(path, err))?;

        let identity = response.into_identity().map_err(|message| {
            warn!(
                target: MANAGER_TARGET,
                path = %path.display(),
                message = %message,
                "plugin rejected the handshake"
            );
            ControlError::HandshakeRejected {
                path: path.to_path_buf(),
                message,
            }
        })?;
        record.apply_handshake(identity)?;
        Ok(Arc::new(record))
    }

    fn handshake_error(&self, path: &Path, err: LaunchError) -> ControlError {
        warn!(
            target: MANAGER_TARGET,
            path = %path.display(),
            error = %err,
            "plugin handshake failed"
        );
        match err {
            LaunchError::Timeout { .. } => ControlError::HandshakeTimeout {
                path: path.to_path_buf(),
                timeout_ms: u64::try_from(self.settings.handshake_timeout().as_millis())
                    .unwrap_or(u64::MAX),
            },
            other => ControlError::HandshakeTransport {
                path: path.to_path_buf(),
                source: other,
            },
        }
    }
}

/// Kills a process whose record could not be registered.
fn terminate_orphan(path: &Path, process: &mut dyn PluginProcess) {
    match process.kill() {
        Ok(()) => warn!(
            target: MANAGER_TARGET,
            path = %path.display(),
            "registration failed, terminated plugin process"
        ),
        Err(err) => warn!(
            target: MANAGER_TARGET,
            path = %path.display(),
            error = %err,
            "registration failed and the plugin process could not be terminated"
        ),
    }
}
