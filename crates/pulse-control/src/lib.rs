//! Plugin control plane for the Pulse telemetry framework.
//!
//! The `pulse-control` crate discovers, launches, authenticates, tracks, and
//! retires out-of-process plugins. Plugins are standalone executables that
//! extend the host with collection, processing, or publishing capability.
//!
//! # Architecture
//!
//! A [`PluginManager`] owns a [`PluginRegistry`] and the host's
//! [`HostKeyPair`]. Loading a plugin asks a [`PluginLauncher`] to start the
//! executable with a [`HandshakeArgs`] bundle, waits a bounded time for the
//! plugin's [`HandshakeResponse`], and appends a fully populated
//! [`PluginRecord`] to the registry. Unloading finds the record by name and
//! version under the registry lock and removes it.
//!
//! Each record moves through the [`PluginState`] machine
//! `Detected → Loading → Loaded → Unloaded`; any other transition fails.
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse_control::process::ExecutableLauncher;
//! use pulse_control::{HostKeyPair, ManagerSettings, PluginManager, PluginMeta};
//!
//! let manager = PluginManager::new(
//!     ExecutableLauncher,
//!     HostKeyPair::generate(),
//!     ManagerSettings::default(),
//! );
//! manager.load_plugin("/opt/pulse/plugins/cpu-collector").expect("load");
//! manager.unload_plugin(&PluginMeta::new("cpu", 1)).expect("unload");
//! ```

pub mod error;
pub mod handshake;
pub mod keys;
pub mod launcher;
pub mod manager;
pub mod process;
pub mod record;
pub mod registry;

#[cfg(test)]
mod tests;

pub use self::error::ControlError;
pub use self::handshake::{HandshakeArgs, HandshakeResponse, ResponseState};
pub use self::keys::HostKeyPair;
pub use self::launcher::{LaunchError, PluginLauncher, PluginProcess};
pub use self::manager::{ManagerSettings, PluginManager};
pub use self::record::{
    CatalogedPlugin, PluginKey, PluginMeta, PluginRecord, PluginState, PluginType,
};
pub use self::registry::{PluginRegistry, RegistryCursor, RegistryGuard};
