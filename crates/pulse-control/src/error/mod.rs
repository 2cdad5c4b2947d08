//! Domain errors raised by the plugin control plane.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. Load failures carry the plugin
//! path; unload failures carry the plugin name and version.

use std::path::PathBuf;

use thiserror::Error;

use crate::launcher::LaunchError;
use crate::record::PluginState;

/// Errors arising from registry and lifecycle operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The same record handle is already present in the registry.
    #[error("plugin already loaded at index {index}")]
    DuplicateEntry {
        /// Position of the existing handle.
        index: usize,
    },

    /// A registry index was at or beyond the current length.
    #[error("index {index} out of range for registry of length {len}")]
    IndexOutOfRange {
        /// Index that was requested.
        index: usize,
        /// Registry length at the time of the request.
        len: usize,
    },

    /// The launcher could not create or start the plugin process.
    #[error("failed to spawn plugin '{}': {source}", path.display())]
    SpawnFailure {
        /// Executable that was being loaded.
        path: PathBuf,
        /// Failure reported by the launcher.
        #[source]
        source: LaunchError,
    },

    /// The plugin did not answer the handshake in time.
    #[error("plugin '{}' did not answer the handshake within {timeout_ms}ms", path.display())]
    HandshakeTimeout {
        /// Executable that was being loaded.
        path: PathBuf,
        /// Configured handshake budget in milliseconds.
        timeout_ms: u64,
    },

    /// The launcher failed while waiting for the handshake response.
    #[error("handshake with plugin '{}' failed: {source}", path.display())]
    HandshakeTransport {
        /// Executable that was being loaded.
        path: PathBuf,
        /// Failure reported by the launcher.
        #[source]
        source: LaunchError,
    },

    /// The plugin answered the handshake with an error status.
    #[error("plugin '{}' rejected the handshake: {message}", path.display())]
    HandshakeRejected {
        /// Executable that was being loaded.
        path: PathBuf,
        /// Message supplied by the plugin.
        message: String,
    },

    /// No loaded plugin matches the requested identity.
    #[error("plugin '{name}' version {version} not found (has it already been unloaded?)")]
    PluginNotFound {
        /// Requested plugin name.
        name: String,
        /// Requested plugin version.
        version: i64,
    },

    /// The plugin is not in a state that permits the requested transition.
    #[error("plugin '{plugin}' cannot move from {from} to {to}")]
    InvalidState {
        /// Plugin name, or its path while the name is still unknown.
        plugin: String,
        /// Current lifecycle state.
        from: PluginState,
        /// Requested lifecycle state.
        to: PluginState,
    },
}
