//! Plugin records and the lifecycle state machine.
//!
//! A [`PluginRecord`] is created by the manager in the
//! [`PluginState::Detected`] state before the plugin is spawned, populated
//! from the handshake response, and shared with the registry as an
//! `Arc<PluginRecord>` once it reaches [`PluginState::Loaded`]. Identity
//! fields never change after that point; only the state moves on to
//! [`PluginState::Unloaded`] when the plugin is retired.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ControlError;
use crate::handshake::HandshakeIdentity;

/// Capability class a plugin reports during the handshake.
///
/// # Example
///
/// ```
/// use pulse_control::PluginType;
///
/// assert_eq!(PluginType::Publisher.as_str(), "publisher");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    /// Gathers telemetry from the host or a remote source.
    Collector,
    /// Transforms telemetry in flight.
    Processor,
    /// Ships telemetry to an external sink.
    Publisher,
}

impl PluginType {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collector => "collector",
            Self::Processor => "processor",
            Self::Publisher => "publisher",
        }
    }
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a plugin.
///
/// Legal transitions are `Detected → Loading → Loaded → Unloaded`.
/// `Unloaded` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// The executable has been found but not spawned.
    Detected,
    /// The process is running and the handshake is pending.
    Loading,
    /// The handshake succeeded and the plugin is registered.
    Loaded,
    /// The plugin has been retired from the registry.
    Unloaded,
}

impl PluginState {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloaded => "unloaded",
        }
    }

    /// Returns `true` when moving from `self` to `next` is permitted.
    ///
    /// # Example
    ///
    /// ```
    /// use pulse_control::PluginState;
    ///
    /// assert!(PluginState::Loading.can_transition_to(PluginState::Loaded));
    /// assert!(!PluginState::Detected.can_transition_to(PluginState::Loaded));
    /// ```
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Detected, Self::Loading)
                | (Self::Loading, Self::Loaded)
                | (Self::Loaded, Self::Unloaded)
        )
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal identity contract: the `(name, version)` pair that keys a plugin.
pub trait PluginKey {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version.
    fn version(&self) -> i64;
}

/// Read contract consumed by operator-facing catalog layers.
pub trait CatalogedPlugin: PluginKey {
    /// Returns the plugin type, or `"unknown"` before the handshake.
    fn type_name(&self) -> &'static str;

    /// Returns the current lifecycle state.
    fn status(&self) -> &'static str;

    /// Returns the load time as unix seconds, or `0` if never loaded.
    fn loaded_timestamp(&self) -> i64;
}

/// Name and version reported by a plugin.
///
/// # Example
///
/// ```
/// use pulse_control::{PluginKey, PluginMeta};
///
/// let meta = PluginMeta::new("collector", 1);
/// assert_eq!(meta.name(), "collector");
/// assert_eq!(meta.version(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginMeta {
    name: String,
    version: i64,
}

impl PluginMeta {
    /// Creates a metadata pair.
    #[must_use]
    pub fn new(name: impl Into<String>, version: i64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl PluginKey for PluginMeta {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn version(&self) -> i64 {
        self.version
    }
}

/// A plugin known to the control plane.
#[derive(Debug)]
pub struct PluginRecord {
    meta: PluginMeta,
    path: PathBuf,
    plugin_type: Option<PluginType>,
    token: String,
    loaded_at: Option<OffsetDateTime>,
    state: Mutex<PluginState>,
}

impl PluginRecord {
    /// Creates a record for an executable that has not been spawned yet.
    #[must_use]
    pub fn detected(path: impl Into<PathBuf>) -> Self {
        Self {
            meta: PluginMeta::default(),
            path: path.into(),
            plugin_type: None,
            token: String::new(),
            loaded_at: None,
            state: Mutex::new(PluginState::Detected),
        }
    }

    /// Returns the identity reported by the plugin.
    #[must_use]
    pub const fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    /// Returns the executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Returns the plugin type once the handshake has completed.
    #[must_use]
    pub const fn plugin_type(&self) -> Option<PluginType> {
        self.plugin_type
    }

    /// Returns the trust token issued by the plugin.
    #[must_use]
    pub const fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Returns the time the handshake completed.
    #[must_use]
    pub const fn loaded_at(&self) -> Option<OffsetDateTime> {
        self.loaded_at
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PluginState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the record to `next`, rejecting illegal transitions.
    pub(crate) fn transition(&self, next: PluginState) -> Result<(), ControlError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            return Err(ControlError::InvalidState {
                plugin: self.label(),
                from: *state,
                to: next,
            });
        }
        *state = next;
        Ok(())
    }

    /// Copies the handshake identity into the record and marks it loaded.
    pub(crate) fn apply_handshake(&mut self, identity: HandshakeIdentity) -> Result<(), ControlError> {
        self.meta = identity.meta;
        self.plugin_type = Some(identity.plugin_type);
        self.token = identity.token;
        self.loaded_at = Some(OffsetDateTime::now_utc());
        self.transition(PluginState::Loaded)
    }

    /// Human-readable identity used in errors and logs.
    pub(crate) fn label(&self) -> String {
        if self.meta.name.is_empty() {
            self.path.display().to_string()
        } else {
            format!("{} v{}", self.meta.name, self.meta.version)
        }
    }

    #[cfg(test)]
    pub(crate) fn stub(name: &str, version: i64, state: PluginState) -> Self {
        Self {
            meta: PluginMeta::new(name, version),
            path: PathBuf::from(format!("/opt/pulse/plugins/{name}-v{version}")),
            plugin_type: Some(PluginType::Collector),
            token: format!("{name}-token"),
            loaded_at: Some(OffsetDateTime::UNIX_EPOCH),
            state: Mutex::new(state),
        }
    }
}

impl PluginKey for PluginRecord {
    fn name(&self) -> &str {
        self.meta.name()
    }

    fn version(&self) -> i64 {
        self.meta.version()
    }
}

impl CatalogedPlugin for PluginRecord {
    fn type_name(&self) -> &'static str {
        self.plugin_type.map_or("unknown", PluginType::as_str)
    }

    fn status(&self) -> &'static str {
        self.state().as_str()
    }

    fn loaded_timestamp(&self) -> i64 {
        self.loaded_at.map_or(0, OffsetDateTime::unix_timestamp)
    }
}
