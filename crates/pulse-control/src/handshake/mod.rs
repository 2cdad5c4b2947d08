//! Handshake types exchanged between the host and a freshly spawned plugin.
//!
//! The host hands every plugin a [`HandshakeArgs`] bundle carrying its public
//! key, the directory the plugin should log to, and whether it runs as a
//! daemon. The plugin answers with a single [`HandshakeResponse`] describing
//! itself and issuing a trust token. Both sides are serialised as JSON; the
//! public key travels as standard base64.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::keys::PUBLIC_KEY_LENGTH;
use crate::record::{PluginKey, PluginMeta, PluginType};

/// Arguments handed to a spawned plugin.
///
/// # Example
///
/// ```
/// use pulse_control::HandshakeArgs;
///
/// let args = HandshakeArgs::new([7; 32], "/tmp", false);
/// let json = args.to_json().expect("serialise");
/// assert!(json.contains("\"run_as_daemon\":false"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeArgs {
    #[serde(
        serialize_with = "serialize_key",
        deserialize_with = "deserialize_key"
    )]
    control_public_key: [u8; PUBLIC_KEY_LENGTH],
    plugin_log_path: PathBuf,
    run_as_daemon: bool,
}

impl HandshakeArgs {
    /// Creates an argument bundle.
    #[must_use]
    pub fn new(
        control_public_key: [u8; PUBLIC_KEY_LENGTH],
        plugin_log_path: impl Into<PathBuf>,
        run_as_daemon: bool,
    ) -> Self {
        Self {
            control_public_key,
            plugin_log_path: plugin_log_path.into(),
            run_as_daemon,
        }
    }

    /// Returns the host public key.
    #[must_use]
    pub const fn control_public_key(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.control_public_key
    }

    /// Returns the directory the plugin should write its logs to.
    #[must_use]
    pub fn plugin_log_path(&self) -> &Path {
        self.plugin_log_path.as_path()
    }

    /// Returns `true` when the plugin should detach and keep running.
    #[must_use]
    pub const fn run_as_daemon(&self) -> bool {
        self.run_as_daemon
    }

    /// Serialises the bundle as a single JSON document.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialisation fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn serialize_key<S>(key: &[u8; PUBLIC_KEY_LENGTH], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(key))
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<[u8; PUBLIC_KEY_LENGTH], D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)?;
    <[u8; PUBLIC_KEY_LENGTH]>::try_from(bytes.as_slice()).map_err(|_| {
        serde::de::Error::invalid_length(bytes.len(), &"a 32 byte public key")
    })
}

/// Outcome reported by the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseState {
    /// The plugin initialised and is ready.
    Success,
    /// The plugin refused to start.
    Error,
}

/// Handshake answer written by the plugin.
///
/// # Example
///
/// ```
/// use pulse_control::{HandshakeResponse, ResponseState};
///
/// let json = r#"{
///     "state": "success",
///     "meta": {"name": "collector", "version": 1},
///     "plugin_type": "collector",
///     "token": "abc"
/// }"#;
/// let response: HandshakeResponse = serde_json::from_str(json).expect("parse");
/// assert_eq!(response.state(), ResponseState::Success);
/// assert_eq!(response.token(), "abc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    state: ResponseState,
    #[serde(default)]
    error_message: String,
    #[serde(default)]
    meta: PluginMeta,
    #[serde(default)]
    plugin_type: Option<PluginType>,
    #[serde(default)]
    token: String,
}

/// Identity extracted from a successful, well-formed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeIdentity {
    pub(crate) meta: PluginMeta,
    pub(crate) plugin_type: PluginType,
    pub(crate) token: String,
}

impl HandshakeResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn success(meta: PluginMeta, plugin_type: PluginType, token: impl Into<String>) -> Self {
        Self {
            state: ResponseState::Success,
            error_message: String::new(),
            meta,
            plugin_type: Some(plugin_type),
            token: token.into(),
        }
    }

    /// Creates an error response carrying the plugin's message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: ResponseState::Error,
            error_message: message.into(),
            meta: PluginMeta::default(),
            plugin_type: None,
            token: String::new(),
        }
    }

    /// Returns the reported outcome.
    #[must_use]
    pub const fn state(&self) -> ResponseState {
        self.state
    }

    /// Returns `true` when the plugin reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == ResponseState::Success
    }

    /// Returns the plugin-supplied error message.
    #[must_use]
    pub const fn error_message(&self) -> &str {
        self.error_message.as_str()
    }

    /// Returns the reported identity.
    #[must_use]
    pub const fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    /// Returns the reported plugin type, if any.
    #[must_use]
    pub const fn plugin_type(&self) -> Option<PluginType> {
        self.plugin_type
    }

    /// Returns the issued trust token.
    #[must_use]
    pub const fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Validates the response and extracts the identity copied onto a record.
    ///
    /// The error value is the rejection message: the plugin's own message for
    /// an error response, or a description of the missing metadata.
    pub(crate) fn into_identity(self) -> Result<HandshakeIdentity, String> {
        if self.state == ResponseState::Error {
            return Err(self.error_message);
        }
        let Some(plugin_type) = self.plugin_type else {
            return Err(String::from("plugin did not report its type"));
        };
        if self.meta.name().trim().is_empty() {
            return Err(String::from("plugin reported an empty name"));
        }
        Ok(HandshakeIdentity {
            meta: self.meta,
            plugin_type,
            token: self.token,
        })
    }
}
