//! Output formats for daemon logs.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How `pulsed` renders log events on stderr.
///
/// Parsed case-insensitively from `PULSE_LOG_FORMAT`, `--log-format`, or the
/// `log_format` key of the configuration file.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event.
    #[default]
    Json,
    /// Single-line text for operators reading a terminal.
    Compact,
}

impl LogFormat {
    /// Returns `true` for machine-readable formats, which never carry ANSI
    /// colour codes.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Error returned when text names no [`LogFormat`].
pub type LogFormatParseError = strum::ParseError;
