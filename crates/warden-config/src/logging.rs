//! Output formats for the gateway's diagnostic log.
//!
//! The audit ledger is the record of what plugins did; this log only says
//! how the gateway got there. Both formats go to stderr.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the gateway renders its `tracing` events.
///
/// Parsed case-insensitively from the `log_format` configuration key.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event, for hosts that ship gateway logs
    /// to a collector.
    #[default]
    Json,
    /// One terse line per event, for operators reading a terminal.
    Compact,
}

/// Error returned when a `log_format` value names no known format.
pub type LogFormatParseError = strum::ParseError;
