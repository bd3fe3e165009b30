use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How plugin handlers are hosted while they run.
///
/// Only [`IsolationMode::Process`] satisfies the isolation invariant. The
/// inline mode runs handlers on a dedicated host thread and exists so unit
/// tests can drive the gateway without building plugin binaries.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IsolationMode {
    /// Each invocation runs in its own sandboxed child process.
    #[default]
    Process,
    /// Handlers run in-process, racing a timer. Test environments only.
    Inline,
}

impl IsolationMode {
    /// Returns `true` when handlers run outside the host process.
    #[must_use]
    pub const fn is_isolated(self) -> bool {
        matches!(self, Self::Process)
    }
}

/// Errors encountered while parsing an [`IsolationMode`] from text.
pub type IsolationModeParseError = strum::ParseError;
