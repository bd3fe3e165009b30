//! Append-only, hash-chained audit ledger.
//!
//! A [`Ledger`] is a single-writer log: appends are serialized by one mutex,
//! each entry gets the next sequence number, and each entry commits to its
//! predecessor through `prev_hash`. Entries are never edited once appended.
//! An optional [`LedgerSink`] receives every entry before it is committed in
//! memory, so a sink failure leaves no trace in either place.

mod sink;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use warden_config::GatewayConfig;

use crate::evidence;
use crate::protocol::PluginStatus;

pub use self::sink::{JsonlFileSink, LedgerSink};

const LEDGER_TARGET: &str = "warden_gateway::ledger";

/// Errors raised while recording or exporting ledger entries.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An entry could not be serialized.
    #[error("failed to serialise ledger entry: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The sink file could not be opened.
    #[error("failed to open ledger sink {path}: {source}")]
    Open {
        /// Path of the sink file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// An existing sink file holds a line that is not a ledger entry.
    #[error("ledger sink {path} is corrupt at line {line}")]
    Corrupt {
        /// Path of the sink file.
        path: String,
        /// One-based line number of the unreadable line.
        line: usize,
    },

    /// An existing sink file holds entries whose hash chain does not verify.
    #[error("ledger sink {path} has a broken chain at entry {seq}")]
    Broken {
        /// Path of the sink file.
        path: String,
        /// Sequence number of the first bad entry.
        seq: u64,
    },

    /// The sink refused an entry.
    #[error("failed to write ledger entry {seq} to sink: {source}")]
    Write {
        /// Sequence number of the entry that was not written.
        seq: u64,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Lifecycle event recorded by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerKind {
    /// An invocation was handed to the sandbox.
    Invoke,
    /// The invocation finished with status `ok`.
    Result,
    /// The invocation finished with status `error` or `timeout`.
    Error,
    /// The invocation was refused locally.
    Reject,
    /// A plugin was registered.
    Register,
    /// A plugin was enabled.
    Enable,
    /// A plugin was disabled.
    Disable,
}

impl LedgerKind {
    /// Returns the terminal kind matching a final response status.
    #[must_use]
    pub const fn for_status(status: PluginStatus) -> Self {
        match status {
            PluginStatus::Ok => Self::Result,
            PluginStatus::Error | PluginStatus::Timeout => Self::Error,
            PluginStatus::Rejected => Self::Reject,
        }
    }

    /// Returns whether this kind closes an invocation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Result | Self::Error | Self::Reject)
    }

    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invoke => "INVOKE",
            Self::Result => "RESULT",
            Self::Error => "ERROR",
            Self::Reject => "REJECT",
            Self::Register => "REGISTER",
            Self::Enable => "ENABLE",
            Self::Disable => "DISABLE",
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied by the caller for a new entry.
///
/// The ledger assigns the sequence number and hashes on append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDraft {
    kind: LedgerKind,
    run_id: String,
    plugin_id: String,
    request_id: String,
    input_hash: String,
    output_hash: String,
    meta: BTreeMap<String, String>,
    timestamp: Option<String>,
}

impl LedgerDraft {
    /// Starts a draft for `kind` in `run_id` concerning `plugin_id`.
    #[must_use]
    pub fn new(kind: LedgerKind, run_id: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            kind,
            run_id: run_id.into(),
            plugin_id: plugin_id.into(),
            request_id: String::new(),
            input_hash: String::new(),
            output_hash: String::new(),
            meta: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Sets the request identifier.
    #[must_use]
    pub fn request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Sets the evidence hashes.
    #[must_use]
    pub fn hashes(mut self, input_hash: impl Into<String>, output_hash: impl Into<String>) -> Self {
        self.input_hash = input_hash.into();
        self.output_hash = output_hash.into();
        self
    }

    /// Adds a metadata pair.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Pins the timestamp instead of reading the clock on append.
    #[must_use]
    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// One committed ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the ledger, starting at zero.
    pub seq: u64,
    /// Run the event belongs to.
    pub run_id: String,
    /// Event kind.
    pub kind: LedgerKind,
    /// Plugin concerned.
    pub plugin_id: String,
    /// Request concerned; empty for lifecycle events.
    pub request_id: String,
    /// Hash of the request payload.
    pub input_hash: String,
    /// Hash of the result.
    pub output_hash: String,
    /// Free-form metadata.
    pub meta: BTreeMap<String, String>,
    /// RFC 3339 UTC time of the append.
    pub timestamp: String,
    /// `event_hash` of the previous entry; empty for the first.
    pub prev_hash: String,
    /// Hash of every other field of this entry.
    pub event_hash: String,
}

#[derive(Serialize)]
struct HashedFields<'a> {
    seq: u64,
    run_id: &'a str,
    kind: LedgerKind,
    plugin_id: &'a str,
    request_id: &'a str,
    input_hash: &'a str,
    output_hash: &'a str,
    meta: &'a BTreeMap<String, String>,
    timestamp: &'a str,
    prev_hash: &'a str,
}

impl LedgerEntry {
    /// Recomputes the hash this entry should carry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Serialize`] if the fields cannot be encoded.
    pub fn compute_hash(&self) -> Result<String, LedgerError> {
        evidence::hash_serializable(&HashedFields {
            seq: self.seq,
            run_id: &self.run_id,
            kind: self.kind,
            plugin_id: &self.plugin_id,
            request_id: &self.request_id,
            input_hash: &self.input_hash,
            output_hash: &self.output_hash,
            meta: &self.meta,
            timestamp: &self.timestamp,
            prev_hash: &self.prev_hash,
        })
        .map_err(LedgerError::Serialize)
    }
}

/// Result of walking the hash chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// `true` when every link and hash checks out.
    pub valid: bool,
    /// Sequence number of the first bad entry.
    pub broken_at: Option<u64>,
}

impl ChainVerification {
    /// Verifies a contiguous run of entries starting at sequence zero.
    #[must_use]
    pub fn of(entries: &[LedgerEntry]) -> Self {
        let mut expected_prev = "";
        for (position, entry) in entries.iter().enumerate() {
            let seq_matches = u64::try_from(position).is_ok_and(|seq| seq == entry.seq);
            let hash_matches = entry
                .compute_hash()
                .is_ok_and(|hash| hash == entry.event_hash);
            if !seq_matches || entry.prev_hash != expected_prev || !hash_matches {
                return Self {
                    valid: false,
                    broken_at: Some(entry.seq),
                };
            }
            expected_prev = entry.event_hash.as_str();
        }
        Self {
            valid: true,
            broken_at: None,
        }
    }
}

/// Evidence bundle for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    /// Run the bundle covers.
    pub run_id: String,
    /// Every entry recorded for the run, in ledger order.
    pub events: Vec<LedgerEntry>,
    /// Manifest hash per plugin id involved in the run.
    pub plugin_manifest_digests: BTreeMap<String, String>,
    /// Hash of the newest entry in the whole ledger at export time.
    pub head_event_hash: String,
    /// Whether the whole chain verified at export time.
    pub chain_valid: bool,
}

struct LedgerState {
    entries: Vec<LedgerEntry>,
    sink: Option<Box<dyn LedgerSink>>,
}

/// Append-only audit log.
///
/// # Example
///
/// ```
/// use warden_gateway::ledger::{Ledger, LedgerDraft, LedgerKind};
///
/// let ledger = Ledger::new();
/// ledger.append(LedgerDraft::new(LedgerKind::Invoke, "run-1", "echo").request("req-1"))?;
/// ledger.append(LedgerDraft::new(LedgerKind::Result, "run-1", "echo").request("req-1"))?;
///
/// assert_eq!(ledger.len(), 2);
/// assert!(ledger.verify_chain().valid);
/// # Ok::<(), warden_gateway::ledger::LedgerError>(())
/// ```
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Creates an in-memory ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                entries: Vec::new(),
                sink: None,
            }),
        }
    }

    /// Creates a ledger that mirrors every entry to `sink`.
    ///
    /// Entries the sink already holds become the start of this ledger, so new
    /// appends extend the persisted chain.
    #[must_use]
    pub fn with_sink(mut sink: impl LedgerSink + 'static) -> Self {
        let entries = sink.take_history();
        if !entries.is_empty() {
            debug!(
                target: LEDGER_TARGET,
                resumed = entries.len(),
                "ledger resumed from sink"
            );
        }
        Self {
            state: Mutex::new(LedgerState {
                entries,
                sink: Some(Box::new(sink)),
            }),
        }
    }

    /// Creates a ledger from configuration, opening the NDJSON sink when
    /// `ledger_path` is set.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Open`] when the sink file cannot be opened.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, LedgerError> {
        match config.ledger_path() {
            Some(path) => Ok(Self::with_sink(JsonlFileSink::open(path)?)),
            None => Ok(Self::new()),
        }
    }

    /// Appends an entry and returns it as committed.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] when the entry cannot be hashed or the sink
    /// refuses it; nothing is committed in that case.
    pub fn append(&self, draft: LedgerDraft) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.lock();
        let seq = u64::try_from(state.entries.len()).unwrap_or(u64::MAX);
        let prev_hash = state
            .entries
            .last()
            .map(|previous| previous.event_hash.clone())
            .unwrap_or_default();
        let mut entry = LedgerEntry {
            seq,
            run_id: draft.run_id,
            kind: draft.kind,
            plugin_id: draft.plugin_id,
            request_id: draft.request_id,
            input_hash: draft.input_hash,
            output_hash: draft.output_hash,
            meta: draft.meta,
            timestamp: draft.timestamp.unwrap_or_else(now_rfc3339),
            prev_hash,
            event_hash: String::new(),
        };
        entry.event_hash = entry.compute_hash()?;

        if let Some(sink) = state.sink.as_mut() {
            sink.write(&entry)?;
        }
        state.entries.push(entry.clone());
        drop(state);

        debug!(
            target: LEDGER_TARGET,
            seq,
            kind = entry.kind.as_str(),
            plugin = %entry.plugin_id,
            request_id = %entry.request_id,
            "ledger entry appended"
        );
        Ok(entry)
    }

    /// Returns every entry in order.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    /// Returns entries recorded for `run_id`.
    #[must_use]
    pub fn by_run(&self, run_id: &str) -> Vec<LedgerEntry> {
        self.filtered(|entry| entry.run_id == run_id)
    }

    /// Returns entries concerning `plugin_id`.
    #[must_use]
    pub fn by_plugin(&self, plugin_id: &str) -> Vec<LedgerEntry> {
        self.filtered(|entry| entry.plugin_id == plugin_id)
    }

    /// Returns entries recorded for `request_id`.
    #[must_use]
    pub fn by_request(&self, request_id: &str) -> Vec<LedgerEntry> {
        self.filtered(|entry| entry.request_id == request_id)
    }

    /// Returns the hash of the newest entry, empty for an empty ledger.
    #[must_use]
    pub fn head(&self) -> String {
        self.lock()
            .entries
            .last()
            .map(|entry| entry.event_hash.clone())
            .unwrap_or_default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` when nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Walks the hash chain.
    #[must_use]
    pub fn verify_chain(&self) -> ChainVerification {
        ChainVerification::of(&self.lock().entries)
    }

    /// Renders every entry as newline-delimited JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Serialize`] if an entry cannot be encoded.
    pub fn to_ndjson(&self) -> Result<String, LedgerError> {
        let state = self.lock();
        let mut out = String::new();
        for entry in &state.entries {
            out.push_str(&serde_json::to_string(entry).map_err(LedgerError::Serialize)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Collects the evidence for `run_id`.
    #[must_use]
    pub fn export_proof(
        &self,
        run_id: &str,
        plugin_manifest_digests: BTreeMap<String, String>,
    ) -> ProofBundle {
        let state = self.lock();
        ProofBundle {
            run_id: run_id.to_owned(),
            events: state
                .entries
                .iter()
                .filter(|entry| entry.run_id == run_id)
                .cloned()
                .collect(),
            plugin_manifest_digests,
            head_event_hash: state
                .entries
                .last()
                .map(|entry| entry.event_hash.clone())
                .unwrap_or_default(),
            chain_valid: ChainVerification::of(&state.entries).valid,
        }
    }

    fn filtered(&self, keep: impl Fn(&LedgerEntry) -> bool) -> Vec<LedgerEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|entry| keep(entry))
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Ledger")
            .field("len", &state.entries.len())
            .field("sink", &state.sink.is_some())
            .finish()
    }
}

/// Current UTC time in RFC 3339 form.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests;
