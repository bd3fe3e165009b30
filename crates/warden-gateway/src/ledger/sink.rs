//! Durable destinations for ledger entries.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use super::{ChainVerification, LedgerEntry, LedgerError};

/// Receives each entry before the ledger commits it.
pub trait LedgerSink: Send {
    /// Persists one entry.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] when the entry could not be persisted; the
    /// ledger then refuses the append.
    fn write(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Hands over entries the sink already holds, so the ledger continues
    /// their chain instead of starting a new one at sequence zero.
    fn take_history(&mut self) -> Vec<LedgerEntry> {
        Vec::new()
    }
}

/// Appends entries to a file, one JSON object per line.
///
/// Reopening an existing file resumes its chain: the entries already on disk
/// are read back and verified before anything new is appended.
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    file: File,
    committed_len: u64,
    history: Vec<LedgerEntry>,
}

impl JsonlFileSink {
    /// Opens `path` for appending, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Open`] when the file cannot be opened or read,
    /// [`LedgerError::Corrupt`] when an existing line does not parse, and
    /// [`LedgerError::Broken`] when the existing entries do not chain.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let target = path.as_ref();
        let open_error = |source: std::io::Error| LedgerError::Open {
            path: target.display().to_string(),
            source: Arc::new(source),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(target)
            .map_err(open_error)?;

        let history = read_history(&file, target)?;
        let committed_len = file.seek(SeekFrom::End(0)).map_err(open_error)?;
        Ok(Self {
            path: target.to_path_buf(),
            file,
            committed_len,
            history,
        })
    }

    /// Returns the sink file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rollback(&mut self) {
        if self.file.set_len(self.committed_len).is_err() {
            warn!(
                target: super::LEDGER_TARGET,
                path = %self.path.display(),
                "could not truncate partial ledger line"
            );
        }
    }
}

fn read_history(file: &File, path: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
    let mut history = Vec::new();
    for (index, read) in BufReader::new(file).lines().enumerate() {
        let line = read.map_err(|source| LedgerError::Open {
            path: path.display().to_string(),
            source: Arc::new(source),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str::<LedgerEntry>(&line).map_err(|_| {
            LedgerError::Corrupt {
                path: path.display().to_string(),
                line: index + 1,
            }
        })?;
        history.push(entry);
    }

    let verification = ChainVerification::of(&history);
    if let Some(seq) = verification.broken_at {
        return Err(LedgerError::Broken {
            path: path.display().to_string(),
            seq,
        });
    }
    Ok(history)
}

impl LedgerSink for JsonlFileSink {
    fn write(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(entry).map_err(LedgerError::Serialize)?;
        line.push(b'\n');
        if let Err(source) = self.file.write_all(&line).and_then(|()| self.file.flush()) {
            self.rollback();
            return Err(LedgerError::Write {
                seq: entry.seq,
                source: Arc::new(source),
            });
        }
        self.committed_len = self
            .committed_len
            .saturating_add(u64::try_from(line.len()).unwrap_or(u64::MAX));
        Ok(())
    }

    fn take_history(&mut self) -> Vec<LedgerEntry> {
        std::mem::take(&mut self.history)
    }
}
