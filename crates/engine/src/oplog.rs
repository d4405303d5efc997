//! Operation log: the ordered, versioned record of accepted changes.
//!
//! The log is the source of truth for resynchronization. Entries are
//! immutable once appended and carry the values they produced, so a
//! reconnecting session can be brought up to date from the log alone.
//! Only the most recent `retention` entries are kept.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cell_id::CellId;
use crate::events::{CellChange, Notice};

/// Entries kept by default.
pub const DEFAULT_RETENTION: usize = 1000;

/// Identity of a collaborating session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        SessionId(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An edit submitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Target cell, optionally sheet-qualified (`B3`, `Data!B3`).
    pub address: String,
    /// New raw input: a literal, a formula starting with `=`, or empty to clear.
    pub raw: String,
    pub session: SessionId,
    /// Workbook version the session had seen when it made the edit.
    pub base_version: u64,
}

impl Operation {
    pub fn new(address: impl Into<String>, raw: impl Into<String>, session: SessionId, base_version: u64) -> Self {
        Self {
            address: address.into(),
            raw: raw.into(),
            session,
            base_version,
        }
    }
}

/// What a log entry records.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    /// A cell edit, with the cell its address resolved to.
    Edit { op: Operation, cell: CellId },
    /// A worksheet was created.
    AddSheet { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub version: u64,
    pub kind: EntryKind,
    /// Values produced at this version.
    pub changes: Vec<CellChange>,
    pub notices: Vec<Notice>,
    pub applied_at: DateTime<Utc>,
}

impl LogEntry {
    /// The cell and session of an edit entry.
    pub fn edit_target(&self) -> Option<(CellId, SessionId)> {
        match &self.kind {
            EntryKind::Edit { op, cell } => Some((*cell, op.session)),
            EntryKind::AddSheet { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// Appending anything but `head + 1` means version sequencing is corrupt.
    #[error("out of sequence append: expected version {expected}, got {got}")]
    OutOfSequence { expected: u64, got: u64 },
    #[error("changes since version {since} are no longer retained (oldest retained is {oldest})")]
    VersionGapExceeded { since: u64, oldest: u64 },
    #[error("version {since} is ahead of the log head {head}")]
    FutureVersion { since: u64, head: u64 },
}

#[derive(Debug, Clone)]
pub struct OperationLog {
    entries: VecDeque<LogEntry>,
    retention: usize,
    /// Version of the last appended entry (0 = nothing appended yet).
    head: u64,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl OperationLog {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(retention.min(1024)),
            retention,
            head: 0,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest version still held, or None if nothing is retained.
    pub fn oldest_retained(&self) -> Option<u64> {
        self.entries.front().map(|e| e.version)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn get(&self, version: u64) -> Option<&LogEntry> {
        let oldest = self.oldest_retained()?;
        let idx = version.checked_sub(oldest)?;
        self.entries.get(usize::try_from(idx).ok()?)
    }

    /// Append the entry for version `head + 1`, evicting the oldest entries
    /// beyond the retention limit.
    pub fn append(&mut self, entry: LogEntry) -> Result<(), LogError> {
        let expected = self.head + 1;
        if entry.version != expected {
            return Err(LogError::OutOfSequence { expected, got: entry.version });
        }
        self.head = entry.version;
        self.entries.push_back(entry);
        while self.entries.len() > self.retention {
            self.entries.pop_front();
        }
        Ok(())
    }

    /// Entries with version in `(since, head]`.
    pub fn entries_since(&self, since: u64) -> Result<impl Iterator<Item = &LogEntry>, LogError> {
        if since > self.head {
            return Err(LogError::FutureVersion { since, head: self.head });
        }
        if since < self.head {
            let oldest = self.oldest_retained().unwrap_or(self.head + 1);
            if since + 1 < oldest {
                return Err(LogError::VersionGapExceeded { since, oldest });
            }
        }
        Ok(self.entries.iter().filter(move |e| e.version > since))
    }

    /// All changes after `since`, compacted to the latest value per cell and
    /// returned in canonical cell order. The raw input reported for a cell is
    /// the latest one any entry carried.
    pub fn compact_changes_since(&self, since: u64) -> Result<Vec<CellChange>, LogError> {
        let mut latest: FxHashMap<CellId, CellChange> = FxHashMap::default();
        for entry in self.entries_since(since)? {
            for change in &entry.changes {
                match latest.get_mut(&change.cell) {
                    Some(existing) => {
                        existing.value = change.value.clone();
                        if change.raw.is_some() {
                            existing.raw = change.raw.clone();
                        }
                    }
                    None => {
                        latest.insert(change.cell, change.clone());
                    }
                }
            }
        }
        let mut changes: Vec<CellChange> = latest.into_values().collect();
        changes.sort_by_key(|c| c.cell);
        Ok(changes)
    }
}
