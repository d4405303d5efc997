//! Concurrent-write detection and resolution.
//!
//! An edit is concurrent with an earlier write when it is based on a version
//! older than that write: the session could not have seen it. Detection reads
//! the operation log; what happens next is up to the workbook's
//! `ConflictPolicy`.

use std::fmt;

use crate::cell_id::CellId;
use crate::error::OperationError;
use crate::oplog::{Operation, OperationLog, SessionId};

/// A retained write that an incoming edit did not see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub cell: CellId,
    pub superseded_session: SessionId,
    pub superseded_version: u64,
}

/// Find the latest write to `cell` by another session that `op` did not see.
///
/// Writes in `(op.base_version, current]` conflict. When the log no longer
/// reaches back to the base, only retained writes can be checked; writes
/// evicted before the window are not reported.
pub fn detect_conflict(log: &OperationLog, cell: CellId, op: &Operation, current: u64) -> Option<Conflict> {
    if op.base_version >= current {
        return None;
    }

    log.iter()
        .rev()
        .take_while(|e| e.version > op.base_version)
        .filter_map(|e| e.edit_target().map(|target| (e.version, target)))
        .find(|(_, (target, session))| *target == cell && *session != op.session)
        .map(|(version, (_, session))| Conflict {
            cell,
            superseded_session: session,
            superseded_version: version,
        })
}

/// What to do with a conflicting edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Apply the edit and tell the superseded session.
    Apply,
    Reject(OperationError),
}

/// Decides the outcome of a detected conflict.
pub trait ConflictPolicy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, conflict: &Conflict, op: &Operation, current: u64) -> Resolution;
}

/// Later-sequenced write wins; the overwritten session gets a notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl ConflictPolicy for LastWriterWins {
    fn name(&self) -> &'static str {
        "last_writer_wins"
    }

    fn resolve(&self, _conflict: &Conflict, _op: &Operation, _current: u64) -> Resolution {
        Resolution::Apply
    }
}

/// Edits based on a stale version of a concurrently written cell are refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectStale;

impl ConflictPolicy for RejectStale {
    fn name(&self) -> &'static str {
        "reject_stale"
    }

    fn resolve(&self, _conflict: &Conflict, op: &Operation, current: u64) -> Resolution {
        Resolution::Reject(OperationError::StaleBase {
            expected: op.base_version,
            actual: current,
        })
    }
}
