//! Change sets produced by accepted operations.
//!
//! A `ValueChangeSet` is the unit the collaboration layer broadcasts: every
//! cell whose value changed at one version, plus notices addressed to
//! specific sessions.

use crate::cell_id::CellId;
use crate::formula::eval::Value;
use crate::oplog::SessionId;

/// One changed cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    pub cell: CellId,
    /// Sheet-qualified A1 address (`Sheet1!B2`).
    pub address: String,
    /// New raw input. Present only for the cell the operation edited.
    pub raw: Option<String>,
    pub value: Value,
}

/// Information addressed to one session, carried alongside the changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// `session`'s earlier write to `address` was overwritten by a concurrent
    /// write based on an older version.
    ConflictOverride {
        session: SessionId,
        address: String,
        superseded_version: u64,
        winning_session: SessionId,
        winning_version: u64,
    },
    /// The formula `session` just wrote does not parse. The raw input is kept
    /// and the cell reads #ERROR!.
    FormulaError {
        session: SessionId,
        address: String,
        message: String,
    },
}

impl Notice {
    /// The session this notice is addressed to.
    pub fn session(&self) -> SessionId {
        match self {
            Notice::ConflictOverride { session, .. } | Notice::FormulaError { session, .. } => *session,
        }
    }
}

/// Result of one accepted, versioned change to the workbook.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueChangeSet {
    pub version: u64,
    /// Session that submitted the operation (None for structural changes).
    pub origin: Option<SessionId>,
    /// Changed cells in evaluation order; the edited cell comes first.
    pub changes: Vec<CellChange>,
    pub notices: Vec<Notice>,
}

impl ValueChangeSet {
    /// No cell changed value or raw input.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn change_for(&self, address: &str) -> Option<&CellChange> {
        self.changes.iter().find(|c| c.address == address)
    }

    pub fn notices_for(&self, session: SessionId) -> impl Iterator<Item = &Notice> {
        self.notices.iter().filter(move |n| n.session() == session)
    }

    /// True if any notice is addressed to `session`.
    pub fn has_notice_for(&self, session: SessionId) -> bool {
        self.notices_for(session).next().is_some()
    }

    /// Copy of this change set carrying only `session`'s notices.
    pub fn for_session(&self, session: SessionId) -> ValueChangeSet {
        ValueChangeSet {
            version: self.version,
            origin: self.origin,
            changes: self.changes.clone(),
            notices: self.notices_for(session).cloned().collect(),
        }
    }
}
