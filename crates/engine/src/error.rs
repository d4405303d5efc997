use thiserror::Error;

use crate::cell_id::AddressError;
use crate::dep_graph::DependencyError;
use crate::oplog::LogError;
use crate::recalc::CycleReport;

/// Why an operation was not applied.
///
/// Every variant except `Fatal` leaves the workbook exactly as it was: no
/// cell, graph edge, version or log entry changes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("unknown sheet: {0}")]
    UnknownSheet(String),

    #[error("invalid sheet name: {0:?}")]
    InvalidSheetName(String),

    #[error("sheet already exists: {0}")]
    DuplicateSheet(String),

    #[error("{0}")]
    Cycle(CycleReport),

    #[error("dependency graph is full ({limit} cells)")]
    GraphFull { limit: usize },

    #[error("stale edit: based on version {expected}, workbook is at version {actual}")]
    StaleBase { expected: u64, actual: u64 },

    #[error("base version {base} is ahead of workbook version {current}")]
    FutureBase { base: u64, current: u64 },

    /// Internal consistency is broken; the workbook must not accept more writes.
    #[error("fatal: {0}")]
    Fatal(LogError),
}

impl OperationError {
    pub(crate) fn address(address: &str, err: AddressError) -> Self {
        OperationError::InvalidAddress {
            address: address.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OperationError::Fatal(_))
    }

    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            OperationError::InvalidAddress { .. } => "invalid_address",
            OperationError::UnknownSheet(_) => "unknown_sheet",
            OperationError::InvalidSheetName(_) => "invalid_sheet_name",
            OperationError::DuplicateSheet(_) => "duplicate_sheet",
            OperationError::Cycle(_) => "cycle",
            OperationError::GraphFull { .. } => "graph_full",
            OperationError::StaleBase { .. } => "stale_base",
            OperationError::FutureBase { .. } => "future_base",
            OperationError::Fatal(_) => "fatal",
        }
    }
}

impl From<DependencyError> for OperationError {
    fn from(err: DependencyError) -> Self {
        match err {
            DependencyError::Cycle(report) => OperationError::Cycle(report),
            DependencyError::Capacity { limit } => OperationError::GraphFull { limit },
        }
    }
}
