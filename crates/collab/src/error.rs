use thiserror::Error;

use cogrid_engine::{OperationError, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown session: {0}")]
    Unknown(SessionId),

    #[error("session {0} is disconnected")]
    Disconnected(SessionId),

    #[error("ack for version {acked} is ahead of workbook version {current}")]
    AckAhead { acked: u64, current: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("unknown workbook: {0}")]
    UnknownWorkbook(String),

    #[error("workbook already open: {0}")]
    DuplicateWorkbook(String),
}

/// Why a collaboration request failed.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Hub(#[from] HubError),

    /// A fatal error stopped the workbook; it accepts no more requests.
    #[error("workbook is poisoned and no longer accepts requests")]
    Poisoned,

    /// The workbook actor is gone.
    #[error("workbook is shut down")]
    ChannelClosed,

    #[error("failed to start workbook thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl CollabError {
    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            CollabError::Operation(err) => err.code(),
            CollabError::Session(SessionError::Unknown(_)) => "unknown_session",
            CollabError::Session(SessionError::Disconnected(_)) => "session_disconnected",
            CollabError::Session(SessionError::AckAhead { .. }) => "ack_ahead",
            CollabError::Hub(HubError::UnknownWorkbook(_)) => "unknown_workbook",
            CollabError::Hub(HubError::DuplicateWorkbook(_)) => "duplicate_workbook",
            CollabError::Poisoned => "poisoned",
            CollabError::ChannelClosed => "shut_down",
            CollabError::Spawn(_) => "internal",
        }
    }
}
