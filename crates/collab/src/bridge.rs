//! Request types for handle ↔ workbook actor communication.
//!
//! Callers never touch the workbook directly. A `WorkbookHandle` sends a
//! `WorkbookRequest` through an mpsc channel to the actor thread that owns
//! the workbook, which applies it and answers on a oneshot channel.

use cogrid_engine::{Resync, SessionId, ValueChangeSet};

use crate::error::CollabError;
use crate::events::EventReceiver;
use crate::session::SessionInfo;

/// A simple oneshot channel for single-use responses.
/// Uses std::sync::mpsc under the hood.
pub mod oneshot {
    use std::sync::mpsc;

    pub struct Sender<T>(mpsc::SyncSender<T>);
    pub struct Receiver<T>(mpsc::Receiver<T>);

    impl<T> Sender<T> {
        pub fn send(self, value: T) -> Result<(), T> {
            self.0.send(value).map_err(|e| e.0)
        }
    }

    impl<T> Receiver<T> {
        pub fn blocking_recv(self) -> Result<T, RecvError> {
            self.0.recv().map_err(|_| RecvError)
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub struct RecvError;

    pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
        // Buffer of 1 for oneshot semantics
        let (tx, rx) = mpsc::sync_channel(1);
        (Sender(tx), Receiver(rx))
    }
}

pub type Reply<T> = oneshot::Sender<Result<T, CollabError>>;

/// A newly joined session.
#[derive(Debug)]
pub struct Connected {
    pub session: SessionId,
    /// Workbook version at join; the session's last-synced version.
    pub version: u64,
    pub events: EventReceiver,
}

/// A session back from a disconnect.
#[derive(Debug)]
pub struct Reconnected {
    /// Version the catch-up starts from.
    pub from_version: u64,
    pub resync: Resync,
    pub events: EventReceiver,
}

/// Requests processed by the workbook actor, in arrival order.
pub enum WorkbookRequest {
    Connect {
        reply: Reply<Connected>,
    },
    Submit {
        session: SessionId,
        address: String,
        raw: String,
        /// None = the session's last-synced version.
        base_version: Option<u64>,
        reply: Reply<ValueChangeSet>,
    },
    Ack {
        session: SessionId,
        version: u64,
        reply: Reply<u64>,
    },
    Disconnect {
        session: SessionId,
        reply: Reply<u64>,
    },
    Reconnect {
        session: SessionId,
        last_known_version: Option<u64>,
        reply: Reply<Reconnected>,
    },
    Leave {
        session: SessionId,
        reply: Reply<()>,
    },
    AddSheet {
        name: String,
        reply: Reply<ValueChangeSet>,
    },
    Sessions {
        reply: Reply<Vec<SessionInfo>>,
    },
    /// Close every session and stop the actor.
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
