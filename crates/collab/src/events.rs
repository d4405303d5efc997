//! Event fan-out to sessions.
//!
//! Each connected session has its own bounded queue. Broadcasting never
//! blocks the workbook: a full or closed queue drops the event and marks the
//! session lagging, and the next event that does get through is preceded by
//! an `EventsDropped` notice telling the client to resync.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use rustc_hash::FxHashMap;

use cogrid_engine::{SessionId, ValueChangeSet};

/// Event delivered to one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An accepted change set, with only the notices addressed to this session.
    Changes(ValueChangeSet),
    /// `dropped` earlier events never arrived; the client should resync.
    EventsDropped { dropped: u64, current_version: u64 },
    /// The workbook stopped serving this session.
    Closed { reason: String },
}

/// Receiving end of a session's event queue.
pub struct EventReceiver {
    session: SessionId,
    rx: Receiver<SessionEvent>,
}

impl fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReceiver").field("session", &self.session).finish()
    }
}

impl EventReceiver {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Next pending event, without blocking.
    pub fn try_recv(&self) -> Option<SessionEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// All pending events.
    pub fn drain(&self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

struct Subscriber {
    tx: SyncSender<SessionEvent>,
    lagging: bool,
    /// Events dropped since the last successful delivery.
    dropped: u64,
}

/// Per-session event channels for one workbook.
pub struct EventRegistry {
    depth: usize,
    echo_to_origin: bool,
    subscribers: FxHashMap<SessionId, Subscriber>,
    /// Metrics: total events dropped due to backpressure.
    dropped_total: u64,
}

impl EventRegistry {
    pub fn new(depth: usize, echo_to_origin: bool) -> Self {
        Self {
            depth: depth.max(1),
            echo_to_origin,
            subscribers: FxHashMap::default(),
            dropped_total: 0,
        }
    }

    /// Register a session and return its event receiver.
    /// Replaces any queue the session already had.
    pub fn register(&mut self, session: SessionId) -> EventReceiver {
        let (tx, rx) = mpsc::sync_channel(self.depth);
        self.subscribers.insert(
            session,
            Subscriber {
                tx,
                lagging: false,
                dropped: 0,
            },
        );
        EventReceiver { session, rx }
    }

    pub fn unregister(&mut self, session: SessionId) -> bool {
        self.subscribers.remove(&session).is_some()
    }

    pub fn is_registered(&self, session: SessionId) -> bool {
        self.subscribers.contains_key(&session)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_lagging(&self, session: SessionId) -> bool {
        self.subscribers.get(&session).is_some_and(|s| s.lagging)
    }

    /// Get total dropped events count (for metrics).
    pub fn dropped_events_count(&self) -> u64 {
        self.dropped_total
    }

    /// Deliver a change set to every registered session.
    ///
    /// The origin only gets its own change set back if echo is enabled or a
    /// notice is addressed to it. Each recipient sees only its own notices.
    pub fn broadcast(&mut self, set: &ValueChangeSet) {
        for (&session, sub) in self.subscribers.iter_mut() {
            let has_notice = set.has_notice_for(session);
            if set.origin == Some(session) && !self.echo_to_origin && !has_notice {
                continue;
            }

            let event = SessionEvent::Changes(set.for_session(session));

            if !deliver(session, sub, event, set.version) {
                self.dropped_total += 1;
            }
        }
    }

    /// Tell one session it is being closed and drop its queue.
    pub fn close(&mut self, session: SessionId, reason: &str) {
        if let Some(sub) = self.subscribers.remove(&session) {
            let _ = sub.tx.try_send(SessionEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Close every session.
    pub fn close_all(&mut self, reason: &str) {
        for (_, sub) in self.subscribers.drain() {
            let _ = sub.tx.try_send(SessionEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }
}

/// Try to queue `event`, catching up a lagging session first.
/// Returns false if the event was dropped.
fn deliver(session: SessionId, sub: &mut Subscriber, event: SessionEvent, version: u64) -> bool {
    if sub.lagging {
        let notice = SessionEvent::EventsDropped {
            dropped: sub.dropped,
            current_version: version,
        };
        if sub.tx.try_send(notice).is_err() {
            sub.dropped += 1;
            log::debug!("Event v{} dropped for session {} (still lagging)", version, session);
            return false;
        }
        sub.lagging = false;
        sub.dropped = 0;
    }

    // Use try_send for non-blocking - drop if queue full
    if sub.tx.try_send(event).is_err() {
        if !sub.lagging {
            log::warn!("session {} is lagging; dropping events", session);
        }
        sub.lagging = true;
        sub.dropped += 1;
        log::debug!("Event v{} dropped for session {} (backpressure)", version, session);
        return false;
    }
    true
}
