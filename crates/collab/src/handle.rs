//! Single-writer workbook actor.
//!
//! Each workbook lives on its own thread, which owns the `Workbook`, its
//! sessions and its event queues, and handles `WorkbookRequest`s one at a
//! time. After every accepted write the actor publishes a fresh snapshot, so
//! readers go through the handle without ever queueing behind writers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};

use cogrid_config::{CollabSettings, ConflictPolicyKind};
use cogrid_engine::{
    CellView, ConflictPolicy, LastWriterWins, Operation, OperationError, RejectStale, SessionId, ValueChangeSet,
    Workbook, WorkbookLimits, WorkbookOptions, WorkbookSnapshot,
};

use crate::bridge::{oneshot, Connected, Reconnected, Reply, WorkbookRequest};
use crate::error::CollabError;
use crate::events::EventRegistry;
use crate::session::{SessionInfo, SessionManager};

/// Workbook construction options for the given settings.
pub fn options_from_settings(settings: &CollabSettings) -> WorkbookOptions {
    let policy: Box<dyn ConflictPolicy> = match settings.conflict_policy {
        ConflictPolicyKind::LastWriterWins => Box::new(LastWriterWins),
        ConflictPolicyKind::RejectStale => Box::new(RejectStale),
    };
    WorkbookOptions {
        default_sheet: settings.default_sheet.clone(),
        retention: settings.retention,
        limits: WorkbookLimits {
            max_rows: settings.max_rows,
            max_cols: settings.max_cols,
        },
        policy,
    }
}

/// Handle to a running workbook actor.
///
/// Writes are sent to the actor and block until it replies. Reads are served
/// from the last published snapshot.
pub struct WorkbookHandle {
    id: String,
    tx: Sender<WorkbookRequest>,
    snapshot: Arc<RwLock<Arc<WorkbookSnapshot>>>,
    poisoned: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkbookHandle {
    /// Start a workbook actor on a new thread.
    pub fn spawn(id: impl Into<String>, settings: &CollabSettings) -> Result<Self, CollabError> {
        let id = id.into();
        let actor = WorkbookActor::new(id.clone(), settings);
        let snapshot = Arc::clone(&actor.snapshot);
        let poisoned = Arc::clone(&actor.poisoned);

        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("workbook-{}", id))
            .spawn(move || actor.run(rx))
            .map_err(CollabError::Spawn)?;

        log::info!("workbook {} opened", id);
        Ok(Self {
            id,
            tx,
            snapshot,
            poisoned,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<WorkbookSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Version of the latest published snapshot.
    pub fn version(&self) -> u64 {
        self.snapshot.read().version()
    }

    pub fn get_cell(&self, address: &str) -> Result<CellView, CollabError> {
        self.check_poisoned()?;
        Ok(self.snapshot().get_cell(address)?)
    }

    pub fn get_worksheet(&self, sheet: &str) -> Result<Vec<CellView>, CollabError> {
        self.check_poisoned()?;
        Ok(self.snapshot().worksheet(sheet)?)
    }

    pub fn connect(&self) -> Result<Connected, CollabError> {
        self.request(|reply| WorkbookRequest::Connect { reply })
    }

    /// Submit an edit. `base_version` defaults to the session's last-synced
    /// version.
    pub fn submit(
        &self,
        session: SessionId,
        address: &str,
        raw: &str,
        base_version: Option<u64>,
    ) -> Result<ValueChangeSet, CollabError> {
        self.request(|reply| WorkbookRequest::Submit {
            session,
            address: address.to_string(),
            raw: raw.to_string(),
            base_version,
            reply,
        })
    }

    pub fn ack(&self, session: SessionId, version: u64) -> Result<u64, CollabError> {
        self.request(|reply| WorkbookRequest::Ack { session, version, reply })
    }

    pub fn disconnect(&self, session: SessionId) -> Result<u64, CollabError> {
        self.request(|reply| WorkbookRequest::Disconnect { session, reply })
    }

    pub fn reconnect(&self, session: SessionId, last_known_version: Option<u64>) -> Result<Reconnected, CollabError> {
        self.request(|reply| WorkbookRequest::Reconnect {
            session,
            last_known_version,
            reply,
        })
    }

    pub fn leave(&self, session: SessionId) -> Result<(), CollabError> {
        self.request(|reply| WorkbookRequest::Leave { session, reply })
    }

    pub fn add_sheet(&self, name: &str) -> Result<ValueChangeSet, CollabError> {
        self.request(|reply| WorkbookRequest::AddSheet {
            name: name.to_string(),
            reply,
        })
    }

    pub fn sessions(&self) -> Result<Vec<SessionInfo>, CollabError> {
        self.request(|reply| WorkbookRequest::Sessions { reply })
    }

    /// Close every session and stop the actor thread. Idempotent.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let (reply, rx) = oneshot::channel();
        if self.tx.send(WorkbookRequest::Shutdown { reply }).is_ok() {
            let _ = rx.blocking_recv();
        }
        if thread.join().is_err() {
            log::error!("workbook {} thread panicked", self.id);
        }
        log::info!("workbook {} closed", self.id);
    }

    fn check_poisoned(&self) -> Result<(), CollabError> {
        if self.is_poisoned() {
            return Err(CollabError::Poisoned);
        }
        Ok(())
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> WorkbookRequest) -> Result<T, CollabError> {
        self.check_poisoned()?;
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| CollabError::ChannelClosed)?;
        rx.blocking_recv().map_err(|_| CollabError::ChannelClosed)?
    }
}

impl fmt::Debug for WorkbookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkbookHandle")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

impl Drop for WorkbookHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the workbook thread.
struct WorkbookActor {
    id: String,
    workbook: Workbook,
    sessions: SessionManager,
    events: EventRegistry,
    snapshot: Arc<RwLock<Arc<WorkbookSnapshot>>>,
    poisoned: Arc<AtomicBool>,
}

impl WorkbookActor {
    fn new(id: String, settings: &CollabSettings) -> Self {
        let workbook = Workbook::with_options(options_from_settings(settings));
        let snapshot = Arc::new(RwLock::new(Arc::new(workbook.snapshot())));
        Self {
            id,
            workbook,
            sessions: SessionManager::new(),
            events: EventRegistry::new(settings.event_queue_depth, settings.echo_to_origin),
            snapshot,
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    fn run(mut self, rx: Receiver<WorkbookRequest>) {
        while let Ok(request) = rx.recv() {
            if let WorkbookRequest::Shutdown { reply } = request {
                self.events.close_all("workbook shut down");
                let _ = reply.send(());
                return;
            }
            self.handle(request);
        }
        // Every handle is gone
        self.events.close_all("workbook shut down");
    }

    fn handle(&mut self, request: WorkbookRequest) {
        match request {
            WorkbookRequest::Connect { reply } => {
                let _ = reply.send(self.guarded(|actor| Ok(actor.connect())));
            }
            WorkbookRequest::Submit {
                session,
                address,
                raw,
                base_version,
                reply,
            } => {
                let _ = reply.send(self.guarded(|actor| actor.submit(session, address, raw, base_version)));
            }
            WorkbookRequest::Ack { session, version, reply } => {
                let _ = reply.send(self.guarded(|actor| {
                    Ok(actor.sessions.ack(session, version, actor.workbook.version())?)
                }));
            }
            WorkbookRequest::Disconnect { session, reply } => {
                let _ = reply.send(self.guarded(|actor| actor.disconnect(session)));
            }
            WorkbookRequest::Reconnect {
                session,
                last_known_version,
                reply,
            } => {
                let _ = reply.send(self.guarded(|actor| actor.reconnect(session, last_known_version)));
            }
            WorkbookRequest::Leave { session, reply } => {
                let _ = reply.send(self.guarded(|actor| {
                    actor.sessions.leave(session)?;
                    actor.events.unregister(session);
                    Ok(())
                }));
            }
            WorkbookRequest::AddSheet { name, reply } => {
                let _ = reply.send(self.guarded(|actor| actor.add_sheet(&name)));
            }
            WorkbookRequest::Sessions { reply } => {
                let _ = reply.send(self.guarded(|actor| Ok(actor.session_list())));
            }
            WorkbookRequest::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Run `f` unless the workbook is poisoned.
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, CollabError>) -> Result<T, CollabError> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(CollabError::Poisoned);
        }
        f(self)
    }

    fn connect(&mut self) -> Connected {
        let version = self.workbook.version();
        let session = self.sessions.connect(version);
        let events = self.events.register(session);
        Connected {
            session,
            version,
            events,
        }
    }

    fn submit(
        &mut self,
        session: SessionId,
        address: String,
        raw: String,
        base_version: Option<u64>,
    ) -> Result<ValueChangeSet, CollabError> {
        let last_synced = self.sessions.require_connected(session)?.last_synced;
        let base = base_version.unwrap_or(last_synced);

        let set = self
            .workbook
            .apply_operation(Operation::new(address, raw, session, base))
            .map_err(|err| self.fail(err))?;
        self.commit(&set);
        self.sessions.advance_origin(session, set.version);
        Ok(set.for_session(session))
    }

    fn add_sheet(&mut self, name: &str) -> Result<ValueChangeSet, CollabError> {
        let set = self.workbook.add_sheet(name).map_err(|err| self.fail(err))?;
        self.commit(&set);
        Ok(set)
    }

    fn disconnect(&mut self, session: SessionId) -> Result<u64, CollabError> {
        let frozen = self.sessions.disconnect(session)?;
        self.events.unregister(session);
        Ok(frozen)
    }

    /// Resync and re-subscribe at the same point in the write order, so no
    /// change set falls between the catch-up and the new queue.
    fn reconnect(&mut self, session: SessionId, last_known_version: Option<u64>) -> Result<Reconnected, CollabError> {
        let from_version = self.sessions.resync_base(session, last_known_version)?;
        let resync = self.workbook.resync(from_version);
        let events = self.events.register(session);
        let current = self.workbook.version();
        self.sessions.mark_resynced(session, current)?;
        log::info!(
            "session {} resynced from version {} to {}",
            session,
            from_version,
            current
        );
        Ok(Reconnected {
            from_version,
            resync,
            events,
        })
    }

    fn session_list(&mut self) -> Vec<SessionInfo> {
        let ids: Vec<SessionId> = self.sessions.connected().collect();
        for id in ids {
            let lagging = self.events.is_lagging(id);
            self.sessions.set_lagging(id, lagging);
        }
        self.sessions.list()
    }

    /// Publish the new state and fan the change set out.
    fn commit(&mut self, set: &ValueChangeSet) {
        *self.snapshot.write() = Arc::new(self.workbook.snapshot());
        self.events.broadcast(set);
    }

    /// Map an engine error, poisoning the workbook if it is fatal.
    fn fail(&mut self, err: OperationError) -> CollabError {
        if err.is_fatal() {
            self.poison(&err);
        }
        CollabError::Operation(err)
    }

    /// Stop serving: close every session and refuse further requests.
    fn poison(&mut self, err: &OperationError) {
        log::error!("workbook {} poisoned: {}", self.id, err);
        self.poisoned.store(true, Ordering::SeqCst);
        self.events.close_all(&format!("workbook failed: {}", err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEvent;
    use cogrid_engine::{LogError, Notice, Resync, Value};
    use std::time::Duration;

    fn spawn() -> WorkbookHandle {
        WorkbookHandle::spawn("test", &CollabSettings::default()).unwrap()
    }

    #[test]
    fn test_submit_and_read_snapshot() {
        let handle = spawn();
        let alice = handle.connect().unwrap();

        handle.submit(alice.session, "A1", "10", None).unwrap();
        handle.submit(alice.session, "A2", "20", None).unwrap();
        let set = handle.submit(alice.session, "A3", "=SUM(A1:A2)", None).unwrap();
        assert_eq!(set.version, 3);

        assert_eq!(handle.version(), 3);
        assert_eq!(handle.get_cell("A3").unwrap().value, Value::Number(30.0));
        assert_eq!(handle.get_worksheet("Sheet1").unwrap().len(), 3);
    }

    #[test]
    fn test_debug_shows_id_and_version() {
        let handle = spawn();
        let alice = handle.connect().unwrap();
        handle.submit(alice.session, "A1", "1", None).unwrap();

        let shown = format!("{:?}", handle);
        assert!(shown.starts_with("WorkbookHandle"));
        assert!(shown.contains("\"test\""));
        assert!(shown.contains("version: 1"));
    }

    #[test]
    fn test_other_sessions_receive_broadcast() {
        let handle = spawn();
        let alice = handle.connect().unwrap();
        let bob = handle.connect().unwrap();

        handle.submit(alice.session, "A1", "5", None).unwrap();

        match bob.events.recv_timeout(Duration::from_secs(1)) {
            Some(SessionEvent::Changes(set)) => {
                assert_eq!(set.version, 1);
                assert_eq!(set.origin, Some(alice.session));
            }
            other => panic!("expected changes, got {:?}", other),
        }
        assert!(alice.events.try_recv().is_none());
    }

    #[test]
    fn test_submit_defaults_base_to_last_synced() {
        let settings = CollabSettings {
            conflict_policy: ConflictPolicyKind::RejectStale,
            ..CollabSettings::default()
        };
        let handle = WorkbookHandle::spawn("stale", &settings).unwrap();
        let alice = handle.connect().unwrap();
        let bob = handle.connect().unwrap();

        handle.submit(alice.session, "A1", "1", None).unwrap();
        // Bob has not acked version 1, so his edit is stale
        let err = handle.submit(bob.session, "A1", "2", None).unwrap_err();
        assert_eq!(err.code(), "stale_base");

        handle.ack(bob.session, 1).unwrap();
        handle.submit(bob.session, "A1", "2", None).unwrap();
        assert_eq!(handle.get_cell("A1").unwrap().value, Value::Number(2.0));
    }

    #[test]
    fn test_conflict_notice_reaches_overwritten_session() {
        let handle = spawn();
        let alice = handle.connect().unwrap();
        let bob = handle.connect().unwrap();

        handle.submit(alice.session, "B2", "first", Some(0)).unwrap();
        let reply = handle.submit(bob.session, "B2", "second", Some(0)).unwrap();
        // Bob's own reply carries no notice meant for alice
        assert!(reply.notices.is_empty());

        let events = alice.events.drain();
        let notice = events.iter().find_map(|e| match e {
            SessionEvent::Changes(set) => set.notices.first().cloned(),
            _ => None,
        });
        assert!(matches!(
            notice,
            Some(Notice::ConflictOverride { superseded_version: 1, winning_version: 2, .. })
        ));
        assert_eq!(handle.get_cell("B2").unwrap().raw, "second");
    }

    #[test]
    fn test_disconnected_session_cannot_write() {
        let handle = spawn();
        let alice = handle.connect().unwrap();
        assert_eq!(handle.disconnect(alice.session).unwrap(), 0);

        let err = handle.submit(alice.session, "A1", "1", None).unwrap_err();
        assert_eq!(err.code(), "session_disconnected");
    }

    #[test]
    fn test_reconnect_returns_delta() {
        let handle = spawn();
        let alice = handle.connect().unwrap();
        let bob = handle.connect().unwrap();
        handle.disconnect(bob.session).unwrap();

        handle.submit(alice.session, "A1", "1", None).unwrap();
        handle.submit(alice.session, "A1", "2", None).unwrap();
        handle.submit(alice.session, "A2", "=A1*10", None).unwrap();

        let back = handle.reconnect(bob.session, None).unwrap();
        assert_eq!(back.from_version, 0);
        match back.resync {
            Resync::Delta { from, to, changes } => {
                assert_eq!((from, to), (0, 3));
                // A1 compacted to its latest value
                assert_eq!(changes.len(), 2);
                assert_eq!(changes[0].value, Value::Number(2.0));
                assert_eq!(changes[1].value, Value::Number(20.0));
            }
            Resync::Full(_) => panic!("expected delta"),
        }

        handle.submit(alice.session, "A3", "x", None).unwrap();
        assert!(back.events.recv_timeout(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_add_sheet_broadcasts_to_everyone() {
        let handle = spawn();
        let alice = handle.connect().unwrap();

        let set = handle.add_sheet("Data").unwrap();
        assert_eq!(set.version, 1);
        assert!(alice.events.recv_timeout(Duration::from_secs(1)).is_some());
        assert!(handle.get_worksheet("Data").unwrap().is_empty());
        assert_eq!(handle.add_sheet("data").unwrap_err().code(), "duplicate_sheet");
    }

    #[test]
    fn test_leave_forgets_session() {
        let handle = spawn();
        let alice = handle.connect().unwrap();
        assert_eq!(handle.sessions().unwrap().len(), 1);

        handle.leave(alice.session).unwrap();
        assert!(handle.sessions().unwrap().is_empty());
        assert_eq!(handle.leave(alice.session).unwrap_err().code(), "unknown_session");
    }

    #[test]
    fn test_poison_closes_sessions_and_rejects_requests() {
        let mut actor = WorkbookActor::new("poison".into(), &CollabSettings::default());
        let connected = actor.connect();

        actor.poison(&OperationError::Fatal(LogError::OutOfSequence { expected: 2, got: 5 }));

        assert!(matches!(connected.events.try_recv(), Some(SessionEvent::Closed { .. })));
        let (reply, rx) = oneshot::channel();
        actor.handle(WorkbookRequest::Ack {
            session: connected.session,
            version: 0,
            reply,
        });
        assert!(matches!(rx.blocking_recv().unwrap(), Err(CollabError::Poisoned)));
    }

    #[test]
    fn test_shutdown_closes_sessions() {
        let handle = spawn();
        let alice = handle.connect().unwrap();
        handle.shutdown();

        assert!(matches!(alice.events.try_recv(), Some(SessionEvent::Closed { .. })));
        assert!(matches!(handle.connect(), Err(CollabError::ChannelClosed)));
        // Second shutdown is a no-op
        handle.shutdown();
    }
}
