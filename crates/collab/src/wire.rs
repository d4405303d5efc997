//! Engine types to protocol v1 wire types.
//!
//! Session ids are rendered through a caller-supplied naming function so a
//! host can show the labels its clients chose instead of raw UUIDs.

use cogrid_engine::{CellChange, CellView, Notice, Resync, SessionId, Value, ValueChangeSet};
use cogrid_protocol::{BroadcastEnvelope, ResyncPayload, WireCell, WireChange, WireNotice, WireValue};

use crate::events::SessionEvent;

pub fn wire_value(value: &Value) -> WireValue {
    match value {
        Value::Empty => WireValue::Empty,
        Value::Number(n) => WireValue::Number(*n),
        Value::Text(s) => WireValue::Text(s.clone()),
        Value::Boolean(b) => WireValue::Boolean(*b),
        Value::Error(kind) => WireValue::Error(kind.code().to_string()),
    }
}

pub fn wire_change(change: &CellChange) -> WireChange {
    WireChange::new(change.address.clone(), wire_value(&change.value), change.raw.clone())
}

pub fn wire_changes(changes: &[CellChange]) -> Vec<WireChange> {
    changes.iter().map(wire_change).collect()
}

pub fn wire_cell(view: &CellView) -> WireCell {
    WireCell {
        address: view.address.clone(),
        raw: view.raw.clone(),
        value: wire_value(&view.value),
        version: view.version,
    }
}

pub fn wire_notice(notice: &Notice, name: &dyn Fn(SessionId) -> String) -> WireNotice {
    match notice {
        Notice::ConflictOverride {
            session,
            address,
            superseded_version,
            winning_session,
            winning_version,
        } => WireNotice::ConflictOverride {
            session: name(*session),
            address: address.clone(),
            superseded_version: *superseded_version,
            winning_session: name(*winning_session),
            winning_version: *winning_version,
        },
        Notice::FormulaError {
            session,
            address,
            message,
        } => WireNotice::FormulaError {
            session: name(*session),
            address: address.clone(),
            message: message.clone(),
        },
    }
}

pub fn wire_notices(notices: &[Notice], name: &dyn Fn(SessionId) -> String) -> Vec<WireNotice> {
    notices.iter().map(|n| wire_notice(n, name)).collect()
}

pub fn envelope(workbook_id: &str, set: &ValueChangeSet, name: &dyn Fn(SessionId) -> String) -> BroadcastEnvelope {
    BroadcastEnvelope {
        workbook_id: workbook_id.to_string(),
        version: set.version,
        changes: wire_changes(&set.changes),
        notices: wire_notices(&set.notices, name),
    }
}

/// Envelope for one delivered event. `Closed` has no wire form.
pub fn event_envelope(
    workbook_id: &str,
    session: SessionId,
    event: &SessionEvent,
    name: &dyn Fn(SessionId) -> String,
) -> Option<BroadcastEnvelope> {
    match event {
        SessionEvent::Changes(set) => Some(envelope(workbook_id, set, name)),
        SessionEvent::EventsDropped {
            dropped,
            current_version,
        } => Some(BroadcastEnvelope {
            workbook_id: workbook_id.to_string(),
            version: *current_version,
            changes: Vec::new(),
            notices: vec![WireNotice::EventsDropped {
                session: name(session),
                dropped_count: *dropped,
                current_version: *current_version,
            }],
        }),
        SessionEvent::Closed { .. } => None,
    }
}

/// Catch-up payload for a session resyncing from `from_version`.
pub fn resync_payload(workbook_id: &str, from_version: u64, resync: &Resync) -> ResyncPayload {
    match resync {
        Resync::Delta { from, to, changes } => ResyncPayload {
            workbook_id: workbook_id.to_string(),
            from_version: *from,
            to_version: *to,
            full_snapshot: None,
            delta_changes: wire_changes(changes),
        },
        Resync::Full(snapshot) => ResyncPayload {
            workbook_id: workbook_id.to_string(),
            from_version,
            to_version: snapshot.version(),
            full_snapshot: Some(snapshot.cells().iter().map(wire_cell).collect()),
            delta_changes: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogrid_engine::{ErrorKind, Operation, Workbook};

    fn uuid_name(session: SessionId) -> String {
        session.to_string()
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(wire_value(&Value::Empty), WireValue::Empty);
        assert_eq!(wire_value(&Value::Number(1.5)), WireValue::Number(1.5));
        assert_eq!(wire_value(&Value::Boolean(true)), WireValue::Boolean(true));
        assert_eq!(
            wire_value(&Value::Error(ErrorKind::Div0)),
            WireValue::Error("#DIV/0!".into())
        );
    }

    #[test]
    fn test_envelope_from_change_set() {
        let mut wb = Workbook::new();
        let session = SessionId::new();
        wb.apply_operation(Operation::new("A1", "0", session, 0)).unwrap();
        let set = wb.apply_operation(Operation::new("B1", "=1/A1", session, 1)).unwrap();

        let envelope = envelope("budget", &set, &uuid_name);
        assert_eq!(envelope.version, 2);
        assert_eq!(envelope.changes.len(), 1);
        let change = &envelope.changes[0];
        assert_eq!(change.address, "Sheet1!B1");
        assert_eq!(change.raw.as_deref(), Some("=1/A1"));
        assert_eq!(change.error_kind.as_deref(), Some("#DIV/0!"));
    }

    #[test]
    fn test_notice_uses_names() {
        let (alice, bob) = (SessionId::new(), SessionId::new());
        let notice = Notice::ConflictOverride {
            session: alice,
            address: "Sheet1!A1".into(),
            superseded_version: 1,
            winning_session: bob,
            winning_version: 2,
        };
        let name = |s: SessionId| if s == alice { "alice".to_string() } else { "bob".to_string() };
        match wire_notice(&notice, &name) {
            WireNotice::ConflictOverride {
                session,
                winning_session,
                ..
            } => {
                assert_eq!(session, "alice");
                assert_eq!(winning_session, "bob");
            }
            other => panic!("unexpected notice {:?}", other),
        }
    }

    #[test]
    fn test_dropped_event_becomes_notice() {
        let session = SessionId::new();
        let event = SessionEvent::EventsDropped {
            dropped: 4,
            current_version: 20,
        };
        let envelope = event_envelope("wb", session, &event, &uuid_name).unwrap();
        assert!(envelope.changes.is_empty());
        assert_eq!(
            envelope.notices,
            vec![WireNotice::EventsDropped {
                session: session.to_string(),
                dropped_count: 4,
                current_version: 20,
            }]
        );
        let closed = SessionEvent::Closed { reason: "bye".into() };
        assert!(event_envelope("wb", session, &closed, &uuid_name).is_none());
    }

    #[test]
    fn test_resync_payload_shapes() {
        let mut wb = Workbook::new();
        let session = SessionId::new();
        wb.apply_operation(Operation::new("A1", "hello", session, 0)).unwrap();

        let delta = resync_payload("wb", 0, &wb.resync(0));
        assert!(delta.full_snapshot.is_none());
        assert_eq!(delta.to_version, 1);
        assert_eq!(delta.delta_changes.len(), 1);

        let full = resync_payload("wb", 0, &Resync::Full(wb.snapshot()));
        let cells = full.full_snapshot.unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].raw, "hello");
        assert_eq!(cells[0].value, WireValue::Text("hello".into()));
        assert!(full.delta_changes.is_empty());
    }
}
