//! End-to-end replay of collaboration scripts through `execute_script`.
//!
//! Output is parsed back with the protocol crate, so these tests also pin
//! the JSONL the CLI emits to protocol v1.

use std::fs;

use tempfile::tempdir;

use cogrid_cli::replay::execute_script;
use cogrid_config::{CollabSettings, ConflictPolicyKind};
use cogrid_protocol::{ServerMessage, WireNotice, WireValue};

fn replay(script: &str, settings: CollabSettings) -> Vec<ServerMessage> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("script.jsonl");
    fs::write(&path, script).unwrap();

    let mut out = Vec::new();
    execute_script(&path, settings, None, &mut out).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn reply<'a>(out: &'a [ServerMessage], id: &str) -> &'a ServerMessage {
    out.iter()
        .find(|m| match m {
            ServerMessage::Welcome(m) => m.id == id,
            ServerMessage::SubmitResult(m) => m.id == id,
            ServerMessage::Resync(m) => m.id == id,
            ServerMessage::Cell(m) => m.id == id,
            ServerMessage::Worksheet(m) => m.id == id,
            ServerMessage::Done(m) => m.id == id,
            ServerMessage::Error(m) => m.id == id,
            ServerMessage::Event(_) => false,
        })
        .unwrap_or_else(|| panic!("no reply with id {}", id))
}

const PROPAGATION: &str = r#"
# two editors, one reader that drops out for a while
{"type":"connect","id":"c1","workbook":"budget","session":"alice"}
{"type":"connect","id":"c2","workbook":"budget","session":"bob"}
{"type":"submit","id":"s1","session":"alice","address":"A1","raw":"10"}
{"type":"submit","id":"s2","session":"alice","address":"A2","raw":"20"}
{"type":"submit","id":"s3","session":"alice","address":"A3","raw":"=SUM(A1:A2)"}
{"type":"ack","id":"k1","session":"bob","version":3}
{"type":"disconnect","id":"d1","session":"bob"}
{"type":"submit","id":"s4","session":"alice","address":"A1","raw":"100"}
{"type":"submit","id":"s5","session":"alice","address":"B1","raw":"=A3/0"}
{"type":"reconnect","id":"r1","session":"bob"}
{"type":"get_cell","id":"g1","workbook":"budget","address":"A3"}
{"type":"get_worksheet","id":"w1","workbook":"budget","sheet":"Sheet1"}
"#;

#[test]
fn test_propagation_and_delta_resync() {
    let out = replay(PROPAGATION, CollabSettings::default());

    match reply(&out, "s4") {
        ServerMessage::SubmitResult(r) => {
            assert_eq!(r.version, 4);
            let addresses: Vec<&str> = r.changes.iter().map(|c| c.address.as_str()).collect();
            assert_eq!(addresses, vec!["Sheet1!A1", "Sheet1!A3"]);
            assert_eq!(r.changes[1].value, WireValue::Number(120.0));
        }
        other => panic!("expected submit_result, got {:?}", other),
    }

    match reply(&out, "s5") {
        ServerMessage::SubmitResult(r) => {
            assert_eq!(r.changes[0].error_kind.as_deref(), Some("#DIV/0!"));
        }
        other => panic!("expected submit_result, got {:?}", other),
    }

    assert!(matches!(reply(&out, "k1"), ServerMessage::Done(d) if d.version == 3));
    assert!(matches!(reply(&out, "d1"), ServerMessage::Done(d) if d.version == 3));

    // Bob missed s4 and s5 and catches up from version 3
    match reply(&out, "r1") {
        ServerMessage::Resync(r) => {
            assert_eq!(r.session, "bob");
            assert_eq!(r.payload.from_version, 3);
            assert_eq!(r.payload.to_version, 5);
            assert!(r.payload.full_snapshot.is_none());
            let addresses: Vec<&str> = r.payload.delta_changes.iter().map(|c| c.address.as_str()).collect();
            assert_eq!(addresses, vec!["Sheet1!A1", "Sheet1!B1", "Sheet1!A3"]);
        }
        other => panic!("expected resync, got {:?}", other),
    }

    match reply(&out, "g1") {
        ServerMessage::Cell(c) => {
            assert_eq!(c.version, 5);
            assert_eq!(c.cell.raw, "=SUM(A1:A2)");
            assert_eq!(c.cell.value, WireValue::Number(120.0));
        }
        other => panic!("expected cell, got {:?}", other),
    }

    match reply(&out, "w1") {
        ServerMessage::Worksheet(w) => assert_eq!(w.cells.len(), 4),
        other => panic!("expected worksheet, got {:?}", other),
    }

    // Bob heard about s1..s3 while connected; alice heard nothing of her own
    let bob_events = out
        .iter()
        .filter(|m| matches!(m, ServerMessage::Event(e) if e.session == "bob"))
        .count();
    assert_eq!(bob_events, 3);
    assert!(!out
        .iter()
        .any(|m| matches!(m, ServerMessage::Event(e) if e.session == "alice")));
}

const CONFLICT: &str = r#"
{"type":"connect","id":"c1","workbook":"wb","session":"alice"}
{"type":"connect","id":"c2","workbook":"wb","session":"bob"}
{"type":"submit","id":"s1","session":"alice","address":"C3","raw":"first","base_version":0}
{"type":"submit","id":"s2","session":"bob","address":"C3","raw":"second","base_version":0}
"#;

#[test]
fn test_conflict_notice_uses_session_labels() {
    let out = replay(CONFLICT, CollabSettings::default());

    let notice = out
        .iter()
        .find_map(|m| match m {
            ServerMessage::Event(e) if e.session == "alice" => e.envelope.notices.first().cloned(),
            _ => None,
        })
        .expect("alice should be told her write was overwritten");
    assert_eq!(
        notice,
        WireNotice::ConflictOverride {
            session: "alice".into(),
            address: "Sheet1!C3".into(),
            superseded_version: 1,
            winning_session: "bob".into(),
            winning_version: 2,
        }
    );
}

#[test]
fn test_reject_stale_policy_from_settings() {
    let settings = CollabSettings {
        conflict_policy: ConflictPolicyKind::RejectStale,
        ..CollabSettings::default()
    };
    let out = replay(CONFLICT, settings);

    match reply(&out, "s2") {
        ServerMessage::Error(e) => assert_eq!(e.code, "stale_base"),
        other => panic!("expected error, got {:?}", other),
    }
}

#[test]
fn test_cycle_and_add_sheet() {
    let script = r#"
{"type":"connect","id":"c1","workbook":"wb","session":"alice"}
{"type":"submit","id":"s1","session":"alice","address":"A1","raw":"=B1"}
{"type":"submit","id":"s2","session":"alice","address":"B1","raw":"=A1"}
{"type":"submit","id":"s3","session":"alice","address":"C1","raw":"=Data!A1+1"}
{"type":"add_sheet","id":"a1","workbook":"wb","name":"Data"}
{"type":"submit","id":"s4","session":"alice","address":"Data!A1","raw":"41"}
{"type":"get_cell","id":"g1","workbook":"wb","address":"C1"}
"#;
    let out = replay(script, CollabSettings::default());

    match reply(&out, "s2") {
        ServerMessage::Error(e) => {
            assert_eq!(e.code, "cycle");
            assert!(e.message.starts_with("Circular reference"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    match reply(&out, "s3") {
        ServerMessage::SubmitResult(r) => {
            assert_eq!(r.changes[0].value, WireValue::Error("#REF!".into()));
        }
        other => panic!("expected submit_result, got {:?}", other),
    }
    match reply(&out, "a1") {
        ServerMessage::SubmitResult(r) => assert_eq!(r.version, 3),
        other => panic!("expected submit_result, got {:?}", other),
    }
    match reply(&out, "g1") {
        ServerMessage::Cell(c) => assert_eq!(c.cell.value, WireValue::Number(42.0)),
        other => panic!("expected cell, got {:?}", other),
    }
}

#[test]
fn test_config_file_drives_full_snapshot_resync() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("collab.toml");
    fs::write(&config, "retention = 2\n").unwrap();
    let settings = CollabSettings::load_from(&config).unwrap();

    let script = r#"
{"type":"connect","id":"c1","workbook":"wb","session":"alice"}
{"type":"connect","id":"c2","workbook":"wb","session":"bob"}
{"type":"disconnect","id":"d1","session":"bob"}
{"type":"submit","id":"s1","session":"alice","address":"A1","raw":"1"}
{"type":"submit","id":"s2","session":"alice","address":"A2","raw":"2"}
{"type":"submit","id":"s3","session":"alice","address":"A3","raw":"3"}
{"type":"reconnect","id":"r1","session":"bob"}
{"type":"leave","id":"l1","session":"bob"}
{"type":"ack","id":"k1","session":"bob","version":3}
"#;
    let out = replay(script, settings);

    match reply(&out, "r1") {
        ServerMessage::Resync(r) => {
            let cells = r.payload.full_snapshot.as_ref().expect("gap exceeds retention");
            assert_eq!(cells.len(), 3);
            assert!(r.payload.delta_changes.is_empty());
        }
        other => panic!("expected resync, got {:?}", other),
    }
    assert!(matches!(reply(&out, "l1"), ServerMessage::Done(d) if d.version == 3));
    assert!(matches!(reply(&out, "k1"), ServerMessage::Error(e) if e.code == "unknown_session"));
}
