//! Cogrid Collaboration Protocol: v1 Frozen Wire Format
//!
//! This crate defines the wire types exchanged between collaborating clients
//! and a workbook host. The wire format is JSONL (newline-delimited JSON):
//! one `ClientMessage` or `ServerMessage` per line.
//!
//! # Protocol Version
//!
//! This is **protocol v1**. The wire format is frozen. Changes require:
//! 1. Version bump in PROTOCOL_VERSION
//! 2. New golden vectors in `tests/golden.rs`
//! 3. Backward compatibility handling
//!
//! The crate is independent of the engine: addresses are A1
//! strings, values are `WireValue`, sessions are strings.
//!
//! # Usage
//!
//! ```ignore
//! use cogrid_protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
//!
//! let msg: ClientMessage = serde_json::from_str(&line)?;
//! let reply = serde_json::to_string(&ServerMessage::Error(err))?;
//! ```

use serde::{Deserialize, Serialize};

/// Current protocol version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

fn default_protocol_version() -> u32 {
    1
}

// =============================================================================
// Values
// =============================================================================

/// A computed cell value: `{"kind":"number","value":1.0}`, `{"kind":"empty"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WireValue {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Error code as displayed (`#DIV/0!`, `#REF!`, ...).
    Error(String),
}

impl WireValue {
    pub fn error_code(&self) -> Option<&str> {
        match self {
            WireValue::Error(code) => Some(code),
            _ => None,
        }
    }
}

/// One changed cell in a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChange {
    pub address: String,
    pub value: WireValue,
    /// New raw input; only on the cell that was edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Set when `value` is an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl WireChange {
    pub fn new(address: impl Into<String>, value: WireValue, raw: Option<String>) -> Self {
        let error_kind = value.error_code().map(String::from);
        Self {
            address: address.into(),
            value,
            raw,
            error_kind,
        }
    }
}

/// Full state of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCell {
    pub address: String,
    pub raw: String,
    pub value: WireValue,
    /// Version of the last write to the cell.
    pub version: u64,
}

/// Information addressed to a single session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum WireNotice {
    ConflictOverride {
        session: String,
        address: String,
        superseded_version: u64,
        winning_session: String,
        winning_version: u64,
    },
    FormulaError {
        session: String,
        address: String,
        message: String,
    },
    /// Events were dropped for this session; it should resync.
    EventsDropped {
        session: String,
        dropped_count: u64,
        current_version: u64,
    },
}

impl WireNotice {
    pub fn session(&self) -> &str {
        match self {
            WireNotice::ConflictOverride { session, .. }
            | WireNotice::FormulaError { session, .. }
            | WireNotice::EventsDropped { session, .. } => session,
        }
    }
}

/// A change set as delivered to subscribed sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub workbook_id: String,
    pub version: u64,
    pub changes: Vec<WireChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<WireNotice>,
}

/// What a reconnecting session needs to catch up.
///
/// Exactly one of `full_snapshot` / `delta_changes` is meaningful: when the
/// snapshot is present, `delta_changes` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncPayload {
    pub workbook_id: String,
    pub from_version: u64,
    pub to_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_snapshot: Option<Vec<WireCell>>,
    #[serde(default)]
    pub delta_changes: Vec<WireChange>,
}

// =============================================================================
// Client → Server Messages
// =============================================================================

/// Messages sent from a client to the workbook host.
///
/// `session` fields carry the label the client chose in `connect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Connect(ConnectMessage),
    Submit(SubmitMessage),
    Ack(AckMessage),
    Disconnect(SessionMessage),
    Reconnect(ReconnectMessage),
    Leave(SessionMessage),
    AddSheet(AddSheetMessage),
    GetCell(GetCellMessage),
    GetWorksheet(GetWorksheetMessage),
}

impl ClientMessage {
    /// Request ID for correlation.
    pub fn id(&self) -> &str {
        match self {
            ClientMessage::Connect(m) => &m.id,
            ClientMessage::Submit(m) => &m.id,
            ClientMessage::Ack(m) => &m.id,
            ClientMessage::Disconnect(m) | ClientMessage::Leave(m) => &m.id,
            ClientMessage::Reconnect(m) => &m.id,
            ClientMessage::AddSheet(m) => &m.id,
            ClientMessage::GetCell(m) => &m.id,
            ClientMessage::GetWorksheet(m) => &m.id,
        }
    }
}

/// Join a workbook as a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectMessage {
    pub id: String,
    pub workbook: String,
    pub session: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

/// Edit one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitMessage {
    pub id: String,
    pub session: String,
    pub address: String,
    pub raw: String,
    /// Version the edit is based on. Defaults to the session's last-synced version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
}

/// The session has applied everything up to `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub id: String,
    pub session: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectMessage {
    pub id: String,
    pub session: String,
    /// Overrides the version the host recorded at disconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddSheetMessage {
    pub id: String,
    pub workbook: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetCellMessage {
    pub id: String,
    pub workbook: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetWorksheetMessage {
    pub id: String,
    pub workbook: String,
    pub sheet: String,
}

// =============================================================================
// Server → Client Messages
// =============================================================================

/// Messages sent from the workbook host to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(WelcomeMessage),
    SubmitResult(SubmitResultMessage),
    Event(EventMessage),
    Resync(ResyncMessage),
    Cell(CellMessage),
    Worksheet(WorksheetMessage),
    Done(DoneMessage),
    Error(ErrorMessage),
}

/// Response to connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub id: String,
    pub session: String,
    /// Host-assigned session identity.
    pub session_id: String,
    pub workbook: String,
    pub protocol_version: u32,
    pub version: u64,
}

/// Result of an accepted submit or add_sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResultMessage {
    pub id: String,
    pub version: u64,
    pub changes: Vec<WireChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<WireNotice>,
}

/// A broadcast delivered to one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub session: String,
    #[serde(flatten)]
    pub envelope: BroadcastEnvelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncMessage {
    pub id: String,
    pub session: String,
    #[serde(flatten)]
    pub payload: ResyncPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMessage {
    pub id: String,
    pub version: u64,
    pub cell: WireCell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksheetMessage {
    pub id: String,
    pub version: u64,
    pub sheet: String,
    pub cells: Vec<WireCell>,
}

/// Acknowledges ack, disconnect and leave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneMessage {
    pub id: String,
    pub version: u64,
}

/// Error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub id: String,
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::Connect(ConnectMessage {
            id: "1".to_string(),
            workbook: "budget".to_string(),
            session: "alice".to_string(),
            protocol_version: 1,
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"connect""#));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        if let ClientMessage::Connect(c) = parsed {
            assert_eq!(c.session, "alice");
        } else {
            panic!("Expected Connect message");
        }
    }

    #[test]
    fn test_submit_base_version_optional() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"submit","id":"2","session":"bob","address":"A1","raw":"=1+1"}"#)
                .unwrap();
        match parsed {
            ClientMessage::Submit(s) => {
                assert_eq!(s.base_version, None);
                assert_eq!(s.raw, "=1+1");
            }
            other => panic!("Expected Submit, got {:?}", other),
        }
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"leave","id":"9","session":"bob"}"#)
                .unwrap()
                .id(),
            "9"
        );
    }

    #[test]
    fn test_value_encoding() {
        assert_eq!(
            serde_json::to_string(&WireValue::Number(1.0)).unwrap(),
            r#"{"kind":"number","value":1.0}"#
        );
        assert_eq!(serde_json::to_string(&WireValue::Empty).unwrap(), r#"{"kind":"empty"}"#);
        let parsed: WireValue = serde_json::from_str(r##"{"kind":"error","value":"#REF!"}"##).unwrap();
        assert_eq!(parsed.error_code(), Some("#REF!"));
    }

    #[test]
    fn test_change_error_kind_follows_value() {
        let change = WireChange::new("Sheet1!A1", WireValue::Error("#DIV/0!".into()), None);
        assert_eq!(change.error_kind.as_deref(), Some("#DIV/0!"));
        let change = WireChange::new("Sheet1!A1", WireValue::Number(2.0), Some("2".into()));
        assert_eq!(change.error_kind, None);
    }

    #[test]
    fn test_envelope_omits_empty_notices() {
        let envelope = BroadcastEnvelope {
            workbook_id: "wb".into(),
            version: 3,
            changes: vec![],
            notices: vec![],
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("notices"));
        let parsed: BroadcastEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }
}
